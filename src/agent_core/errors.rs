//! Agent Core error types.
//!
//! These never escape `process`/`stream`: the executor renders them into an
//! error-flagged assistant message with [`AgentError::into_message`].

use thiserror::Error;

use crate::inference::errors::InferenceError;
use crate::inference::types::Message;

/// Errors that can occur while preparing or running a task.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The requested model is not configured.
    #[error("Model '{name}' is not configured.")]
    UnknownModel { name: String },

    /// No model was requested and none could be chosen.
    #[error("No model is configured.")]
    NoModelConfigured,

    /// The engine for a configured model could not be built.
    #[error("Failed to start model '{model}': {reason}")]
    EngineUnavailable { model: String, reason: String },

    /// An attachment needs a capability the model lacks.
    #[error("Model '{model}' does not support {kind} input.")]
    UnsupportedInput { model: String, kind: String },

    /// An attachment or context file could not be read.
    #[error("Failed to read {path}: {reason}")]
    Attachment { path: String, reason: String },

    /// The configuration could not be loaded.
    #[error("config error: {reason}")]
    Config { reason: String },
}

impl AgentError {
    /// Render as the assistant message returned to the caller.
    pub fn into_message(self) -> Message {
        let mut msg = Message::assistant(self.to_string());
        msg.is_error = true;
        msg
    }
}

impl From<InferenceError> for AgentError {
    fn from(e: InferenceError) -> Self {
        match e {
            InferenceError::UnknownModel { name } => AgentError::UnknownModel { name },
            InferenceError::NoModelConfigured => AgentError::NoModelConfigured,
            InferenceError::FileRead { path, reason } => AgentError::Attachment { path, reason },
            InferenceError::ConfigError { reason } => AgentError::Config { reason },
            other => AgentError::EngineUnavailable {
                model: String::new(),
                reason: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_input_wording() {
        let msg = AgentError::UnsupportedInput {
            model: "qwen".into(),
            kind: "image".into(),
        }
        .into_message();
        assert_eq!(msg.text(), "Model 'qwen' does not support image input.");
        assert!(msg.is_error);
    }

    #[test]
    fn test_inference_errors_map_to_agent_errors() {
        let err: AgentError = InferenceError::UnknownModel { name: "x".into() }.into();
        assert!(matches!(err, AgentError::UnknownModel { ref name } if name == "x"));
        let err: AgentError = InferenceError::NoModelConfigured.into();
        assert!(matches!(err, AgentError::NoModelConfigured));
    }
}
