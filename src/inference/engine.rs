//! The inference engine seam.
//!
//! One engine wraps one configured model. Engines never fail toward the
//! caller: backend errors come back as `InferenceResponse::Diagnostic`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{BoxStream, Stream, StreamExt};

use crate::tool_provider::ToolDescriptor;

use super::capabilities::{Capability, CapabilitySet};
use super::config::{ModelConfig, Provider};
use super::errors::InferenceError;
use super::ollama::OllamaEngine;
use super::openai::OpenAiEngine;
use super::prompt::default_system_prompt;
use super::types::{InferenceOptions, InferenceResponse, Message, Role, ToolCallRequest};

/// Partial responses from a streaming call. Finite and consumed once.
pub type ResponseStream = BoxStream<'static, InferenceResponse>;

// ─── InferenceEngine ─────────────────────────────────────────────────────────

#[async_trait]
pub trait InferenceEngine: Send + Sync {
    fn model_config(&self) -> &ModelConfig;

    fn capabilities(&self) -> &CapabilitySet;

    fn model_name(&self) -> &str {
        &self.model_config().name
    }

    fn supports_capability(&self, capability: Capability) -> bool {
        self.capabilities().supports(capability)
    }

    /// Default system prompt for this model.
    fn system_prompt(&self) -> String {
        default_system_prompt(self.supports_capability(Capability::ThinkingMode))
    }

    /// One complete response.
    async fn infer(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
        options: &InferenceOptions,
    ) -> InferenceResponse;

    /// Text deltas as `Freeform` items; native tool calls as one `Structured`
    /// item; a failure as a final `Diagnostic` item.
    async fn stream(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
        options: &InferenceOptions,
    ) -> ResponseStream;

    /// Upload a file to the backend, returning its id. `Ok(None)` when the
    /// backend has no file store.
    async fn upload_file(&self, _path: &Path) -> Result<Option<String>, InferenceError> {
        Ok(None)
    }
}

/// Build the engine for a model configuration.
pub fn create_engine(config: ModelConfig) -> Result<Arc<dyn InferenceEngine>, InferenceError> {
    tracing::info!(
        model = %config.name,
        provider = ?config.provider,
        url = %config.url,
        "creating inference engine"
    );
    Ok(match config.provider {
        Provider::OpenAi => Arc::new(OpenAiEngine::new(config)?),
        Provider::Ollama => Arc::new(OllamaEngine::new(config)?),
    })
}

// ─── Shared Helpers ──────────────────────────────────────────────────────────

/// Render a backend failure as the response the loop receives.
pub(crate) fn diagnostic_response(err: &InferenceError, model: &str) -> InferenceResponse {
    tracing::warn!(model = %model, error = %err, "inference failed");
    InferenceResponse::Diagnostic {
        message: err.diagnostic(model),
        model: model.to_string(),
    }
}

/// Turn a fallible stream into a `ResponseStream`: the first error becomes a
/// diagnostic item and ends the stream.
pub(crate) fn absorb_stream_errors<S>(stream: S, model: String) -> ResponseStream
where
    S: Stream<Item = Result<InferenceResponse, InferenceError>> + Send + 'static,
{
    stream
        .scan(false, move |failed, item| {
            let next = if *failed {
                None
            } else {
                match item {
                    Ok(response) => Some(response),
                    Err(e) => {
                        *failed = true;
                        Some(diagnostic_response(&e, &model))
                    }
                }
            };
            futures::future::ready(next)
        })
        .boxed()
}

/// Tool names on the wire cannot contain `#`; `provider#tool` becomes
/// `provider__tool`.
pub fn wire_tool_name(qualified: &str) -> String {
    qualified.replace('#', "__")
}

/// Maps wire names back to the qualified names the tools were offered under.
#[derive(Debug, Clone, Default)]
pub(crate) struct ToolNameMap(HashMap<String, String>);

impl ToolNameMap {
    pub(crate) fn new(tools: &[ToolDescriptor]) -> Self {
        Self(
            tools
                .iter()
                .map(|t| (wire_tool_name(&t.name), t.name.clone()))
                .collect(),
        )
    }

    pub(crate) fn resolve(&self, wire: &str) -> String {
        self.0.get(wire).cloned().unwrap_or_else(|| wire.to_string())
    }
}

/// Rewrite native tool-call history as plain text for backends that are not
/// given tools natively: requests become the JSON wire object, results
/// become user messages.
pub(crate) fn flatten_tool_history(messages: &[Message]) -> Vec<Message> {
    messages
        .iter()
        .map(|msg| match msg.role {
            Role::Assistant if !msg.tool_calls.is_empty() => {
                Message::assistant(wire_json(&msg.tool_calls))
            }
            Role::Tool => Message::user(format!(
                "Result of tool call {}:\n{}",
                msg.tool_call_id.as_deref().unwrap_or("unknown"),
                msg.text()
            )),
            _ => msg.clone(),
        })
        .collect()
}

fn wire_json(calls: &[ToolCallRequest]) -> String {
    let records: Vec<serde_json::Value> = calls
        .iter()
        .map(|c| {
            serde_json::json!({
                "name": c.qualified_name,
                "args": c.arguments,
                "id": c.id,
                "type": "tool_call",
            })
        })
        .collect();
    serde_json::json!({ "tool_calls": records }).to_string()
}

/// Merge per-call options over the model's defaults.
pub(crate) struct EffectiveOptions {
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl EffectiveOptions {
    pub(crate) fn merge(config: &ModelConfig, options: &InferenceOptions) -> Self {
        let mut extra = config.options.extra.clone();
        extra.extend(options.extra.clone());
        Self {
            temperature: options.temperature.unwrap_or(config.options.temperature),
            top_p: options.top_p.unwrap_or(config.options.top_p),
            max_tokens: options.max_tokens.unwrap_or(config.options.max_tokens),
            extra,
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
