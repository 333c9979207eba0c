//! Inference error types.
//!
//! All errors implement `std::error::Error` via `thiserror`. Engines never
//! surface these to the conversation loop directly: they are rendered into a
//! diagnostic assistant message with [`InferenceError::diagnostic`].

use thiserror::Error;

/// Errors that can occur during inference operations.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// TCP/HTTP connection to the model endpoint failed.
    #[error("connection failed to {endpoint}: {reason}")]
    ConnectionFailed {
        endpoint: String,
        reason: String,
    },

    /// The model endpoint did not respond within the configured timeout.
    #[error("inference timeout after {duration_secs}s")]
    Timeout {
        duration_secs: u64,
    },

    /// Non-2xx HTTP response from the model endpoint.
    #[error("HTTP {status}: {body}")]
    HttpError {
        status: u16,
        body: String,
    },

    /// The backend answered, but the payload could not be understood.
    #[error("malformed response: {reason}")]
    MalformedResponse {
        reason: String,
    },

    /// SSE / NDJSON stream parsing or chunk-level error.
    #[error("stream error: {reason}")]
    StreamError {
        reason: String,
    },

    /// Failed to decode the arguments of a native tool call.
    #[error("tool call parse error: {reason}")]
    ToolCallParseError {
        raw_response: String,
        reason: String,
    },

    /// Reading a local file for upload or embedding failed.
    #[error("failed to read {path}: {reason}")]
    FileRead {
        path: String,
        reason: String,
    },

    /// The requested model is not present in the configuration.
    #[error("no model named '{name}'")]
    UnknownModel {
        name: String,
    },

    /// No model was requested and none could be chosen by default.
    #[error("no model configured")]
    NoModelConfigured,

    /// Configuration loading or validation error.
    #[error("config error: {reason}")]
    ConfigError {
        reason: String,
    },
}

/// Coarse classification used to pick a user-facing explanation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Connection,
    Timeout,
    Authentication,
    RateLimit,
    BadRequest,
    NotFound,
    ServiceUnavailable,
    Other,
}

impl InferenceError {
    /// Classify the error for message selection.
    pub fn kind(&self) -> ErrorKind {
        match self {
            InferenceError::ConnectionFailed { .. } => ErrorKind::Connection,
            InferenceError::Timeout { .. } => ErrorKind::Timeout,
            InferenceError::HttpError { status, .. } => match status {
                401 | 403 => ErrorKind::Authentication,
                429 => ErrorKind::RateLimit,
                400 | 422 => ErrorKind::BadRequest,
                404 => ErrorKind::NotFound,
                502..=504 => ErrorKind::ServiceUnavailable,
                _ => ErrorKind::Other,
            },
            _ => ErrorKind::Other,
        }
    }

    /// Translate the error into a sentence a user can act on.
    ///
    /// `context` names the operation that failed (e.g. `"LLM inference"`)
    /// and only appears in the generic fallback.
    pub fn friendly_message(&self, context: &str) -> String {
        match self.kind() {
            ErrorKind::Connection => format!(
                "Connection error: failed to connect to the LLM provider ({self}). \
                 Please verify your network connection and the API endpoint URL."
            ),
            ErrorKind::Timeout => "Connection timeout: the LLM provider is taking too long to \
                 respond. Please check your network connection or try again later."
                .to_string(),
            ErrorKind::Authentication => "Authentication error: invalid API key or \
                 authentication credentials. Please check your API key configuration."
                .to_string(),
            ErrorKind::RateLimit => "Rate limit error: you have exceeded the API rate limit. \
                 Please wait before making more requests."
                .to_string(),
            ErrorKind::BadRequest => format!(
                "Bad request error: the request to the LLM provider was rejected. This might \
                 be due to invalid parameters or model configuration. Error details: {self}"
            ),
            ErrorKind::NotFound => "Not found error: the requested model or endpoint was not \
                 found. Please check your model name and configuration."
                .to_string(),
            ErrorKind::ServiceUnavailable => "Service unavailable: the LLM provider's service \
                 is currently unavailable. Please try again later."
                .to_string(),
            ErrorKind::Other => format!(
                "{context} failed: {self}. Please check your configuration and connection."
            ),
        }
    }

    /// Render the diagnostic text carried by an error-flagged assistant message.
    pub fn diagnostic(&self, model: &str) -> String {
        format!(
            "Error: {}\n\tmodel: {model}",
            self.friendly_message("LLM inference")
        )
    }

    /// Extract the error body text, if this is an `HttpError`.
    pub fn error_body(&self) -> Option<&str> {
        match self {
            InferenceError::HttpError { body, .. } => Some(body),
            _ => None,
        }
    }

    /// Map a transport-level `reqwest` failure onto the taxonomy.
    pub(crate) fn from_transport(err: &reqwest::Error, endpoint: &str, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            InferenceError::Timeout {
                duration_secs: timeout_secs,
            }
        } else {
            InferenceError::ConnectionFailed {
                endpoint: endpoint.to_string(),
                reason: err.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_maps_http_statuses() {
        let cases = [
            (401, ErrorKind::Authentication),
            (403, ErrorKind::Authentication),
            (429, ErrorKind::RateLimit),
            (400, ErrorKind::BadRequest),
            (404, ErrorKind::NotFound),
            (503, ErrorKind::ServiceUnavailable),
            (500, ErrorKind::Other),
        ];
        for (status, expected) in cases {
            let err = InferenceError::HttpError {
                status,
                body: String::new(),
            };
            assert_eq!(err.kind(), expected, "status {status}");
        }
    }

    #[test]
    fn test_diagnostic_carries_model_name() {
        let err = InferenceError::ConnectionFailed {
            endpoint: "http://localhost:11434".into(),
            reason: "connection refused".into(),
        };
        let text = err.diagnostic("llama3");
        assert!(text.starts_with("Error: Connection error"));
        assert!(text.ends_with("\tmodel: llama3"));
    }

    #[test]
    fn test_generic_message_names_context() {
        let err = InferenceError::MalformedResponse {
            reason: "empty choices array".into(),
        };
        let text = err.friendly_message("LLM inference");
        assert!(text.starts_with("LLM inference failed: malformed response"));
    }

    #[test]
    fn test_bad_request_includes_details() {
        let err = InferenceError::HttpError {
            status: 400,
            body: "unknown parameter".into(),
        };
        assert!(err.friendly_message("x").contains("unknown parameter"));
    }

    #[test]
    fn test_error_body_http_error() {
        let err = InferenceError::HttpError {
            status: 500,
            body: "test body".to_string(),
        };
        assert_eq!(err.error_body(), Some("test body"));
    }

    #[test]
    fn test_error_body_non_http() {
        let err = InferenceError::Timeout { duration_secs: 5 };
        assert!(err.error_body().is_none());
    }
}
