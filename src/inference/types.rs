//! Shared conversation types.
//!
//! `Message` is the unit the conversation loop appends to and returns.
//! `InferenceResponse` is the tagged shape every engine produces, so tool-call
//! extraction never has to probe a message for optional fields.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::thinking::split_thinking;

// ─── Messages ────────────────────────────────────────────────────────────────

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Kind of binary attachment embedded in a content part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Audio,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MediaKind::Image => "image",
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        })
    }
}

/// One part of a structured (multimodal) message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    Media {
        kind: MediaKind,
        mime: String,
        /// Base64-encoded payload.
        data: String,
        /// Where the payload came from (file path), for logs and fallbacks.
        source: String,
    },
}

/// Message body: plain text or an ordered list of parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl Content {
    /// Concatenated text of the body; media parts contribute nothing.
    pub fn text(&self) -> String {
        match self {
            Content::Text(s) => s.clone(),
            Content::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::Media { .. } => None,
                })
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Content::Text(s) => s.is_empty(),
            Content::Parts(parts) => parts.is_empty(),
        }
    }
}

impl Default for Content {
    fn default() -> Self {
        Content::Text(String::new())
    }
}

impl From<String> for Content {
    fn from(s: String) -> Self {
        Content::Text(s)
    }
}

impl From<&str> for Content {
    fn from(s: &str) -> Self {
        Content::Text(s.to_string())
    }
}

/// A single message in the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: Content,
    /// Assistant messages may request tool executions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    /// Tool messages answer exactly one request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Reasoning text separated from the answer, kept for optional display.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    /// Set on diagnostics produced from backend failures.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
    /// Model that produced this message, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl Message {
    fn with_role(role: Role, content: Content) -> Self {
        Self {
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            thinking: None,
            is_error: false,
            model: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::with_role(Role::System, Content::Text(text.into()))
    }

    pub fn user(content: impl Into<Content>) -> Self {
        Self::with_role(Role::User, content.into())
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, Content::Text(text.into()))
    }

    /// Assistant message that records one tool request (content stays empty).
    pub fn assistant_tool_call(call: ToolCallRequest) -> Self {
        let mut msg = Self::with_role(Role::Assistant, Content::default());
        msg.tool_calls.push(call);
        msg
    }

    /// Error-flagged assistant message tagged with the originating model.
    pub fn diagnostic(text: impl Into<String>, model: impl Into<String>) -> Self {
        let mut msg = Self::assistant(text);
        msg.is_error = true;
        msg.model = Some(model.into());
        msg
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Plain text of the message body.
    pub fn text(&self) -> String {
        self.content.text()
    }
}

// ─── Tool Calls ──────────────────────────────────────────────────────────────

/// A tool execution requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Unique within one iteration; generated when the model omits it.
    pub id: String,
    /// `"<provider>#<tool>"` or a bare tool name.
    pub qualified_name: String,
    pub arguments: serde_json::Map<String, serde_json::Value>,
}

impl ToolCallRequest {
    pub fn new(
        id: impl Into<String>,
        qualified_name: impl Into<String>,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            id: id.into(),
            qualified_name: qualified_name.into(),
            arguments,
        }
    }

    /// Provider selector before the first `#`. `None` for bare names and for
    /// an empty selector, both meaning "the only configured provider".
    pub fn provider(&self) -> Option<&str> {
        match self.qualified_name.split_once('#') {
            Some((provider, _)) if !provider.is_empty() => Some(provider),
            _ => None,
        }
    }

    /// Tool name after the first `#` (or the whole name when bare).
    pub fn tool_name(&self) -> &str {
        match self.qualified_name.split_once('#') {
            Some((_, tool)) => tool,
            None => &self.qualified_name,
        }
    }

    /// Arguments as a JSON value, for providers and wire encoding.
    pub fn arguments_value(&self) -> serde_json::Value {
        serde_json::Value::Object(self.arguments.clone())
    }
}

impl fmt::Display for ToolCallRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({}) [id: {}]",
            self.qualified_name,
            serde_json::Value::Object(self.arguments.clone()),
            self.id
        )
    }
}

/// Outcome of one tool execution. Errors are never merged into success text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "content", rename_all = "lowercase")]
pub enum ToolOutput {
    Success(String),
    Error(String),
}

/// Result of executing one `ToolCallRequest`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub output: ToolOutput,
}

impl ToolResult {
    /// Convert into the `tool` message fed back to the model.
    pub fn into_message(self) -> Message {
        let (text, is_error) = match self.output {
            ToolOutput::Success(text) => (text, false),
            ToolOutput::Error(text) => (text, true),
        };
        let mut msg = Message::with_role(Role::Tool, Content::Text(text));
        msg.tool_call_id = Some(self.tool_call_id);
        msg.is_error = is_error;
        msg
    }
}

// ─── Inference Responses ─────────────────────────────────────────────────────

/// What an engine produced: native tool calls, free text, or a diagnostic
/// standing in for a backend failure.
///
/// Streams yield the same type; a `Freeform` item is then a text delta.
#[derive(Debug, Clone, PartialEq)]
pub enum InferenceResponse {
    Structured(Vec<ToolCallRequest>),
    Freeform(String),
    Diagnostic { message: String, model: String },
}

impl InferenceResponse {
    /// Text carried by the response (empty for structured calls).
    pub fn text(&self) -> &str {
        match self {
            InferenceResponse::Structured(_) => "",
            InferenceResponse::Freeform(text) => text,
            InferenceResponse::Diagnostic { message, .. } => message,
        }
    }

    /// Build the assistant message that represents this response as a final
    /// answer. Thinking sections move out of `content`.
    pub fn into_message(self, model: &str) -> Message {
        match self {
            InferenceResponse::Structured(calls) => {
                let mut msg = Message::assistant(String::new()).with_model(model);
                msg.tool_calls = calls;
                msg
            }
            InferenceResponse::Freeform(text) => {
                let split = split_thinking(&text);
                let mut msg = Message::assistant(split.answer).with_model(model);
                msg.thinking = split.thinking;
                msg
            }
            InferenceResponse::Diagnostic { message, model } => Message::diagnostic(message, model),
        }
    }
}

/// Per-call sampling overrides. Unset fields fall back to the model config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InferenceOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Extra backend parameters passed through verbatim.
    #[serde(default, flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

// ─── Tests ───────────────────────────────────────────────────────────────────
