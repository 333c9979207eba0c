//! Shared types for the agent core.
//!
//! Task requests, caller-supplied hooks, attachments, and the iteration
//! counter used by the conversation loop.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::inference::types::{InferenceOptions, Message};
use crate::tool_provider::{ResultPart, ToolDescriptor};

/// Answer returned when the loop runs out of iterations.
pub const MAX_ITERATIONS_MESSAGE: &str =
    "Reached maximum number of iterations without a final answer.";

// ─── Hooks ──────────────────────────────────────────────────────────────────

/// Yes/no gate shown before each tool execution.
pub type ConfirmFn = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Classifies a tool result. `Some(message)` stops the batch and becomes the
/// answer; `None` lets the conversation continue.
pub type ToolErrorCheck = Arc<dyn Fn(&str, &[ResultPart]) -> Option<String> + Send + Sync>;

/// Adds messages derived from the user input before the conversation starts.
#[async_trait]
pub trait PromptEnhancer: Send + Sync {
    async fn enhance(&self, user_input: &str) -> Vec<Message>;
}

/// Narrows the tools offered to the model for one task.
#[async_trait]
pub trait ToolFilter: Send + Sync {
    async fn filter(&self, user_input: &str, tools: Vec<ToolDescriptor>) -> Vec<ToolDescriptor>;
}

/// Optional caller hooks for one task.
#[derive(Clone, Default)]
pub struct Hooks {
    /// Replaces the engine's default system prompt.
    pub system_message: Option<String>,
    pub tool_filter: Option<Arc<dyn ToolFilter>>,
    pub prompt_enhancer: Option<Arc<dyn PromptEnhancer>>,
    pub tool_error_check: Option<ToolErrorCheck>,
}

// ─── Attachments ────────────────────────────────────────────────────────────

/// Files sent with the user message.
#[derive(Debug, Clone, Default)]
pub struct Attachments {
    pub images: Vec<PathBuf>,
    pub audio: Vec<PathBuf>,
    pub video: Vec<PathBuf>,
    /// Uploaded when the model supports it, otherwise embedded as text.
    pub files: Vec<PathBuf>,
}

impl Attachments {
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
            && self.audio.is_empty()
            && self.video.is_empty()
            && self.files.is_empty()
    }
}

// ─── TaskRequest ────────────────────────────────────────────────────────────

/// Everything `process`/`stream` needs for one user turn.
#[derive(Clone, Default)]
pub struct TaskRequest {
    pub input: String,
    /// Model name; `None` uses the configured default.
    pub model: Option<String>,
    /// Overrides the configured iteration cap.
    pub max_iterations: Option<u32>,
    /// Ask before every tool execution.
    pub confirm: bool,
    pub options: InferenceOptions,
    pub attachments: Attachments,
    pub hooks: Hooks,
}

impl TaskRequest {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = Some(max);
        self
    }

    pub fn with_confirmation(mut self, confirm: bool) -> Self {
        self.confirm = confirm;
        self
    }

    pub fn with_options(mut self, options: InferenceOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_attachments(mut self, attachments: Attachments) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }
}

// ─── Iterations ─────────────────────────────────────────────────────────────

/// Iteration counter for one conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationState {
    pub current: u32,
    pub max: u32,
}

impl IterationState {
    pub fn new(max: u32) -> Self {
        Self { current: 0, max }
    }

    pub fn exhausted(&self) -> bool {
        self.current >= self.max
    }

    pub fn advance(&mut self) {
        self.current += 1;
    }
}
