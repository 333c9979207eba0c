//! Inference layer: model configuration, backend engines, and response
//! interpretation.
//!
//! This module handles all communication with model backends:
//! - OpenAI-compatible chat completions (SSE streaming)
//! - Native Ollama chat (NDJSON streaming)
//! - Capability resolution per model
//! - Tool call extraction from free text, with JSON repair
//! - Thinking-section separation
//!
//! Switching models is a config change, not a code change.

pub mod capabilities;
pub mod config;
pub mod engine;
pub mod errors;
pub mod ollama;
pub mod openai;
pub mod prompt;
pub mod streaming;
pub mod thinking;
pub mod tool_call_parser;
pub mod types;

// Re-exports for convenience
pub use capabilities::{Capability, CapabilitySet};
pub use config::{AppConfig, ModelConfig, ModelOptions, Provider, RetryConfig, StreamingConfig};
pub use engine::{create_engine, InferenceEngine, ResponseStream};
pub use errors::InferenceError;
pub use ollama::OllamaEngine;
pub use openai::OpenAiEngine;
pub use thinking::ThinkingFilter;
pub use tool_call_parser::{extract, ExtractMode};
pub use types::{
    Content, ContentPart, InferenceOptions, InferenceResponse, MediaKind, Message, Role,
    ToolCallRequest, ToolOutput, ToolResult,
};
