//! Agent Core: the agentic tool-calling conversation engine.
//!
//! Submodules:
//! - `executor`: Public entry points (`process`, `stream`), model resolution,
//!   engine cache, message preparation, capability gates
//! - `conversation`: Bounded INFER → EXTRACT → EXECUTE state machine
//! - `streaming`: Chunk-by-chunk hold/forward decisions for streamed output
//! - `tool_router`: Confirmation, retry, and error classification per tool call
//! - `types`: Task requests, hooks, attachments, iteration state
//! - `errors`: Agent-level error types

pub mod conversation;
pub mod errors;
pub mod executor;
pub mod streaming;
pub mod tool_router;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

// Re-exports for convenience
pub use conversation::{Conversation, DEFAULT_MAX_ITERATIONS};
pub use errors::AgentError;
pub use executor::{EngineFactory, TaskExecutor};
pub use streaming::{ChunkDecision, StreamAccumulator, StreamOutcome};
pub use tool_router::{default_error_check, BatchOutcome, RetryPolicy, ToolInvoker};
pub use types::{
    Attachments, ConfirmFn, Hooks, IterationState, PromptEnhancer, TaskRequest, ToolErrorCheck,
    ToolFilter, MAX_ITERATIONS_MESSAGE,
};
