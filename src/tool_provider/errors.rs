//! Tool provider error types.

use thiserror::Error;

/// Errors raised while listing or calling tools.
///
/// A raised error is retried by the invocation layer. A tool that ran and
/// reported a failure returns an error `ResultPart` instead.
#[derive(Debug, Error)]
pub enum ToolError {
    /// No tool servers are registered.
    #[error("no tool providers configured")]
    NoProviders,

    /// The requested provider does not exist.
    #[error("unknown tool provider: '{name}'")]
    UnknownProvider {
        name: String,
    },

    /// Tool not found on the selected provider(s).
    #[error("unknown tool: '{name}'")]
    UnknownTool {
        name: String,
    },

    /// A bare tool name matched more than one provider.
    #[error("tool '{name}' is offered by several providers ({}); qualify it as <provider>#{name}", providers.join(", "))]
    AmbiguousTool {
        name: String,
        providers: Vec<String>,
    },

    /// The call reached the provider but did not complete.
    #[error("tool call '{tool}' failed: {reason}")]
    CallFailed {
        tool: String,
        reason: String,
    },

    /// A tool call timed out.
    #[error("tool call '{tool}' timed out after {timeout_ms}ms")]
    Timeout {
        tool: String,
        timeout_ms: u64,
    },

    /// The provider exists but cannot serve requests right now.
    #[error("tool provider '{name}' unavailable: {reason}")]
    ProviderUnavailable {
        name: String,
        reason: String,
    },
}
