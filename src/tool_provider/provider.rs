//! Provider traits.

use async_trait::async_trait;
use serde_json::Value;

use super::errors::ToolError;
use super::types::{ResultPart, ToolDescriptor};

/// The aggregated tool collaborator the conversation loop talks to.
///
/// `provider` selects a server by name; `None` means "route by tool name".
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// Tools visible to the model, named as the model should call them.
    async fn list_tools(&self, provider: Option<&str>) -> Result<Vec<ToolDescriptor>, ToolError>;

    /// Run one tool. `Err` means the call did not complete and may be
    /// retried; a tool-reported failure comes back as an error part.
    async fn call(
        &self,
        provider: Option<&str>,
        tool: &str,
        arguments: &Value,
    ) -> Result<Vec<ResultPart>, ToolError>;
}

/// One named source of tools.
#[async_trait]
pub trait ToolServer: Send + Sync {
    fn name(&self) -> &str;

    /// Tools under their bare names.
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolError>;

    async fn call(&self, tool: &str, arguments: &Value) -> Result<Vec<ResultPart>, ToolError>;
}
