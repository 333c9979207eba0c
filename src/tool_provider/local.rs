//! In-process tool server backed by async closures.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;

use super::errors::ToolError;
use super::provider::ToolServer;
use super::types::{ResultPart, ToolDescriptor};

type ToolHandler =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Vec<ResultPart>, ToolError>> + Send + Sync>;

/// A `ToolServer` whose tools are Rust closures.
///
/// ```ignore
/// let time = LocalToolServer::new("time").with_tool(
///     ToolDescriptor::new("get_current_time", "Current UTC time"),
///     |_args| async { Ok(vec![ResultPart::text("12:00")]) },
/// );
/// ```
pub struct LocalToolServer {
    name: String,
    tools: Vec<(ToolDescriptor, ToolHandler)>,
}

impl LocalToolServer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tools: Vec::new(),
        }
    }

    /// Register a tool. A later registration with the same name replaces it.
    pub fn with_tool<F, Fut>(mut self, descriptor: ToolDescriptor, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<ResultPart>, ToolError>> + Send + 'static,
    {
        let handler: ToolHandler = Arc::new(move |args| Box::pin(handler(args)));
        self.tools.retain(|(d, _)| d.name != descriptor.name);
        self.tools.push((descriptor, handler));
        self
    }
}

#[async_trait]
impl ToolServer for LocalToolServer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolError> {
        Ok(self.tools.iter().map(|(d, _)| d.clone()).collect())
    }

    async fn call(&self, tool: &str, arguments: &Value) -> Result<Vec<ResultPart>, ToolError> {
        let handler = self
            .tools
            .iter()
            .find(|(d, _)| d.name == tool)
            .map(|(_, h)| Arc::clone(h))
            .ok_or_else(|| ToolError::UnknownTool {
                name: tool.to_string(),
            })?;
        handler(arguments.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_local_server_dispatches_by_name() {
        let server = LocalToolServer::new("math").with_tool(
            ToolDescriptor::new("add", "Add two numbers"),
            |args| async move {
                let sum = args["a"].as_i64().unwrap_or(0) + args["b"].as_i64().unwrap_or(0);
                Ok(vec![ResultPart::text(sum.to_string())])
            },
        );

        let parts = server.call("add", &json!({"a": 2, "b": 3})).await.unwrap();
        assert_eq!(parts, vec![ResultPart::text("5")]);
        assert_eq!(server.list_tools().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_local_server_unknown_tool() {
        let server = LocalToolServer::new("empty");
        let err = server.call("nope", &json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool { .. }));
    }

    #[tokio::test]
    async fn test_reregistering_replaces_tool() {
        let server = LocalToolServer::new("s")
            .with_tool(ToolDescriptor::new("t", "old"), |_| async {
                Ok(vec![ResultPart::text("old")])
            })
            .with_tool(ToolDescriptor::new("t", "new"), |_| async {
                Ok(vec![ResultPart::text("new")])
            });
        let tools = server.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].description, "new");
        let parts = server.call("t", &json!({})).await.unwrap();
        assert_eq!(parts[0].as_text(), Some("new"));
    }
}
