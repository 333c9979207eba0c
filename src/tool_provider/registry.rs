//! Tool registry: aggregates tool servers behind one `ToolProvider`.
//!
//! Provides:
//! - Qualified naming (`<provider>#<tool>`) when more than one server exists
//! - Routing of bare names to the sole, default, or unique owning server
//! - A per-call timeout

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::errors::ToolError;
use super::provider::{ToolProvider, ToolServer};
use super::types::{ResultPart, ToolDescriptor};

/// Default per-call timeout.
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

// ─── ToolRegistry ────────────────────────────────────────────────────────────

/// Registered tool servers, in registration order.
pub struct ToolRegistry {
    servers: Vec<Arc<dyn ToolServer>>,
    default_server: Option<String>,
    call_timeout: Duration,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            servers: Vec::new(),
            default_server: None,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Add a server. A server with the same name is replaced.
    pub fn register(&mut self, server: Arc<dyn ToolServer>) {
        self.servers.retain(|s| s.name() != server.name());
        tracing::info!(server = %server.name(), "registered tool server");
        self.servers.push(server);
    }

    pub fn with_server(mut self, server: impl ToolServer + 'static) -> Self {
        self.register(Arc::new(server));
        self
    }

    /// Server used for bare tool names when several servers are registered.
    pub fn with_default_server(mut self, name: impl Into<String>) -> Self {
        self.default_server = Some(name.into());
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn server_names(&self) -> Vec<&str> {
        self.servers.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Whether tool names must carry their provider.
    fn qualifies_names(&self) -> bool {
        self.servers.len() > 1
    }

    fn server(&self, name: &str) -> Result<&Arc<dyn ToolServer>, ToolError> {
        self.servers
            .iter()
            .find(|s| s.name() == name)
            .ok_or_else(|| ToolError::UnknownProvider {
                name: name.to_string(),
            })
    }

    /// Pick the server for a bare tool name.
    async fn route_bare(&self, tool: &str) -> Result<&Arc<dyn ToolServer>, ToolError> {
        match self.servers.as_slice() {
            [] => return Err(ToolError::NoProviders),
            [only] => return Ok(only),
            _ => {}
        }

        if let Some(default) = &self.default_server {
            return self.server(default);
        }

        let mut owners = Vec::new();
        for server in &self.servers {
            let tools = server.list_tools().await?;
            if tools.iter().any(|t| t.name == tool) {
                owners.push(server);
            }
        }

        match owners.as_slice() {
            [] => Err(ToolError::UnknownTool {
                name: tool.to_string(),
            }),
            [owner] => Ok(*owner),
            _ => Err(ToolError::AmbiguousTool {
                name: tool.to_string(),
                providers: owners.iter().map(|s| s.name().to_string()).collect(),
            }),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolProvider for ToolRegistry {
    async fn list_tools(&self, provider: Option<&str>) -> Result<Vec<ToolDescriptor>, ToolError> {
        let servers: Vec<&Arc<dyn ToolServer>> = match provider {
            Some(name) => vec![self.server(name)?],
            None => self.servers.iter().collect(),
        };

        let mut tools = Vec::new();
        for server in servers {
            for tool in server.list_tools().await? {
                tools.push(if self.qualifies_names() {
                    tool.qualified(server.name())
                } else {
                    tool
                });
            }
        }

        tracing::debug!(count = tools.len(), provider = ?provider, "listed tools");
        Ok(tools)
    }

    async fn call(
        &self,
        provider: Option<&str>,
        tool: &str,
        arguments: &Value,
    ) -> Result<Vec<ResultPart>, ToolError> {
        let server = match provider {
            Some(name) => self.server(name)?,
            None => self.route_bare(tool).await?,
        };

        tracing::info!(server = %server.name(), tool = %tool, "calling tool");

        tokio::time::timeout(self.call_timeout, server.call(tool, arguments))
            .await
            .map_err(|_| ToolError::Timeout {
                tool: tool.to_string(),
                timeout_ms: self.call_timeout.as_millis() as u64,
            })?
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool_provider::LocalToolServer;
    use serde_json::json;

    fn server(name: &'static str, tools: &[&'static str]) -> LocalToolServer {
        let mut server = LocalToolServer::new(name);
        for &tool in tools {
            server = server.with_tool(ToolDescriptor::new(tool, "test tool"), move |_| async move {
                Ok(vec![ResultPart::text(format!("{name}:{tool}"))])
            });
        }
        server
    }

    #[tokio::test]
    async fn test_single_server_names_stay_bare() {
        let registry = ToolRegistry::new().with_server(server("time", &["get_current_time"]));
        let tools = registry.list_tools(None).await.unwrap();
        assert_eq!(tools[0].name, "get_current_time");

        let parts = registry
            .call(None, "get_current_time", &json!({}))
            .await
            .unwrap();
        assert_eq!(parts[0].as_text(), Some("time:get_current_time"));
    }

    #[tokio::test]
    async fn test_multiple_servers_qualify_names() {
        let registry = ToolRegistry::new()
            .with_server(server("time", &["now"]))
            .with_server(server("fs", &["list"]));
        let names: Vec<String> = registry
            .list_tools(None)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["time#now", "fs#list"]);

        let only_fs = registry.list_tools(Some("fs")).await.unwrap();
        assert_eq!(only_fs.len(), 1);
    }

    #[tokio::test]
    async fn test_bare_name_routes_to_unique_owner() {
        let registry = ToolRegistry::new()
            .with_server(server("time", &["now"]))
            .with_server(server("fs", &["list"]));
        let parts = registry.call(None, "list", &json!({})).await.unwrap();
        assert_eq!(parts[0].as_text(), Some("fs:list"));

        let err = registry.call(None, "missing", &json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool { .. }));
    }

    #[tokio::test]
    async fn test_ambiguous_bare_name() {
        let registry = ToolRegistry::new()
            .with_server(server("a", &["search"]))
            .with_server(server("b", &["search"]));
        let err = registry.call(None, "search", &json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::AmbiguousTool { ref providers, .. } if providers.len() == 2));
        assert!(err.to_string().contains("a, b"));

        let registry = registry.with_default_server("b");
        let parts = registry.call(None, "search", &json!({})).await.unwrap();
        assert_eq!(parts[0].as_text(), Some("b:search"));
    }

    #[tokio::test]
    async fn test_unknown_provider_and_empty_registry() {
        let registry = ToolRegistry::new();
        assert!(matches!(
            registry.call(None, "x", &json!({})).await,
            Err(ToolError::NoProviders)
        ));
        assert!(matches!(
            registry.call(Some("nope"), "x", &json!({})).await,
            Err(ToolError::UnknownProvider { .. })
        ));
    }

    #[tokio::test]
    async fn test_call_timeout() {
        let slow = LocalToolServer::new("slow").with_tool(
            ToolDescriptor::new("wait", "sleeps"),
            |_| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(vec![])
            },
        );
        let registry = ToolRegistry::new()
            .with_server(slow)
            .with_call_timeout(Duration::from_millis(20));
        let err = registry.call(None, "wait", &json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::Timeout { timeout_ms: 20, .. }));
    }
}
