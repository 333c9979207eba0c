//! Tool providers: the collaborators that actually run tools.
//!
//! This module handles:
//! - The `ToolProvider` seam the conversation loop calls through
//! - Aggregating named `ToolServer`s and routing calls between them
//! - Qualified tool naming (`<provider>#<tool>`)
//! - In-process servers backed by async closures
//!
//! Remote protocols (MCP over stdio, HTTP, ...) plug in by implementing
//! `ToolServer`.

pub mod errors;
pub mod local;
pub mod provider;
pub mod registry;
pub mod types;

// Re-exports for convenience
pub use errors::ToolError;
pub use local::LocalToolServer;
pub use provider::{ToolProvider, ToolServer};
pub use registry::ToolRegistry;
pub use types::{ResultPart, ToolDescriptor};
