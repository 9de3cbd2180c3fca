//! # Agentmesh MCP Server
//!
//! JSON-RPC server exposing the multi-agent mesh to connected agents:
//! - Broadcasting thoughts, queries and responses across the mesh
//! - Direct messages to specific online sessions
//! - Presence discovery ("who is online")
//! - Convening structured meetings with phase-based protocols
//! - Catch-up retrieval of messages missed while disconnected

pub mod error;
pub mod protocol;
pub mod resources;
pub mod server;
pub mod tools;

pub use error::{McpError, Result};
pub use protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, ProtocolHandler};
pub use resources::MeshResources;
pub use server::{MeshServer, ServerConfig};
pub use tools::MeshTools;

/// MCP server metadata
pub const SERVER_NAME: &str = "agentmesh-mcp";
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const SERVER_DESCRIPTION: &str = "Real-time mesh messaging for cooperating AI agents";
