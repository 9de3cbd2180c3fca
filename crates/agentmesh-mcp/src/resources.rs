//! MCP resources exposing mesh state as readable documents

use crate::error::{McpError, Result};
use agentmesh_core::{meeting::default_protocol, PresenceRegistry};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

/// URI of the live presence snapshot
pub const PRESENCE_URI: &str = "mesh://presence";

/// URI of the canonical meeting protocol
pub const DEFAULT_PROTOCOL_URI: &str = "mesh://meetings/default-protocol";

/// Readable mesh resources
pub struct MeshResources {
    registry: Arc<PresenceRegistry>,
}

impl MeshResources {
    /// Create the resource handlers
    pub fn new(registry: Arc<PresenceRegistry>) -> Self {
        Self { registry }
    }

    /// Descriptors for every exposed resource
    pub fn list(&self) -> Vec<Value> {
        vec![
            json!({
                "uri": PRESENCE_URI,
                "name": "Mesh presence",
                "description": "Snapshot of currently-connected agents",
                "mimeType": "application/json",
            }),
            json!({
                "uri": DEFAULT_PROTOCOL_URI,
                "name": "Default meeting protocol",
                "description": "The canonical five-phase protocol substituted when a meeting supplies none",
                "mimeType": "application/json",
            }),
        ]
    }

    /// Read one resource by URI
    pub async fn read(&self, uri: &str) -> Result<Value> {
        debug!("Reading resource {}", uri);
        match uri {
            PRESENCE_URI => {
                let mut agents = self.registry.list_presence().await;
                agents.sort_by(|a, b| a.session_id.cmp(&b.session_id));
                Ok(json!({
                    "uri": uri,
                    "total_online": agents.len(),
                    "agents": agents,
                }))
            }
            DEFAULT_PROTOCOL_URI => Ok(json!({
                "uri": uri,
                "phases": default_protocol(),
            })),
            other => Err(McpError::InvalidParams(format!(
                "unknown resource: {}",
                other
            ))),
        }
    }
}
