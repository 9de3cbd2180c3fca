//! MCP server wiring and stdio serve loop

use crate::{
    error::{McpError, Result},
    protocol::{JsonRpcRequest, JsonRpcResponse, ProtocolHandler, PARSE_ERROR},
    resources::MeshResources,
    tools::MeshTools,
};
use agentmesh_core::{
    GuardRules, InMemoryMessageStore, InMemorySessionStore, MessageStore, PresenceRegistry,
    RegistryConfig, ResponseGuard, SessionStore,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// MCP server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Server name
    pub name: String,
    /// Server version
    pub version: String,
    /// Server description
    pub description: String,
    /// Seconds between stale-connection sweep ticks
    pub sweep_interval_secs: u64,
    /// Heartbeat age beyond which a connection is considered stale
    pub stale_after_secs: i64,
    /// Seconds between response-guard history cleanups
    pub guard_cleanup_interval_secs: u64,
    /// Response guard limits applied per sender
    pub guard_rules: GuardRules,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: crate::SERVER_NAME.to_string(),
            version: crate::SERVER_VERSION.to_string(),
            description: crate::SERVER_DESCRIPTION.to_string(),
            sweep_interval_secs: 30,
            stale_after_secs: 60,
            guard_cleanup_interval_secs: 300,
            guard_rules: GuardRules::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(name) = std::env::var("AGENTMESH_MCP_NAME") {
            config.name = name;
        }
        if let Ok(val) = std::env::var("AGENTMESH_SWEEP_INTERVAL_SECS") {
            config.sweep_interval_secs = val
                .parse()
                .map_err(|e| McpError::InvalidParams(format!("Invalid sweep interval: {}", e)))?;
        }
        if let Ok(val) = std::env::var("AGENTMESH_STALE_AFTER_SECS") {
            config.stale_after_secs = val
                .parse()
                .map_err(|e| McpError::InvalidParams(format!("Invalid staleness threshold: {}", e)))?;
        }
        if let Ok(val) = std::env::var("AGENTMESH_GUARD_CLEANUP_SECS") {
            config.guard_cleanup_interval_secs = val
                .parse()
                .map_err(|e| McpError::InvalidParams(format!("Invalid cleanup interval: {}", e)))?;
        }
        if let Ok(val) = std::env::var("AGENTMESH_MAX_RESPONSES_PER_HOUR") {
            config.guard_rules.max_responses_per_hour = val
                .parse()
                .map_err(|e| McpError::InvalidParams(format!("Invalid hourly limit: {}", e)))?;
        }
        if let Ok(val) = std::env::var("AGENTMESH_COOLDOWN_SECS") {
            config.guard_rules.cooldown_between_responses = val
                .parse()
                .map_err(|e| McpError::InvalidParams(format!("Invalid cooldown: {}", e)))?;
        }
        if let Ok(val) = std::env::var("AGENTMESH_DUPLICATE_THRESHOLD") {
            config.guard_rules.duplicate_content_threshold = val
                .parse()
                .map_err(|e| McpError::InvalidParams(format!("Invalid duplicate threshold: {}", e)))?;
        }

        Ok(config)
    }
}

/// MCP server implementation
pub struct MeshServer {
    config: ServerConfig,
    registry: Arc<PresenceRegistry>,
    guard: Arc<ResponseGuard>,
    tools: Arc<MeshTools>,
    protocol_handler: Arc<ProtocolHandler>,
}

impl MeshServer {
    /// Create a server backed by in-memory stores
    pub fn new(config: ServerConfig) -> Self {
        Self::with_stores(
            config,
            Arc::new(InMemorySessionStore::new()),
            Arc::new(InMemoryMessageStore::new()),
        )
    }

    /// Create a server with externally-provided durable stores
    pub fn with_stores(
        config: ServerConfig,
        sessions: Arc<dyn SessionStore>,
        messages: Arc<dyn MessageStore>,
    ) -> Self {
        let registry = Arc::new(PresenceRegistry::new(RegistryConfig {
            sweep_interval_secs: config.sweep_interval_secs,
            stale_after_secs: config.stale_after_secs,
        }));
        let guard = Arc::new(ResponseGuard::new(config.guard_rules.clone()));

        let tools = Arc::new(MeshTools::new(
            Arc::clone(&registry),
            Arc::clone(&guard),
            sessions,
            messages,
        ));
        let resources = Arc::new(MeshResources::new(Arc::clone(&registry)));
        let protocol_handler = Arc::new(ProtocolHandler::new(Arc::clone(&tools), resources));

        Self {
            config,
            registry,
            guard,
            tools,
            protocol_handler,
        }
    }

    /// The presence registry backing this server
    pub fn registry(&self) -> Arc<PresenceRegistry> {
        Arc::clone(&self.registry)
    }

    /// The tool handlers backing this server
    pub fn tools(&self) -> Arc<MeshTools> {
        Arc::clone(&self.tools)
    }

    /// Handle a JSON-RPC request
    pub async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        self.protocol_handler.handle_request(request).await
    }

    /// Serve over stdio transport
    pub async fn serve_stdio(self) -> Result<()> {
        info!("Starting {} on stdio transport", self.config.name);

        self.registry.start();

        // Guard history cleanup runs on its own timer, independent from the
        // registry's stale-connection sweep
        let cleanup = {
            let guard = Arc::clone(&self.guard);
            let period = std::time::Duration::from_secs(self.config.guard_cleanup_interval_secs);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    guard.cleanup_old_data();
                }
            })
        };

        let stdin = tokio::io::stdin();
        let stdout = tokio::io::stdout();
        let mut reader = tokio::io::BufReader::new(stdin);
        let mut writer = tokio::io::BufWriter::new(stdout);

        info!("Mesh server ready, accepting JSON-RPC requests");

        loop {
            use tokio::io::AsyncBufReadExt;
            let mut line = String::new();
            if reader
                .read_line(&mut line)
                .await
                .map_err(|e| McpError::Transport(format!("Read error: {}", e)))?
                == 0
            {
                break; // EOF
            }
            if line.trim().is_empty() {
                continue;
            }

            let response = match serde_json::from_str::<JsonRpcRequest>(&line) {
                Ok(request) => self.handle_request(request).await,
                Err(e) => {
                    debug!("Undecodable request line: {}", e);
                    JsonRpcResponse::error(None, PARSE_ERROR, "Parse error", None)
                }
            };

            use tokio::io::AsyncWriteExt;
            let response_json = serde_json::to_string(&response)
                .map_err(|e| McpError::Transport(format!("Serialize error: {}", e)))?;
            writer
                .write_all(response_json.as_bytes())
                .await
                .map_err(|e| McpError::Transport(format!("Write error: {}", e)))?;
            writer
                .write_all(b"\n")
                .await
                .map_err(|e| McpError::Transport(format!("Write error: {}", e)))?;
            writer
                .flush()
                .await
                .map_err(|e| McpError::Transport(format!("Flush error: {}", e)))?;
        }

        cleanup.abort();
        self.registry.stop();
        info!("Mesh server shutting down");
        Ok(())
    }
}
