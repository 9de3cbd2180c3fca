//! MCP server binary for the agent mesh

use agentmesh_mcp::{MeshServer, ServerConfig};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("Starting Agentmesh MCP Server");

    let config = ServerConfig::from_env()?;
    let server = MeshServer::new(config);

    match server.serve_stdio().await {
        Ok(_) => {
            info!("Mesh server shutdown gracefully");
            Ok(())
        }
        Err(e) => {
            error!("Mesh server error: {}", e);
            Err(e.into())
        }
    }
}
