//! Line chat server - Entry Point
//!
//! Loads configuration, binds the listener, and serves until Ctrl-C.

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use line_chat_server::{ChatServer, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=line_chat_server=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("line_chat_server=info")),
        )
        .init();

    info!("Chat server starting!");

    let config = ServerConfig::from_env()?;
    let addr = config.bind_addr();

    let server = match ChatServer::bind(config).await {
        Ok(server) => server,
        Err(e) => {
            error!("Error when listening on {}: {}", addr, e);
            return Err(e.into());
        }
    };
    info!("Chat server listening on {}", server.local_addr()?);

    server.run_until_ctrl_c().await?;

    info!("Chat server stopped");
    Ok(())
}
