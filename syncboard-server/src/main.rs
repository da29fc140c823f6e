//! SyncBoard server: hosts one shared board over WebSocket.
//!
//! Configured from `SYNCBOARD_*` environment variables (see
//! [`ServerConfig::from_env`]); log level via `RUST_LOG`.

use log::{error, info};
use std::process::ExitCode;
use syncboard_collab::server::{ServerConfig, SyncServer};

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    info!("Starting SyncBoard server...");
    let server = SyncServer::new(config);

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server error: {e}");
                return ExitCode::FAILURE;
            }
        }
        _ = tokio::signal::ctrl_c() => {
            let stats = server.stats().await;
            info!(
                "Shutting down after {} connections, {} snapshots ({} rejected)",
                stats.total_connections, stats.total_messages, stats.rejected_snapshots
            );
        }
    }
    ExitCode::SUCCESS
}
