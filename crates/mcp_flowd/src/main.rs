use std::process::ExitCode;

use mcp_flowd::{Settings, Supervisor};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = Settings::from_env();
    let supervisor = match Supervisor::new(settings) {
        Ok(supervisor) => supervisor,
        Err(error) => {
            error!(%error, "failed to initialise supervisor");
            return ExitCode::FAILURE;
        }
    };
    info!(boot_id = %supervisor.boot_id(), "mcp-flowd started");

    supervisor.start_auto_flows().await;

    if let Err(error) = tokio::signal::ctrl_c().await {
        error!(%error, "failed to wait for shutdown signal");
    }
    info!("shutting down");
    supervisor.shutdown().await;
    ExitCode::SUCCESS
}
