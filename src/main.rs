use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::info;

use silent_pro_dashboard::config::Config;
use silent_pro_dashboard::monitoring;
use silent_pro_dashboard::report::ReportService;
use silent_pro_dashboard::server::{self, AppState};
use silent_pro_dashboard::sp_api::SpApiClient;

#[tokio::main]
async fn main() -> Result<()> {
    // Load local .env if present (no-op in prod envs)
    let _ = dotenvy::dotenv();

    monitoring::init_tracing();

    let cfg = Config::from_env()?;
    info!(?cfg, "boot");

    let client = Arc::new(SpApiClient::new(cfg.sp_api.clone()));
    let reports = ReportService::new(client, &cfg);
    let state = Arc::new(AppState::new(reports, &cfg.static_dir));

    let addr = cfg.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(
        %addr,
        zone = %cfg.calendar.zone(),
        day_start_hour = cfg.calendar.boundary_hour(),
        "server.listen"
    );

    axum::serve(listener, server::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server.stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "ctrl_c handler failed");
    }
}
