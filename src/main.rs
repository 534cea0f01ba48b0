use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use scanpod::config::Config;
use scanpod::nmap::NmapTool;
use scanpod::orchestrator::ScanOrchestrator;
use scanpod::scanner::ScanExecutor;
use scanpod::server::{self, AppState};
use scanpod::store::JobStore;
use scanpod::logging;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::parse();
    logging::init_logging(&cfg.log_level, cfg.log_file.as_deref())?;

    tracing::info!(
        bind = %cfg.bind,
        scan_timeout_s = cfg.scan_timeout,
        max_scan_workers = cfg.max_scan_workers,
        nmap = %cfg.nmap_path,
        "starting scanpod"
    );
    if cfg.api_key == "changeme" {
        tracing::warn!("using the default API key; set SCANPOD_API_KEY");
    }

    let store = JobStore::new();
    let executor = ScanExecutor::start(
        store.clone(),
        Arc::new(NmapTool::new(cfg.nmap_path.clone())),
        cfg.executor_settings(),
    );
    let orchestrator = ScanOrchestrator::new(store, executor.clone());
    let state = AppState::new(orchestrator, cfg.api_key.as_str());

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
        tracing::info!("shutdown requested");
    };
    let served = server::serve(&cfg.bind, state, shutdown).await;

    // In-flight scans may run up to the scan timeout; a second Ctrl-C stops waiting.
    let second_ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    if !executor.shutdown_until(second_ctrl_c).await {
        tracing::warn!("second Ctrl-C, exiting without waiting for running scans");
    }
    served
}
