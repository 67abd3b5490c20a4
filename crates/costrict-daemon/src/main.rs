//! `costrict-keeperd` — standalone daemon binary for the costrict keeper.
//!
//! A thin entry point: parse boot flags, bootstrap the managers, bind
//! the RPC server, spawn the supervisor's background loops, and wait for
//! a shutdown signal.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use costrict_core::{CostrictDir, ProcessLister};
use costrict_daemon::logging::{setup_logging, LogConfig, LogFormat};
use costrict_daemon::{bootstrap, server};
use tracing::info;

/// costrict keeper daemon — local endpoint supervisor.
#[derive(Parser)]
#[command(name = "costrict-keeperd")]
#[command(author, version, about = "costrict keeper daemon")]
struct Args {
    /// Override `$COSTRICT_HOME` / the OS default home directory.
    #[arg(long)]
    base_dir: Option<PathBuf>,

    /// Override `costrict.json`'s `listenAddress`.
    #[arg(long)]
    listen: Option<String>,

    /// Enable verbose (debug-level) logging.
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines instead of compact text.
    #[arg(long)]
    json_logs: bool,
}

/// A process lister with no real enumeration capability, used wherever
/// `ProcFsLister` (Linux-only) isn't available. The stray-process sweep
/// and excessive-process detector degrade to no-ops rather than failing
/// to start.
#[derive(Debug, Default)]
struct NullLister;

impl ProcessLister for NullLister {
    fn list_by_name(&self, _name: &str) -> Vec<costrict_core::OsProcess> {
        Vec::new()
    }
    fn name_of(&self, _pid: u32) -> Option<String> {
        None
    }
}

#[cfg(target_os = "linux")]
fn lister() -> Arc<dyn ProcessLister> {
    Arc::new(costrict_core::process_lister::ProcFsLister::new())
}

#[cfg(not(target_os = "linux"))]
fn lister() -> Arc<dyn ProcessLister> {
    Arc::new(NullLister)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    let format = if args.json_logs { LogFormat::Json } else { LogFormat::Compact };
    let log_config = LogConfig::new(level).with_format(format);
    if let Err(e) = setup_logging(&log_config) {
        eprintln!("failed to initialize logging: {e}");
    }

    let dir_override = args.base_dir.map(CostrictDir::from_path);
    let app = bootstrap::assemble(dir_override, lister()).await?;

    let listen_address = args.listen.clone().unwrap_or_else(|| app.app_config.listen_address.clone());
    let (handle, addr) = server::start(&listen_address, &app).await?;
    info!(%addr, "costrict-keeperd listening");

    app.supervisor.start_all_service().await?;

    let monitoring_handle = app.supervisor.start_monitoring();
    let metrics_handle = app.supervisor.start_report_metrics();
    let log_reporting_handle = app.supervisor.start_log_reporting();
    let midnight_handle = app.supervisor.start_midnight_rooster();

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    monitoring_handle.abort();
    midnight_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }
    if let Some(h) = log_reporting_handle {
        h.abort();
    }

    app.supervisor.stop_all_service().await?;

    handle.stop()?;
    handle.stopped().await;

    info!("costrict-keeperd stopped");
    Ok(())
}
