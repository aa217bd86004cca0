// SPDX-License-Identifier: MIT

//! corral — a stdio MCP server that spawns, supervises, and reports on
//! coding-agent CLI subprocesses (spec §1).
//!
//! Entry point only: argument parsing, logging setup, and wiring together
//! `corral-storage`, `corral-config`, `corral-manager`, `corral-version`, and
//! `corral-server`. Grounded on `cli/src/main.rs`'s `clap::Parser` derive
//! and `daemon/src/main.rs::setup_logging`'s tracing-appender/EnvFilter
//! setup, with the rolling file writer swapped for stderr because stdout
//! carries the RPC wire.

use anyhow::{Context, Result};
use clap::Parser;
use corral_config::Config;
use corral_manager::{AgentManager, ManagerOptions};
use corral_storage::{
    clean_shutdown_marker_present, clear_clean_shutdown_marker, mark_clean_shutdown,
    resolve_base_dir_in, Layout,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

const PACKAGE_NAME: &str = "corral";

#[derive(Parser)]
#[command(name = "corral", version, about = "Agent orchestrator: spawns and supervises coding-agent CLIs over stdio MCP")]
struct Cli {
    /// Base directory for agent state, overriding the default ~/.agents resolution.
    #[arg(long, value_name = "DIR")]
    base_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = setup_logging();

    let base_dir = match &cli.base_dir {
        Some(dir) => dir.clone(),
        None => resolve_base_dir_in(std::env::var_os("HOME").map(PathBuf::from))
            .context("no writable base directory for agent state")?,
    };
    info!(base_dir = %base_dir.display(), "resolved agent state directory");
    let layout = Layout::new(base_dir);

    if !clean_shutdown_marker_present(&layout) {
        warn!("previous run did not shut down cleanly; re-validating running agents against live PIDs");
    }
    clear_clean_shutdown_marker(&layout).context("failed to clear clean-shutdown marker")?;

    let config: Config = corral_config::load_or_init(&layout.config_path())
        .context("failed to load or initialize config.json")?;
    let options = manager_options();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    let manager = Arc::new(AgentManager::new(layout, config, options));
    let exit = runtime.block_on(run(manager.clone()));

    mark_clean_shutdown(manager.layout()).context("failed to write clean-shutdown marker")?;
    exit
}

async fn run(manager: Arc<AgentManager>) -> Result<()> {
    manager.initialize(chrono::Utc::now());
    corral_server::run_main(manager, PACKAGE_NAME.to_string(), env!("CARGO_PKG_VERSION").to_string())
        .await
        .context("rpc server exited with an error")?;
    Ok(())
}

/// `ManagerOptions` overridden by the ralph-mode environment variables
/// (spec §6: `AGENTS_MCP_RALPH_FILE`, `AGENTS_MCP_DISABLE_RALPH`).
fn manager_options() -> ManagerOptions {
    let mut options = ManagerOptions::default();
    if let Ok(file) = std::env::var("AGENTS_MCP_RALPH_FILE") {
        if !file.is_empty() {
            options.ralph_file = file;
        }
    }
    if let Ok(flag) = std::env::var("AGENTS_MCP_DISABLE_RALPH") {
        if is_truthy(&flag) {
            options.ralph_enabled = false;
        }
    }
    options
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Installs a global `tracing` subscriber writing to stderr (spec §4.7:
/// stdout is reserved for the RPC wire). Mirrors
/// `daemon/src/main.rs::setup_logging`, swapped from a rolling file
/// appender to a non-blocking stderr writer.
fn setup_logging() -> tracing_appender::non_blocking::WorkerGuard {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let (non_blocking, guard) = tracing_appender::non_blocking(std::io::stderr());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking))
        .init();

    guard
}
