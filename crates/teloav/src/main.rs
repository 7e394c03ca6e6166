//! TelOAV discovery service
//!
//! Reads a Telegraf configuration, discovers the variables of every OPC UA
//! endpoint it names and writes the configuration back out with `nodes`
//! filled in. Runs once or every `POLLING_INTERVAL` seconds until SIGINT or
//! SIGTERM.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use teloav::client::{Connector, MemoryConnector};
use teloav::report;
use teloav::{CycleSnapshot, Scheduler, ServiceConfig, ShutdownSignal};
use teloav_logging::LogConfig;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "teloav-discovery",
    version,
    about = "Discover OPC UA variables and keep Telegraf input nodes up to date"
)]
struct Cli {
    /// Settings file (.toml or .json); environment variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run a single cycle regardless of POLLING_INTERVAL
    #[arg(long)]
    once: bool,

    /// Enable verbose logging on stderr
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Do not print the per-cycle report
    #[arg(long)]
    no_dashboard: bool,

    /// Serve endpoints from an address space snapshot instead of the network
    #[arg(long, env = "TELOAV_ADDRESS_SPACE")]
    address_space: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let dashboard = !cli.no_dashboard && std::io::stdout().is_terminal();

    let recent_logs = match teloav_logging::init_logging(LogConfig {
        app_name: "teloav-discovery",
        verbose: cli.verbose,
        tui_mode: dashboard,
    }) {
        Ok(logs) => Some(logs),
        Err(e) => {
            eprintln!("Warning: failed to initialize logging: {:#}", e);
            None
        }
    };

    match run(cli, dashboard, recent_logs) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::from(1)
        }
    }
}

fn run(cli: Cli, dashboard: bool, recent_logs: Option<teloav_logging::RecentLogs>) -> Result<()> {
    let mut config = ServiceConfig::load(cli.config.as_deref()).context("Failed to load settings")?;
    if cli.once {
        config.polling_interval = -1;
    }
    info!(
        ingest = %config.ingest_path().display(),
        egress = %config.egress_path().display(),
        polling_interval = config.polling_interval,
        "Starting TelOAV discovery"
    );

    let shutdown = install_shutdown_handlers()?;
    let connector = build_connector(&cli, &config)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    let mut scheduler = Scheduler::new(config, connector, shutdown);
    if let Some(logs) = recent_logs {
        scheduler = scheduler.with_recent_logs(logs);
    }

    let mut observer = |snapshot: CycleSnapshot| {
        if dashboard {
            // Clear the screen and home the cursor before redrawing.
            print!("\x1b[2J\x1b[H");
            println!("{}", report::render_snapshot(&snapshot, chrono::Utc::now(), true));
        } else {
            info!(
                cycle = snapshot.cycle,
                endpoints = snapshot.results.len(),
                nodes = snapshot.total_nodes(),
                "Cycle complete"
            );
        }
    };

    runtime.block_on(scheduler.run(&mut observer));
    Ok(())
}

/// SIGINT/SIGTERM (Ctrl-C on Windows) set the shared shutdown flag.
fn install_shutdown_handlers() -> Result<ShutdownSignal> {
    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_handler = shutdown_flag.clone();

    #[cfg(unix)]
    {
        use signal_hook::consts::{SIGINT, SIGTERM};
        use signal_hook::iterator::Signals;

        let mut signals =
            Signals::new([SIGINT, SIGTERM]).context("Failed to install signal handlers")?;
        std::thread::spawn(move || {
            if let Some(sig) = signals.forever().next() {
                info!("Received signal {}, initiating shutdown...", sig);
                shutdown_flag_handler.store(true, Ordering::SeqCst);
            }
        });
    }

    #[cfg(windows)]
    {
        ctrlc::set_handler(move || {
            info!("Received Ctrl+C, initiating shutdown...");
            shutdown_flag_handler.store(true, Ordering::SeqCst);
        })
        .context("Failed to install Ctrl+C handler")?;
    }

    Ok(ShutdownSignal::from_flag(shutdown_flag))
}

/// Snapshot-backed connector when `--address-space` is given, otherwise the
/// OPC UA transport if it was compiled in.
fn build_connector(cli: &Cli, config: &ServiceConfig) -> Result<Box<dyn Connector>> {
    if let Some(path) = &cli.address_space {
        let connector = MemoryConnector::load_snapshot(path)
            .with_context(|| format!("Failed to load address space snapshot {}", path.display()))?;
        info!(snapshot = %path.display(), "Using address space snapshot");
        return Ok(Box::new(connector));
    }
    opcua_connector(config)
}

#[cfg(feature = "opcua")]
fn opcua_connector(config: &ServiceConfig) -> Result<Box<dyn Connector>> {
    Ok(Box::new(teloav::client::OpcUaConnector::new(
        "teloav-discovery",
        config.request_timeout(),
    )))
}

#[cfg(not(feature = "opcua"))]
fn opcua_connector(_config: &ServiceConfig) -> Result<Box<dyn Connector>> {
    anyhow::bail!(
        "No OPC UA transport in this build: rebuild with `--features opcua` \
         or pass --address-space <snapshot.json>"
    )
}
