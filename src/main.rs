use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};
use watchdogd::config::{AppConfig, DEFAULT_CONFIG_PATH};
use watchdogd::context::AppContext;
use watchdogd::core::{
    BroadcastSink, PingProber, StatusEvent, StatusSink, Supervisor, TracingSink, probe,
};
use watchdogd::logging::{self, LogConfig};

/// Events a slow stdout reader may fall behind by before losing some
const EVENT_BUFFER: usize = 256;

#[derive(Parser)]
#[command(name = "watchdogd")]
#[command(about = "Watches a folder and pushes new files to a networked device", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file, created with defaults if missing
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the file and reachability watchers until interrupted
    Daemon(DaemonArgs),
    /// Check a device address once and exit
    Probe(ProbeArgs),
    /// Print the effective configuration
    Config,
}

#[derive(Args, Serialize)]
struct DaemonArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    ip: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    folder_path: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    api_endpoint: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    api_port: Option<u16>,

    #[serde(skip)]
    #[arg(long)]
    verbose: bool,

    #[serde(skip)]
    #[arg(long)]
    json_logs: bool,

    /// Stream status events to stdout as JSON lines, for a UI to consume
    #[serde(skip)]
    #[arg(long)]
    events: bool,
}

#[derive(Args)]
struct ProbeArgs {
    address: String,

    #[arg(long, default_value_t = 1000)]
    timeout_ms: u64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Daemon(args) => run_daemon(&cli.config, args)
            .await
            .context("Daemon failed")?,
        Commands::Probe(args) => run_probe(args).await?,
        Commands::Config => show_config(&cli.config).context("Failed to load configuration")?,
    }

    Ok(())
}

async fn run_daemon(path: &Path, args: &DaemonArgs) -> Result<()> {
    logging::init(LogConfig {
        json: args.json_logs,
        verbose: args.verbose,
    });

    let config = AppConfig::load_or_create(path, Some(args))?;
    if let Err(e) = config.device.validate() {
        warn!(error = %e, "Device settings incomplete, watchers will idle until fixed");
    }
    info!(
        config = %path.display(),
        ip = %config.device.ip,
        folder = %config.device.folder_path,
        "watchdogd starting"
    );

    let grace = config.watch.shutdown_grace();
    let sink: Arc<dyn StatusSink> = if args.events {
        let events = BroadcastSink::new(EVENT_BUFFER);
        tokio::spawn(print_events(events.subscribe()));
        Arc::new(events)
    } else {
        Arc::new(TracingSink)
    };
    let ctx = AppContext::with_defaults(config, sink).context("Failed to build HTTP client")?;

    let mut supervisor = Supervisor::new(ctx.clone());
    supervisor.start()?;

    wait_for_shutdown(path, args, &ctx).await?;

    let report = supervisor.shutdown(grace).await;
    if !report.is_clean() {
        warn!(forced = ?report.forced, "Some watchers had to be aborted");
    }

    Ok(())
}

async fn print_events(mut rx: broadcast::Receiver<StatusEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!(error = %e, "Failed to encode status event"),
            },
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Status event stream lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

#[cfg(unix)]
async fn wait_for_shutdown(path: &Path, args: &DaemonArgs, ctx: &AppContext) -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received");
                break;
            }
            _ = terminate.recv() => {
                info!("SIGTERM received");
                break;
            }
            _ = hangup.recv() => {
                // Rejections are already reported to the sink
                let _ = ctx.reload(path, Some(args)).await;
            }
        }
    }

    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown(_path: &Path, _args: &DaemonArgs, _ctx: &AppContext) -> Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("Interrupt received");
    Ok(())
}

async fn run_probe(args: &ProbeArgs) -> Result<()> {
    let timeout = Duration::from_millis(args.timeout_ms);
    let state = probe::check(&PingProber, &args.address, timeout).await;

    println!("address:   {}", args.address);
    println!("valid:     {}", state.address_valid);
    println!("reachable: {}", state.reachable);

    if !state.is_ready() {
        std::process::exit(1);
    }
    Ok(())
}

fn show_config(path: &Path) -> Result<()> {
    let config = AppConfig::load(path, None::<&AppConfig>)?;
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}
