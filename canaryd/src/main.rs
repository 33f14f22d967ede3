#![forbid(unsafe_code)]

//! canaryd: plants decoy credential files and monitors them for access.
//!
//! Any interaction with a decoy is, by construction, unauthorized, so every
//! detection is logged as a structured security alert. The daemon runs in the
//! foreground until interrupted; companion subcommands manage the decoy
//! inventory and inspect the alert log.

mod tokens;

use anyhow::{bail, Context, Result};
use canaryd_lib::alerting::{AlertLog, DesktopNotifier, NoopNotifier, Notifier};
use canaryd_lib::config::{Config, ConfigLoader};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokens::TokenGenerator;
use tracing::{error, info};
use watcher_core::{
    NotifyBackend, PathRegistry, RegistryHandle, RestartPolicy, Supervisor, WatcherConfig,
};

/// Alerts log file name under the configured log directory.
const ALERTS_FILE: &str = "alerts.log";

#[derive(Parser)]
#[command(
    name = "canaryd",
    version,
    about = "Canary credential monitor: plants decoy secrets and alerts on access"
)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Plant decoys if needed and monitor them until interrupted (default)
    Run,
    /// Generate the decoy credential files and manifest
    Generate,
    /// Remove generated decoys and the manifest
    Clean,
    /// Show the decoy inventory and alert counters
    Status,
    /// Print alerts from the recent past as JSON
    Export {
        /// How far back to export, in hours
        #[arg(long, default_value_t = 24)]
        hours: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let loader = cli
        .config
        .clone()
        .map_or_else(ConfigLoader::new, ConfigLoader::with_file);
    let config = loader.load().context("loading configuration")?;
    init_tracing(&config);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Generate => generate(&config),
        Command::Clean => clean(&config),
        Command::Status => status(&config),
        Command::Export { hours } => export(&config, hours),
    }
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(config: Config) -> Result<()> {
    let generator = TokenGenerator::new(config.tokens.clone());
    let manifest = if generator.manifest_path().exists() {
        generator.load_manifest()?
    } else {
        info!("no token manifest found, planting decoys");
        generator.generate_all()?
    };
    let decoys = manifest.decoys();
    if decoys.is_empty() {
        bail!("no decoy tokens to monitor; enable at least one category and run `canaryd generate`");
    }

    let registry = RegistryHandle::new(
        PathRegistry::new(decoys).context("registering decoy paths")?,
    );
    let sink = Arc::new(
        AlertLog::open(
            config.alerting.log_dir.join(ALERTS_FILE),
            config.alerting.backup_queue_capacity,
        )
        .context("opening alerts log")?,
    );
    let notifier: Arc<dyn Notifier> = if config.alerting.desktop_notifications {
        Arc::new(DesktopNotifier::default())
    } else {
        Arc::new(NoopNotifier)
    };

    let mut watcher_config = WatcherConfig::new(config.tokens.root.clone());
    watcher_config.coalesce_window = Duration::from_millis(config.monitor.coalesce_window_ms);
    watcher_config.heartbeat = Duration::from_secs(config.monitor.heartbeat_seconds);

    let policy = RestartPolicy {
        max_attempts: config.monitor.max_restart_attempts,
        initial_backoff: Duration::from_millis(config.monitor.restart_backoff_ms),
        ..RestartPolicy::default()
    };

    let supervisor = Supervisor::new(
        watcher_config,
        policy,
        registry,
        Arc::clone(&sink),
        notifier,
        Box::new(|| Box::new(NotifyBackend::new())),
    );
    supervisor.start().await.context("starting monitor")?;
    info!(
        root = %config.tokens.root.display(),
        tokens = manifest.entries.len(),
        "canaryd monitoring started"
    );

    let outcome = tokio::select! {
        () = shutdown_signal() => {
            info!("shutdown requested");
            supervisor.stop().await;
            Ok(())
        }
        // join is cancel-safe, so losing this race leaves the supervision
        // task attached for stop() to tear down.
        result = supervisor.join() => result,
    };

    let summary = sink.summary();
    info!(
        total = summary.total,
        high = summary.high,
        medium = summary.medium,
        low = summary.low,
        "monitoring session ended"
    );
    if summary.dropped > 0 {
        error!(
            dropped = summary.dropped,
            "alerts were dropped while the log storage was unwritable"
        );
    }
    outcome.context("monitoring terminated abnormally")
}

/// Resolves when SIGINT or SIGTERM arrives.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn generate(config: &Config) -> Result<()> {
    let generator = TokenGenerator::new(config.tokens.clone());
    let manifest = generator.generate_all()?;
    println!(
        "Planted {} decoy tokens under {}",
        manifest.entries.len(),
        config.tokens.root.display()
    );
    for entry in &manifest.entries {
        println!("  [{}] {}", entry.category, entry.path.display());
    }
    Ok(())
}

fn clean(config: &Config) -> Result<()> {
    let generator = TokenGenerator::new(config.tokens.clone());
    let removed = generator.clean()?;
    println!("Removed {removed} decoy tokens");
    Ok(())
}

fn status(config: &Config) -> Result<()> {
    let generator = TokenGenerator::new(config.tokens.clone());
    let entries = if generator.manifest_path().exists() {
        generator.load_manifest()?.entries
    } else {
        Vec::new()
    };

    println!("Token root:  {}", config.tokens.root.display());
    println!("Tokens:      {}", entries.len());
    for entry in &entries {
        let present = if entry.path.exists() { "ok" } else { "MISSING" };
        println!("  [{}] {} ({present})", entry.category, entry.path.display());
    }

    let log_path = config.alerting.log_dir.join(ALERTS_FILE);
    let sink = AlertLog::open(&log_path, config.alerting.backup_queue_capacity)
        .context("opening alerts log")?;
    let summary = sink.summary();
    println!("Alerts log:  {}", log_path.display());
    println!(
        "Alerts:      {} total ({} high / {} medium / {} low)",
        summary.total, summary.high, summary.medium, summary.low
    );
    if summary.dropped > 0 {
        println!("Dropped:     {} (log storage was unwritable)", summary.dropped);
    }
    Ok(())
}

fn export(config: &Config, hours: u64) -> Result<()> {
    let log_path = config.alerting.log_dir.join(ALERTS_FILE);
    let sink = AlertLog::open(&log_path, config.alerting.backup_queue_capacity)
        .context("opening alerts log")?;

    let since = chrono::Utc::now().timestamp() as f64 - (hours * 3600) as f64;
    let alerts = sink.export(since).context("reading alerts log")?;
    println!("{}", serde_json::to_string_pretty(&alerts)?);
    Ok(())
}
