//! sentinel-engine: real-time market surveillance service.
//!
//! Usage:
//!   sentinel-engine [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>          Config file path (default: config/sentinel.toml)
//!   --min-trade <USD>            Override the large-trade floor
//!   --min-severity <SEVERITY>    LOW | MEDIUM | HIGH | CRITICAL

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::{broadcast, RwLock};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use sentinel_common::{Notifier, Severity, StdoutNotifier, WebhookNotifier};
use sentinel_discover::{
    DiscoveryPipeline, HttpEmbeddingClient, HttpLlmClient, LeaderMonitor, OpportunityState,
};
use sentinel_engine::alert_store::AlertStore;
use sentinel_engine::config::SentinelConfig;
use sentinel_engine::health;
use sentinel_engine::orchestrator::Orchestrator;
use sentinel_engine::state::EngineState;
use sentinel_market::MarketsClient;

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "sentinel-engine")]
#[command(about = "Real-time smart-money surveillance for prediction markets")]
#[command(version)]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "config/sentinel.toml")]
    config: PathBuf,

    /// Minimum USD size for the large-trade detector
    #[arg(long)]
    min_trade: Option<u64>,

    /// Minimum severity for emitted anomalies
    #[arg(long)]
    min_severity: Option<Severity>,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        if !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
        {
            eprintln!("Warning: failed to load .env file: {}", e);
        }
    }

    let args = Args::parse();

    let mut config = if args.config.exists() {
        SentinelConfig::from_file(&args.config)
            .with_context(|| format!("Failed to load config from {:?}", args.config))?
    } else {
        SentinelConfig::default()
    };
    config.apply_env_overrides();
    config.apply_cli_overrides(args.min_trade, args.min_severity);

    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set global tracing subscriber")?;

    info!("Starting sentinel-engine");
    config.validate().context("Configuration validation failed")?;

    // Notifier: webhook when configured, stdout otherwise.
    let notifier: Arc<dyn Notifier> = match &config.webhook_url {
        Some(url) => {
            info!("Alerts will be delivered via webhook");
            Arc::new(WebhookNotifier::new(url.clone()).context("Failed to build webhook notifier")?)
        }
        None => {
            warn!("No webhook configured; alerts will be logged to stdout");
            Arc::new(StdoutNotifier)
        }
    };

    let markets_client =
        MarketsClient::new(config.markets.clone()).context("Failed to build markets client")?;
    let engine_state = Arc::new(EngineState::new());
    let alert_store = Arc::new(RwLock::new(AlertStore::load_or_new(
        config.alert_store.clone(),
    )));

    // Shutdown fan-out: signal handler -> every long-lived task.
    let (shutdown_tx, _) = broadcast::channel::<()>(4);
    spawn_signal_handler(shutdown_tx.clone());

    if config.health.enabled {
        let engine_state = engine_state.clone();
        let alert_store = alert_store.clone();
        let port = config.health.port;
        tokio::spawn(async move {
            if let Err(e) = health::serve(port, engine_state, alert_store).await {
                error!("Health endpoint failed to bind: {}", e);
            }
        });
    }

    spawn_slow_path(&config, markets_client.clone(), notifier.clone(), shutdown_tx.subscribe())?;

    // The trade path runs in the foreground until shutdown.
    let mut orchestrator = Orchestrator::new(
        &config,
        markets_client,
        notifier,
        alert_store,
        engine_state,
    );
    orchestrator
        .run(shutdown_tx.subscribe())
        .await
        .context("Orchestrator failed")?;

    info!("sentinel-engine stopped");
    Ok(())
}

/// SIGINT/SIGTERM -> broadcast shutdown.
fn spawn_signal_handler(shutdown_tx: broadcast::Sender<()>) {
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown().await {
            error!("Shutdown signal handler error: {}", e);
        }
        info!("Requesting shutdown...");
        let _ = shutdown_tx.send(());
    });
}

/// The slow path: discovery scans and leader-monitor ticks share one task,
/// which keeps the opportunity state single-writer.
fn spawn_slow_path(
    config: &SentinelConfig,
    markets_client: MarketsClient,
    notifier: Arc<dyn Notifier>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let pipeline = DiscoveryPipeline::new(config.discovery.clone());
    let monitor = LeaderMonitor::new(config.monitor.clone());
    let embedder =
        HttpEmbeddingClient::new(config.embed.clone()).context("Failed to build embedding client")?;
    let llm = HttpLlmClient::new(config.llm.clone()).context("Failed to build LLM client")?;
    let state_path = config.state_path.clone();

    let scan_interval =
        std::time::Duration::from_millis(config.discovery.rescan_interval_ms.max(1000) as u64);
    let monitor_interval =
        std::time::Duration::from_millis(config.monitor.check_interval_ms.max(1000) as u64);

    tokio::spawn(async move {
        let mut state = OpportunityState::load_or_create(state_path);

        // First scan on startup, then on the slow cadence.
        let mut scan_timer = tokio::time::interval(scan_interval);
        let mut monitor_timer = tokio::time::interval(monitor_interval);
        monitor_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        scan_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The monitor's immediate first tick is skipped; the scan's is kept.
        monitor_timer.tick().await;

        loop {
            tokio::select! {
                _ = scan_timer.tick() => {
                    match pipeline
                        .run_scan(&markets_client, &embedder, &llm, &mut state, notifier.as_ref())
                        .await
                    {
                        Ok(report) => {
                            if report.used_topic_fallback {
                                warn!("Discovery scan used rule-based topic fallback");
                            }
                        }
                        Err(e) => error!("Discovery scan failed: {}", e),
                    }
                }
                _ = monitor_timer.tick() => {
                    if let Err(e) = monitor
                        .run_once(&markets_client, &mut state, notifier.as_ref())
                        .await
                    {
                        error!("Leader monitor tick failed: {}", e);
                    }
                }
                _ = shutdown.recv() => {
                    info!("Slow path: shutdown signal received");
                    if let Err(e) = state.save() {
                        error!("Final opportunity state save failed: {}", e);
                    }
                    return;
                }
            }
        }
    });

    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }
    }

    #[cfg(windows)]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
