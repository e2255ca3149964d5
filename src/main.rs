use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use turnstile::clock::{Clock, SystemClock};
use turnstile::config::{LogFormat, LoggingSettings, StoreBackend, TurnstileConfig};
use turnstile::probe::{self, Decision};
use turnstile::{store, Limiter, StrategyKind};

/// Admission control against a shared counter store.
#[derive(Debug, Parser)]
#[command(name = "turnstile", version, about)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Strategy: token, fixed, log, leaky or moving
    #[arg(long, global = true)]
    strategy: Option<StrategyKind>,

    /// Events allowed per interval
    #[arg(long, global = true)]
    rate: Option<u64>,

    /// Window length in seconds
    #[arg(long, global = true)]
    interval: Option<u64>,

    /// Threshold for the token and leaky strategies
    #[arg(long, global = true)]
    burst: Option<u64>,

    /// Counter store backend: memory or redis
    #[arg(long, global = true)]
    store: Option<StoreBackend>,

    /// Redis server URL
    #[arg(long, global = true)]
    redis_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Make a single admission decision
    Check {
        /// Caller identity
        #[arg(long)]
        key: String,
    },
    /// Send a paced series of decisions and report the tally
    Probe {
        /// Caller identity
        #[arg(long)]
        key: String,

        /// Number of decisions to request
        #[arg(long, default_value_t = 10)]
        requests: u64,

        /// Delay between decisions in milliseconds
        #[arg(long, default_value_t = 100)]
        spacing_ms: u64,
    },
}

impl Cli {
    /// Apply command line overrides on top of the loaded configuration.
    fn apply_overrides(&self, config: &mut TurnstileConfig) {
        if let Some(strategy) = self.strategy {
            config.limiter.strategy = strategy;
        }
        if let Some(rate) = self.rate {
            config.limiter.rate = rate;
        }
        if let Some(interval) = self.interval {
            config.limiter.interval_secs = interval;
        }
        if let Some(burst) = self.burst {
            config.limiter.burst = Some(burst);
        }
        if let Some(backend) = self.store {
            config.store.backend = backend;
        }
        if let Some(ref url) = self.redis_url {
            config.store.redis_url = url.clone();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Validate once, after flags have had a chance to fix file or env values
    let mut config = TurnstileConfig::load(cli.config.as_deref())?;
    cli.apply_overrides(&mut config);
    config.validate()?;

    init_tracing(&config.logging);

    info!("Starting Turnstile");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    match cli.config {
        Some(ref path) => info!(path = %path.display(), "Loaded configuration"),
        None => info!("Loaded configuration from defaults and environment"),
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = store::connect(&config.store, clock.clone())?;
    let limiter = Arc::new(Limiter::from_settings(&config.limiter, store, clock)?);

    match cli.command {
        Command::Check { key } => {
            let task_limiter = limiter.clone();
            let allowed = tokio::task::spawn_blocking(move || task_limiter.allow(&key)).await?;
            let decision = Decision::from_allowed(allowed);
            println!("{}", decision);

            Ok(if decision.is_allowed() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Probe {
            key,
            requests,
            spacing_ms,
        } => {
            let summary = probe::run(
                limiter,
                &key,
                requests,
                Duration::from_millis(spacing_ms),
                shutdown_signal(),
            )
            .await;

            println!(
                "{} requests: {} allowed, {} rejected",
                summary.total(),
                summary.allowed,
                summary.denied
            );
            info!("Turnstile probe finished");
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Initialize tracing; `RUST_LOG` takes precedence over the configured level.
fn init_tracing(settings: &LoggingSettings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.level));

    match settings.format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_thread_ids(true)
            .init(),
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping probe");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping probe");
        }
    }
}
