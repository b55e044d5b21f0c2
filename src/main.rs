use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use rustls::crypto::{ring, CryptoProvider};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use camstream::config;
use camstream::media::RtpStatsSink;
use camstream::{ConnectionState, SessionManager};

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// camstream command line arguments
#[derive(Parser, Debug)]
#[command(name = "camstream")]
#[command(version, about = "Live view for bridge-connected cameras", long_about = None)]
struct CliArgs {
    /// Camera name as known to the bridge
    #[arg(short = 'c', long, value_name = "NAME")]
    camera: String,

    /// Bridge base URL (overrides config and environment)
    #[arg(short = 'b', long, value_name = "URL")]
    bridge_url: Option<String>,

    /// Path to a JSON config file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    init_logging(args.log_level, args.verbose);

    // Install default crypto provider (required by rustls 0.23+)
    CryptoProvider::install_default(ring::default_provider())
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    tracing::info!("Starting camstream v{}", env!("CARGO_PKG_VERSION"));

    let mut config = config::load_config(args.config.as_deref()).await?;
    if let Some(url) = args.bridge_url {
        config.bridge.base_url = url;
        config::validate(&config)?;
    }
    tracing::info!("Bridge: {}", config.bridge.base_url);

    let manager = SessionManager::from_config(&config)?;
    let sink = Arc::new(RtpStatsSink::new());
    let session = manager.connect(&args.camera, sink.clone());
    let mut status = session.subscribe();

    let outcome = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received");
                break None;
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break None;
                }
                let current = status.borrow_and_update().clone();
                if current.state == ConnectionState::Failed {
                    break current.message;
                }
            }
        }
    };

    session.teardown().await;
    tracing::info!("Received {} tracks", sink.track_count());

    match outcome {
        Some(message) => Err(anyhow::anyhow!("Session failed: {}", message)),
        None => Ok(()),
    }
}

/// Initialize logging with tracing
fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "camstream=error,webrtc=error",
        LogLevel::Warn => "camstream=warn,webrtc=warn",
        LogLevel::Info => "camstream=info,webrtc=warn",
        LogLevel::Verbose => "camstream=debug,webrtc=warn",
        LogLevel::Debug => "camstream=debug,webrtc=info",
        LogLevel::Trace => "camstream=trace,webrtc=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}
