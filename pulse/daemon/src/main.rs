//! Pulse Daemon - Headless Stream Runner
//!
//! Connects a [`StreamingService`] to a remote stream (or runs it on
//! synthetic data), logs status changes and classified failures, and reports
//! metrics until it is told to stop.
//!
//! # Usage
//!
//! ```bash
//! # Stream from a WebSocket endpoint
//! pulse-daemon --url wss://feed.example.com/stream
//!
//! # With fallbacks and offline mode
//! pulse-daemon --url wss://a.example.com --fallback-url wss://b.example.com --offline-mode
//!
//! # Synthetic data only
//! pulse-daemon --synthetic --scenario volatile
//!
//! # Metrics as JSON lines on stdout
//! pulse-daemon --url wss://feed.example.com/stream --metrics-json
//!
//! # Verbose logging
//! RUST_LOG=debug pulse-daemon --url wss://feed.example.com/stream
//! ```
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: Graceful shutdown
//! - `SIGHUP`: Log a diagnostics report

mod report;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

use pulse_core::{
    default_config_path, load_config_from_path, ConfigOverrides, StreamingConfig, StreamingService,
};

use report::Reporter;

/// Pulse Daemon - resilient time-series stream runner
#[derive(Parser, Debug)]
#[command(name = "pulse-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Primary stream URL
    #[arg(short = 'u', long, value_name = "URL")]
    url: Option<String>,

    /// Fallback stream URL (repeatable, tried in order)
    #[arg(short = 'f', long = "fallback-url", value_name = "URL")]
    fallback_urls: Vec<String>,

    /// Configuration file path
    #[arg(short = 'c', long, env = "PULSE_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Buffer capacity in samples
    #[arg(short = 'b', long, value_name = "N")]
    buffer_size: Option<usize>,

    /// Heartbeat interval in milliseconds
    #[arg(long, value_name = "MS")]
    heartbeat_interval_ms: Option<u64>,

    /// Connection timeout in milliseconds
    #[arg(long, value_name = "MS")]
    connect_timeout_ms: Option<u64>,

    /// Fall back to synthetic data while the stream is unavailable
    #[arg(long)]
    offline_mode: bool,

    /// Generate synthetic data instead of connecting
    #[arg(long)]
    synthetic: bool,

    /// Synthetic scenario (normal, volatile, trending, sparse, burst)
    #[arg(long, value_name = "NAME")]
    scenario: Option<String>,

    /// Print metrics as JSON lines on stdout
    #[arg(long)]
    metrics_json: bool,

    /// Stop after this many seconds
    #[arg(long, value_name = "SECS")]
    duration: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "PULSE_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if let Some(ref url) = self.url {
            overrides = overrides.with_url(url.clone());
        }
        if !self.fallback_urls.is_empty() {
            overrides = overrides.with_fallback_urls(self.fallback_urls.clone());
        }
        if let Some(size) = self.buffer_size {
            overrides = overrides.with_buffer_size(size);
        }
        if let Some(ms) = self.heartbeat_interval_ms {
            overrides = overrides.with_heartbeat_interval_ms(ms);
        }
        if let Some(ms) = self.connect_timeout_ms {
            overrides = overrides.with_connect_timeout_ms(ms);
        }
        if self.offline_mode {
            overrides = overrides.with_offline_mode(true);
        }
        overrides
    }
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("pulse_daemon={level},pulse_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Config file, then environment, then command line
fn build_config(args: &Args) -> Result<StreamingConfig> {
    let path = args.config.clone().or_else(default_config_path);
    let mut config = load_config_from_path(path.clone())
        .with_context(|| format!("Failed to load configuration from {path:?}"))?;
    args.overrides().apply(&mut config);

    if args.synthetic {
        config.validate().context("Invalid configuration")?;
    } else {
        config
            .validate_for_connect()
            .context("Invalid configuration (pass --url or --synthetic)")?;
    }
    Ok(config)
}

async fn wait_for_stop(service: &StreamingService, duration: Option<Duration>) -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
    let mut sighup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;

    let deadline = async {
        match duration {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM, initiating shutdown");
                return Ok(());
            }
            _ = sigint.recv() => {
                info!("Received SIGINT, initiating shutdown");
                return Ok(());
            }
            _ = sighup.recv() => {
                info!("Received SIGHUP, reporting diagnostics");
                report::log_diagnostics(service);
            }
            () = &mut deadline => {
                info!("Run duration elapsed");
                return Ok(());
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    info!("Pulse Daemon starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = build_config(&args)?;
    info!(
        urls = ?config.urls(),
        source = %config.source(),
        config_file = ?config.config_file_path,
        "Configuration loaded"
    );

    let service = StreamingService::websocket(config).context("Failed to create streaming service")?;
    let _reporter = Reporter::attach(&service, args.metrics_json);

    if let Some(ref name) = args.scenario {
        let scenario = service.change_scenario(name)?;
        info!(%scenario, "Synthetic scenario selected");
    }

    if args.synthetic {
        service.start_synthetic()?;
        info!("Synthetic generation started");
    } else {
        service.connect().await?;
    }

    let result = wait_for_stop(&service, args.duration.map(Duration::from_secs)).await;

    info!("Shutting down...");
    report::log_diagnostics(&service);
    service.shutdown().await;

    match result {
        Ok(()) => {
            info!("Pulse daemon stopped cleanly");
            Ok(())
        }
        Err(e) => {
            warn!(error = %e, "Pulse daemon stopped with error");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("pulse-daemon").chain(argv.iter().copied())).unwrap()
    }

    #[test]
    fn test_repeatable_fallbacks() {
        let args = parse(&[
            "--url",
            "ws://a",
            "--fallback-url",
            "ws://b",
            "-f",
            "ws://c",
        ]);
        assert_eq!(args.fallback_urls, vec!["ws://b", "ws://c"]);
        let overrides = args.overrides();
        assert_eq!(overrides.url.as_deref(), Some("ws://a"));
        assert_eq!(
            overrides.fallback_urls,
            Some(vec!["ws://b".to_string(), "ws://c".to_string()])
        );
        assert_eq!(overrides.enable_offline_mode, None);
    }

    #[test]
    fn test_cli_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[connection]\nurl = \"ws://from-file\"\n\n[buffer]\nbuffer_size = 10"
        )
        .unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let args = parse(&["--config", &path, "--buffer-size", "99", "--offline-mode"]);
        let config = build_config(&args).unwrap();

        assert_eq!(config.urls(), vec!["ws://from-file"]);
        assert_eq!(config.buffer.buffer_size, 99);
        assert!(config.behavior.enable_offline_mode);
    }

    #[test]
    fn test_synthetic_needs_no_url() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        let missing = missing.to_str().unwrap();

        let args = parse(&["--config", missing, "--synthetic"]);
        assert!(build_config(&args).is_ok());

        let args = parse(&["--config", missing]);
        let err = build_config(&args).unwrap_err();
        assert!(format!("{err:#}").contains("--url"));
    }

    #[test]
    fn test_zero_buffer_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        let args = parse(&[
            "--config",
            missing.to_str().unwrap(),
            "--url",
            "ws://a",
            "--buffer-size",
            "0",
        ]);
        assert!(build_config(&args).is_err());
    }
}
