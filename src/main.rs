use std::fs::File;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use bandwidth::config::{BandwidthConfig, LogFormat};
use bandwidth::throttle::parse_size;
use bandwidth::{CancelToken, ThrottleError, Throttled};

/// Copy INPUT to OUTPUT at a limited rate.
#[derive(Debug, Parser)]
#[command(name = "bandwidth", version, about)]
struct Args {
    /// Source file, or `-` for stdin
    input: String,

    /// Destination file, or `-` for stdout
    output: String,

    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bytes per window, e.g. `512K` or `10M`
    #[arg(short, long, value_parser = parse_size_arg)]
    limit: Option<u64>,

    /// Window duration in milliseconds
    #[arg(short, long)]
    window_ms: Option<u64>,

    /// Copy buffer size, e.g. `64K`
    #[arg(long, value_parser = parse_size_arg)]
    chunk_size: Option<u64>,

    /// Log output format
    #[arg(long, value_parser = ["text", "json"])]
    log_format: Option<String>,
}

fn parse_size_arg(s: &str) -> Result<u64, String> {
    parse_size(s).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => BandwidthConfig::from_file(path)?,
        None => BandwidthConfig::default(),
    };
    if let Some(limit) = args.limit {
        config.throttle.limit = limit;
    }
    if let Some(window_ms) = args.window_ms {
        config.throttle.window_ms = window_ms;
    }
    if let Some(chunk_size) = args.chunk_size {
        config.throttle.chunk_size = usize::try_from(chunk_size).context("chunk size too large")?;
    }
    if let Some(format) = args.log_format.as_deref() {
        config.logging.format = if format == "json" {
            LogFormat::Json
        } else {
            LogFormat::Text
        };
    }

    init_tracing(&config);

    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let quota = config.quota()?;
    info!(
        limit = quota.limit(),
        window = ?quota.window(),
        chunk_size = config.throttle.chunk_size,
        "Configuration loaded"
    );

    let input = open_input(&args.input)?;
    let output = open_output(&args.output)?;

    let cancel = CancelToken::new();
    let reader = Throttled::builder()
        .reader(input)
        .quota(quota)
        .cancel_token(cancel.clone())
        .build()?;

    let watcher = tokio::spawn(async move {
        shutdown_signal().await;
        cancel.cancel();
    });

    let chunk_size = config.throttle.chunk_size.max(1);
    let started = Instant::now();
    let (copied, result) =
        tokio::task::spawn_blocking(move || copy(reader, output, chunk_size)).await?;
    watcher.abort();

    let elapsed = started.elapsed();
    info!(
        bytes = copied,
        elapsed = ?elapsed,
        rate = %format_rate(copied, elapsed),
        "Copy finished"
    );

    match result {
        Ok(()) => Ok(()),
        Err(CopyError::Throttle(ThrottleError::Cancelled { .. })) => {
            warn!(bytes = copied, "Copy interrupted");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Initialize the tracing subscriber.
fn init_tracing(config: &BandwidthConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    // Logs go to stderr so that `-` can stream data on stdout.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(io::stderr);

    match config.logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

fn open_input(path: &str) -> anyhow::Result<Box<dyn Read + Send>> {
    if path == "-" {
        return Ok(Box::new(io::stdin()));
    }
    let file = File::open(path).with_context(|| format!("failed to open {}", path))?;
    Ok(Box::new(file))
}

fn open_output(path: &str) -> anyhow::Result<Box<dyn Write + Send>> {
    if path == "-" {
        return Ok(Box::new(io::stdout()));
    }
    let file = File::create(path).with_context(|| format!("failed to create {}", path))?;
    Ok(Box::new(file))
}

#[derive(Debug, thiserror::Error)]
enum CopyError {
    #[error(transparent)]
    Throttle(#[from] ThrottleError),
    #[error("write failed: {0}")]
    Write(#[from] io::Error),
}

/// Copy through the throttled reader until end of input.
///
/// Returns the bytes written, even when the copy stops early.
fn copy(
    mut reader: Throttled,
    mut output: Box<dyn Write + Send>,
    chunk_size: usize,
) -> (u64, Result<(), CopyError>) {
    let mut buf = vec![0u8; chunk_size];
    let mut copied = 0u64;

    loop {
        let (n, failure) = match reader.read(&mut buf) {
            Ok(n) => (n, None),
            Err(e) => (e.transferred(), Some(e)),
        };

        if let Err(e) = output.write_all(&buf[..n]) {
            return (copied, Err(e.into()));
        }
        copied += n as u64;

        if let Some(e) = failure {
            return (copied, Err(e.into()));
        }
        if n < buf.len() {
            break;
        }
    }

    (copied, output.flush().map_err(CopyError::from))
}

fn format_rate(bytes: u64, elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return "n/a".to_string();
    }
    format!("{:.1} B/s", bytes as f64 / secs)
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
            info!("Received Ctrl+C, cancelling copy");
        }
        _ = terminate => {
            info!("Received SIGTERM, cancelling copy");
        }
    }
}
