//! Throttle Uploadr - rate-limited single-file upload to object storage
//!
//! Prints the start time on launch and the elapsed time on success. Logs go
//! to stderr. The exit code tells which stage failed.

use anyhow::Context;
use clap::error::ErrorKind;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use throttle_uploadr::config::{Config, TransferRequest};
use throttle_uploadr::upload::{self, EXIT_USAGE};
use throttle_uploadr::{metrics, UploadError};
use tracing::info;

/// Upload a local file to object storage at a bounded rate, then delete it
#[derive(Parser, Debug)]
#[command(name = "throttle-uploadr")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Local file to upload; the path as given is appended to the key prefix
    local_file: String,

    /// Remote location: [scheme://]bucket/key/prefix
    remote_location: String,

    /// Upload rate in KiB/s [default: 125000]
    #[arg(short = 'u', long = "upload-kbps")]
    upload_kbps: Option<u64>,

    /// Overall timeout in seconds [default: 600]
    #[arg(short = 't', long = "timeout")]
    timeout: Option<u64>,

    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Storage endpoint URL
    #[arg(long)]
    endpoint: Option<String>,

    /// Storage region
    #[arg(long)]
    region: Option<String>,

    /// Log filter when RUST_LOG is unset (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Log output format
    #[arg(long, value_parser = ["pretty", "json"])]
    log_format: Option<String>,

    /// Write Prometheus metrics to this file when the run ends
    #[arg(long)]
    metrics_file: Option<PathBuf>,
}

/// File values over defaults, flags over file values
fn effective_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading config file {}", path.display()))?,
        None => Config::default(),
    };

    if let Some(upload_kbps) = args.upload_kbps {
        config.transfer.upload_kbps = upload_kbps;
    }
    if let Some(timeout) = args.timeout {
        config.transfer.timeout_seconds = timeout;
    }
    if let Some(endpoint) = &args.endpoint {
        config.storage.endpoint = Some(endpoint.clone());
    }
    if let Some(region) = &args.region {
        config.storage.region = region.clone();
    }
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if let Some(format) = &args.log_format {
        config.logging.format = format.clone();
    }
    if let Some(path) = &args.metrics_file {
        config.metrics.textfile = Some(path.clone());
    }

    config.validate()?;
    Ok(config)
}

fn prepare(args: &Args) -> anyhow::Result<(Config, TransferRequest)> {
    let config = effective_config(args)?;
    let request = TransferRequest::new(
        args.local_file.clone(),
        &args.remote_location,
        &config.transfer,
    )?;
    Ok((config, request))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::from(EXIT_USAGE),
            };
        }
    };

    let (config, request) = match prepare(&args) {
        Ok(prepared) => prepared,
        Err(e) => {
            eprintln!("throttle-uploadr: {:#}", e);
            return ExitCode::from(EXIT_USAGE);
        }
    };

    if let Err(e) = throttle_uploadr::tracing::init_subscriber(&config.logging) {
        eprintln!("throttle-uploadr: {}", e);
        return ExitCode::from(EXIT_USAGE);
    }

    let start = std::time::Instant::now();
    println!("{}", chrono::Local::now());

    info!(
        version = throttle_uploadr::VERSION,
        local_file = %request.local_path(),
        bucket = %request.bucket(),
        key = %request.object_key(),
        rate_bytes_per_sec = request.rate(),
        timeout_secs = request.timeout().as_secs(),
        "Starting upload"
    );

    let result = upload::run(&request, &config.storage).await;

    if let Some(path) = &config.metrics.textfile {
        if let Err(e) = metrics::write_textfile(path) {
            tracing::warn!(path = %path.display(), error = %e, "Failed to write metrics");
        }
    }

    match result {
        Ok(_) => {
            println!("{:?}", start.elapsed());
            ExitCode::SUCCESS
        }
        Err(e) => report_failure(&e),
    }
}

fn report_failure(err: &UploadError) -> ExitCode {
    eprintln!("throttle-uploadr: {}", err);
    ExitCode::from(err.exit_code())
}
