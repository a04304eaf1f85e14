use std::fs;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use clap::Parser;
use log::{error, info, warn, LevelFilter};
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

use rust_s3upload::cli::{Args, Commands};
use rust_s3upload::cloud::client::create_s3_client;
use rust_s3upload::cloud::s3::S3Backend;
use rust_s3upload::config::{load_config, UploadConfig};
use rust_s3upload::models::{ProgressFn, UploadSummary};
use rust_s3upload::security::{safe_error_message, scrub_secret};
use rust_s3upload::upload::{upload, UploadSource};

fn main() -> Result<()> {
    // Parse arguments
    let args = Args::parse();

    // Initialize logging
    initialize_logging(args.verbose)?;

    // Handle subcommands
    if let Some(cmd) = &args.command {
        return handle_subcommand(cmd);
    }

    let config = load_and_merge_config(&args)?;

    let runtime = Runtime::new().context("Failed to create Tokio runtime")?;
    match runtime.block_on(run_upload(&args, &config)) {
        Ok(summary) => {
            info!(
                "Uploaded {} bytes to s3://{}/{} in {} parts ({} ms)",
                summary.bytes,
                args.bucket.as_deref().unwrap_or_default(),
                summary.key,
                summary.parts,
                summary.elapsed_ms
            );
            write_summary(&args, &summary)
        }
        Err(e) => {
            let mut message = safe_error_message("Upload failed", &format!("{:#}", e));
            if let Some(secret) = &args.aws_secret {
                message = scrub_secret(&message, secret);
            }
            error!("{}", message);
            std::process::exit(1);
        }
    }
}

/// Initialize logging with the specified verbosity level
fn initialize_logging(verbose: bool) -> Result<()> {
    let log_level = if verbose { LevelFilter::Debug } else { LevelFilter::Info };
    TermLogger::init(
        log_level,
        Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    ).context("Failed to initialize logger")?;
    Ok(())
}

fn handle_subcommand(cmd: &Commands) -> Result<()> {
    match cmd {
        Commands::InitConfig { path } => {
            info!("Creating default configuration file at {}", path.display());
            UploadConfig::default().save_to_yaml_file(path)
        }
    }
}

/// Defaults, then the config file, then the environment, then flags
fn load_and_merge_config(args: &Args) -> Result<UploadConfig> {
    let mut config = load_config(args.config.as_deref())?;

    if let Some(threads) = args.threads {
        config.threads = threads;
    }
    if let Some(chunk_size_mb) = args.chunk_size_mb {
        config.chunk_size_mb = chunk_size_mb;
    }
    if args.no_overwrite {
        config.overwrite = false;
    }
    if args.no_progress {
        config.progress = false;
    }
    if args.region.is_some() {
        config.region = args.region.clone();
    }
    if args.endpoint.is_some() {
        config.endpoint = args.endpoint.clone();
    }
    if args.profile.is_some() {
        config.profile = args.profile.clone();
    }

    Ok(config)
}

async fn run_upload(args: &Args, config: &UploadConfig) -> Result<UploadSummary> {
    let bucket = args.bucket.as_deref().ok_or_else(|| anyhow!("--bucket is required"))?;
    let key = args.key.as_deref().ok_or_else(|| anyhow!("--key is required"))?;

    let client_config = config.to_client_config(args.aws_key.clone(), args.aws_secret.clone());
    let client = create_s3_client(&client_config)?;
    let backend = Arc::new(S3Backend::new(client, bucket));

    let source = open_source(args).await?;

    let cancel = CancellationToken::new();
    let mut options = config.to_options().with_cancel(cancel.clone());
    if config.progress {
        let progress: ProgressFn = Arc::new(|part_number, uploaded, total| {
            println!("{} {} {}", part_number, uploaded, total);
        });
        options = options.with_progress(progress);
    }

    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling upload");
            interrupt.cancel();
        }
    });

    info!("Uploading to s3://{}/{} with {} threads", bucket, key, options.threads);
    let summary = upload(backend, source, key, options).await?;
    Ok(summary)
}

/// `--data`, then `--file`, then stdin
async fn open_source(args: &Args) -> Result<UploadSource> {
    if let Some(data) = &args.data {
        return Ok(UploadSource::fragments(vec![Bytes::from(data.clone())]));
    }

    if let Some(path) = &args.file {
        let file = tokio::fs::File::open(path)
            .await
            .context(format!("Failed to open {}", path.display()))?;
        return Ok(UploadSource::reader(file));
    }

    info!("Reading upload data from stdin");
    Ok(UploadSource::reader(tokio::io::stdin()))
}

fn write_summary(args: &Args, summary: &UploadSummary) -> Result<()> {
    if let Some(path) = &args.summary {
        let json = serde_json::to_string_pretty(summary)
            .context("Failed to serialize upload summary")?;
        fs::write(path, json)
            .context(format!("Failed to write summary to {}", path.display()))?;
        info!("Wrote upload summary to {}", path.display());
    }
    Ok(())
}
