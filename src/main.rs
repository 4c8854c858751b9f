// src/main.rs

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use fetchd::logging;
use fetchd::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "fetchd", version, about = "Download a URL into a target directory")]
struct Cli {
    /// TOML config file.
    #[arg(long, default_value = "fetchd.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Report a URL's size and the configured cap without downloading it.
    Validate { url: String },
    /// Download a URL into a target, printing progress until it finishes.
    Fetch {
        #[arg(long)]
        target: String,
        url: String,
        /// Seconds between progress lines.
        #[arg(long, default_value_t = 1)]
        interval: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_logging();
    let cli = Cli::parse();

    let config = FetchConfig::load_or_default(Some(&cli.config))?;
    let manager = Arc::new(
        DownloadManager::from_config(&config)
            .await
            .context("could not set up the download manager")?,
    );

    match cli.command {
        Command::Validate { url } => {
            let probe = manager.validate("cli", &url).await?;
            println!("size: {} bytes", probe.size_bytes);
            println!("max size: {} bytes", probe.max_size_bytes);
            if probe.exceeds_cap() {
                bail!("file is larger than the allowed maximum");
            }
        }
        Command::Fetch {
            target,
            url,
            interval,
        } => fetch(manager, &target, &url, Duration::from_secs(interval.max(1))).await?,
    }
    Ok(())
}

async fn fetch(manager: Arc<DownloadManager>, target: &str, url: &str, interval: Duration) -> Result<()> {
    let started = manager.start(target, url).await?;
    println!("job {} started ({} bytes)", started.job_id, started.size_bytes);

    let waiter = {
        let manager = manager.clone();
        let target = target.to_string();
        tokio::spawn(async move { manager.join(&target).await })
    };
    tokio::pin!(waiter);

    let mut ticker = tokio::time::interval(interval);
    let status = loop {
        tokio::select! {
            joined = &mut waiter => break joined.context("download task panicked")?,
            _ = tokio::signal::ctrl_c() => {
                println!("cancelling...");
                manager.cancel(target, &started.job_id).await;
                break Some(JobStatus::Cancelled);
            }
            _ = ticker.tick() => {
                if let Some(job) = manager.progress(target, &started.job_id).await? {
                    if job.total_size_bytes > 0 {
                        println!(
                            "[PROGRESS] {:.2}% ({}/{} bytes)",
                            job.progress_percent, job.downloaded_bytes, job.total_size_bytes
                        );
                    } else {
                        println!("[PROGRESS] {} bytes", job.downloaded_bytes);
                    }
                }
            }
        }
    };

    match status {
        Some(JobStatus::Completed) => println!("done"),
        Some(JobStatus::Cancelled) => println!("cancelled"),
        _ => {
            let reason = manager
                .progress(target, &started.job_id)
                .await?
                .and_then(|job| job.error_message)
                .unwrap_or_else(|| "unknown error".to_string());
            bail!("download failed: {reason}");
        }
    }
    Ok(())
}
