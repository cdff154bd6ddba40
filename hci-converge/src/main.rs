//! hci-converge: one-shot reconciliation of a single HCI resource.
//!
//! Reads a parameter document (JSON or YAML), converges the resource it
//! names, and prints the result as JSON on stdout. Logs go to stderr.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::AsyncReadExt;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hci_converge::ModuleParams;
use hci_converge::host;

/// Converge one VM, image, volume or network toward its declared state
#[derive(Parser, Debug)]
#[command(name = "hci-converge", version, about)]
struct Args {
    /// Parameter file, or `-` to read from stdin
    #[arg(long, default_value = "-")]
    params: PathBuf,

    /// Report what would change without mutating anything
    #[arg(long)]
    check: bool,

    /// Seconds between status polls (overrides the parameter file)
    #[arg(long)]
    poll_interval: Option<u64>,

    /// Maximum status polls per wait (overrides the parameter file)
    #[arg(long)]
    poll_attempts: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hci_converge=info,reqwest=warn,hyper=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let mut params = read_params(&args.params).await?;

    if args.check {
        params.set_check_mode(true);
    }
    let connection = params.connection_mut();
    if let Some(interval) = args.poll_interval {
        connection.poll_interval = Some(interval);
    }
    if let Some(attempts) = args.poll_attempts {
        connection.poll_attempts = Some(attempts);
    }

    let result = host::execute(params).await;
    info!(changed = result.changed, failed = result.failed, "Invocation finished");

    println!(
        "{}",
        serde_json::to_string_pretty(&result).context("Failed to render result")?
    );
    Ok(if result.failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

async fn read_params(path: &Path) -> Result<ModuleParams> {
    let raw = if path.as_os_str() == "-" {
        let mut buf = String::new();
        tokio::io::stdin()
            .read_to_string(&mut buf)
            .await
            .context("Failed to read parameters from stdin")?;
        buf
    } else {
        tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?
    };

    // JSON is a subset of YAML, so one parser covers both.
    serde_yaml::from_str(&raw).context("Invalid parameter document")
}
