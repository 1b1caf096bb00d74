//! Contract node binary
//!
//! Reads one JSON envelope per line from stdin, runs it against the ledger
//! and writes one JSON response per line to stdout. Logs go to stderr.

use anyhow::Context;
use contracts::{Dispatcher, Envelope, Error, Response};
use ledger_core::{Config, Ledger};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").map(|f| f == "json").unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    // Load configuration
    let config = match std::env::args().nth(1) {
        Some(path) => {
            info!(path = %path, "Loading config from file");
            Config::from_file(&path).with_context(|| format!("failed to load {}", path))?
        }
        None => {
            info!("Loading config from environment variables");
            Config::from_env().context("invalid environment configuration")?
        }
    };

    info!(
        service = %config.service_name,
        backend = ?config.backend,
        data_dir = ?config.data_dir,
        "Starting contract node"
    );

    let ledger = Ledger::open(config).await.context("failed to open ledger")?;
    let dispatcher = Dispatcher::new(ledger.clone());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read stdin")?,
            _ = signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        };

        let Some(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Envelope>(&line) {
            Ok(envelope) => dispatcher.handle(envelope).await,
            Err(e) => {
                warn!(error = %e, "Malformed envelope");
                Response::failure(None, &Error::Validation(format!("malformed envelope: {}", e)))
            }
        };

        let mut out = serde_json::to_vec(&response)?;
        out.push(b'\n');
        stdout.write_all(&out).await?;
        stdout.flush().await?;
    }

    info!("Shutting down contract node");
    ledger.shutdown().await?;
    Ok(())
}
