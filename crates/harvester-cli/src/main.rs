/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Harvester daemon entry point.
//!
//! Configuration comes from the environment (see the `harvester` crate's
//! `config` module); standard output carries the batches, standard error
//! the diagnostics. Exits zero only on signal-driven shutdown.

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use harvester::{BatchLoop, Config, PgSource, Shutdown, TokenSigner};

/// Notification-driven token batching agent
#[derive(Parser)]
#[command(name = "harvester")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    // Standard output is the data channel; all diagnostics go to stderr.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config = Config::from_env().context("configuration error")?;
    let signer = TokenSigner::new(&config.key);

    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());

    let source = PgSource::new(&config, signer, std::io::stdout());
    let mut batcher = BatchLoop::new(source, shutdown, &config);

    info!(
        channel = %config.channel,
        queue = %config.queue,
        batch_limit = config.batch_limit,
        "starting batch loop"
    );
    let result = batcher.run().await;

    // Tear down before reporting: dropping the loop closes the database
    // handle and scrubs the signer's keyed state; dropping the
    // configuration wipes the raw key bytes.
    drop(batcher);
    drop(config);

    result.context("batch loop failed")?;
    info!("shut down cleanly");
    Ok(())
}

fn spawn_signal_handler(shutdown: Shutdown) {
    tokio::spawn(async move {
        wait_for_signal().await;
        warn!("signal received, shutting down");
        shutdown.trigger();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            warn!("cannot install SIGTERM handler: {e}");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
