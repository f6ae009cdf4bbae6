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

//! The size-and-time batching state machine.

use std::convert::Infallible;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::TokenSource;
use crate::database::{ConnectError, DequeueError, Intake, Wait};
use crate::shutdown::Shutdown;
use crate::Config;

/// Pause between reconnect attempts.
const RECONNECT_INTERVAL: Duration = Duration::from_secs(3);

/// Terminal failures that end the loop (and the process).
#[derive(Debug, Error)]
pub enum RunError {
    /// The initial connect failed. Startup does not retry; the supervisor
    /// restarts the process.
    #[error("startup connect failed: {0}")]
    Connect(#[from] ConnectError),

    /// A non-transient dequeue failure (schema drift, lost output pipe).
    #[error("unrecoverable dequeue failure: {0}")]
    Dequeue(#[from] DequeueError),
}

/// Why a connection session ended.
enum Interrupt {
    /// The connection is suspect; close it and connect again.
    Reconnect,
    /// The running flag was cleared.
    Stop,
    /// Terminal failure.
    Fail(RunError),
}

/// The notification-counting batch loop.
///
/// One instance drives one [`TokenSource`] until shutdown or a terminal
/// failure. All state lives on this struct; there is no shared mutable
/// state beyond the [`Shutdown`] flag.
pub struct BatchLoop<S> {
    source: S,
    shutdown: Shutdown,
    batch_limit: i64,
    batch_timeout: Duration,
    healthcheck_interval: Duration,
    reconnect_interval: Duration,
    /// Unprocessed notifications observed since the last flush.
    counter: i64,
    /// Stamped on the 0-to-1 counter transition, on flush, and on wait
    /// timeout; the batch deadline is measured from here.
    batch_start: Instant,
    /// Last successful round trip, for health-check pacing.
    last_roundtrip: Instant,
}

impl<S: TokenSource> BatchLoop<S> {
    pub fn new(source: S, shutdown: Shutdown, config: &Config) -> BatchLoop<S> {
        BatchLoop {
            source,
            shutdown,
            batch_limit: config.batch_limit,
            batch_timeout: config.batch_timeout,
            healthcheck_interval: config.healthcheck_interval,
            reconnect_interval: RECONNECT_INTERVAL,
            counter: 0,
            batch_start: Instant::now(),
            last_roundtrip: Instant::now(),
        }
    }

    /// Runs until shutdown (`Ok`) or a terminal failure (`Err`).
    pub async fn run(&mut self) -> Result<(), RunError> {
        let mut connected_once = false;
        loop {
            self.source.close();
            if !self.shutdown.is_running() {
                return Ok(());
            }

            if connected_once {
                if !self.reconnect().await {
                    return Ok(());
                }
            } else {
                self.source.connect().await?;
                connected_once = true;
            }
            self.last_roundtrip = Instant::now();
            self.counter = 0;
            self.batch_start = Instant::now();

            match self.session().await {
                Interrupt::Reconnect => continue,
                Interrupt::Stop => return Ok(()),
                Interrupt::Fail(e) => return Err(e),
            }
        }
    }

    async fn session(&mut self) -> Interrupt {
        match self.drive().await {
            Ok(infallible) => match infallible {},
            Err(interrupt) => interrupt,
        }
    }

    /// One connection's worth of work: the startup drain, then the
    /// idle/flush cycle. Only ends through an [`Interrupt`].
    async fn drive(&mut self) -> Result<Infallible, Interrupt> {
        // Empty the backlog accumulated while disconnected.
        loop {
            self.check_running()?;
            let rows = self.dequeue_step(self.batch_limit).await?;
            if (rows as i64) < self.batch_limit {
                break;
            }
        }

        let shutdown = self.shutdown.clone();
        loop {
            self.check_running()?;
            self.intake().await?;

            if self.counter > 0 && self.batch_start.elapsed() >= self.batch_timeout {
                self.flush().await?;
                continue;
            }

            let remaining = self.batch_timeout.saturating_sub(self.batch_start.elapsed());
            let wait = tokio::select! {
                wait = self.source.wait(remaining) => wait,
                _ = shutdown.notified() => return Err(Interrupt::Stop),
            };

            match wait {
                Wait::Notified => {
                    self.note();
                    if self.counter >= self.batch_limit {
                        self.flush().await?;
                    }
                }
                Wait::Closed => {
                    warn!("notification intake closed");
                    return Err(Interrupt::Reconnect);
                }
                Wait::Timeout => {
                    if self.counter > 0 {
                        self.flush().await?;
                    } else {
                        self.batch_start = Instant::now();
                        self.maybe_healthcheck().await?;
                    }
                }
            }
        }
    }

    /// Counts pending notifications without blocking, flushing whenever the
    /// batch limit is reached mid-drain so no batch exceeds it.
    async fn intake(&mut self) -> Result<(), Interrupt> {
        loop {
            match self.source.poll_notification() {
                Intake::Notification => {
                    self.note();
                    if self.counter >= self.batch_limit {
                        self.flush().await?;
                    }
                }
                Intake::Empty => return Ok(()),
                Intake::Closed => {
                    warn!("notification intake closed");
                    return Err(Interrupt::Reconnect);
                }
            }
        }
    }

    fn note(&mut self) {
        if self.counter == 0 {
            self.batch_start = Instant::now();
        }
        self.counter += 1;
    }

    /// Dequeues `counter` rows and resets the batch state.
    async fn flush(&mut self) -> Result<(), Interrupt> {
        debug!(notifications = self.counter, "flushing batch");
        self.dequeue_step(self.counter).await?;
        self.counter = 0;
        self.batch_start = Instant::now();
        Ok(())
    }

    async fn dequeue_step(&mut self, limit: i64) -> Result<usize, Interrupt> {
        match self.source.dequeue(limit).await {
            Ok(rows) => {
                self.last_roundtrip = Instant::now();
                Ok(rows)
            }
            Err(e) if e.is_transient() => {
                warn!("dequeue failed: {e}");
                Err(Interrupt::Reconnect)
            }
            Err(e) => {
                error!("unrecoverable dequeue failure: {e}");
                Err(Interrupt::Fail(e.into()))
            }
        }
    }

    async fn maybe_healthcheck(&mut self) -> Result<(), Interrupt> {
        if self.last_roundtrip.elapsed() < self.healthcheck_interval {
            return Ok(());
        }
        if self.source.healthcheck().await {
            self.last_roundtrip = Instant::now();
            Ok(())
        } else {
            warn!("health check failed, reconnecting");
            Err(Interrupt::Reconnect)
        }
    }

    /// Retries connect until success. Returns false when shutdown ended the
    /// wait instead.
    async fn reconnect(&mut self) -> bool {
        loop {
            if !self.shutdown.is_running() {
                return false;
            }
            match self.source.connect().await {
                Ok(()) => {
                    info!("reconnected");
                    return true;
                }
                Err(e) => {
                    warn!(
                        "reconnect failed: {e}, retrying in {:?}",
                        self.reconnect_interval
                    );
                    tokio::select! {
                        _ = sleep(self.reconnect_interval) => {}
                        _ = self.shutdown.notified() => {}
                    }
                }
            }
        }
    }

    fn check_running(&self) -> Result<(), Interrupt> {
        if self.shutdown.is_running() {
            Ok(())
        } else {
            Err(Interrupt::Stop)
        }
    }
}
