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

//! The notification-driven batching loop.
//!
//! The loop counts channel notifications and flushes on size or deadline by
//! invoking the atomic dequeue; connection trouble sends it back through a
//! reconnect-and-drain cycle. It talks to the database through the
//! [`TokenSource`] trait so tests can drive the state machine with a
//! scripted source.

mod batch_loop;
mod pg_source;

pub use batch_loop::{BatchLoop, RunError};
pub use pg_source::PgSource;

use std::time::Duration;

use async_trait::async_trait;

use crate::database::{ConnectError, DequeueError, Intake, Wait};

/// The seam between the batching loop and the database.
///
/// The production implementation is [`PgSource`].
#[async_trait]
pub trait TokenSource {
    /// Establishes a fresh connection, subscription, and prepared
    /// statement, replacing any previous one.
    async fn connect(&mut self) -> Result<(), ConnectError>;

    /// Dequeues up to `limit` rows and emits the shaped batch.
    ///
    /// Returns the number of rows the dequeue query returned.
    async fn dequeue(&mut self, limit: i64) -> Result<usize, DequeueError>;

    /// Liveness probe for idle periods.
    async fn healthcheck(&mut self) -> bool;

    /// Non-blocking intake poll.
    fn poll_notification(&mut self) -> Intake;

    /// Bounded wait for the next notification.
    async fn wait(&mut self, timeout: Duration) -> Wait;

    /// Releases the current connection, if any.
    fn close(&mut self);
}
