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

//! Harvester - an event-driven agent that turns database token events into
//! signed email payload batches on standard output.
//!
//! PostgreSQL acts as both the source of truth and a single-consumer work
//! queue. An upstream trigger NOTIFYs a channel for every inserted token;
//! this agent counts those notifications, coalesces them into bounded
//! batches, and executes a dequeue statement that reads the next eligible
//! rows and advances a persistent cursor in one atomic round trip. Each
//! row's secret is signed with HMAC-SHA-256 under a process-wide key,
//! URL-safe base64 encoded, and written as comma-separated fields; one
//! newline-terminated line per batch, flushed for the downstream sender on
//! the other end of the pipe.
//!
//! # Architecture
//!
//! - [`config`] - environment-driven configuration and the MAC key
//! - [`crypto`] - HMAC signing and URL-safe token encoding
//! - [`row`] - shaping of dequeued rows into the wire format
//! - [`database`] - the single logical connection: LISTEN subscription,
//!   atomic dequeue, liveness probe
//! - [`dispatcher`] - the batching loop and its [`TokenSource`] seam
//! - [`shutdown`] - cooperative signal-driven shutdown
//!
//! Everything runs on a current-thread runtime; the only concurrent tasks
//! are the connection driver and the signal waiter.

pub mod config;
pub mod crypto;
pub mod database;
pub mod dispatcher;
pub mod row;
pub mod shutdown;

pub use config::{Config, ConfigError, MacKey};
pub use crypto::TokenSigner;
pub use dispatcher::{BatchLoop, PgSource, RunError, TokenSource};
pub use shutdown::Shutdown;
