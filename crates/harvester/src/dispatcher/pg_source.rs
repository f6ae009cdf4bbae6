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

//! The production [`TokenSource`] backed by a single PostgreSQL connection.

use std::io::Write;
use std::time::Duration;

use async_trait::async_trait;

use super::TokenSource;
use crate::config::Config;
use crate::crypto::TokenSigner;
use crate::database::{ConnectError, DbClient, DequeueError, Intake, Wait};

/// Wires the database client, the signer, and the output sink together.
///
/// `client` is `None` before the first connect and after `close`; the
/// batching loop always connects before dequeueing, so the disconnected
/// arms below only surface as transient errors if the state machine is
/// driven out of order.
pub struct PgSource<W> {
    database_url: String,
    channel: String,
    queue: String,
    signer: TokenSigner,
    out: W,
    client: Option<DbClient>,
}

impl<W: Write + Send> PgSource<W> {
    pub fn new(config: &Config, signer: TokenSigner, out: W) -> PgSource<W> {
        PgSource {
            database_url: config.database_url.clone(),
            channel: config.channel.clone(),
            queue: config.queue.clone(),
            signer,
            out,
            client: None,
        }
    }
}

#[async_trait]
impl<W: Write + Send> TokenSource for PgSource<W> {
    async fn connect(&mut self) -> Result<(), ConnectError> {
        self.client = None;
        let client = DbClient::connect(&self.database_url, &self.channel).await?;
        self.client = Some(client);
        Ok(())
    }

    async fn dequeue(&mut self, limit: i64) -> Result<usize, DequeueError> {
        let Some(client) = &self.client else {
            return Err(DequeueError::Transient("not connected".to_string()));
        };
        client
            .dequeue(&self.queue, limit, &self.signer, &mut self.out)
            .await
    }

    async fn healthcheck(&mut self) -> bool {
        match &self.client {
            Some(client) => client.healthcheck().await,
            None => false,
        }
    }

    fn poll_notification(&mut self) -> Intake {
        match &mut self.client {
            Some(client) => client.poll_notification(),
            None => Intake::Closed,
        }
    }

    async fn wait(&mut self, timeout: Duration) -> Wait {
        match &mut self.client {
            Some(client) => client.wait(timeout).await,
            None => Wait::Closed,
        }
    }

    fn close(&mut self) {
        // Dropping the client aborts the connection driver.
        self.client = None;
    }
}
