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

//! The database client: connection lifecycle, notification intake, and the
//! atomic dequeue.

use std::io::Write;
use std::time::Duration;

use futures::StreamExt;
use thiserror::Error;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;
use tokio_postgres::{AsyncMessage, Client, NoTls, Statement};
use tracing::{debug, error, info, warn};

use super::{validate_channel_name, ChannelError};
use crate::crypto::TokenSigner;
use crate::row::{self, Action, TokenRow};

/// The dequeue statement: one round trip that selects the next eligible
/// tokens past the queue cursor and advances the cursor to the highest
/// selected id inside the same transaction. The single-statement form is
/// what makes a row impossible to return twice; a separate read and update
/// would lose that guarantee.
const DEQUEUE_SQL: &str = "\
WITH token_data AS ( \
    SELECT \
        t.account, \
        t.secret, \
        t.code, \
        t.expires_at, \
        t.id, \
        t.action, \
        a.email, \
        a.login \
    FROM \
        jobs \
    JOIN tokens t \
        ON t.id > jobs.last_seq \
        AND t.expires_at > EXTRACT(EPOCH FROM NOW()) \
        AND t.consumed_at IS NULL \
        AND t.action IN ('activation', 'password_recovery') \
    JOIN accounts a \
        ON a.id = t.account \
        AND ( \
            (t.action = 'activation' AND a.status = 'provisioned') \
            OR (t.action = 'password_recovery' AND a.status = 'active') \
        ) \
    WHERE \
        jobs.job_type = $1 \
    ORDER BY id ASC \
    LIMIT $2 \
), \
updated_jobs AS ( \
    UPDATE \
        jobs \
    SET \
        last_seq = (SELECT MAX(id) FROM token_data) \
    WHERE \
        job_type = $1 \
        AND EXISTS (SELECT 1 FROM token_data) \
    RETURNING last_seq \
) \
SELECT \
    td.action, \
    td.email, \
    td.login, \
    td.secret, \
    td.code \
FROM \
    token_data td";

const HEALTHCHECK_SQL: &str = "SELECT 1";

/// Errors raised while establishing a connection.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("connection setup failed: {0}")]
    Setup(String),
}

/// Errors raised by the dequeue operation.
///
/// [`DequeueError::is_transient`] drives the loop's state machine: transient
/// errors trigger a reconnect, everything else ends the process.
#[derive(Debug, Error)]
pub enum DequeueError {
    /// Query execution failed (connection drop, protocol error). The
    /// transaction either committed (the rows are already past the cursor)
    /// or rolled back (the rows stay eligible), so reconnecting and
    /// re-executing cannot duplicate output.
    #[error("transient database failure: {0}")]
    Transient(String),

    /// A required column is missing from the result set.
    #[error("missing column `{0}` in dequeue result")]
    MissingColumn(&'static str),

    /// A row value could not be read with its expected type.
    #[error("malformed value in dequeue row {index}: {message}")]
    Malformed { index: usize, message: String },

    /// Standard output is gone; there is no consumer left to emit to.
    #[error("failed to write batch: {0}")]
    Io(#[from] std::io::Error),
}

impl DequeueError {
    pub fn is_transient(&self) -> bool {
        matches!(self, DequeueError::Transient(_))
    }
}

/// Outcome of a non-blocking intake poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intake {
    /// One notification was pending and has been consumed.
    Notification,
    /// Nothing pending.
    Empty,
    /// The connection driver exited; the connection is gone.
    Closed,
}

/// Outcome of a bounded wait on the notification intake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// One notification arrived and has been consumed.
    Notified,
    /// The deadline passed with nothing pending.
    Timeout,
    /// The connection driver exited; the connection is gone.
    Closed,
}

/// Column ordinals of the dequeue result, resolved by name once per batch.
struct ResultColumns {
    action: usize,
    email: usize,
    login: usize,
    secret: usize,
    code: usize,
}

impl ResultColumns {
    fn resolve(row: &tokio_postgres::Row) -> Result<ResultColumns, DequeueError> {
        let find = |name: &'static str| {
            row.columns()
                .iter()
                .position(|column| column.name() == name)
                .ok_or(DequeueError::MissingColumn(name))
        };
        Ok(ResultColumns {
            action: find("action")?,
            email: find("email")?,
            login: find("login")?,
            secret: find("secret")?,
            code: find("code")?,
        })
    }

    /// Reads one row, treating NULL text fields as empty strings the way
    /// the wire format expects. A NULL secret becomes an empty slice and is
    /// rejected by the shaper's length check.
    fn read<'a>(
        &self,
        row: &'a tokio_postgres::Row,
        index: usize,
    ) -> Result<TokenRow<'a>, DequeueError> {
        let malformed = |source: tokio_postgres::Error| DequeueError::Malformed {
            index,
            message: source.to_string(),
        };

        let action: &str = row
            .try_get::<_, Option<&str>>(self.action)
            .map_err(malformed)?
            .unwrap_or("");
        let email: &str = row
            .try_get::<_, Option<&str>>(self.email)
            .map_err(malformed)?
            .unwrap_or("");
        let login: &str = row
            .try_get::<_, Option<&str>>(self.login)
            .map_err(malformed)?
            .unwrap_or("");
        let secret: &[u8] = row
            .try_get::<_, Option<&[u8]>>(self.secret)
            .map_err(malformed)?
            .unwrap_or(&[]);
        let code: &str = row
            .try_get::<_, Option<&str>>(self.code)
            .map_err(malformed)?
            .unwrap_or("");

        Ok(TokenRow {
            action: Action::parse(action),
            email,
            login,
            secret,
            code,
        })
    }
}

/// One logical connection: client handle, notification intake, and the
/// prepared dequeue statement. Dropping the client stops the driver task
/// and releases the connection.
pub struct DbClient {
    client: Client,
    notifications: UnboundedReceiver<()>,
    driver: JoinHandle<()>,
    dequeue: Statement,
}

impl DbClient {
    /// Connects, subscribes to `channel`, and prepares the dequeue
    /// statement. The returned client is fully operational; any failure
    /// along the way fails the whole attempt.
    pub async fn connect(database_url: &str, channel: &str) -> Result<DbClient, ConnectError> {
        let channel = validate_channel_name(channel)?;

        let (client, mut connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .map_err(|e| ConnectError::Setup(e.to_string()))?;

        // Drive the connection from a cooperatively-scheduled task,
        // forwarding notifications into the intake channel. When the
        // connection dies the task exits, the sender drops, and the intake
        // reports Closed.
        let (tx, notifications) = mpsc::unbounded_channel();
        let driver = tokio::spawn(async move {
            let mut messages = futures::stream::poll_fn(move |cx| connection.poll_message(cx));
            while let Some(message) = messages.next().await {
                match message {
                    Ok(AsyncMessage::Notification(notification)) => {
                        debug!(channel = notification.channel(), "notification received");
                        if tx.send(()).is_err() {
                            break;
                        }
                    }
                    Ok(_) => {
                        // Notices and parameter updates are not work signals.
                    }
                    Err(e) => {
                        error!("connection error: {e}");
                        break;
                    }
                }
            }
        });

        // The channel name is validated above, so the quoted interpolation
        // cannot be subverted.
        client
            .batch_execute(&format!("LISTEN \"{channel}\""))
            .await
            .map_err(|e| ConnectError::Setup(e.to_string()))?;
        info!(channel, "listening for token notifications");

        let dequeue = client
            .prepare(DEQUEUE_SQL)
            .await
            .map_err(|e| ConnectError::Setup(e.to_string()))?;

        Ok(DbClient {
            client,
            notifications,
            driver,
            dequeue,
        })
    }

    /// Executes the atomic dequeue and emits the shaped batch to `out`.
    ///
    /// Returns the number of rows the query returned. Rows that fail to
    /// shape are skipped with a warning; the startup drain keys off the
    /// query count, so a partially skipped batch does not re-trigger it.
    /// When every row is skipped no line is written at all.
    pub async fn dequeue<W: Write>(
        &self,
        queue: &str,
        limit: i64,
        signer: &TokenSigner,
        out: &mut W,
    ) -> Result<usize, DequeueError> {
        let rows = self
            .client
            .query(&self.dequeue, &[&queue, &limit])
            .await
            .map_err(|e| DequeueError::Transient(e.to_string()))?;
        if rows.is_empty() {
            return Ok(0);
        }

        let columns = ResultColumns::resolve(&rows[0])?;
        let mut parsed = Vec::with_capacity(rows.len());
        for (index, row) in rows.iter().enumerate() {
            parsed.push(columns.read(row, index)?);
        }

        let mut line = String::new();
        let emitted = row::append_rows(signer, parsed, &mut line);
        if emitted > 0 {
            line.push('\n');
            out.write_all(line.as_bytes())?;
            out.flush()?;
        }

        debug!(rows = rows.len(), emitted, "batch dequeued");
        Ok(rows.len())
    }

    /// Verifies the connection with a trivial round trip.
    pub async fn healthcheck(&self) -> bool {
        match self.client.simple_query(HEALTHCHECK_SQL).await {
            Ok(_) => true,
            Err(e) => {
                warn!("health check failed: {e}");
                false
            }
        }
    }

    /// Non-blocking intake poll.
    pub fn poll_notification(&mut self) -> Intake {
        match self.notifications.try_recv() {
            Ok(()) => Intake::Notification,
            Err(TryRecvError::Empty) => Intake::Empty,
            Err(TryRecvError::Disconnected) => Intake::Closed,
        }
    }

    /// Bounded wait for the next notification.
    pub async fn wait(&mut self, timeout: Duration) -> Wait {
        match tokio::time::timeout(timeout, self.notifications.recv()).await {
            Ok(Some(())) => Wait::Notified,
            Ok(None) => Wait::Closed,
            Err(_) => Wait::Timeout,
        }
    }
}

impl Drop for DbClient {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dequeue_statement_takes_two_parameters() {
        assert!(DEQUEUE_SQL.contains("$1"));
        assert!(DEQUEUE_SQL.contains("$2"));
        assert!(!DEQUEUE_SQL.contains("$3"));
    }

    #[test]
    fn dequeue_statement_reads_and_advances_in_one_statement() {
        // The cursor update must live in the same statement as the read.
        assert!(DEQUEUE_SQL.contains("UPDATE"));
        assert!(DEQUEUE_SQL.contains("last_seq"));
        assert!(DEQUEUE_SQL.contains("ORDER BY id ASC"));
    }
}
