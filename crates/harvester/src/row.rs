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

//! Shaping of dequeued token rows into the batch wire format.
//!
//! Each row becomes five comma-separated fields:
//!
//! ```text
//! action_code,email,login,encoded_token,code
//! ```
//!
//! where `encoded_token` is the URL-safe base64 of `secret || mac` and the
//! MAC is taken over the action-specific signing input. Fields never contain
//! commas (an upstream schema guarantee), so no escaping is applied.

use std::fmt::Write as _;

use thiserror::Error;
use tracing::warn;

use crate::crypto::{encode_token, TokenSigner, MAC_SIZE};

/// Required length of a token secret in bytes.
pub const SECRET_SIZE: usize = 32;

/// Path prefixes bound into the signature. They match the link paths the
/// downstream emails point at, so the MAC also authenticates the endpoint a
/// token may be redeemed against.
const ACTIVATE_PREFIX: &[u8] = b"/activate";
const RECOVER_PREFIX: &[u8] = b"/recover";

/// Token action, as stored in the `tokens.action` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Activation,
    PasswordRecovery,
    /// Anything else. The dequeue query restricts to the two known actions,
    /// so this is only reachable on schema drift; the row is still shaped
    /// (with code 0) to keep the output position-stable.
    Other,
}

impl Action {
    pub fn parse(raw: &str) -> Action {
        match raw {
            "activation" => Action::Activation,
            "password_recovery" => Action::PasswordRecovery,
            _ => {
                warn!(action = raw, "unexpected action, shaping with code 0");
                Action::Other
            }
        }
    }

    /// Numeric code emitted as the first field of a shaped row.
    pub fn code(self) -> u8 {
        match self {
            Action::Activation => 1,
            Action::PasswordRecovery => 2,
            Action::Other => 0,
        }
    }
}

/// One row returned by the dequeue statement, borrowed from the result set.
#[derive(Debug)]
pub struct TokenRow<'a> {
    pub action: Action,
    pub email: &'a str,
    pub login: &'a str,
    pub secret: &'a [u8],
    /// Confirmation code; empty for activation, a 5-digit string for
    /// password recovery.
    pub code: &'a str,
}

/// Errors that cause a single row to be skipped.
#[derive(Debug, Error)]
pub enum ShapeError {
    #[error("secret is {0} bytes, expected {SECRET_SIZE}")]
    SecretLength(usize),
}

/// Appends the five fields for `row` to `line`.
///
/// On error nothing has been appended; a skipped row leaves no partial
/// fields behind.
pub fn shape_row(
    signer: &TokenSigner,
    row: &TokenRow<'_>,
    line: &mut String,
) -> Result<(), ShapeError> {
    if row.secret.len() != SECRET_SIZE {
        return Err(ShapeError::SecretLength(row.secret.len()));
    }

    let mut input = Vec::with_capacity(RECOVER_PREFIX.len() + SECRET_SIZE + row.code.len());
    match row.action {
        Action::Activation => {
            input.extend_from_slice(ACTIVATE_PREFIX);
            input.extend_from_slice(row.secret);
        }
        Action::PasswordRecovery => {
            input.extend_from_slice(RECOVER_PREFIX);
            input.extend_from_slice(row.secret);
            input.extend_from_slice(row.code.as_bytes());
        }
        Action::Other => {}
    }
    let mac = signer.sign(&input);

    let mut token = Vec::with_capacity(SECRET_SIZE + MAC_SIZE);
    token.extend_from_slice(row.secret);
    token.extend_from_slice(&mac);

    // Writing to a String cannot fail.
    let _ = write!(
        line,
        "{},{},{},{},{}",
        row.action.code(),
        row.email,
        row.login,
        encode_token(&token),
        row.code
    );
    Ok(())
}

/// Shapes `rows` into one comma-joined record, skipping rows that fail.
///
/// Returns the number of rows appended. The caller adds the terminating
/// newline only when this is non-zero, so no empty record is ever emitted.
pub fn append_rows<'a>(
    signer: &TokenSigner,
    rows: impl IntoIterator<Item = TokenRow<'a>>,
    line: &mut String,
) -> usize {
    let mut emitted = 0;
    for (index, row) in rows.into_iter().enumerate() {
        let mark = line.len();
        if emitted > 0 {
            line.push(',');
        }
        match shape_row(signer, &row, line) {
            Ok(()) => emitted += 1,
            Err(e) => {
                line.truncate(mark);
                warn!(row = index, "skipping row: {e}");
            }
        }
    }
    emitted
}
