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

//! Single-connection PostgreSQL client.
//!
//! Owns the one logical connection: the LISTEN subscription, the prepared
//! cursor-advancing dequeue statement, the liveness probe, and the
//! notification intake the batching loop waits on.

mod client;

pub use client::{ConnectError, DbClient, DequeueError, Intake, Wait};

use thiserror::Error;

/// Maximum length for PostgreSQL identifiers (NAMEDATALEN - 1).
const MAX_CHANNEL_NAME_LENGTH: usize = 63;

/// Errors that can occur during channel name validation.
///
/// These errors are returned when a channel name fails validation checks
/// designed to prevent SQL injection attacks.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Channel name is empty or exceeds the maximum length.
    #[error("channel name length invalid: '{name}' (must be 1-{max} characters)")]
    InvalidLength { name: String, max: usize },

    /// Channel name does not start with a letter or underscore.
    #[error("channel name must start with a letter or underscore: '{0}'")]
    InvalidStart(String),

    /// Channel name contains characters other than alphanumeric or underscore.
    #[error(
        "channel name contains invalid characters (only alphanumeric and underscore allowed): '{0}'"
    )]
    InvalidCharacters(String),
}

/// Validates a notification channel name to prevent SQL injection.
///
/// The channel name is interpolated into the `LISTEN` command (it cannot be
/// bound as a statement parameter), so it is restricted to PostgreSQL
/// identifier rules: 1-63 characters, a leading letter or underscore, and an
/// alphanumeric/underscore body.
pub fn validate_channel_name(name: &str) -> Result<&str, ChannelError> {
    if name.is_empty() || name.len() > MAX_CHANNEL_NAME_LENGTH {
        return Err(ChannelError::InvalidLength {
            name: name.to_string(),
            max: MAX_CHANNEL_NAME_LENGTH,
        });
    }

    if !name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
    {
        return Err(ChannelError::InvalidStart(name.to_string()));
    }

    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ChannelError::InvalidCharacters(name.to_string()));
    }

    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_names() {
        assert!(validate_channel_name("token_insert").is_ok());
        assert!(validate_channel_name("_private").is_ok());
        assert!(validate_channel_name("chan42").is_ok());
    }

    #[test]
    fn rejects_empty_and_overlong_names() {
        assert!(matches!(
            validate_channel_name(""),
            Err(ChannelError::InvalidLength { .. })
        ));
        let long = "a".repeat(64);
        assert!(matches!(
            validate_channel_name(&long),
            Err(ChannelError::InvalidLength { .. })
        ));
    }

    #[test]
    fn rejects_leading_digit() {
        assert!(matches!(
            validate_channel_name("1channel"),
            Err(ChannelError::InvalidStart(_))
        ));
    }

    #[test]
    fn rejects_injection_attempts() {
        assert!(validate_channel_name("chan; DROP TABLE tokens").is_err());
        assert!(validate_channel_name("chan\"name").is_err());
        assert!(validate_channel_name("chan-name").is_err());
    }
}
