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

//! Environment-driven configuration.
//!
//! Required settings (the connection string and the MAC key) fail startup
//! when missing or malformed. Optional settings fall back to their defaults
//! with a warning, matching the deployment behavior the downstream sender
//! already relies on.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;
use zeroize::Zeroizing;

/// Decoded MAC key length in bytes.
pub const MAC_KEY_SIZE: usize = 32;

const ENV_DB_CONNSTR: &str = "DB_CONNSTR";
const ENV_HMAC_KEY: &str = "HMAC_KEY";
const ENV_CHANNEL_NAME: &str = "CHANNEL_NAME";
const ENV_QUEUE_NAME: &str = "QUEUE_NAME";
const ENV_EVENT_THRESHOLD: &str = "EVENT_THRESHOLD";
const ENV_TIMEOUT_MS: &str = "TIMEOUT_MS";
const ENV_HEALTHCHECK_INTERVAL_MS: &str = "HEALTHCHECK_INTERVAL_MS";

const DEFAULT_CHANNEL: &str = "token_insert";
const DEFAULT_QUEUE: &str = "user_action_queue";
const DEFAULT_EVENT_THRESHOLD: i64 = 10;
const DEFAULT_TIMEOUT_MS: i64 = 5_000;
const DEFAULT_HEALTHCHECK_INTERVAL_MS: i64 = 270_000;

/// Errors that reject the configuration at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable {0} is not set")]
    MissingVar(&'static str),

    #[error("MAC key must be {expected} hex characters, got {got}")]
    KeyLength { expected: usize, got: usize },

    #[error("MAC key contains non-hexadecimal characters")]
    KeyEncoding,

    #[error(
        "health-check interval ({healthcheck_ms} ms) must not be shorter \
         than the batch timeout ({timeout_ms} ms)"
    )]
    HealthcheckTooShort { healthcheck_ms: u64, timeout_ms: u64 },
}

/// The 32-byte HMAC key, wiped from memory on drop.
///
/// Parsed from a 64-character hex string. The `Debug` impl prints no key
/// material; the key is never logged or emitted.
pub struct MacKey(Zeroizing<[u8; MAC_KEY_SIZE]>);

impl MacKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0[..]
    }
}

impl FromStr for MacKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != MAC_KEY_SIZE * 2 {
            return Err(ConfigError::KeyLength {
                expected: MAC_KEY_SIZE * 2,
                got: s.len(),
            });
        }
        let mut bytes = Zeroizing::new([0u8; MAC_KEY_SIZE]);
        hex::decode_to_slice(s, &mut bytes[..]).map_err(|_| ConfigError::KeyEncoding)?;
        Ok(MacKey(bytes))
    }
}

impl fmt::Debug for MacKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MacKey(..)")
    }
}

/// Agent configuration.
#[derive(Debug)]
pub struct Config {
    /// Connection string, passed verbatim to the driver.
    pub database_url: String,
    /// Notification channel to LISTEN on.
    pub channel: String,
    /// `jobs.job_type` key identifying the queue cursor row.
    pub queue: String,
    /// Rows per flush, and the chunk size of the startup drain.
    pub batch_limit: i64,
    /// Deadline from the first notification of a batch.
    pub batch_timeout: Duration,
    /// Idle period before a liveness probe.
    pub healthcheck_interval: Duration,
    /// The process-wide MAC key.
    pub key: MacKey,
}

impl Config {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Config, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through `lookup`, the testable seam behind
    /// [`Config::from_env`].
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Config, ConfigError> {
        let database_url =
            lookup(ENV_DB_CONNSTR).ok_or(ConfigError::MissingVar(ENV_DB_CONNSTR))?;
        let key: MacKey = lookup(ENV_HMAC_KEY)
            .ok_or(ConfigError::MissingVar(ENV_HMAC_KEY))?
            .parse()?;

        let channel = string_or_default(&lookup, ENV_CHANNEL_NAME, DEFAULT_CHANNEL);
        let queue = string_or_default(&lookup, ENV_QUEUE_NAME, DEFAULT_QUEUE);

        let batch_limit = int_or_default(&lookup, ENV_EVENT_THRESHOLD, DEFAULT_EVENT_THRESHOLD);
        let timeout_ms = int_or_default(&lookup, ENV_TIMEOUT_MS, DEFAULT_TIMEOUT_MS);
        let healthcheck_ms = int_or_default(
            &lookup,
            ENV_HEALTHCHECK_INTERVAL_MS,
            DEFAULT_HEALTHCHECK_INTERVAL_MS,
        );

        if healthcheck_ms < timeout_ms {
            return Err(ConfigError::HealthcheckTooShort {
                healthcheck_ms: healthcheck_ms as u64,
                timeout_ms: timeout_ms as u64,
            });
        }

        Ok(Config {
            database_url,
            channel,
            queue,
            batch_limit,
            batch_timeout: Duration::from_millis(timeout_ms as u64),
            healthcheck_interval: Duration::from_millis(healthcheck_ms as u64),
            key,
        })
    }
}

fn string_or_default(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: &str,
) -> String {
    match lookup(name) {
        Some(value) => value,
        None => {
            warn!("environment variable {name} not set, using default: {default}");
            default.to_string()
        }
    }
}

/// Parses a positive integer setting. Absent, unparseable, or non-positive
/// values fall back to the default with a warning rather than failing
/// startup.
fn int_or_default(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: i64) -> i64 {
    match lookup(name) {
        None => {
            warn!("environment variable {name} not set, using default: {default}");
            default
        }
        Some(raw) => match raw.trim().parse::<i64>() {
            Ok(value) if value > 0 => value,
            _ => {
                warn!("invalid value for {name}: {raw:?}, using default: {default}");
                default
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const KEY_HEX: &str = "deadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeef";

    fn base_env() -> HashMap<&'static str, String> {
        let mut env = HashMap::new();
        env.insert(ENV_DB_CONNSTR, "host=localhost user=postgres".to_string());
        env.insert(ENV_HMAC_KEY, KEY_HEX.to_string());
        env
    }

    fn load(env: &HashMap<&'static str, String>) -> Result<Config, ConfigError> {
        Config::from_lookup(|name| env.get(name).cloned())
    }

    #[test]
    fn defaults_applied() {
        let config = load(&base_env()).unwrap();
        assert_eq!(config.channel, "token_insert");
        assert_eq!(config.queue, "user_action_queue");
        assert_eq!(config.batch_limit, 10);
        assert_eq!(config.batch_timeout, Duration::from_millis(5_000));
        assert_eq!(config.healthcheck_interval, Duration::from_millis(270_000));
    }

    #[test]
    fn missing_database_url_rejected() {
        let mut env = base_env();
        env.remove(ENV_DB_CONNSTR);
        assert!(matches!(
            load(&env),
            Err(ConfigError::MissingVar("DB_CONNSTR"))
        ));
    }

    #[test]
    fn missing_key_rejected() {
        let mut env = base_env();
        env.remove(ENV_HMAC_KEY);
        assert!(matches!(load(&env), Err(ConfigError::MissingVar("HMAC_KEY"))));
    }

    #[test]
    fn short_key_rejected() {
        let mut env = base_env();
        env.insert(ENV_HMAC_KEY, "deadbeef".to_string());
        assert!(matches!(
            load(&env),
            Err(ConfigError::KeyLength { expected: 64, got: 8 })
        ));
    }

    #[test]
    fn non_hex_key_rejected() {
        let mut env = base_env();
        env.insert(ENV_HMAC_KEY, "g".repeat(64));
        assert!(matches!(load(&env), Err(ConfigError::KeyEncoding)));
    }

    #[test]
    fn key_decodes_to_expected_bytes() {
        let key: MacKey = KEY_HEX.parse().unwrap();
        assert_eq!(key.as_bytes().len(), MAC_KEY_SIZE);
        assert_eq!(&key.as_bytes()[..4], &[0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn key_debug_is_redacted() {
        let key: MacKey = KEY_HEX.parse().unwrap();
        let printed = format!("{key:?}");
        assert!(!printed.contains("dead"));
    }

    #[test]
    fn unparseable_integers_fall_back() {
        let mut env = base_env();
        env.insert(ENV_EVENT_THRESHOLD, "lots".to_string());
        env.insert(ENV_TIMEOUT_MS, "-5".to_string());
        let config = load(&env).unwrap();
        assert_eq!(config.batch_limit, 10);
        assert_eq!(config.batch_timeout, Duration::from_millis(5_000));
    }

    #[test]
    fn healthcheck_shorter_than_timeout_rejected() {
        let mut env = base_env();
        env.insert(ENV_TIMEOUT_MS, "10000".to_string());
        env.insert(ENV_HEALTHCHECK_INTERVAL_MS, "5000".to_string());
        assert!(matches!(
            load(&env),
            Err(ConfigError::HealthcheckTooShort { .. })
        ));
    }

    #[test]
    fn healthcheck_equal_to_timeout_accepted() {
        let mut env = base_env();
        env.insert(ENV_TIMEOUT_MS, "5000".to_string());
        env.insert(ENV_HEALTHCHECK_INTERVAL_MS, "5000".to_string());
        assert!(load(&env).is_ok());
    }

    #[test]
    fn explicit_values_override_defaults() {
        let mut env = base_env();
        env.insert(ENV_CHANNEL_NAME, "other_channel".to_string());
        env.insert(ENV_QUEUE_NAME, "other_queue".to_string());
        env.insert(ENV_EVENT_THRESHOLD, "25".to_string());
        let config = load(&env).unwrap();
        assert_eq!(config.channel, "other_channel");
        assert_eq!(config.queue, "other_queue");
        assert_eq!(config.batch_limit, 25);
    }
}
