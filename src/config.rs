//! Endpoint configuration.
//!
//! ```toml
//! device_id = 0
//! fast_mode = true
//! fast_data_buf_cap = 10485760
//! fast_ctrl_buf_cap = 128
//!
//! [retry]
//! max_attempts = 5
//! backoff_ms = 0
//! connect_retry_interval_ms = 1000
//! ```
//!
//! Every field is optional.

use std::time::Duration;

use serde::Deserialize;

use crate::endpoint::*;
use crate::error::{Error, Result};
use crate::type_alias::*;

/// Configuration of an [`Endpoint`](crate::Endpoint).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EndpointConfig {
    pub device_id: DeviceId,
    pub fast_mode: bool,

    /// Capacity of each session's registered fast-path data buffer.
    pub fast_data_buf_cap: usize,

    /// Capacity of each session's registered fast-path control buffer.
    pub fast_ctrl_buf_cap: usize,

    /// Driver sessions a client reserves per requested session.
    pub client_session_multiplier: u32,

    pub retry: RetryConfig,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            device_id: 0,
            fast_mode: false,
            fast_data_buf_cap: DEFAULT_FAST_DATA_BUF_CAP,
            fast_ctrl_buf_cap: DEFAULT_FAST_CTRL_BUF_CAP,
            client_session_multiplier: DEFAULT_CLIENT_SESSION_MULTIPLIER,
            retry: RetryConfig::default(),
        }
    }
}

/// The `[retry]` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Absent means retry forever.
    pub max_attempts: Option<u32>,
    pub backoff_ms: u64,
    pub connect_retry_interval_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            backoff_ms: 0,
            connect_retry_interval_ms: DEFAULT_CONNECT_RETRY_INTERVAL.as_millis() as u64,
        }
    }
}

impl EndpointConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::InvalidArgument(format!("bad endpoint config: {}", e)))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            backoff: Duration::from_millis(self.retry.backoff_ms),
            connect_retry_interval: Duration::from_millis(self.retry.connect_retry_interval_ms),
        }
    }

    /// Fast-path buffer capacities to establish sessions with.
    pub fn caps(&self) -> FastBufferCaps {
        FastBufferCaps {
            data: self.fast_data_buf_cap,
            ctrl: self.fast_ctrl_buf_cap,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let config = EndpointConfig::from_toml_str("").unwrap();
        assert_eq!(config, EndpointConfig::default());
        assert_eq!(config.caps(), FastBufferCaps::default());
        assert_eq!(config.retry_policy(), RetryPolicy::forever());
    }

    #[test]
    fn partial_document() {
        let config = EndpointConfig::from_toml_str(
            r#"
            device_id = 3
            fast_mode = true
            fast_ctrl_buf_cap = 256

            [retry]
            max_attempts = 4
            connect_retry_interval_ms = 10
            "#,
        )
        .unwrap();

        assert_eq!(config.device_id, 3);
        assert!(config.fast_mode);
        assert_eq!(
            config.caps(),
            FastBufferCaps {
                data: DEFAULT_FAST_DATA_BUF_CAP,
                ctrl: 256
            }
        );

        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, Some(4));
        assert_eq!(policy.backoff, Duration::ZERO);
        assert_eq!(policy.connect_retry_interval, Duration::from_millis(10));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = EndpointConfig::from_toml_str("fast = true").unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
