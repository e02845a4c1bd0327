//! Retry decisions.
//!
//! Only a failed connect is retried: nothing has been sent upstream yet, so
//! the request is safe to replay against a different upstream regardless of
//! method. Once bytes are on the wire the error is final.

use crate::config::RetryConfig;
use crate::error::GatewayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub enabled: bool,
    pub max_connect_retries: u32,
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            enabled: config.enabled,
            max_connect_retries: config.max_connect_retries,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl RetryPolicy {
    /// Whether a request that has made `attempts` upstream attempts and just
    /// failed with `err` may try once more.
    pub fn allows(&self, err: &GatewayError, attempts: u32) -> bool {
        self.enabled
            && matches!(err, GatewayError::UpstreamConnectFailed { .. })
            && attempts <= self.max_connect_retries
    }
}
