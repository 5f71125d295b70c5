use std::collections::HashMap;
use std::time::Duration;

use crate::error::Error;

/// Minimum byte cap allowed for a single row-range fetch.
pub const HYPER_MIN_ROW_LIMIT_BYTE_SIZE: u64 = 1024;
/// Maximum byte cap allowed for a single row-range fetch.
pub const HYPER_MAX_ROW_LIMIT_BYTE_SIZE: u64 = 20 * 1024 * 1024;

/// Minimum inbound gRPC message size the gateway's channel must accept;
/// a single result chunk is never split across messages.
pub const MIN_INBOUND_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Keepalive parameters for the underlying transport channel.
#[derive(Debug, Clone, Copy)]
pub struct Keepalive {
    pub enabled: bool,
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for Keepalive {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Recognized client configuration. Every field here is validated at
/// [`ConfigBuilder::build`]; session-level `query_settings` are passed
/// through to the server verbatim and are not validated by the client.
#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) query_timeout: Duration,
    pub(crate) local_enforcement_grace: Duration,
    pub(crate) network_timeout: Option<Duration>,
    pub(crate) max_inbound_message_size: usize,
    pub(crate) initial_flow_credit: u32,
    pub(crate) keepalive: Keepalive,
    pub(crate) query_settings: HashMap<String, String>,
    pub(crate) default_row_limit_byte_size: u64,
    pub(crate) include_customer_detail_in_reason: bool,
}

impl Config {
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    #[must_use]
    pub fn query_timeout(&self) -> Duration {
        self.query_timeout
    }

    #[must_use]
    pub fn network_timeout(&self) -> Option<Duration> {
        self.network_timeout
    }

    #[must_use]
    pub fn local_enforcement_grace(&self) -> Duration {
        self.local_enforcement_grace
    }

    #[must_use]
    pub fn initial_flow_credit(&self) -> u32 {
        self.initial_flow_credit
    }

    #[must_use]
    pub fn query_settings(&self) -> &HashMap<String, String> {
        &self.query_settings
    }

    #[must_use]
    pub fn default_row_limit_byte_size(&self) -> u64 {
        self.default_row_limit_byte_size
    }

    #[must_use]
    pub fn include_customer_detail_in_reason(&self) -> bool {
        self.include_customer_detail_in_reason
    }

    #[must_use]
    pub fn max_inbound_message_size(&self) -> usize {
        self.max_inbound_message_size
    }

    #[must_use]
    pub fn keepalive(&self) -> Keepalive {
        self.keepalive
    }
}

/// Builder for [`Config`], modeled on the fallible builders used throughout
/// the connection-options layer: unknown or out-of-range fixed fields fail
/// fast at `build()` with the offending field named in the error.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    query_timeout: Duration,
    local_enforcement_grace: Duration,
    network_timeout: Option<Duration>,
    max_inbound_message_size: usize,
    initial_flow_credit: u32,
    keepalive: Keepalive,
    query_settings: HashMap<String, String>,
    default_row_limit_byte_size: u64,
    include_customer_detail_in_reason: bool,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self {
            query_timeout: Duration::ZERO,
            local_enforcement_grace: Duration::from_secs(5),
            network_timeout: None,
            max_inbound_message_size: MIN_INBOUND_MESSAGE_SIZE,
            initial_flow_credit: 16,
            keepalive: Keepalive::default(),
            query_settings: HashMap::new(),
            default_row_limit_byte_size: HYPER_MAX_ROW_LIMIT_BYTE_SIZE,
            include_customer_detail_in_reason: false,
        }
    }
}

impl ConfigBuilder {
    #[must_use]
    pub fn query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    #[must_use]
    pub fn local_enforcement_grace(mut self, grace: Duration) -> Self {
        self.local_enforcement_grace = grace;
        self
    }

    #[must_use]
    pub fn network_timeout(mut self, timeout: Duration) -> Self {
        self.network_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn max_inbound_message_size(mut self, bytes: usize) -> Self {
        self.max_inbound_message_size = bytes;
        self
    }

    #[must_use]
    pub fn initial_flow_credit(mut self, credit: u32) -> Self {
        self.initial_flow_credit = credit;
        self
    }

    #[must_use]
    pub fn keepalive(mut self, keepalive: Keepalive) -> Self {
        self.keepalive = keepalive;
        self
    }

    #[must_use]
    pub fn query_setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_settings.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn default_row_limit_byte_size(mut self, bytes: u64) -> Self {
        self.default_row_limit_byte_size = bytes;
        self
    }

    #[must_use]
    pub fn include_customer_detail_in_reason(mut self, include: bool) -> Self {
        self.include_customer_detail_in_reason = include;
        self
    }

    pub fn build(self) -> Result<Config, Error> {
        if let Some(network_timeout) = self.network_timeout {
            if self.query_timeout != Duration::ZERO && network_timeout > self.query_timeout {
                return Err(Error::InvalidArgument(format!(
                    "network_timeout ({network_timeout:?}) must not exceed query_timeout ({:?})",
                    self.query_timeout
                )));
            }
        }

        if !(HYPER_MIN_ROW_LIMIT_BYTE_SIZE..=HYPER_MAX_ROW_LIMIT_BYTE_SIZE)
            .contains(&self.default_row_limit_byte_size)
        {
            return Err(Error::InvalidArgument(format!(
                "default_row_limit_byte_size must be within [{HYPER_MIN_ROW_LIMIT_BYTE_SIZE}, {HYPER_MAX_ROW_LIMIT_BYTE_SIZE}], got {}",
                self.default_row_limit_byte_size
            )));
        }

        if self.max_inbound_message_size < MIN_INBOUND_MESSAGE_SIZE {
            return Err(Error::InvalidArgument(format!(
                "max_inbound_message_size must be at least {MIN_INBOUND_MESSAGE_SIZE}, got {}",
                self.max_inbound_message_size
            )));
        }

        Ok(Config {
            query_timeout: self.query_timeout,
            local_enforcement_grace: self.local_enforcement_grace,
            network_timeout: self.network_timeout,
            max_inbound_message_size: self.max_inbound_message_size,
            initial_flow_credit: self.initial_flow_credit,
            keepalive: self.keepalive,
            query_settings: self.query_settings,
            default_row_limit_byte_size: self.default_row_limit_byte_size,
            include_customer_detail_in_reason: self.include_customer_detail_in_reason,
        })
    }
}

/// Validates a caller-supplied byte cap for a row-range fetch against the
/// fixed protocol bounds, before any RPC is issued.
pub(crate) fn validate_row_limit_byte_size(byte_limit: u64) -> Result<(), Error> {
    if (HYPER_MIN_ROW_LIMIT_BYTE_SIZE..=HYPER_MAX_ROW_LIMIT_BYTE_SIZE).contains(&byte_limit) {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!(
            "row limit byte size must be within [{HYPER_MIN_ROW_LIMIT_BYTE_SIZE}, {HYPER_MAX_ROW_LIMIT_BYTE_SIZE}], got {byte_limit}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_succeeds_with_defaults() {
        let cfg = Config::builder().build().expect("defaults are valid");
        assert_eq!(cfg.initial_flow_credit(), 16);
    }

    #[test]
    fn build_rejects_byte_size_out_of_range() {
        let err = Config::builder()
            .default_row_limit_byte_size(1)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn build_rejects_network_timeout_exceeding_query_timeout() {
        let err = Config::builder()
            .query_timeout(Duration::from_secs(1))
            .network_timeout(Duration::from_secs(5))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn validate_row_limit_accepts_bounds() {
        assert!(validate_row_limit_byte_size(HYPER_MIN_ROW_LIMIT_BYTE_SIZE).is_ok());
        assert!(validate_row_limit_byte_size(HYPER_MAX_ROW_LIMIT_BYTE_SIZE).is_ok());
        assert!(validate_row_limit_byte_size(HYPER_MIN_ROW_LIMIT_BYTE_SIZE - 1).is_err());
    }
}
