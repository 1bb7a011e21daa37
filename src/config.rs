//! Client configuration: the ambient settings surface a host program fills
//! in and hands to the session controller. No CLI/env parsing lives here;
//! that is left to the surrounding host program.

use crate::topics::{DEFAULT_HOST, DEFAULT_PORT_PLAIN, DEFAULT_PORT_TLS};

/// Keepalive interval MQTT CONNECT advertises, in seconds.
pub const DEFAULT_KEEPALIVE_SECS: u16 = 60;
/// Backoff between reconnect attempts.
pub const DEFAULT_RECONNECT_BACKOFF_SECS: u64 = 5;
/// Timeout passed to each MQTT yield call.
pub const DEFAULT_YIELD_TIMEOUT_MS: u32 = 100;

/// Broker configuration plus device identity, filled in before `connect`.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    pub device_id: String,
    pub namespace: String,
    pub apikey_hi: u64,
    pub apikey_lo: u64,
    pub keepalive_secs: u16,
    pub reconnect_backoff_secs: u64,
    pub yield_timeout_ms: u32,
    pub resource_retry_limit: u8,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT_PLAIN,
            use_tls: false,
            device_id: String::new(),
            namespace: String::new(),
            apikey_hi: 0,
            apikey_lo: 0,
            keepalive_secs: DEFAULT_KEEPALIVE_SECS,
            reconnect_backoff_secs: DEFAULT_RECONNECT_BACKOFF_SECS,
            yield_timeout_ms: DEFAULT_YIELD_TIMEOUT_MS,
            resource_retry_limit: crate::resource::MAX_RETRIES,
        }
    }
}

impl ClientConfig {
    pub fn new(device_id: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// Switch to the TLS port unless the caller already picked one explicitly.
    pub fn with_tls(mut self) -> Self {
        self.use_tls = true;
        if self.port == DEFAULT_PORT_PLAIN {
            self.port = DEFAULT_PORT_TLS;
        }
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_api_key(mut self, hi: u64, lo: u64) -> Self {
        self.apikey_hi = hi;
        self.apikey_lo = lo;
        self
    }

    pub fn with_keepalive_secs(mut self, secs: u16) -> Self {
        self.keepalive_secs = secs;
        self
    }
}
