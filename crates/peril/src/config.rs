//! Engine configuration.

use std::time::Duration;

use peril_protocol::routing::EXCHANGE_PERIL_DLX;

/// Default number of unacknowledged deliveries per subscription.
pub const DEFAULT_PREFETCH: u16 = 10;

// ---------------------------------------------------------------------------
// PerilConfig
// ---------------------------------------------------------------------------

/// Settings shared by every subscription a client or server opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerilConfig {
    /// QoS prefetch per subscription channel. 0 means unlimited.
    pub prefetch: u16,

    /// Upper bound on one handler call. `None` lets handlers run as long
    /// as they like; a handler that exceeds the bound has its delivery
    /// requeued.
    pub handler_timeout: Option<Duration>,

    /// Exchange named in `x-dead-letter-exchange` on durable queues.
    pub dead_letter_exchange: String,
}

impl Default for PerilConfig {
    fn default() -> Self {
        Self {
            prefetch: DEFAULT_PREFETCH,
            handler_timeout: None,
            dead_letter_exchange: EXCHANGE_PERIL_DLX.to_string(),
        }
    }
}

impl PerilConfig {
    pub fn builder() -> PerilConfigBuilder {
        PerilConfigBuilder::default()
    }

    /// Per-subscription options derived from this config.
    pub fn subscribe_options(&self) -> SubscribeOptions {
        SubscribeOptions {
            prefetch: self.prefetch,
            handler_timeout: self.handler_timeout,
        }
    }
}

/// Builder for [`PerilConfig`].
///
/// ```rust
/// use std::time::Duration;
/// use peril::PerilConfig;
///
/// let config = PerilConfig::builder()
///     .prefetch(1)
///     .handler_timeout(Duration::from_secs(5))
///     .build();
/// assert_eq!(config.prefetch, 1);
/// assert_eq!(config.dead_letter_exchange, "peril_dlx");
/// ```
#[derive(Debug, Clone, Default)]
pub struct PerilConfigBuilder {
    config: PerilConfig,
}

impl PerilConfigBuilder {
    pub fn prefetch(mut self, prefetch: u16) -> Self {
        self.config.prefetch = prefetch;
        self
    }

    pub fn handler_timeout(mut self, timeout: Duration) -> Self {
        self.config.handler_timeout = Some(timeout);
        self
    }

    pub fn dead_letter_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.config.dead_letter_exchange = exchange.into();
        self
    }

    pub fn build(self) -> PerilConfig {
        self.config
    }
}

// ---------------------------------------------------------------------------
// SubscribeOptions
// ---------------------------------------------------------------------------

/// Options for one [`subscribe`](crate::subscribe()) call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribeOptions {
    pub prefetch: u16,
    pub handler_timeout: Option<Duration>,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        PerilConfig::default().subscribe_options()
    }
}
