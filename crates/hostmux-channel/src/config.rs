use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use hostmux_frame::PROTOCOL_VERSION;

use crate::page::{HostResolver, PageSignals};

/// Default period of the transport health check.
pub const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(10);

/// Shortest accepted health-check period.
pub(crate) const MIN_HEALTH_INTERVAL: Duration = Duration::from_millis(100);

/// Configuration shared by every transport a manager creates.
#[derive(Clone)]
pub struct TransportConfig {
    /// Protocol version sent in, and required of, the `init` handshake.
    pub protocol_version: u32,
    /// The transport closes with `"timeout"` when a whole period passes
    /// without an incoming frame.
    pub health_interval: Duration,
    /// Supplies the `host` of channels whose options name none.
    pub host_resolver: Option<Arc<dyn HostResolver>>,
    /// Page lifecycle flags consulted when the socket goes away.
    pub signals: Arc<PageSignals>,
}

impl TransportConfig {
    pub fn with_health_interval(mut self, interval: Duration) -> Self {
        self.health_interval = interval;
        self
    }

    pub fn with_host_resolver(mut self, resolver: impl HostResolver + 'static) -> Self {
        self.host_resolver = Some(Arc::new(resolver));
        self
    }

    pub fn with_signals(mut self, signals: Arc<PageSignals>) -> Self {
        self.signals = signals;
        self
    }

    /// Host for a channel whose options do not name one.
    pub fn default_host(&self) -> Option<String> {
        self.host_resolver
            .as_ref()
            .and_then(|resolver| resolver.default_host())
    }

    pub(crate) fn health_period(&self) -> Duration {
        self.health_interval.max(MIN_HEALTH_INTERVAL)
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            health_interval: DEFAULT_HEALTH_INTERVAL,
            host_resolver: None,
            signals: Arc::new(PageSignals::default()),
        }
    }
}

impl fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportConfig")
            .field("protocol_version", &self.protocol_version)
            .field("health_interval", &self.health_interval)
            .field("host_resolver", &self.host_resolver.is_some())
            .field("signals", &self.signals)
            .finish()
    }
}
