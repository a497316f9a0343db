use std::fmt;
use std::sync::Arc;

use hostmux_frame::{Close, ControlMessage, Logout};
use hostmux_transport::Connector;
use parking_lot::Mutex;
use serde_json::Map;
use tracing::debug;

use crate::channel::{Channel, ChannelOptions};
use crate::config::TransportConfig;
use crate::error::Result;
use crate::page::PageSignals;
use crate::session::SessionInfo;
use crate::transport::Transport;

type TransportFactory = dyn Fn(TransportConfig, SessionInfo) -> Transport + Send + Sync;

/// Holds the session's live [`Transport`], creating a new one whenever none
/// exists or the held one has closed.
///
/// Clones share the same transport, configuration and session info.
#[derive(Clone)]
pub struct TransportManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    endpoint: String,
    factory: Box<TransportFactory>,
    config: TransportConfig,
    session: SessionInfo,
    current: Mutex<Option<Transport>>,
}

impl TransportManager {
    /// Create a manager. No connection is made until first use.
    pub fn new<C: Connector>(connector: C, config: TransportConfig) -> Self {
        let endpoint = connector.endpoint().to_string();
        let connector = Arc::new(connector);
        let factory = move |config: TransportConfig, session: SessionInfo| {
            Transport::connect(connector.clone(), config, session)
        };
        Self {
            inner: Arc::new(ManagerInner {
                endpoint,
                factory: Box::new(factory),
                config,
                session: SessionInfo::new(),
                current: Mutex::new(None),
            }),
        }
    }

    /// The live transport, connecting a new one if needed.
    pub fn transport(&self) -> Transport {
        let mut current = self.inner.current.lock();
        if let Some(transport) = current.as_ref().filter(|transport| !transport.is_closed()) {
            return transport.clone();
        }

        debug!(endpoint = %self.inner.endpoint, "creating transport");
        let transport = (self.inner.factory)(self.inner.config.clone(), self.inner.session.clone());
        *current = Some(transport.clone());
        transport
    }

    /// The live transport once it is ready.
    pub async fn ensure(&self) -> Result<Transport> {
        let transport = self.transport();
        transport.ready().await?;
        Ok(transport)
    }

    /// Open a channel on the live transport.
    pub fn channel(&self, options: ChannelOptions) -> Channel {
        Channel::open(self.transport(), options)
    }

    /// Tear down the live transport, if any. The next use reconnects.
    pub fn close(&self, reason: Option<&str>) {
        let current = self.inner.current.lock().take();
        if let Some(transport) = current {
            transport.close(reason.map(Close::with_reason));
        }
    }

    /// End the session. With `reload`, a page reload is requested once the
    /// backend drops the connection.
    pub async fn logout(&self, reload: bool) -> Result<()> {
        if reload {
            self.inner.config.signals.set_reload_after_disconnect();
        }
        self.send_logout(true).await
    }

    /// Give up administrative privileges but keep the session.
    pub async fn drop_privileges(&self) -> Result<()> {
        self.send_logout(false).await
    }

    async fn send_logout(&self, disconnect: bool) -> Result<()> {
        let transport = self.ensure().await?;
        transport.send_control(&ControlMessage::Logout(Logout {
            disconnect,
            extra: Map::new(),
        }));
        Ok(())
    }

    pub fn session(&self) -> &SessionInfo {
        &self.inner.session
    }

    pub fn signals(&self) -> &Arc<PageSignals> {
        &self.inner.config.signals
    }

    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }
}

impl fmt::Debug for TransportManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportManager")
            .field("endpoint", &self.inner.endpoint)
            .field("current", &*self.inner.current.lock())
            .field("config", &self.inner.config)
            .finish()
    }
}
