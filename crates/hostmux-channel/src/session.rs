use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::watch;

/// User and system details announced by the backend in `init`.
///
/// Shared by every transport of a manager. Each `init` shallow-merges its
/// `user` and `system` objects into the current values; subscribers are
/// notified only for the objects the message carried.
#[derive(Clone)]
pub struct SessionInfo {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    user: watch::Sender<Map<String, Value>>,
    system: watch::Sender<Map<String, Value>>,
}

impl SessionInfo {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SessionInner {
                user: watch::channel(Map::new()).0,
                system: watch::channel(Map::new()).0,
            }),
        }
    }

    pub fn user(&self) -> Map<String, Value> {
        self.inner.user.borrow().clone()
    }

    pub fn system(&self) -> Map<String, Value> {
        self.inner.system.borrow().clone()
    }

    pub fn subscribe_user(&self) -> watch::Receiver<Map<String, Value>> {
        self.inner.user.subscribe()
    }

    pub fn subscribe_system(&self) -> watch::Receiver<Map<String, Value>> {
        self.inner.system.subscribe()
    }

    pub(crate) fn merge_user(&self, update: Map<String, Value>) {
        merge(&self.inner.user, update);
    }

    pub(crate) fn merge_system(&self, update: Map<String, Value>) {
        merge(&self.inner.system, update);
    }
}

fn merge(target: &watch::Sender<Map<String, Value>>, update: Map<String, Value>) {
    target.send_modify(|current| current.extend(update));
}

impl Default for SessionInfo {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SessionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionInfo")
            .field("user", &*self.inner.user.borrow())
            .field("system", &*self.inner.system.borrow())
            .finish()
    }
}
