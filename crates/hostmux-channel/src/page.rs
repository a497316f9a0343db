//! Collaborators supplied by the page hosting the console: its location
//! (for default channel hosts) and its lifecycle flags.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use percent_encoding::percent_decode_str;
use tokio::sync::watch;

/// Resolves the host a channel targets when its options name none.
pub trait HostResolver: Send + Sync {
    fn default_host(&self) -> Option<String>;
}

impl<F> HostResolver for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn default_host(&self) -> Option<String> {
        self()
    }
}

/// Parameters of one page in the location fragment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageParams {
    pub page: String,
    pub params: Vec<(String, String)>,
}

impl PageParams {
    /// Value of `key`. A repeated key yields its last value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .rev()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }
}

/// The page URL, with its fragment parsed as a trail of page parameters.
///
/// A fragment such as `#server?machine=db1&network-interface?dev=eth0`
/// yields two entries: `server` with `machine=db1`, then
/// `network-interface` with `dev=eth0`. Names and values are
/// percent-decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLocation {
    href: String,
    trail: Vec<PageParams>,
}

impl PageLocation {
    pub fn parse(href: impl Into<String>) -> Self {
        let href = href.into();
        let fragment = href.split_once('#').map(|(_, hash)| hash).unwrap_or("");
        let trail = fragment.split('&').map(parse_page).collect();
        Self { href, trail }
    }

    pub fn href(&self) -> &str {
        &self.href
    }

    pub fn trail(&self) -> &[PageParams] {
        &self.trail
    }

    /// Look up `key` in the last page of the trail, or in the last page
    /// named `page` when one is given.
    pub fn param(&self, key: &str, page: Option<&str>) -> Option<&str> {
        let entry = match page {
            Some(page) => self.trail.iter().rev().find(|entry| entry.page == page)?,
            None => self.trail.last()?,
        };
        entry.get(key)
    }
}

impl HostResolver for PageLocation {
    fn default_host(&self) -> Option<String> {
        self.param("machine", Some("server")).map(str::to_owned)
    }
}

fn parse_page(location: &str) -> PageParams {
    let mut parts = location.split('?');
    let page = decode(parts.next().unwrap_or_default());
    let params = parts
        .map(|pair| match pair.split_once('=') {
            Some((name, value)) => (decode(name), decode(value)),
            None => (decode(pair), String::new()),
        })
        .collect();
    PageParams { page, params }
}

fn decode(text: &str) -> String {
    percent_decode_str(text).decode_utf8_lossy().into_owned()
}

/// Page lifecycle flags consulted when the socket goes away.
pub struct PageSignals {
    expect_disconnect: AtomicBool,
    reload_after_disconnect: AtomicBool,
    reload: watch::Sender<bool>,
}

impl PageSignals {
    /// The page is unloading; a lost socket is not an error.
    pub fn before_unload(&self) {
        self.expect_disconnect.store(true, Ordering::SeqCst);
    }

    pub fn disconnect_expected(&self) -> bool {
        self.expect_disconnect.load(Ordering::SeqCst)
    }

    /// Ask for a page reload once the socket closes (after logout).
    pub fn set_reload_after_disconnect(&self) {
        self.reload_after_disconnect.store(true, Ordering::SeqCst);
    }

    pub fn reload_after_disconnect(&self) -> bool {
        self.reload_after_disconnect.load(Ordering::SeqCst)
    }

    /// Whether a reload has been requested.
    pub fn reload_requested(&self) -> bool {
        *self.reload.borrow()
    }

    /// Observe reload requests.
    pub fn subscribe_reload(&self) -> watch::Receiver<bool> {
        self.reload.subscribe()
    }

    /// Called when the socket closed. Returns true when the closure was
    /// expected and must not be reported to channels.
    pub(crate) fn socket_closed(&self) -> bool {
        if self.reload_after_disconnect() {
            self.before_unload();
            self.reload.send_replace(true);
        }
        self.disconnect_expected()
    }
}

impl Default for PageSignals {
    fn default() -> Self {
        Self {
            expect_disconnect: AtomicBool::new(false),
            reload_after_disconnect: AtomicBool::new(false),
            reload: watch::channel(false).0,
        }
    }
}

impl fmt::Debug for PageSignals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageSignals")
            .field("expect_disconnect", &self.disconnect_expected())
            .field("reload_after_disconnect", &self.reload_after_disconnect())
            .field("reload_requested", &self.reload_requested())
            .finish()
    }
}
