use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use hostmux_frame::{reasons, Close, ControlMessage, Open};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::error::{ChannelError, Result};
use crate::transport::{ChannelHandler, Transport};

/// Options of the `open` request for a channel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelOptions {
    /// Payload type the backend should serve (`stream`, `text-stream`, ...).
    pub payload: Option<String>,
    /// Target machine. Resolved by the transport's host resolver when absent.
    pub host: Option<String>,
    /// Further options, sent verbatim.
    pub extra: Map<String, Value>,
}

impl ChannelOptions {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: Some(payload.into()),
            ..Self::default()
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    fn to_open(&self, channel: String, default_host: Option<String>) -> Open {
        let mut options = Map::new();
        if let Some(payload) = &self.payload {
            options.insert("payload".to_string(), Value::String(payload.clone()));
        }
        for (key, value) in &self.extra {
            if key != "command" && key != "channel" && key != "host" {
                options.insert(key.clone(), value.clone());
            }
        }
        // A string `host` among the extra options counts as an explicit host.
        let host = self
            .host
            .clone()
            .or_else(|| self.extra.get("host").and_then(Value::as_str).map(str::to_owned))
            .or(default_host);
        Open {
            channel,
            host,
            options,
        }
    }
}

/// Something that happened on a channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// A payload from the backend.
    Message(String),
    /// The channel closed, locally or remotely. Always the last event.
    Close(Close),
}

#[derive(Debug, Clone, PartialEq)]
enum Opening {
    Pending,
    Open(String),
    Failed(Close),
}

/// A logical stream multiplexed over the session's transport.
///
/// The channel is valid as soon as it is created; it is registered and the
/// `open` request is sent once the transport is ready. Payloads sent before
/// that are queued and flushed in order. Dropping a valid channel closes it.
pub struct Channel {
    inner: Arc<ChannelInner>,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
}

struct ChannelInner {
    options: ChannelOptions,
    opening: watch::Sender<Opening>,
    state: Mutex<ChannelState>,
}

struct ChannelState {
    id: Option<String>,
    valid: bool,
    queue: VecDeque<String>,
    transport: Option<Transport>,
    events: Option<mpsc::UnboundedSender<ChannelEvent>>,
}

impl Channel {
    /// Open a channel on `transport`, registering it once the transport is
    /// ready. Must be called from within a Tokio runtime.
    pub fn open(transport: Transport, options: ChannelOptions) -> Self {
        let (events_tx, events) = mpsc::unbounded_channel();
        let inner = Arc::new(ChannelInner {
            options,
            opening: watch::channel(Opening::Pending).0,
            state: Mutex::new(ChannelState {
                id: None,
                valid: true,
                queue: VecDeque::new(),
                transport: None,
                events: Some(events_tx),
            }),
        });

        tokio::spawn(attach(inner.clone(), transport));
        Self { inner, events }
    }

    /// Id assigned at registration, `None` before.
    pub fn id(&self) -> Option<String> {
        self.inner.state.lock().id.clone()
    }

    pub fn is_valid(&self) -> bool {
        self.inner.state.lock().valid
    }

    pub fn options(&self) -> &ChannelOptions {
        &self.inner.options
    }

    /// Send a payload. Queued until the channel is registered; dropped with
    /// a warning once the channel is closed.
    pub fn send(&self, payload: impl Into<String>) {
        let payload = payload.into();
        let mut state = self.inner.state.lock();
        if !state.valid {
            warn!(
                channel = %describe(&state, &self.inner.options),
                "sending message on closed channel"
            );
            return;
        }
        match (&state.transport, &state.id) {
            (Some(transport), Some(id)) => transport.send_message(id, &payload),
            _ => state.queue.push_back(payload),
        }
    }

    /// Close the channel. Accepts a [`Close`] or a plain reason string.
    ///
    /// The first call sends `close` to the backend (if the channel is
    /// registered) and emits the local close event. Later calls do nothing.
    pub fn close(&self, options: impl Into<Close>) {
        self.inner.close_local(options.into());
    }

    /// Wait for the channel to be registered. Returns its id, or the close
    /// that happened first.
    pub async fn opened(&self) -> Result<String> {
        let mut opening = self.inner.opening.subscribe();
        let outcome = match opening
            .wait_for(|opening| !matches!(opening, Opening::Pending))
            .await
        {
            Ok(outcome) => (*outcome).clone(),
            Err(_) => Opening::Failed(Close::default()),
        };
        match outcome {
            Opening::Open(id) => Ok(id),
            Opening::Failed(close) => Err(ChannelError::Closed(close)),
            Opening::Pending => Err(ChannelError::Closed(Close::default())),
        }
    }

    /// Next event. `None` after the close event has been returned.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }
}

impl Stream for Channel {
    type Item = ChannelEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().events.poll_recv(cx)
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.inner.close_local(Close::default());
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.write_str(&describe(&state, &self.inner.options))
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Channel")
            .field("id", &state.id)
            .field("valid", &state.valid)
            .field("queued", &state.queue.len())
            .field("options", &self.inner.options)
            .finish()
    }
}

fn describe(state: &ChannelState, options: &ChannelOptions) -> String {
    let host = options.host.as_deref().unwrap_or("localhost");
    match (&state.id, state.valid) {
        (Some(id), true) => format!("[Channel {id} -> {host}]"),
        (None, true) => format!("[Channel <pending> -> {host}]"),
        (_, false) => format!("[Channel <invalid> -> {host}]"),
    }
}

impl ChannelInner {
    fn emit(state: &mut ChannelState, event: ChannelEvent) {
        let last = matches!(event, ChannelEvent::Close(_));
        if let Some(events) = &state.events {
            let _ = events.send(event);
        }
        if last {
            state.events = None;
        }
    }

    fn fail_opening(&self, close: &Close) {
        self.opening.send_if_modified(|opening| {
            if *opening == Opening::Pending {
                *opening = Opening::Failed(close.clone());
                true
            } else {
                false
            }
        });
    }

    fn close_local(&self, mut close: Close) {
        let mut state = self.state.lock();
        if !state.valid {
            return;
        }
        state.valid = false;
        state.queue.clear();
        close.channel = state.id.clone();

        if let (Some(transport), Some(id)) = (&state.transport, &state.id) {
            transport.send_control(&ControlMessage::Close(close.clone()));
            transport.unregister(id);
        }
        debug!(channel = ?state.id, reason = %close, "channel closed");
        Self::emit(&mut state, ChannelEvent::Close(close.clone()));
        drop(state);

        self.fail_opening(&close);
    }

    fn close_remote(&self, close: &Close) {
        let mut state = self.state.lock();
        if !state.valid {
            return;
        }
        state.valid = false;
        state.queue.clear();

        if let (Some(transport), Some(id)) = (&state.transport, &state.id) {
            transport.unregister(id);
        }
        debug!(channel = ?state.id, reason = %close, "channel closed by backend");
        Self::emit(&mut state, ChannelEvent::Close(close.clone()));
        drop(state);

        self.fail_opening(close);
    }

    async fn cancelled(&self) {
        let mut opening = self.opening.subscribe();
        let _ = opening
            .wait_for(|opening| matches!(opening, Opening::Failed(_)))
            .await;
    }
}

impl ChannelHandler for ChannelInner {
    fn on_control(&self, message: &ControlMessage) {
        match message {
            ControlMessage::Close(close) => self.close_remote(close),
            other => warn!(
                channel = ?self.state.lock().id,
                command = other.command(),
                "unhandled control message"
            ),
        }
    }

    fn on_message(&self, payload: &str) {
        let mut state = self.state.lock();
        if state.valid {
            Self::emit(&mut state, ChannelEvent::Message(payload.to_string()));
        }
    }
}

/// Register the channel once the transport is ready, then send `open` and
/// flush the queue.
async fn attach(inner: Arc<ChannelInner>, transport: Transport) {
    let ready = tokio::select! {
        result = transport.ready() => result,
        _ = inner.cancelled() => return,
    };
    if let Err(err) = ready {
        let close = match err {
            ChannelError::Closed(close) => close,
            other => Close::with_reason(other.to_string()),
        };
        inner.close_remote(&close);
        return;
    }

    let mut state = inner.state.lock();
    if !state.valid {
        return;
    }

    let id = transport.next_channel();
    let handler: Arc<dyn ChannelHandler> = inner.clone();
    if !transport.register(id.clone(), handler) {
        drop(state);
        let close = transport
            .close_reason()
            .unwrap_or_else(|| Close::with_reason(reasons::DISCONNECTED));
        inner.close_remote(&close);
        return;
    }

    let open = inner.options.to_open(id.clone(), transport.default_host());
    transport.send_control(&ControlMessage::Open(open));
    while let Some(payload) = state.queue.pop_front() {
        transport.send_message(&id, &payload);
    }
    debug!(channel = %id, "channel opened");

    state.id = Some(id.clone());
    state.transport = Some(transport);
    drop(state);

    inner.opening.send_if_modified(|opening| {
        if *opening == Opening::Pending {
            *opening = Opening::Open(id);
            true
        } else {
            false
        }
    });
}
