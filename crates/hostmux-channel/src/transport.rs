use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use hostmux_frame::{
    decode_frame, encode_control, encode_frame, reasons, Close, ControlMessage, Frame, Init,
    CONTROL, COMMAND_CLOSE,
};
use hostmux_transport::{Connector, Socket};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, trace, warn};

use crate::config::TransportConfig;
use crate::error::{ChannelError, Result};
use crate::handshake::{accept_init, init_request};
use crate::session::SessionInfo;

/// Lifecycle of a [`Transport`]. Phases only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    /// The socket is being opened.
    Connecting,
    /// `init` was sent; waiting for the backend's `init`.
    WaitingForInit,
    /// Handshake complete; channels may open.
    Ready,
    /// Terminal. A closed transport never reconnects.
    Closed,
}

/// Receives the traffic of one registered channel.
///
/// Called from the transport's driver task, never with transport state
/// locked. Implementations must not block.
pub trait ChannelHandler: Send + Sync {
    /// A control message addressed to this channel, or broadcast to all.
    fn on_control(&self, message: &ControlMessage);

    /// A data payload for this channel.
    fn on_message(&self, payload: &str);
}

enum Outbound {
    Frame(String),
    Shutdown,
}

/// One multiplexed connection to the backend.
///
/// Cheap to clone; every clone refers to the same connection. A background
/// driver task owns the socket, so [`Transport::connect`] must be called
/// from within a Tokio runtime.
#[derive(Clone)]
pub struct Transport {
    shared: Arc<Shared>,
}

struct Shared {
    endpoint: String,
    config: TransportConfig,
    session: SessionInfo,
    phase: watch::Sender<Phase>,
    stopped: watch::Sender<bool>,
    outbound: mpsc::UnboundedSender<Outbound>,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    last_channel: u64,
    seed: Option<String>,
    handlers: HashMap<String, Arc<dyn ChannelHandler>>,
    close: Option<Close>,
}

impl Transport {
    /// Start connecting. Returns immediately in [`Phase::Connecting`].
    pub fn connect<C: Connector>(
        connector: Arc<C>,
        config: TransportConfig,
        session: SessionInfo,
    ) -> Self {
        let (outbound, queue) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            endpoint: connector.endpoint().to_string(),
            config,
            session,
            phase: watch::channel(Phase::Connecting).0,
            stopped: watch::channel(false).0,
            outbound,
            state: Mutex::new(State::default()),
        });

        debug!(endpoint = %shared.endpoint, "connecting");
        tokio::spawn(drive(shared.clone(), connector, queue));
        Self { shared }
    }

    pub fn endpoint(&self) -> &str {
        &self.shared.endpoint
    }

    pub fn phase(&self) -> Phase {
        self.shared.current()
    }

    pub fn is_ready(&self) -> bool {
        self.phase() == Phase::Ready
    }

    pub fn is_closed(&self) -> bool {
        self.phase() == Phase::Closed
    }

    /// Observe phase changes.
    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.shared.phase.subscribe()
    }

    /// Wait until the handshake completes.
    ///
    /// Fails with the close that ended the transport if it closes first, or
    /// has already closed.
    pub async fn ready(&self) -> Result<()> {
        let mut phases = self.subscribe();
        match wait_for_phase(&mut phases, |phase| *phase >= Phase::Ready).await {
            Phase::Ready => Ok(()),
            _ => Err(ChannelError::Closed(self.shared.close_reason())),
        }
    }

    /// Wait until the transport closes and return why.
    pub async fn closed(&self) -> Close {
        let mut phases = self.subscribe();
        wait_for_phase(&mut phases, |phase| *phase == Phase::Closed).await;
        self.shared.close_reason()
    }

    /// Wait until the driver task has flushed its queue and released the
    /// socket. Only happens after the transport closed.
    pub async fn finished(&self) {
        let mut stopped = self.shared.stopped.subscribe();
        let _ = stopped.wait_for(|stopped| *stopped).await;
    }

    /// Why the transport closed, or `None` while it is open.
    pub fn close_reason(&self) -> Option<Close> {
        self.shared.state.lock().close.clone()
    }

    /// Seed assigned by the backend in `init`, if any.
    pub fn channel_seed(&self) -> Option<String> {
        self.shared.state.lock().seed.clone()
    }

    /// Allocate a fresh channel id: a counter, plus `":" + seed` once the
    /// backend has assigned a seed.
    pub fn next_channel(&self) -> String {
        let mut state = self.shared.state.lock();
        state.last_channel += 1;
        match &state.seed {
            Some(seed) => format!("{}:{seed}", state.last_channel),
            None => state.last_channel.to_string(),
        }
    }

    /// Route traffic for `channel` to `handler`, replacing any previous one.
    ///
    /// Returns false, registering nothing, once the transport has closed.
    pub fn register(&self, channel: impl Into<String>, handler: Arc<dyn ChannelHandler>) -> bool {
        let mut state = self.shared.state.lock();
        if state.close.is_some() {
            return false;
        }
        state.handlers.insert(channel.into(), handler);
        true
    }

    pub fn unregister(&self, channel: &str) {
        self.shared.state.lock().handlers.remove(channel);
    }

    /// Queue a data frame. Dropped with a warning once the transport closed.
    pub fn send_message(&self, channel: &str, payload: &str) {
        self.shared.send_message(channel, payload);
    }

    /// Queue a control frame. A `close` on a closed transport is dropped
    /// silently.
    pub fn send_control(&self, message: &ControlMessage) {
        if self.is_closed() && message.command() == COMMAND_CLOSE {
            return;
        }
        match encode_control(message) {
            Ok(frame) => self.shared.queue(CONTROL, frame),
            Err(err) => error!(
                endpoint = %self.shared.endpoint,
                command = message.command(),
                error = %err,
                "failed to encode control message"
            ),
        }
    }

    /// Close the transport.
    ///
    /// The first call closes the socket after flushing frames already queued
    /// and fails pending [`Transport::ready`] calls. Every call broadcasts a
    /// `close` with `options` to the registered channels. Without options
    /// the reason is `"disconnected"`.
    pub fn close(&self, options: Option<Close>) {
        self.shared.close(options);
    }

    pub fn session(&self) -> &SessionInfo {
        &self.shared.session
    }

    pub fn config(&self) -> &TransportConfig {
        &self.shared.config
    }

    /// Host for a channel whose options name none.
    pub fn default_host(&self) -> Option<String> {
        self.shared.config.default_host()
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("endpoint", &self.shared.endpoint)
            .field("phase", &self.phase())
            .finish()
    }
}

impl Shared {
    fn current(&self) -> Phase {
        *self.phase.borrow()
    }

    fn advance(&self, next: Phase) -> bool {
        self.phase.send_if_modified(|phase| {
            if *phase < next {
                *phase = next;
                true
            } else {
                false
            }
        })
    }

    fn close_reason(&self) -> Close {
        self.state
            .lock()
            .close
            .clone()
            .unwrap_or_else(|| Close::with_reason(reasons::DISCONNECTED))
    }

    fn send_message(&self, channel: &str, payload: &str) {
        if self.current() == Phase::Closed {
            warn!(
                endpoint = %self.endpoint,
                channel,
                len = payload.len(),
                "transport closed, dropped message"
            );
            return;
        }
        self.queue(channel, encode_frame(channel, payload));
    }

    fn queue(&self, channel: &str, frame: String) {
        if self.current() == Phase::Closed {
            warn!(endpoint = %self.endpoint, channel, "transport closed, dropped frame");
            return;
        }
        trace!(endpoint = %self.endpoint, channel, len = frame.len(), "send");
        if self.outbound.send(Outbound::Frame(frame)).is_err() {
            warn!(endpoint = %self.endpoint, channel, "transport driver gone, dropped frame");
        }
    }

    /// Enter `Closed` and stop the driver. Returns false if already closed.
    fn finish(&self, close: Close) -> bool {
        {
            let mut state = self.state.lock();
            if state.close.is_some() {
                return false;
            }
            state.close = Some(close);
        }
        self.phase.send_replace(Phase::Closed);
        let _ = self.outbound.send(Outbound::Shutdown);
        true
    }

    fn close(&self, options: Option<Close>) {
        let close = options.unwrap_or_else(|| Close::with_reason(reasons::DISCONNECTED));
        if self.finish(close.clone()) {
            debug!(endpoint = %self.endpoint, reason = %close, "transport closed");
        }
        self.dispatch(&ControlMessage::Close(close));
    }

    fn protocol_error(&self) {
        self.close(Some(Close::with_reason(reasons::PROTOCOL_ERROR)));
    }

    fn socket_closed(&self) {
        if self.current() == Phase::Closed {
            return;
        }
        if self.config.signals.socket_closed() {
            debug!(endpoint = %self.endpoint, "socket closed, disconnect was expected");
            self.finish(Close::with_reason(reasons::DISCONNECTED));
            return;
        }
        self.close(None);
    }

    fn process_frame(&self, raw: &str) {
        if self.current() == Phase::Closed {
            trace!(endpoint = %self.endpoint, "transport closed, ignored frame");
            return;
        }

        let frame = match decode_frame(raw) {
            Ok(frame) => frame,
            Err(err) => {
                error!(endpoint = %self.endpoint, error = %err, "received malformed frame");
                self.protocol_error();
                return;
            }
        };

        match frame {
            Frame::Control(message) => {
                trace!(endpoint = %self.endpoint, command = message.command(), "recv control");
                self.process_control(message);
            }
            Frame::Data { channel, payload } => {
                trace!(endpoint = %self.endpoint, channel = %channel, len = payload.len(), "recv");
                if self.current() != Phase::Ready {
                    error!(endpoint = %self.endpoint, channel = %channel, "received message before init");
                    self.protocol_error();
                    return;
                }
                match self.handler(&channel) {
                    Some(handler) => handler.on_message(&payload),
                    None => trace!(endpoint = %self.endpoint, channel = %channel, "no handler, dropped message"),
                }
            }
        }
    }

    fn process_control(&self, message: ControlMessage) {
        if let ControlMessage::Init(init) = &message {
            self.process_init(init);
            return;
        }

        if self.current() != Phase::Ready {
            match message {
                ControlMessage::Close(close) if close.channel.is_none() => {
                    warn!(endpoint = %self.endpoint, reason = %close, "backend closed the session before init");
                    self.close(Some(close));
                }
                other => {
                    error!(endpoint = %self.endpoint, command = other.command(), "received message before init");
                    self.protocol_error();
                }
            }
            return;
        }

        if matches!(message, ControlMessage::Ping(_)) {
            return;
        }
        self.dispatch(&message);
    }

    fn process_init(&self, init: &Init) {
        let accepted = match accept_init(init, self.config.protocol_version) {
            Ok(accepted) => accepted,
            Err(err) => {
                error!(endpoint = %self.endpoint, error = %err, "received invalid init message");
                self.protocol_error();
                return;
            }
        };

        if let Some(seed) = accepted.seed {
            self.state.lock().seed = Some(seed);
        }
        if let Some(user) = accepted.user {
            self.session.merge_user(user);
        }
        if let Some(system) = accepted.system {
            self.session.merge_system(system);
        }

        if self.advance(Phase::Ready) {
            debug!(
                endpoint = %self.endpoint,
                seed = self.state.lock().seed.as_deref().unwrap_or_default(),
                "transport ready"
            );
        }
    }

    /// Deliver a control message to its channel, or to every registered
    /// channel when it names none.
    fn dispatch(&self, message: &ControlMessage) {
        if let Some(channel) = message.channel() {
            match self.handler(channel) {
                Some(handler) => handler.on_control(message),
                None => trace!(
                    endpoint = %self.endpoint,
                    channel,
                    command = message.command(),
                    "no handler, dropped control message"
                ),
            }
            return;
        }

        let channels: Vec<String> = self.state.lock().handlers.keys().cloned().collect();
        for channel in channels {
            if let Some(handler) = self.handler(&channel) {
                handler.on_control(message);
            }
        }
    }

    fn handler(&self, channel: &str) -> Option<Arc<dyn ChannelHandler>> {
        self.state.lock().handlers.get(channel).cloned()
    }
}

async fn wait_for_phase(
    phases: &mut watch::Receiver<Phase>,
    done: impl FnMut(&Phase) -> bool,
) -> Phase {
    match phases.wait_for(done).await {
        Ok(phase) => *phase,
        Err(_) => Phase::Closed,
    }
}

async fn drive<C: Connector>(
    shared: Arc<Shared>,
    connector: Arc<C>,
    queue: mpsc::UnboundedReceiver<Outbound>,
) {
    connect_and_run(&shared, connector, queue).await;
    shared.stopped.send_replace(true);
    debug!(endpoint = %shared.endpoint, "transport driver stopped");
}

async fn connect_and_run<C: Connector>(
    shared: &Shared,
    connector: Arc<C>,
    mut queue: mpsc::UnboundedReceiver<Outbound>,
) {
    // The health check covers the connect as well; nothing arrives while
    // connecting, so the first tick ends a stalled attempt.
    let period = shared.config.health_period();
    let mut health = interval_at(Instant::now() + period, period);
    health.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut phases = shared.phase.subscribe();
    let connected = tokio::select! {
        result = connector.connect() => result,
        _ = health.tick() => {
            warn!(endpoint = %shared.endpoint, "health check failed while connecting");
            shared.close(Some(Close::with_reason(reasons::TIMEOUT)));
            return;
        }
        _ = wait_for_phase(&mut phases, |phase| *phase == Phase::Closed) => {
            debug!(endpoint = %shared.endpoint, "closed while connecting");
            return;
        }
    };

    let mut socket = match connected {
        Ok(socket) => socket,
        Err(err) => {
            warn!(endpoint = %shared.endpoint, error = %err, "failed to connect");
            shared.socket_closed();
            return;
        }
    };

    if shared.advance(Phase::WaitingForInit) {
        run(shared, &mut socket, &mut queue, &mut health).await;
    }

    if let Err(err) = socket.close().await {
        debug!(endpoint = %shared.endpoint, error = %err, "socket close failed");
    }
}

async fn run<S: Socket>(
    shared: &Shared,
    socket: &mut S,
    queue: &mut mpsc::UnboundedReceiver<Outbound>,
    health: &mut Interval,
) {
    let init = match init_request(shared.config.protocol_version) {
        Ok(init) => init,
        Err(err) => {
            error!(endpoint = %shared.endpoint, error = %err, "failed to encode init message");
            shared.protocol_error();
            return;
        }
    };
    trace!(endpoint = %shared.endpoint, "send control: init");
    if let Err(err) = socket.send(init).await {
        warn!(endpoint = %shared.endpoint, error = %err, "socket send failed");
        shared.socket_closed();
        return;
    }

    let mut got_message = false;

    loop {
        tokio::select! {
            biased;

            next = queue.recv() => match next {
                Some(Outbound::Frame(frame)) => {
                    if let Err(err) = socket.send(frame).await {
                        warn!(endpoint = %shared.endpoint, error = %err, "socket send failed");
                        shared.socket_closed();
                        return;
                    }
                }
                Some(Outbound::Shutdown) | None => return,
            },

            incoming = socket.recv() => match incoming {
                Some(Ok(raw)) => {
                    got_message = true;
                    shared.process_frame(&raw);
                }
                Some(Err(err)) => {
                    warn!(endpoint = %shared.endpoint, error = %err, "socket receive failed");
                    shared.socket_closed();
                    return;
                }
                None => {
                    debug!(endpoint = %shared.endpoint, "socket closed by peer");
                    shared.socket_closed();
                    return;
                }
            },

            _ = health.tick() => {
                if !got_message {
                    warn!(endpoint = %shared.endpoint, "health check failed");
                    shared.close(Some(Close::with_reason(reasons::TIMEOUT)));
                }
                got_message = false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use hostmux_frame::{Logout, Open};
    use hostmux_transport::{MemoryAcceptor, MemoryConnector, MemorySocket};
    use serde_json::Map;

    use super::*;
    use crate::page::PageSignals;

    const INIT_REQUEST: &str = "\n{\"command\":\"init\",\"version\":0}";
    const INIT_REPLY: &str = "\n{\"command\":\"init\",\"version\":0,\"channel-seed\":\"X1\"}";

    struct Recorder {
        events: mpsc::UnboundedSender<String>,
    }

    impl Recorder {
        fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
            let (events, rx) = mpsc::unbounded_channel();
            (Arc::new(Self { events }), rx)
        }
    }

    impl ChannelHandler for Recorder {
        fn on_control(&self, message: &ControlMessage) {
            let text = serde_json::to_string(message).expect("control should serialize");
            let _ = self.events.send(format!("control:{text}"));
        }

        fn on_message(&self, payload: &str) {
            let _ = self.events.send(format!("message:{payload}"));
        }
    }

    fn connect(config: TransportConfig) -> (Transport, MemoryAcceptor) {
        let (connector, acceptor) = MemoryConnector::new();
        let transport = Transport::connect(Arc::new(connector), config, SessionInfo::new());
        (transport, acceptor)
    }

    async fn accept(acceptor: &mut MemoryAcceptor) -> MemorySocket {
        let mut backend = acceptor.accept().await.expect("transport should connect");
        assert_eq!(recv(&mut backend).await.as_deref(), Some(INIT_REQUEST));
        backend
    }

    async fn recv(backend: &mut MemorySocket) -> Option<String> {
        backend
            .recv()
            .await
            .map(|frame| frame.expect("memory socket never fails"))
    }

    async fn send(backend: &mut MemorySocket, frame: &str) {
        backend
            .send(frame.to_string())
            .await
            .expect("transport should be listening");
    }

    async fn ready(config: TransportConfig) -> (Transport, MemorySocket) {
        let (transport, mut acceptor) = connect(config);
        let mut backend = accept(&mut acceptor).await;
        send(&mut backend, INIT_REPLY).await;
        transport.ready().await.expect("transport should become ready");
        (transport, backend)
    }

    #[tokio::test]
    async fn handshake_assigns_seeded_channel_ids() {
        let (transport, mut acceptor) = connect(TransportConfig::default());
        let mut backend = accept(&mut acceptor).await;
        assert_eq!(transport.phase(), Phase::WaitingForInit);

        send(
            &mut backend,
            "\n{\"command\":\"init\",\"version\":0,\"channel-seed\":\"X1\",\"user\":{\"user\":\"admin\"}}",
        )
        .await;
        transport.ready().await.unwrap();

        assert!(transport.is_ready());
        assert_eq!(transport.channel_seed().as_deref(), Some("X1"));
        assert_eq!(transport.next_channel(), "1:X1");
        assert_eq!(transport.next_channel(), "2:X1");
        assert_eq!(transport.session().user()["user"], "admin");
    }

    #[tokio::test]
    async fn channel_ids_without_seed_are_plain_counters() {
        let (transport, mut acceptor) = connect(TransportConfig::default());
        let mut backend = accept(&mut acceptor).await;
        send(&mut backend, "\n{\"command\":\"init\",\"version\":0}").await;
        transport.ready().await.unwrap();

        let ids: Vec<String> = (0..3).map(|_| transport.next_channel()).collect();
        assert_eq!(ids, ["1", "2", "3"]);
    }

    #[tokio::test]
    async fn frames_queued_while_connecting_follow_init() {
        let (transport, mut acceptor) = connect(TransportConfig::default());
        transport.send_control(&ControlMessage::Logout(Logout {
            disconnect: false,
            extra: Map::new(),
        }));

        let mut backend = accept(&mut acceptor).await;
        assert_eq!(
            recv(&mut backend).await.as_deref(),
            Some("\n{\"command\":\"logout\",\"disconnect\":false}")
        );
    }

    #[tokio::test]
    async fn unsupported_version_is_a_protocol_error() {
        let (transport, mut acceptor) = connect(TransportConfig::default());
        let mut backend = accept(&mut acceptor).await;
        send(&mut backend, "\n{\"command\":\"init\",\"version\":1}").await;

        let err = transport.ready().await.unwrap_err();
        assert_eq!(err.close().unwrap().reason_str(), "protocol-error");

        transport.send_message("1", "late");
        transport.send_control(&ControlMessage::Close(Close::with_reason("late")));
        assert_eq!(recv(&mut backend).await, None, "no frames after the init");
    }

    #[tokio::test]
    async fn control_before_init_is_a_protocol_error() {
        let (transport, mut acceptor) = connect(TransportConfig::default());
        let mut backend = accept(&mut acceptor).await;
        send(&mut backend, "\n{\"command\":\"ping\"}").await;

        assert_eq!(transport.closed().await.reason_str(), "protocol-error");
    }

    #[tokio::test]
    async fn data_before_init_is_a_protocol_error() {
        let (transport, mut acceptor) = connect(TransportConfig::default());
        let mut backend = accept(&mut acceptor).await;
        send(&mut backend, "1\nearly").await;

        assert_eq!(transport.closed().await.reason_str(), "protocol-error");
    }

    #[tokio::test]
    async fn malformed_frame_is_a_protocol_error() {
        let (transport, mut backend) = ready(TransportConfig::default()).await;
        let (recorder, mut events) = Recorder::new();
        transport.register("1:X1", recorder);

        send(&mut backend, "no separator").await;

        assert_eq!(transport.closed().await.reason_str(), "protocol-error");
        assert_eq!(
            events.recv().await.as_deref(),
            Some("control:{\"command\":\"close\",\"reason\":\"protocol-error\"}")
        );
    }

    #[tokio::test]
    async fn backend_refusal_before_init_keeps_its_reason() {
        let (transport, mut acceptor) = connect(TransportConfig::default());
        let mut backend = accept(&mut acceptor).await;
        send(
            &mut backend,
            "\n{\"command\":\"close\",\"reason\":\"not-authorized\"}",
        )
        .await;

        let err = transport.ready().await.unwrap_err();
        assert_eq!(err.close().unwrap().reason_str(), "not-authorized");
    }

    #[tokio::test]
    async fn routes_frames_by_channel() {
        let (transport, mut backend) = ready(TransportConfig::default()).await;
        let (one, mut one_events) = Recorder::new();
        let (two, mut two_events) = Recorder::new();
        assert!(transport.register("1:X1", one));
        assert!(transport.register("2:X1", two));

        send(&mut backend, "1:X1\nhello").await;
        send(&mut backend, "9:X1\nnobody").await;
        send(&mut backend, "\n{\"command\":\"ping\"}").await;
        send(&mut backend, "\n{\"command\":\"close\",\"channel\":\"2:X1\",\"reason\":\"terminated\"}").await;
        send(&mut backend, "1:X1\nworld").await;

        assert_eq!(one_events.recv().await.as_deref(), Some("message:hello"));
        assert_eq!(one_events.recv().await.as_deref(), Some("message:world"));
        assert_eq!(
            two_events.recv().await.as_deref(),
            Some("control:{\"command\":\"close\",\"channel\":\"2:X1\",\"reason\":\"terminated\"}")
        );
        assert!(one_events.try_recv().is_err());
        assert!(transport.is_ready());
    }

    #[tokio::test]
    async fn channel_less_control_is_broadcast() {
        let (transport, mut backend) = ready(TransportConfig::default()).await;
        let (one, mut one_events) = Recorder::new();
        let (two, mut two_events) = Recorder::new();
        transport.register("1:X1", one);
        transport.register("2:X1", two);

        send(&mut backend, "\n{\"command\":\"close\",\"reason\":\"terminated\"}").await;

        let expected = "control:{\"command\":\"close\",\"reason\":\"terminated\"}";
        assert_eq!(one_events.recv().await.as_deref(), Some(expected));
        assert_eq!(two_events.recv().await.as_deref(), Some(expected));
    }

    #[tokio::test]
    async fn unregistered_channel_gets_nothing() {
        let (transport, mut backend) = ready(TransportConfig::default()).await;
        let (one, mut one_events) = Recorder::new();
        let (two, mut two_events) = Recorder::new();
        transport.register("1:X1", one);
        transport.register("2:X1", two);
        transport.unregister("1:X1");

        send(&mut backend, "1:X1\nlost").await;
        send(&mut backend, "2:X1\nmarker").await;

        assert_eq!(two_events.recv().await.as_deref(), Some("message:marker"));
        assert!(one_events.try_recv().is_err());
    }

    #[tokio::test]
    async fn repeated_init_refreshes_without_second_ready() {
        let (transport, mut backend) = ready(TransportConfig::default()).await;
        let (recorder, mut events) = Recorder::new();
        transport.register("1:X1", recorder);
        let mut phases = transport.subscribe();
        phases.borrow_and_update();

        send(
            &mut backend,
            "\n{\"command\":\"init\",\"version\":0,\"channel-seed\":\"Y2\",\"system\":{\"version\":\"312\"}}",
        )
        .await;
        send(&mut backend, "1:X1\nmarker").await;
        assert_eq!(events.recv().await.as_deref(), Some("message:marker"));

        assert!(!phases.has_changed().unwrap());
        assert_eq!(transport.next_channel(), "1:Y2");
        assert_eq!(transport.session().system()["version"], "312");
    }

    #[tokio::test]
    async fn close_flushes_and_notifies_every_call() {
        let (transport, mut backend) = ready(TransportConfig::default()).await;
        let (recorder, mut events) = Recorder::new();
        transport.register("1:X1", recorder.clone());

        transport.send_control(&ControlMessage::Open(Open {
            channel: "1:X1".to_string(),
            ..Open::default()
        }));
        transport.close(None);
        transport.close(Some(Close::with_reason("again")));

        assert_eq!(
            recv(&mut backend).await.as_deref(),
            Some("\n{\"command\":\"open\",\"channel\":\"1:X1\"}")
        );
        assert_eq!(recv(&mut backend).await, None);

        assert_eq!(
            events.recv().await.as_deref(),
            Some("control:{\"command\":\"close\",\"reason\":\"disconnected\"}")
        );
        assert_eq!(
            events.recv().await.as_deref(),
            Some("control:{\"command\":\"close\",\"reason\":\"again\"}")
        );
        assert_eq!(transport.close_reason().unwrap().reason_str(), "disconnected");
        assert!(!transport.register("2:X1", recorder));
    }

    #[tokio::test]
    async fn finished_after_flush() {
        let (transport, mut backend) = ready(TransportConfig::default()).await;
        transport.send_message("1:X1", "last words");
        transport.close(None);
        transport.finished().await;

        assert_eq!(recv(&mut backend).await.as_deref(), Some("1:X1\nlast words"));
        assert_eq!(recv(&mut backend).await, None);
    }

    #[tokio::test]
    async fn peer_disconnect_closes_with_disconnected() {
        let (transport, backend) = ready(TransportConfig::default()).await;
        let (recorder, mut events) = Recorder::new();
        transport.register("1:X1", recorder);

        drop(backend);

        assert_eq!(transport.closed().await.reason_str(), "disconnected");
        assert_eq!(
            events.recv().await.as_deref(),
            Some("control:{\"command\":\"close\",\"reason\":\"disconnected\"}")
        );
    }

    #[tokio::test]
    async fn expected_disconnect_is_quiet() {
        let signals = Arc::new(PageSignals::default());
        let config = TransportConfig::default().with_signals(signals.clone());
        let (transport, backend) = ready(config).await;
        let (recorder, mut events) = Recorder::new();
        transport.register("1:X1", recorder);

        signals.before_unload();
        drop(backend);

        transport.closed().await;
        assert!(events.try_recv().is_err());
        assert!(!signals.reload_requested());
    }

    #[tokio::test]
    async fn reload_after_disconnect_requests_reload() {
        let signals = Arc::new(PageSignals::default());
        let config = TransportConfig::default().with_signals(signals.clone());
        let (transport, backend) = ready(config).await;
        let (recorder, mut events) = Recorder::new();
        transport.register("1:X1", recorder);

        signals.set_reload_after_disconnect();
        drop(backend);

        transport.closed().await;
        assert!(signals.reload_requested());
        assert!(signals.disconnect_expected());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn connect_failure_closes_with_disconnected() {
        let (connector, acceptor) = MemoryConnector::new();
        drop(acceptor);
        let transport =
            Transport::connect(Arc::new(connector), TransportConfig::default(), SessionInfo::new());

        let err = transport.ready().await.unwrap_err();
        assert_eq!(err.close().unwrap().reason_str(), "disconnected");
        assert!(transport.is_closed());
    }

    struct StalledConnector;

    impl Connector for StalledConnector {
        type Socket = MemorySocket;

        async fn connect(&self) -> hostmux_transport::Result<MemorySocket> {
            std::future::pending().await
        }

        fn endpoint(&self) -> &str {
            "stalled"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_connect_closes_with_timeout() {
        let transport = Transport::connect(
            Arc::new(StalledConnector),
            TransportConfig::default(),
            SessionInfo::new(),
        );
        let started = Instant::now();

        let err = transport.ready().await.unwrap_err();
        assert_eq!(err.close().unwrap().reason_str(), "timeout");
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert!(started.elapsed() < Duration::from_secs(20));
        transport.finished().await;
    }

    #[tokio::test]
    async fn close_while_connecting_stops_the_driver() {
        let (transport, mut acceptor) = connect(TransportConfig::default());
        transport.close(Some(Close::with_reason("cancelled")));
        assert_eq!(transport.closed().await.reason_str(), "cancelled");

        // Whether or not the driver got as far as connecting, no init goes out.
        if let Some(mut backend) = acceptor.accept().await {
            assert_eq!(recv(&mut backend).await, None);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn silence_closes_with_timeout() {
        let (transport, _backend) = ready(TransportConfig::default()).await;
        let (recorder, mut events) = Recorder::new();
        transport.register("1:X1", recorder);
        let started = Instant::now();

        assert_eq!(transport.closed().await.reason_str(), "timeout");
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert_eq!(
            events.recv().await.as_deref(),
            Some("control:{\"command\":\"close\",\"reason\":\"timeout\"}")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn traffic_keeps_the_transport_alive() {
        let (transport, mut backend) = ready(TransportConfig::default()).await;

        for _ in 0..8 {
            tokio::time::sleep(Duration::from_secs(5)).await;
            send(&mut backend, "\n{\"command\":\"ping\"}").await;
        }

        assert!(transport.is_ready());
    }
}
