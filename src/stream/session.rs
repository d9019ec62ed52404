//! Session handle and the state it shares with its negotiation actor.

use std::net::IpAddr;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, watch};

use super::negotiator::{Command, Negotiator};
use super::{
    SessionEvent, StreamError, StreamRole, StreamSettings, StreamState, BUFFER_INCREMENT_SIZE,
    MAX_BUFFER_SIZE,
};
use crate::buffer::RingBuffer;
use crate::error::{Result, S5bError};
use crate::protocol::{
    Jid, ListenerId, Payload, Reply, RequestId, StanzaError, StanzaErrorCondition,
};
use crate::registry::LocalConnectionRegistry;
use crate::transport::{NetworkProxy, StanzaTransport};

/// Capacity of the event channel; slow subscribers observe `Lagged`.
const EVENT_CAPACITY: usize = 256;

/// Everything needed to create a session.
#[derive(Debug, Clone)]
pub struct SessionParams {
    /// Session id shared with the peer
    pub session_id: String,
    /// Our full address
    pub local: Jid,
    /// Peer's full address
    pub peer: Jid,
    /// Our side of the negotiation
    pub role: StreamRole,
    /// Initial properties
    pub settings: StreamSettings,
    /// Interface addresses to advertise instead of enumerating them
    pub interfaces: Option<Vec<IpAddr>>,
}

impl SessionParams {
    /// Parameters with default settings.
    pub fn new(session_id: impl Into<String>, local: Jid, peer: Jid, role: StreamRole) -> Self {
        Self {
            session_id: session_id.into(),
            local,
            peer,
            role,
            settings: StreamSettings::default(),
            interfaces: None,
        }
    }

    /// Parameters with a fresh random session id.
    pub fn generate(local: Jid, peer: Jid, role: StreamRole) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), local, peer, role)
    }

    /// Replace the initial settings.
    pub fn with_settings(mut self, settings: StreamSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Pin the interface addresses used for direct candidates.
    pub fn with_interfaces(mut self, interfaces: Vec<IpAddr>) -> Self {
        self.interfaces = Some(interfaces);
        self
    }
}

/// Mutable session state, guarded by one lock.
pub(super) struct Inner {
    pub state: StreamState,
    pub error: Option<StreamError>,
    pub read_buffer: RingBuffer,
    pub write_buffer: RingBuffer,
    /// The actor owns a bound data socket
    pub socket_attached: bool,
    pub connect_key: String,
    /// Key this session holds in the local connection registry
    pub registered_key: Option<String>,
    /// Transport listener awaiting the host offer (target only)
    pub listener: Option<ListenerId>,
    /// Bumped by every `open()`
    pub generation: u64,
    pub settings: StreamSettings,
    /// Total bytes handed to the socket
    pub written_total: u64,
}

/// State shared between the public handle and the actor task.
pub(super) struct Shared {
    pub sid: String,
    pub local: Jid,
    pub peer: Jid,
    pub role: StreamRole,
    pub inner: Mutex<Inner>,
    pub changed: Condvar,
    pub events: broadcast::Sender<SessionEvent>,
    pub state_tx: watch::Sender<StreamState>,
    pub inbox: mpsc::UnboundedSender<Command>,
    pub registry: LocalConnectionRegistry,
}

impl Shared {
    pub fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    pub fn post(&self, command: Command) {
        if self.inbox.send(command).is_err() {
            tracing::debug!(sid = %self.sid, "Session actor gone, command dropped");
        }
    }

    pub fn state(&self) -> StreamState {
        self.lock().state
    }

    pub fn settings(&self) -> StreamSettings {
        self.lock().settings.clone()
    }

    pub fn connect_key(&self) -> String {
        self.lock().connect_key.clone()
    }

    /// Move to `state`, emitting events. Reaching `Closed` releases the
    /// registry key, clears the buffers and schedules actor teardown.
    pub fn set_state(&self, state: StreamState) {
        let released = {
            let mut inner = self.lock();
            if inner.state == state {
                return;
            }
            inner.state = state;
            if state == StreamState::Closed {
                inner.socket_attached = false;
                inner.read_buffer.clear();
                inner.write_buffer.clear();
                // Posted under the lock so a racing open() queues Start after it
                let _ = self.inbox.send(Command::Teardown);
                inner.registered_key.take()
            } else {
                None
            }
        };

        if let Some(key) = released {
            self.registry.unregister(&key);
        }
        self.announce(state);
    }

    /// Publish a transition already applied under the lock.
    pub fn announce(&self, state: StreamState) {
        match state {
            StreamState::Opened => {
                tracing::info!(sid = %self.sid, peer = %self.peer, "Bytestream opened")
            },
            StreamState::Closed => {
                tracing::info!(sid = %self.sid, peer = %self.peer, "Bytestream closed")
            },
            _ => tracing::debug!(sid = %self.sid, "Bytestream state {:?}", state),
        }

        self.changed.notify_all();
        self.state_tx.send_replace(state);
        self.emit(SessionEvent::StateChanged(state));
        if state == StreamState::Closed {
            self.emit(SessionEvent::ReadChannelFinished);
        }
    }

    /// Record `error` unless one is already recorded for this attempt.
    pub fn set_error(&self, error: StreamError) {
        let mut inner = self.lock();
        if inner.error.is_none() {
            inner.error = Some(error);
        }
    }

    pub fn close(&self) {
        let (state, attached) = {
            let inner = self.lock();
            (inner.state, inner.socket_attached)
        };

        if state == StreamState::Opened && attached {
            self.emit(SessionEvent::AboutToClose);
            self.set_state(StreamState::Closing);
            self.post(Command::Close);
        } else if state != StreamState::Closing {
            self.set_state(StreamState::Closed);
        }
    }

    pub fn abort(&self, error: StreamError) {
        if self.state() == StreamState::Closed {
            return;
        }
        tracing::warn!(sid = %self.sid, peer = %self.peer, "Bytestream aborted: {}", error);
        self.set_error(error);
        self.close();
        self.set_state(StreamState::Closed);
    }

    /// Append bytes pulled from the socket.
    pub fn push_read(&self, data: &[u8]) -> Result<()> {
        self.lock().read_buffer.write(data)?;
        self.changed.notify_all();
        self.emit(SessionEvent::ReadyRead);
        Ok(())
    }

    /// Copy of up to `max_len` queued bytes, left in the buffer.
    pub fn peek_write(&self, max_len: usize) -> Bytes {
        self.lock().write_buffer.peek(max_len)
    }

    /// Drop `count` bytes the socket accepted from the front of the queue.
    pub fn mark_written(&self, count: usize) {
        let mut inner = self.lock();
        inner.write_buffer.discard(count);
        inner.written_total += count as u64;
        drop(inner);
        self.changed.notify_all();
        self.emit(SessionEvent::BytesWritten(count));
    }

    /// The actor bound (or lost) its data socket.
    pub fn set_socket_attached(&self, attached: bool) {
        self.lock().socket_attached = attached;
        self.changed.notify_all();
    }
}

/// One SOCKS5 bytestream negotiation and the data channel it produces.
///
/// Created in `Closed`. [`open`](Self::open) starts negotiation in the
/// background; progress is observed through [`state`](Self::state),
/// [`subscribe`](Self::subscribe) or [`state_changes`](Self::state_changes).
/// The host application routes transport replies back through
/// [`on_reply`](Self::on_reply), [`on_timeout`](Self::on_timeout) and
/// [`on_incoming`](Self::on_incoming).
///
/// Dropping an open session aborts it with `StreamDestroyed`.
pub struct StreamSession {
    shared: Arc<Shared>,
}

impl StreamSession {
    /// Create a session whose actor runs on the current tokio runtime.
    pub fn spawn(
        params: SessionParams,
        transport: Arc<dyn StanzaTransport>,
        registry: LocalConnectionRegistry,
    ) -> Result<Self> {
        let handle = Handle::try_current().map_err(|e| S5bError::Runtime(e.to_string()))?;
        Ok(Self::spawn_on(&handle, params, transport, registry))
    }

    /// Create a session whose actor runs on `handle`.
    pub fn spawn_on(
        handle: &Handle,
        params: SessionParams,
        transport: Arc<dyn StanzaTransport>,
        registry: LocalConnectionRegistry,
    ) -> Self {
        let (inbox, commands) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (state_tx, _) = watch::channel(StreamState::Closed);

        let shared = Arc::new(Shared {
            sid: params.session_id,
            local: params.local,
            peer: params.peer,
            role: params.role,
            inner: Mutex::new(Inner {
                state: StreamState::Closed,
                error: None,
                read_buffer: RingBuffer::new(BUFFER_INCREMENT_SIZE),
                write_buffer: RingBuffer::bounded(BUFFER_INCREMENT_SIZE, MAX_BUFFER_SIZE),
                socket_attached: false,
                connect_key: String::new(),
                registered_key: None,
                listener: None,
                generation: 0,
                settings: params.settings,
                written_total: 0,
            }),
            changed: Condvar::new(),
            events,
            state_tx,
            inbox,
            registry,
        });

        let negotiator = Negotiator::new(shared.clone(), transport, params.interfaces, commands);
        handle.spawn(negotiator.run());

        Self { shared }
    }

    /// Session id.
    pub fn session_id(&self) -> &str {
        &self.shared.sid
    }

    /// Our address.
    pub fn local(&self) -> &Jid {
        &self.shared.local
    }

    /// Peer address.
    pub fn peer(&self) -> &Jid {
        &self.shared.peer
    }

    /// Our side of the negotiation.
    pub fn role(&self) -> StreamRole {
        self.shared.role
    }

    /// Start negotiating. Fails unless the session is `Closed`.
    pub fn open(&self) -> Result<()> {
        let mut inner = self.shared.lock();
        if inner.state != StreamState::Closed {
            return Err(S5bError::InvalidState(inner.state));
        }
        inner.error = None;
        inner.generation += 1;
        inner.state = StreamState::Opening;
        let generation = inner.generation;
        // Queued under the lock, after any pending teardown
        let _ = self.shared.inbox.send(Command::Start { generation });
        drop(inner);

        tracing::info!(
            sid = %self.shared.sid,
            peer = %self.shared.peer,
            "Opening bytestream as {:?}",
            self.shared.role
        );
        self.shared.announce(StreamState::Opening);
        Ok(())
    }

    /// Flush and disconnect an open stream, or stop negotiating.
    pub fn close(&self) {
        self.shared.close();
    }

    /// Record `error` and force `Closed`. Does nothing when already closed.
    pub fn abort(&self, error: impl Into<StreamError>) {
        self.shared.abort(error.into());
    }

    /// Drain up to `max_len` buffered bytes.
    ///
    /// Returns an empty buffer when nothing has arrived yet and
    /// [`S5bError::EndOfStream`] once the socket is gone and every byte has
    /// been consumed; the session then closes on the next actor tick.
    pub fn read(&self, max_len: usize) -> Result<Bytes> {
        let mut inner = self.shared.lock();
        if !inner.read_buffer.is_empty() {
            let data = inner.read_buffer.read(max_len);
            drop(inner);
            self.shared.post(Command::ReadTick);
            return Ok(data);
        }

        if inner.socket_attached || inner.state == StreamState::Opening {
            return Ok(Bytes::new());
        }

        if matches!(inner.state, StreamState::Opened | StreamState::Closing) {
            drop(inner);
            self.shared.post(Command::Finish);
        }
        Err(S5bError::EndOfStream)
    }

    /// Queue `data` for the socket, all or nothing.
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        let written = {
            let mut inner = self.shared.lock();
            if !inner.socket_attached
                || !matches!(inner.state, StreamState::Opening | StreamState::Opened)
            {
                return Err(S5bError::NotConnected);
            }
            inner.write_buffer.write(data)?
        };
        self.shared.post(Command::WriteTick);
        Ok(written)
    }

    /// Push pending bytes to the socket now. Returns false when there is
    /// nothing to flush or the stream is not open.
    pub fn flush(&self) -> bool {
        let pending = {
            let inner = self.shared.lock();
            inner.state == StreamState::Opened && !inner.write_buffer.is_empty()
        };
        if pending {
            self.shared.post(Command::WriteTick);
        }
        pending
    }

    /// True only once the stream is `Opened`.
    pub fn is_open(&self) -> bool {
        self.state() == StreamState::Opened
    }

    /// Current state.
    pub fn state(&self) -> StreamState {
        self.shared.state()
    }

    /// Error recorded by the last attempt, if any.
    pub fn error(&self) -> Option<StreamError> {
        self.shared.lock().error.clone()
    }

    /// Bytes waiting to be read.
    pub fn bytes_available(&self) -> usize {
        self.shared.lock().read_buffer.len()
    }

    /// Bytes waiting to reach the socket.
    pub fn bytes_to_write(&self) -> usize {
        self.shared.lock().write_buffer.len()
    }

    /// Key presented in the SOCKS5 CONNECT request (empty before `open`).
    pub fn connect_key(&self) -> String {
        self.shared.connect_key()
    }

    /// Block until data is readable, the stream ends or `timeout` elapses.
    ///
    /// Blocks the calling thread; from async code use
    /// `tokio::task::spawn_blocking` or [`subscribe`](Self::subscribe).
    pub fn wait_for_ready_read(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.shared.lock();
        loop {
            if !inner.read_buffer.is_empty() {
                return true;
            }
            let ended = inner.state == StreamState::Closed
                || (!inner.socket_attached && inner.state != StreamState::Opening);
            if ended {
                return false;
            }
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return false;
            };
            inner = self
                .shared
                .changed
                .wait_timeout(inner, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Block until some pending bytes reach the socket or `timeout` elapses.
    ///
    /// Returns false immediately when nothing is pending.
    pub fn wait_for_bytes_written(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.shared.lock();
        if inner.write_buffer.is_empty() {
            return false;
        }
        let start = inner.written_total;
        loop {
            if inner.written_total != start {
                return true;
            }
            if inner.state == StreamState::Closed {
                return false;
            }
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return false;
            };
            inner = self
                .shared
                .changed
                .wait_timeout(inner, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    /// Watch state transitions.
    pub fn state_changes(&self) -> watch::Receiver<StreamState> {
        self.shared.state_tx.subscribe()
    }

    /// Snapshot of the current properties.
    pub fn settings(&self) -> StreamSettings {
        self.shared.settings()
    }

    /// Per-candidate connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        self.shared.lock().settings.connect_timeout()
    }

    /// Set the per-candidate connect timeout. Values of 100 ms or less are
    /// refused and false is returned.
    pub fn set_connect_timeout(&self, timeout: Duration) -> bool {
        let ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        if !StreamSettings::is_valid_connect_timeout(ms) {
            tracing::warn!(sid = %self.shared.sid, "Ignoring connect timeout of {} ms", ms);
            return false;
        }
        self.update_settings(|s| replace(&mut s.connect_timeout_ms, ms));
        true
    }

    /// Is offering ourselves as a direct candidate disabled?
    pub fn direct_connections_disabled(&self) -> bool {
        self.shared.lock().settings.direct_connections_disabled
    }

    /// Stop (or resume) offering ourselves as a direct candidate.
    pub fn set_direct_connections_disabled(&self, disabled: bool) {
        self.update_settings(|s| replace(&mut s.direct_connections_disabled, disabled));
    }

    /// Configured forward address, when both parts are set.
    pub fn forward_address(&self) -> Option<(String, u16)> {
        let inner = self.shared.lock();
        inner
            .settings
            .forward_address()
            .map(|(host, port)| (host.to_string(), port))
    }

    /// Advertise `host:port` instead of local interface addresses.
    pub fn set_forward_address(&self, host: impl Into<String>, port: u16) {
        let host = host.into();
        self.update_settings(|s| {
            let host_changed = replace(&mut s.forward_host, host);
            replace(&mut s.forward_port, port) || host_changed
        });
    }

    /// Relays queried for stream hosts.
    pub fn proxies(&self) -> Vec<Jid> {
        self.shared.lock().settings.proxies.clone()
    }

    /// Replace the relays queried on the next `open()`.
    pub fn set_proxies(&self, proxies: Vec<Jid>) {
        self.update_settings(|s| replace(&mut s.proxies, proxies));
    }

    /// Upstream proxy for candidate connections.
    pub fn network_proxy(&self) -> NetworkProxy {
        self.shared.lock().settings.network_proxy.clone()
    }

    /// Route candidate connections through `proxy`.
    pub fn set_network_proxy(&self, proxy: NetworkProxy) {
        self.update_settings(|s| replace(&mut s.network_proxy, proxy));
    }

    /// Deliver the reply to a request this session sent.
    pub fn on_reply(&self, request: &RequestId, reply: Reply) {
        self.shared.post(Command::Reply {
            request: request.clone(),
            reply,
        });
    }

    /// Report that a request this session sent got no reply in time.
    pub fn on_timeout(&self, request: &RequestId) {
        let error = StanzaError::new(StanzaErrorCondition::RemoteServerTimeout);
        self.on_reply(request, Err(error));
    }

    /// Offer an inbound payload from a listener this session registered.
    ///
    /// Returns true when the payload is the host offer this session waits
    /// for; the listener is consumed and the transport should stop routing
    /// to it.
    pub fn on_incoming(&self, listener: ListenerId, request: RequestId, payload: Payload) -> bool {
        let Payload::Hosts(offer) = payload else {
            return false;
        };

        {
            let mut inner = self.shared.lock();
            let accepted = self.shared.role == StreamRole::Target
                && inner.state == StreamState::Opening
                && inner.listener == Some(listener)
                && offer.sid == self.shared.sid;
            if !accepted {
                return false;
            }
            inner.listener = None;
        }

        tracing::debug!(
            sid = %self.shared.sid,
            "Received {} stream hosts from {}",
            offer.hosts.len(),
            self.shared.peer
        );
        self.shared.post(Command::HostsOffered {
            listener,
            request,
            offer,
        });
        true
    }

    fn update_settings(&self, apply: impl FnOnce(&mut StreamSettings) -> bool) {
        let changed = apply(&mut self.shared.lock().settings);
        if changed {
            self.shared.emit(SessionEvent::PropertiesChanged);
        }
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.shared
            .abort(StreamError::new(super::ErrorCondition::StreamDestroyed));
        self.shared.post(Command::Shutdown);
    }
}

impl std::fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("sid", &self.shared.sid)
            .field("role", &self.shared.role)
            .field("peer", &self.shared.peer)
            .field("state", &self.state())
            .finish()
    }
}

/// Assign `value`, reporting whether it differed.
fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}
