//! Negotiation actor.
//!
//! One task per session. It owns the negotiation bookkeeping and the live
//! data socket; everything that happens to a session (API calls, transport
//! replies, accepted local connections, finished connect attempts, socket
//! readiness) arrives here as a [`Command`] or a select branch and is handled
//! in order.

use std::collections::HashMap;
use std::io;
use std::net::IpAddr;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use super::session::Shared;
use super::{
    hosts, ErrorCondition, SessionEvent, StreamError, StreamRole, StreamState, ACTIVATE_REQUEST_TIMEOUT,
    BUFFER_INCREMENT_SIZE, HOST_REQUEST_TIMEOUT, MAX_BUFFER_SIZE, PROXY_REQUEST_TIMEOUT,
};
use crate::error::Result;
use crate::protocol::{
    Activation, HostCandidate, HostUsed, HostsOffer, Jid, ListenerFilter, ListenerId, Payload,
    Reply, RequestId, StanzaErrorCondition, StreamMode,
};
use crate::registry::{connection_key, AcceptHandler};
use crate::transport::{socks5, StanzaTransport};

/// Work items for the actor.
pub(crate) enum Command {
    /// `open()` was called
    Start { generation: u64 },
    /// Reply (or timeout) to a request we sent
    Reply { request: RequestId, reply: Reply },
    /// Host offer accepted by `on_incoming`
    HostsOffered {
        listener: ListenerId,
        request: RequestId,
        offer: HostsOffer,
    },
    /// The local listener matched our connect key
    LocalAccepted { generation: u64, socket: TcpStream },
    /// A candidate connect attempt finished
    HostConnected {
        generation: u64,
        index: usize,
        result: Result<TcpStream>,
    },
    /// The reader drained data; room may have opened up
    ReadTick,
    /// Bytes are waiting in the write buffer
    WriteTick,
    /// Graceful close requested
    Close,
    /// Reader hit end of stream
    Finish,
    /// Session reached `Closed`
    Teardown,
    /// Session handle dropped
    Shutdown,
}

/// What an outstanding request was for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    Proxy,
    Hosts,
    Activate,
}

pub(super) struct Negotiator {
    shared: Arc<Shared>,
    transport: Arc<dyn StanzaTransport>,
    interfaces: Option<Vec<IpAddr>>,
    commands: mpsc::UnboundedReceiver<Command>,
    generation: u64,
    pending: HashMap<RequestId, Pending>,
    /// Relays found by proxy queries, in reply order
    relays: Vec<HostCandidate>,
    /// Candidates offered (initiator) or being tried (target)
    hosts: Vec<HostCandidate>,
    /// Candidate the data socket came from
    host_index: Option<usize>,
    /// Target: id of the peer's host offer
    offer_request: Option<RequestId>,
    /// Socket accepted through the registry, before the peer confirms it
    local_socket: Option<TcpStream>,
    socket: Option<TcpStream>,
}

impl Negotiator {
    pub fn new(
        shared: Arc<Shared>,
        transport: Arc<dyn StanzaTransport>,
        interfaces: Option<Vec<IpAddr>>,
        commands: mpsc::UnboundedReceiver<Command>,
    ) -> Self {
        Self {
            shared,
            transport,
            interfaces,
            commands,
            generation: 0,
            pending: HashMap::new(),
            relays: Vec::new(),
            hosts: Vec::new(),
            host_index: None,
            offer_request: None,
            local_socket: None,
            socket: None,
        }
    }

    pub async fn run(mut self) {
        loop {
            let wants_read = self.socket.is_some() && self.wants_read();
            let wants_write = self.socket.is_some() && self.wants_write();

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle(command).await,
                },
                ready = readable(&self.socket), if wants_read => match ready {
                    Ok(()) => self.pull_socket(),
                    Err(e) => self.on_disconnected(Some(e)),
                },
                ready = writable(&self.socket), if wants_write => match ready {
                    Ok(()) => self.push_socket().await,
                    Err(e) => self.abort_with(ErrorCondition::DataNotSent, e.to_string()),
                },
            }
        }

        self.teardown();
        tracing::debug!(sid = %self.shared.sid, "Session actor stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Start { generation } => self.start(generation),
            Command::Reply { request, reply } => self.on_reply(request, reply),
            Command::HostsOffered {
                listener,
                request,
                offer,
            } => self.on_hosts_offered(listener, request, offer),
            Command::LocalAccepted { generation, socket } => {
                if generation == self.generation && self.is_opening() {
                    tracing::debug!(sid = %self.shared.sid, "Direct connection accepted");
                    self.local_socket = Some(socket);
                }
            },
            Command::HostConnected {
                generation,
                index,
                result,
            } => {
                if generation == self.generation && self.is_opening() {
                    self.on_host_connected(index, result);
                }
            },
            // Wake-ups only: the loop re-checks readiness interest
            Command::ReadTick | Command::WriteTick => {},
            Command::Close => self.close_if_drained().await,
            Command::Finish => {
                let state = self.shared.state();
                if self.socket.is_none() && matches!(state, StreamState::Opened | StreamState::Closing)
                {
                    self.shared.set_state(StreamState::Closed);
                }
            },
            Command::Teardown => self.teardown(),
            Command::Shutdown => {},
        }
    }

    fn is_opening(&self) -> bool {
        self.shared.state() == StreamState::Opening
    }

    /// A bound socket is watched while opening too, so a drop before
    /// activation is noticed.
    fn wants_read(&self) -> bool {
        let inner = self.shared.lock();
        matches!(inner.state, StreamState::Opening | StreamState::Opened)
            && inner.read_buffer.len() < MAX_BUFFER_SIZE
    }

    fn wants_write(&self) -> bool {
        let inner = self.shared.lock();
        matches!(inner.state, StreamState::Opened | StreamState::Closing)
            && !inner.write_buffer.is_empty()
    }

    fn abort(&self, condition: ErrorCondition) {
        self.shared.abort(StreamError::new(condition));
    }

    fn abort_with(&self, condition: ErrorCondition, message: impl Into<String>) {
        self.shared.abort(StreamError::with_message(condition, message));
    }

    fn start(&mut self, generation: u64) {
        if !self.is_opening() {
            return;
        }
        self.generation = generation;
        let sid = self.shared.sid.clone();

        match self.shared.role {
            StreamRole::Initiator => {
                let key = connection_key(&sid, &self.shared.local, &self.shared.peer);
                self.shared.lock().connect_key = key;

                for proxy in self.shared.settings().proxies {
                    match self.transport.send_request(
                        &sid,
                        &proxy,
                        Payload::ProxyQuery,
                        PROXY_REQUEST_TIMEOUT,
                    ) {
                        Ok(id) => {
                            tracing::debug!(sid = %sid, "Querying proxy {}", proxy);
                            self.pending.insert(id, Pending::Proxy);
                        },
                        Err(e) => {
                            tracing::warn!(sid = %sid, "Failed to query proxy {}: {}", proxy, e)
                        },
                    }
                }

                if self.pending.is_empty() {
                    self.send_available_hosts();
                }
            },
            StreamRole::Target => {
                let key = connection_key(&sid, &self.shared.peer, &self.shared.local);
                self.shared.lock().connect_key = key;

                let filter = ListenerFilter {
                    session_id: sid.clone(),
                };
                match self.transport.register_listener(filter) {
                    Ok(listener) => {
                        tracing::debug!(sid = %sid, "Waiting for stream hosts from {}", self.shared.peer);
                        self.shared.lock().listener = Some(listener);
                    },
                    Err(e) => self.abort_with(ErrorCondition::ListenerNotRegistered, e.to_string()),
                }
            },
        }
    }

    fn send_available_hosts(&mut self) {
        let settings = self.shared.settings();
        let key = self.shared.connect_key();

        let mut local = Vec::new();
        if !settings.direct_connections_disabled {
            let interfaces = self
                .interfaces
                .clone()
                .unwrap_or_else(hosts::interface_addresses);
            local = hosts::local_candidates(
                &self.shared.local,
                &settings,
                &interfaces,
                self.shared.registry.listening_port(),
            );

            if !local.is_empty() {
                let inbox = self.shared.inbox.clone();
                let generation = self.generation;
                let handler: AcceptHandler = Box::new(move |socket| {
                    let _ = inbox.send(Command::LocalAccepted { generation, socket });
                });
                if !self.shared.registry.register(&key, handler) {
                    self.abort_with(ErrorCondition::HostsNotCreated, "Connect key already in use");
                    return;
                }
                self.shared.lock().registered_key = Some(key.clone());
            }
        }

        self.hosts = hosts::assemble(local, std::mem::take(&mut self.relays));
        if self.hosts.is_empty() {
            self.abort(ErrorCondition::HostsNotCreated);
            return;
        }

        let offer = HostsOffer {
            sid: self.shared.sid.clone(),
            mode: StreamMode::Tcp,
            dstaddr: Some(key),
            hosts: self.hosts.clone(),
        };
        tracing::debug!(
            sid = %self.shared.sid,
            "Offering {} stream hosts to {}",
            self.hosts.len(),
            self.shared.peer
        );

        match self.transport.send_request(
            &self.shared.sid,
            &self.shared.peer,
            Payload::Hosts(offer),
            HOST_REQUEST_TIMEOUT,
        ) {
            Ok(id) => {
                self.pending.insert(id, Pending::Hosts);
            },
            Err(e) => self.abort_with(ErrorCondition::HostsNotCreated, e.to_string()),
        }
    }

    fn on_reply(&mut self, request: RequestId, reply: Reply) {
        let Some(pending) = self.pending.remove(&request) else {
            tracing::debug!(sid = %self.shared.sid, "Ignoring reply to unknown request {}", request);
            return;
        };
        if !self.is_opening() {
            return;
        }

        let reply = match reply {
            Ok(Payload::Error { error, .. }) => Err(error),
            other => other,
        };

        match pending {
            Pending::Proxy => {
                match reply {
                    Ok(Payload::StreamHost(host)) if host.is_valid() => {
                        tracing::debug!(sid = %self.shared.sid, "Proxy offers {}", host);
                        self.relays.push(host);
                    },
                    Ok(_) => tracing::warn!(sid = %self.shared.sid, "Proxy sent no usable stream host"),
                    Err(e) => tracing::warn!(sid = %self.shared.sid, "Proxy query failed: {}", e),
                }
                if !self.pending.values().any(|p| *p == Pending::Proxy) {
                    self.send_available_hosts();
                }
            },
            Pending::Hosts => match reply {
                Ok(Payload::HostUsed(used)) => self.connect_to_used_host(&used.jid),
                Ok(_) => self.abort_with(ErrorCondition::HostsRejected, "Unexpected reply"),
                Err(e) => self.abort_with(ErrorCondition::HostsRejected, e.to_string()),
            },
            Pending::Activate => match reply {
                Ok(_) => self.start_stream(),
                Err(e) => self.abort_with(ErrorCondition::NotActivated, e.to_string()),
            },
        }
    }

    fn connect_to_used_host(&mut self, jid: &Jid) {
        if *jid == self.shared.local {
            match self.local_socket.take() {
                Some(socket) => {
                    tracing::debug!(sid = %self.shared.sid, "Peer connected directly");
                    let key = self.shared.lock().registered_key.take();
                    if let Some(key) = key {
                        self.shared.registry.unregister(&key);
                    }
                    self.host_index = self.hosts.iter().position(|h| h.jid == *jid);
                    self.bind(socket);
                    self.start_stream();
                },
                None => self.abort(ErrorCondition::NoDirectConnection),
            }
            return;
        }

        let Some(index) = self.hosts.iter().position(|h| h.jid == *jid) else {
            self.abort_with(ErrorCondition::InvalidHost, jid.to_string());
            return;
        };
        if !self.hosts[index].is_valid() {
            self.abort_with(ErrorCondition::InvalidHostAddress, self.hosts[index].to_string());
            return;
        }
        self.spawn_connect(index);
    }

    fn on_hosts_offered(&mut self, listener: ListenerId, request: RequestId, offer: HostsOffer) {
        self.transport.unregister_listener(listener);
        if !self.is_opening() {
            return;
        }
        self.offer_request = Some(request.clone());

        if offer.mode != StreamMode::Tcp {
            let notice = Payload::error_reply(Some(request), StanzaErrorCondition::NotAcceptable);
            if let Err(e) = self.transport.send_notice(&self.shared.sid, &self.shared.peer, notice) {
                tracing::warn!(sid = %self.shared.sid, "Failed to refuse stream mode: {}", e);
            }
            self.abort(ErrorCondition::InvalidMode);
            return;
        }

        if let Some(key) = offer.dstaddr.as_ref().filter(|k| !k.is_empty()) {
            self.shared.lock().connect_key = key.clone();
        }
        self.hosts = hosts::accept_offered(&offer);
        self.check_next_host(0);
    }

    fn check_next_host(&mut self, index: usize) {
        if index < self.hosts.len() {
            self.spawn_connect(index);
            return;
        }

        let notice = Payload::error_reply(
            self.offer_request.clone(),
            StanzaErrorCondition::ItemNotFound,
        );
        if let Err(e) = self.transport.send_notice(&self.shared.sid, &self.shared.peer, notice) {
            tracing::warn!(sid = %self.shared.sid, "Failed to report unreachable hosts: {}", e);
        }
        self.abort(ErrorCondition::HostsUnreachable);
    }

    fn spawn_connect(&self, index: usize) {
        let candidate = self.hosts[index].clone();
        let key = self.shared.connect_key();
        let settings = self.shared.settings();
        let inbox = self.shared.inbox.clone();
        let generation = self.generation;

        tracing::debug!(sid = %self.shared.sid, "Connecting to stream host {}", candidate);
        tokio::spawn(async move {
            let result = socks5::connect_candidate(
                &candidate,
                &key,
                &settings.network_proxy,
                settings.connect_timeout(),
            )
            .await;
            let _ = inbox.send(Command::HostConnected {
                generation,
                index,
                result,
            });
        });
    }

    fn on_host_connected(&mut self, index: usize, result: Result<TcpStream>) {
        match (self.shared.role, result) {
            (_, Ok(socket)) => {
                self.host_index = Some(index);
                self.bind(socket);
                self.activate_stream(index);
            },
            (StreamRole::Initiator, Err(e)) => {
                self.abort_with(ErrorCondition::HostNotConnected, e.to_string())
            },
            (StreamRole::Target, Err(e)) => {
                tracing::warn!(
                    sid = %self.shared.sid,
                    "Stream host {} failed: {}",
                    self.hosts[index],
                    e
                );
                self.check_next_host(index + 1);
            },
        }
    }

    fn activate_stream(&mut self, index: usize) {
        let host = self.hosts[index].jid.clone();
        let sid = self.shared.sid.clone();

        match self.shared.role {
            StreamRole::Initiator => {
                let activation = Activation {
                    sid: sid.clone(),
                    target: self.shared.peer.clone(),
                };
                match self.transport.send_request(
                    &sid,
                    &host,
                    Payload::Activate(activation),
                    ACTIVATE_REQUEST_TIMEOUT,
                ) {
                    Ok(id) => {
                        tracing::debug!(sid = %sid, "Activating stream on {}", host);
                        self.pending.insert(id, Pending::Activate);
                    },
                    Err(e) => self.abort_with(ErrorCondition::NotActivated, e.to_string()),
                }
            },
            StreamRole::Target => {
                let Some(request) = self.offer_request.clone() else {
                    self.abort(ErrorCondition::NotActivated);
                    return;
                };
                let used = HostUsed {
                    in_reply_to: request,
                    sid: sid.clone(),
                    jid: host,
                };
                match self
                    .transport
                    .send_notice(&sid, &self.shared.peer, Payload::HostUsed(used))
                {
                    Ok(()) => self.start_stream(),
                    Err(e) => self.abort_with(ErrorCondition::NotActivated, e.to_string()),
                }
            },
        }
    }

    fn bind(&mut self, socket: TcpStream) {
        self.socket = Some(socket);
        self.local_socket = None;
        self.shared.set_socket_attached(true);
    }

    fn start_stream(&mut self) {
        if let Some(host) = self.host_index.and_then(|i| self.hosts.get(i)) {
            tracing::debug!(sid = %self.shared.sid, "Streaming through {}", host);
        }
        self.shared.set_state(StreamState::Opened);
    }

    fn pull_socket(&mut self) {
        let Some(socket) = self.socket.as_ref() else {
            return;
        };
        let room = MAX_BUFFER_SIZE.saturating_sub(self.shared.lock().read_buffer.len());
        if room == 0 {
            return;
        }

        let mut chunk = vec![0u8; room.min(BUFFER_INCREMENT_SIZE)];
        match socket.try_read(&mut chunk) {
            Ok(0) => self.on_disconnected(None),
            Ok(n) => {
                if let Err(e) = self.shared.push_read(&chunk[..n]) {
                    tracing::warn!(sid = %self.shared.sid, "Dropping received data: {}", e);
                }
            },
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {},
            Err(e) => self.on_disconnected(Some(e)),
        }
    }

    fn on_disconnected(&mut self, error: Option<io::Error>) {
        self.socket = None;
        self.shared.set_socket_attached(false);

        if self.is_opening() {
            let message = match error {
                Some(e) => e.to_string(),
                None => "Stream host closed the connection".to_string(),
            };
            self.abort_with(ErrorCondition::HostNotConnected, message);
            return;
        }

        match error {
            Some(e) => {
                tracing::warn!(sid = %self.shared.sid, "Stream host disconnected: {}", e);
                self.shared
                    .set_error(StreamError::with_message(ErrorCondition::HostDisconnected, e.to_string()));
            },
            None => tracing::debug!(sid = %self.shared.sid, "Peer closed the stream"),
        }

        // Buffered data stays readable until drained
        if self.shared.lock().read_buffer.is_empty() {
            self.shared.set_state(StreamState::Closed);
        } else {
            self.shared.emit(SessionEvent::ReadChannelFinished);
        }
    }

    /// Hand as much of the write buffer to the socket as it takes without
    /// blocking. The unsent tail stays buffered for the next readiness.
    async fn push_socket(&mut self) {
        let Some(socket) = self.socket.as_ref() else {
            return;
        };
        let chunk = self.shared.peek_write(MAX_BUFFER_SIZE);
        if chunk.is_empty() {
            return;
        }

        match socket.try_write(&chunk) {
            Ok(0) => return,
            Ok(n) => self.shared.mark_written(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
            Err(e) => {
                self.abort_with(ErrorCondition::DataNotSent, e.to_string());
                return;
            },
        }

        if self.shared.state() == StreamState::Closing {
            self.close_if_drained().await;
        }
    }

    /// Finish a graceful close once every queued byte reached the socket.
    async fn close_if_drained(&mut self) {
        if self.shared.state() != StreamState::Closing {
            return;
        }
        if !self.shared.lock().write_buffer.is_empty() && self.socket.is_some() {
            return;
        }

        if let Some(mut socket) = self.socket.take() {
            if let Err(e) = socket.shutdown().await {
                tracing::debug!(sid = %self.shared.sid, "Socket shutdown failed: {}", e);
            }
        }
        self.shared.set_state(StreamState::Closed);
    }

    fn teardown(&mut self) {
        let listener = self.shared.lock().listener.take();
        if let Some(listener) = listener {
            self.transport.unregister_listener(listener);
        }
        self.pending.clear();
        self.relays.clear();
        self.hosts.clear();
        self.host_index = None;
        self.offer_request = None;
        self.local_socket = None;
        self.socket = None;
    }
}

/// Resolves when `socket` has data (or an error); pends forever without one.
async fn readable(socket: &Option<TcpStream>) -> io::Result<()> {
    match socket {
        Some(socket) => socket.readable().await,
        None => std::future::pending().await,
    }
}

/// Resolves when `socket` can take more bytes; pends forever without one.
async fn writable(socket: &Option<TcpStream>) -> io::Result<()> {
    match socket {
        Some(socket) => socket.writable().await,
        None => std::future::pending().await,
    }
}
