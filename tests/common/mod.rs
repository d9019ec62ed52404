//! Shared fixtures for end-to-end tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use s5b::{
    Jid, ListenerFilter, ListenerId, LocalConnectionRegistry, LocalListener, Payload, RequestId,
    Result, StanzaTransport, StreamSession, StreamState,
};
use tokio::net::TcpStream;
use tokio::sync::oneshot;

/// How long any single wait in a test may take.
pub const WAIT: Duration = Duration::from_secs(5);

/// A request the session sent through the transport.
#[derive(Debug, Clone)]
pub struct SentRequest {
    pub id: RequestId,
    pub to: Jid,
    pub payload: Payload,
    pub timeout: Duration,
}

/// Stanza transport that records everything and never delivers.
#[derive(Default)]
pub struct MockTransport {
    next_id: AtomicU64,
    requests: Mutex<Vec<SentRequest>>,
    notices: Mutex<Vec<(Jid, Payload)>>,
    listeners: Mutex<Vec<(ListenerId, ListenerFilter)>>,
    unregistered: Mutex<Vec<ListenerId>>,
}

impl MockTransport {
    pub fn requests(&self) -> Vec<SentRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn notices(&self) -> Vec<(Jid, Payload)> {
        self.notices.lock().unwrap().clone()
    }

    pub fn unregistered(&self) -> Vec<ListenerId> {
        self.unregistered.lock().unwrap().clone()
    }

    /// Poll until a request matching `pred` was sent.
    pub async fn wait_for_request(&self, pred: impl Fn(&SentRequest) -> bool) -> SentRequest {
        poll(|| self.requests().into_iter().find(|r| pred(r))).await
    }

    /// Poll until a notice matching `pred` was sent.
    pub async fn wait_for_notice(&self, pred: impl Fn(&Payload) -> bool) -> (Jid, Payload) {
        poll(|| self.notices().into_iter().find(|(_, p)| pred(p))).await
    }

    /// Poll until a listener was registered.
    pub async fn wait_for_listener(&self) -> (ListenerId, ListenerFilter) {
        poll(|| self.listeners.lock().unwrap().last().cloned()).await
    }
}

impl StanzaTransport for MockTransport {
    fn send_request(
        &self,
        _session_id: &str,
        to: &Jid,
        payload: Payload,
        timeout: Duration,
    ) -> Result<RequestId> {
        let id = RequestId::new(format!("req-{}", self.next_id.fetch_add(1, Ordering::SeqCst)));
        self.requests.lock().unwrap().push(SentRequest {
            id: id.clone(),
            to: to.clone(),
            payload,
            timeout,
        });
        Ok(id)
    }

    fn send_notice(&self, _session_id: &str, to: &Jid, payload: Payload) -> Result<()> {
        self.notices.lock().unwrap().push((to.clone(), payload));
        Ok(())
    }

    fn register_listener(&self, filter: ListenerFilter) -> Result<ListenerId> {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.listeners.lock().unwrap().push((id, filter));
        Ok(id)
    }

    fn unregister_listener(&self, listener: ListenerId) {
        self.unregistered.lock().unwrap().push(listener);
    }
}

async fn poll<T>(mut probe: impl FnMut() -> Option<T>) -> T {
    tokio::time::timeout(WAIT, async {
        loop {
            if let Some(found) = probe() {
                return found;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time")
}

/// Wait until `session` reports `state`.
pub async fn wait_for_state(session: &StreamSession, state: StreamState) {
    let mut states = session.state_changes();
    tokio::time::timeout(WAIT, states.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("session never reached {:?}, now {:?}", state, session.state()))
        .expect("state channel closed");
}

/// A port nothing listens on.
pub async fn closed_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// SOCKS5 stream host on loopback that hands over the socket matching `key`.
pub async fn stream_host(key: &str) -> (SocketAddr, oneshot::Receiver<TcpStream>) {
    let registry = LocalConnectionRegistry::new();
    let (tx, rx) = oneshot::channel();
    assert!(registry.register(
        key,
        Box::new(move |socket| {
            let _ = tx.send(socket);
        })
    ));

    let listener = LocalListener::bind("127.0.0.1:0".parse().unwrap(), registry)
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    listener.spawn();
    (addr, rx)
}
