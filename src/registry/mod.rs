//! Local connection registry.
//!
//! A session that offers itself as a direct candidate registers its connect
//! key here. When the local listener accepts a SOCKS5 connection whose
//! CONNECT destination equals a registered key, the socket is handed to the
//! session that registered it, exactly once.
//!
//! One registry exists per process. It is a cheap cloneable handle and is
//! injected into every session rather than reached as a global.

mod listener;

pub use listener::LocalListener;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use sha1::{Digest, Sha1};
use tokio::net::TcpStream;

use crate::protocol::Jid;

/// Callback receiving the accepted socket for a registered key.
pub type AcceptHandler = Box<dyn FnOnce(TcpStream) + Send>;

/// Derive the connect key shared by both sides of a session.
///
/// This is the `DST.ADDR` of XEP-0065: lowercase hex SHA-1 of the session
/// id, the initiator's full address and the target's full address.
pub fn connection_key(session_id: &str, initiator: &Jid, target: &Jid) -> String {
    let mut hasher = Sha1::new();
    hasher.update(session_id.as_bytes());
    hasher.update(initiator.as_str().as_bytes());
    hasher.update(target.as_str().as_bytes());
    hex::encode(hasher.finalize())
}

/// Pending registration for one key.
struct Entry {
    /// Taken on the first matching accept
    handler: Option<AcceptHandler>,
}

/// Process-wide table of keys awaiting an inbound connection.
#[derive(Clone, Default)]
pub struct LocalConnectionRegistry {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    listening_port: Arc<AtomicU16>,
}

impl LocalConnectionRegistry {
    /// Create an empty registry with no listening port.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry advertising `port` for direct candidates.
    pub fn with_listening_port(port: u16) -> Self {
        let registry = Self::new();
        registry.set_listening_port(port);
        registry
    }

    /// Port direct candidates are advertised on (0 when nothing listens).
    pub fn listening_port(&self) -> u16 {
        self.listening_port.load(Ordering::Relaxed)
    }

    /// Update the advertised port, normally called by [`LocalListener::bind`].
    pub fn set_listening_port(&self, port: u16) {
        self.listening_port.store(port, Ordering::Relaxed);
    }

    /// Register `key`, returning false if it is already registered.
    pub fn register(&self, key: &str, handler: AcceptHandler) -> bool {
        let mut entries = self.entries();
        if entries.contains_key(key) {
            tracing::debug!(key, "Local connection key already registered");
            return false;
        }
        entries.insert(
            key.to_string(),
            Entry {
                handler: Some(handler),
            },
        );
        tracing::debug!(key, "Local connection key registered");
        true
    }

    /// Remove `key`. Removing an unknown key does nothing.
    pub fn unregister(&self, key: &str) {
        if self.entries().remove(key).is_some() {
            tracing::debug!(key, "Local connection key removed");
        }
    }

    /// Is `key` currently registered?
    pub fn contains(&self, key: &str) -> bool {
        self.entries().contains_key(key)
    }

    /// Number of registered keys.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// True when no key is registered.
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Hand an accepted socket to the session waiting on `key`.
    ///
    /// Returns false (and drops the socket) when no session waits on the
    /// key or the key was already matched.
    pub fn on_accepted(&self, key: &str, socket: TcpStream) -> bool {
        match self.claim(key) {
            Some(handler) => {
                tracing::debug!(key, "Local connection matched");
                // Run outside the lock so the handler may touch the registry
                handler(socket);
                true
            },
            None => {
                tracing::debug!(key, "Local connection ignored, nobody waiting");
                false
            },
        }
    }

    /// Take the handler waiting on `key`, so at most one inbound
    /// connection is ever told it matched.
    pub fn claim(&self, key: &str) -> Option<AcceptHandler> {
        self.entries()
            .get_mut(key)
            .and_then(|entry| entry.handler.take())
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for LocalConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalConnectionRegistry")
            .field("keys", &self.len())
            .field("listening_port", &self.listening_port())
            .finish()
    }
}
