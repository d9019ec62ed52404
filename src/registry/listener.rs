//! Local SOCKS5 listener accepting direct candidate connections.
//!
//! Peers that pick one of our direct candidates connect here and present the
//! session's connect key as their CONNECT destination. The first connection
//! presenting a registered key claims it, gets a success reply and is handed
//! to the session; unknown or already claimed keys are refused.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use super::LocalConnectionRegistry;
use crate::error::{Result, S5bError};
use crate::transport::socks5;

/// Time allowed for an inbound client to complete the handshake.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// TCP listener feeding a [`LocalConnectionRegistry`].
#[derive(Debug)]
pub struct LocalListener {
    listener: TcpListener,
    registry: LocalConnectionRegistry,
}

impl LocalListener {
    /// Bind `addr` and publish the bound port on `registry`.
    pub async fn bind(addr: SocketAddr, registry: LocalConnectionRegistry) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            S5bError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to bind local listener to {}: {}", addr, e),
            ))
        })?;
        let local = listener.local_addr()?;
        registry.set_listening_port(local.port());
        tracing::info!("Bytestream listener bound on {}", local);

        Ok(Self { listener, registry })
    }

    /// Address actually bound.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the listener fails.
    pub async fn run(self) -> Result<()> {
        loop {
            let (stream, peer) = self.listener.accept().await?;
            let registry = self.registry.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer, &registry).await {
                    tracing::debug!("Inbound bytestream connection from {} dropped: {}", peer, e);
                }
            });
        }
    }

    /// Run the accept loop on the current runtime.
    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    registry: &LocalConnectionRegistry,
) -> Result<()> {
    let (key, handler) = tokio::time::timeout(HANDSHAKE_TIMEOUT, async {
        socks5::server_greeting(&mut stream).await?;
        let (key, _port) = socks5::server_read_connect(&mut stream).await?;

        match registry.claim(&key) {
            Some(handler) => {
                socks5::server_reply(&mut stream, socks5::REP_SUCCEEDED, &key).await?;
                Ok((key, handler))
            },
            None => {
                socks5::server_reply(&mut stream, socks5::REP_HOST_UNREACHABLE, &key).await?;
                Err(S5bError::Protocol(format!("Unknown or used connect key from {}", peer)))
            },
        }
    })
    .await??;

    stream.set_nodelay(true)?;
    tracing::debug!(key = %key, "Bytestream connection accepted from {}", peer);
    handler(stream);
    Ok(())
}
