//! SOCKS5 handshake (RFC 1928) as used by bytestream candidates.
//!
//! A bytestream candidate handshake never asks the host to reach a real
//! destination: the CONNECT request carries the session's connect key as a
//! domain name with port 0, and the host uses it to pair both sides.
//!
//! Both halves of the exchange live here. The client side is used when a
//! session connects to a candidate; the server side is used by the local
//! listener that accepts direct connections.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use super::NetworkProxy;
use crate::error::{Result, S5bError};
use crate::protocol::HostCandidate;

/// Protocol version byte
pub const SOCKS5_VERSION: u8 = 0x05;

/// No authentication required
pub const AUTH_NONE: u8 = 0x00;
/// Username/password authentication (RFC 1929)
pub const AUTH_PASSWORD: u8 = 0x02;
/// No acceptable method
pub const AUTH_NO_ACCEPTABLE: u8 = 0xFF;
/// Username/password subnegotiation version
pub const AUTH_PASSWORD_VERSION: u8 = 0x01;

/// CONNECT command
pub const CMD_CONNECT: u8 = 0x01;

/// IPv4 address type
pub const ATYP_IPV4: u8 = 0x01;
/// Domain name address type
pub const ATYP_DOMAIN: u8 = 0x03;
/// IPv6 address type
pub const ATYP_IPV6: u8 = 0x04;

/// Succeeded
pub const REP_SUCCEEDED: u8 = 0x00;
/// General server failure
pub const REP_GENERAL_FAILURE: u8 = 0x01;
/// Host unreachable
pub const REP_HOST_UNREACHABLE: u8 = 0x04;
/// Command not supported
pub const REP_COMMAND_NOT_SUPPORTED: u8 = 0x07;
/// Address type not supported
pub const REP_ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;

/// Open a TCP connection to `candidate` and bind it to `connect_key`.
///
/// The TCP connect and the handshake are each bounded by `timeout`. With a
/// [`NetworkProxy::Socks5`] override the connection is first tunneled through
/// the upstream proxy.
pub async fn connect_candidate(
    candidate: &HostCandidate,
    connect_key: &str,
    proxy: &NetworkProxy,
    timeout: Duration,
) -> Result<TcpStream> {
    let mut stream = match proxy {
        NetworkProxy::Direct => {
            tokio::time::timeout(
                timeout,
                TcpStream::connect((candidate.host.as_str(), candidate.port)),
            )
            .await??
        },
        NetworkProxy::Socks5 { host, port, .. } => {
            let mut stream =
                tokio::time::timeout(timeout, TcpStream::connect((host.as_str(), *port))).await??;
            tokio::time::timeout(timeout, async {
                client_greeting(&mut stream, proxy.credentials()).await?;
                client_connect(&mut stream, &candidate.host, candidate.port).await
            })
            .await??;
            stream
        },
    };

    tokio::time::timeout(timeout, async {
        client_greeting(&mut stream, None).await?;
        client_connect(&mut stream, connect_key, 0).await
    })
    .await??;

    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Client greeting, with optional username/password authentication.
pub async fn client_greeting<S>(stream: &mut S, credentials: Option<(&str, &str)>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request: &[u8] = if credentials.is_some() {
        &[SOCKS5_VERSION, 2, AUTH_NONE, AUTH_PASSWORD]
    } else {
        &[SOCKS5_VERSION, 1, AUTH_NONE]
    };
    stream.write_all(request).await?;

    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).await?;
    if reply[0] != SOCKS5_VERSION {
        return Err(S5bError::Protocol(format!(
            "Unexpected SOCKS version {:#04x} in method reply",
            reply[0]
        )));
    }

    match (reply[1], credentials) {
        (AUTH_NONE, _) => Ok(()),
        (AUTH_PASSWORD, Some((user, pass))) => {
            if user.len() > 255 || pass.len() > 255 {
                return Err(S5bError::Protocol("Proxy credentials too long".to_string()));
            }
            let mut auth = Vec::with_capacity(3 + user.len() + pass.len());
            auth.push(AUTH_PASSWORD_VERSION);
            auth.push(user.len() as u8);
            auth.extend_from_slice(user.as_bytes());
            auth.push(pass.len() as u8);
            auth.extend_from_slice(pass.as_bytes());
            stream.write_all(&auth).await?;

            let mut status = [0u8; 2];
            stream.read_exact(&mut status).await?;
            if status[1] != 0 {
                return Err(S5bError::Protocol(
                    "Proxy authentication failed".to_string(),
                ));
            }
            Ok(())
        },
        (AUTH_NO_ACCEPTABLE, _) => Err(S5bError::Protocol(
            "No acceptable authentication method".to_string(),
        )),
        (method, _) => Err(S5bError::Protocol(format!(
            "Unsupported authentication method {:#04x}",
            method
        ))),
    }
}

/// CONNECT to a domain-name destination and wait for the reply.
pub async fn client_connect<S>(stream: &mut S, domain: &str, port: u16) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = connect_request(domain, port)?;
    stream.write_all(&request).await?;

    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;
    if header[0] != SOCKS5_VERSION {
        return Err(S5bError::Protocol(format!(
            "Unexpected SOCKS version {:#04x} in connect reply",
            header[0]
        )));
    }
    if header[1] != REP_SUCCEEDED {
        return Err(S5bError::Rejected(header[1]));
    }

    // Bound address and port are not needed, only consumed
    let addr_len = match header[3] {
        ATYP_IPV4 => 4,
        ATYP_IPV6 => 16,
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            len[0] as usize
        },
        other => {
            return Err(S5bError::Protocol(format!(
                "Unknown address type {:#04x} in connect reply",
                other
            )))
        },
    };
    let mut rest = vec![0u8; addr_len + 2];
    stream.read_exact(&mut rest).await?;
    Ok(())
}

/// Encode a CONNECT request for a domain-name destination.
pub fn connect_request(domain: &str, port: u16) -> Result<Vec<u8>> {
    if domain.is_empty() || domain.len() > 255 {
        return Err(S5bError::Protocol(format!(
            "Destination length {} out of range",
            domain.len()
        )));
    }
    let mut request = Vec::with_capacity(7 + domain.len());
    request.extend_from_slice(&[SOCKS5_VERSION, CMD_CONNECT, 0x00, ATYP_DOMAIN]);
    request.push(domain.len() as u8);
    request.extend_from_slice(domain.as_bytes());
    request.extend_from_slice(&port.to_be_bytes());
    Ok(request)
}

/// Server side: read the method list and accept no-auth.
pub async fn server_greeting<S>(stream: &mut S) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut header = [0u8; 2];
    stream.read_exact(&mut header).await?;
    if header[0] != SOCKS5_VERSION {
        return Err(S5bError::Protocol(format!(
            "Unexpected SOCKS version {:#04x} in greeting",
            header[0]
        )));
    }

    let mut methods = vec![0u8; header[1] as usize];
    stream.read_exact(&mut methods).await?;
    if !methods.contains(&AUTH_NONE) {
        stream
            .write_all(&[SOCKS5_VERSION, AUTH_NO_ACCEPTABLE])
            .await?;
        return Err(S5bError::Protocol(
            "Client does not offer no-auth".to_string(),
        ));
    }

    stream.write_all(&[SOCKS5_VERSION, AUTH_NONE]).await?;
    Ok(())
}

/// Server side: read a CONNECT request and return its domain and port.
///
/// Requests that are not CONNECT-to-domain are refused on the wire before
/// the error is returned.
pub async fn server_read_connect<S>(stream: &mut S) -> Result<(String, u16)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;
    if header[0] != SOCKS5_VERSION {
        return Err(S5bError::Protocol(format!(
            "Unexpected SOCKS version {:#04x} in request",
            header[0]
        )));
    }
    if header[1] != CMD_CONNECT {
        server_reply(stream, REP_COMMAND_NOT_SUPPORTED, "").await?;
        return Err(S5bError::Protocol(format!(
            "Unsupported command {:#04x}",
            header[1]
        )));
    }
    if header[3] != ATYP_DOMAIN {
        server_reply(stream, REP_ADDRESS_TYPE_NOT_SUPPORTED, "").await?;
        return Err(S5bError::Protocol(format!(
            "Unsupported address type {:#04x}",
            header[3]
        )));
    }

    let mut len = [0u8; 1];
    stream.read_exact(&mut len).await?;
    let mut domain = vec![0u8; len[0] as usize];
    stream.read_exact(&mut domain).await?;
    let mut port = [0u8; 2];
    stream.read_exact(&mut port).await?;

    let domain = String::from_utf8(domain)
        .map_err(|_| S5bError::Protocol("Destination is not UTF-8".to_string()))?;
    Ok((domain, u16::from_be_bytes(port)))
}

/// Server side: send a reply echoing `domain` as the bound address.
pub async fn server_reply<S>(stream: &mut S, reply: u8, domain: &str) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let domain = &domain.as_bytes()[..domain.len().min(255)];
    let mut out = Vec::with_capacity(7 + domain.len());
    out.extend_from_slice(&[SOCKS5_VERSION, reply, 0x00, ATYP_DOMAIN]);
    out.push(domain.len() as u8);
    out.extend_from_slice(domain);
    out.extend_from_slice(&[0x00, 0x00]);
    stream.write_all(&out).await?;
    stream.flush().await?;
    Ok(())
}
