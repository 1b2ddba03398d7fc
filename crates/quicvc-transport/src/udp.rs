// ============================================
// File: crates/quicvc-transport/src/udp.rs
// ============================================
//! # UDP Transport Implementation
//!
//! ## Creation Reason
//! Every QUICVC connection talks over UDP. This wraps Tokio's socket with
//! the `Transport` trait and adds a shutdown signal that unblocks readers.
//!
//! ## Main Functionality
//! - `UdpTransport::bind` / `bind_addr`: listener sockets
//! - `UdpTransport::bind_ephemeral`: per-connection client sockets
//! - Async send/receive, shutdown that wakes `recv`
//!
//! ## Design Choices
//! - SO_REUSEADDR for quick rebinding after restart
//! - Shutdown is a `watch` channel so a parked `recv` returns promptly
//!
//! ## ⚠️ Important Note for Next Developer
//! - UDP is connectionless: no guaranteed delivery, no retransmission here
//! - Maximum UDP payload is 65507 bytes
//!
//! ## Last Modified
//! v0.1.0 - Initial UDP transport implementation

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info, trace};

use crate::error::{Result, TransportError};
use crate::traits::{PacketSource, Transport};

/// Largest payload a single UDP datagram can carry over IPv4.
pub const MAX_UDP_PAYLOAD: usize = 65_507;

// ============================================
// UdpTransport
// ============================================

/// UDP-based transport implementation.
///
/// # Example
/// ```ignore
/// use quicvc_transport::{Transport, UdpTransport};
///
/// let transport = UdpTransport::bind("0.0.0.0:49497").await?;
/// let mut buf = [0u8; 2048];
/// let (len, source) = transport.recv(&mut buf).await?;
/// transport.send(&buf[..len], &source.addr).await?;
/// ```
pub struct UdpTransport {
    /// Underlying UDP socket
    socket: UdpSocket,
    /// Local address we're bound to
    local_addr: SocketAddr,
    /// Shutdown signal, `true` once shut down
    shutdown: watch::Sender<bool>,
}

impl UdpTransport {
    /// Creates a new UDP transport bound to the specified address.
    ///
    /// # Errors
    /// - `InvalidAddress`: If `addr` does not parse
    /// - `BindFailed` / `AddressInUse`: If binding fails
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self> {
        let addr_str = addr.as_ref();
        let socket_addr: SocketAddr =
            addr_str.parse().map_err(|_| TransportError::InvalidAddress {
                addr: addr_str.to_string(),
            })?;

        Self::bind_addr(socket_addr).await
    }

    /// Binds an ephemeral local port suitable for talking to `remote`.
    ///
    /// # Errors
    /// Returns error if binding fails.
    pub async fn bind_ephemeral(remote: SocketAddr) -> Result<Self> {
        let local: SocketAddr = if remote.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        Self::bind_addr(local).await
    }

    /// Creates a new UDP transport bound to the specified socket address.
    ///
    /// # Errors
    /// Returns error if binding fails.
    #[allow(clippy::unused_async)]
    pub async fn bind_addr(addr: SocketAddr) -> Result<Self> {
        debug!(addr = %addr, "Binding UDP transport");

        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };

        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| TransportError::io("creating UDP socket", e))?;

        socket
            .set_reuse_address(true)
            .map_err(|e| TransportError::io("setting SO_REUSEADDR", e))?;

        socket
            .set_nonblocking(true)
            .map_err(|e| TransportError::io("setting non-blocking", e))?;

        socket.bind(&addr.into()).map_err(|e| {
            if e.kind() == std::io::ErrorKind::AddrInUse {
                TransportError::AddressInUse { addr }
            } else {
                TransportError::bind_failed(addr, e.to_string())
            }
        })?;

        let std_socket: std::net::UdpSocket = socket.into();
        let tokio_socket = UdpSocket::from_std(std_socket)
            .map_err(|e| TransportError::io("converting to Tokio socket", e))?;

        let local_addr = tokio_socket
            .local_addr()
            .map_err(|e| TransportError::io("getting local address", e))?;

        info!(local = %local_addr, "UDP transport bound");

        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            socket: tokio_socket,
            local_addr,
            shutdown,
        })
    }

    /// Checks if the transport has been shut down.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn recv(&self, buf: &mut [u8]) -> Result<(usize, PacketSource)> {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow_and_update() {
            return Err(TransportError::ShuttingDown);
        }

        tokio::select! {
            result = self.socket.recv_from(buf) => {
                let (len, addr) = result.map_err(|e| TransportError::ReceiveFailed {
                    reason: e.to_string(),
                })?;
                trace!(len, from = %addr, "Received datagram");
                Ok((len, PacketSource::new(addr)))
            }
            _ = shutdown.changed() => Err(TransportError::ShuttingDown),
        }
    }

    async fn send(&self, buf: &[u8], dest: &SocketAddr) -> Result<usize> {
        if self.is_shutdown() {
            return Err(TransportError::ShuttingDown);
        }
        if buf.len() > MAX_UDP_PAYLOAD {
            return Err(TransportError::DatagramTooLarge {
                size: buf.len(),
                max: MAX_UDP_PAYLOAD,
            });
        }

        let len = self
            .socket
            .send_to(buf, dest)
            .await
            .map_err(|e| TransportError::SendFailed {
                dest: *dest,
                reason: e.to_string(),
            })?;

        trace!(len, to = %dest, "Sent datagram");

        Ok(len)
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.local_addr)
    }

    async fn shutdown(&self) -> Result<()> {
        if !self.shutdown.send_replace(true) {
            debug!(local = %self.local_addr, "UDP transport shut down");
        }
        Ok(())
    }

    fn is_active(&self) -> bool {
        !self.is_shutdown()
    }
}

impl std::fmt::Debug for UdpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpTransport")
            .field("local_addr", &self.local_addr)
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_bind_and_local_addr() {
        let transport = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let addr = transport.local_addr().unwrap();

        assert_eq!(addr.ip(), Ipv4Addr::LOCALHOST);
        assert!(addr.port() > 0);
    }

    #[tokio::test]
    async fn test_send_recv_loopback() {
        let server = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let client = UdpTransport::bind("127.0.0.1:0").await.unwrap();

        let server_addr = server.local_addr().unwrap();
        let client_addr = client.local_addr().unwrap();

        let message = b"Hello, QUICVC!";
        client.send(message, &server_addr).await.unwrap();

        let mut buf = [0u8; 1024];
        let (len, source) = server.recv(&mut buf).await.unwrap();

        assert_eq!(&buf[..len], message);
        assert_eq!(source.addr, client_addr);
    }

    #[tokio::test]
    async fn test_shutdown_wakes_pending_recv() {
        let transport = Arc::new(UdpTransport::bind("127.0.0.1:0").await.unwrap());

        let reader = {
            let transport = Arc::clone(&transport);
            tokio::spawn(async move {
                let mut buf = [0u8; 64];
                transport.recv(&mut buf).await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        transport.shutdown().await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(TransportError::ShuttingDown)));
        assert!(!transport.is_active());

        let sent = transport.send(b"x", &"127.0.0.1:9".parse().unwrap()).await;
        assert!(matches!(sent, Err(TransportError::ShuttingDown)));
    }

    #[tokio::test]
    async fn test_oversized_datagram_rejected() {
        let transport = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let big = vec![0u8; MAX_UDP_PAYLOAD + 1];
        let result = transport.send(&big, &"127.0.0.1:9".parse().unwrap()).await;
        assert!(matches!(result, Err(TransportError::DatagramTooLarge { .. })));
    }

    #[tokio::test]
    async fn test_invalid_address() {
        let result = UdpTransport::bind("not-an-address").await;
        assert!(matches!(result, Err(TransportError::InvalidAddress { .. })));
    }
}
