//! Raw ICMPv4 socket driven by the tokio reactor

use super::utils::{is_permission_error, is_protocol_unavailable};
use super::EchoTransport;
use crate::error::PingError;
use async_trait::async_trait;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::{self, Read};
use std::net::{Ipv4Addr, SocketAddrV4};
use tokio::io::unix::AsyncFd;
use tracing::debug;

/// Raw ICMPv4 socket registered with the reactor for readability
///
/// Requires root or `CAP_NET_RAW`. Dropping the value deregisters the
/// descriptor and closes it.
pub struct RawIcmpSocket {
    fd: AsyncFd<Socket>,
}

impl RawIcmpSocket {
    /// Open the socket and register it with the current runtime
    ///
    /// Must be called from within a tokio runtime context.
    pub fn open() -> Result<Self, PingError> {
        let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))
            .map_err(classify_open_error)?;
        socket
            .set_nonblocking(true)
            .map_err(|e| PingError::SocketError(format!("Failed to set non-blocking: {}", e)))?;

        let fd = AsyncFd::new(socket).map_err(|e| {
            PingError::SocketError(format!("Failed to register with reactor: {}", e))
        })?;
        debug!("raw ICMP socket opened");
        Ok(Self { fd })
    }
}

fn classify_open_error(err: io::Error) -> PingError {
    if is_permission_error(&err) {
        PingError::InsufficientPermissions {
            required: "root or CAP_NET_RAW capability".to_string(),
            suggestion: "Run with sudo, or grant the binary cap_net_raw".to_string(),
        }
    } else if is_protocol_unavailable(&err) {
        PingError::ProtocolUnavailable(err.to_string())
    } else {
        PingError::SocketError(err.to_string())
    }
}

#[async_trait]
impl EchoTransport for RawIcmpSocket {
    fn send_to(&self, packet: &[u8], dest: Ipv4Addr) -> io::Result<usize> {
        let addr = SockAddr::from(SocketAddrV4::new(dest, 0));
        self.fd.get_ref().send_to(packet, &addr)
    }

    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.fd.readable().await?;
            match guard.try_io(|inner| {
                let mut socket: &Socket = inner.get_ref();
                socket.read(buf)
            }) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }
}
