//! Socket abstraction for echo traffic
//!
//! The engine never touches a socket directly. It sends through and receives
//! from an [`EchoTransport`], which is a raw ICMPv4 socket in production and
//! a scripted mock in tests.

#[cfg(unix)]
pub mod raw;
pub mod utils;

#[cfg(unix)]
pub use raw::RawIcmpSocket;

use async_trait::async_trait;
use std::io;
use std::net::Ipv4Addr;

/// Datagram transport carrying ICMP echo traffic
///
/// `send_to` must not block: a socket that is not ready reports an error
/// and the engine counts it as a transmit failure. `recv` completes with
/// exactly one datagram, IP header included, per call.
#[async_trait]
pub trait EchoTransport: Send + Sync {
    /// Send one ICMP message to `dest`, returning the number of bytes written
    fn send_to(&self, packet: &[u8], dest: Ipv4Addr) -> io::Result<usize>;

    /// Wait for the next datagram and copy it into `buf`
    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize>;
}
