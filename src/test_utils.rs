//! Shared helpers for unit tests

use crate::probe::{PingCallback, PingReply};
use crate::socket::EchoTransport;
use async_trait::async_trait;
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::{self, MutableIpv4Packet};
use std::io;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

pub use crate::dns::test_utils::StaticResolver;

/// Transport that records outgoing packets and replays scripted datagrams
pub struct MockTransport {
    sent_tx: mpsc::UnboundedSender<(Vec<u8>, Ipv4Addr)>,
    sent_rx: Mutex<mpsc::UnboundedReceiver<(Vec<u8>, Ipv4Addr)>>,
    inbound_tx: mpsc::UnboundedSender<io::Result<Vec<u8>>>,
    inbound_rx: Mutex<mpsc::UnboundedReceiver<io::Result<Vec<u8>>>>,
    attempts: AtomicUsize,
    successes: AtomicUsize,
    fail_sends: AtomicBool,
    short_writes: AtomicBool,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            sent_tx,
            sent_rx: Mutex::new(sent_rx),
            inbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
            attempts: AtomicUsize::new(0),
            successes: AtomicUsize::new(0),
            fail_sends: AtomicBool::new(false),
            short_writes: AtomicBool::new(false),
        })
    }

    /// Queue a datagram for the next `recv`
    pub fn deliver(&self, datagram: Vec<u8>) {
        let _ = self.inbound_tx.send(Ok(datagram));
    }

    /// Make the next `recv` fail
    pub fn deliver_error(&self, kind: io::ErrorKind) {
        let _ = self.inbound_tx.send(Err(io::Error::from(kind)));
    }

    /// Make every `send_to` fail until reset
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Make every `send_to` write one byte less than asked
    pub fn set_short_writes(&self, short: bool) {
        self.short_writes.store(short, Ordering::SeqCst);
    }

    /// Number of `send_to` calls, failed ones included
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Number of packets accepted in full
    pub fn sent_count(&self) -> usize {
        self.successes.load(Ordering::SeqCst)
    }

    /// Wait for the next fully sent packet
    pub async fn next_sent(&self) -> (Vec<u8>, Ipv4Addr) {
        let mut rx = self.sent_rx.lock().await;
        match rx.recv().await {
            Some(sent) => sent,
            None => std::future::pending().await,
        }
    }

    /// Fully sent packets not yet taken by `next_sent`
    pub async fn drain_sent(&self) -> Vec<(Vec<u8>, Ipv4Addr)> {
        let mut rx = self.sent_rx.lock().await;
        let mut packets = Vec::new();
        while let Ok(sent) = rx.try_recv() {
            packets.push(sent);
        }
        packets
    }
}

#[async_trait]
impl EchoTransport for MockTransport {
    fn send_to(&self, packet: &[u8], dest: Ipv4Addr) -> io::Result<usize> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(io::Error::from(io::ErrorKind::WouldBlock));
        }
        if self.short_writes.load(Ordering::SeqCst) {
            return Ok(packet.len() - 1);
        }
        self.successes.fetch_add(1, Ordering::SeqCst);
        let _ = self.sent_tx.send((packet.to_vec(), dest));
        Ok(packet.len())
    }

    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut rx = self.inbound_rx.lock().await;
        match rx.recv().await {
            Some(Ok(datagram)) => {
                let n = datagram.len().min(buf.len());
                buf[..n].copy_from_slice(&datagram[..n]);
                Ok(n)
            }
            Some(Err(e)) => Err(e),
            None => std::future::pending().await,
        }
    }
}

/// Callback forwarding every reply into a channel
pub fn recording_callback() -> (PingCallback, mpsc::UnboundedReceiver<PingReply>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback: PingCallback = Arc::new(move |reply: &PingReply| {
        let _ = tx.send(reply.clone());
    });
    (callback, rx)
}

/// RFC 1071 Internet checksum; zero when run over a packet with a valid checksum
pub fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for word in &mut chunks {
        sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
    }
    if let [last] = chunks.remainder() {
        sum += u32::from(*last) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// Wrap an ICMP message in a minimal IPv4 header from 127.0.0.1 to itself
pub fn ipv4_datagram(ttl: u8, icmp: &[u8]) -> Vec<u8> {
    let mut buf = vec![0u8; 20 + icmp.len()];
    if let Some(mut ip) = MutableIpv4Packet::new(&mut buf) {
        ip.set_version(4);
        ip.set_header_length(5);
        ip.set_total_length((20 + icmp.len()) as u16);
        ip.set_ttl(ttl);
        ip.set_next_level_protocol(IpNextHeaderProtocols::Icmp);
        ip.set_source(Ipv4Addr::LOCALHOST);
        ip.set_destination(Ipv4Addr::LOCALHOST);
        let checksum = ipv4::checksum(&ip.to_immutable());
        ip.set_checksum(checksum);
    }
    buf[20..].copy_from_slice(icmp);
    buf
}

/// Turn an echo request into the datagram a peer would answer with
pub fn echo_reply_for(request: &[u8], ttl: u8) -> Vec<u8> {
    let mut reply = request.to_vec();
    reply[0] = 0;
    set_icmp_checksum(&mut reply);
    ipv4_datagram(ttl, &reply)
}

/// Build an ICMP error datagram quoting `request` behind its own IP header
pub fn icmp_error_for(request: &[u8], icmp_type: u8, code: u8) -> Vec<u8> {
    let mut message = vec![icmp_type, code, 0, 0, 0, 0, 0, 0];
    message.extend_from_slice(&ipv4_datagram(64, request));
    set_icmp_checksum(&mut message);
    ipv4_datagram(250, &message)
}

fn set_icmp_checksum(message: &mut [u8]) {
    message[2] = 0;
    message[3] = 0;
    let checksum = internet_checksum(message);
    message[2..4].copy_from_slice(&checksum.to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internet_checksum_known_vector() {
        // RFC 1071 example words
        let data = [0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7];
        assert_eq!(internet_checksum(&data), !0xddf2);
    }

    #[test]
    fn test_internet_checksum_odd_length() {
        assert_eq!(internet_checksum(&[0xab]), !0xab00);
    }

    #[test]
    fn test_helpers_produce_valid_checksums() {
        let request = crate::packet::encode_echo_request(33, 5, 0, 1, 0);
        let reply = echo_reply_for(&request, 64);
        assert_eq!(internet_checksum(&reply[..20]), 0);
        assert_eq!(internet_checksum(&reply[20..]), 0);

        let error = icmp_error_for(&request, 3, 3);
        assert_eq!(internet_checksum(&error[20..]), 0);
    }
}
