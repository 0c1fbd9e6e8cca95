//! Reply demultiplexing
//!
//! Each readiness event yields one datagram. It is decoded, routed to its
//! host by correlation index and either completes a round-trip or is counted
//! and dropped. A rejected datagram never touches a host.
//!
//! An echo reply completes the outstanding probe, or the most recent one if
//! that already timed out and nothing newer is in flight. Anything else that
//! answers one of our requests closes the current round-trip as a timeout.

use crate::packet::{decode, DecodedPacket, IcmpKind, Rejection};
use crate::probe::{PingReply, PingStatus};
use crate::scheduler::{Completion, Engine, HostPhase};
use std::io;
use std::time::{Duration, SystemTime};
use tracing::{debug, trace, warn};

impl Engine {
    /// Handle one datagram read from the socket, IP header included
    pub(crate) fn on_datagram(&mut self, datagram: &[u8]) -> Option<Completion> {
        self.counters.receive_successes += 1;

        let packet = match decode(datagram, self.settings.identifier, self.registry.len()) {
            Ok(packet) => packet,
            Err(rejection) => {
                match rejection {
                    Rejection::Malformed => self.counters.too_short += 1,
                    Rejection::Foreign => self.counters.foreign += 1,
                    Rejection::Illegal => self.counters.illegal += 1,
                }
                trace!(?rejection, len = datagram.len(), "dropping datagram");
                return None;
            }
        };

        let host = self.registry.get(packet.index)?;
        let phase = host.phase();
        if phase == HostPhase::Idle {
            self.counters.stale += 1;
            trace!(index = packet.index, "dropping packet for idle host");
            return None;
        }

        match packet.kind {
            IcmpKind::EchoReply => {
                let current = phase == HostPhase::AwaitingReply
                    && packet.sequence == u16::from(host.sequence);
                let late = phase == HostPhase::ProbePending
                    && host.unanswered.map(u16::from) == Some(packet.sequence);
                if !current && !late {
                    self.counters.stale += 1;
                    trace!(
                        index = packet.index,
                        seq = packet.sequence,
                        expected = host.sequence,
                        "dropping stale reply"
                    );
                    return None;
                }
                if late {
                    debug!(host = %host.fqdn, seq = packet.sequence, "late echo reply");
                }
                self.complete_reply(&packet, datagram.len())
            }
            // Errors close the current round-trip whether or not it already timed out
            IcmpKind::Other(icmp_type) => {
                debug!(host = %host.fqdn, icmp_type, "ICMP error for probe");
                self.complete_lost(packet.index, false)
            }
        }
    }

    /// Account for a failed receive
    pub(crate) fn on_receive_error(&mut self, err: &io::Error) {
        self.counters.receive_failures += 1;
        warn!(error = %err, "failed to receive datagram");
    }

    fn complete_reply(&mut self, packet: &DecodedPacket, received: usize) -> Option<Completion> {
        let settings = &self.settings;
        let host = self.registry.get_mut(packet.index)?;

        self.timers.cancel_noreply(host);
        let rtt_us = settings.now_us().saturating_sub(packet.sent_at_us);
        host.stats
            .record_reply(received, rtt_us as f64, SystemTime::now());
        debug!(host = %host.fqdn, seq = packet.sequence, rtt_us, "echo reply");

        let completion = host.callback.clone().map(|callback| {
            let reply = PingReply {
                status: PingStatus::Success,
                host_index: packet.index,
                bytes: Some(packet.icmp_len),
                fqdn: host.fqdn.clone(),
                address: host.dotted.clone(),
                sequence: packet.sequence,
                ttl: Some(packet.ttl),
                elapsed: Duration::from_micros(rtt_us),
            };
            (callback, reply)
        });

        host.unanswered = None;
        host.advance_sequence();
        self.timers.arm_probe(host, settings.interval);
        completion
    }
}

#[cfg(test)]
mod tests {
    use crate::dns::ResolvedHost;
    use crate::packet::{encode_echo_request, IPV4_HEADER_MIN_LEN};
    use crate::probe::{PingReply, PingStatus};
    use crate::scheduler::{Engine, HostPhase, ProbeSettings, TimerEvent};
    use crate::test_utils::{
        echo_reply_for, icmp_error_for, ipv4_datagram, recording_callback, MockTransport,
    };
    use futures::future::poll_fn;
    use std::io;
    use std::net::Ipv4Addr;
    use std::time::Duration;
    use tokio::time::Instant;

    const IDENT: u16 = 0x0bad;

    /// Engine whose hosts all have an echo request in flight
    async fn engine_awaiting(count: u8, transport: &MockTransport) -> (Engine, Vec<Vec<u8>>) {
        let mut engine = Engine::new(ProbeSettings {
            packet_size: 64,
            interval: Duration::from_secs(1),
            noreply_timeout: Duration::from_millis(500),
            identifier: IDENT,
            quiet: true,
            epoch: Instant::now(),
        });
        for i in 0..count {
            engine.registry.insert(ResolvedHost {
                name: format!("10.0.0.{}", i + 1),
                address: Ipv4Addr::new(10, 0, 0, i + 1),
                fqdn: format!("h{}.lan", i),
            });
        }
        let (callback, _rx) = recording_callback();
        engine.start(&callback);

        for _ in 0..count {
            let event = poll_fn(|cx| engine.timers.poll_expired(cx)).await;
            assert!(matches!(event, TimerEvent::Probe(_)));
            engine.on_timer(transport, event);
        }

        let mut requests = vec![Vec::new(); usize::from(count)];
        for _ in 0..count {
            let (packet, dest) = transport.next_sent().await;
            requests[usize::from(dest.octets()[3] - 1)] = packet;
        }
        (engine, requests)
    }

    fn host_counters(engine: &Engine) -> Vec<(u64, u64, u64, u8)> {
        engine
            .registry
            .iter()
            .map(|h| (h.stats().sent, h.stats().received, h.stats().dropped, h.sequence()))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_routes_by_index() {
        let transport = MockTransport::new();
        let (mut engine, requests) = engine_awaiting(3, &transport).await;

        tokio::time::advance(Duration::from_micros(2500)).await;
        let (callback, reply) = engine
            .on_datagram(&echo_reply_for(&requests[1], 61))
            .unwrap();
        drop(callback);

        assert_eq!(reply.status, PingStatus::Success);
        assert_eq!(reply.host_index, 1);
        assert_eq!(reply.fqdn, "h1.lan");
        assert_eq!(reply.address, "10.0.0.2");
        assert_eq!(reply.bytes, Some(64));
        assert_eq!(reply.ttl, Some(61));
        assert_eq!(reply.sequence, 1);
        assert_eq!(reply.elapsed, Duration::from_micros(2500));

        let host = engine.registry.get(1).unwrap();
        assert_eq!(host.stats().received, 1);
        assert_eq!(host.stats().received_bytes, 64 + IPV4_HEADER_MIN_LEN as u64);
        assert_eq!(host.sequence(), 2);
        assert_eq!(host.phase(), HostPhase::ProbePending);

        // The other hosts are still waiting
        for index in [0, 2] {
            let host = engine.registry.get(index).unwrap();
            assert_eq!(host.phase(), HostPhase::AwaitingReply);
            assert_eq!(host.stats().received, 0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejections_leave_hosts_untouched() {
        let transport = MockTransport::new();
        let (mut engine, requests) = engine_awaiting(2, &transport).await;
        let before = host_counters(&engine);

        // Too short
        assert!(engine.on_datagram(&[0x45, 0, 0]).is_none());
        // Foreign identifier
        let foreign = encode_echo_request(64, 1, 0, IDENT.wrapping_add(1), 0);
        assert!(engine
            .on_datagram(&echo_reply_for(&foreign, 64))
            .is_none());
        // Index beyond the registry
        let illegal = encode_echo_request(64, 1, 2, IDENT, 0);
        assert!(engine
            .on_datagram(&echo_reply_for(&illegal, 64))
            .is_none());
        // Our own request looped back
        assert!(engine
            .on_datagram(&ipv4_datagram(64, &requests[0]))
            .is_none());

        assert_eq!(engine.counters.receive_successes, 4);
        assert_eq!(engine.counters.too_short, 1);
        assert_eq!(engine.counters.foreign, 2);
        assert_eq!(engine.counters.illegal, 1);
        assert_eq!(host_counters(&engine), before);
        for host in engine.registry.iter() {
            assert_eq!(host.phase(), HostPhase::AwaitingReply);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_and_duplicate_replies() {
        let transport = MockTransport::new();
        let (mut engine, requests) = engine_awaiting(1, &transport).await;

        // Sequence from another round
        let old = encode_echo_request(64, 0, 0, IDENT, 0);
        assert!(engine.on_datagram(&echo_reply_for(&old, 64)).is_none());
        assert_eq!(engine.counters.stale, 1);

        let reply = echo_reply_for(&requests[0], 64);
        assert!(engine.on_datagram(&reply).is_some());
        // Duplicate arrives while the host waits for its next probe
        assert!(engine.on_datagram(&reply).is_none());
        assert_eq!(engine.counters.stale, 2);
        assert_eq!(engine.registry.get(0).unwrap().stats().received, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_icmp_error_is_timeout_without_drop() {
        let transport = MockTransport::new();
        let (mut engine, requests) = engine_awaiting(1, &transport).await;

        let (_, reply) = engine
            .on_datagram(&icmp_error_for(&requests[0], 3, 1))
            .unwrap();
        assert_eq!(reply.status, PingStatus::Timeout);
        assert_eq!(reply.sequence, 1);
        assert_eq!(reply.bytes, None);
        assert_eq!(reply.elapsed, Duration::from_millis(500));

        let host = engine.registry.get(0).unwrap();
        assert_eq!(host.stats().dropped, 0);
        assert_eq!(host.stats().received, 0);
        assert_eq!(host.sequence(), 2);
        assert_eq!(host.phase(), HostPhase::ProbePending);
    }

    /// Let the no-reply timer of the only host fire
    async fn expire_noreply(engine: &mut Engine, transport: &MockTransport) -> PingReply {
        let event = poll_fn(|cx| engine.timers.poll_expired(cx)).await;
        assert_eq!(event, TimerEvent::NoReply(0));
        let (_, reply) = engine.on_timer(transport, event).unwrap();
        reply
    }

    #[tokio::test(start_paused = true)]
    async fn test_icmp_error_after_timeout_closes_next_round_trip() {
        let transport = MockTransport::new();
        let (mut engine, requests) = engine_awaiting(1, &transport).await;

        let reply = expire_noreply(&mut engine, &transport).await;
        assert_eq!(reply.status, PingStatus::Timeout);
        assert_eq!(reply.sequence, 1);
        assert_eq!(engine.registry.get(0).unwrap().sequence(), 2);

        // Destination Unreachable quoting the request that already timed out
        let (_, reply) = engine
            .on_datagram(&icmp_error_for(&requests[0], 3, 1))
            .unwrap();
        assert_eq!(reply.status, PingStatus::Timeout);
        assert_eq!(reply.sequence, 2);

        let host = engine.registry.get(0).unwrap();
        assert_eq!(host.sequence(), 3);
        assert_eq!(host.stats().dropped, 1);
        assert_eq!(host.phase(), HostPhase::ProbePending);
        assert_eq!(engine.counters.stale, 0);
        assert_eq!(engine.timers.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_reply_is_recorded() {
        let transport = MockTransport::new();
        let (mut engine, requests) = engine_awaiting(1, &transport).await;
        let sent_at = Instant::now();

        expire_noreply(&mut engine, &transport).await;
        tokio::time::advance(Duration::from_millis(600) - sent_at.elapsed()).await;

        let reply = echo_reply_for(&requests[0], 57);
        let (_, success) = engine.on_datagram(&reply).unwrap();
        assert_eq!(success.status, PingStatus::Success);
        assert_eq!(success.sequence, 1);
        assert_eq!(success.ttl, Some(57));
        assert_eq!(success.elapsed, Duration::from_millis(600));

        let host = engine.registry.get(0).unwrap();
        assert_eq!(host.stats().received, 1);
        assert_eq!(host.stats().dropped, 1);
        assert_eq!(host.stats().longest_us, 600_000.0);
        assert_eq!(host.sequence(), 3);
        assert_eq!(host.phase(), HostPhase::ProbePending);
        assert_eq!(engine.timers.len(), 1);

        // The same reply again is a duplicate
        assert!(engine.on_datagram(&reply).is_none());
        assert_eq!(engine.counters.stale, 1);
        assert_eq!(engine.registry.get(0).unwrap().stats().received, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_reply_after_next_probe_is_stale() {
        let transport = MockTransport::new();
        let (mut engine, requests) = engine_awaiting(1, &transport).await;

        expire_noreply(&mut engine, &transport).await;
        let event = poll_fn(|cx| engine.timers.poll_expired(cx)).await;
        assert_eq!(event, TimerEvent::Probe(0));
        engine.on_timer(transport.as_ref(), event);
        assert_eq!(
            engine.registry.get(0).unwrap().phase(),
            HostPhase::AwaitingReply
        );

        assert!(engine
            .on_datagram(&echo_reply_for(&requests[0], 64))
            .is_none());
        assert_eq!(engine.counters.stale, 1);

        let host = engine.registry.get(0).unwrap();
        assert_eq!(host.stats().received, 0);
        assert_eq!(host.sequence(), 2);
        assert_eq!(host.phase(), HostPhase::AwaitingReply);
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_error_is_counted() {
        let transport = MockTransport::new();
        let (mut engine, _) = engine_awaiting(1, &transport).await;
        let before = host_counters(&engine);

        engine.on_receive_error(&io::Error::from(io::ErrorKind::ConnectionRefused));
        assert_eq!(engine.counters.receive_failures, 1);
        assert_eq!(engine.counters.receive_successes, 0);
        assert_eq!(host_counters(&engine), before);
    }
}
