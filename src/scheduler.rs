//! Per-host probe scheduling
//!
//! Every host alternates between two timers kept in one [`DelayQueue`]: the
//! probe timer counts down the interval to the next transmission and the
//! no-reply timer bounds the wait for an answer. While a session is pinging
//! exactly one of them is armed per host.
//!
//! [`Engine`] holds everything a timer or datagram event mutates. Its
//! transitions never call into the driver directly; they hand back a
//! [`Completion`] that the caller invokes once it has released its borrow.

use crate::config::SessionConfig;
use crate::packet::{encode_echo_request, ICMP_HEADER_LEN, IPV4_HEADER_MIN_LEN};
use crate::probe::{PingCallback, PingReply, PingStatus};
use crate::registry::{Host, HostRegistry};
use crate::socket::EchoTransport;
use crate::stats::SessionCounters;
use serde::Serialize;
use std::task::{Context, Poll};
use std::time::{Duration, SystemTime};
use tokio::time::Instant;
use tokio_util::time::DelayQueue;
use tracing::{debug, warn};

/// Which timer currently drives a host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HostPhase {
    /// No timer armed: not started yet, or the session is torn down
    Idle,
    /// Waiting for the probe interval to elapse
    ProbePending,
    /// Request sent, waiting for the echo reply
    AwaitingReply,
}

/// Timer expiry delivered to the reactor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    /// Time to transmit the next probe to the host
    Probe(u32),
    /// The outstanding probe to the host went unanswered
    NoReply(u32),
}

/// Callback plus the reply it must receive
pub(crate) type Completion = (PingCallback, PingReply);

/// Probe and no-reply timers of every host
pub struct Timers {
    queue: DelayQueue<TimerEvent>,
}

impl Timers {
    /// Create an empty timer set
    pub fn new() -> Self {
        Self {
            queue: DelayQueue::new(),
        }
    }

    /// Schedule the next probe, replacing any pending one
    pub fn arm_probe(&mut self, host: &mut Host, delay: Duration) {
        if let Some(key) = host.probe_timer.take() {
            self.queue.remove(&key);
        }
        host.probe_timer = Some(self.queue.insert(TimerEvent::Probe(host.index), delay));
    }

    /// Start waiting for the reply to the probe just sent
    pub fn arm_noreply(&mut self, host: &mut Host, timeout: Duration) {
        if let Some(key) = host.noreply_timer.take() {
            self.queue.remove(&key);
        }
        host.noreply_timer = Some(self.queue.insert(TimerEvent::NoReply(host.index), timeout));
    }

    /// Stop waiting for a reply
    pub fn cancel_noreply(&mut self, host: &mut Host) {
        if let Some(key) = host.noreply_timer.take() {
            self.queue.remove(&key);
        }
    }

    /// Drop every timer of every host
    pub fn cancel_all(&mut self, registry: &mut HostRegistry) {
        self.queue.clear();
        for host in registry.iter_mut() {
            host.probe_timer = None;
            host.noreply_timer = None;
        }
    }

    /// Number of armed timers
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Poll for the next expired timer
    ///
    /// An empty queue yields `Pending`; inserting a timer wakes the task.
    pub fn poll_expired(&mut self, cx: &mut Context<'_>) -> Poll<TimerEvent> {
        match self.queue.poll_expired(cx) {
            Poll::Ready(Some(expired)) => Poll::Ready(expired.into_inner()),
            Poll::Ready(None) | Poll::Pending => Poll::Pending,
        }
    }
}

impl Default for Timers {
    fn default() -> Self {
        Self::new()
    }
}

/// Probe parameters fixed for the whole session
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    /// Request size, ICMP header included
    pub packet_size: usize,
    /// Delay before the next probe once a round-trip completes
    pub interval: Duration,
    /// Wait for an echo reply
    pub noreply_timeout: Duration,
    /// ICMP identifier of this session
    pub identifier: u16,
    /// Suppress the first-transmission banner
    pub quiet: bool,
    /// Origin of the timestamps carried in the private payload
    pub epoch: Instant,
}

impl ProbeSettings {
    /// Take the probe parameters from a validated configuration
    pub fn from_config(config: &SessionConfig, epoch: Instant) -> Self {
        Self {
            packet_size: config.packet_size,
            interval: config.interval,
            noreply_timeout: config.noreply_timeout,
            identifier: config.effective_identifier(),
            quiet: config.quiet,
            epoch,
        }
    }

    /// Microseconds elapsed since the epoch
    pub fn now_us(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_micros()).unwrap_or(u64::MAX)
    }
}

/// Mutable engine state: hosts, their timers and the session counters
pub struct Engine {
    pub registry: HostRegistry,
    pub timers: Timers,
    pub counters: SessionCounters,
    pub settings: ProbeSettings,
}

impl Engine {
    /// Create an engine with no hosts
    pub fn new(settings: ProbeSettings) -> Self {
        Self {
            registry: HostRegistry::new(),
            timers: Timers::new(),
            counters: SessionCounters::default(),
            settings,
        }
    }

    /// Install `callback` on every host and kick the idle ones
    ///
    /// Returns the number of hosts that got an immediate probe. Hosts that
    /// are already running keep their schedule.
    pub fn start(&mut self, callback: &PingCallback) -> usize {
        let mut kicked = 0;
        for host in self.registry.iter_mut() {
            host.callback = Some(callback.clone());
            if host.phase() == HostPhase::Idle {
                self.timers.arm_probe(host, Duration::ZERO);
                kicked += 1;
            }
        }
        kicked
    }

    /// Handle an expired timer
    pub(crate) fn on_timer(
        &mut self,
        transport: &dyn EchoTransport,
        event: TimerEvent,
    ) -> Option<Completion> {
        match event {
            TimerEvent::Probe(index) => {
                let host = self.registry.get_mut(index)?;
                host.probe_timer = None;
                self.transmit(transport, index);
                None
            }
            TimerEvent::NoReply(index) => {
                let host = self.registry.get_mut(index)?;
                host.noreply_timer = None;
                debug!(host = %host.fqdn, seq = host.sequence, "no reply");
                self.complete_lost(index, true)
            }
        }
    }

    /// Send the next probe to a host
    ///
    /// A failed or short write leaves the sequence untouched and retries
    /// after the probe interval.
    pub(crate) fn transmit(&mut self, transport: &dyn EchoTransport, index: u32) {
        let settings = &self.settings;
        let Some(host) = self.registry.get_mut(index) else {
            return;
        };

        let packet = encode_echo_request(
            settings.packet_size,
            host.sequence,
            index,
            settings.identifier,
            settings.now_us(),
        );

        match transport.send_to(&packet, host.address) {
            Ok(written) if written == packet.len() => {
                self.counters.send_successes += 1;
                if host.stats.sent == 0 && !settings.quiet {
                    println!(
                        "PING {} ({}) {}({}) bytes of data.",
                        host.fqdn,
                        host.dotted,
                        settings.packet_size - ICMP_HEADER_LEN,
                        settings.packet_size + IPV4_HEADER_MIN_LEN
                    );
                }
                host.stats.record_sent(written, SystemTime::now());
                debug!(host = %host.fqdn, seq = host.sequence, bytes = written, "echo request sent");
                self.timers.arm_noreply(host, settings.noreply_timeout);
            }
            Ok(written) => {
                self.counters.send_failures += 1;
                warn!(
                    host = %host.fqdn,
                    written,
                    expected = packet.len(),
                    "short write on echo request"
                );
                self.timers.arm_probe(host, settings.interval);
            }
            Err(e) => {
                self.counters.send_failures += 1;
                warn!(host = %host.fqdn, error = %e, "failed to send echo request");
                self.timers.arm_probe(host, settings.interval);
            }
        }
    }

    /// Close the outstanding round-trip of a host as a timeout
    ///
    /// Only a genuine no-reply expiry (or teardown failing the request)
    /// counts the probe as dropped; a correlated ICMP error does not.
    pub(crate) fn complete_lost(&mut self, index: u32, count_dropped: bool) -> Option<Completion> {
        let settings = &self.settings;
        let host = self.registry.get_mut(index)?;

        self.timers.cancel_noreply(host);
        if count_dropped {
            host.stats.record_dropped();
        }
        host.unanswered = Some(host.sequence);

        let completion = host.callback.clone().map(|callback| {
            let reply = PingReply {
                status: PingStatus::Timeout,
                host_index: index,
                bytes: None,
                fqdn: host.fqdn.clone(),
                address: host.dotted.clone(),
                sequence: u16::from(host.sequence),
                ttl: None,
                elapsed: settings.noreply_timeout,
            };
            (callback, reply)
        });

        host.advance_sequence();
        self.timers.arm_probe(host, settings.interval);
        completion
    }

    /// Fail every outstanding probe, then disarm all timers
    pub(crate) fn teardown(&mut self, fail_requests: bool) -> Vec<Completion> {
        let mut completions = Vec::new();
        if fail_requests {
            let awaiting: Vec<u32> = self
                .registry
                .iter()
                .filter(|host| host.phase() == HostPhase::AwaitingReply)
                .map(|host| host.index)
                .collect();
            for index in awaiting {
                completions.extend(self.complete_lost(index, true));
            }
        }
        self.timers.cancel_all(&mut self.registry);
        completions
    }
}
