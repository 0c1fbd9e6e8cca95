//! Per-host round-trip statistics
//!
//! [`HostStatistics`] only accumulates counters; everything shown to the
//! user is derived from them by [`HostStatistics::report`], so a report can
//! be recomputed at any time without hidden state.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

/// Initial value of the shortest round-trip, above any real measurement
pub const RTT_SENTINEL_US: f64 = f64::MAX;

/// Counters and running RTT accumulators for one host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostStatistics {
    /// Echo requests handed to the socket
    pub sent: u64,
    /// Echo replies accepted
    pub received: u64,
    /// Probes declared lost by the no-reply timer
    pub dropped: u64,
    /// Bytes of ICMP handed to the socket
    pub sent_bytes: u64,
    /// Bytes received, IP header included
    pub received_bytes: u64,
    /// Time the first request was sent
    pub first_sent: Option<SystemTime>,
    /// Time the last request was sent
    pub last_sent: Option<SystemTime>,
    /// Time the first reply was received
    pub first_received: Option<SystemTime>,
    /// Time the last reply was received
    pub last_received: Option<SystemTime>,
    /// Shortest round-trip in microseconds
    pub shortest_us: f64,
    /// Longest round-trip in microseconds
    pub longest_us: f64,
    /// Sum of all round-trips in microseconds
    pub sum_us: f64,
    /// Sum of the squares of all round-trips
    pub sum_squares_us: f64,
}

impl Default for HostStatistics {
    fn default() -> Self {
        Self {
            sent: 0,
            received: 0,
            dropped: 0,
            sent_bytes: 0,
            received_bytes: 0,
            first_sent: None,
            last_sent: None,
            first_received: None,
            last_received: None,
            shortest_us: RTT_SENTINEL_US,
            longest_us: 0.0,
            sum_us: 0.0,
            sum_squares_us: 0.0,
        }
    }
}

impl HostStatistics {
    /// Account for a request that left through the socket
    pub fn record_sent(&mut self, bytes: usize, at: SystemTime) {
        if self.sent == 0 {
            self.first_sent = Some(at);
        }
        self.last_sent = Some(at);
        self.sent += 1;
        self.sent_bytes += bytes as u64;
    }

    /// Account for an accepted echo reply
    pub fn record_reply(&mut self, bytes: usize, rtt_us: f64, at: SystemTime) {
        if self.received == 0 {
            self.first_received = Some(at);
        }
        self.last_received = Some(at);
        self.received += 1;
        self.received_bytes += bytes as u64;

        self.shortest_us = self.shortest_us.min(rtt_us);
        self.longest_us = self.longest_us.max(rtt_us);
        self.sum_us += rtt_us;
        self.sum_squares_us += rtt_us * rtt_us;
    }

    /// Account for a probe the no-reply timer gave up on
    pub fn record_dropped(&mut self) {
        self.dropped += 1;
    }

    /// Derive the user-facing figures
    pub fn report(&self, host: &str) -> HostReport {
        let loss_percent = if self.received == 0 {
            100.0
        } else {
            100.0 * self.sent.saturating_sub(self.received) as f64 / self.sent as f64
        };

        let rtt = (self.received > 0).then(|| {
            let n = self.received as f64;
            let stddev_us = if self.received > 1 {
                let variance =
                    (n * self.sum_squares_us - self.sum_us * self.sum_us) / (n * (n - 1.0));
                variance.max(0.0).sqrt()
            } else {
                0.0
            };
            RttSummary {
                min_us: self.shortest_us,
                mean_us: self.sum_us / n,
                max_us: self.longest_us,
                stddev_us,
            }
        });

        HostReport {
            host: host.to_string(),
            transmitted: self.sent,
            received: self.received,
            dropped: self.dropped,
            loss_percent,
            time_ms: self.sum_us / 1000.0,
            rtt,
        }
    }
}

/// Round-trip figures, present only once a reply has been received
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RttSummary {
    /// Shortest round-trip in microseconds
    pub min_us: f64,
    /// Mean round-trip in microseconds
    pub mean_us: f64,
    /// Longest round-trip in microseconds
    pub max_us: f64,
    /// Sample standard deviation in microseconds
    pub stddev_us: f64,
}

/// Statistics report for one host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostReport {
    /// Display name of the host
    pub host: String,
    /// Echo requests sent
    pub transmitted: u64,
    /// Echo replies received
    pub received: u64,
    /// Probes lost to the no-reply timer
    pub dropped: u64,
    /// Share of requests left unanswered
    pub loss_percent: f64,
    /// Sum of all round-trips in milliseconds
    pub time_ms: f64,
    /// Round-trip figures, `None` when nothing was received
    pub rtt: Option<RttSummary>,
}

impl fmt::Display for HostReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- {} ping statistics ---", self.host)?;
        write!(
            f,
            "{} packets transmitted, {} received, {:.2}% packet loss, time {:.1}ms",
            self.transmitted, self.received, self.loss_percent, self.time_ms
        )?;
        if let Some(rtt) = &self.rtt {
            write!(
                f,
                "\nrtt min/avg/max/sdev = {:.3}/{:.3}/{:.3}/{:.3} ms",
                rtt.min_us / 1000.0,
                rtt.mean_us / 1000.0,
                rtt.max_us / 1000.0,
                rtt.stddev_us / 1000.0
            )?;
        }
        Ok(())
    }
}

/// Session-wide packet counters
///
/// Every per-packet fault ends up here instead of in an error value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCounters {
    /// Transmissions that failed or were cut short
    pub send_failures: u64,
    /// Echo requests fully handed to the socket
    pub send_successes: u64,
    /// Receive calls that returned an error
    pub receive_failures: u64,
    /// Datagrams read from the socket
    pub receive_successes: u64,
    /// Datagrams too short to hold an IP and an ICMP header
    pub too_short: u64,
    /// Datagrams carrying another identifier
    pub foreign: u64,
    /// Datagrams with a missing or out of range correlation index
    pub illegal: u64,
    /// Duplicate replies, replies overtaken by a newer probe, and packets for idle hosts
    pub stale: u64,
}

impl SessionCounters {
    /// Datagrams dropped before reaching a host
    pub fn rejected(&self) -> u64 {
        self.too_short + self.foreign + self.illegal + self.stale
    }
}
