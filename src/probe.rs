//! Probe outcome types delivered to the driver
//!
//! These live apart from the session so the registry, the scheduler and the
//! receiver can all build them without depending on each other.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Outcome of one probe round-trip
///
/// The engine itself only produces [`PingStatus::Success`] and
/// [`PingStatus::Timeout`]; the other kinds are reserved for embedders that
/// forward the callback stream elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PingStatus {
    /// An echo reply arrived for the outstanding probe
    Success,
    /// No reply in time, or an ICMP error came back instead
    Timeout,
    /// The session was shut down
    SessionShutdown,
    /// The request was cancelled
    Cancelled,
    /// Anything else
    Unknown,
}

impl PingStatus {
    /// Get a human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            PingStatus::Success => "no error",
            PingStatus::Timeout => "request timed out",
            PingStatus::SessionShutdown => "ping subsystem shut down",
            PingStatus::Cancelled => "ping request canceled",
            PingStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for PingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// What the driver callback receives for every completed round-trip
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PingReply {
    /// Outcome of the probe
    pub status: PingStatus,
    /// Correlation index of the host
    pub host_index: u32,
    /// ICMP bytes received, `None` for timeouts
    pub bytes: Option<usize>,
    /// Fully qualified name of the host
    pub fqdn: String,
    /// Host address in dotted notation
    pub address: String,
    /// ICMP sequence number of the probe
    pub sequence: u16,
    /// TTL of the reply, `None` for timeouts
    pub ttl: Option<u8>,
    /// Round-trip time, or the no-reply timeout for timeouts
    pub elapsed: Duration,
}

/// Driver callback invoked synchronously from the reactor
///
/// Per-host context is whatever the closure captures.
pub type PingCallback = Arc<dyn Fn(&PingReply) + Send + Sync>;
