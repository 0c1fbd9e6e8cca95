//! Ordered registry of monitored hosts
//!
//! A host's correlation index is its position in the registry. Hosts are
//! never removed, so an index handed out once identifies the same host for
//! the whole life of the session and iteration follows registration order.

use crate::dns::ResolvedHost;
use crate::probe::PingCallback;
use crate::scheduler::HostPhase;
use crate::stats::HostStatistics;
use std::net::Ipv4Addr;
use tokio_util::time::delay_queue::Key;

/// Sequence number of the first probe sent to a host
pub const INITIAL_SEQUENCE: u8 = 1;

/// A monitored host
pub struct Host {
    pub(crate) name: String,
    pub(crate) address: Ipv4Addr,
    pub(crate) fqdn: String,
    pub(crate) dotted: String,
    pub(crate) index: u32,
    pub(crate) sequence: u8,
    /// Sequence of the last round-trip closed without an echo reply
    pub(crate) unanswered: Option<u8>,
    pub(crate) probe_timer: Option<Key>,
    pub(crate) noreply_timer: Option<Key>,
    pub(crate) stats: HostStatistics,
    pub(crate) callback: Option<PingCallback>,
}

impl Host {
    fn new(resolved: ResolvedHost, index: u32) -> Self {
        Self {
            dotted: resolved.address.to_string(),
            name: resolved.name,
            address: resolved.address,
            fqdn: resolved.fqdn,
            index,
            sequence: INITIAL_SEQUENCE,
            unanswered: None,
            probe_timer: None,
            noreply_timer: None,
            stats: HostStatistics::default(),
            callback: None,
        }
    }

    /// Name as given at registration
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolved IPv4 address
    pub fn address(&self) -> Ipv4Addr {
        self.address
    }

    /// Display name (reverse lookup result, or the registered name)
    pub fn fqdn(&self) -> &str {
        &self.fqdn
    }

    /// Correlation index
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Sequence number of the next (or outstanding) probe
    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    /// Counters accumulated so far
    pub fn stats(&self) -> &HostStatistics {
        &self.stats
    }

    /// Which timer, if any, is currently driving this host
    pub fn phase(&self) -> HostPhase {
        debug_assert!(
            self.probe_timer.is_none() || self.noreply_timer.is_none(),
            "host {} has both timers armed",
            self.index
        );
        match (&self.probe_timer, &self.noreply_timer) {
            (None, None) => HostPhase::Idle,
            (Some(_), None) => HostPhase::ProbePending,
            (_, Some(_)) => HostPhase::AwaitingReply,
        }
    }

    /// Move on to the next sequence number, wrapping after 255
    pub(crate) fn advance_sequence(&mut self) {
        self.sequence = self.sequence.wrapping_add(1);
    }
}

/// Hosts in registration order
#[derive(Default)]
pub struct HostRegistry {
    hosts: Vec<Host>,
}

impl HostRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a resolved host and return its correlation index
    pub fn insert(&mut self, resolved: ResolvedHost) -> u32 {
        let index = self.hosts.len() as u32;
        self.hosts.push(Host::new(resolved, index));
        index
    }

    /// Look up a host by correlation index
    pub fn get(&self, index: u32) -> Option<&Host> {
        self.hosts.get(usize::try_from(index).ok()?)
    }

    /// Look up a host by correlation index for mutation
    pub fn get_mut(&mut self, index: u32) -> Option<&mut Host> {
        self.hosts.get_mut(usize::try_from(index).ok()?)
    }

    /// Number of registered hosts
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    /// Whether no host has been registered yet
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Hosts in registration order
    pub fn iter(&self) -> impl Iterator<Item = &Host> {
        self.hosts.iter()
    }

    /// Hosts in registration order, mutably
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Host> {
        self.hosts.iter_mut()
    }
}
