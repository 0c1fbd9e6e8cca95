//! Configuration types for ping sessions

use crate::packet::{ICMP_HEADER_LEN, MAX_PACKET_SIZE, MIN_PACKET_SIZE};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default ICMP packet size: 8 byte header plus 56 bytes of data, like traditional ping
pub const DEFAULT_PACKET_SIZE: usize = ICMP_HEADER_LEN + 56;
/// Default interval between two probes to the same host in milliseconds
pub const DEFAULT_INTERVAL_MS: u64 = 1000;
/// Default time to wait for an echo reply in milliseconds
pub const DEFAULT_NOREPLY_TIMEOUT_MS: u64 = 500;

/// Configuration for a ping session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Size of each echo request in bytes, ICMP header included (default: 64)
    pub packet_size: usize,
    /// Delay between a completed round-trip and the next probe (default: 1000ms, 0 floods)
    pub interval: Duration,
    /// Time to wait for an echo reply before declaring the probe lost (default: 500ms)
    pub noreply_timeout: Duration,
    /// ICMP identifier; the process id masked to 16 bits when unset
    pub identifier: Option<u16>,
    /// Suppress the per-host banner printed on the first transmission
    pub quiet: bool,
    /// Enable reverse DNS lookups for display names (default: true)
    pub enable_rdns: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            packet_size: DEFAULT_PACKET_SIZE,
            interval: Duration::from_millis(DEFAULT_INTERVAL_MS),
            noreply_timeout: Duration::from_millis(DEFAULT_NOREPLY_TIMEOUT_MS),
            identifier: None,
            quiet: false,
            enable_rdns: true,
        }
    }
}

impl SessionConfig {
    /// Create a new SessionConfig builder
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.packet_size < MIN_PACKET_SIZE {
            return Err(format!(
                "packet_size must be at least {} bytes",
                MIN_PACKET_SIZE
            ));
        }
        if self.packet_size > MAX_PACKET_SIZE {
            return Err(format!(
                "packet_size must not exceed {} bytes",
                MAX_PACKET_SIZE
            ));
        }
        if self.noreply_timeout.is_zero() {
            return Err("noreply_timeout must be greater than 0".to_string());
        }
        Ok(())
    }

    /// The ICMP identifier stamped on every request of this session
    pub fn effective_identifier(&self) -> u16 {
        self.identifier
            .unwrap_or((std::process::id() & 0xffff) as u16)
    }
}

/// Builder for SessionConfig
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self {
            config: SessionConfig::default(),
        }
    }

    /// Set the packet size (ICMP header plus payload)
    pub fn packet_size(mut self, size: usize) -> Self {
        self.config.packet_size = size;
        self
    }

    /// Set the probe interval
    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    /// Set the no-reply timeout
    pub fn noreply_timeout(mut self, timeout: Duration) -> Self {
        self.config.noreply_timeout = timeout;
        self
    }

    /// Set an explicit ICMP identifier
    pub fn identifier(mut self, identifier: u16) -> Self {
        self.config.identifier = Some(identifier);
        self
    }

    /// Enable or disable quiet mode
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.config.quiet = quiet;
        self
    }

    /// Enable or disable reverse DNS lookups
    pub fn enable_rdns(mut self, enable: bool) -> Self {
        self.config.enable_rdns = enable;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<SessionConfig, String> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for SessionConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
