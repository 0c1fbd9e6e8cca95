//! Name resolution for host registration
//!
//! Registration resolves a name forward first and only accepts the raw input
//! as a dotted IPv4 literal when that fails. The display name comes from a
//! best-effort reverse lookup that falls back to the name as given.

pub mod resolver;
pub mod reverse;

#[cfg(test)]
pub mod test_utils;

pub use resolver::SystemResolver;
pub use reverse::{create_default_resolver, reverse_dns_lookup};

use crate::error::PingError;
use async_trait::async_trait;
use std::net::Ipv4Addr;
use tracing::debug;

/// Error type for DNS operations
#[derive(Debug, thiserror::Error)]
pub enum DnsError {
    /// DNS resolution failed
    #[error("DNS resolution failed: {0}")]
    ResolutionError(String),

    /// The lookup succeeded but produced nothing usable
    #[error("No matching record found")]
    NotFound,
}

/// Forward and reverse lookups used when registering hosts
#[async_trait]
pub trait NameResolver: Send + Sync {
    /// Resolve a name to its first IPv4 address
    async fn lookup_ipv4(&self, name: &str) -> Result<Ipv4Addr, DnsError>;

    /// Find the name registered for an address
    async fn reverse_lookup(&self, address: Ipv4Addr) -> Result<String, DnsError>;
}

/// Outcome of resolving a host name for registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedHost {
    /// Name as given by the user
    pub name: String,
    /// Address to send probes to
    pub address: Ipv4Addr,
    /// Display name
    pub fqdn: String,
}

/// Resolve `name` for registration
///
/// When `reverse` is false the display name is the name as given.
pub async fn resolve_host(
    resolver: &dyn NameResolver,
    name: &str,
    reverse: bool,
) -> Result<ResolvedHost, PingError> {
    let address = match resolver.lookup_ipv4(name).await {
        Ok(address) => address,
        Err(e) => {
            debug!(name, error = %e, "forward lookup failed, trying IPv4 literal");
            name.parse::<Ipv4Addr>()
                .map_err(|_| PingError::ResolutionError(name.to_string()))?
        }
    };

    let fqdn = if reverse {
        match resolver.reverse_lookup(address).await {
            Ok(fqdn) => fqdn,
            Err(e) => {
                debug!(%address, error = %e, "reverse lookup failed");
                name.to_string()
            }
        }
    } else {
        name.to_string()
    };

    Ok(ResolvedHost {
        name: name.to_string(),
        address,
        fqdn,
    })
}
