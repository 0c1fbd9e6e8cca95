//! Resolver backed by hickory

use super::reverse::{create_default_resolver, reverse_dns_lookup};
use super::{DnsError, NameResolver};
use async_trait::async_trait;
use hickory_resolver::TokioResolver;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

/// [`NameResolver`] using a hickory [`TokioResolver`]
#[derive(Clone)]
pub struct SystemResolver {
    resolver: Arc<TokioResolver>,
}

impl SystemResolver {
    /// Create a resolver with the default upstream configuration
    pub fn new() -> Self {
        Self::with_resolver(Arc::new(create_default_resolver()))
    }

    /// Use a specific hickory resolver
    pub fn with_resolver(resolver: Arc<TokioResolver>) -> Self {
        Self { resolver }
    }
}

impl Default for SystemResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NameResolver for SystemResolver {
    async fn lookup_ipv4(&self, name: &str) -> Result<Ipv4Addr, DnsError> {
        let lookup = self
            .resolver
            .lookup_ip(name)
            .await
            .map_err(|e| DnsError::ResolutionError(e.to_string()))?;

        lookup
            .iter()
            .find_map(|ip| match ip {
                IpAddr::V4(v4) => Some(v4),
                IpAddr::V6(_) => None,
            })
            .ok_or(DnsError::NotFound)
    }

    async fn reverse_lookup(&self, address: Ipv4Addr) -> Result<String, DnsError> {
        reverse_dns_lookup(&self.resolver, address).await
    }
}
