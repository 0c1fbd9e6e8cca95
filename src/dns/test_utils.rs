//! Test utilities for DNS module

use super::{DnsError, NameResolver};
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Resolver answering from fixed tables, without touching the network
#[derive(Default)]
pub struct StaticResolver {
    forward: HashMap<String, Ipv4Addr>,
    reverse: HashMap<Ipv4Addr, String>,
    reverse_requests: AtomicUsize,
}

impl StaticResolver {
    /// Create a resolver that knows no names
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a forward record
    pub fn with_forward(mut self, name: &str, address: Ipv4Addr) -> Self {
        self.forward.insert(name.to_string(), address);
        self
    }

    /// Add a PTR record
    pub fn with_reverse(mut self, address: Ipv4Addr, name: &str) -> Self {
        self.reverse.insert(address, name.to_string());
        self
    }

    /// Number of reverse lookups performed
    pub fn reverse_count(&self) -> usize {
        self.reverse_requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NameResolver for StaticResolver {
    async fn lookup_ipv4(&self, name: &str) -> Result<Ipv4Addr, DnsError> {
        self.forward
            .get(name)
            .copied()
            .ok_or_else(|| DnsError::ResolutionError(format!("unknown host {}", name)))
    }

    async fn reverse_lookup(&self, address: Ipv4Addr) -> Result<String, DnsError> {
        self.reverse_requests.fetch_add(1, Ordering::SeqCst);
        self.reverse.get(&address).cloned().ok_or(DnsError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_resolver() {
        let resolver = StaticResolver::new()
            .with_forward("a", Ipv4Addr::new(10, 0, 0, 1))
            .with_reverse(Ipv4Addr::new(10, 0, 0, 1), "a.lan");

        assert_eq!(
            resolver.lookup_ipv4("a").await.unwrap(),
            Ipv4Addr::new(10, 0, 0, 1)
        );
        assert!(resolver.lookup_ipv4("b").await.is_err());
        assert_eq!(
            resolver
                .reverse_lookup(Ipv4Addr::new(10, 0, 0, 1))
                .await
                .unwrap(),
            "a.lan"
        );
        assert!(matches!(
            resolver.reverse_lookup(Ipv4Addr::new(10, 0, 0, 2)).await,
            Err(DnsError::NotFound)
        ));
        assert_eq!(resolver.reverse_count(), 2);
    }
}
