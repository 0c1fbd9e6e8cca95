//! Reverse DNS lookup functionality

use super::DnsError;
use hickory_resolver::config::ResolverConfig;
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::TokioResolver;
use std::net::{IpAddr, Ipv4Addr};

/// Perform reverse DNS lookup for an IPv4 address
pub async fn reverse_dns_lookup(
    resolver: &TokioResolver,
    address: Ipv4Addr,
) -> Result<String, DnsError> {
    let lookup = resolver
        .reverse_lookup(IpAddr::V4(address))
        .await
        .map_err(|e| DnsError::ResolutionError(e.to_string()))?;

    // Get the first PTR record
    lookup
        .iter()
        .next()
        .map(|name| trim_root(&name.to_string()).to_string())
        .ok_or(DnsError::NotFound)
}

/// Create a default DNS resolver
pub fn create_default_resolver() -> TokioResolver {
    TokioResolver::builder_with_config(
        ResolverConfig::default(),
        TokioConnectionProvider::default(),
    )
    .build()
}

/// Remove the trailing root dot of a fully qualified name
fn trim_root(name: &str) -> &str {
    name.strip_suffix('.').unwrap_or(name)
}
