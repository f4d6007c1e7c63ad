use crate::types::Endpoint;
use std::net::IpAddr;
use tokio::net::lookup_host;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("host name or IP address must be provided")]
    Empty,
    #[error("'{host}' is not a valid IPv4/IPv6 address or a host name that could be resolved")]
    Lookup {
        host: String,
        #[source]
        source: std::io::Error,
    },
    #[error("'{0}' resolved to no addresses")]
    NoAddresses(String),
}

/// Resolve `host` (name, IPv4 or IPv6 literal) to a connectable [`Endpoint`].
///
/// Literal addresses skip the resolver. For names the first address returned
/// by the system resolver is used, and the canonical name is the input string.
pub async fn resolve_host(host: &str) -> Result<Endpoint, ResolveError> {
    let host = host.trim();
    if host.is_empty() {
        return Err(ResolveError::Empty);
    }
    // Accept bracketed IPv6 literals as typed in URLs.
    let literal = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = literal.parse::<IpAddr>() {
        return Ok(Endpoint::new(host, ip));
    }

    let mut addrs = lookup_host((host, 0))
        .await
        .map_err(|source| ResolveError::Lookup {
            host: host.to_string(),
            source,
        })?;
    let addr = addrs
        .next()
        .ok_or_else(|| ResolveError::NoAddresses(host.to_string()))?;
    debug!(host, ip = %addr.ip(), "resolved host");
    Ok(Endpoint::new(host, addr.ip()))
}
