//! Destination URL guard.
//!
//! Every delivery attempt passes the destination through [`UrlGuard::check`]
//! before any byte leaves the process. The guard fails closed:
//!
//! - only `http` and `https` URLs are accepted
//! - `localhost` and `*.localhost` are refused by name
//! - IP literals and every resolved address must be public; loopback,
//!   RFC 1918, link-local (including `169.254.169.254`), unspecified,
//!   broadcast, carrier-grade NAT, IPv6 unique-local and link-local, and
//!   IPv4-mapped forms of all of these are refused
//!
//! The returned [`ValidatedTarget`] carries the address that was checked so
//! the transport can pin the connection to it. Resolving again at connect
//! time would let a hostile DNS server swap in an internal address.

use crate::error::GuardError;
use reqwest::Url;
use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;

/// Resolves host names to socket addresses.
pub trait HostResolver: Send + Sync {
    /// Resolve `host` for `port`.
    ///
    /// # Errors
    ///
    /// Returns the resolver's I/O error.
    fn resolve(
        &self,
        host: String,
        port: u16,
    ) -> Pin<Box<dyn Future<Output = io::Result<Vec<SocketAddr>>> + Send + '_>>;
}

/// System DNS through `tokio::net::lookup_host`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DnsResolver;

impl HostResolver for DnsResolver {
    fn resolve(
        &self,
        host: String,
        port: u16,
    ) -> Pin<Box<dyn Future<Output = io::Result<Vec<SocketAddr>>> + Send + '_>> {
        Box::pin(async move {
            let addrs = tokio::net::lookup_host((host.as_str(), port)).await?;
            Ok(addrs.collect())
        })
    }
}

/// Fixed host table, for tests and air-gapped deployments.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    hosts: HashMap<String, Vec<IpAddr>>,
}

impl StaticResolver {
    /// Empty table: every lookup fails.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `host` to `addr` (in addition to earlier mappings).
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>, addr: IpAddr) -> Self {
        self.hosts.entry(host.into().to_ascii_lowercase()).or_default().push(addr);
        self
    }
}

impl HostResolver for StaticResolver {
    fn resolve(
        &self,
        host: String,
        port: u16,
    ) -> Pin<Box<dyn Future<Output = io::Result<Vec<SocketAddr>>> + Send + '_>> {
        let result = self
            .hosts
            .get(&host.to_ascii_lowercase())
            .map(|addrs| addrs.iter().map(|ip| SocketAddr::new(*ip, port)).collect())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("unknown host {host}")));
        Box::pin(async move { result })
    }
}

/// A destination that passed the guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedTarget {
    /// The parsed destination URL.
    pub url: Url,
    /// Host as written in the URL (without IPv6 brackets).
    pub host: String,
    /// The checked address the connection must use.
    pub addr: SocketAddr,
}

/// Validates destination URLs against the address policy.
#[derive(Clone)]
pub struct UrlGuard {
    resolver: Arc<dyn HostResolver>,
}

impl UrlGuard {
    /// Guard using the given resolver.
    #[must_use]
    pub fn new(resolver: Arc<dyn HostResolver>) -> Self {
        Self { resolver }
    }

    /// Guard using system DNS.
    #[must_use]
    pub fn system() -> Self {
        Self::new(Arc::new(DnsResolver))
    }

    /// Check `raw` and pick the address to connect to.
    ///
    /// # Errors
    ///
    /// Returns a [`GuardError`] describing why the destination is refused.
    pub async fn check(&self, raw: &str) -> Result<ValidatedTarget, GuardError> {
        let url = Url::parse(raw).map_err(|e| GuardError::InvalidUrl {
            url: raw.to_string(),
            reason: e.to_string(),
        })?;

        match url.scheme() {
            "http" | "https" => {}
            other => return Err(GuardError::UnsupportedScheme(other.to_string())),
        }

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or(GuardError::MissingHost)?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_ascii_lowercase();
        let port = url.port_or_known_default().unwrap_or(443);

        if let Ok(ip) = host.parse::<IpAddr>() {
            if is_blocked(ip) {
                return Err(GuardError::BlockedAddress { host, addr: ip });
            }
            return Ok(ValidatedTarget {
                url,
                host,
                addr: SocketAddr::new(ip, port),
            });
        }

        let bare = host.trim_end_matches('.');
        if bare == "localhost" || bare.ends_with(".localhost") {
            return Err(GuardError::LocalHostname(host));
        }

        let addrs = self
            .resolver
            .resolve(host.clone(), port)
            .await
            .map_err(|e| GuardError::Resolution {
                host: host.clone(),
                reason: e.to_string(),
            })?;

        // Every answer must be public, not just the first one.
        if let Some(blocked) = addrs.iter().find(|a| is_blocked(a.ip())) {
            return Err(GuardError::BlockedAddress {
                host,
                addr: blocked.ip(),
            });
        }

        let addr = addrs.first().copied().ok_or_else(|| GuardError::Resolution {
            host: host.clone(),
            reason: "no addresses".to_string(),
        })?;

        Ok(ValidatedTarget { url, host, addr })
    }
}

/// Whether deliveries to `ip` are refused.
#[must_use]
pub fn is_blocked(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_blocked_v4(v4),
        IpAddr::V6(v6) => is_blocked_v6(v6),
    }
}

fn is_blocked_v4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_documentation()
        // 0.0.0.0/8 "this network"
        || a == 0
        // 100.64.0.0/10 carrier-grade NAT
        || (a == 100 && (b & 0xc0) == 64)
}

fn is_blocked_v6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_blocked_v4(v4);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_multicast()
        // fc00::/7 unique local
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 link local
        || (first & 0xffc0) == 0xfe80
}
