//! Address resolution
//!
//! Turns a [`TargetAddr`] into an ordered list of dialable socket addresses.
//! DNS goes through the [`Resolver`] trait so tests can swap in a fixed
//! table; the server uses [`SystemResolver`].

use super::types::TargetAddr;
use crate::config::SocksConfig;
use crate::error::Socks5Error;
use async_trait::async_trait;
use std::fmt::Debug;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// DNS lookup facility
#[async_trait]
pub trait Resolver: Debug + Send + Sync + 'static {
    /// Look up every address for `host`, paired with `port`
    async fn lookup(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>>;
}

/// Resolver backed by the operating system (`getaddrinfo`)
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl Resolver for SystemResolver {
    async fn lookup(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
        let addrs = tokio::net::lookup_host((host, port)).await?;
        Ok(addrs.collect())
    }
}

/// Which address families may be dialed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FamilyFilter {
    /// Both IPv4 and IPv6
    #[default]
    Any,
    /// IPv4 only
    V4,
    /// IPv6 only
    V6,
}

impl FamilyFilter {
    fn from_config(config: &SocksConfig) -> Self {
        if config.ipv4_only {
            FamilyFilter::V4
        } else if config.ipv6_only {
            FamilyFilter::V6
        } else {
            FamilyFilter::Any
        }
    }

    fn allows(self, addr: &SocketAddr) -> bool {
        match self {
            FamilyFilter::Any => true,
            FamilyFilter::V4 => addr.is_ipv4(),
            FamilyFilter::V6 => addr.is_ipv6(),
        }
    }
}

/// Resolves request targets with a timeout and family policy
#[derive(Debug, Clone)]
pub struct AddressResolver {
    inner: Arc<dyn Resolver>,
    timeout: Duration,
    family: FamilyFilter,
}

impl AddressResolver {
    /// Create a resolver using the system DNS
    pub fn from_config(config: &SocksConfig) -> Self {
        AddressResolver {
            inner: Arc::new(SystemResolver),
            timeout: config.timeouts.resolve(),
            family: FamilyFilter::from_config(config),
        }
    }

    /// Replace the DNS backend
    pub fn with_resolver(mut self, inner: Arc<dyn Resolver>) -> Self {
        self.inner = inner;
        self
    }

    /// Resolve `target` into candidates in lookup order.
    ///
    /// Literal addresses are returned as-is (subject to the family filter).
    /// Duplicates are dropped; an empty result is an error.
    pub async fn resolve(&self, target: &TargetAddr) -> Result<Vec<SocketAddr>, Socks5Error> {
        let resolution_error = |reason: String| Socks5Error::Resolution {
            target: target.to_string(),
            reason,
        };

        let found = match target {
            TargetAddr::Ip(addr) => vec![*addr],
            TargetAddr::Domain(domain, _) if domain.is_empty() => {
                return Err(resolution_error("empty domain name".to_string()));
            }
            TargetAddr::Domain(domain, port) => {
                match tokio::time::timeout(self.timeout, self.inner.lookup(domain, *port)).await {
                    Ok(Ok(addrs)) => addrs,
                    Ok(Err(e)) => return Err(resolution_error(e.to_string())),
                    Err(_) => {
                        return Err(resolution_error(format!(
                            "lookup timed out after {:?}",
                            self.timeout
                        )))
                    }
                }
            }
        };

        let mut candidates: Vec<SocketAddr> = Vec::with_capacity(found.len());
        for addr in found {
            if self.family.allows(&addr) && !candidates.contains(&addr) {
                candidates.push(addr);
            }
        }

        if candidates.is_empty() {
            return Err(resolution_error("no usable addresses".to_string()));
        }

        debug!("Resolved {} to {:?}", target, candidates);
        Ok(candidates)
    }
}
