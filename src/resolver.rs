//! Caching DNS resolution.
//!
//! Every target string resolves at most once per run; the cache also
//! remembers failures so repeated lookups of a dead name cost nothing.
//! Resolution failure is a normal outcome (an empty address list), never an
//! error: a target that does not resolve is reported, not fatal.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use tracing::debug;
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::TokioAsyncResolver;

/// A run-scoped resolver with memoized lookups.
///
/// Addresses come back IPv4 first, then IPv6, preserving discovery order
/// within each family, deduplicated. Literal IP strings short-circuit
/// without any I/O.
pub struct Resolver {
    inner: TokioAsyncResolver,
    cache: HashMap<String, Vec<IpAddr>>,
}

impl Resolver {
    /// Create a resolver with default configuration.
    pub fn new() -> Self {
        Self {
            inner: TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default()),
            cache: HashMap::new(),
        }
    }

    /// Resolve a target string, consulting the cache first.
    ///
    /// An empty result means resolution failed; that outcome is cached too.
    pub async fn resolve(&mut self, target: &str) -> Vec<IpAddr> {
        if let Some(cached) = self.cache.get(target) {
            return cached.clone();
        }

        let addrs = self.lookup(target).await;
        self.cache.insert(target.to_string(), addrs.clone());
        addrs
    }

    /// Evict a cache entry and resolve again.
    ///
    /// The orchestrator's one-shot re-resolution of a failed target goes
    /// through here; a plain `resolve` would just replay the memoized empty
    /// result.
    pub async fn refresh(&mut self, target: &str) -> Vec<IpAddr> {
        self.cache.remove(target);
        self.resolve(target).await
    }

    async fn lookup(&self, target: &str) -> Vec<IpAddr> {
        if let Ok(ip) = target.parse::<IpAddr>() {
            return vec![ip];
        }

        match self.inner.lookup_ip(target).await {
            Ok(lookup) => {
                let (mut v4, mut v6) = (Vec::new(), Vec::new());
                for ip in lookup.iter() {
                    match ip {
                        IpAddr::V4(_) => v4.push(ip),
                        IpAddr::V6(_) => v6.push(ip),
                    }
                }
                let mut seen = HashSet::new();
                let addrs: Vec<IpAddr> = v4
                    .into_iter()
                    .chain(v6)
                    .filter(|ip| seen.insert(*ip))
                    .collect();
                debug!(host = target, count = addrs.len(), "resolved");
                addrs
            }
            Err(err) => {
                debug!(host = target, %err, "resolution failed");
                Vec::new()
            }
        }
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_addresses_short_circuit() {
        tokio_test::block_on(async {
            let mut resolver = Resolver::new();

            let addrs = resolver.resolve("192.168.1.1").await;
            assert_eq!(addrs, vec!["192.168.1.1".parse::<IpAddr>().unwrap()]);

            let addrs = resolver.resolve("::1").await;
            assert_eq!(addrs, vec!["::1".parse::<IpAddr>().unwrap()]);
        });
    }

    #[tokio::test]
    async fn test_malformed_name_resolves_empty() {
        let mut resolver = Resolver::new();
        // An empty label is rejected before any query goes out.
        let addrs = resolver.resolve("not..a.name").await;
        assert!(addrs.is_empty());

        // The failure is memoized.
        assert!(resolver.cache.contains_key("not..a.name"));
        let again = resolver.resolve("not..a.name").await;
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_evicts_before_resolving() {
        let mut resolver = Resolver::new();
        resolver
            .cache
            .insert("10.9.8.7".to_string(), Vec::new());

        // A cached empty entry would otherwise shadow the literal.
        assert!(resolver.resolve("10.9.8.7").await.is_empty());
        let addrs = resolver.refresh("10.9.8.7").await;
        assert_eq!(addrs, vec!["10.9.8.7".parse::<IpAddr>().unwrap()]);
    }
}
