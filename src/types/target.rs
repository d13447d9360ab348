//! Target expression expansion.
//!
//! A target expression is a comma-separated list of tokens, each of which may
//! be a literal IP, a hostname, a CIDR block, or an IPv4 range in either the
//! last-octet (`10.0.0.1-20`) or full (`10.0.0.1-10.0.1.20`) form.
//! Expressions may also be supplied one per line in a file.
//! Expansion produces a flat, deduplicated, order-preserving list of opaque
//! target strings; whether a string actually resolves is the resolver's
//! business, not the parser's.

use ipnetwork::IpNetwork;
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::str::FromStr;

/// Error type for target expansion.
#[derive(Debug, thiserror::Error)]
pub enum TargetError {
    #[error("CIDR range too large: {0} addresses (max: {1})")]
    CidrTooLarge(u128, u128),
    #[error("address range too large: {0} addresses (max: {1})")]
    RangeTooLarge(u128, u128),
    #[error("failed to read target list '{path}': {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },
    #[error("no targets specified")]
    Empty,
}

/// An expanded set of scan targets, in caller order.
#[derive(Debug, Clone, Default)]
pub struct TargetSpec {
    targets: Vec<String>,
}

impl TargetSpec {
    /// Maximum number of hosts allowed in a single CIDR block.
    pub const MAX_CIDR_HOSTS: u128 = 65536;

    /// Expand one target expression (no file lookup).
    pub fn parse(expr: &str) -> Result<Self, TargetError> {
        let mut spec = Self::default();
        spec.push_expr(expr)?;
        spec.dedup();
        if spec.targets.is_empty() {
            return Err(TargetError::Empty);
        }
        Ok(spec)
    }

    /// Expand a command-line target argument.
    ///
    /// If `arg` names a readable file, each non-blank, non-`#` line of it is
    /// treated as a target expression; otherwise `arg` itself is the
    /// expression.
    pub fn load(arg: &str) -> Result<Self, TargetError> {
        if !Path::new(arg).is_file() {
            return Self::parse(arg);
        }

        let contents = fs::read_to_string(arg).map_err(|source| TargetError::FileRead {
            path: arg.to_string(),
            source,
        })?;

        let mut spec = Self::default();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            spec.push_expr(line)?;
        }
        spec.dedup();
        if spec.targets.is_empty() {
            return Err(TargetError::Empty);
        }
        Ok(spec)
    }

    /// The expanded target strings, consumed in order.
    pub fn into_targets(self) -> Vec<String> {
        self.targets
    }

    /// Number of expanded targets.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    fn push_expr(&mut self, expr: &str) -> Result<(), TargetError> {
        for token in expr.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            if token.contains('/') {
                self.push_cidr(token)?;
            } else {
                self.push_range(token)?;
            }
        }
        Ok(())
    }

    /// Expand a CIDR block into host addresses.
    ///
    /// A token that fails to parse as CIDR falls through as an opaque target
    /// string; only oversized blocks are a hard error.
    fn push_cidr(&mut self, token: &str) -> Result<(), TargetError> {
        let network: IpNetwork = match token.parse() {
            Ok(net) => net,
            Err(_) => {
                self.targets.push(token.to_string());
                return Ok(());
            }
        };

        let host_count = match network {
            IpNetwork::V4(net) => u128::from(net.size()),
            IpNetwork::V6(net) => {
                let prefix = u32::from(net.prefix());
                if prefix >= 128 {
                    1
                } else {
                    1u128 << (128 - prefix)
                }
            }
        };
        if host_count > Self::MAX_CIDR_HOSTS {
            return Err(TargetError::CidrTooLarge(host_count, Self::MAX_CIDR_HOSTS));
        }

        for ip in network.iter() {
            // Skip network and broadcast addresses for IPv4 prefixes
            // shorter than /31.
            if let (IpNetwork::V4(net), IpAddr::V4(addr)) = (network, ip) {
                if net.prefix() < 31 && (addr == net.network() || addr == net.broadcast()) {
                    continue;
                }
            }
            self.targets.push(ip.to_string());
        }
        Ok(())
    }

    /// Expand IPv4 range shorthands.
    ///
    /// Supports both the full form `a.b.c.d-e.f.g.h` and the last-octet
    /// form `a.b.c.x-y`; reversed bounds are swapped. Anything that does
    /// not match either shape exactly passes through as an opaque target
    /// string.
    fn push_range(&mut self, token: &str) -> Result<(), TargetError> {
        if let Some((lo, hi)) = token.split_once('-') {
            if let (Ok(lo), Ok(hi)) = (lo.parse::<Ipv4Addr>(), hi.parse::<Ipv4Addr>()) {
                let (lo, hi) = (u32::from(lo).min(u32::from(hi)), u32::from(lo).max(u32::from(hi)));
                let count = u128::from(hi - lo) + 1;
                if count > Self::MAX_CIDR_HOSTS {
                    return Err(TargetError::RangeTooLarge(count, Self::MAX_CIDR_HOSTS));
                }
                for ip in lo..=hi {
                    self.targets.push(Ipv4Addr::from(ip).to_string());
                }
                return Ok(());
            }
        }

        let Some((prefix, range)) = token.rsplit_once('.') else {
            self.targets.push(token.to_string());
            return Ok(());
        };
        let Some((lo, hi)) = range.split_once('-') else {
            self.targets.push(token.to_string());
            return Ok(());
        };

        let bounds = (lo.parse::<u8>(), hi.parse::<u8>());
        let prefix_ok = format!("{prefix}.0").parse::<Ipv4Addr>().is_ok();
        match bounds {
            (Ok(lo), Ok(hi)) if prefix_ok => {
                let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
                for octet in lo..=hi {
                    self.targets.push(format!("{prefix}.{octet}"));
                }
            }
            _ => self.targets.push(token.to_string()),
        }
        Ok(())
    }

    fn dedup(&mut self) {
        let mut seen = HashSet::new();
        self.targets.retain(|t| seen.insert(t.clone()));
    }
}

impl FromStr for TargetSpec {
    type Err = TargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TargetSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.targets.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_single_host_passthrough() {
        let spec = TargetSpec::parse("example.com").unwrap();
        assert_eq!(spec.into_targets(), vec!["example.com"]);

        let spec = TargetSpec::parse("192.168.1.1").unwrap();
        assert_eq!(spec.into_targets(), vec!["192.168.1.1"]);
    }

    #[test]
    fn test_comma_list_preserves_order() {
        let spec = TargetSpec::parse("b.example, a.example ,c.example").unwrap();
        assert_eq!(
            spec.into_targets(),
            vec!["b.example", "a.example", "c.example"]
        );
    }

    #[test]
    fn test_octet_range_expansion() {
        let spec = TargetSpec::parse("10.0.0.1-3").unwrap();
        assert_eq!(spec.into_targets(), vec!["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
    }

    #[test]
    fn test_octet_range_reversed_bounds() {
        let spec = TargetSpec::parse("10.0.0.3-1").unwrap();
        assert_eq!(spec.into_targets(), vec!["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
    }

    #[test]
    fn test_full_ipv4_range() {
        let spec = TargetSpec::parse("10.0.0.254-10.0.1.1").unwrap();
        assert_eq!(
            spec.into_targets(),
            vec!["10.0.0.254", "10.0.0.255", "10.0.1.0", "10.0.1.1"]
        );

        // Degenerate single-address range.
        let spec = TargetSpec::parse("10.0.0.1-10.0.0.1").unwrap();
        assert_eq!(spec.into_targets(), vec!["10.0.0.1"]);

        assert!(matches!(
            TargetSpec::parse("10.0.0.0-10.255.255.255"),
            Err(TargetError::RangeTooLarge(_, _))
        ));
    }

    #[test]
    fn test_octet_range_malformed_passthrough() {
        let spec = TargetSpec::parse("10.0.0.1-300").unwrap();
        assert_eq!(spec.into_targets(), vec!["10.0.0.1-300"]);

        let spec = TargetSpec::parse("host-with-dash.example").unwrap();
        assert_eq!(spec.into_targets(), vec!["host-with-dash.example"]);
    }

    #[test]
    fn test_cidr_expansion_excludes_network_and_broadcast() {
        let spec = TargetSpec::parse("192.168.1.0/30").unwrap();
        assert_eq!(spec.into_targets(), vec!["192.168.1.1", "192.168.1.2"]);
    }

    #[test]
    fn test_cidr_host_route() {
        let spec = TargetSpec::parse("192.168.1.7/32").unwrap();
        assert_eq!(spec.into_targets(), vec!["192.168.1.7"]);
    }

    #[test]
    fn test_cidr_too_large() {
        let result = TargetSpec::parse("10.0.0.0/8");
        assert!(matches!(result, Err(TargetError::CidrTooLarge(_, _))));
    }

    #[test]
    fn test_deduplication() {
        let spec = TargetSpec::parse("10.0.0.1,10.0.0.1-2,10.0.0.2").unwrap();
        assert_eq!(spec.into_targets(), vec!["10.0.0.1", "10.0.0.2"]);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# lab hosts").unwrap();
        writeln!(file, "10.0.0.1-2").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "gateway.lan").unwrap();
        writeln!(file, "10.0.0.1").unwrap();
        file.flush().unwrap();

        let spec = TargetSpec::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(
            spec.into_targets(),
            vec!["10.0.0.1", "10.0.0.2", "gateway.lan"]
        );
    }

    #[test]
    fn test_empty_is_an_error() {
        assert!(matches!(TargetSpec::parse(" , "), Err(TargetError::Empty)));
    }
}
