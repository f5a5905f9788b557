//! Destination blacklist.
//!
//! A read-mostly set of denied IPs and CIDR blocks, loaded once at startup
//! and consulted before every wire send. Misses are the common case, so the
//! structure is a plain immutable list checked without locking.

use std::net::IpAddr;
use std::path::Path;

use ipnet::IpNet;
use tracing::debug;

use crate::{ResolverError, Result};

/// Membership test for operator-denied destination addresses.
#[derive(Debug, Clone, Default)]
pub struct Blacklist {
    nets: Vec<IpNet>,
}

impl Blacklist {
    /// An empty blacklist that denies nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads one entry per line: a CIDR block or a bare address. Blank
    /// lines and `#` comments are skipped.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_lines(&contents)
    }

    pub fn from_lines(contents: &str) -> Result<Self> {
        let mut nets = Vec::new();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let net = if let Ok(net) = line.parse::<IpNet>() {
                net
            } else if let Ok(ip) = line.parse::<IpAddr>() {
                IpNet::from(ip)
            } else {
                return Err(ResolverError::Config(format!(
                    "invalid blacklist entry: {line:?}"
                )));
            };
            nets.push(net);
        }
        debug!(entries = nets.len(), "blacklist loaded");
        Ok(Self { nets })
    }

    /// True when `ip` falls inside any denied block.
    pub fn contains(&self, ip: IpAddr) -> bool {
        self.nets.iter().any(|net| net.contains(&ip))
    }

    pub fn len(&self) -> usize {
        self.nets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nets.is_empty()
    }
}
