//! # dnsweep resolver engine
//!
//! The core of the measurement tool: issues single DNS queries against
//! single destination servers (UDP with TCP fallback on truncation),
//! orchestrates iterative resolution from the root zone, follows CNAME and
//! DNAME chains, and optionally annotates responses with a DNSSEC
//! validation result.
//!
//! ## Structure
//!
//! - [`pool`] owns the long-lived per-worker UDP sockets
//! - [`client`] sends one message to one server and matches the reply
//! - [`retry`] wraps the client with the retry budget and TCP re-ask
//! - [`iterative`] walks the delegation hierarchy root → TLD → authoritative
//! - [`lookup`] is the public entry point used by the recipe modules
//! - [`blacklist`] refuses queries to operator-denied destinations

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use hickory_proto::ProtoError;
use ipnet::IpNet;
use thiserror::Error;

pub mod answer;
pub mod blacklist;
pub mod client;
pub mod iterative;
pub mod lookup;
pub mod pool;
pub mod question;
pub mod retry;
pub mod roots;
pub mod status;
pub mod trace;

pub use answer::{Answer, DnsFlags, Protocol, SingleQueryResult};
pub use blacklist::Blacklist;
pub use client::WireClient;
pub use dnsweep_cache::DnsCache;
pub use lookup::{AllLookupResult, AllNameServersResult, LookupResult, NameServerResult};
pub use question::{Question, QuestionWithMetadata};
pub use roots::ROOT_SERVERS;
pub use status::Status;
pub use trace::{Layer, Trace, TraceStep};

/// Resolver error. The free-text message travels with the result; the
/// machine-readable discriminator is [`Status`].
#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("timeout")]
    Timeout,

    #[error("response truncated")]
    Truncated,

    #[error("network error: {0}")]
    Network(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("codec error: {0}")]
    Codec(#[from] ProtoError),

    #[error("destination {0} is blacklisted")]
    Blacklisted(IpAddr),

    #[error("no name servers available")]
    NoNameServers,

    #[error("configuration error: {0}")]
    Config(String),
}

impl ResolverError {
    /// True for failures worth another attempt against the same server.
    pub(crate) fn is_transient(&self) -> bool {
        match self {
            Self::Timeout => true,
            Self::Network(err) => matches!(
                err.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }
}

/// Result type for resolver operations.
pub type Result<T> = std::result::Result<T, ResolverError>;

/// Which transports a query may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportPolicy {
    /// UDP first, TCP re-ask on truncation.
    #[default]
    Auto,
    /// UDP only; truncated answers surface as `Status::Truncated`.
    UdpOnly,
    /// Every query over TCP.
    TcpOnly,
}

/// Which address families outbound queries may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IpFamily {
    /// Both families; glue preference picks between them.
    #[default]
    Any,
    /// IPv4 destinations only.
    V4,
    /// IPv6 destinations only.
    V6,
}

impl IpFamily {
    /// True when `ip` is usable under this policy.
    pub fn allows(self, ip: IpAddr) -> bool {
        match self {
            Self::Any => true,
            Self::V4 => ip.is_ipv4(),
            Self::V6 => ip.is_ipv6(),
        }
    }

    pub fn allows_v4(self) -> bool {
        self != Self::V6
    }

    pub fn allows_v6(self) -> bool {
        self != Self::V4
    }
}

/// Immutable policy bag for a [`Resolver`].
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Per-wire-attempt timeout, and the cumulative budget of one iterative
    /// resolution.
    pub timeout: Duration,

    /// Timeout of a single iterative step; resets each hop.
    pub iteration_step_timeout: Duration,

    /// Extra attempts after the first, shared across one whole lookup.
    pub retries: i32,

    /// Maximum referral depth during iteration.
    pub max_depth: usize,

    /// Response cache bound in entries.
    pub cache_size: usize,

    /// Iterate from the roots instead of asking a recursive server.
    pub iterative: bool,

    /// Recursive servers; empty means discover from the OS resolver config.
    pub name_servers: Vec<SocketAddr>,

    /// Source address; `None` means discover via a transient connect.
    pub local_addr: Option<IpAddr>,

    /// Keep one unbound UDP socket per worker for its whole life.
    pub recycle_sockets: bool,

    /// Worker count, which is also the socket pool size.
    pub workers: usize,

    /// Follow CNAME/DNAME chains in lookups.
    pub follow_cnames: bool,

    /// Set the DO bit and validate responses.
    pub dnssec: bool,

    /// Set the CD bit on outgoing queries.
    pub checking_disabled: bool,

    /// Request NSID via EDNS0.
    pub nsid: bool,

    /// EDNS0 client subnet to attach to queries.
    pub client_subnet: Option<IpNet>,

    /// Transport selection policy.
    pub transport: TransportPolicy,

    /// Address families queries may be sent over; also steers local
    /// address discovery and which root/glue addresses are considered.
    pub ip_family: IpFamily,

    /// Prefer AAAA glue when choosing iteration next-hops.
    pub prefer_ipv6_iteration: bool,

    /// Port queried on servers discovered during iteration and fan-out.
    /// The DNS default, overridable for test setups on high ports.
    pub destination_port: u16,

    /// DS-form trust anchors overriding the pinned IANA roots.
    pub trust_anchors: Option<Vec<hickory_proto::dnssec::rdata::DS>>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            iteration_step_timeout: Duration::from_secs(4),
            retries: 1,
            max_depth: 10,
            cache_size: dnsweep_cache::DEFAULT_CACHE_SIZE,
            iterative: false,
            name_servers: Vec::new(),
            local_addr: None,
            recycle_sockets: true,
            workers: 1,
            follow_cnames: true,
            dnssec: false,
            checking_disabled: false,
            nsid: false,
            client_subnet: None,
            transport: TransportPolicy::Auto,
            ip_family: IpFamily::Any,
            prefer_ipv6_iteration: false,
            destination_port: 53,
            trust_anchors: None,
        }
    }
}

/// The resolver handle: immutable config plus the process-wide resources
/// (socket pool, response cache, blacklist).
///
/// A `Resolver` is cheap to share behind an `Arc` and may be instantiated
/// multiple times in one process; nothing in here is global.
pub struct Resolver {
    config: ResolverConfig,
    pub(crate) pool: pool::SocketPool,
    cache: DnsCache,
    blacklist: Blacklist,
    name_servers: Vec<SocketAddr>,
}

impl Resolver {
    /// Builds a resolver: discovers the local source address, binds the
    /// socket pool eagerly, and settles the recursive server list.
    pub async fn new(config: ResolverConfig, blacklist: Blacklist) -> Result<Self> {
        let local_addr = match config.local_addr {
            Some(addr) => addr,
            None => pool::discover_local_addr(config.ip_family == IpFamily::V6).await?,
        };

        let pool = pool::SocketPool::bind(local_addr, config.workers, config.recycle_sockets)
            .await?;

        // In iterative mode the configured servers (if any) seed the walk
        // instead of the compiled-in roots; in recursive mode an empty list
        // falls back to the OS resolver configuration.
        let name_servers = if config.name_servers.is_empty() && !config.iterative {
            pool::system_name_servers()
        } else {
            config.name_servers.clone()
        };

        if !config.iterative && name_servers.is_empty() {
            return Err(ResolverError::NoNameServers);
        }

        let cache = DnsCache::new(config.cache_size);

        Ok(Self {
            config,
            pool,
            cache,
            blacklist,
            name_servers,
        })
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn cache(&self) -> &DnsCache {
        &self.cache
    }

    pub fn blacklist(&self) -> &Blacklist {
        &self.blacklist
    }

    /// The recursive servers this resolver consults.
    pub fn name_servers(&self) -> &[SocketAddr] {
        &self.name_servers
    }

    /// Picks a recursive server uniformly at random.
    pub fn random_name_server(&self) -> Option<SocketAddr> {
        if self.name_servers.is_empty() {
            return None;
        }
        let idx = rand::random::<u64>() as usize % self.name_servers.len();
        Some(self.name_servers[idx])
    }

    /// Returns the wire client for one worker, backed by its pooled socket
    /// (or a fresh one when socket recycling is disabled).
    pub async fn client_for_worker(&self, worker: usize) -> Result<WireClient> {
        let socket = self.pool.socket_for(worker).await?;
        Ok(WireClient::new(
            socket,
            self.pool.local_addr(),
            self.config.timeout,
        ))
    }
}

/// Seam between the recipe modules and the resolver, so tests can substitute
/// a scripted lookup.
#[async_trait]
pub trait LookupClient: Send + Sync {
    async fn lookup(
        &self,
        resolver: &Resolver,
        worker: usize,
        question: &Question,
        name_server: Option<SocketAddr>,
    ) -> LookupResult;
}

/// The real lookup path.
#[derive(Debug, Clone, Copy, Default)]
pub struct LiveLookup;

#[async_trait]
impl LookupClient for LiveLookup {
    async fn lookup(
        &self,
        resolver: &Resolver,
        worker: usize,
        question: &Question,
        name_server: Option<SocketAddr>,
    ) -> LookupResult {
        resolver.lookup(worker, question, name_server).await
    }
}
