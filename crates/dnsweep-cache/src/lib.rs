//! # dnsweep response cache
//!
//! A bounded, concurrency-safe cache mapping `(name, type, class)` to a
//! previously observed response. Entries expire at the minimum TTL the
//! server sent across the answer set; negative answers use the SOA minimum.
//! When the cache is full the least-recently-used entry is evicted.
//!
//! Caching is a pure optimization: a warm cache must never change the
//! observable result of a lookup, only its latency.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dnsweep_dnssec::DnssecResult;
use hickory_proto::op::ResponseCode;
use hickory_proto::rr::rdata::SOA;
use hickory_proto::rr::{DNSClass, Name, RData, Record, RecordType};
use lru::LruCache;
use parking_lot::Mutex;
use tracing::trace;

/// Default upper bound in entries.
pub const DEFAULT_CACHE_SIZE: usize = 10_000;

/// Ceiling applied to every entry so a mis-configured zone cannot pin the
/// cache for weeks.
const MAX_TTL: Duration = Duration::from_secs(86_400);

/// Negative entries without a usable SOA fall back to this.
const DEFAULT_NEGATIVE_TTL: Duration = Duration::from_secs(900);

/// Cache key: lowercased owner name plus query type and class.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    name: Name,
    rtype: RecordType,
    class: DNSClass,
}

impl CacheKey {
    pub fn new(name: &Name, rtype: RecordType, class: DNSClass) -> Self {
        Self {
            name: name.to_lowercase(),
            rtype,
            class,
        }
    }

    pub fn name(&self) -> &Name {
        &self.name
    }
}

/// The cacheable portion of a response: the three record sections plus the
/// header and transport facts a later consumer needs to rebuild its result.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub answers: Vec<Record>,
    pub authorities: Vec<Record>,
    pub additionals: Vec<Record>,
    pub rcode: ResponseCode,
    pub authoritative: bool,
    /// The server that originally answered, as `ip:port`.
    pub resolver: String,
    /// Whether the original exchange ended up on TCP.
    pub via_tcp: bool,
    /// Validation outcome attached when the entry was stored. `None` means
    /// the response was cached unvalidated and a hit must re-validate.
    pub dnssec: Option<DnssecResult>,
}

impl CachedResponse {
    /// True for response codes the cache will accept.
    pub fn is_cacheable(&self) -> bool {
        matches!(self.rcode, ResponseCode::NoError | ResponseCode::NXDomain)
    }

    /// TTL for this response: the minimum across the answer set, or the SOA
    /// minimum for negative answers.
    fn ttl(&self) -> Duration {
        let positive = self
            .answers
            .iter()
            .map(|r| u64::from(r.ttl()))
            .min()
            .map(Duration::from_secs);

        match positive {
            Some(ttl) => ttl.min(MAX_TTL),
            None => self.negative_ttl(),
        }
    }

    /// SOA minimum from the authority section, capped by the default.
    fn negative_ttl(&self) -> Duration {
        self.authorities
            .iter()
            .filter_map(|r| match r.data() {
                RData::SOA(soa) => Some(soa_negative_ttl(soa, r.ttl())),
                _ => None,
            })
            .next()
            .unwrap_or(DEFAULT_NEGATIVE_TTL)
            .min(DEFAULT_NEGATIVE_TTL)
    }
}

/// RFC 2308: the negative TTL is the lesser of the SOA MINIMUM and the SOA
/// record's own TTL.
fn soa_negative_ttl(soa: &SOA, record_ttl: u32) -> Duration {
    Duration::from_secs(u64::from(soa.minimum().min(record_ttl)))
}

#[derive(Debug, Clone)]
struct CachedEntry {
    response: CachedResponse,
    expires_at: Instant,
}

impl CachedEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Bounded LRU cache, safe for concurrent use.
pub struct DnsCache {
    inner: Mutex<LruCache<CacheKey, CachedEntry>>,
    stats: CacheStats,
}

impl DnsCache {
    /// Creates a cache bounded to `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            stats: CacheStats::default(),
        }
    }

    /// Returns the cached response if present and unexpired. A hit on an
    /// expired entry removes it and reports a miss.
    pub fn get(&self, key: &CacheKey) -> Option<CachedResponse> {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        match inner.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                self.stats.record_hit();
                Some(entry.response.clone())
            }
            Some(_) => {
                trace!(name = %key.name, "evicting expired cache entry");
                inner.pop(key);
                self.stats.record_miss();
                None
            }
            None => {
                self.stats.record_miss();
                None
            }
        }
    }

    /// Inserts a response, evicting the least-recently-used entry when at
    /// capacity. Responses with non-cacheable rcodes are ignored.
    pub fn put(&self, key: CacheKey, response: CachedResponse) {
        if !response.is_cacheable() {
            return;
        }
        let ttl = response.ttl();
        if ttl.is_zero() {
            return;
        }
        let entry = CachedEntry {
            response,
            expires_at: Instant::now() + ttl,
        };
        self.inner.lock().put(key, entry);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

/// Hit/miss counters.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStats {
    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}
