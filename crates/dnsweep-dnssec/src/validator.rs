//! The chain-of-trust validator.
//!
//! Validation walks each section of a response, groups records into RRsets,
//! and verifies every RRset signature against the signer zone's DNSKEYs.
//! KSKs are only trusted after their DS digest matches an authentic DS from
//! the parent zone (or, for the root, a pinned anchor). DNSKEY and DS
//! RRsets for a signer zone are fetched at most once per validation run and
//! memoized, so a response with many signatures from the same zone costs a
//! single pair of sub-queries.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::DashMap;
use data_encoding::HEXUPPER;
use hickory_proto::dnssec::rdata::{DNSSECRData, DNSKEY, DS, RRSIG};
use hickory_proto::dnssec::Verifier;
use hickory_proto::op::Message;
use hickory_proto::rr::{Name, RData, Record, RecordType};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::anchors;
use crate::{
    DnskeyInfo, DnssecError, DnssecPerSetResult, DnssecResult, DnssecStatus, DsInfo, RrsetKey,
    SignatureInfo,
};

const ZONE_SIGNING_KEY_FLAG: u16 = 256;
const KEY_SIGNING_KEY_FLAG: u16 = 257;

/// Recursive sub-queries deeper than this abort with an error rather than
/// chasing a mis-configured delegation forever.
const MAX_VALIDATION_DEPTH: usize = 16;

/// Source of validated DNSKEY/DS RRsets for signer zones.
///
/// Implementations issue a real DNS query whose response chain is itself
/// DNSSEC-validated before the records are handed back. Returning `None`
/// means the lookup failed, returned nothing, or did not validate Secure.
#[async_trait]
pub trait KeyFetcher: Send + Sync {
    async fn fetch_validated(
        &self,
        zone: &Name,
        rtype: RecordType,
        depth: usize,
    ) -> Option<Vec<Record>>;
}

/// DNSKEYs of one signer zone after DS validation.
///
/// `ksks` holds only the keys whose digest matched an authentic DS record;
/// `zsks` holds every zone signing key from the answer.
struct ZoneKeys {
    ksks: HashMap<u16, DNSKEY>,
    zsks: HashMap<u16, DNSKEY>,
}

/// Validates one response against the pinned root anchors.
///
/// A validator is scoped to a single validation run: the zone-key memo and
/// the used-DS/used-DNSKEY sets accumulate across the sections of one
/// response and its sub-queries, then drain into the final [`DnssecResult`].
pub struct DnssecValidator<'a, F: KeyFetcher> {
    fetcher: &'a F,
    anchors: Vec<DS>,
    zone_keys: DashMap<Name, Arc<ZoneKeys>>,
    ds_used: Mutex<Vec<DsInfo>>,
    keys_used: Mutex<Vec<DnskeyInfo>>,
}

impl<'a, F: KeyFetcher> DnssecValidator<'a, F> {
    /// A validator rooted at the pinned IANA anchors.
    pub fn new(fetcher: &'a F) -> Self {
        Self::with_anchors(fetcher, anchors::root_ds_records())
    }

    /// A validator rooted at caller-supplied DS anchors.
    pub fn with_anchors(fetcher: &'a F, anchors: Vec<DS>) -> Self {
        Self {
            fetcher,
            anchors,
            zone_keys: DashMap::new(),
            ds_used: Mutex::new(Vec::new()),
            keys_used: Mutex::new(Vec::new()),
        }
    }

    /// Validates all three sections of `msg` and rolls the outcome up.
    pub async fn validate(&self, msg: &Message, depth: usize) -> DnssecResult {
        self.validate_sections(msg.answers(), msg.name_servers(), msg.additionals(), depth)
            .await
    }

    /// Validates a response given as bare sections (the form both the wire
    /// path and the cache hand over).
    pub async fn validate_sections(
        &self,
        answers: &[Record],
        authorities: &[Record],
        additionals: &[Record],
        depth: usize,
    ) -> DnssecResult {
        let mut result = DnssecResult::new();

        result.answer = self.validate_section(answers, depth).await;
        result.additional = self.validate_section(additionals, depth).await;
        result.authority = self.validate_section(authorities, depth).await;

        result.ds = self.ds_used.lock().clone();
        result.dnskeys = self.keys_used.lock().clone();
        result.populate_status();

        result
    }

    /// Splits a section into RRsets and verifies each one.
    async fn validate_section(
        &self,
        records: &[Record],
        depth: usize,
    ) -> Vec<DnssecPerSetResult> {
        let (rrsets, rrsigs) = split_rrsets_and_sigs(records);
        let mut results = Vec::with_capacity(rrsets.len());

        for (key, rrset) in rrsets {
            let mut set_result = DnssecPerSetResult {
                rrset: key.to_id(),
                status: DnssecStatus::Indeterminate,
                signature: None,
                error: None,
            };

            match rrsigs.get(&key) {
                None => {
                    trace!(rrset = %key, "RRset without RRSIG coverage");
                    set_result.status = DnssecStatus::Insecure;
                }
                Some(sigs) => {
                    trace!(rrset = %key, sigs = sigs.len(), "verifying RRSIGs");
                    match self.validate_rrsig(&key, &rrset, sigs, depth).await {
                        Ok(sig) => {
                            set_result.status = DnssecStatus::Secure;
                            set_result.signature = Some(signature_info(&sig));
                        }
                        Err(err @ DnssecError::UnsignedDelegation(_)) => {
                            debug!(rrset = %key, error = %err, "unsigned delegation");
                            set_result.status = DnssecStatus::Insecure;
                            set_result.error = Some(err.to_string());
                        }
                        Err(err) => {
                            debug!(rrset = %key, error = %err, "no RRSIG verified");
                            set_result.status = DnssecStatus::Bogus;
                            set_result.error = Some(err.to_string());
                        }
                    }
                }
            }

            results.push(set_result);
        }

        results
    }

    /// Verifies an RRset with its candidate signatures, returning the first
    /// RRSIG that verifies cryptographically.
    ///
    /// For a DNSKEY RRset the signing keys are the KSKs of the RRset itself;
    /// for every other type the signer zone's ZSKs are fetched (once) via
    /// [`KeyFetcher`]. In both cases the KSKs must chain to an authentic DS.
    async fn validate_rrsig(
        &self,
        key: &RrsetKey,
        rrset: &[Record],
        rrsigs: &[RRSIG],
        depth: usize,
    ) -> Result<RRSIG, DnssecError> {
        let now = unix_time();
        let mut last_err = DnssecError::NoValidSignature(key.to_string());

        if key.rtype == RecordType::DNSKEY {
            let signer = rrsigs
                .first()
                .map(|sig| sig.signer_name().clone())
                .unwrap_or_else(|| key.name.clone());
            let ds_set = self.authentic_ds_set(&signer, depth).await?;
            let ksks = parse_ksks_from_answer(rrset)?;
            let ksks = self.match_ksks_against_ds(&signer, ksks, &ds_set);
            if ksks.is_empty() {
                return Err(DnssecError::NoValidKsk(signer.to_string()));
            }

            for rrsig in rrsigs {
                let tag = rrsig.key_tag();
                if !rrsig_current(rrsig, now) {
                    trace!(key_tag = tag, "RRSIG expired or not yet valid");
                    continue;
                }
                let Some(ksk) = ksks.get(&tag) else {
                    last_err = DnssecError::NoMatchingKey(tag);
                    continue;
                };
                match ksk.verify_rrsig(&key.name, key.class, rrsig, rrset.iter()) {
                    Ok(()) => {
                        self.record_key_used(ksk);
                        return Ok(rrsig.clone());
                    }
                    Err(err) => {
                        trace!(key_tag = tag, error = %err, "KSK verification failed");
                        last_err = DnssecError::VerifyFailed(key.to_string());
                    }
                }
            }
            return Err(last_err);
        }

        for rrsig in rrsigs {
            let tag = rrsig.key_tag();

            if !rrsig_current(rrsig, now) {
                trace!(key_tag = tag, "RRSIG expired or not yet valid");
                continue;
            }

            let zone_keys = self.zone_keys_for(rrsig.signer_name(), depth).await?;
            let Some(zsk) = zone_keys.zsks.get(&tag) else {
                last_err = DnssecError::NoMatchingKey(tag);
                continue;
            };

            match zsk.verify_rrsig(&key.name, key.class, rrsig, rrset.iter()) {
                Ok(()) => {
                    self.record_key_used(zsk);
                    return Ok(rrsig.clone());
                }
                Err(err) => {
                    trace!(key_tag = tag, error = %err, "ZSK verification failed");
                    last_err = DnssecError::VerifyFailed(key.to_string());
                }
            }
        }

        Err(last_err)
    }

    /// Returns the signer zone's keys, fetching and DS-validating them the
    /// first time the zone is seen in this validation run.
    async fn zone_keys_for(
        &self,
        zone: &Name,
        depth: usize,
    ) -> Result<Arc<ZoneKeys>, DnssecError> {
        let zone = zone.to_lowercase();
        if let Some(keys) = self.zone_keys.get(&zone) {
            return Ok(keys.clone());
        }

        if depth >= MAX_VALIDATION_DEPTH {
            return Err(DnssecError::DepthExceeded(zone.to_string()));
        }

        // The chain is anchored before any key is trusted: an absent DS set
        // means the delegation is unsigned and there is nothing to verify.
        let ds_set = self.authentic_ds_set(&zone, depth).await?;

        let records = self
            .fetcher
            .fetch_validated(&zone, RecordType::DNSKEY, depth + 1)
            .await
            .ok_or_else(|| DnssecError::KeyFetchFailed(zone.to_string()))?;

        let mut ksks = HashMap::new();
        let mut zsks = HashMap::new();
        for record in &records {
            let RData::DNSSEC(DNSSECRData::DNSKEY(dnskey)) = record.data() else {
                trace!(zone = %zone, "non-DNSKEY record in DNSKEY answer");
                continue;
            };
            let Ok(tag) = dnskey.calculate_key_tag() else {
                warn!(zone = %zone, "unable to compute key tag, skipping key");
                continue;
            };
            match dnskey.flags() {
                KEY_SIGNING_KEY_FLAG => {
                    ksks.insert(tag, dnskey.clone());
                }
                ZONE_SIGNING_KEY_FLAG => {
                    zsks.insert(tag, dnskey.clone());
                }
                flags => {
                    trace!(zone = %zone, flags, "unexpected DNSKEY flags in answer");
                }
            }
        }

        if ksks.is_empty() || zsks.is_empty() {
            return Err(DnssecError::MalformedKeySet(format!(
                "missing at least one KSK or ZSK in DNSKEY answer for {zone}"
            )));
        }

        let ksks = self.match_ksks_against_ds(&zone, ksks, &ds_set);
        if ksks.is_empty() {
            return Err(DnssecError::NoValidKsk(zone.to_string()));
        }

        let keys = Arc::new(ZoneKeys { ksks, zsks });
        self.zone_keys.insert(zone, keys.clone());
        Ok(keys)
    }

    /// The authentic DS set of a zone: the pinned anchors for the root,
    /// otherwise a validated DS query against the parent. A parent that
    /// answers with no DS records marks the delegation unsigned.
    async fn authentic_ds_set(&self, zone: &Name, depth: usize) -> Result<Vec<DS>, DnssecError> {
        if zone.is_root() {
            return Ok(self.anchors.clone());
        }

        if depth >= MAX_VALIDATION_DEPTH {
            return Err(DnssecError::DepthExceeded(zone.to_string()));
        }

        let records = self
            .fetcher
            .fetch_validated(zone, RecordType::DS, depth + 1)
            .await
            .ok_or_else(|| DnssecError::DsFetchFailed(zone.to_string()))?;

        let ds_set: Vec<DS> = records
            .iter()
            .filter_map(|record| match record.data() {
                RData::DNSSEC(DNSSECRData::DS(ds)) => Some(ds.clone()),
                _ => {
                    trace!(zone = %zone, "non-DS record in DS answer");
                    None
                }
            })
            .collect();

        if ds_set.is_empty() {
            return Err(DnssecError::UnsignedDelegation(zone.to_string()));
        }

        Ok(ds_set)
    }

    /// Keeps only the KSKs whose digest matches an authentic DS record,
    /// comparing with the digest type of the authentic DS.
    fn match_ksks_against_ds(
        &self,
        zone: &Name,
        ksks: HashMap<u16, DNSKEY>,
        ds_set: &[DS],
    ) -> HashMap<u16, DNSKEY> {
        let by_tag: HashMap<u16, &DS> = ds_set.iter().map(|ds| (ds.key_tag(), ds)).collect();

        let mut validated = HashMap::new();
        for (tag, ksk) in ksks {
            let Some(ds) = by_tag.get(&tag) else {
                trace!(zone = %zone, key_tag = tag, "no DS record for KSK");
                continue;
            };
            match ds.covers(zone, &ksk) {
                Ok(true) => {
                    trace!(zone = %zone, key_tag = tag, "DS digest matches KSK");
                    self.record_ds_used(ds);
                    validated.insert(tag, ksk);
                }
                Ok(false) => {
                    debug!(zone = %zone, key_tag = tag, "DS digest mismatch for KSK");
                }
                Err(err) => {
                    debug!(zone = %zone, key_tag = tag, error = %err, "DS digest computation failed");
                }
            }
        }

        validated
    }

    fn record_ds_used(&self, ds: &DS) {
        let info = DsInfo {
            key_tag: ds.key_tag(),
            algorithm: u8::from(ds.algorithm()),
            digest_type: u8::from(ds.digest_type()),
            digest: HEXUPPER.encode(ds.digest()),
        };
        let mut used = self.ds_used.lock();
        if !used.iter().any(|d| d.key_tag == info.key_tag && d.digest == info.digest) {
            used.push(info);
        }
    }

    fn record_key_used(&self, key: &DNSKEY) {
        let Ok(tag) = key.calculate_key_tag() else {
            return;
        };
        let info = DnskeyInfo {
            flags: key.flags(),
            algorithm: u8::from(key.algorithm()),
            key_tag: tag,
        };
        let mut used = self.keys_used.lock();
        if !used.iter().any(|k| k.key_tag == info.key_tag && k.flags == info.flags) {
            used.push(info);
        }
    }
}

/// Groups a section into RRsets and their covering signatures. RRSIG records
/// key by their `TypeCovered`; OPT pseudo-records are not data and are
/// skipped.
fn split_rrsets_and_sigs(
    records: &[Record],
) -> (HashMap<RrsetKey, Vec<Record>>, HashMap<RrsetKey, Vec<RRSIG>>) {
    let mut rrsets: HashMap<RrsetKey, Vec<Record>> = HashMap::new();
    let mut rrsigs: HashMap<RrsetKey, Vec<RRSIG>> = HashMap::new();

    for record in records {
        if record.record_type() == RecordType::OPT {
            continue;
        }
        let mut key = RrsetKey {
            name: record.name().to_lowercase(),
            class: record.dns_class(),
            rtype: record.record_type(),
        };
        match record.data() {
            RData::DNSSEC(DNSSECRData::RRSIG(rrsig)) => {
                key.rtype = rrsig.type_covered();
                rrsigs.entry(key).or_default().push(rrsig.clone());
            }
            _ => {
                rrsets.entry(key).or_default().push(record.clone());
            }
        }
    }

    (rrsets, rrsigs)
}

/// Extracts KSKs (flags 257) from a DNSKEY RRset. ZSKs are skipped; any
/// other flag value or a non-DNSKEY record is an error, matching the strict
/// read the RRset's own signature check requires.
fn parse_ksks_from_answer(rrset: &[Record]) -> Result<HashMap<u16, DNSKEY>, DnssecError> {
    let mut ksks = HashMap::new();

    for record in rrset {
        let RData::DNSSEC(DNSSECRData::DNSKEY(dnskey)) = record.data() else {
            return Err(DnssecError::MalformedKeySet(format!(
                "invalid RR type in DNSKEY RRset: {}",
                record.record_type()
            )));
        };
        match dnskey.flags() {
            KEY_SIGNING_KEY_FLAG => {
                let tag = dnskey.calculate_key_tag().map_err(|err| {
                    DnssecError::MalformedKeySet(format!("cannot compute key tag: {err}"))
                })?;
                ksks.insert(tag, dnskey.clone());
            }
            ZONE_SIGNING_KEY_FLAG => continue,
            flags => {
                return Err(DnssecError::MalformedKeySet(format!(
                    "unexpected DNSKEY flag: {flags}"
                )));
            }
        }
    }

    if ksks.is_empty() {
        return Err(DnssecError::MalformedKeySet(
            "could not find any KSK in DNSKEY RRset".to_string(),
        ));
    }

    Ok(ksks)
}

/// True when `now` falls inside the signature's validity window.
fn rrsig_current(rrsig: &RRSIG, now: u32) -> bool {
    let inception = rrsig.sig_inception().get();
    let expiration = rrsig.sig_expiration().get();
    inception <= now && now <= expiration
}

fn signature_info(rrsig: &RRSIG) -> SignatureInfo {
    SignatureInfo {
        key_tag: rrsig.key_tag(),
        algorithm: u8::from(rrsig.algorithm()),
        signer: rrsig.signer_name().to_string(),
        type_covered: crate::rtype_string(rrsig.type_covered()),
        inception: rrsig.sig_inception().get(),
        expiration: rrsig.sig_expiration().get(),
    }
}

fn unix_time() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}
