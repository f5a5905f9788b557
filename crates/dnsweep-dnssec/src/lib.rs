//! # dnsweep DNSSEC validation
//!
//! Validates the DNSSEC chain of trust for DNS responses:
//!
//! - **RRset grouping** of each message section by owner, class, and the
//!   RRSIG `TypeCovered`
//! - **Signature verification** of every RRset against the signer zone's
//!   DNSKEYs
//! - **Chain of trust** from each KSK up to the pinned IANA root anchors
//!   via DS records fetched from the parent zone
//!
//! The validator never performs network I/O itself. Sub-queries for DNSKEY
//! and DS RRsets go through the [`KeyFetcher`] trait, which the resolver
//! implements with its own (recursively validated) lookup path.

use std::fmt;

use hickory_proto::rr::{DNSClass, Name, RecordType};
use serde::Serialize;
use thiserror::Error;

pub mod anchors;
pub mod validator;

pub use anchors::{root_ds_records, TrustAnchor, ROOT_ANCHORS};
pub use validator::{DnssecValidator, KeyFetcher};

/// Errors produced while validating a response.
#[derive(Debug, Error)]
pub enum DnssecError {
    /// The RRset has no RRSIG whose validity window covers the current time.
    #[error("no RRSIG currently valid for {0}")]
    NoValidSignature(String),

    /// No DNSKEY with a matching key tag was available for an RRSIG.
    #[error("no matching DNSKEY for key tag {0}")]
    NoMatchingKey(u16),

    /// A DNSKEY RRset contained a record that is not a DNSKEY, or a DNSKEY
    /// with flags other than 256 (ZSK) or 257 (KSK).
    #[error("malformed DNSKEY RRset: {0}")]
    MalformedKeySet(String),

    /// The signer zone's DNSKEY RRset could not be fetched or did not
    /// validate.
    #[error("cannot get DNSKEYs for signer domain {0}")]
    KeyFetchFailed(String),

    /// The signer zone's DS RRset could not be fetched from the parent.
    #[error("failed to get DS records for signer domain {0}")]
    DsFetchFailed(String),

    /// No KSK in the signer zone's DNSKEY RRset matched an authentic DS.
    #[error("no valid KSK found for {0}")]
    NoValidKsk(String),

    /// The parent zone publishes no DS for the signer: an unsigned
    /// delegation, which downgrades the RRset to Insecure.
    #[error("no DS records published for {0}")]
    UnsignedDelegation(String),

    /// Cryptographic verification failed for every candidate signature.
    #[error("could not verify any RRSIG for RRset {0}")]
    VerifyFailed(String),

    /// The recursive descent exceeded the validation depth bound.
    #[error("validation depth exceeded at {0}")]
    DepthExceeded(String),
}

/// Identity of an RRset: owner name, class, and effective type.
///
/// RRSIG records are keyed by their `TypeCovered` so a signature groups with
/// the RRset it signs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RrsetKey {
    pub name: Name,
    pub class: DNSClass,
    pub rtype: RecordType,
}

impl RrsetKey {
    /// Serializable projection with presentation-form fields.
    pub fn to_id(&self) -> RrsetId {
        RrsetId {
            name: self.name.to_string(),
            class: self.class.to_string(),
            rtype: rtype_string(self.rtype),
        }
    }
}

impl fmt::Display for RrsetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.name, self.class, rtype_string(self.rtype))
    }
}

/// Presentation form of a record type; unknown types render as `TYPEnnn`.
pub fn rtype_string(rtype: RecordType) -> String {
    match rtype {
        RecordType::Unknown(code) => format!("TYPE{code}"),
        other => other.to_string(),
    }
}

/// Serializable RRset identity.
#[derive(Debug, Clone, Serialize)]
pub struct RrsetId {
    pub name: String,
    pub class: String,
    #[serde(rename = "type")]
    pub rtype: String,
}

/// Security disposition of an RRset or a whole response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DnssecStatus {
    Secure,
    Insecure,
    Bogus,
    Indeterminate,
}

impl fmt::Display for DnssecStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Secure => write!(f, "Secure"),
            Self::Insecure => write!(f, "Insecure"),
            Self::Bogus => write!(f, "Bogus"),
            Self::Indeterminate => write!(f, "Indeterminate"),
        }
    }
}

/// The signature that validated an RRset.
#[derive(Debug, Clone, Serialize)]
pub struct SignatureInfo {
    pub key_tag: u16,
    pub algorithm: u8,
    pub signer: String,
    pub type_covered: String,
    pub inception: u32,
    pub expiration: u32,
}

/// A DS record that anchored part of the chain of trust.
#[derive(Debug, Clone, Serialize)]
pub struct DsInfo {
    pub key_tag: u16,
    pub algorithm: u8,
    pub digest_type: u8,
    pub digest: String,
}

/// A DNSKEY that verified at least one signature.
#[derive(Debug, Clone, Serialize)]
pub struct DnskeyInfo {
    pub flags: u16,
    pub algorithm: u8,
    pub key_tag: u16,
}

/// Outcome for a single RRset.
#[derive(Debug, Clone, Serialize)]
pub struct DnssecPerSetResult {
    pub rrset: RrsetId,
    pub status: DnssecStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<SignatureInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Validation outcome for a whole response.
#[derive(Debug, Clone, Serialize)]
pub struct DnssecResult {
    pub status: DnssecStatus,
    pub answer: Vec<DnssecPerSetResult>,
    pub authority: Vec<DnssecPerSetResult>,
    pub additional: Vec<DnssecPerSetResult>,
    pub ds: Vec<DsInfo>,
    pub dnskeys: Vec<DnskeyInfo>,
}

impl DnssecResult {
    pub(crate) fn new() -> Self {
        Self {
            status: DnssecStatus::Indeterminate,
            answer: Vec::new(),
            authority: Vec::new(),
            additional: Vec::new(),
            ds: Vec::new(),
            dnskeys: Vec::new(),
        }
    }

    /// Rolls the per-RRset results of the answer section up into an overall
    /// status: any Bogus poisons the response, any Insecure downgrades it,
    /// any Indeterminate leaves it undecided, otherwise Secure.
    pub fn populate_status(&mut self) {
        let sets = &self.answer;
        self.status = if sets.iter().any(|s| s.status == DnssecStatus::Bogus) {
            DnssecStatus::Bogus
        } else if sets.iter().any(|s| s.status == DnssecStatus::Insecure) {
            DnssecStatus::Insecure
        } else if sets.iter().any(|s| s.status == DnssecStatus::Indeterminate) {
            DnssecStatus::Indeterminate
        } else {
            DnssecStatus::Secure
        };
    }
}
