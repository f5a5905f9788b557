//! Pinned root zone trust anchors.
//!
//! These are the IANA root KSK digests in DS form. Refreshing the anchors
//! after a root key rollover means editing this file and nothing else.

use data_encoding::HEXUPPER;
use hickory_proto::dnssec::rdata::DS;
use hickory_proto::dnssec::{Algorithm, DigestType};

/// A root trust anchor in DS form, as published by IANA.
#[derive(Debug, Clone, Copy)]
pub struct TrustAnchor {
    pub key_tag: u16,
    pub algorithm: u8,
    pub digest_type: u8,
    pub digest: &'static str,
}

/// The current IANA root anchors: KSK-2017 (20326) and KSK-2024 (38696).
pub const ROOT_ANCHORS: &[TrustAnchor] = &[
    TrustAnchor {
        key_tag: 20326,
        algorithm: 8,
        digest_type: 2,
        digest: "E06D44B80B8F1D39A95C0B0D7C65D08458E880409BBC683457104237C7F8EC8D",
    },
    TrustAnchor {
        key_tag: 38696,
        algorithm: 8,
        digest_type: 2,
        digest: "683D2D0ACB8C9B712A1948B27F741219298D0A450D612C483AF444A4C0FB2B16",
    },
];

/// Returns the pinned anchors as decoded DS records.
pub fn root_ds_records() -> Vec<DS> {
    ROOT_ANCHORS
        .iter()
        .filter_map(|anchor| {
            let digest = HEXUPPER.decode(anchor.digest.as_bytes()).ok()?;
            Some(DS::new(
                anchor.key_tag,
                Algorithm::RSASHA256,
                DigestType::SHA256,
                digest,
            ))
        })
        .collect()
}
