//! End-to-end DNSSEC validation over an Ed25519-signed test hierarchy:
//! a root zone whose KSK is pinned as the trust anchor, and a signed
//! `example.com.` carrying one A RRset.

mod support;

use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use hickory_proto::dnssec::crypto::Ed25519SigningKey;
use hickory_proto::dnssec::rdata::{DNSSECRData, DNSKEY, DS, RRSIG};
use hickory_proto::dnssec::{
    Algorithm, DigestType, PublicKey, PublicKeyBuf, SigSigner, SigningKey, TBS,
};
use hickory_proto::rr::rdata::A;
use hickory_proto::rr::{DNSClass, Name, RData, Record, RecordSet, RecordType};
use rustls_pki_types::PrivatePkcs8KeyDer;
use time::{Duration as SigOffset, OffsetDateTime};

use dnsweep_dnssec::DnssecStatus;
use dnsweep_resolver::{Blacklist, Question, Resolver, ResolverConfig, Status};

use support::{question_of, response_for, spawn_udp, Responder};

const ZONE: &str = "example.com.";

/// One signing key with its public DNSKEY form.
struct ZoneKey {
    dnskey: DNSKEY,
    pkcs8: Vec<u8>,
}

impl ZoneKey {
    fn generate(flags: u16) -> Self {
        let pkcs8 = Ed25519SigningKey::generate_pkcs8()
            .expect("key generation")
            .secret_pkcs8_der()
            .to_vec();
        let signing =
            Ed25519SigningKey::from_pkcs8(&PrivatePkcs8KeyDer::from(pkcs8.clone()))
                .expect("key parse");
        let public = signing.to_public_key().expect("public key");
        let dnskey = DNSKEY::with_flags(
            flags,
            PublicKeyBuf::new(public.public_bytes().to_vec(), Algorithm::ED25519),
        );
        Self { dnskey, pkcs8 }
    }

    fn key_tag(&self) -> u16 {
        self.dnskey.calculate_key_tag().expect("key tag")
    }

    fn signer(&self, zone: &Name) -> SigSigner {
        let signing = Ed25519SigningKey::from_pkcs8(&PrivatePkcs8KeyDer::from(self.pkcs8.clone()))
            .expect("key parse");
        SigSigner::dnssec(
            self.dnskey.clone(),
            Box::new(signing),
            zone.clone(),
            Duration::from_secs(86_400),
        )
    }

    fn record(&self, zone: &Name) -> Record {
        Record::from_rdata(
            zone.clone(),
            300,
            RData::DNSSEC(DNSSECRData::DNSKEY(self.dnskey.clone())),
        )
    }

    fn ds(&self, zone: &Name) -> DS {
        let digest = self
            .dnskey
            .to_digest(zone, DigestType::SHA256)
            .expect("digest");
        DS::new(
            self.key_tag(),
            Algorithm::ED25519,
            DigestType::SHA256,
            digest.as_ref().to_vec(),
        )
    }
}

/// Signs an RRset with `key`, acting for `zone`.
fn rrsig_over(records: &[Record], key: &ZoneKey, zone: &Name) -> Record {
    let name = records[0].name().clone();
    let rtype = records[0].record_type();
    let mut rrset = RecordSet::new(name.clone(), rtype, 0);
    for record in records {
        rrset.insert(record.clone(), 0);
    }

    let signer = key.signer(zone);
    let inception = OffsetDateTime::now_utc() - SigOffset::minutes(5);
    let expiration = inception + SigOffset::seconds(signer.sig_duration().as_secs() as i64);
    let tbs = TBS::from_rrset(&rrset, DNSClass::IN, inception, expiration, &signer).expect("tbs");
    let sig = signer.sign(&tbs).expect("signing");
    let rrsig = RRSIG::new(
        rtype,
        signer.key().algorithm(),
        name.num_labels(),
        rrset.ttl(),
        expiration.unix_timestamp() as u32,
        inception.unix_timestamp() as u32,
        signer.calculate_key_tag().expect("key tag"),
        signer.signer_name().clone(),
        sig,
    );
    Record::from_rdata(name, 300, RData::DNSSEC(DNSSECRData::RRSIG(rrsig)))
}

/// The signed test hierarchy and the responder serving it.
struct SignedZone {
    answers_a: Vec<Record>,
    answers_zone_dnskey: Vec<Record>,
    answers_ds: Vec<Record>,
    answers_root_dnskey: Vec<Record>,
    anchor: DS,
}

impl SignedZone {
    fn build() -> Self {
        let root = Name::root();
        let zone = Name::from_str(ZONE).unwrap();

        let root_ksk = ZoneKey::generate(257);
        let root_zsk = ZoneKey::generate(256);
        let zone_ksk = ZoneKey::generate(257);
        let zone_zsk = ZoneKey::generate(256);

        let a_record = Record::from_rdata(
            zone.clone(),
            300,
            RData::A(A(Ipv4Addr::new(192, 0, 2, 1))),
        );
        let a_sig = rrsig_over(&[a_record.clone()], &zone_zsk, &zone);

        let zone_keys = vec![zone_ksk.record(&zone), zone_zsk.record(&zone)];
        let zone_keys_sig = rrsig_over(&zone_keys, &zone_ksk, &zone);

        let ds_record = Record::from_rdata(
            zone.clone(),
            300,
            RData::DNSSEC(DNSSECRData::DS(zone_ksk.ds(&zone))),
        );
        let ds_sig = rrsig_over(&[ds_record.clone()], &root_zsk, &root);

        let root_keys = vec![root_ksk.record(&root), root_zsk.record(&root)];
        let root_keys_sig = rrsig_over(&root_keys, &root_ksk, &root);

        let anchor = root_ksk.ds(&root);

        let mut answers_zone_dnskey = zone_keys;
        answers_zone_dnskey.push(zone_keys_sig);
        let mut answers_root_dnskey = root_keys;
        answers_root_dnskey.push(root_keys_sig);

        Self {
            answers_a: vec![a_record, a_sig],
            answers_zone_dnskey,
            answers_ds: vec![ds_record, ds_sig],
            answers_root_dnskey,
            anchor,
        }
    }

    /// Serves the zone; `serve_ds` false simulates a parent that publishes
    /// no DS (an unsigned delegation).
    fn responder(self: &Arc<Self>, serve_ds: bool) -> Responder {
        let zone = Arc::clone(self);
        Arc::new(move |query| {
            let (qname, qtype) = question_of(query);
            let mut reply = response_for(query);
            reply.set_authoritative(true);

            let answers: &[Record] = match (qname.as_str(), qtype) {
                (ZONE, RecordType::A) => &zone.answers_a,
                (ZONE, RecordType::DNSKEY) => &zone.answers_zone_dnskey,
                (ZONE, RecordType::DS) if serve_ds => &zone.answers_ds,
                (ZONE, RecordType::DS) => &[],
                (".", RecordType::DNSKEY) => &zone.answers_root_dnskey,
                _ => &[],
            };
            for record in answers {
                reply.add_answer(record.clone());
            }
            Some(reply)
        })
    }
}

async fn validating_resolver(server: std::net::SocketAddr, anchor: DS) -> Resolver {
    let config = ResolverConfig {
        name_servers: vec![server],
        local_addr: Some("127.0.0.1".parse().unwrap()),
        workers: 1,
        timeout: Duration::from_secs(5),
        dnssec: true,
        trust_anchors: Some(vec![anchor]),
        ..ResolverConfig::default()
    };
    Resolver::new(config, Blacklist::new()).await.unwrap()
}

#[tokio::test]
async fn test_signed_zone_validates_secure() {
    let zone = Arc::new(SignedZone::build());
    let server = spawn_udp("127.0.0.1:0", zone.responder(true)).await;
    let resolver = validating_resolver(server, zone.anchor.clone()).await;

    let question = Question::new("example.com", RecordType::A).unwrap();
    let result = resolver.lookup(0, &question, None).await;

    assert_eq!(result.status, Status::NoError, "error: {:?}", result.error);
    let data = result.data.expect("answer data");
    let dnssec = data.dnssec.expect("validation result");

    assert_eq!(dnssec.status, DnssecStatus::Secure);
    assert!(!dnssec.ds.is_empty(), "the DS chain is reported");
    assert!(!dnssec.dnskeys.is_empty(), "the keys used are reported");
    assert!(
        result.trace.len() > 1,
        "DNSKEY/DS sub-queries appear in the trace"
    );
}

#[tokio::test]
async fn test_tampered_rdata_is_bogus() {
    let mut zone = SignedZone::build();
    // Flip the answer's address after signing; the signature now covers
    // different bytes.
    let owner = Name::from_str(ZONE).unwrap();
    zone.answers_a[0] = Record::from_rdata(
        owner,
        300,
        RData::A(A(Ipv4Addr::new(192, 0, 2, 2))),
    );
    let zone = Arc::new(zone);

    let server = spawn_udp("127.0.0.1:0", zone.responder(true)).await;
    let resolver = validating_resolver(server, zone.anchor.clone()).await;

    let question = Question::new("example.com", RecordType::A).unwrap();
    let result = resolver.lookup(0, &question, None).await;

    assert_eq!(result.status, Status::NoError, "data is still returned");
    let dnssec = result.data.unwrap().dnssec.expect("validation result");
    assert_eq!(dnssec.status, DnssecStatus::Bogus);
}

#[tokio::test]
async fn test_missing_ds_is_insecure() {
    let zone = Arc::new(SignedZone::build());
    let server = spawn_udp("127.0.0.1:0", zone.responder(false)).await;
    let resolver = validating_resolver(server, zone.anchor.clone()).await;

    let question = Question::new("example.com", RecordType::A).unwrap();
    let result = resolver.lookup(0, &question, None).await;

    assert_eq!(result.status, Status::NoError);
    let dnssec = result.data.unwrap().dnssec.expect("validation result");
    assert_eq!(dnssec.status, DnssecStatus::Insecure);
}

#[tokio::test]
async fn test_disabling_do_only_removes_validation() {
    let zone = Arc::new(SignedZone::build());
    let server = spawn_udp("127.0.0.1:0", zone.responder(true)).await;

    let validating = validating_resolver(server, zone.anchor.clone()).await;
    let plain_config = ResolverConfig {
        name_servers: vec![server],
        local_addr: Some("127.0.0.1".parse().unwrap()),
        workers: 1,
        timeout: Duration::from_secs(5),
        ..ResolverConfig::default()
    };
    let plain = Resolver::new(plain_config, Blacklist::new()).await.unwrap();

    let question = Question::new("example.com", RecordType::A).unwrap();
    let with_do = validating.lookup(0, &question, None).await;
    let without_do = plain.lookup(0, &question, None).await;

    // Removing DO must not change the answers, only the annotation.
    let with_data = with_do.data.unwrap();
    let without_data = without_do.data.unwrap();
    let a_answers = |answers: &[dnsweep_resolver::Answer]| -> Vec<String> {
        answers
            .iter()
            .filter(|a| a.rtype == "A")
            .map(|a| a.data.clone())
            .collect()
    };
    assert_eq!(a_answers(&with_data.answers), a_answers(&without_data.answers));
    assert!(with_data.dnssec.is_some());
    assert!(without_data.dnssec.is_none());
}
