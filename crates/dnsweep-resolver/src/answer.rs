//! Decoded answers and per-query results.
//!
//! Responses come off the wire as codec records; for output they are
//! flattened into [`Answer`] values with presentation-form data. Known RR
//! types render in their zone-file form; unknown types render as hex.

use std::net::SocketAddr;
use std::time::Duration;

use data_encoding::HEXLOWER;
use hickory_proto::op::{Message, ResponseCode};
use hickory_proto::rr::{Name, RData, Record, RecordType};
use serde::Serialize;

use dnsweep_dnssec::DnssecResult;

/// Transport a reply arrived over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Protocol {
    #[serde(rename = "udp")]
    Udp,
    #[serde(rename = "tcp")]
    Tcp,
}

/// Header flags of a response.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DnsFlags {
    pub authoritative: bool,
    pub truncated: bool,
    pub recursion_desired: bool,
    pub recursion_available: bool,
    pub authenticated: bool,
    pub checking_disabled: bool,
}

impl DnsFlags {
    fn from_message(msg: &Message) -> Self {
        Self {
            authoritative: msg.authoritative(),
            truncated: msg.truncated(),
            recursion_desired: msg.recursion_desired(),
            recursion_available: msg.recursion_available(),
            authenticated: msg.authentic_data(),
            checking_disabled: msg.checking_disabled(),
        }
    }
}

/// A single decoded resource record.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub name: String,
    #[serde(rename = "type")]
    pub rtype: String,
    pub class: String,
    pub ttl: u32,
    #[serde(rename = "answer")]
    pub data: String,
}

impl Answer {
    /// Decodes one record; OPT pseudo-records yield `None`.
    pub fn from_record(record: &Record) -> Option<Self> {
        if record.record_type() == RecordType::OPT {
            return None;
        }
        Some(Self {
            name: crate::question::strip_trailing_dot(&record.name().to_lowercase().to_string()),
            rtype: rtype_string(record.record_type()),
            class: record.dns_class().to_string(),
            ttl: record.ttl(),
            data: rdata_string(record.data()),
        })
    }
}

/// Presentation form of a record type; unknown codes become `TYPEnnn`.
pub fn rtype_string(rtype: RecordType) -> String {
    match rtype {
        RecordType::Unknown(code) => format!("TYPE{code}"),
        other => other.to_string(),
    }
}

/// Presentation form of rdata. TXT character-strings are concatenated raw,
/// which is what the text-record recipes (DMARC, SPF) match against.
pub fn rdata_string(rdata: &RData) -> String {
    match rdata {
        RData::A(a) => a.0.to_string(),
        RData::AAAA(aaaa) => aaaa.0.to_string(),
        RData::CNAME(cname) => cname.0.to_string(),
        RData::NS(ns) => ns.0.to_string(),
        RData::PTR(ptr) => ptr.0.to_string(),
        RData::TXT(txt) => txt
            .txt_data()
            .iter()
            .map(|part| String::from_utf8_lossy(part).into_owned())
            .collect::<String>(),
        RData::MX(mx) => format!("{} {}", mx.preference(), mx.exchange()),
        RData::SOA(soa) => format!(
            "{} {} {} {} {} {} {}",
            soa.mname(),
            soa.rname(),
            soa.serial(),
            soa.refresh(),
            soa.retry(),
            soa.expire(),
            soa.minimum()
        ),
        RData::SRV(srv) => format!(
            "{} {} {} {}",
            srv.priority(),
            srv.weight(),
            srv.port(),
            srv.target()
        ),
        RData::NULL(null) => HEXLOWER.encode(null.anything()),
        RData::Unknown { rdata, .. } => HEXLOWER.encode(rdata.anything()),
        other => other.to_string(),
    }
}

/// Presentation form of a response code.
pub fn rcode_string(rcode: ResponseCode) -> String {
    match rcode {
        ResponseCode::NoError => "NOERROR".to_string(),
        ResponseCode::FormErr => "FORMERR".to_string(),
        ResponseCode::ServFail => "SERVFAIL".to_string(),
        ResponseCode::NXDomain => "NXDOMAIN".to_string(),
        ResponseCode::NotImp => "NOTIMP".to_string(),
        ResponseCode::Refused => "REFUSED".to_string(),
        other => format!("RCODE{}", u16::from(other)),
    }
}

/// The outcome of one query to one server: the three record sections exactly
/// as returned on the wire, plus transport facts and an optional DNSSEC
/// verdict. Nothing is filtered before the lookup layer sees it.
#[derive(Debug, Clone, Serialize)]
pub struct SingleQueryResult {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub answers: Vec<Answer>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub authorities: Vec<Answer>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub additionals: Vec<Answer>,
    pub flags: DnsFlags,
    pub rcode: String,
    pub protocol: Protocol,
    pub resolver: String,
    pub duration_ns: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dnssec: Option<DnssecResult>,
}

impl SingleQueryResult {
    /// Decodes a wire response into the output model.
    pub fn from_message(
        msg: &Message,
        protocol: Protocol,
        resolver: SocketAddr,
        duration: Duration,
    ) -> Self {
        Self {
            answers: msg.answers().iter().filter_map(Answer::from_record).collect(),
            authorities: msg
                .name_servers()
                .iter()
                .filter_map(Answer::from_record)
                .collect(),
            additionals: msg
                .additionals()
                .iter()
                .filter_map(Answer::from_record)
                .collect(),
            flags: DnsFlags::from_message(msg),
            rcode: rcode_string(msg.response_code()),
            protocol,
            resolver: resolver.to_string(),
            duration_ns: duration.as_nanos() as u64,
            dnssec: None,
        }
    }
}

/// Reads an uncompressed wire-format domain name, as found in the rdata of
/// record types the codec does not model (DNAME targets in particular, where
/// compression is forbidden by RFC 6672).
pub(crate) fn parse_uncompressed_name(bytes: &[u8]) -> Option<Name> {
    let mut labels: Vec<&[u8]> = Vec::new();
    let mut pos = 0usize;

    loop {
        let len = *bytes.get(pos)? as usize;
        if len == 0 {
            break;
        }
        // A compression pointer here is malformed for our callers.
        if len & 0xC0 != 0 {
            return None;
        }
        let label = bytes.get(pos + 1..pos + 1 + len)?;
        labels.push(label);
        pos += 1 + len;
    }

    let mut name = Name::from_labels(labels).ok()?;
    name.set_fqdn(true);
    Some(name)
}
