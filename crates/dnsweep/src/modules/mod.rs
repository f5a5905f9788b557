//! Lookup modules: thin recipes over the resolver core.
//!
//! Most modules are a single typed query; DMARC, SPF, NSLOOKUP, and
//! BINDVERSION add their own question shaping and answer extraction.

use std::net::SocketAddr;

use clap::ValueEnum;
use hickory_proto::rr::{DNSClass, RecordType};
use serde_json::json;

use dnsweep_resolver::{
    LookupClient, LookupResult, Question, Resolver, Status, Trace,
};

mod bindversion;
mod dmarc;
mod nslookup;
mod spf;

/// The module selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "UPPER")]
pub enum ModuleArg {
    A,
    Aaaa,
    Any,
    Afsdb,
    Atma,
    Caa,
    Cds,
    Cdnskey,
    Cert,
    Cname,
    Dmarc,
    Dnskey,
    Ds,
    Hinfo,
    Hip,
    Https,
    Isdn,
    Key,
    Loc,
    Mx,
    Naptr,
    Ns,
    Nsec,
    Nsec3,
    Nsec3Param,
    Null,
    Ptr,
    Rp,
    Rrsig,
    Smimea,
    Soa,
    Spf,
    Srv,
    Sshfp,
    Svcb,
    Tkey,
    Tlsa,
    Txt,
    Uri,
    Bindversion,
    Axfr,
    Nslookup,
    Multiple,
}

/// What a module actually runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    /// One query of the given type, results passed through.
    Raw(RecordType),
    Dmarc,
    Spf,
    NsLookup,
    BindVersion,
}

impl ModuleArg {
    /// Resolves the CLI module to its implementation. Types the codec does
    /// not model keep their IANA type codes.
    pub fn kind(self) -> anyhow::Result<ModuleKind> {
        let kind = match self {
            Self::A => ModuleKind::Raw(RecordType::A),
            Self::Aaaa => ModuleKind::Raw(RecordType::AAAA),
            Self::Any => ModuleKind::Raw(RecordType::ANY),
            Self::Afsdb => ModuleKind::Raw(RecordType::Unknown(18)),
            Self::Atma => ModuleKind::Raw(RecordType::Unknown(34)),
            Self::Caa => ModuleKind::Raw(RecordType::CAA),
            Self::Cds => ModuleKind::Raw(RecordType::CDS),
            Self::Cdnskey => ModuleKind::Raw(RecordType::CDNSKEY),
            Self::Cert => ModuleKind::Raw(RecordType::Unknown(37)),
            Self::Cname => ModuleKind::Raw(RecordType::CNAME),
            Self::Dmarc => ModuleKind::Dmarc,
            Self::Dnskey => ModuleKind::Raw(RecordType::DNSKEY),
            Self::Ds => ModuleKind::Raw(RecordType::DS),
            Self::Hinfo => ModuleKind::Raw(RecordType::HINFO),
            Self::Hip => ModuleKind::Raw(RecordType::Unknown(55)),
            Self::Https => ModuleKind::Raw(RecordType::HTTPS),
            Self::Isdn => ModuleKind::Raw(RecordType::Unknown(20)),
            Self::Key => ModuleKind::Raw(RecordType::KEY),
            Self::Loc => ModuleKind::Raw(RecordType::Unknown(29)),
            Self::Mx => ModuleKind::Raw(RecordType::MX),
            Self::Naptr => ModuleKind::Raw(RecordType::NAPTR),
            Self::Ns => ModuleKind::Raw(RecordType::NS),
            Self::Nsec => ModuleKind::Raw(RecordType::NSEC),
            Self::Nsec3 => ModuleKind::Raw(RecordType::NSEC3),
            Self::Nsec3Param => ModuleKind::Raw(RecordType::NSEC3PARAM),
            Self::Null => ModuleKind::Raw(RecordType::NULL),
            Self::Ptr => ModuleKind::Raw(RecordType::PTR),
            Self::Rp => ModuleKind::Raw(RecordType::Unknown(17)),
            Self::Rrsig => ModuleKind::Raw(RecordType::RRSIG),
            Self::Smimea => ModuleKind::Raw(RecordType::Unknown(53)),
            Self::Soa => ModuleKind::Raw(RecordType::SOA),
            Self::Spf => ModuleKind::Spf,
            Self::Srv => ModuleKind::Raw(RecordType::SRV),
            Self::Sshfp => ModuleKind::Raw(RecordType::SSHFP),
            Self::Svcb => ModuleKind::Raw(RecordType::SVCB),
            Self::Tkey => ModuleKind::Raw(RecordType::Unknown(249)),
            Self::Tlsa => ModuleKind::Raw(RecordType::TLSA),
            Self::Txt => ModuleKind::Raw(RecordType::TXT),
            Self::Uri => ModuleKind::Raw(RecordType::Unknown(256)),
            Self::Bindversion => ModuleKind::BindVersion,
            Self::Nslookup => ModuleKind::NsLookup,
            Self::Axfr => {
                anyhow::bail!("the AXFR module is not supported by this build")
            }
            Self::Multiple => {
                anyhow::bail!("the MULTIPLE module is not supported by this build")
            }
        };
        Ok(kind)
    }
}

impl ModuleKind {
    /// The query type this module puts on the wire.
    pub fn query_type(&self) -> RecordType {
        match self {
            Self::Raw(rtype) => *rtype,
            Self::Dmarc | Self::Spf | Self::BindVersion => RecordType::TXT,
            Self::NsLookup => RecordType::NS,
        }
    }

    /// The query class: CHAOS for BINDVERSION, the configured class
    /// otherwise.
    pub fn query_class(&self, configured: DNSClass) -> DNSClass {
        match self {
            Self::BindVersion => DNSClass::CH,
            _ => configured,
        }
    }
}

/// Uniform module result handed to the output layer.
#[derive(Debug)]
pub struct ModuleOutput {
    pub data: serde_json::Value,
    pub trace: Trace,
    pub status: Status,
    pub error: Option<String>,
    /// Resolver and flags of the primary exchange, for the top-level fields.
    pub resolver: Option<String>,
    pub flags: Option<dnsweep_resolver::DnsFlags>,
}

impl ModuleOutput {
    pub(crate) fn from_lookup(result: LookupResult, data: serde_json::Value) -> Self {
        let resolver = result.data.as_ref().map(|r| r.resolver.clone());
        let flags = result.data.as_ref().map(|r| r.flags);
        Self {
            data,
            trace: result.trace,
            status: result.status,
            error: result.error,
            resolver,
            flags,
        }
    }

    pub(crate) fn failed(status: Status, error: impl Into<String>) -> Self {
        Self {
            data: serde_json::Value::Null,
            trace: Trace::new(),
            status,
            error: Some(error.into()),
            resolver: None,
            flags: None,
        }
    }
}

impl ModuleKind {
    /// Runs the module for one input name.
    #[allow(clippy::too_many_arguments)]
    pub async fn run(
        &self,
        lookup: &dyn LookupClient,
        resolver: &Resolver,
        worker: usize,
        name: &str,
        qclass: DNSClass,
        name_server: Option<SocketAddr>,
        all_name_servers: bool,
    ) -> ModuleOutput {
        match self {
            Self::Raw(rtype) => {
                raw_lookup(
                    lookup,
                    resolver,
                    worker,
                    name,
                    *rtype,
                    qclass,
                    name_server,
                    all_name_servers,
                )
                .await
            }
            Self::Dmarc => dmarc::run(lookup, resolver, worker, name, name_server).await,
            Self::Spf => spf::run(lookup, resolver, worker, name, name_server).await,
            Self::NsLookup => nslookup::run(lookup, resolver, worker, name, name_server).await,
            Self::BindVersion => {
                bindversion::run(lookup, resolver, worker, name_server).await
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn raw_lookup(
    lookup: &dyn LookupClient,
    resolver: &Resolver,
    worker: usize,
    name: &str,
    rtype: RecordType,
    qclass: DNSClass,
    name_server: Option<SocketAddr>,
    all_name_servers: bool,
) -> ModuleOutput {
    let question = match Question::with_class(name, rtype, qclass) {
        Ok(question) => question,
        Err(err) => return ModuleOutput::failed(Status::Error, err.to_string()),
    };

    if all_name_servers {
        let result = resolver.lookup_all_name_servers(worker, &question).await;
        let data = result
            .data
            .as_ref()
            .map(|d| serde_json::to_value(d).unwrap_or(serde_json::Value::Null))
            .unwrap_or(serde_json::Value::Null);
        return ModuleOutput {
            data,
            trace: result.trace,
            status: result.status,
            error: result.error,
            resolver: None,
            flags: None,
        };
    }

    let result = lookup.lookup(resolver, worker, &question, name_server).await;
    let data = result
        .data
        .as_ref()
        .map(|d| serde_json::to_value(d).unwrap_or(serde_json::Value::Null))
        .unwrap_or(serde_json::Value::Null);
    ModuleOutput::from_lookup(result, data)
}

/// Shared helper: TXT answers of a lookup, in arrival order.
pub(crate) fn txt_answers(result: &LookupResult) -> Vec<String> {
    result
        .data
        .as_ref()
        .map(|data| {
            data.answers
                .iter()
                .filter(|answer| answer.rtype == "TXT")
                .map(|answer| answer.data.clone())
                .collect()
        })
        .unwrap_or_default()
}

/// Shared helper: a `{key: value}` JSON object.
pub(crate) fn single_field(key: &str, value: &str) -> serde_json::Value {
    json!({ key: value })
}
