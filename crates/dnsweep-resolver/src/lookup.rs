//! Public lookup entry points.
//!
//! [`Resolver::lookup`] turns a question into one or more wire queries:
//! cache consult, then either the iterative engine or a configured
//! recursive server, then CNAME/DNAME chasing with loop detection, and
//! finally DNSSEC annotation when requested.
//! [`Resolver::lookup_all_name_servers`] instead fans the question out to
//! every authoritative server of the enclosing zone.

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use hickory_proto::op::{Message, ResponseCode};
use hickory_proto::rr::{Name, RData, RecordType};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, trace as trace_log};

use dnsweep_cache::{CacheKey, CachedResponse};
use dnsweep_dnssec::{DnssecResult, DnssecStatus, DnssecValidator, KeyFetcher};

use crate::answer::{
    parse_uncompressed_name, rcode_string, Answer, DnsFlags, Protocol, SingleQueryResult,
};
use crate::client::WireClient;
use crate::iterative::WireOutcome;
use crate::question::{Question, QuestionWithMetadata};
use crate::status::Status;
use crate::trace::{Layer, Trace, TraceStep};
use crate::Resolver;

/// Upper bound on CNAME/DNAME redirects followed in one lookup.
const MAX_CNAME_HOPS: usize = 10;

/// DNAME carries type code 39; the codec models it generically.
const DNAME_TYPE: u16 = 39;

/// Outcome of one public lookup.
#[derive(Debug)]
pub struct LookupResult {
    pub data: Option<SingleQueryResult>,
    pub trace: Trace,
    pub status: Status,
    pub error: Option<String>,
}

/// One server's slice of an all-name-servers lookup.
#[derive(Debug, Clone, Serialize)]
pub struct NameServerResult {
    pub server: String,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<SingleQueryResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate of the per-server results; partial failure is non-fatal.
#[derive(Debug, Clone, Serialize)]
pub struct AllNameServersResult {
    pub servers: Vec<NameServerResult>,
}

/// Outcome of [`Resolver::lookup_all_name_servers`].
#[derive(Debug)]
pub struct AllLookupResult {
    pub data: Option<AllNameServersResult>,
    pub trace: Trace,
    pub status: Status,
    pub error: Option<String>,
}

/// Captures the sections of a wire reply for caching and later inspection.
pub(crate) fn sections_from_message(
    msg: &Message,
    server: SocketAddr,
    protocol: Protocol,
) -> CachedResponse {
    CachedResponse {
        answers: msg.answers().to_vec(),
        authorities: msg.name_servers().to_vec(),
        additionals: msg.additionals().to_vec(),
        rcode: msg.response_code(),
        authoritative: msg.authoritative(),
        resolver: server.to_string(),
        via_tcp: protocol == Protocol::Tcp,
        dnssec: None,
    }
}

impl Resolver {
    /// Resolves `question` and returns the result with the accumulated
    /// trace. `name_server` overrides the configured recursive servers.
    pub async fn lookup(
        &self,
        worker: usize,
        question: &Question,
        name_server: Option<SocketAddr>,
    ) -> LookupResult {
        let client = match self.client_for_worker(worker).await {
            Ok(client) => client,
            Err(err) => {
                return LookupResult {
                    data: None,
                    trace: Trace::new(),
                    status: Status::from(&err),
                    error: Some(err.to_string()),
                }
            }
        };
        self.lookup_with_client(&client, question, name_server).await
    }

    pub(crate) async fn lookup_with_client(
        &self,
        client: &WireClient,
        question: &Question,
        name_server: Option<SocketAddr>,
    ) -> LookupResult {
        let mut trace = Trace::new();
        let base = QuestionWithMetadata::new(question.clone(), self.config().retries);
        let follow = self.config().follow_cnames && chaseable(question.qtype);

        let mut current = question.clone();
        let mut visited: HashSet<Name> = HashSet::new();
        visited.insert(current.name.clone());
        let mut hops = 0usize;

        loop {
            let qm = base.derive(current.clone());
            let outcome = self
                .resolve_question(client, qm, name_server, &mut trace, self.config().dnssec, 0)
                .await;

            if follow && outcome.status == Status::NoError {
                if let Some(sections) = &outcome.sections {
                    if let Some(target) = chase_target(sections, &current) {
                        hops += 1;
                        if hops > MAX_CNAME_HOPS {
                            return LookupResult {
                                data: outcome.result,
                                trace,
                                status: Status::Error,
                                error: Some(format!(
                                    "CNAME chain exceeded {MAX_CNAME_HOPS} redirects"
                                )),
                            };
                        }
                        if !visited.insert(target.clone()) {
                            return LookupResult {
                                data: outcome.result,
                                trace,
                                status: Status::LoopDetected,
                                error: Some(format!("CNAME loop through {target}")),
                            };
                        }
                        trace_log!(from = %current.name, to = %target, "following alias");
                        current = Question {
                            name: target,
                            qtype: question.qtype,
                            qclass: question.qclass,
                        };
                        continue;
                    }
                }
            }

            return LookupResult {
                data: outcome.result,
                trace,
                status: outcome.status,
                error: outcome.error,
            };
        }
    }

    /// One question resolved one way: cache, or the iterative engine, or a
    /// recursive server; with DNSSEC annotation and cache fill on the way
    /// out. Boxed because the DNSSEC validator re-enters it for DNSKEY/DS
    /// sub-queries.
    pub(crate) fn resolve_question<'a>(
        &'a self,
        client: &'a WireClient,
        qm: QuestionWithMetadata,
        name_server: Option<SocketAddr>,
        trace: &'a mut Trace,
        validate: bool,
        depth: usize,
    ) -> BoxFuture<'a, WireOutcome> {
        async move {
            let key = CacheKey::new(&qm.question.name, qm.question.qtype, qm.question.qclass);

            if let Some(mut cached) = self.cache().get(&key) {
                trace_log!(name = %qm.question.name, "cache hit");
                if validate && cached.dnssec.is_none() {
                    // Cached before validation was requested; validate now.
                    let dnssec = self
                        .validate_response(client, &qm, name_server, &cached, trace, depth)
                        .await;
                    cached.dnssec = Some(dnssec);
                    self.cache().put(key, cached.clone());
                }
                let status = classify_sections(&cached);
                let result = result_from_cached(&cached);
                return WireOutcome {
                    sections: Some(cached),
                    result: Some(result),
                    server: None,
                    status,
                    error: None,
                };
            }

            let mut outcome = if self.config().iterative {
                self.iterative_lookup(client, qm.clone(), trace).await
            } else {
                self.recursive_query(client, &qm, name_server, trace).await
            };

            if validate && outcome.status.is_success() {
                if let Some(sections) = outcome.sections.as_mut() {
                    let snapshot = sections.clone();
                    let dnssec = self
                        .validate_response(client, &qm, name_server, &snapshot, trace, depth)
                        .await;
                    sections.dnssec = Some(dnssec.clone());
                    if let Some(result) = outcome.result.as_mut() {
                        result.dnssec = Some(dnssec);
                    }
                }
            }

            if let Some(sections) = &outcome.sections {
                self.cache().put(key, sections.clone());
            }

            outcome
        }
        .boxed()
    }

    /// A single query against one recursive server.
    async fn recursive_query(
        &self,
        client: &WireClient,
        qm: &QuestionWithMetadata,
        name_server: Option<SocketAddr>,
        trace: &mut Trace,
    ) -> WireOutcome {
        let Some(server) = name_server.or_else(|| self.random_name_server()) else {
            return WireOutcome::failed(Status::Error, "no name servers configured");
        };

        if self.blacklist().contains(server.ip()) {
            return WireOutcome::failed(
                Status::Blacklisted,
                format!("name server {server} is blacklisted"),
            );
        }

        match self.retrying_send(client, server, qm, true).await {
            Ok((msg, protocol, duration)) => {
                let result = SingleQueryResult::from_message(&msg, protocol, server, duration);
                trace.push(TraceStep {
                    result: result.clone(),
                    name_server: server.to_string(),
                    depth: 0,
                    layer: Layer::Recursive,
                    timestamp_ns: crate::trace::unix_nanos(),
                });
                let sections = sections_from_message(&msg, server, protocol);
                let status = classify_sections(&sections);
                WireOutcome {
                    sections: Some(sections),
                    result: Some(result),
                    server: Some(server),
                    status,
                    error: None,
                }
            }
            Err(err) => {
                debug!(server = %server, error = %err, "recursive query failed");
                WireOutcome {
                    sections: None,
                    result: None,
                    server: Some(server),
                    status: Status::from(&err),
                    error: Some(err.to_string()),
                }
            }
        }
    }

    /// Runs the DNSSEC validator over a response, collecting the traces of
    /// its DNSKEY/DS sub-queries into the main trace.
    async fn validate_response(
        &self,
        client: &WireClient,
        qm: &QuestionWithMetadata,
        name_server: Option<SocketAddr>,
        sections: &CachedResponse,
        trace: &mut Trace,
        depth: usize,
    ) -> DnssecResult {
        let fetcher = ValidatingFetcher {
            resolver: self,
            client,
            base: qm,
            name_server,
            trace: Mutex::new(Trace::new()),
        };
        let validator = match &self.config().trust_anchors {
            Some(anchors) => DnssecValidator::with_anchors(&fetcher, anchors.clone()),
            None => DnssecValidator::new(&fetcher),
        };
        let result = validator
            .validate_sections(
                &sections.answers,
                &sections.authorities,
                &sections.additionals,
                depth,
            )
            .await;
        drop(validator);
        trace.extend(fetcher.trace.into_inner());
        result
    }

    /// Resolves the NS set of the zone enclosing `question.name`, then asks
    /// every authoritative server the original question in parallel. Each
    /// fan-out query runs on its own socket so replies cannot cross.
    pub async fn lookup_all_name_servers(
        &self,
        worker: usize,
        question: &Question,
    ) -> AllLookupResult {
        let client = match self.client_for_worker(worker).await {
            Ok(client) => client,
            Err(err) => {
                return AllLookupResult {
                    data: None,
                    trace: Trace::new(),
                    status: Status::from(&err),
                    error: Some(err.to_string()),
                }
            }
        };

        let mut trace = Trace::new();

        // NS of the parent zone; for names that are themselves a zone apex
        // the delegation NS set answers just as well.
        let ns_owner = if question.name.num_labels() > 1 {
            question.name.base_name()
        } else {
            question.name.clone()
        };
        let ns_question = Question::from_name(ns_owner, RecordType::NS);
        let ns_lookup = self
            .lookup_with_client(&client, &ns_question, None)
            .await;
        trace.extend(ns_lookup.trace);

        if !ns_lookup.status.is_success() {
            return AllLookupResult {
                data: None,
                trace,
                status: ns_lookup.status,
                error: ns_lookup
                    .error
                    .or_else(|| Some("could not resolve the zone's name servers".to_string())),
            };
        }

        let ns_data = ns_lookup.data.unwrap_or_else(|| SingleQueryResult {
            answers: Vec::new(),
            authorities: Vec::new(),
            additionals: Vec::new(),
            flags: DnsFlags::default(),
            rcode: rcode_string(ResponseCode::NoError),
            protocol: Protocol::Udp,
            resolver: String::new(),
            duration_ns: 0,
            dnssec: None,
        });

        let mut server_ips: Vec<IpAddr> = Vec::new();
        for answer in ns_data.answers.iter().filter(|a| a.rtype == "NS") {
            let glue: Vec<IpAddr> = ns_data
                .additionals
                .iter()
                .filter(|a| a.name == answer.data.trim_end_matches('.'))
                .filter_map(|a| a.data.parse().ok())
                .collect();
            if !glue.is_empty() {
                server_ips.extend(glue);
                continue;
            }
            server_ips.extend(
                self.resolve_server_ips(&client, &answer.data, &mut trace)
                    .await,
            );
        }
        server_ips.sort_unstable();
        server_ips.dedup();

        if server_ips.is_empty() {
            return AllLookupResult {
                data: None,
                trace,
                status: Status::NoRecord,
                error: Some("no addressable name servers for zone".to_string()),
            };
        }

        let port = self.config().destination_port;
        let fan_out = server_ips.into_iter().map(|ip| {
            let question = question.clone();
            async move {
                let server = SocketAddr::new(ip, port);
                if self.blacklist().contains(ip) {
                    return (
                        NameServerResult {
                            server: server.to_string(),
                            status: Status::Blacklisted,
                            result: None,
                            error: Some("destination is blacklisted".to_string()),
                        },
                        None,
                    );
                }

                let socket = match self.pool.fresh_socket().await {
                    Ok(socket) => socket,
                    Err(err) => {
                        return (
                            NameServerResult {
                                server: server.to_string(),
                                status: Status::Error,
                                result: None,
                                error: Some(err.to_string()),
                            },
                            None,
                        )
                    }
                };
                let fan_client =
                    WireClient::new(socket, self.pool.local_addr(), self.config().timeout);
                let qm = QuestionWithMetadata::new(question.clone(), self.config().retries);

                match self.retrying_send(&fan_client, server, &qm, false).await {
                    Ok((msg, protocol, duration)) => {
                        let result =
                            SingleQueryResult::from_message(&msg, protocol, server, duration);
                        let step = TraceStep {
                            result: result.clone(),
                            name_server: server.to_string(),
                            depth: 0,
                            layer: Layer::Authoritative,
                            timestamp_ns: crate::trace::unix_nanos(),
                        };
                        let status = Status::from_rcode(msg.response_code());
                        (
                            NameServerResult {
                                server: server.to_string(),
                                status,
                                result: Some(result),
                                error: None,
                            },
                            Some(step),
                        )
                    }
                    Err(err) => (
                        NameServerResult {
                            server: server.to_string(),
                            status: Status::from(&err),
                            result: None,
                            error: Some(err.to_string()),
                        },
                        None,
                    ),
                }
            }
        });

        let mut servers = Vec::new();
        for (result, step) in futures::future::join_all(fan_out).await {
            if let Some(step) = step {
                trace.push(step);
            }
            servers.push(result);
        }

        let status = if servers.iter().any(|s| s.status.is_success()) {
            Status::NoError
        } else {
            Status::Error
        };

        AllLookupResult {
            data: Some(AllNameServersResult { servers }),
            trace,
            status,
            error: None,
        }
    }

    /// Address lookup for one name-server name.
    async fn resolve_server_ips(
        &self,
        client: &WireClient,
        name: &str,
        trace: &mut Trace,
    ) -> Vec<IpAddr> {
        let mut ips = Vec::new();
        let family = self.config().ip_family;
        let mut types = Vec::new();
        if family.allows_v4() {
            types.push(RecordType::A);
        }
        if family.allows_v6() {
            types.push(RecordType::AAAA);
        }
        for rtype in types {
            let Ok(question) = Question::new(name, rtype) else {
                continue;
            };
            let lookup = self.lookup_with_client(client, &question, None).await;
            trace.extend(lookup.trace);
            if let Some(data) = lookup.data {
                ips.extend(
                    data.answers
                        .iter()
                        .filter(|a| a.rtype == "A" || a.rtype == "AAAA")
                        .filter_map(|a| a.data.parse::<IpAddr>().ok()),
                );
            }
        }
        ips
    }
}

/// Status of a response whose sections we hold.
fn classify_sections(sections: &CachedResponse) -> Status {
    match sections.rcode {
        ResponseCode::NXDomain => Status::NxDomain,
        ResponseCode::NoError if sections.answers.is_empty() => Status::NoAnswer,
        ResponseCode::NoError => Status::NoError,
        other => Status::from_rcode(other),
    }
}

/// Rebuilds a result from a cache entry. Duration is zero and the resolver
/// is the server that originally answered.
fn result_from_cached(cached: &CachedResponse) -> SingleQueryResult {
    SingleQueryResult {
        answers: cached.answers.iter().filter_map(Answer::from_record).collect(),
        authorities: cached
            .authorities
            .iter()
            .filter_map(Answer::from_record)
            .collect(),
        additionals: cached
            .additionals
            .iter()
            .filter_map(Answer::from_record)
            .collect(),
        flags: DnsFlags {
            authoritative: cached.authoritative,
            ..DnsFlags::default()
        },
        rcode: rcode_string(cached.rcode),
        protocol: if cached.via_tcp {
            Protocol::Tcp
        } else {
            Protocol::Udp
        },
        resolver: cached.resolver.clone(),
        duration_ns: 0,
        dnssec: cached.dnssec.clone(),
    }
}

/// Types whose answers may legitimately be an alias we should not chase.
fn chaseable(qtype: RecordType) -> bool {
    !matches!(
        qtype,
        RecordType::CNAME | RecordType::ANY | RecordType::Unknown(DNAME_TYPE)
    )
}

/// Finds the alias to follow: a CNAME owned by the query name, or a DNAME
/// covering it, when no record of the requested type is present.
fn chase_target(sections: &CachedResponse, question: &Question) -> Option<Name> {
    if sections
        .answers
        .iter()
        .any(|r| r.record_type() == question.qtype)
    {
        return None;
    }

    for record in &sections.answers {
        if record.record_type() != RecordType::CNAME {
            continue;
        }
        if record.name().to_lowercase() != question.name {
            continue;
        }
        if let RData::CNAME(cname) = record.data() {
            let mut target = cname.0.to_lowercase();
            target.set_fqdn(true);
            return Some(target);
        }
    }

    for record in &sections.answers {
        if record.record_type() != RecordType::Unknown(DNAME_TYPE) {
            continue;
        }
        let RData::Unknown { rdata, .. } = record.data() else {
            continue;
        };
        let Some(target) = parse_uncompressed_name(rdata.anything()) else {
            continue;
        };
        let owner = record.name().to_lowercase();
        if let Some(next) = apply_dname(&question.name, &owner, &target) {
            return Some(next);
        }
    }

    None
}

/// Substitutes the DNAME owner suffix of `qname` with `target`.
fn apply_dname(qname: &Name, owner: &Name, target: &Name) -> Option<Name> {
    if qname == owner || !owner.zone_of(qname) {
        return None;
    }
    let qname_str = qname.to_string();
    let owner_str = owner.to_string();
    let prefix = qname_str.strip_suffix(&owner_str)?;
    let mut next = Name::from_str_relaxed(format!("{prefix}{target}"))
        .ok()?
        .to_lowercase();
    next.set_fqdn(true);
    Some(next)
}

/// Sub-query path for the DNSSEC validator: each DNSKEY/DS fetch is itself
/// a validated lookup, and its trace folds back into the caller's.
struct ValidatingFetcher<'a> {
    resolver: &'a Resolver,
    client: &'a WireClient,
    base: &'a QuestionWithMetadata,
    name_server: Option<SocketAddr>,
    trace: Mutex<Trace>,
}

#[async_trait]
impl KeyFetcher for ValidatingFetcher<'_> {
    async fn fetch_validated(
        &self,
        zone: &Name,
        rtype: RecordType,
        depth: usize,
    ) -> Option<Vec<hickory_proto::rr::Record>> {
        let question = Question::from_name(zone.clone(), rtype);
        let qm = self.base.derive(question);

        let mut sub_trace = Trace::new();
        let outcome = self
            .resolver
            .resolve_question(self.client, qm, self.name_server, &mut sub_trace, true, depth)
            .await;
        self.trace.lock().extend(sub_trace);

        // Negative answers still count: an empty DS set from the parent is
        // how an unsigned delegation shows itself.
        if !outcome.status.is_success() {
            debug!(zone = %zone, rtype = %rtype, status = %outcome.status, "key sub-query failed");
            return None;
        }
        let sections = outcome.sections?;
        match &sections.dnssec {
            // Records are only usable when their own response validated;
            // an empty answer set carries no records to distrust.
            Some(result)
                if !sections.answers.is_empty() && result.status != DnssecStatus::Secure =>
            {
                None
            }
            // A cache hit validated earlier in this run arrives pre-verified.
            _ => Some(sections.answers),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::rr::rdata::{A, CNAME};
    use hickory_proto::rr::Record;
    use std::net::Ipv4Addr;
    use std::str::FromStr;

    fn sections(answers: Vec<Record>) -> CachedResponse {
        CachedResponse {
            answers,
            authorities: Vec::new(),
            additionals: Vec::new(),
            rcode: ResponseCode::NoError,
            authoritative: true,
            resolver: "192.0.2.53:53".to_string(),
            via_tcp: false,
            dnssec: None,
        }
    }

    #[test]
    fn test_chase_follows_cname_without_answer() {
        let question = Question::new("www.example.com", RecordType::A).unwrap();
        let s = sections(vec![Record::from_rdata(
            Name::from_str("www.example.com.").unwrap(),
            300,
            RData::CNAME(CNAME(Name::from_str("target.example.net.").unwrap())),
        )]);

        let target = chase_target(&s, &question).unwrap();
        assert_eq!(target.to_string(), "target.example.net.");
    }

    #[test]
    fn test_chase_stops_when_type_present() {
        let question = Question::new("www.example.com", RecordType::A).unwrap();
        let s = sections(vec![
            Record::from_rdata(
                Name::from_str("www.example.com.").unwrap(),
                300,
                RData::CNAME(CNAME(Name::from_str("target.example.net.").unwrap())),
            ),
            Record::from_rdata(
                Name::from_str("target.example.net.").unwrap(),
                300,
                RData::A(A(Ipv4Addr::new(192, 0, 2, 1))),
            ),
        ]);

        assert!(chase_target(&s, &question).is_none());
    }

    #[test]
    fn test_chase_ignores_foreign_cname() {
        let question = Question::new("www.example.com", RecordType::A).unwrap();
        let s = sections(vec![Record::from_rdata(
            Name::from_str("unrelated.example.com.").unwrap(),
            300,
            RData::CNAME(CNAME(Name::from_str("target.example.net.").unwrap())),
        )]);

        assert!(chase_target(&s, &question).is_none());
    }

    #[test]
    fn test_apply_dname_substitution() {
        let qname = Name::from_str("www.dept.example.com.").unwrap();
        let owner = Name::from_str("example.com.").unwrap();
        let target = Name::from_str("example.net.").unwrap();

        let next = apply_dname(&qname, &owner, &target).unwrap();
        assert_eq!(next.to_string(), "www.dept.example.net.");
    }

    #[test]
    fn test_apply_dname_requires_subdomain() {
        let qname = Name::from_str("www.other.org.").unwrap();
        let owner = Name::from_str("example.com.").unwrap();
        let target = Name::from_str("example.net.").unwrap();
        assert!(apply_dname(&qname, &owner, &target).is_none());

        // The owner itself is not redirected by a DNAME.
        assert!(apply_dname(&owner, &owner, &target).is_none());
    }

    #[test]
    fn test_classify_sections() {
        let mut s = sections(Vec::new());
        assert_eq!(classify_sections(&s), Status::NoAnswer);

        s.answers.push(Record::from_rdata(
            Name::from_str("example.com.").unwrap(),
            300,
            RData::A(A(Ipv4Addr::new(192, 0, 2, 1))),
        ));
        assert_eq!(classify_sections(&s), Status::NoError);

        s.rcode = ResponseCode::NXDomain;
        assert_eq!(classify_sections(&s), Status::NxDomain);
    }

    #[test]
    fn test_cname_is_not_chaseable_type() {
        assert!(!chaseable(RecordType::CNAME));
        assert!(!chaseable(RecordType::ANY));
        assert!(chaseable(RecordType::A));
        assert!(chaseable(RecordType::TXT));
    }
}
