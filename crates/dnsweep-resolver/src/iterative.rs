//! Iterative resolution from the root zone.
//!
//! The engine starts at a random root server and follows referrals down the
//! delegation hierarchy, picking next-hops from NS records and their glue,
//! until an authoritative server answers. Every hop appends a layer-tagged
//! trace step. Depth, a cumulative deadline, and a visited set bound the
//! walk; blacklisted destinations are skipped in favor of other candidates.

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::time::Instant;

use futures::future::{BoxFuture, FutureExt};
use hickory_proto::op::{Message, ResponseCode};
use hickory_proto::rr::{Name, RData, Record, RecordType};
use tracing::{debug, trace as trace_log};

use crate::answer::{Protocol, SingleQueryResult};
use crate::client::WireClient;
use crate::question::{Question, QuestionWithMetadata};
use crate::roots;
use crate::status::Status;
use crate::trace::{Layer, Trace, TraceStep};
use crate::{IpFamily, Resolver, ResolverError};

/// Bounds shared by every hop of one iteration.
pub(crate) struct IterationState {
    pub deadline: Instant,
    visited: HashSet<(Name, RecordType, SocketAddr)>,
}

impl IterationState {
    fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Records a visit; returns false on re-entry.
    fn visit(&mut self, name: &Name, rtype: RecordType, server: SocketAddr) -> bool {
        self.visited.insert((name.clone(), rtype, server))
    }
}

/// What one resolution path produced: the raw sections (kept for DNSSEC
/// validation, CNAME inspection, and caching), the decoded form of the
/// final reply, and the status.
pub(crate) struct WireOutcome {
    pub sections: Option<dnsweep_cache::CachedResponse>,
    pub result: Option<SingleQueryResult>,
    pub server: Option<SocketAddr>,
    pub status: Status,
    pub error: Option<String>,
}

impl WireOutcome {
    pub(crate) fn failed(status: Status, error: impl Into<String>) -> Self {
        Self {
            sections: None,
            result: None,
            server: None,
            status,
            error: Some(error.into()),
        }
    }
}

impl Resolver {
    /// Runs a full iteration for `qm`, appending to `trace`.
    pub(crate) async fn iterative_lookup(
        &self,
        client: &WireClient,
        qm: QuestionWithMetadata,
        trace: &mut Trace,
    ) -> WireOutcome {
        let mut state = IterationState {
            deadline: Instant::now() + self.config().timeout,
            visited: HashSet::new(),
        };
        let candidates = self.root_candidates();
        self.iterate(client, qm, candidates, Name::root(), 0, &mut state, trace)
            .await
    }

    /// Where an iteration starts: the configured seed servers when given,
    /// the compiled-in roots otherwise.
    fn root_candidates(&self) -> Vec<SocketAddr> {
        if !self.name_servers().is_empty() {
            return self.name_servers().to_vec();
        }
        roots::root_server_addrs(self.config().ip_family == IpFamily::V6)
    }

    /// One descent through the hierarchy. Referrals advance the loop; only
    /// glue resolution recurses (hence the boxed future).
    fn iterate<'a>(
        &'a self,
        client: &'a WireClient,
        qm: QuestionWithMetadata,
        mut candidates: Vec<SocketAddr>,
        mut zone: Name,
        mut depth: usize,
        state: &'a mut IterationState,
        trace: &'a mut Trace,
    ) -> BoxFuture<'a, WireOutcome> {
        async move {
            let mut last_error: Option<ResolverError> = None;

            loop {
                if depth > self.config().max_depth {
                    return WireOutcome::failed(
                        Status::MaxDepthReached,
                        "maximum iteration depth reached",
                    );
                }

                if state.expired() {
                    return WireOutcome::failed(
                        Status::IterationTimeout,
                        "iteration deadline exceeded",
                    );
                }

                let Some(server) = pick_random(&mut candidates) else {
                    let status = last_error
                        .as_ref()
                        .map(Status::from)
                        .unwrap_or(Status::Error);
                    let message = last_error
                        .map(|err| err.to_string())
                        .unwrap_or_else(|| "no candidate servers remain".to_string());
                    return WireOutcome::failed(status, message);
                };

                if self.blacklist().contains(server.ip()) {
                    debug!(server = %server, "skipping blacklisted destination");
                    last_error = Some(ResolverError::Blacklisted(server.ip()));
                    continue;
                }

                if !state.visit(&qm.question.name, qm.question.qtype, server) {
                    return WireOutcome::failed(
                        Status::LoopDetected,
                        format!("already queried {server} for this question"),
                    );
                }

                let Some(remaining) = state.deadline.checked_duration_since(Instant::now())
                else {
                    return WireOutcome::failed(
                        Status::IterationTimeout,
                        "iteration deadline exceeded",
                    );
                };
                let step_client =
                    client.with_timeout(self.config().iteration_step_timeout.min(remaining));

                let (msg, protocol, duration) =
                    match self.retrying_send(&step_client, server, &qm, false).await {
                        Ok(reply) => reply,
                        Err(err) => {
                            debug!(server = %server, error = %err, "iteration step failed");
                            last_error = Some(err);
                            continue;
                        }
                    };

                let result = SingleQueryResult::from_message(&msg, protocol, server, duration);
                trace.push(TraceStep {
                    result: result.clone(),
                    name_server: server.to_string(),
                    depth,
                    layer: Layer::for_zone(&zone),
                    timestamp_ns: crate::trace::unix_nanos(),
                });

                match msg.response_code() {
                    ResponseCode::NXDomain => {
                        if msg.authoritative() {
                            return answered(msg, protocol, result, server, Status::NxDomain);
                        }
                        trace_log!(server = %server, "non-authoritative NXDOMAIN, trying next");
                        last_error = Some(ResolverError::Protocol(
                            "non-authoritative NXDOMAIN".to_string(),
                        ));
                        continue;
                    }
                    ResponseCode::ServFail | ResponseCode::Refused => {
                        trace_log!(server = %server, rcode = %msg.response_code(), "trying next candidate");
                        last_error = Some(ResolverError::Protocol(format!(
                            "{} from {server}",
                            msg.response_code()
                        )));
                        continue;
                    }
                    ResponseCode::NoError => {}
                    other => {
                        last_error =
                            Some(ResolverError::Protocol(format!("unexpected rcode {other}")));
                        continue;
                    }
                }

                if !msg.answers().is_empty() {
                    return answered(msg, protocol, result, server, Status::NoError);
                }

                if let Some((next_zone, ns_names)) =
                    referral_of(&msg, &qm.question.name, &zone)
                {
                    trace_log!(
                        zone = %next_zone,
                        servers = ns_names.len(),
                        "following referral"
                    );
                    let next = self
                        .referral_candidates(client, &qm, &msg, &ns_names, depth, state, trace)
                        .await;
                    if next.is_empty() {
                        last_error = Some(ResolverError::Protocol(
                            "no usable name servers in referral".to_string(),
                        ));
                        continue;
                    }
                    candidates = next;
                    zone = next_zone;
                    depth += 1;
                    last_error = None;
                    continue;
                }

                // Empty answer with no delegation to follow.
                return answered(msg, protocol, result, server, Status::NoAnswer);
            }
        }
        .boxed()
    }

    /// Turns a referral into next-hop addresses: glue from the additional
    /// section where present, otherwise a recursive sub-iteration for the
    /// NS names until one resolves.
    #[allow(clippy::too_many_arguments)]
    async fn referral_candidates(
        &self,
        client: &WireClient,
        qm: &QuestionWithMetadata,
        msg: &Message,
        ns_names: &[Name],
        depth: usize,
        state: &mut IterationState,
        trace: &mut Trace,
    ) -> Vec<SocketAddr> {
        let prefer_v6 = self.config().prefer_ipv6_iteration;
        let family = self.config().ip_family;
        let port = self.config().destination_port;
        let mut addrs: Vec<SocketAddr> = Vec::new();
        let mut glueless: Vec<Name> = Vec::new();

        for ns in ns_names {
            let ips = glue_for(msg.additionals(), ns, prefer_v6, family);
            if ips.is_empty() {
                glueless.push(ns.clone());
            } else {
                addrs.extend(ips.into_iter().map(|ip| SocketAddr::new(ip, port)));
            }
        }

        if addrs.is_empty() {
            let rtype = if family == IpFamily::V6 || (prefer_v6 && family.allows_v6()) {
                RecordType::AAAA
            } else {
                RecordType::A
            };
            for ns in glueless {
                trace_log!(ns = %ns, "resolving referral name server without glue");
                let sub_q = qm.derive(Question::from_name(ns.clone(), rtype));
                let sub = self
                    .iterate(
                        client,
                        sub_q,
                        self.root_candidates(),
                        Name::root(),
                        depth + 1,
                        state,
                        trace,
                    )
                    .await;
                if let Some(sub_sections) = sub.sections {
                    for record in &sub_sections.answers {
                        match record.data() {
                            RData::A(a) => addrs.push(SocketAddr::new(IpAddr::V4(a.0), port)),
                            RData::AAAA(aaaa) => {
                                addrs.push(SocketAddr::new(IpAddr::V6(aaaa.0), port))
                            }
                            _ => {}
                        }
                    }
                }
                if !addrs.is_empty() {
                    break;
                }
            }
        }

        addrs.sort_unstable();
        addrs.dedup();
        addrs
    }
}

fn answered(
    msg: Message,
    protocol: Protocol,
    result: SingleQueryResult,
    server: SocketAddr,
    status: Status,
) -> WireOutcome {
    WireOutcome {
        sections: Some(crate::lookup::sections_from_message(&msg, server, protocol)),
        result: Some(result),
        server: Some(server),
        status,
        error: None,
    }
}

fn pick_random(candidates: &mut Vec<SocketAddr>) -> Option<SocketAddr> {
    if candidates.is_empty() {
        return None;
    }
    let idx = rand::random::<u64>() as usize % candidates.len();
    Some(candidates.swap_remove(idx))
}

/// Recognizes a referral: no answers, and NS records in the authority
/// section delegating a zone that is a suffix of the query name and deeper
/// than the zone just queried (so each referral makes progress).
fn referral_of(msg: &Message, qname: &Name, current_zone: &Name) -> Option<(Name, Vec<Name>)> {
    if !msg.answers().is_empty() {
        return None;
    }

    let mut delegated: Option<Name> = None;
    let mut ns_names = Vec::new();

    for record in msg.name_servers() {
        let RData::NS(ns) = record.data() else {
            continue;
        };
        let owner = record.name().to_lowercase();
        if !owner.zone_of(qname) || owner.num_labels() <= current_zone.num_labels() {
            trace_log!(owner = %owner, "ignoring out-of-zone NS record");
            continue;
        }
        match &delegated {
            None => delegated = Some(owner),
            Some(zone) if *zone != owner => continue,
            Some(_) => {}
        }
        ns_names.push(ns.0.to_lowercase());
    }

    delegated.filter(|_| !ns_names.is_empty()).map(|zone| (zone, ns_names))
}

/// Glue addresses for one NS name, restricted to the allowed transport
/// family. When both families remain the operator preference picks one;
/// IPv4 wins by default.
fn glue_for(additionals: &[Record], ns: &Name, prefer_v6: bool, family: IpFamily) -> Vec<IpAddr> {
    let mut v4 = Vec::new();
    let mut v6 = Vec::new();

    for record in additionals {
        if record.name().to_lowercase() != *ns {
            continue;
        }
        match record.data() {
            RData::A(a) if family.allows_v4() => v4.push(IpAddr::V4(a.0)),
            RData::AAAA(aaaa) if family.allows_v6() => v6.push(IpAddr::V6(aaaa.0)),
            _ => {}
        }
    }

    match (v4.is_empty(), v6.is_empty(), prefer_v6) {
        (false, _, false) => v4,
        (_, false, true) => v6,
        (false, true, true) => v4,
        (true, false, false) => v6,
        _ => Vec::new(),
    }
}
