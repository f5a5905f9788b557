//! NS lookup with address resolution.
//!
//! Resolves the NS set of a name, then fills in each server's addresses:
//! glue from the additional section where the server provided it, targeted
//! A/AAAA lookups otherwise.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use serde::Serialize;

use dnsweep_resolver::{LookupClient, Question, Resolver, Status};
use hickory_proto::rr::RecordType;

use super::ModuleOutput;

#[derive(Debug, Clone, Serialize)]
struct NsRecord {
    name: String,
    #[serde(rename = "type")]
    rtype: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    ipv4_addresses: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    ipv6_addresses: Vec<String>,
    ttl: u32,
}

#[derive(Debug, Clone, Serialize)]
struct NsResult {
    servers: Vec<NsRecord>,
}

pub(super) async fn run(
    lookup: &dyn LookupClient,
    resolver: &Resolver,
    worker: usize,
    name: &str,
    name_server: Option<SocketAddr>,
) -> ModuleOutput {
    let question = match Question::new(name, RecordType::NS) {
        Ok(question) => question,
        Err(err) => return ModuleOutput::failed(Status::Error, err.to_string()),
    };

    let family = resolver.config().ip_family;
    let lookup_v4 = family.allows_v4();
    let lookup_v6 = family.allows_v6();

    let mut result = lookup.lookup(resolver, worker, &question, name_server).await;
    if !result.status.is_success() {
        return ModuleOutput::from_lookup(result, serde_json::Value::Null);
    }

    let Some(data) = result.data.clone() else {
        return ModuleOutput::from_lookup(result, serde_json::Value::Null);
    };

    // Addresses the server already volunteered as glue.
    let mut glue_v4: HashMap<String, Vec<String>> = HashMap::new();
    let mut glue_v6: HashMap<String, Vec<String>> = HashMap::new();
    for additional in &data.additionals {
        if additional.data.parse::<IpAddr>().is_err() {
            continue;
        }
        match additional.rtype.as_str() {
            "A" => glue_v4
                .entry(additional.name.clone())
                .or_default()
                .push(additional.data.clone()),
            "AAAA" => glue_v6
                .entry(additional.name.clone())
                .or_default()
                .push(additional.data.clone()),
            _ => {}
        }
    }

    let mut servers = Vec::new();
    for answer in data.answers.iter().filter(|a| a.rtype == "NS") {
        let server_name = answer.data.trim_end_matches('.').to_string();
        let mut record = NsRecord {
            name: server_name.clone(),
            rtype: answer.rtype.clone(),
            ipv4_addresses: glue_v4.get(&server_name).cloned().unwrap_or_default(),
            ipv6_addresses: glue_v6.get(&server_name).cloned().unwrap_or_default(),
            ttl: answer.ttl,
        };

        if lookup_v4 && record.ipv4_addresses.is_empty() {
            record.ipv4_addresses = resolve_addresses(
                lookup,
                resolver,
                worker,
                &server_name,
                RecordType::A,
                name_server,
                &mut result.trace,
            )
            .await;
        }
        if lookup_v6 && record.ipv6_addresses.is_empty() {
            record.ipv6_addresses = resolve_addresses(
                lookup,
                resolver,
                worker,
                &server_name,
                RecordType::AAAA,
                name_server,
                &mut result.trace,
            )
            .await;
        }

        servers.push(record);
    }

    let data = serde_json::to_value(NsResult { servers }).unwrap_or(serde_json::Value::Null);
    ModuleOutput::from_lookup(result, data)
}

async fn resolve_addresses(
    lookup: &dyn LookupClient,
    resolver: &Resolver,
    worker: usize,
    name: &str,
    rtype: RecordType,
    name_server: Option<SocketAddr>,
    trace: &mut dnsweep_resolver::Trace,
) -> Vec<String> {
    let Ok(question) = Question::new(name, rtype) else {
        return Vec::new();
    };
    let result = lookup.lookup(resolver, worker, &question, name_server).await;
    trace.extend(result.trace);

    let wanted = if rtype == RecordType::A { "A" } else { "AAAA" };
    result
        .data
        .map(|data| {
            data.answers
                .iter()
                .filter(|answer| answer.rtype == wanted)
                .filter(|answer| answer.data.parse::<IpAddr>().is_ok())
                .map(|answer| answer.data.clone())
                .collect()
        })
        .unwrap_or_default()
}
