//! SPF policy extraction (RFC 7208).
//!
//! Returns the first TXT record whose version section is `v=spf1`; the
//! version token is case-insensitive per RFC 7208 §4.5.

use std::net::SocketAddr;
use std::sync::OnceLock;

use regex::Regex;

use dnsweep_resolver::{LookupClient, Question, Resolver, Status};
use hickory_proto::rr::RecordType;

use super::{single_field, txt_answers, ModuleOutput};

fn spf_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)^v=spf1(?:\s|$)").expect("static pattern"))
}

pub(super) async fn run(
    lookup: &dyn LookupClient,
    resolver: &Resolver,
    worker: usize,
    name: &str,
    name_server: Option<SocketAddr>,
) -> ModuleOutput {
    let question = match Question::new(name, RecordType::TXT) {
        Ok(question) => question,
        Err(err) => return ModuleOutput::failed(Status::Error, err.to_string()),
    };

    let result = lookup.lookup(resolver, worker, &question, name_server).await;
    if !result.status.is_success() {
        let data = single_field("spf", "");
        return ModuleOutput::from_lookup(result, data);
    }

    let record = txt_answers(&result)
        .into_iter()
        .find(|txt| spf_pattern().is_match(txt));

    match record {
        Some(txt) => {
            let data = single_field("spf", &txt);
            ModuleOutput::from_lookup(result, data)
        }
        None => {
            let mut output = ModuleOutput::from_lookup(result, single_field("spf", ""));
            output.status = Status::NoRecord;
            output
        }
    }
}
