//! Server software banner via the CHAOS-class `version.bind` TXT record.

use std::net::SocketAddr;

use dnsweep_resolver::{LookupClient, Question, Resolver, Status};
use hickory_proto::rr::{DNSClass, RecordType};

use super::{single_field, txt_answers, ModuleOutput};

pub(super) async fn run(
    lookup: &dyn LookupClient,
    resolver: &Resolver,
    worker: usize,
    name_server: Option<SocketAddr>,
) -> ModuleOutput {
    // The question is fixed; the input line selects the server to probe.
    let question = match Question::with_class("version.bind", RecordType::TXT, DNSClass::CH) {
        Ok(question) => question,
        Err(err) => return ModuleOutput::failed(Status::Error, err.to_string()),
    };

    let result = lookup.lookup(resolver, worker, &question, name_server).await;
    if !result.status.is_success() {
        return ModuleOutput::from_lookup(result, single_field("version", ""));
    }

    match txt_answers(&result).into_iter().next() {
        Some(version) => {
            let data = single_field("version", &version);
            ModuleOutput::from_lookup(result, data)
        }
        None => {
            let mut output = ModuleOutput::from_lookup(result, single_field("version", ""));
            output.status = Status::NoRecord;
            output
        }
    }
}
