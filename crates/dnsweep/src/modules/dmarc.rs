//! DMARC policy extraction (RFC 7489).
//!
//! Queries TXT at `_dmarc.<name>` and returns the first record that opens
//! with a well-formed `v=DMARC1;` tag. The tag name must start the string,
//! the version token is matched case-sensitively, and the terminating
//! semicolon is required; only the tag name itself and the interior
//! whitespace are lax, mirroring what mail receivers accept.

use std::net::SocketAddr;
use std::sync::OnceLock;

use regex::Regex;

use dnsweep_resolver::{LookupClient, Question, Resolver, Status};
use hickory_proto::rr::RecordType;

use super::{single_field, txt_answers, ModuleOutput};

fn dmarc_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[vV][\t ]*=[\t ]*DMARC1[\t ]*;[\t ]*").expect("static pattern")
    })
}

pub(super) async fn run(
    lookup: &dyn LookupClient,
    resolver: &Resolver,
    worker: usize,
    name: &str,
    name_server: Option<SocketAddr>,
) -> ModuleOutput {
    let target = if name.starts_with("_dmarc.") {
        name.to_string()
    } else {
        format!("_dmarc.{name}")
    };

    let question = match Question::new(&target, RecordType::TXT) {
        Ok(question) => question,
        Err(err) => return ModuleOutput::failed(Status::Error, err.to_string()),
    };

    let result = lookup.lookup(resolver, worker, &question, name_server).await;
    if !result.status.is_success() {
        let data = single_field("dmarc", "");
        return ModuleOutput::from_lookup(result, data);
    }

    let record = txt_answers(&result)
        .into_iter()
        .find(|txt| dmarc_pattern().is_match(txt));

    match record {
        Some(txt) => {
            let data = single_field("dmarc", &txt);
            ModuleOutput::from_lookup(result, data)
        }
        None => {
            let mut output = ModuleOutput::from_lookup(result, single_field("dmarc", ""));
            output.status = Status::NoRecord;
            output
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::test_support::{test_resolver, MockLookup};
    use dnsweep_resolver::Status;
    use hickory_proto::rr::DNSClass;

    const TEST_NAME: &str = "_dmarc.zdns-testing.com";

    async fn run_with_records(records: &[&str]) -> (ModuleOutput, MockLookup) {
        let resolver = test_resolver().await;
        let mut mock = MockLookup::new();
        mock.insert_txt(TEST_NAME, records);
        let server = Some("127.0.0.1:53".parse().unwrap());
        let output = run(&mock, &resolver, 0, TEST_NAME, server).await;
        (output, mock)
    }

    fn assert_query_shape(mock: &MockLookup) {
        let queries = mock.queries.lock();
        let (question, server) = &queries[0];
        assert_eq!(question.qclass, DNSClass::IN);
        assert_eq!(question.qtype, RecordType::TXT);
        assert_eq!(question.display_name(), TEST_NAME);
        assert_eq!(*server, Some("127.0.0.1:53".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_valid_record_extracted() {
        let (output, mock) = run_with_records(&[
            "some TXT record",
            "v=DMARC1; p=none; rua=mailto:postmaster@censys.io",
        ])
        .await;

        assert_query_shape(&mock);
        assert_eq!(output.status, Status::NoError);
        assert_eq!(
            output.data["dmarc"],
            "v=DMARC1; p=none; rua=mailto:postmaster@censys.io"
        );
    }

    #[tokio::test]
    async fn test_capital_v_tag_accepted() {
        let (output, mock) = run_with_records(&[
            "some TXT record",
            "V=DMARC1; p=none; rua=mailto:postmaster@censys.io",
        ])
        .await;

        assert_query_shape(&mock);
        assert_eq!(output.status, Status::NoError);
        assert_eq!(
            output.data["dmarc"],
            "V=DMARC1; p=none; rua=mailto:postmaster@censys.io"
        );
    }

    #[tokio::test]
    async fn test_interior_whitespace_accepted() {
        let raw = "v\t\t\t=\t\t  DMARC1\t\t; p=none; rua=mailto:postmaster@censys.io";
        let (output, mock) = run_with_records(&["some TXT record", raw]).await;

        assert_query_shape(&mock);
        assert_eq!(output.status, Status::NoError);
        assert_eq!(output.data["dmarc"], raw);
    }

    #[tokio::test]
    async fn test_leading_whitespace_rejected() {
        let (output, mock) = run_with_records(&[
            "some TXT record",
            "\t\t   v   =DMARC1; p=none; rua=mailto:postmaster@censys.io",
        ])
        .await;

        assert_query_shape(&mock);
        assert_eq!(output.status, Status::NoRecord);
        assert_eq!(output.data["dmarc"], "");
    }

    #[tokio::test]
    async fn test_wrong_case_version_rejected() {
        let (output, mock) = run_with_records(&[
            "some TXT record",
            "v=DMARc1; p=none; rua=mailto:postmaster@censys.io",
        ])
        .await;

        assert_query_shape(&mock);
        assert_eq!(output.status, Status::NoRecord);
        assert_eq!(output.data["dmarc"], "");
    }

    #[tokio::test]
    async fn test_missing_semicolon_rejected() {
        let (output, mock) = run_with_records(&[
            "some TXT record",
            "v=DMARC1. p=none; rua=mailto:postmaster@censys.io",
        ])
        .await;

        assert_query_shape(&mock);
        assert_eq!(output.status, Status::NoRecord);
        assert_eq!(output.data["dmarc"], "");
    }

    #[tokio::test]
    async fn test_underscore_prefix_added_when_missing() {
        let resolver = test_resolver().await;
        let mock = MockLookup::new();
        let _ = run(&mock, &resolver, 0, "zdns-testing.com", None).await;

        let queries = mock.queries.lock();
        assert_eq!(queries[0].0.display_name(), "_dmarc.zdns-testing.com");
    }

    #[test]
    fn test_pattern_accepts_plain_record() {
        assert!(dmarc_pattern().is_match("v=DMARC1; p=none; rua=mailto:x@y"));
    }

    #[test]
    fn test_pattern_accepts_capital_v() {
        assert!(dmarc_pattern().is_match("V=DMARC1; p=none"));
    }

    #[test]
    fn test_pattern_accepts_interior_whitespace() {
        assert!(dmarc_pattern().is_match("v\t\t\t=\t\t  DMARC1\t\t; p=none"));
    }

    #[test]
    fn test_pattern_rejects_leading_whitespace() {
        assert!(!dmarc_pattern().is_match("\t\t   v   =DMARC1; p=none"));
    }

    #[test]
    fn test_pattern_rejects_wrong_case_version() {
        assert!(!dmarc_pattern().is_match("v=DMARc1; p=none"));
    }

    #[test]
    fn test_pattern_requires_semicolon() {
        assert!(!dmarc_pattern().is_match("v=DMARC1. p=none"));
    }
}
