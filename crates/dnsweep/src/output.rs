//! Output records and field filtering.
//!
//! One JSON object per input name. `name`, `type`, `status`, and `data` are
//! always present; `--result-verbosity` selects the rest, and
//! `--include-fields` unions in extras.

use std::collections::HashSet;

use anyhow::bail;
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};

use crate::modules::ModuleOutput;

/// Verbosity tiers of an output record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Short,
    Normal,
    Long,
    Trace,
}

impl Verbosity {
    pub fn parse(value: &str) -> anyhow::Result<Self> {
        match value {
            "short" => Ok(Self::Short),
            "normal" => Ok(Self::Normal),
            "long" => Ok(Self::Long),
            "trace" => Ok(Self::Trace),
            other => bail!("invalid result verbosity {other:?} (short, normal, long, trace)"),
        }
    }
}

/// Which optional top-level fields a record carries.
#[derive(Debug, Clone)]
pub struct OutputFilter {
    fields: HashSet<&'static str>,
    include_trace: bool,
}

impl OutputFilter {
    pub fn new(verbosity: Verbosity, include_fields: Option<&str>) -> anyhow::Result<Self> {
        let mut fields: HashSet<&'static str> = HashSet::new();
        let mut include_trace = false;

        if verbosity >= Verbosity::Normal {
            fields.insert("timestamp");
            fields.insert("duration");
        }
        if verbosity >= Verbosity::Long {
            fields.insert("class");
            fields.insert("resolver");
            fields.insert("flags");
        }
        if verbosity == Verbosity::Trace {
            include_trace = true;
        }

        if let Some(extra) = include_fields {
            for field in extra.split(',').map(str::trim).filter(|f| !f.is_empty()) {
                match field {
                    "class" => fields.insert("class"),
                    "protocol" => fields.insert("protocol"),
                    "ttl" => true, // TTLs already ride inside the answers
                    "resolver" => fields.insert("resolver"),
                    "flags" => fields.insert("flags"),
                    other => bail!("unknown include field {other:?}"),
                };
            }
        }

        Ok(Self {
            fields,
            include_trace,
        })
    }

    fn wants(&self, field: &str) -> bool {
        self.fields.contains(field)
    }
}

impl PartialOrd for Verbosity {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.rank().cmp(&other.rank()))
    }
}

impl Ord for Verbosity {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl Verbosity {
    fn rank(self) -> u8 {
        match self {
            Self::Short => 0,
            Self::Normal => 1,
            Self::Long => 2,
            Self::Trace => 3,
        }
    }
}

/// Builds the JSON record for one resolved name.
pub fn build_record(
    name: &str,
    class: &str,
    rtype: &str,
    output: &ModuleOutput,
    duration_secs: f64,
    filter: &OutputFilter,
    nanoseconds: bool,
) -> Value {
    let mut record = json!({
        "name": name,
        "type": rtype,
        "status": output.status,
        "data": output.data,
    });

    let fields = record.as_object_mut().expect("record is an object");

    if let Some(error) = &output.error {
        fields.insert("error".to_string(), json!(error));
    }
    if filter.wants("class") {
        fields.insert("class".to_string(), json!(class));
    }
    if filter.wants("timestamp") {
        let format = if nanoseconds {
            SecondsFormat::Nanos
        } else {
            SecondsFormat::Secs
        };
        fields.insert(
            "timestamp".to_string(),
            json!(Utc::now().to_rfc3339_opts(format, true)),
        );
    }
    if filter.wants("duration") {
        fields.insert("duration".to_string(), json!(duration_secs));
    }
    if filter.wants("resolver") {
        if let Some(resolver) = &output.resolver {
            fields.insert("resolver".to_string(), json!(resolver));
        }
    }
    if filter.wants("flags") {
        if let Some(flags) = &output.flags {
            fields.insert("flags".to_string(), json!(flags));
        }
    }
    if filter.include_trace {
        fields.insert("trace".to_string(), json!(output.trace));
    }

    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use dnsweep_resolver::Status;

    fn sample_output() -> ModuleOutput {
        ModuleOutput {
            data: json!({"dmarc": "v=DMARC1; p=none"}),
            trace: Vec::new(),
            status: Status::NoError,
            error: None,
            resolver: Some("127.0.0.1:53".to_string()),
            flags: None,
        }
    }

    #[test]
    fn test_short_record_has_core_fields_only() {
        let filter = OutputFilter::new(Verbosity::Short, None).unwrap();
        let record = build_record(
            "example.com",
            "IN",
            "TXT",
            &sample_output(),
            0.01,
            &filter,
            false,
        );
        let object = record.as_object().unwrap();
        assert!(object.contains_key("name"));
        assert!(object.contains_key("status"));
        assert!(object.contains_key("data"));
        assert!(!object.contains_key("timestamp"));
        assert!(!object.contains_key("resolver"));
        assert!(!object.contains_key("trace"));
    }

    #[test]
    fn test_long_record_includes_resolver() {
        let filter = OutputFilter::new(Verbosity::Long, None).unwrap();
        let record = build_record(
            "example.com",
            "IN",
            "TXT",
            &sample_output(),
            0.01,
            &filter,
            false,
        );
        let object = record.as_object().unwrap();
        assert!(object.contains_key("timestamp"));
        assert!(object.contains_key("resolver"));
        assert!(object.contains_key("class"));
    }

    #[test]
    fn test_include_fields_extends_short() {
        let filter = OutputFilter::new(Verbosity::Short, Some("resolver,flags")).unwrap();
        let record = build_record(
            "example.com",
            "IN",
            "TXT",
            &sample_output(),
            0.01,
            &filter,
            false,
        );
        assert!(record.as_object().unwrap().contains_key("resolver"));
    }

    #[test]
    fn test_unknown_include_field_rejected() {
        assert!(OutputFilter::new(Verbosity::Short, Some("bogus")).is_err());
    }

    #[test]
    fn test_verbosity_parse() {
        assert_eq!(Verbosity::parse("short").unwrap(), Verbosity::Short);
        assert_eq!(Verbosity::parse("trace").unwrap(), Verbosity::Trace);
        assert!(Verbosity::parse("loud").is_err());
    }
}
