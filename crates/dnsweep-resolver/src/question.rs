//! Questions and their per-lookup metadata.

use std::sync::atomic::AtomicI32;
use std::sync::Arc;

use hickory_proto::rr::{DNSClass, Name, RecordType};

use crate::{ResolverError, Result};

/// A user-facing question: name, type, class.
///
/// The name is held in normalized form, fully qualified and lowercased;
/// [`Question::display_name`] strips the trailing dot for presentation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub name: Name,
    pub qtype: RecordType,
    pub qclass: DNSClass,
}

impl Question {
    /// Parses and normalizes `name` into an IN-class question.
    pub fn new(name: &str, qtype: RecordType) -> Result<Self> {
        Self::with_class(name, qtype, DNSClass::IN)
    }

    /// Parses and normalizes `name` with an explicit class.
    pub fn with_class(name: &str, qtype: RecordType, qclass: DNSClass) -> Result<Self> {
        let mut parsed = Name::from_str_relaxed(name)
            .map_err(|err| ResolverError::Config(format!("invalid name {name:?}: {err}")))?
            .to_lowercase();
        parsed.set_fqdn(true);
        Ok(Self {
            name: parsed,
            qtype,
            qclass,
        })
    }

    /// Builds a question from an already-normalized name.
    pub fn from_name(name: Name, qtype: RecordType) -> Self {
        let mut name = name.to_lowercase();
        name.set_fqdn(true);
        Self {
            name,
            qtype,
            qclass: DNSClass::IN,
        }
    }

    /// Presentation form without the trailing dot (the root stays `.`).
    pub fn display_name(&self) -> String {
        strip_trailing_dot(&self.name.to_string())
    }
}

/// Strips the single trailing dot of an FQDN, leaving the bare root alone.
pub fn strip_trailing_dot(name: &str) -> String {
    if name.len() > 1 {
        name.strip_suffix('.').unwrap_or(name).to_string()
    } else {
        name.to_string()
    }
}

/// A question plus the mutable retry budget shared across every wire attempt
/// this lookup makes, including iteration hops and DNSSEC sub-queries.
#[derive(Debug, Clone)]
pub struct QuestionWithMetadata {
    pub question: Question,
    pub retries_remaining: Arc<AtomicI32>,
}

impl QuestionWithMetadata {
    pub fn new(question: Question, retries: i32) -> Self {
        Self {
            question,
            retries_remaining: Arc::new(AtomicI32::new(retries)),
        }
    }

    /// A different question drawing on the same retry budget.
    pub fn derive(&self, question: Question) -> Self {
        Self {
            question,
            retries_remaining: self.retries_remaining.clone(),
        }
    }
}
