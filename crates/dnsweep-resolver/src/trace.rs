//! Traces: the ordered record of every wire exchange in one lookup.
//!
//! A trace is a plain value returned alongside the result so it survives
//! partial failures; it is appended to monotonically and never reordered.

use serde::Serialize;

use hickory_proto::rr::Name;

use crate::answer::SingleQueryResult;

/// Which layer of the hierarchy a queried server belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Layer {
    #[serde(rename = "root")]
    Root,
    #[serde(rename = "tld")]
    Tld,
    #[serde(rename = "authoritative")]
    Authoritative,
    #[serde(rename = "recursive")]
    Recursive,
}

impl Layer {
    /// Tags a server by the zone it was consulted for.
    pub fn for_zone(zone: &Name) -> Self {
        match zone.num_labels() {
            0 => Self::Root,
            1 => Self::Tld,
            _ => Self::Authoritative,
        }
    }
}

/// One wire exchange within a lookup.
#[derive(Debug, Clone, Serialize)]
pub struct TraceStep {
    pub result: SingleQueryResult,
    pub name_server: String,
    pub depth: usize,
    pub layer: Layer,
    /// Unix nanoseconds at which the step was recorded; steps within one
    /// lookup are strictly ordered by issue time.
    pub timestamp_ns: u64,
}

/// Current wall clock in Unix nanoseconds.
pub fn unix_nanos() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos() as u64)
        .unwrap_or(0)
}

/// The ordered exchanges of one public lookup call.
pub type Trace = Vec<TraceStep>;
