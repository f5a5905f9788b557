//! Lookup status codes.

use std::fmt;

use hickory_proto::op::ResponseCode;
use serde::Serialize;

/// Machine-readable outcome of a lookup. Exactly one status accompanies each
/// returned result; the free-text error message carries the detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Status {
    #[serde(rename = "NOERROR")]
    NoError,
    #[serde(rename = "NO_ANSWER")]
    NoAnswer,
    #[serde(rename = "NXDOMAIN")]
    NxDomain,
    #[serde(rename = "SERVFAIL")]
    ServFail,
    #[serde(rename = "REFUSED")]
    Refused,
    #[serde(rename = "TIMEOUT")]
    Timeout,
    #[serde(rename = "TEMPORARY")]
    TempFailure,
    #[serde(rename = "TRUNCATED")]
    Truncated,
    #[serde(rename = "ITERATIVE_TIMEOUT")]
    IterationTimeout,
    #[serde(rename = "MAX_DEPTH")]
    MaxDepthReached,
    #[serde(rename = "BLACKLIST")]
    Blacklisted,
    #[serde(rename = "LOOP_DETECTED")]
    LoopDetected,
    #[serde(rename = "NO_RECORD")]
    NoRecord,
    #[serde(rename = "ERROR")]
    Error,
}

impl Status {
    /// Classifies a server-sent response code.
    pub fn from_rcode(rcode: ResponseCode) -> Self {
        match rcode {
            ResponseCode::NoError => Self::NoError,
            ResponseCode::NXDomain => Self::NxDomain,
            ResponseCode::ServFail => Self::ServFail,
            ResponseCode::Refused => Self::Refused,
            _ => Self::Error,
        }
    }

    /// True for outcomes that carry usable data (including authoritative
    /// negatives, which are terminal successes for the lookup).
    pub fn is_success(self) -> bool {
        matches!(self, Self::NoError | Self::NoAnswer | Self::NxDomain)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NoError => "NOERROR",
            Self::NoAnswer => "NO_ANSWER",
            Self::NxDomain => "NXDOMAIN",
            Self::ServFail => "SERVFAIL",
            Self::Refused => "REFUSED",
            Self::Timeout => "TIMEOUT",
            Self::TempFailure => "TEMPORARY",
            Self::Truncated => "TRUNCATED",
            Self::IterationTimeout => "ITERATIVE_TIMEOUT",
            Self::MaxDepthReached => "MAX_DEPTH",
            Self::Blacklisted => "BLACKLIST",
            Self::LoopDetected => "LOOP_DETECTED",
            Self::NoRecord => "NO_RECORD",
            Self::Error => "ERROR",
        };
        f.write_str(name)
    }
}

impl From<&crate::ResolverError> for Status {
    fn from(err: &crate::ResolverError) -> Self {
        use crate::ResolverError;
        match err {
            ResolverError::Timeout => Self::Timeout,
            ResolverError::Truncated => Self::Truncated,
            ResolverError::Network(_) => Self::TempFailure,
            ResolverError::Blacklisted(_) => Self::Blacklisted,
            ResolverError::NoNameServers | ResolverError::Config(_) => Self::Error,
            ResolverError::Protocol(_) | ResolverError::Codec(_) => Self::Error,
        }
    }
}
