//! Classified failures returned by checker construction and by `check`.
//!
//! Every probe failure maps to exactly one [`CheckError`] variant. Nothing is
//! retried internally; callers decide whether to probe again.

use std::fmt;
use std::io;
use thiserror::Error;

use crate::checker::Cancellation;

/// The target could not be turned into an IP address
#[derive(Debug, Error)]
pub enum AddressError {
    #[error("invalid IP address: {0}")]
    Invalid(String),
    #[error("failed to resolve {host}: {source}")]
    Unresolvable {
        host: String,
        #[source]
        source: io::Error,
    },
    #[error("no usable addresses found for {0}")]
    NoAddresses(String),
}

impl AddressError {
    /// The address literal that failed
    pub fn literal(&self) -> &str {
        match self {
            AddressError::Invalid(literal) | AddressError::NoAddresses(literal) => literal,
            AddressError::Unresolvable { host, .. } => host,
        }
    }
}

/// A configuration override was malformed or out of range
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {key} value: {reason}")]
pub struct ConfigError {
    pub key: String,
    pub reason: String,
}

impl ConfigError {
    pub fn new(key: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self {
            key: key.into(),
            reason: reason.to_string(),
        }
    }
}

/// Why a received datagram was not accepted as the expected echo reply
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("reply too short, not a valid ICMP echo reply ({len} bytes)")]
    ShortReply { len: usize },
    #[error("unexpected ICMP message: type {kind} code {code}")]
    UnexpectedType { kind: u8, code: u8 },
    #[error(
        "ICMP reply does not match request: expected id={expected_id} seq={expected_seq}, got id={id} seq={seq}"
    )]
    IdentityMismatch {
        expected_id: u16,
        expected_seq: u16,
        id: u16,
        seq: u16,
    },
    #[error("ICMP reply checksum does not verify (residual {0:#06x})")]
    ChecksumMismatch(u16),
}

impl ValidationError {
    /// True when the datagram is most likely somebody else's ICMP traffic
    /// rather than a damaged reply to our request.
    pub fn is_foreign(&self) -> bool {
        matches!(
            self,
            ValidationError::UnexpectedType { .. } | ValidationError::IdentityMismatch { .. }
        )
    }
}

/// Step of a check that was abandoned on cancellation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Resolving,
    Sending,
    Awaiting,
    Validating,
    Connecting,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Resolving => "resolving",
            Stage::Sending => "sending ICMP request to",
            Stage::Awaiting => "waiting for ICMP reply from",
            Stage::Validating => "validating ICMP reply from",
            Stage::Connecting => "connecting to",
        })
    }
}

#[derive(Debug, Error)]
pub enum CheckError {
    #[error(transparent)]
    Address(#[from] AddressError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to listen for ICMP packets: {0}")]
    Listen(#[source] io::Error),
    #[error("failed to send ICMP request to {target}: {source}")]
    Send {
        target: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to read ICMP reply from {target}: {source}")]
    Receive {
        target: String,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("context cancelled while {stage} {target}: {cause}")]
    Cancelled {
        stage: Stage,
        target: String,
        cause: Cancellation,
    },
    #[error("failed to connect to {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: io::Error,
    },
    #[error("no scheme found in address: {0}")]
    MissingScheme(String),
    #[error("unsupported check type: {0}")]
    UnknownScheme(String),
}

impl CheckError {
    /// Short machine-readable classification
    pub fn kind(&self) -> &'static str {
        match self {
            CheckError::Address(_) => "address",
            CheckError::Config(_) => "config",
            CheckError::Listen(_) => "listen",
            CheckError::Send { .. } => "send",
            CheckError::Receive { .. } => "receive",
            CheckError::Validation(_) => "validation",
            CheckError::Cancelled { .. } => "cancelled",
            CheckError::Connect { .. } => "connect",
            CheckError::MissingScheme(_) | CheckError::UnknownScheme(_) => "scheme",
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CheckError::Cancelled { .. })
    }
}
