use thiserror::Error;

use crate::ledger::{ContractKind, LedgerError};
use crate::protocol::{InitializationError, ProtocolError};
use crate::records::{Dkid, InstanceId, LedgerId};

/// The errors surfaced by nodes and clients of a long-term secret.
///
/// Anything that could lead to wrong key material is reported here,
/// rather than being degraded into a key which fails to decode.
#[derive(Debug, Error)]
pub enum LtsError {
    /// A node's own share did not match the public commitments.
    #[error("share verification failed: {0}")]
    ShareVerificationFailed(String),
    /// Too few valid contributors or responders.
    #[error("quorum unavailable: needed {needed}, have {available}")]
    QuorumUnavailable { needed: usize, available: usize },
    #[error("wrong record kind: expected {expected}, found {found}")]
    WrongRecordKind {
        expected: ContractKind,
        found: String,
    },
    #[error("could not decode {what}: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: rmp_serde::decode::Error,
    },
    #[error("read references write {found}, not {expected}")]
    ReadWriteMismatch {
        expected: InstanceId,
        found: InstanceId,
    },
    #[error("new roster shares no node with the current one")]
    DisjointRosterRejected,
    #[error("collective signature is invalid")]
    SignatureInvalid,
    #[error("ledger {0} is not authorized on this node")]
    UnauthorizedLedger(LedgerId),
    #[error("unknown instance {0}")]
    UnknownInstance(InstanceId),
    #[error("instance {0} already exists")]
    InstanceExists(InstanceId),
    /// The share of an instance changed while a reshare was running.
    #[error("instance {instance} is at epoch {found:?}, expected {expected:?}")]
    StaleEpoch {
        instance: InstanceId,
        expected: Option<u64>,
        found: Option<u64>,
    },
    #[error("node is not part of the roster")]
    NotInRoster,
    #[error("decryption statement {0} does not match the records")]
    StatementMismatch(Dkid),
    #[error("key of {len} bytes is longer than the maximum of {max}")]
    KeyTooLong { len: usize, max: usize },
    #[error("could not recover key: {0}")]
    Recovery(String),
    #[error(transparent)]
    Protocol(ProtocolError),
    #[error(transparent)]
    Initialization(#[from] InitializationError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),
}

impl From<ProtocolError> for LtsError {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::QuorumUnavailable { needed, available } => {
                Self::QuorumUnavailable { needed, available }
            }
            ProtocolError::ShareVerificationFailed(reason) => {
                Self::ShareVerificationFailed(reason)
            }
            other => Self::Protocol(other),
        }
    }
}
