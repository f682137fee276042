//! The ledger which authorizes the use of long-term secrets.
//!
//! The ledger itself is an external collaborator: all we need from it is to
//! accept transactions, and to hand out proofs that some instance holds some value.
//! Checking a proof against the ledger's consensus is the job of the client;
//! this module only checks that a proof holds the kind of record we expect.
use std::{fmt, time::Duration};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use crate::{
    compat::CSCurve,
    config::Config,
    error::LtsError,
    records::{InstanceId, LedgerId, LtsInstanceInfo, Read, Record, Write},
    serde::{decode, encode, encode_named},
};

mod memory;

pub use memory::MemoryLedger;

/// The name of the argument holding a roster.
pub const ARG_LTS_INSTANCE_INFO: &str = "lts_instance_info";
/// The name of the argument holding a write.
pub const ARG_WRITE: &str = "write";
/// The name of the argument holding a read.
pub const ARG_READ: &str = "read";
/// The command moving a long-term secret to a new roster.
pub const CMD_RESHARE: &str = "reshare";

/// The contracts which store records on the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContractKind {
    LongTermSecret,
    Write,
    Read,
}

impl ContractKind {
    /// The identifier of this contract on the ledger.
    pub fn id(self) -> &'static str {
        match self {
            ContractKind::LongTermSecret => "longTermSecret",
            ContractKind::Write => "calypsoWrite",
            ContractKind::Read => "calypsoRead",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        [Self::LongTermSecret, Self::Write, Self::Read]
            .into_iter()
            .find(|k| k.id() == id)
    }
}

impl fmt::Display for ContractKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("no proof for instance {0}")]
    NotFound(InstanceId),
    #[error("transaction rejected: {0}")]
    Rejected(String),
    #[error("instance {id} still missing after {attempts} attempts")]
    Timeout { id: InstanceId, attempts: usize },
}

/// A named argument of an instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Argument {
    pub name: String,
    pub value: Vec<u8>,
}

impl Argument {
    pub fn new(name: &str, value: Vec<u8>) -> Self {
        Self {
            name: name.to_string(),
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    /// Create a new instance of a contract.
    Spawn {
        contract: ContractKind,
        args: Vec<Argument>,
    },
    /// Run a command on an existing instance.
    Invoke {
        contract: ContractKind,
        command: String,
        args: Vec<Argument>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    /// The instance this instruction acts on.
    pub instance_id: InstanceId,
    pub action: Action,
    pub signer_counter: Vec<u64>,
}

impl Instruction {
    /// The identifier of this instruction, which also names what it spawns.
    pub fn derive_id(&self) -> InstanceId {
        InstanceId(Sha256::digest(encode(self)).into())
    }

    /// Look up an argument by name.
    pub fn arg(&self, name: &str) -> Option<&[u8]> {
        let args = match &self.action {
            Action::Spawn { args, .. } | Action::Invoke { args, .. } => args,
        };
        args.iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_slice())
    }

    /// Spawn a long-term secret for a roster.
    pub fn spawn_lts<C: CSCurve>(
        on: InstanceId,
        info: &LtsInstanceInfo<C>,
        counter: u64,
    ) -> Self {
        Self::spawn(
            on,
            ContractKind::LongTermSecret,
            ARG_LTS_INSTANCE_INFO,
            encode_named(info),
            counter,
        )
    }

    /// Move an existing long-term secret to a new roster.
    pub fn reshare_lts<C: CSCurve>(
        lts: InstanceId,
        info: &LtsInstanceInfo<C>,
        counter: u64,
    ) -> Self {
        Self {
            instance_id: lts,
            action: Action::Invoke {
                contract: ContractKind::LongTermSecret,
                command: CMD_RESHARE.to_string(),
                args: vec![Argument::new(ARG_LTS_INSTANCE_INFO, encode_named(info))],
            },
            signer_counter: vec![counter],
        }
    }

    /// Store a write.
    pub fn spawn_write<C: CSCurve>(on: InstanceId, write: &Write<C>, counter: u64) -> Self {
        Self::spawn(on, ContractKind::Write, ARG_WRITE, encode_named(write), counter)
    }

    /// Store a read, on the write it names.
    pub fn spawn_read<C: CSCurve>(read: &Read<C>, counter: u64) -> Self {
        Self::spawn(read.write, ContractKind::Read, ARG_READ, encode_named(read), counter)
    }

    fn spawn(
        on: InstanceId,
        contract: ContractKind,
        arg: &str,
        value: Vec<u8>,
        counter: u64,
    ) -> Self {
        Self {
            instance_id: on,
            action: Action::Spawn {
                contract,
                args: vec![Argument::new(arg, value)],
            },
            signer_counter: vec![counter],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientTransaction {
    pub instructions: Vec<Instruction>,
}

impl From<Instruction> for ClientTransaction {
    fn from(instruction: Instruction) -> Self {
        Self {
            instructions: vec![instruction],
        }
    }
}

/// Evidence that an instance of the ledger holds some value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    pub ledger_id: LedgerId,
    pub instance_id: InstanceId,
    /// The identifier of the contract which stored the value.
    pub contract: String,
    pub value: Vec<u8>,
}

impl Proof {
    /// Decode the record held by this proof, which must be of the expected kind.
    pub fn record<C: CSCurve>(&self, expected: ContractKind) -> Result<Record<C>, LtsError> {
        self.check_kind(expected)?;
        Record::decode(expected, &self.value)
    }

    pub fn lts_instance_info<C: CSCurve>(&self) -> Result<LtsInstanceInfo<C>, LtsError> {
        self.decode_as(ContractKind::LongTermSecret)
    }

    pub fn write<C: CSCurve>(&self) -> Result<Write<C>, LtsError> {
        self.decode_as(ContractKind::Write)
    }

    pub fn read<C: CSCurve>(&self) -> Result<Read<C>, LtsError> {
        self.decode_as(ContractKind::Read)
    }

    fn check_kind(&self, expected: ContractKind) -> Result<(), LtsError> {
        if self.contract != expected.id() {
            return Err(LtsError::WrongRecordKind {
                expected,
                found: self.contract.clone(),
            });
        }
        Ok(())
    }

    fn decode_as<T: DeserializeOwned>(&self, expected: ContractKind) -> Result<T, LtsError> {
        self.check_kind(expected)?;
        decode(&self.value).map_err(|source| LtsError::Decode {
            what: expected.id(),
            source,
        })
    }
}

/// A client of the ledger.
pub trait LedgerClient {
    /// The ledger this client talks to.
    fn id(&self) -> LedgerId;

    /// Submit a transaction, returning the instance each instruction acted on.
    ///
    /// Spawned instances are named by the id of the instruction which spawned them.
    fn add_transaction(&self, tx: ClientTransaction) -> Result<Vec<InstanceId>, LedgerError>;

    /// Get a proof for the current value of an instance.
    fn get_proof(&self, id: &InstanceId) -> Result<Proof, LedgerError>;
}

/// Poll the ledger until a proof for an instance shows up.
///
/// Only missing proofs are retried; any other error is returned immediately.
pub async fn wait_proof<L: LedgerClient + ?Sized>(
    client: &L,
    id: &InstanceId,
    config: &Config,
) -> Result<Proof, LedgerError> {
    let interval = Duration::from_millis(config.proof_interval_ms);
    for attempt in 1..=config.proof_attempts {
        match client.get_proof(id) {
            Err(LedgerError::NotFound(_)) => {
                debug!(%id, attempt, "proof not available yet");
                smol::Timer::after(interval).await;
            }
            res => return res,
        }
    }
    Err(LedgerError::Timeout {
        id: *id,
        attempts: config.proof_attempts,
    })
}
