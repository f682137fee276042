use std::{collections::HashMap, marker::PhantomData};

use parking_lot::RwLock;
use rand_core::OsRng;
use tracing::info;

use super::{
    Action, ClientTransaction, ContractKind, Instruction, LedgerClient, LedgerError, Proof,
    ARG_LTS_INSTANCE_INFO, ARG_READ, ARG_WRITE, CMD_RESHARE,
};
use crate::{
    compat::CSCurve,
    records::{InstanceId, LedgerId, LtsInstanceInfo, Read, Write},
    serde::decode,
};

struct Instance {
    kind: ContractKind,
    value: Vec<u8>,
    /// How many more lookups miss this instance.
    hidden_for: usize,
}

/// A ledger kept in memory, enforcing the rules of the contracts.
///
/// Transactions apply atomically: either every instruction goes through, or none do.
pub struct MemoryLedger<C: CSCurve> {
    id: LedgerId,
    /// The number of lookups before a new value becomes visible.
    lag: usize,
    instances: RwLock<HashMap<InstanceId, Instance>>,
    _curve: PhantomData<C>,
}

impl<C: CSCurve> Default for MemoryLedger<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: CSCurve> MemoryLedger<C> {
    pub fn new() -> Self {
        Self::with_lag(0)
    }

    /// Create a ledger where new values only show up after `lag` lookups.
    pub fn with_lag(lag: usize) -> Self {
        Self {
            id: LedgerId::random(&mut OsRng),
            lag,
            instances: RwLock::new(HashMap::new()),
            _curve: PhantomData,
        }
    }

    fn arg<'a>(instruction: &'a Instruction, name: &str) -> Result<&'a [u8], LedgerError> {
        instruction
            .arg(name)
            .ok_or_else(|| LedgerError::Rejected(format!("missing argument {name}")))
    }

    fn kind_of(
        instances: &HashMap<InstanceId, Instance>,
        pending: &[(InstanceId, ContractKind, Vec<u8>)],
        id: &InstanceId,
    ) -> Option<ContractKind> {
        pending
            .iter()
            .rev()
            .find(|(i, _, _)| i == id)
            .map(|(_, k, _)| *k)
            .or_else(|| instances.get(id).map(|i| i.kind))
    }

    /// Check an instruction, returning the instance it writes and the value to store.
    fn apply(
        &self,
        instances: &HashMap<InstanceId, Instance>,
        pending: &[(InstanceId, ContractKind, Vec<u8>)],
        instruction: &Instruction,
    ) -> Result<(InstanceId, ContractKind, Vec<u8>), LedgerError> {
        let reject = |e: rmp_serde::decode::Error| LedgerError::Rejected(e.to_string());
        match &instruction.action {
            Action::Spawn { contract, .. } => {
                let id = instruction.derive_id();
                if Self::kind_of(instances, pending, &id).is_some() {
                    return Err(LedgerError::Rejected(format!("instance {id} exists")));
                }
                let value = match contract {
                    ContractKind::LongTermSecret => {
                        let value = Self::arg(instruction, ARG_LTS_INSTANCE_INFO)?;
                        let info: LtsInstanceInfo<C> = decode(value).map_err(reject)?;
                        if info.roster.is_empty() {
                            return Err(LedgerError::Rejected("empty roster".to_string()));
                        }
                        value
                    }
                    ContractKind::Write => {
                        let value = Self::arg(instruction, ARG_WRITE)?;
                        let write: Write<C> = decode(value).map_err(reject)?;
                        if Self::kind_of(instances, pending, &write.lts_instance_id)
                            != Some(ContractKind::LongTermSecret)
                        {
                            return Err(LedgerError::Rejected(format!(
                                "write names unknown secret {}",
                                write.lts_instance_id
                            )));
                        }
                        value
                    }
                    ContractKind::Read => {
                        let value = Self::arg(instruction, ARG_READ)?;
                        let read: Read<C> = decode(value).map_err(reject)?;
                        if read.write != instruction.instance_id
                            || Self::kind_of(instances, pending, &read.write)
                                != Some(ContractKind::Write)
                        {
                            return Err(LedgerError::Rejected(
                                "read must be spawned on the write it names".to_string(),
                            ));
                        }
                        value
                    }
                };
                Ok((id, *contract, value.to_vec()))
            }
            Action::Invoke {
                contract: ContractKind::LongTermSecret,
                command,
                ..
            } if command == CMD_RESHARE => {
                let id = instruction.instance_id;
                let current = pending
                    .iter()
                    .rev()
                    .find(|(i, _, _)| *i == id)
                    .map(|(_, k, v)| (*k, v.as_slice()))
                    .or_else(|| instances.get(&id).map(|i| (i.kind, i.value.as_slice())));
                let current = match current {
                    Some((ContractKind::LongTermSecret, value)) => value,
                    _ => return Err(LedgerError::Rejected(format!("unknown secret {id}"))),
                };
                let current: LtsInstanceInfo<C> = decode(current).map_err(reject)?;
                let value = Self::arg(instruction, ARG_LTS_INSTANCE_INFO)?;
                let info: LtsInstanceInfo<C> = decode(value).map_err(reject)?;
                if !info
                    .roster
                    .list
                    .iter()
                    .any(|s| current.roster.contains(&s.public))
                {
                    return Err(LedgerError::Rejected(
                        "new roster shares no node with the current one".to_string(),
                    ));
                }
                Ok((id, ContractKind::LongTermSecret, value.to_vec()))
            }
            Action::Invoke {
                contract, command, ..
            } => Err(LedgerError::Rejected(format!(
                "contract {contract} has no command {command}"
            ))),
        }
    }
}

impl<C: CSCurve> LedgerClient for MemoryLedger<C> {
    fn id(&self) -> LedgerId {
        self.id
    }

    fn add_transaction(&self, tx: ClientTransaction) -> Result<Vec<InstanceId>, LedgerError> {
        let mut instances = self.instances.write();
        let mut pending = Vec::with_capacity(tx.instructions.len());
        for instruction in &tx.instructions {
            let applied = self.apply(&instances, &pending, instruction)?;
            pending.push(applied);
        }

        let mut out = Vec::with_capacity(pending.len());
        for (id, kind, value) in pending {
            info!(%id, %kind, "ledger stored instance");
            instances.insert(
                id,
                Instance {
                    kind,
                    value,
                    hidden_for: self.lag,
                },
            );
            out.push(id);
        }
        Ok(out)
    }

    fn get_proof(&self, id: &InstanceId) -> Result<Proof, LedgerError> {
        let mut instances = self.instances.write();
        let instance = instances.get_mut(id).ok_or(LedgerError::NotFound(*id))?;
        if instance.hidden_for > 0 {
            instance.hidden_for -= 1;
            return Err(LedgerError::NotFound(*id));
        }
        Ok(Proof {
            ledger_id: self.id,
            instance_id: *id,
            contract: instance.kind.id().to_string(),
            value: instance.value.clone(),
        })
    }
}
