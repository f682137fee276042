use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, Ordering},
};

use parking_lot::Mutex;
use tracing::{info, warn};

use super::{
    CreateLtsReply, DecryptJob, DecryptKey, DecryptKeyNt, DecryptKeyNtReply, DecryptKeyReply,
    ReshareLtsReply, ReshareRequest, Service,
};
use crate::{
    compat::CSCurve,
    config::Config,
    decrypt::SignedDecryption,
    error::LtsError,
    keyshare::{KeygenOutput, ReshareOutput},
    ledger::Proof,
    protocol::{run_protocol_bounded, Participant, Protocol, ProtocolError},
    records::{InstanceId, LedgerId},
    roster::{ReshareLayout, Roster},
    store::LtsPublic,
};

/// Whether every node would refuse the request the same way.
fn is_request_error(e: &LtsError) -> bool {
    matches!(
        e,
        LtsError::ReadWriteMismatch { .. }
            | LtsError::WrongRecordKind { .. }
            | LtsError::Decode { .. }
            | LtsError::StatementMismatch(_)
    )
}

fn missing_output(p: Participant) -> LtsError {
    LtsError::Protocol(ProtocolError::AssertionFailed(format!(
        "no output for participant {p:?}"
    )))
}

/// A set of nodes in one process, passing protocol messages directly.
///
/// This stands in for the network: it routes requests to the nodes concerned,
/// and nodes can be taken offline to simulate failures.
pub struct LocalCluster<C: CSCurve> {
    nodes: Vec<Service<C>>,
    online: Vec<AtomicBool>,
    /// Held while a run commits, so that it commits on every node or on none.
    commits: Mutex<()>,
    config: Config,
}

impl<C: CSCurve> LocalCluster<C> {
    pub fn new(n: usize, config: Config) -> Self {
        Self {
            nodes: (0..n)
                .map(|i| Service::new(format!("local://node-{i}"), config.clone()))
                .collect(),
            online: (0..n).map(|_| AtomicBool::new(true)).collect(),
            commits: Mutex::new(()),
            config,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, i: usize) -> &Service<C> {
        &self.nodes[i]
    }

    /// A roster made of some of our nodes, in the given order.
    pub fn roster(&self, nodes: impl IntoIterator<Item = usize>) -> Roster<C> {
        Roster::new(
            nodes
                .into_iter()
                .map(|i| self.nodes[i].identity().clone())
                .collect(),
        )
    }

    pub fn set_online(&self, i: usize, online: bool) {
        self.online[i].store(online, Ordering::SeqCst);
    }

    /// Have every node serve requests backed by this ledger.
    pub fn authorize(&self, ledger_id: LedgerId) {
        for node in &self.nodes {
            node.authorize(ledger_id);
        }
    }

    fn online_nodes(&self) -> Vec<&Service<C>> {
        self.nodes
            .iter()
            .zip(&self.online)
            .filter(|(_, online)| online.load(Ordering::SeqCst))
            .map(|(node, _)| node)
            .collect()
    }

    fn online_node(&self, public: &C::AffinePoint) -> Option<&Service<C>> {
        self.online_nodes()
            .into_iter()
            .find(|node| node.identity().public == *public)
    }

    /// Run a secret generation for the roster in the proof.
    ///
    /// Every node of the roster must be online.
    pub fn create_lts(&self, proof: &Proof) -> Result<CreateLtsReply<C>, LtsError> {
        let info = proof.lts_instance_info::<C>()?;
        let members: Vec<_> = info
            .roster
            .list
            .iter()
            .filter_map(|s| self.online_node(&s.public))
            .collect();
        if members.len() < info.roster.len() {
            return Err(LtsError::QuorumUnavailable {
                needed: info.roster.len(),
                available: members.len(),
            });
        }

        let mut jobs = HashMap::new();
        #[allow(clippy::type_complexity)]
        let mut protocols: Vec<(Participant, Box<dyn Protocol<Output = KeygenOutput<C>>>)> =
            Vec::with_capacity(members.len());
        for node in members {
            let job = node.prepare_dkg(proof)?;
            protocols.push((job.me(), Box::new(job.protocol()?)));
            jobs.insert(job.me(), (node, job));
        }
        let outputs = run_protocol_bounded(protocols, self.config.round_budget)?;

        let _guard = self.commits.lock();
        for node in jobs.values().map(|(node, _)| node) {
            if node.store().contains(&proof.ledger_id, &proof.instance_id) {
                return Err(LtsError::InstanceExists(proof.instance_id));
            }
        }
        let mut x = None;
        for (p, out) in outputs {
            let (node, job) = jobs.remove(&p).ok_or_else(|| missing_output(p))?;
            x = Some(node.commit_dkg(job, out)?.public_key());
        }
        let x = x.ok_or(LtsError::NotInRoster)?;
        info!(instance = %proof.instance_id, "generated long-term secret");
        Ok(CreateLtsReply {
            ledger_id: proof.ledger_id,
            instance_id: proof.instance_id,
            x,
        })
    }

    /// The freshest public state of a secret among the online nodes.
    fn current(&self, ledger: &LedgerId, id: &InstanceId) -> Option<LtsPublic<C>> {
        self.online_nodes()
            .into_iter()
            .filter_map(|node| node.lts_public(ledger, id))
            .max_by_key(|public| public.epoch)
    }

    /// Move a secret to the roster in the proof, returning once every node committed.
    ///
    /// Every member of the new roster must be online, and enough current
    /// holders to reach the old threshold.
    pub fn reshare_lts(&self, proof: &Proof) -> Result<ReshareLtsReply, LtsError> {
        let (ledger, id) = (proof.ledger_id, proof.instance_id);
        let info = proof.lts_instance_info::<C>()?;
        let previous = self
            .current(&ledger, &id)
            .ok_or(LtsError::UnknownInstance(id))?;
        let dealers: Vec<_> = previous
            .roster
            .list
            .iter()
            .filter(|s| {
                self.online_node(&s.public)
                    .and_then(|node| node.lts_public(&ledger, &id))
                    .map_or(false, |held| held == previous)
            })
            .map(|s| s.public)
            .collect();
        let layout = ReshareLayout::new(&previous.roster, &info.roster, |s| {
            dealers.contains(&s.public)
        })?;
        if dealers.len() < previous.threshold {
            return Err(LtsError::QuorumUnavailable {
                needed: previous.threshold,
                available: dealers.len(),
            });
        }
        let members: Vec<_> = layout
            .members()
            .filter_map(|public| self.online_node(public))
            .collect();
        let needed = layout.members().count();
        if members.len() < needed {
            return Err(LtsError::QuorumUnavailable {
                needed,
                available: members.len(),
            });
        }

        let epoch = previous.epoch + 1;
        let request = ReshareRequest {
            proof: proof.clone(),
            previous,
            dealers,
        };
        let mut jobs = HashMap::new();
        #[allow(clippy::type_complexity)]
        let mut protocols: Vec<(Participant, Box<dyn Protocol<Output = ReshareOutput<C>>>)> =
            Vec::with_capacity(members.len());
        for node in members {
            let job = node.prepare_reshare(&request)?;
            protocols.push((job.run_id(), Box::new(job.protocol()?)));
            jobs.insert(job.run_id(), (node, job));
        }
        let outputs = run_protocol_bounded(protocols, self.config.round_budget)?;

        let _guard = self.commits.lock();
        for (node, job) in jobs.values() {
            let found = node.store().get(&ledger, &id).map(|e| e.public.epoch);
            if found != job.held_epoch() {
                return Err(LtsError::StaleEpoch {
                    instance: id,
                    expected: job.held_epoch(),
                    found,
                });
            }
        }
        let mut completed = Vec::with_capacity(outputs.len());
        for (p, out) in outputs {
            let (node, job) = jobs.remove(&p).ok_or_else(|| missing_output(p))?;
            node.commit_reshare(job, out)?;
            completed.push(node.identity().address.clone());
        }
        info!(instance = %id, epoch, nodes = completed.len(), "reshared long-term secret");
        Ok(ReshareLtsReply { completed, epoch })
    }

    /// Prepare every online node for a decryption.
    ///
    /// Errors in the request itself are returned as soon as a node reports them.
    /// Nodes refusing for reasons of their own are left out, as are nodes
    /// holding a share from before the latest resharing.
    fn prepare_quorum<'a, J>(
        &'a self,
        prepare: impl Fn(&Service<C>) -> Result<J, LtsError>,
        decrypt_job: impl Fn(&J) -> &DecryptJob<C>,
    ) -> Result<Vec<(&'a Service<C>, J)>, LtsError> {
        let mut refusal = None;
        let mut jobs: Vec<(&Service<C>, J)> = Vec::new();
        {
            // Every node reads its share on the same side of a reshare commit.
            let _guard = self.commits.lock();
            for node in self.online_nodes() {
                match prepare(node) {
                    Ok(job) => jobs.push((node, job)),
                    Err(e) if is_request_error(&e) => return Err(e),
                    Err(e) => {
                        warn!(node = %node.identity().address, error = %e, "node refused to decrypt");
                        refusal.get_or_insert(e);
                    }
                }
            }
        }

        let latest = match jobs
            .iter()
            .map(|(_, job)| decrypt_job(job).public())
            .max_by_key(|public| public.epoch)
        {
            Some(public) => public.clone(),
            None => {
                return Err(refusal.unwrap_or(LtsError::QuorumUnavailable {
                    needed: 1,
                    available: 0,
                }))
            }
        };
        jobs.retain(|(node, job)| {
            let public = decrypt_job(job).public();
            let current = *public == latest && latest.roster.contains(&node.identity().public);
            if !current {
                warn!(
                    node = %node.identity().address,
                    epoch = public.epoch,
                    latest = latest.epoch,
                    "node holds a share from another epoch"
                );
            }
            current
        });
        if jobs.len() < latest.threshold {
            return Err(LtsError::QuorumUnavailable {
                needed: latest.threshold,
                available: jobs.len(),
            });
        }
        Ok(jobs)
    }

    /// Re-encrypt the key of a write under the key of a read.
    pub fn decrypt_key(&self, request: &DecryptKey) -> Result<DecryptKeyReply<C>, LtsError> {
        let jobs = self.prepare_quorum(|node| node.prepare_decrypt(request), |job| job)?;
        let participants: Vec<_> = jobs.iter().map(|(_, job)| job.me()).collect();
        #[allow(clippy::type_complexity)]
        let mut protocols: Vec<(Participant, Box<dyn Protocol<Output = C::AffinePoint>>)> =
            Vec::with_capacity(jobs.len());
        for (_, job) in &jobs {
            protocols.push((job.me(), Box::new(job.protocol(&participants)?)));
        }
        let outputs: HashMap<_, _> = run_protocol_bounded(protocols, self.config.round_budget)?
            .into_iter()
            .collect();

        let (_, entry) = &jobs[0];
        let xhat_enc = outputs
            .get(&entry.me())
            .ok_or_else(|| missing_output(entry.me()))?;
        info!(
            instance = %entry.public().instance_id,
            nodes = participants.len(),
            "decrypted key"
        );
        Ok(entry.reply(*xhat_enc))
    }

    /// Decrypt the key of a write, with the roster signing the result.
    pub fn decrypt_key_nt(&self, request: &DecryptKeyNt) -> Result<DecryptKeyNtReply<C>, LtsError> {
        let jobs = self.prepare_quorum(|node| node.prepare_decrypt_nt(request), |job| &job.decrypt)?;
        let participants: Vec<_> = jobs.iter().map(|(_, job)| job.decrypt.me()).collect();
        #[allow(clippy::type_complexity)]
        let mut protocols: Vec<(Participant, Box<dyn Protocol<Output = SignedDecryption<C>>>)> =
            Vec::with_capacity(jobs.len());
        for (_, job) in &jobs {
            protocols.push((job.decrypt.me(), Box::new(job.protocol(&participants)?)));
        }
        let mut outputs: HashMap<_, _> = run_protocol_bounded(protocols, self.config.round_budget)?
            .into_iter()
            .collect();

        let (_, entry) = &jobs[0];
        let out = outputs
            .remove(&entry.decrypt.me())
            .ok_or_else(|| missing_output(entry.decrypt.me()))?;
        info!(
            dkid = %request.dkid,
            reenc = request.is_reenc,
            nodes = participants.len(),
            "decrypted statement"
        );
        Ok(entry.reply(out))
    }
}
