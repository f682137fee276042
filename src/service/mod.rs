//! A node holding shares of long-term secrets, and answering requests about them.
//!
//! Serving a request happens in two steps. A node first *prepares*, checking the
//! request against the ledger proofs and its own state, which yields a job
//! holding everything the protocol needs. Once the protocol ran to completion,
//! the node *commits* its output. Moving messages between the nodes is
//! the job of the substrate, see [LocalCluster].
use std::collections::HashSet;

use elliptic_curve::{Field, Group};
use parking_lot::RwLock;
use rand_core::OsRng;
use tracing::info;

use crate::{
    compat::CSCurve,
    config::Config,
    decrypt::{decrypt, decrypt_and_sign, DecryptArguments, SignedDecryption, SigningArguments},
    error::LtsError,
    keyshare::{keygen, reshare, KeygenOutput, ReshareArguments, ReshareOutput},
    ledger::Proof,
    protocol::{InitializationError, Participant, Protocol},
    records::{check_pair, Dkid, InstanceId, LedgerId, Read, Write},
    roster::{ReshareLayout, Roster, ServerIdentity},
    store::{LtsEntry, LtsPublic, ShareStore},
};

mod local;
mod messages;

pub use local::LocalCluster;
pub use messages::{
    CreateLtsReply, DecryptKey, DecryptKeyNt, DecryptKeyNtReply, DecryptKeyReply,
    ReshareLtsReply, ReshareRequest,
};

/// A node's part in generating a long-term secret.
#[derive(Debug, Clone)]
pub struct DkgJob<C: CSCurve> {
    instance_id: InstanceId,
    ledger_id: LedgerId,
    roster: Roster<C>,
    me: Participant,
}

impl<C: CSCurve> DkgJob<C> {
    pub fn me(&self) -> Participant {
        self.me
    }

    pub fn protocol(
        &self,
    ) -> Result<impl Protocol<Output = KeygenOutput<C>>, InitializationError> {
        keygen(&self.roster.participants(), self.me, self.roster.threshold())
    }
}

/// A node's part in moving a long-term secret to a new roster.
#[derive(Debug, Clone)]
pub struct ReshareJob<C: CSCurve> {
    instance_id: InstanceId,
    ledger_id: LedgerId,
    roster: Roster<C>,
    /// The epoch of the entry we hold now, if any.
    held_epoch: Option<u64>,
    next_epoch: u64,
    run_id: Participant,
    args: ReshareArguments<C>,
}

impl<C: CSCurve> ReshareJob<C> {
    pub fn run_id(&self) -> Participant {
        self.run_id
    }

    pub fn held_epoch(&self) -> Option<u64> {
        self.held_epoch
    }

    pub fn protocol(
        &self,
    ) -> Result<impl Protocol<Output = ReshareOutput<C>>, InitializationError> {
        reshare(self.run_id, self.args.clone())
    }
}

/// A node's part in decrypting the key of a write.
#[derive(Debug, Clone)]
pub struct DecryptJob<C: CSCurve> {
    public: LtsPublic<C>,
    me: Participant,
    share: C::Scalar,
    base: C::AffinePoint,
    c: C::AffinePoint,
}

impl<C: CSCurve> DecryptJob<C> {
    pub fn me(&self) -> Participant {
        self.me
    }

    /// The sharing this job decrypts with.
    pub fn public(&self) -> &LtsPublic<C> {
        &self.public
    }

    fn arguments(&self, participants: &[Participant]) -> DecryptArguments<C> {
        DecryptArguments {
            participants: participants.to_vec(),
            threshold: self.public.threshold,
            commitment: self.public.commitment.clone(),
            share: self.share,
            base: self.base,
        }
    }

    /// Start decrypting along with the given roster members.
    pub fn protocol(
        &self,
        participants: &[Participant],
    ) -> Result<impl Protocol<Output = C::AffinePoint>, InitializationError> {
        decrypt(self.me, self.arguments(participants))
    }

    pub fn reply(&self, xhat_enc: C::AffinePoint) -> DecryptKeyReply<C> {
        DecryptKeyReply {
            x: self.public.public_key(),
            xhat_enc,
            c: self.c,
        }
    }
}

/// A node's part in a decryption which ends in a collective signature.
#[derive(Debug, Clone)]
pub struct DecryptNtJob<C: CSCurve> {
    pub decrypt: DecryptJob<C>,
    dkid: Dkid,
    signing_key: C::Scalar,
}

impl<C: CSCurve> DecryptNtJob<C> {
    pub fn protocol(
        &self,
        participants: &[Participant],
    ) -> Result<impl Protocol<Output = SignedDecryption<C>>, InitializationError> {
        let signing = SigningArguments {
            dkid: self.dkid,
            signing_key: self.signing_key,
            publics: self.decrypt.public.roster.publics(),
        };
        decrypt_and_sign(self.decrypt.me, self.decrypt.arguments(participants), signing)
    }

    pub fn reply(&self, out: SignedDecryption<C>) -> DecryptKeyNtReply<C> {
        DecryptKeyNtReply {
            x: self.decrypt.public.public_key(),
            xhat_enc: out.xhat_enc,
            c: self.decrypt.c,
            signature: out.signature,
        }
    }
}

/// A node serving long-term secrets.
pub struct Service<C: CSCurve> {
    identity: ServerIdentity<C>,
    signing_key: C::Scalar,
    store: ShareStore<C>,
    authorized: RwLock<HashSet<LedgerId>>,
    config: Config,
}

impl<C: CSCurve> Service<C> {
    /// Create a node with a fresh signing key.
    pub fn new(address: impl Into<String>, config: Config) -> Self {
        let signing_key = C::Scalar::random(&mut OsRng);
        Self {
            identity: ServerIdentity {
                address: address.into(),
                public: (C::ProjectivePoint::generator() * signing_key).into(),
            },
            signing_key,
            store: ShareStore::new(),
            authorized: RwLock::new(HashSet::new()),
            config,
        }
    }

    pub fn identity(&self) -> &ServerIdentity<C> {
        &self.identity
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &ShareStore<C> {
        &self.store
    }

    /// Serve requests backed by proofs from this ledger.
    pub fn authorize(&self, ledger_id: LedgerId) {
        if self.authorized.write().insert(ledger_id) {
            info!(node = %self.identity.address, ledger = %ledger_id, "authorized ledger");
        }
    }

    fn check_authorized(&self, proof: &Proof) -> Result<(), LtsError> {
        if !self.authorized.read().contains(&proof.ledger_id) {
            return Err(LtsError::UnauthorizedLedger(proof.ledger_id));
        }
        Ok(())
    }

    /// The public state of a secret we hold a share of.
    pub fn lts_public(&self, ledger: &LedgerId, id: &InstanceId) -> Option<LtsPublic<C>> {
        self.store.get(ledger, id).map(|e| e.public)
    }

    /// Check a proof that a new long-term secret was spawned for a roster we belong to.
    pub fn prepare_dkg(&self, proof: &Proof) -> Result<DkgJob<C>, LtsError> {
        self.check_authorized(proof)?;
        let info = proof.lts_instance_info::<C>()?;
        let me = info
            .roster
            .index_of(&self.identity.public)
            .ok_or(LtsError::NotInRoster)?;
        if self.store.contains(&proof.ledger_id, &proof.instance_id) {
            return Err(LtsError::InstanceExists(proof.instance_id));
        }
        Ok(DkgJob {
            instance_id: proof.instance_id,
            ledger_id: proof.ledger_id,
            roster: info.roster,
            me,
        })
    }

    /// Store our share of a freshly generated secret.
    pub fn commit_dkg(
        &self,
        job: DkgJob<C>,
        out: KeygenOutput<C>,
    ) -> Result<LtsPublic<C>, LtsError> {
        let public = LtsPublic {
            instance_id: job.instance_id,
            ledger_id: job.ledger_id,
            threshold: job.roster.threshold(),
            roster: job.roster,
            commitment: out.commitment,
            epoch: 0,
        };
        self.store.insert_new(LtsEntry {
            public: public.clone(),
            index: job.me,
            share: out.private_share,
        })?;
        info!(
            node = %self.identity.address,
            instance = %public.instance_id,
            "stored share of new long-term secret"
        );
        Ok(public)
    }

    /// Check a request to move a secret to the roster named by its proof.
    ///
    /// Rosters with no node in common with the current one are refused here,
    /// before anything is sent.
    pub fn prepare_reshare(&self, request: &ReshareRequest<C>) -> Result<ReshareJob<C>, LtsError> {
        let proof = &request.proof;
        self.check_authorized(proof)?;
        let previous = &request.previous;
        if proof.instance_id != previous.instance_id || proof.ledger_id != previous.ledger_id {
            return Err(LtsError::UnknownInstance(proof.instance_id));
        }
        let info = proof.lts_instance_info::<C>()?;
        let layout = ReshareLayout::new(&previous.roster, &info.roster, |s| {
            request.dealers.contains(&s.public)
        })?;
        let run_id = layout
            .run_id(&self.identity.public)
            .ok_or(LtsError::NotInRoster)?;

        // A stale share is fine as long as we don't deal with it.
        let held = self.store.get(&proof.ledger_id, &proof.instance_id);
        let my_share = match (layout.old_index(run_id), &held) {
            (None, _) => None,
            (Some(_), Some(entry)) if entry.public == *previous => Some(entry.share),
            (Some(_), Some(entry)) => {
                return Err(LtsError::StaleEpoch {
                    instance: proof.instance_id,
                    expected: Some(previous.epoch),
                    found: Some(entry.public.epoch),
                })
            }
            (Some(_), None) => return Err(LtsError::UnknownInstance(proof.instance_id)),
        };

        Ok(ReshareJob {
            instance_id: proof.instance_id,
            ledger_id: proof.ledger_id,
            held_epoch: held.map(|e| e.public.epoch),
            next_epoch: previous.epoch + 1,
            run_id,
            args: ReshareArguments {
                old_holders: layout.old_holders,
                old_threshold: previous.threshold,
                old_commitment: previous.commitment.clone(),
                new_participants: layout.new_participants,
                new_threshold: info.roster.threshold(),
                my_share,
            },
            roster: info.roster,
        })
    }

    /// Swap in the output of a resharing.
    ///
    /// Nodes leaving the roster drop their share, and get `None` back.
    pub fn commit_reshare(
        &self,
        job: ReshareJob<C>,
        out: ReshareOutput<C>,
    ) -> Result<Option<LtsPublic<C>>, LtsError> {
        let public = LtsPublic {
            instance_id: job.instance_id,
            ledger_id: job.ledger_id,
            roster: job.roster,
            commitment: out.commitment,
            threshold: job.args.new_threshold,
            epoch: job.next_epoch,
        };
        let entry = out.private_share.map(|share| LtsEntry {
            public: public.clone(),
            index: job.run_id,
            share,
        });
        let kept = entry.is_some();
        self.store
            .swap(&job.ledger_id, &job.instance_id, job.held_epoch, entry)?;
        info!(
            node = %self.identity.address,
            instance = %public.instance_id,
            epoch = public.epoch,
            kept,
            "committed resharing"
        );
        Ok(kept.then_some(public))
    }

    fn decode_pair(
        &self,
        write_proof: &Proof,
        read_proof: &Proof,
    ) -> Result<(Write<C>, Read<C>), LtsError> {
        self.check_authorized(write_proof)?;
        self.check_authorized(read_proof)?;
        let write = write_proof.write::<C>()?;
        let read = read_proof.read::<C>()?;
        check_pair(&write_proof.instance_id, &read)?;
        Ok((write, read))
    }

    /// Look up our share of the secret a write was encrypted under.
    ///
    /// The secret must live on the same ledger as the write.
    fn decrypt_job(
        &self,
        write_proof: &Proof,
        write: &Write<C>,
        base: C::AffinePoint,
    ) -> Result<DecryptJob<C>, LtsError> {
        let entry = self
            .store
            .get(&write_proof.ledger_id, &write.lts_instance_id)
            .ok_or(LtsError::UnknownInstance(write.lts_instance_id))?;
        Ok(DecryptJob {
            public: entry.public,
            me: entry.index,
            share: entry.share,
            base,
            c: write.c,
        })
    }

    /// Check a request to re-encrypt the key of a write under the key of a read.
    pub fn prepare_decrypt(&self, request: &DecryptKey) -> Result<DecryptJob<C>, LtsError> {
        let (write, read) = self.decode_pair(&request.write, &request.read)?;
        let base = C::ProjectivePoint::from(write.u) + C::ProjectivePoint::from(read.xc);
        self.decrypt_job(&request.write, &write, base.into())
    }

    /// Check a request for a signed decryption.
    ///
    /// The statement is valid if it recomputes from the records. Base
    /// decryptions skip the blinding by the reader's key.
    pub fn prepare_decrypt_nt(&self, request: &DecryptKeyNt) -> Result<DecryptNtJob<C>, LtsError> {
        let (write, read) = self.decode_pair(&request.write, &request.read)?;
        let dkid = Dkid::compute(&write, &read);
        if dkid != request.dkid {
            return Err(LtsError::StatementMismatch(request.dkid));
        }
        let base = if request.is_reenc {
            (C::ProjectivePoint::from(write.u) + C::ProjectivePoint::from(read.xc)).into()
        } else {
            write.u
        };
        Ok(DecryptNtJob {
            decrypt: self.decrypt_job(&request.write, &write, base)?,
            dkid,
            signing_key: self.signing_key,
        })
    }
}
