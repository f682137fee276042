//! The shares a node holds, one per long-term secret.
use std::collections::HashMap;

use elliptic_curve::Group;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::{
    compat::CSCurve,
    error::LtsError,
    math::GroupPolynomial,
    protocol::Participant,
    records::{InstanceId, LedgerId},
    roster::Roster,
};

/// The public state of a long-term secret, which every holder agrees on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "C: CSCurve")]
pub struct LtsPublic<C: CSCurve> {
    pub instance_id: InstanceId,
    pub ledger_id: LedgerId,
    pub roster: Roster<C>,
    /// Commits to every share, and to the secret at zero.
    pub commitment: GroupPolynomial<C>,
    pub threshold: usize,
    /// The number of reshares this secret went through.
    pub epoch: u64,
}

impl<C: CSCurve> LtsPublic<C> {
    pub fn public_key(&self) -> C::AffinePoint {
        self.commitment.evaluate_zero().into()
    }
}

/// What a node stores for a long-term secret.
#[derive(Debug, Clone)]
pub struct LtsEntry<C: CSCurve> {
    pub public: LtsPublic<C>,
    /// Our index in the roster.
    pub index: Participant,
    pub share: C::Scalar,
}

impl<C: CSCurve> LtsEntry<C> {
    /// Check that our share matches the public commitment.
    pub fn verify(&self) -> Result<(), LtsError> {
        if self.public.commitment.evaluate(&self.index.scalar::<C>())
            != C::ProjectivePoint::generator() * self.share
        {
            return Err(LtsError::ShareVerificationFailed(format!(
                "stored share of {} does not match its commitment",
                self.public.instance_id
            )));
        }
        Ok(())
    }
}

/// A table of shares, keyed by the ledger and the instance which spawned them.
///
/// The lock is only ever held for a single lookup or swap.
pub struct ShareStore<C: CSCurve> {
    entries: RwLock<HashMap<(LedgerId, InstanceId), LtsEntry<C>>>,
}

impl<C: CSCurve> Default for ShareStore<C> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<C: CSCurve> ShareStore<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, ledger: &LedgerId, id: &InstanceId) -> Option<LtsEntry<C>> {
        self.entries.read().get(&(*ledger, *id)).cloned()
    }

    pub fn contains(&self, ledger: &LedgerId, id: &InstanceId) -> bool {
        self.entries.read().contains_key(&(*ledger, *id))
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Store the share of a freshly generated secret.
    ///
    /// Fails if the instance already has a share, so the first writer wins.
    pub fn insert_new(&self, entry: LtsEntry<C>) -> Result<(), LtsError> {
        entry.verify()?;
        let id = entry.public.instance_id;
        let key = (entry.public.ledger_id, id);
        let mut entries = self.entries.write();
        if entries.contains_key(&key) {
            return Err(LtsError::InstanceExists(id));
        }
        entries.insert(key, entry);
        Ok(())
    }

    /// Replace the share of an instance, or drop it if `new` is `None`.
    ///
    /// `expected` is the epoch the caller started from, `None` if it held nothing.
    /// The swap fails if the entry changed in the meantime.
    pub fn swap(
        &self,
        ledger: &LedgerId,
        id: &InstanceId,
        expected: Option<u64>,
        new: Option<LtsEntry<C>>,
    ) -> Result<(), LtsError> {
        if let Some(entry) = &new {
            entry.verify()?;
        }
        let key = (*ledger, *id);
        let mut entries = self.entries.write();
        let found = entries.get(&key).map(|e| e.public.epoch);
        if found != expected {
            return Err(LtsError::StaleEpoch {
                instance: *id,
                expected,
                found,
            });
        }
        match new {
            Some(entry) => {
                entries.insert(key, entry);
            }
            None => {
                entries.remove(&key);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use easy_parallel::Parallel;
    use k256::{Scalar, Secp256k1};
    use rand_core::OsRng;

    use super::*;
    use crate::math::Polynomial;

    fn entry(id: InstanceId, epoch: u64) -> LtsEntry<Secp256k1> {
        entry_on(LedgerId::default(), id, epoch)
    }

    fn entry_on(ledger: LedgerId, id: InstanceId, epoch: u64) -> LtsEntry<Secp256k1> {
        let f = Polynomial::<Secp256k1>::random(&mut OsRng, 2);
        let index = Participant::from(1u32);
        LtsEntry {
            public: LtsPublic {
                instance_id: id,
                ledger_id: ledger,
                roster: Roster::new(Vec::new()),
                commitment: f.commit(),
                threshold: 2,
                epoch,
            },
            index,
            share: f.evaluate(&index.scalar::<Secp256k1>()),
        }
    }

    #[test]
    fn test_mismatched_share_is_refused() {
        let store = ShareStore::new();
        let mut bad = entry(InstanceId([1; 32]), 0);
        bad.share += Scalar::ONE;
        assert!(matches!(
            store.insert_new(bad),
            Err(LtsError::ShareVerificationFailed(_))
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_concurrent_inserts_keep_one_entry() {
        let store = ShareStore::new();
        let id = InstanceId([2; 32]);
        let wins = AtomicUsize::new(0);
        Parallel::new()
            .each(0..8, |_| {
                if store.insert_new(entry(id, 0)).is_ok() {
                    wins.fetch_add(1, Ordering::SeqCst);
                }
            })
            .run();
        assert_eq!(wins.load(Ordering::SeqCst), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_swap_checks_epoch() {
        let store = ShareStore::new();
        let ledger = LedgerId::default();
        let id = InstanceId([3; 32]);
        store.insert_new(entry(id, 0)).unwrap();

        assert!(matches!(
            store.swap(&ledger, &id, Some(1), Some(entry(id, 2))),
            Err(LtsError::StaleEpoch { .. })
        ));
        store.swap(&ledger, &id, Some(0), Some(entry(id, 1))).unwrap();
        assert_eq!(store.get(&ledger, &id).unwrap().public.epoch, 1);

        store.swap(&ledger, &id, Some(1), None).unwrap();
        assert!(!store.contains(&ledger, &id));

        // A node joining the roster held nothing before.
        store.swap(&ledger, &id, None, Some(entry(id, 2))).unwrap();
        assert!(store.contains(&ledger, &id));
    }

    #[test]
    fn test_instances_are_scoped_by_ledger() {
        let store = ShareStore::new();
        let id = InstanceId([4; 32]);
        let (a, b) = (LedgerId([1; 32]), LedgerId([2; 32]));
        store.insert_new(entry_on(a, id, 0)).unwrap();
        store.insert_new(entry_on(b, id, 0)).unwrap();
        assert_eq!(store.len(), 2);
        assert!(matches!(
            store.insert_new(entry_on(a, id, 0)),
            Err(LtsError::InstanceExists(_))
        ));

        store.swap(&b, &id, Some(0), None).unwrap();
        assert!(store.contains(&a, &id));
        assert!(!store.contains(&b, &id));
        assert_eq!(store.get(&a, &id).unwrap().public.ledger_id, a);
    }
}
