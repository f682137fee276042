//! Node identities, rosters, and how a resharing numbers its participants.
use serde::{Deserialize, Serialize};

use crate::{
    compat::CSCurve,
    error::LtsError,
    protocol::Participant,
    serde::{deserialize_point, serialize_point},
};

/// The number of nodes needed to use a secret shared among `n` nodes.
///
/// This is strictly more than two thirds of the roster.
pub fn threshold(n: usize) -> usize {
    n - n.saturating_sub(1) / 3
}

/// A node: where to reach it, and the public key it signs with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "C: CSCurve")]
pub struct ServerIdentity<C: CSCurve> {
    pub address: String,
    #[serde(
        serialize_with = "serialize_point::<C, _>",
        deserialize_with = "deserialize_point::<C, _>"
    )]
    pub public: C::AffinePoint,
}

/// An ordered list of nodes.
///
/// The position of a node in the list is its index for secret sharing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "C: CSCurve")]
pub struct Roster<C: CSCurve> {
    pub list: Vec<ServerIdentity<C>>,
}

impl<C: CSCurve> Roster<C> {
    pub fn new(list: Vec<ServerIdentity<C>>) -> Self {
        Self { list }
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn threshold(&self) -> usize {
        threshold(self.len())
    }

    /// The position of a node in this roster.
    pub fn index_of(&self, public: &C::AffinePoint) -> Option<Participant> {
        self.list
            .iter()
            .position(|s| s.public == *public)
            .map(|i| Participant::from(i as u32))
    }

    pub fn contains(&self, public: &C::AffinePoint) -> bool {
        self.index_of(public).is_some()
    }

    pub fn publics(&self) -> Vec<C::AffinePoint> {
        self.list.iter().map(|s| s.public).collect()
    }

    /// The participants of a protocol run over the whole roster.
    pub fn participants(&self) -> Vec<Participant> {
        (0..self.len() as u32).map(Participant::from).collect()
    }
}

/// How the nodes of a resharing are numbered.
///
/// Members of the new roster use their new index. Old holders which are
/// leaving come after them, in their old order.
#[derive(Debug, Clone)]
pub struct ReshareLayout<C: CSCurve> {
    run: Vec<(C::AffinePoint, Participant)>,
    /// Each old holder taking part, with its index in the old roster.
    pub old_holders: Vec<(Participant, Participant)>,
    pub new_participants: Vec<Participant>,
}

impl<C: CSCurve> ReshareLayout<C> {
    /// Lay out a resharing from `old` to `new`.
    ///
    /// Only old holders for which `present` holds will deal.
    /// Rosters without any node in common are rejected.
    pub fn new(
        old: &Roster<C>,
        new: &Roster<C>,
        present: impl Fn(&ServerIdentity<C>) -> bool,
    ) -> Result<Self, LtsError> {
        if !old.list.iter().any(|s| new.contains(&s.public)) {
            return Err(LtsError::DisjointRosterRejected);
        }

        let mut run: Vec<_> = new
            .list
            .iter()
            .zip(new.participants())
            .map(|(s, p)| (s.public, p))
            .collect();
        let mut next = new.len() as u32;
        let mut old_holders = Vec::new();
        for (s, old_index) in old.list.iter().zip(old.participants()) {
            if !present(s) {
                continue;
            }
            let run_id = match new.index_of(&s.public) {
                Some(p) => p,
                None => {
                    let p = Participant::from(next);
                    next += 1;
                    run.push((s.public, p));
                    p
                }
            };
            old_holders.push((run_id, old_index));
        }

        Ok(Self {
            run,
            old_holders,
            new_participants: new.participants(),
        })
    }

    /// The identifier of a node in this run, if it takes part.
    pub fn run_id(&self, public: &C::AffinePoint) -> Option<Participant> {
        self.run
            .iter()
            .find(|(p, _)| p == public)
            .map(|(_, id)| *id)
    }

    /// The old index of a node, if it deals in this run.
    pub fn old_index(&self, run_id: Participant) -> Option<Participant> {
        self.old_holders
            .iter()
            .find(|(r, _)| *r == run_id)
            .map(|(_, old)| *old)
    }

    /// Every node taking part, by public key.
    pub fn members(&self) -> impl Iterator<Item = &C::AffinePoint> + '_ {
        self.run.iter().map(|(p, _)| p)
    }
}
