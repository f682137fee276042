//! This module holds some utilities for working with participants.
//!
//! Often you need to do things like, storing one item for each participant,
//! or getting the field values corresponding to each participant, etc.
//! This module tries to provide useful data structures for doing that.

use std::{collections::HashMap, ops::Index};

use elliptic_curve::Field;
use serde::Serialize;

use crate::{compat::CSCurve, protocol::Participant};

/// Represents a sorted list of participants.
///
/// The advantage of this data structure is that it can be hashed in the protocol transcript,
/// since everybody will agree on its order.
#[derive(Debug, Clone, Serialize)]
pub struct ParticipantList {
    participants: Vec<Participant>,
    /// This maps each participant to their index in the vector above.
    #[serde(skip_serializing)]
    indices: HashMap<Participant, usize>,
}

impl ParticipantList {
    /// Create a participant list from a slice of participants.
    ///
    /// This will return None if the participants have duplicates.
    pub fn new(participants: &[Participant]) -> Option<Self> {
        let mut out = participants.to_owned();
        out.sort();

        let indices: HashMap<_, _> = out.iter().enumerate().map(|(p, x)| (*x, p)).collect();

        if indices.len() < out.len() {
            return None;
        }

        Some(Self {
            participants: out,
            indices,
        })
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Check if this list has a given participant.
    pub fn contains(&self, participant: Participant) -> bool {
        self.indices.contains_key(&participant)
    }

    /// Iterate over the participants, in order.
    pub fn iter(&self) -> impl Iterator<Item = Participant> + '_ {
        self.participants.iter().copied()
    }

    /// Iterate over the other participants
    pub fn others(&self, me: Participant) -> impl Iterator<Item = Participant> + '_ {
        self.participants.iter().filter(move |x| **x != me).copied()
    }

    /// Return the index of a given participant.
    ///
    /// Basically, the order they appear in a sorted list
    pub fn index(&self, participant: Participant) -> usize {
        self.indices[&participant]
    }

    /// Get the lagrange coefficient for a participant, relative to this list.
    ///
    /// This is the coefficient to interpolate the value at zero.
    pub fn lagrange<C: CSCurve>(&self, p: Participant) -> C::Scalar {
        let p_scalar = p.scalar::<C>();

        let mut top = C::Scalar::ONE;
        let mut bot = C::Scalar::ONE;
        for q in &self.participants {
            if p == *q {
                continue;
            }
            let q_scalar = q.scalar::<C>();
            top *= q_scalar;
            bot *= q_scalar - p_scalar;
        }

        // Participants are distinct, so the denominator never vanishes.
        top * bot.invert().unwrap()
    }

    /// Return the participants present in either list.
    pub fn union(&self, others: &ParticipantList) -> Self {
        let mut out = self.participants.clone();
        out.extend(others.iter().filter(|p| !self.contains(*p)));
        out.sort();
        Self::from_sorted(out)
    }

    /// Build a list from participants already sorted and free of duplicates.
    fn from_sorted(participants: Vec<Participant>) -> Self {
        let indices = participants
            .iter()
            .enumerate()
            .map(|(i, p)| (*p, i))
            .collect();
        Self {
            participants,
            indices,
        }
    }
}

impl From<ParticipantList> for Vec<Participant> {
    fn from(list: ParticipantList) -> Self {
        list.participants
    }
}

/// A map from participants to elements.
///
/// The idea is that you have one element for each participant.
#[derive(Debug, Clone, Serialize)]
pub struct ParticipantMap<'a, T> {
    #[serde(skip_serializing)]
    participants: &'a ParticipantList,
    data: Vec<Option<T>>,
    #[serde(skip_serializing)]
    count: usize,
}

impl<'a, T> ParticipantMap<'a, T> {
    /// Create a new map from a list of participants.
    ///
    /// This map only lives as long as that list of participants.
    pub fn new(participants: &'a ParticipantList) -> Self {
        // We could also require a T: Clone bound instead of doing this initialization manually.
        let size = participants.participants.len();
        let mut data = Vec::with_capacity(size);
        for _ in 0..size {
            data.push(None);
        }

        Self {
            participants,
            data,
            count: 0,
        }
    }

    /// Check if this map is full, i.e. if every participant has put something in.
    pub fn full(&self) -> bool {
        self.count == self.data.len()
    }

    /// Place the data for a participant in this map.
    ///
    /// This will ignore participants outside of the list, as well as
    /// any repeated data from the same participant.
    pub fn put(&mut self, participant: Participant, data: T) {
        let i = match self.participants.indices.get(&participant) {
            Some(i) => *i,
            None => return,
        };
        if self.data[i].is_some() {
            return;
        }

        self.data[i] = Some(data);
        self.count += 1;
    }

    /// Get the data for a participant, if any was placed.
    pub fn get(&self, participant: Participant) -> Option<&T> {
        let i = self.participants.indices.get(&participant)?;
        self.data[*i].as_ref()
    }
}

impl<'a, T> Index<Participant> for ParticipantMap<'a, T> {
    type Output = T;

    fn index(&self, index: Participant) -> &Self::Output {
        self.data[self.participants.index(index)].as_ref().unwrap()
    }
}

/// A way to count the participants we've seen.
///
/// This is like a map from participants to booleans.
#[derive(Debug, Clone)]
pub struct ParticipantCounter<'a> {
    participants: &'a ParticipantList,
    seen: Vec<bool>,
    counter: usize,
}

impl<'a> ParticipantCounter<'a> {
    /// Create a new counter for a list of participants.
    pub fn new(participants: &'a ParticipantList) -> Self {
        Self {
            participants,
            seen: vec![false; participants.len()],
            counter: participants.len(),
        }
    }

    /// Mark a participant as seen.
    ///
    /// Returns true if this participant is in the list, and wasn't seen before.
    pub fn put(&mut self, participant: Participant) -> bool {
        let i = match self.participants.indices.get(&participant) {
            None => return false,
            Some(&i) => i,
        };

        let inserted = !self.seen[i];
        if inserted {
            self.seen[i] = true;
            self.counter -= 1;
        }
        inserted
    }

    /// Forget about all of the participants we've seen.
    pub fn clear(&mut self) {
        self.seen.fill(false);
        self.counter = self.participants.len();
    }

    /// Check if every participant has been seen.
    pub fn full(&self) -> bool {
        self.counter == 0
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::math::Polynomial;
    use k256::{Scalar, Secp256k1};
    use rand_core::OsRng;

    fn participants(ids: &[u32]) -> ParticipantList {
        let ps: Vec<_> = ids.iter().map(|i| Participant::from(*i)).collect();
        ParticipantList::new(&ps).unwrap()
    }

    #[test]
    fn test_duplicates_are_rejected() {
        let p = Participant::from(1u32);
        assert!(ParticipantList::new(&[p, p]).is_none());
    }

    #[test]
    fn test_any_threshold_subset_interpolates_the_secret() {
        let secret = Scalar::from(42u64);
        let f = Polynomial::<Secp256k1>::extend_random(&mut OsRng, 3, &secret);

        for ids in [&[0u32, 1, 2][..], &[1, 3, 4], &[0, 2, 3, 4], &[0, 1, 2, 3, 4]] {
            let list = participants(ids);
            let mut acc = Scalar::ZERO;
            for p in list.iter() {
                acc += list.lagrange::<Secp256k1>(p) * f.evaluate(&p.scalar::<Secp256k1>());
            }
            assert_eq!(acc, secret);
        }
    }

    #[test]
    fn test_union() {
        let a = participants(&[0, 1, 2]);
        let b = participants(&[2, 3]);
        assert_eq!(a.union(&b).len(), 4);
        assert_eq!(
            Vec::from(a.union(&participants(&[]))),
            (0..3u32).map(Participant::from).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_counter_ignores_repeats_and_strangers() {
        let list = participants(&[0, 1]);
        let mut seen = ParticipantCounter::new(&list);
        assert!(seen.put(Participant::from(0u32)));
        assert!(!seen.put(Participant::from(0u32)));
        assert!(!seen.put(Participant::from(7u32)));
        assert!(!seen.full());
        assert!(seen.put(Participant::from(1u32)));
        assert!(seen.full());
    }
}
