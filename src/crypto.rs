use std::io::Write;

use ck_meow::Meow;
use rand_core::CryptoRngCore;
use serde::{Deserialize, Serialize};

use crate::serde::encode_writer;

const COMMIT_LABEL: &[u8] = b"calypso-lts v0.1.0 commitment";
const COMMIT_LEN: usize = 32;
const RANDOMIZER_LEN: usize = 32;
const HASH_LABEL: &[u8] = b"calypso-lts v0.1.0 generic hash";
const HASH_LEN: usize = 32;

struct MeowWriter<'a>(&'a mut Meow);

impl<'a> Write for MeowWriter<'a> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.ad(buf, true);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Represents the randomizer used to make a commit hiding.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Randomizer([u8; RANDOMIZER_LEN]);

impl Randomizer {
    /// Generate a new randomizer value.
    fn random<R: CryptoRngCore>(rng: &mut R) -> Self {
        let mut out = [0u8; RANDOMIZER_LEN];
        rng.fill_bytes(&mut out);
        Self(out)
    }
}

/// Represents a commitment to some value.
///
/// This commit is both binding, in that it can't be opened to a different
/// value than the one committed, and hiding, in that it hides the value
/// committed inside (perfectly).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commitment([u8; COMMIT_LEN]);

impl Commitment {
    fn compute<T: Serialize>(val: &T, r: &Randomizer) -> Self {
        let mut meow = Meow::new(COMMIT_LABEL);

        meow.ad(&r.0, false);
        encode_writer(&mut MeowWriter(&mut meow), val);

        let mut out = [0u8; COMMIT_LEN];
        meow.prf(&mut out, false);

        Commitment(out)
    }

    /// Check that a value and a randomizer match this commitment.
    #[must_use]
    pub fn check<T: Serialize>(&self, val: &T, r: &Randomizer) -> bool {
        let actual = Self::compute(val, r);
        *self == actual
    }
}

/// Commit to an arbitrary serializable value.
///
/// This also returns a fresh randomizer, which is used to make sure that the
/// commitment perfectly hides the value contained inside.
///
/// This value will need to be sent when opening the commitment to allow
/// others to check that the opening is valid.
pub fn commit<T: Serialize, R: CryptoRngCore>(rng: &mut R, val: &T) -> (Commitment, Randomizer) {
    let r = Randomizer::random(rng);
    let c = Commitment::compute(val, &r);
    (c, r)
}

/// The output of a generic hash function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Digest([u8; HASH_LEN]);

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Hash some value to produce a short digest.
pub fn hash<T: Serialize>(val: &T) -> Digest {
    let mut meow = Meow::new(HASH_LABEL);
    meow.ad(&[], false);
    encode_writer(&mut MeowWriter(&mut meow), val);

    let mut out = [0u8; HASH_LEN];
    meow.prf(&mut out, false);

    Digest(out)
}

#[cfg(test)]
mod test {
    use super::*;
    use rand_core::OsRng;

    #[test]
    fn test_commitment_opens_only_to_its_value() {
        let (c, r) = commit(&mut OsRng, &(1u32, "dealer"));
        assert!(c.check(&(1u32, "dealer"), &r));
        assert!(!c.check(&(2u32, "dealer"), &r));

        let (_, other_r) = commit(&mut OsRng, &0u8);
        assert!(!c.check(&(1u32, "dealer"), &other_r));
    }

    #[test]
    fn test_hash_is_deterministic() {
        assert_eq!(hash(&[1u8, 2, 3]), hash(&[1u8, 2, 3]));
        assert_ne!(hash(&[1u8, 2, 3]), hash(&[1u8, 2, 4]));
    }
}
