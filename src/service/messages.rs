//! The requests a node serves, and its replies.
use serde::{Deserialize, Serialize};

use crate::{
    compat::CSCurve,
    cosi::{verify_signature, CollectiveSignature},
    error::LtsError,
    ledger::Proof,
    records::{Dkid, InstanceId, LedgerId},
    recovery::{recover_key, recover_reencrypted_key},
    serde::{deserialize_point, serialize_point},
    store::LtsPublic,
};

/// The answer to the creation of a long-term secret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "C: CSCurve")]
pub struct CreateLtsReply<C: CSCurve> {
    pub ledger_id: LedgerId,
    pub instance_id: InstanceId,
    #[serde(
        serialize_with = "serialize_point::<C, _>",
        deserialize_with = "deserialize_point::<C, _>"
    )]
    pub x: C::AffinePoint,
}

/// The answer to a resharing: every node which committed, and the new epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReshareLtsReply {
    pub completed: Vec<String>,
    pub epoch: u64,
}

/// What a node needs to join a resharing.
///
/// `previous` comes from a node which holds the current sharing. Newcomers
/// trust it only as far as the protocol checks it: the public key must come out unchanged.
#[derive(Debug, Clone)]
pub struct ReshareRequest<C: CSCurve> {
    /// Proof of the roster the secret moves to.
    pub proof: Proof,
    pub previous: LtsPublic<C>,
    /// The current holders which will deal.
    pub dealers: Vec<C::AffinePoint>,
}

/// A request to re-encrypt the key of a write for a reader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptKey {
    pub read: Proof,
    pub write: Proof,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "C: CSCurve")]
pub struct DecryptKeyReply<C: CSCurve> {
    #[serde(
        serialize_with = "serialize_point::<C, _>",
        deserialize_with = "deserialize_point::<C, _>"
    )]
    pub x: C::AffinePoint,
    #[serde(
        serialize_with = "serialize_point::<C, _>",
        deserialize_with = "deserialize_point::<C, _>"
    )]
    pub xhat_enc: C::AffinePoint,
    #[serde(
        serialize_with = "serialize_point::<C, _>",
        deserialize_with = "deserialize_point::<C, _>"
    )]
    pub c: C::AffinePoint,
}

impl<C: CSCurve> DecryptKeyReply<C> {
    /// Recover the key with the private key of the read.
    pub fn recover_key(&self, xc: &C::Scalar) -> Result<Vec<u8>, LtsError> {
        recover_reencrypted_key::<C>(xc, &self.x, &self.xhat_enc, &self.c)
    }
}

/// A decryption request which the roster answers with a collective signature.
///
/// `dkid` must recompute from the two records. With `is_reenc` unset, the
/// key comes back without the reader's blinding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptKeyNt {
    pub dkid: Dkid,
    pub is_reenc: bool,
    pub write: Proof,
    pub read: Proof,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "C: CSCurve")]
pub struct DecryptKeyNtReply<C: CSCurve> {
    #[serde(
        serialize_with = "serialize_point::<C, _>",
        deserialize_with = "deserialize_point::<C, _>"
    )]
    pub x: C::AffinePoint,
    #[serde(
        serialize_with = "serialize_point::<C, _>",
        deserialize_with = "deserialize_point::<C, _>"
    )]
    pub xhat_enc: C::AffinePoint,
    #[serde(
        serialize_with = "serialize_point::<C, _>",
        deserialize_with = "deserialize_point::<C, _>"
    )]
    pub c: C::AffinePoint,
    pub signature: CollectiveSignature<C>,
}

impl<C: CSCurve> DecryptKeyNtReply<C> {
    /// Check that the roster signed off on this answer to the statement `dkid`.
    pub fn verify(&self, dkid: &Dkid, publics: &[C::AffinePoint]) -> Result<(), LtsError> {
        verify_signature(dkid, &self.xhat_enc, &self.signature, publics)
    }

    /// Recover the key of a re-encryption, with the private key of the read.
    pub fn recover_key(&self, xc: &C::Scalar) -> Result<Vec<u8>, LtsError> {
        recover_reencrypted_key::<C>(xc, &self.x, &self.xhat_enc, &self.c)
    }

    /// Recover the key of a base decryption.
    pub fn recover_base_key(&self) -> Result<Vec<u8>, LtsError> {
        recover_key::<C>(&self.xhat_enc, &self.c)
    }
}
