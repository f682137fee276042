//! Collective signatures over decryption statements.
//!
//! Each signer produces a Schnorr signature, which is a proof of knowledge of its
//! signing key bound to a transcript containing the statement. A collective
//! signature is the list of these, and counts as valid when enough distinct
//! roster members contributed one.
use std::collections::HashSet;

use elliptic_curve::Group;
use magikitten::Transcript;
use rand_core::CryptoRngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    compat::{CSCurve, SerializablePoint},
    error::LtsError,
    proofs::dlog,
    protocol::Participant,
    records::Dkid,
    roster::threshold,
    serde::encode,
};

const LABEL: &[u8] = b"calypso-lts v0.1.0 statement signature";

/// The message signed for a decryption: binds a statement to its result.
pub fn statement_hash<C: CSCurve>(dkid: &Dkid, xhat_enc: &C::AffinePoint) -> [u8; 32] {
    let mut h = Sha256::new();
    h.update(dkid.as_bytes());
    h.update(encode(&SerializablePoint::<C>::from_affine(xhat_enc)));
    h.finalize().into()
}

fn transcript<C: CSCurve>(message: &[u8], signer: Participant) -> Transcript {
    let mut transcript = Transcript::new(LABEL);
    transcript.message(b"group", C::NAME);
    transcript.message(b"message", message);
    transcript.forked(b"signer", &signer.bytes())
}

/// Sign a message as the roster member `signer`.
pub fn sign<C: CSCurve>(
    rng: &mut impl CryptoRngCore,
    message: &[u8],
    signer: Participant,
    secret: &C::Scalar,
) -> dlog::Proof<C> {
    let public = C::ProjectivePoint::generator() * secret;
    dlog::prove(
        rng,
        &mut transcript::<C>(message, signer),
        dlog::Statement::<C> { public: &public },
        dlog::Witness::<C> { x: secret },
    )
}

/// Verify the signature of a single roster member.
#[must_use]
pub fn verify<C: CSCurve>(
    message: &[u8],
    signer: Participant,
    public: &C::AffinePoint,
    signature: &dlog::Proof<C>,
) -> bool {
    let public = C::ProjectivePoint::from(*public);
    dlog::verify(
        &mut transcript::<C>(message, signer),
        dlog::Statement::<C> { public: &public },
        signature,
    )
}

/// The signatures of several roster members over the same message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "C: CSCurve")]
pub struct CollectiveSignature<C: CSCurve> {
    signatures: Vec<(Participant, dlog::Proof<C>)>,
}

impl<C: CSCurve> CollectiveSignature<C> {
    pub fn new(mut signatures: Vec<(Participant, dlog::Proof<C>)>) -> Self {
        signatures.sort_by_key(|(p, _)| *p);
        Self { signatures }
    }

    pub fn signers(&self) -> impl Iterator<Item = Participant> + '_ {
        self.signatures.iter().map(|(p, _)| *p)
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    /// Check this signature over an arbitrary message.
    pub fn verify(&self, message: &[u8], publics: &[C::AffinePoint]) -> Result<(), LtsError> {
        let mut seen = HashSet::new();
        for (signer, signature) in &self.signatures {
            let public = publics
                .get(u32::from(*signer) as usize)
                .ok_or(LtsError::SignatureInvalid)?;
            if !seen.insert(*signer) || !verify(message, *signer, public, signature) {
                return Err(LtsError::SignatureInvalid);
            }
        }
        if seen.len() < threshold(publics.len()) {
            return Err(LtsError::SignatureInvalid);
        }
        Ok(())
    }
}

/// Check that enough of a roster signed off on the result of a decryption.
pub fn verify_signature<C: CSCurve>(
    dkid: &Dkid,
    xhat_enc: &C::AffinePoint,
    signature: &CollectiveSignature<C>,
    publics: &[C::AffinePoint],
) -> Result<(), LtsError> {
    signature.verify(&statement_hash::<C>(dkid, xhat_enc), publics)
}
