//! Threshold decryption of a point encrypted under a long-term secret.
//!
//! Every node multiplies the point by its share, proving with a DLEQ proof that it
//! used the share it committed to. Any `threshold` valid partials interpolate
//! to the point multiplied by the secret itself.
//!
//! For a write `(U, C)` and a read key `Xc`, decrypting `U + Xc` yields
//! `XhatEnc = s*X + xc*X`, which only the holder of `xc` can turn into `K = C - s*X`.
use elliptic_curve::Group;
use magikitten::Transcript;
use rand_core::OsRng;
use tracing::warn;

use crate::compat::{CSCurve, SerializablePoint};
use crate::cosi::{self, statement_hash, CollectiveSignature};
use crate::math::GroupPolynomial;
use crate::participants::{ParticipantList, ParticipantMap};
use crate::proofs::{dlog, dlogeq};
use crate::protocol::internal::{make_protocol, Context, SharedChannel};
use crate::protocol::{InitializationError, Participant, Protocol, ProtocolError};
use crate::records::Dkid;
use crate::roster::threshold;
use crate::serde::encode;

const LABEL: &[u8] = b"calypso-lts v0.1.0 decrypt";

type Partial<C> = (SerializablePoint<C>, dlogeq::Proof<C>);

/// The inputs a node needs to take part in a decryption.
#[derive(Debug, Clone)]
pub struct DecryptArguments<C: CSCurve> {
    /// The roster indices of the nodes taking part.
    pub participants: Vec<Participant>,
    pub threshold: usize,
    /// The public polynomial of the sharing, giving the commitment to every share.
    pub commitment: GroupPolynomial<C>,
    pub share: C::Scalar,
    /// The point to multiply by the secret.
    pub base: C::AffinePoint,
}

/// What a node needs to co-sign the result of a decryption.
#[derive(Debug, Clone)]
pub struct SigningArguments<C: CSCurve> {
    pub dkid: Dkid,
    pub signing_key: C::Scalar,
    /// The signing keys of the whole roster, by roster index.
    pub publics: Vec<C::AffinePoint>,
}

async fn do_decrypt<C: CSCurve>(
    chan: &mut SharedChannel,
    participants: &ParticipantList,
    me: Participant,
    args: &DecryptArguments<C>,
) -> Result<C::AffinePoint, ProtocolError> {
    let mut rng = OsRng;
    let mut transcript = Transcript::new(LABEL);
    transcript.message(b"group", C::NAME);
    transcript.message(b"participants", &encode(participants));
    transcript.message(
        b"base",
        &encode(&SerializablePoint::<C>::from_affine(&args.base)),
    );

    let generator = C::ProjectivePoint::generator();
    let big_b = C::ProjectivePoint::from(args.base);
    if args.commitment.evaluate(&me.scalar::<C>()) != generator * args.share {
        return Err(ProtocolError::ShareVerificationFailed(
            "our share does not match the commitment".to_string(),
        ));
    }

    let u_i = big_b * args.share;
    let proof = dlogeq::prove(
        &mut rng,
        &mut transcript.forked(b"dlogeq0", &me.bytes()),
        dlogeq::Statement::<C> {
            public0: &(generator * args.share),
            generator1: &big_b,
            public1: &u_i,
        },
        dlogeq::Witness::<C> { x: &args.share },
    );

    let wait0 = chan.next_waitpoint();
    chan.send_many(
        wait0,
        &(SerializablePoint::<C>::from_projective(&u_i), &proof),
    )
    .await;

    let mut partials = ParticipantMap::new(participants);
    partials.put(me, (SerializablePoint::<C>::from_projective(&u_i), proof));
    while !partials.full() {
        let (from, partial): (_, Partial<C>) = chan.recv(wait0).await?;
        partials.put(from, partial);
    }

    let mut valid = Vec::with_capacity(participants.len());
    for p in participants.iter() {
        let (u_p, proof) = &partials[p];
        let u_p = u_p.to_projective();
        let ok = p == me
            || dlogeq::verify(
                &mut transcript.forked(b"dlogeq0", &p.bytes()),
                dlogeq::Statement::<C> {
                    public0: &args.commitment.evaluate(&p.scalar::<C>()),
                    generator1: &big_b,
                    public1: &u_p,
                },
                proof,
            );
        if ok {
            valid.push(p);
        } else {
            warn!(participant = ?p, "ignoring invalid partial decryption");
        }
    }
    if valid.len() < args.threshold {
        return Err(ProtocolError::QuorumUnavailable {
            needed: args.threshold,
            available: valid.len(),
        });
    }

    let valid_list = ParticipantList::new(&valid).ok_or_else(|| {
        ProtocolError::AssertionFailed("duplicate partial decryptions".to_string())
    })?;
    let mut xhat_enc = C::ProjectivePoint::identity();
    for p in valid_list.iter() {
        xhat_enc += partials[p].0.to_projective() * valid_list.lagrange::<C>(p);
    }
    Ok(xhat_enc.into())
}

fn check_arguments<C: CSCurve>(
    me: Participant,
    args: &DecryptArguments<C>,
) -> Result<ParticipantList, InitializationError> {
    if args.threshold == 0 {
        return Err(InitializationError::BadParameters(
            "threshold cannot be 0".to_string(),
        ));
    }
    if args.participants.len() < args.threshold {
        return Err(InitializationError::BadParameters(format!(
            "{} participants cannot reach a threshold of {}",
            args.participants.len(),
            args.threshold
        )));
    }
    let participants = ParticipantList::new(&args.participants).ok_or_else(|| {
        InitializationError::BadParameters("participant list cannot contain duplicates".to_string())
    })?;
    if !participants.contains(me) {
        return Err(InitializationError::BadParameters(
            "participant list must contain this participant".to_string(),
        ));
    }
    Ok(participants)
}

/// Decrypt a point with the shared secret.
///
/// The output is the base point multiplied by the secret, combined from at least
/// `threshold` partial decryptions which passed verification.
pub fn decrypt<C: CSCurve>(
    me: Participant,
    args: DecryptArguments<C>,
) -> Result<impl Protocol<Output = C::AffinePoint>, InitializationError> {
    let participants = check_arguments(me, &args)?;

    let ctx = Context::new();
    let mut chan = ctx.shared_channel();
    let fut = async move { do_decrypt(&mut chan, &participants, me, &args).await };
    Ok(make_protocol(ctx, fut))
}

/// The output of a decryption which the roster signed off on.
#[derive(Debug, Clone)]
pub struct SignedDecryption<C: CSCurve> {
    pub xhat_enc: C::AffinePoint,
    pub signature: CollectiveSignature<C>,
}

async fn do_decrypt_and_sign<C: CSCurve>(
    mut chan: SharedChannel,
    participants: ParticipantList,
    me: Participant,
    args: DecryptArguments<C>,
    signing: SigningArguments<C>,
) -> Result<SignedDecryption<C>, ProtocolError> {
    let xhat_enc = do_decrypt(&mut chan, &participants, me, &args).await?;

    let message = statement_hash::<C>(&signing.dkid, &xhat_enc);
    let my_signature = cosi::sign(&mut OsRng, &message, me, &signing.signing_key);

    let wait0 = chan.next_waitpoint();
    chan.send_many(wait0, &my_signature).await;

    let mut signatures = ParticipantMap::new(&participants);
    signatures.put(me, my_signature.clone());
    while !signatures.full() {
        let (from, signature): (_, dlog::Proof<C>) = chan.recv(wait0).await?;
        signatures.put(from, signature);
    }

    let mut valid = vec![(me, my_signature)];
    for p in participants.others(me) {
        let signature = &signatures[p];
        let ok = signing
            .publics
            .get(u32::from(p) as usize)
            .map(|public| cosi::verify(&message, p, public, signature))
            .unwrap_or(false);
        if ok {
            valid.push((p, signature.clone()));
        } else {
            warn!(participant = ?p, "ignoring invalid statement signature");
        }
    }
    let needed = threshold(signing.publics.len());
    if valid.len() < needed {
        return Err(ProtocolError::QuorumUnavailable {
            needed,
            available: valid.len(),
        });
    }

    Ok(SignedDecryption {
        xhat_enc,
        signature: CollectiveSignature::new(valid),
    })
}

/// Decrypt a point, and collectively sign the result.
///
/// The signature covers the statement identifier together with the result,
/// so that anybody holding the roster's public keys can check the answer
/// without trusting the node which relayed it.
pub fn decrypt_and_sign<C: CSCurve>(
    me: Participant,
    args: DecryptArguments<C>,
    signing: SigningArguments<C>,
) -> Result<impl Protocol<Output = SignedDecryption<C>>, InitializationError> {
    let participants = check_arguments(me, &args)?;
    if signing.publics.len() < args.participants.len() {
        return Err(InitializationError::BadParameters(
            "every participant needs a signing key".to_string(),
        ));
    }
    let my_public = signing.publics.get(u32::from(me) as usize).copied();
    let expected: C::AffinePoint = (C::ProjectivePoint::generator() * signing.signing_key).into();
    if my_public != Some(expected) {
        return Err(InitializationError::BadParameters(
            "signing key does not match our public key".to_string(),
        ));
    }

    let ctx = Context::new();
    let fut = do_decrypt_and_sign(ctx.shared_channel(), participants, me, args, signing);
    Ok(make_protocol(ctx, fut))
}

#[cfg(test)]
mod test {
    use std::error::Error;

    use k256::{AffinePoint, ProjectivePoint, Scalar, Secp256k1};

    use super::*;
    use crate::math::Polynomial;
    use crate::protocol::{run_protocol, Action, MessageData};

    struct Sharing {
        shares: Vec<Scalar>,
        commitment: GroupPolynomial<Secp256k1>,
        secret: Scalar,
    }

    fn deal(n: usize, t: usize) -> Sharing {
        let secret = Scalar::generate_biased(&mut OsRng);
        let f = Polynomial::<Secp256k1>::extend_random(&mut OsRng, t, &secret);
        let shares = (0..n as u32)
            .map(|i| f.evaluate(&Participant::from(i).scalar::<Secp256k1>()))
            .collect();
        Sharing {
            shares,
            commitment: f.commit(),
            secret,
        }
    }

    fn args(
        sharing: &Sharing,
        who: &[u32],
        t: usize,
        base: AffinePoint,
        me: u32,
    ) -> DecryptArguments<Secp256k1> {
        DecryptArguments {
            participants: who.iter().map(|i| Participant::from(*i)).collect(),
            threshold: t,
            commitment: sharing.commitment.clone(),
            share: sharing.shares[me as usize],
            base,
        }
    }

    #[allow(clippy::type_complexity)]
    fn run_decrypt(
        sharing: &Sharing,
        who: &[u32],
        t: usize,
        base: AffinePoint,
    ) -> Result<Vec<(Participant, AffinePoint)>, Box<dyn Error>> {
        let mut protocols: Vec<(Participant, Box<dyn Protocol<Output = AffinePoint>>)> =
            Vec::new();
        for i in who {
            let p = Participant::from(*i);
            protocols.push((p, Box::new(decrypt(p, args(sharing, who, t, base, *i))?)));
        }
        Ok(run_protocol(protocols)?)
    }

    #[test]
    fn test_any_quorum_decrypts() -> Result<(), Box<dyn Error>> {
        let sharing = deal(5, 4);
        let base = ProjectivePoint::random(&mut OsRng);
        let expected = (base * sharing.secret).to_affine();

        for who in [&[0u32, 1, 2, 3][..], &[1, 2, 3, 4], &[0, 1, 2, 3, 4]] {
            let result = run_decrypt(&sharing, who, 4, base.to_affine())?;
            assert!(result.iter().all(|(_, x)| *x == expected));
        }
        Ok(())
    }

    #[test]
    fn test_too_few_nodes_cannot_start() {
        let sharing = deal(5, 4);
        let base = ProjectivePoint::GENERATOR.to_affine();
        let too_few = args(&sharing, &[0, 1, 2], 4, base, 0);
        assert!(decrypt(Participant::from(0u32), too_few).is_err());
    }

    #[test]
    fn test_wrong_share_is_refused() {
        let sharing = deal(4, 3);
        let base = ProjectivePoint::GENERATOR.to_affine();
        let mut bad = args(&sharing, &[0, 1, 2], 3, base, 0);
        bad.share += Scalar::ONE;
        let mut protocol = decrypt(Participant::from(0u32), bad).unwrap();
        assert!(matches!(
            protocol.poke(),
            Err(ProtocolError::ShareVerificationFailed(_))
        ));
    }

    /// A node which sends a garbage partial, with the proof it made for its real one.
    struct Garbage<P>(P);

    impl<P: Protocol> Protocol for Garbage<P> {
        type Output = P::Output;

        fn poke(&mut self) -> Result<Action<Self::Output>, ProtocolError> {
            Ok(match self.0.poke()? {
                Action::SendMany(m) => {
                    let garbage = ProjectivePoint::random(&mut OsRng).to_affine();
                    let (_, proof): (SerializablePoint<Secp256k1>, dlogeq::Proof<Secp256k1>) =
                        crate::serde::decode(&m[3..]).unwrap();
                    let mut out = m[..3].to_vec();
                    out.extend(encode(&(
                        SerializablePoint::<Secp256k1>::from_affine(&garbage),
                        proof,
                    )));
                    Action::SendMany(out)
                }
                other => other,
            })
        }

        fn message(&mut self, from: Participant, data: MessageData) {
            self.0.message(from, data)
        }
    }

    #[test]
    fn test_invalid_partial_is_skipped() -> Result<(), Box<dyn Error>> {
        let sharing = deal(4, 3);
        let base = ProjectivePoint::random(&mut OsRng);
        let expected = (base * sharing.secret).to_affine();
        let who = [0u32, 1, 2, 3];

        let mut protocols: Vec<(Participant, Box<dyn Protocol<Output = AffinePoint>>)> =
            Vec::new();
        for i in who {
            let p = Participant::from(i);
            let protocol = decrypt(p, args(&sharing, &who, 3, base.to_affine(), i))?;
            if i == 3 {
                protocols.push((p, Box::new(Garbage(protocol))));
            } else {
                protocols.push((p, Box::new(protocol)));
            }
        }
        let result = run_protocol(protocols)?;
        for (p, x) in result {
            if u32::from(p) != 3 {
                assert_eq!(x, expected);
            }
        }
        Ok(())
    }

    #[test]
    fn test_decrypt_and_sign() -> Result<(), Box<dyn Error>> {
        let n = 4;
        let sharing = deal(n, 3);
        let keys: Vec<_> = (0..n).map(|_| Scalar::generate_biased(&mut OsRng)).collect();
        let publics: Vec<_> = keys
            .iter()
            .map(|k| (ProjectivePoint::GENERATOR * k).to_affine())
            .collect();
        let dkid = Dkid([7; 32]);
        let base = ProjectivePoint::random(&mut OsRng);
        let who = [0u32, 1, 3];

        let mut protocols: Vec<(
            Participant,
            Box<dyn Protocol<Output = SignedDecryption<Secp256k1>>>,
        )> = Vec::new();
        for i in who {
            let p = Participant::from(i);
            let signing = SigningArguments {
                dkid,
                signing_key: keys[i as usize],
                publics: publics.clone(),
            };
            let decrypting = args(&sharing, &who, 3, base.to_affine(), i);
            let protocol = decrypt_and_sign(p, decrypting, signing)?;
            protocols.push((p, Box::new(protocol)));
        }
        let result = run_protocol(protocols)?;

        let expected = (base * sharing.secret).to_affine();
        for (_, out) in &result {
            assert_eq!(out.xhat_enc, expected);
            cosi::verify_signature(&dkid, &out.xhat_enc, &out.signature, &publics)?;
            assert_eq!(out.signature.len(), 3);
        }
        Ok(())
    }
}
