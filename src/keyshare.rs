//! Distributed key generation and verifiable resharing.
//!
//! Both protocols are a single round of verifiable secret sharing between
//! *dealers*, who each share a scalar, and *receivers*, who end up holding
//! a share of the combination of all qualified dealings. For key generation
//! dealers and receivers are the same parties, and each dealer shares a fresh
//! random scalar. For resharing the dealers are the old holders, sharing their
//! old share, and the combination is weighted so that the secret is unchanged.
use std::collections::HashMap;

use elliptic_curve::{Field, Group, ScalarPrimitive};
use magikitten::Transcript;
use rand_core::OsRng;
use tracing::warn;

use crate::compat::CSCurve;
use crate::crypto::{commit, hash, Commitment, Digest, Randomizer};
use crate::math::{GroupPolynomial, Polynomial};
use crate::participants::{ParticipantCounter, ParticipantList, ParticipantMap};
use crate::proofs::dlog;
use crate::protocol::internal::{make_protocol, Context, SharedChannel};
use crate::protocol::{InitializationError, Participant, Protocol, ProtocolError};
use crate::serde::encode;

const LABEL: &[u8] = b"calypso-lts v0.1.0 keyshare";

/// What a resharing knows about the sharing it replaces.
struct Previous<C: CSCurve> {
    /// The old roster index of each dealer.
    old_indices: HashMap<Participant, Participant>,
    commitment: GroupPolynomial<C>,
}

/// The public parameters of a single sharing round.
struct Sharing<C: CSCurve> {
    everyone: ParticipantList,
    dealers: ParticipantList,
    receivers: ParticipantList,
    threshold: usize,
    /// The minimum number of qualified dealers.
    quorum: usize,
    previous: Option<Previous<C>>,
}

/// The private state of a dealer.
struct Dealing<C: CSCurve> {
    f: Polynomial<C>,
    big_f: GroupPolynomial<C>,
    commitment: Commitment,
    randomizer: Randomizer,
}

struct KeyshareOutput<C: CSCurve> {
    share: Option<C::Scalar>,
    commitment: GroupPolynomial<C>,
}

/// Check one dealer's reveal and evaluation, returning a reason for rejecting it.
#[allow(clippy::too_many_arguments)]
fn check_dealer<C: CSCurve>(
    transcript: &Transcript,
    sharing: &Sharing<C>,
    me: Participant,
    from: Participant,
    commitment: &Commitment,
    reveal: &(GroupPolynomial<C>, Randomizer, dlog::Proof<C>),
    evaluation: Option<&C::Scalar>,
) -> Result<(), String> {
    let (big_f, randomizer, proof) = reveal;
    if big_f.len() != sharing.threshold {
        return Err("polynomial has the wrong length".to_string());
    }
    if !commitment.check(big_f, randomizer) {
        return Err("commitment did not match revealed polynomial".to_string());
    }
    let statement = dlog::Statement::<C> {
        public: &big_f.evaluate_zero(),
    };
    if !dlog::verify(&mut transcript.forked(b"dlog0", &from.bytes()), statement, proof) {
        return Err("dlog proof failed to verify".to_string());
    }
    if let Some(previous) = &sharing.previous {
        let old_index = previous
            .old_indices
            .get(&from)
            .ok_or_else(|| "dealer held no previous share".to_string())?;
        if big_f.evaluate_zero() != previous.commitment.evaluate(&old_index.scalar::<C>()) {
            return Err("dealt secret does not match the previous share".to_string());
        }
    }
    if sharing.receivers.contains(me) {
        let x = evaluation.ok_or_else(|| "no private share was received".to_string())?;
        if big_f.evaluate(&me.scalar::<C>()) != C::ProjectivePoint::generator() * x {
            return Err("private share does not match the polynomial".to_string());
        }
    }
    Ok(())
}

async fn do_keyshare<C: CSCurve>(
    mut chan: SharedChannel,
    sharing: Sharing<C>,
    me: Participant,
    secret: Option<C::Scalar>,
) -> Result<KeyshareOutput<C>, ProtocolError> {
    let mut rng = OsRng;
    let mut transcript = Transcript::new(LABEL);

    transcript.message(b"group", C::NAME);
    transcript.message(b"participants", &encode(&sharing.everyone));
    transcript.message(b"dealers", &encode(&sharing.dealers));
    transcript.message(b"receivers", &encode(&sharing.receivers));
    // To allow interop between platforms where usize is different!
    transcript.message(b"threshold", &(sharing.threshold as u64).to_be_bytes());

    let dealing = secret.map(|s| {
        let f = Polynomial::<C>::extend_random(&mut rng, sharing.threshold, &s);
        let big_f = f.commit();
        let (commitment, randomizer) = commit(&mut rng, &big_f);
        Dealing {
            f,
            big_f,
            commitment,
            randomizer,
        }
    });

    // Every dealer commits to its polynomial.
    let wait0 = chan.next_waitpoint();
    let mut all_commitments = ParticipantMap::new(&sharing.dealers);
    if let Some(d) = &dealing {
        chan.send_many(wait0, &d.commitment).await;
        all_commitments.put(me, d.commitment);
    }
    while !all_commitments.full() {
        let (from, commitment) = chan.recv(wait0).await?;
        all_commitments.put(from, commitment);
    }

    // Everybody checks that they saw the same commitments.
    let my_confirmation = hash(&all_commitments);
    transcript.message(b"confirmation", my_confirmation.as_ref());

    let wait1 = chan.next_waitpoint();
    chan.send_many(wait1, &my_confirmation).await;

    // Dealers open their commitment, and hand out evaluations.
    let wait2 = chan.next_waitpoint();
    let wait3 = chan.next_waitpoint();
    let mut evaluations = ParticipantMap::new(&sharing.dealers);
    let mut my_reveal = None;
    if let Some(d) = dealing {
        let statement = dlog::Statement::<C> {
            public: &d.big_f.evaluate_zero(),
        };
        let witness = dlog::Witness::<C> {
            x: &d.f.evaluate_zero(),
        };
        let my_proof = dlog::prove(
            &mut rng,
            &mut transcript.forked(b"dlog0", &me.bytes()),
            statement,
            witness,
        );
        chan.send_many(wait2, &(&d.big_f, &d.randomizer, &my_proof))
            .await;

        for p in sharing.receivers.others(me) {
            let x_p: ScalarPrimitive<C> = d.f.evaluate(&p.scalar::<C>()).into();
            chan.send_private(wait3, p, &x_p).await;
        }
        if sharing.receivers.contains(me) {
            evaluations.put(me, d.f.evaluate(&me.scalar::<C>()));
        }
        my_reveal = Some((d.big_f, d.randomizer, my_proof));
    }

    let mut seen = ParticipantCounter::new(&sharing.everyone);
    seen.put(me);
    while !seen.full() {
        let (from, confirmation): (_, Digest) = chan.recv(wait1).await?;
        if !seen.put(from) {
            continue;
        }
        if confirmation != my_confirmation {
            return Err(ProtocolError::AssertionFailed(format!(
                "confirmation from {from:?} did not match expectation"
            )));
        }
    }

    let mut reveals = ParticipantMap::new(&sharing.dealers);
    if let Some(reveal) = my_reveal {
        reveals.put(me, reveal);
    }
    while !reveals.full() {
        let (from, reveal): (_, (GroupPolynomial<C>, Randomizer, dlog::Proof<C>)) =
            chan.recv(wait2).await?;
        reveals.put(from, reveal);
    }

    if sharing.receivers.contains(me) {
        while !evaluations.full() {
            let (from, x_from): (_, ScalarPrimitive<C>) = chan.recv(wait3).await?;
            evaluations.put(from, C::Scalar::from(x_from));
        }
    }

    // Every party judges every dealer on its own.
    let mut bad = Vec::new();
    for from in sharing.dealers.others(me) {
        if let Err(reason) = check_dealer(
            &transcript,
            &sharing,
            me,
            from,
            &all_commitments[from],
            &reveals[from],
            evaluations.get(from),
        ) {
            warn!(dealer = ?from, %reason, "excluding dealer");
            bad.push(from);
        }
    }

    // Complaints are pooled, so everybody ends up with the same qualified set.
    let wait4 = chan.next_waitpoint();
    chan.send_many(wait4, &bad).await;
    seen.clear();
    seen.put(me);
    while !seen.full() {
        let (from, their_bad): (_, Vec<Participant>) = chan.recv(wait4).await?;
        if !seen.put(from) {
            continue;
        }
        bad.extend(their_bad);
    }
    let qualified: Vec<_> = sharing
        .dealers
        .iter()
        .filter(|p| !bad.contains(p))
        .collect();
    if qualified.len() < sharing.quorum {
        return Err(ProtocolError::QuorumUnavailable {
            needed: sharing.quorum,
            available: qualified.len(),
        });
    }

    let weights: Vec<C::Scalar> = match &sharing.previous {
        None => vec![C::Scalar::ONE; qualified.len()],
        Some(previous) => {
            let old: Vec<_> = qualified
                .iter()
                .map(|p| previous.old_indices[p])
                .collect();
            let old_list = ParticipantList::new(&old).ok_or_else(|| {
                ProtocolError::AssertionFailed("dealers share an old index".to_string())
            })?;
            old.iter().map(|i| old_list.lagrange::<C>(*i)).collect()
        }
    };

    let mut big_f = GroupPolynomial::default();
    let mut share = sharing.receivers.contains(me).then_some(C::Scalar::ZERO);
    for (p, lambda) in qualified.iter().zip(weights.iter()) {
        big_f += &reveals[*p].0.scale(lambda);
        if let Some(x) = share.as_mut() {
            *x += evaluations[*p] * lambda;
        }
    }

    if let Some(x) = &share {
        if big_f.evaluate(&me.scalar::<C>()) != C::ProjectivePoint::generator() * x {
            return Err(ProtocolError::ShareVerificationFailed(
                "combined share does not match the combined commitment".to_string(),
            ));
        }
    }

    if let Some(previous) = &sharing.previous {
        if big_f.evaluate_zero() != previous.commitment.evaluate_zero() {
            return Err(ProtocolError::AssertionFailed(
                "new public key does not match old public key".to_string(),
            ));
        }
    }

    Ok(KeyshareOutput {
        share,
        commitment: big_f,
    })
}

/// Represents the output of the key generation protocol.
///
/// This contains our share of the private key, along with the public key,
/// and the public polynomial committing to every share.
#[derive(Debug, Clone)]
pub struct KeygenOutput<C: CSCurve> {
    pub private_share: C::Scalar,
    pub public_key: C::AffinePoint,
    pub commitment: GroupPolynomial<C>,
}

async fn do_keygen<C: CSCurve>(
    chan: SharedChannel,
    participants: ParticipantList,
    me: Participant,
    threshold: usize,
) -> Result<KeygenOutput<C>, ProtocolError> {
    let s_i = C::Scalar::random(&mut OsRng);
    let sharing = Sharing {
        everyone: participants.clone(),
        dealers: participants.clone(),
        receivers: participants,
        threshold,
        quorum: threshold,
        previous: None,
    };
    let out = do_keyshare::<C>(chan, sharing, me, Some(s_i)).await?;
    let private_share = out.share.ok_or_else(|| {
        ProtocolError::AssertionFailed("key generation produced no share".to_string())
    })?;
    Ok(KeygenOutput {
        private_share,
        public_key: out.commitment.evaluate_zero().into(),
        commitment: out.commitment,
    })
}

/// The key generation protocol, with a given threshold.
///
/// This produces a new key pair, such that any set of participants
/// of size `>= threshold` can reconstruct the private key,
/// but no smaller set can do the same.
pub fn keygen<C: CSCurve>(
    participants: &[Participant],
    me: Participant,
    threshold: usize,
) -> Result<impl Protocol<Output = KeygenOutput<C>>, InitializationError> {
    if participants.is_empty() {
        return Err(InitializationError::BadParameters(
            "participant list cannot be empty".to_string(),
        ));
    }
    if threshold == 0 || threshold > participants.len() {
        return Err(InitializationError::BadParameters(format!(
            "threshold must be in 1..={}, found: {threshold}",
            participants.len()
        )));
    }

    let participants = ParticipantList::new(participants).ok_or_else(|| {
        InitializationError::BadParameters("participant list cannot contain duplicates".to_string())
    })?;

    if !participants.contains(me) {
        return Err(InitializationError::BadParameters(
            "participant list must contain this participant".to_string(),
        ));
    }

    let ctx = Context::new();
    let fut = do_keygen(ctx.shared_channel(), participants, me, threshold);
    Ok(make_protocol(ctx, fut))
}

/// The inputs to a resharing.
///
/// Participants of a resharing are numbered by their position in the new roster.
/// Old holders leaving the roster get the identifiers following the new roster.
#[derive(Debug, Clone)]
pub struct ReshareArguments<C: CSCurve> {
    /// Each old holder taking part, with its index in the old roster.
    pub old_holders: Vec<(Participant, Participant)>,
    pub old_threshold: usize,
    /// The public polynomial of the sharing being replaced.
    pub old_commitment: GroupPolynomial<C>,
    pub new_participants: Vec<Participant>,
    pub new_threshold: usize,
    /// Our old share, if we hold one.
    pub my_share: Option<C::Scalar>,
}

/// Represents the output of the resharing protocol.
///
/// Old holders leaving the roster get no share, only the new commitment.
#[derive(Debug, Clone)]
pub struct ReshareOutput<C: CSCurve> {
    pub private_share: Option<C::Scalar>,
    pub commitment: GroupPolynomial<C>,
}

/// The resharing protocol.
///
/// The purpose of this protocol is to take a key shared among one set of participants,
/// and transfer it to another set of participants, potentially with a new threshold.
///
/// At least `old_threshold` old holders must deal honestly for this to succeed.
/// The public key stays the same, and every new share is checked against
/// the new public polynomial.
pub fn reshare<C: CSCurve>(
    me: Participant,
    args: ReshareArguments<C>,
) -> Result<impl Protocol<Output = ReshareOutput<C>>, InitializationError> {
    if args.new_participants.is_empty() {
        return Err(InitializationError::BadParameters(
            "new participant list cannot be empty".to_string(),
        ));
    }
    if args.new_threshold == 0 || args.new_threshold > args.new_participants.len() {
        return Err(InitializationError::BadParameters(format!(
            "threshold must be in 1..={}, found: {}",
            args.new_participants.len(),
            args.new_threshold
        )));
    }
    if args.old_holders.len() < args.old_threshold {
        return Err(InitializationError::BadParameters(
            "not enough old holders to reconstruct private key for resharing".to_string(),
        ));
    }

    let receivers = ParticipantList::new(&args.new_participants).ok_or_else(|| {
        InitializationError::BadParameters(
            "new participant list cannot contain duplicates".to_string(),
        )
    })?;
    let run_ids: Vec<_> = args.old_holders.iter().map(|(p, _)| *p).collect();
    let dealers = ParticipantList::new(&run_ids).ok_or_else(|| {
        InitializationError::BadParameters("old holders cannot contain duplicates".to_string())
    })?;
    let old_indices: HashMap<_, _> = args.old_holders.iter().copied().collect();
    let distinct_old: Vec<_> = old_indices.values().copied().collect();
    if ParticipantList::new(&distinct_old).is_none() {
        return Err(InitializationError::BadParameters(
            "old holders cannot share an old index".to_string(),
        ));
    }

    let everyone = receivers.union(&dealers);
    if !everyone.contains(me) {
        return Err(InitializationError::BadParameters(
            "resharing must contain this participant".to_string(),
        ));
    }
    if dealers.contains(me) != args.my_share.is_some() {
        return Err(InitializationError::BadParameters(
            "exactly the old holders must provide a share".to_string(),
        ));
    }

    let sharing = Sharing {
        everyone,
        dealers,
        receivers,
        threshold: args.new_threshold,
        quorum: args.old_threshold,
        previous: Some(Previous {
            old_indices,
            commitment: args.old_commitment,
        }),
    };

    let my_share = args.my_share;
    let ctx = Context::new();
    let chan = ctx.shared_channel();
    let fut = async move {
        let out = do_keyshare::<C>(chan, sharing, me, my_share).await?;
        Ok(ReshareOutput {
            private_share: out.share,
            commitment: out.commitment,
        })
    };
    Ok(make_protocol(ctx, fut))
}
