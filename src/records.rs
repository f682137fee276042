//! Identifiers, and the records a ledger stores for long-term secrets.
use std::fmt;

use elliptic_curve::{Field, Group};
use rand_core::CryptoRngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    compat::{CSCurve, SerializablePoint},
    error::LtsError,
    ledger::ContractKind,
    roster::Roster,
    serde::{decode, deserialize_point, encode, encode_named, serialize_point},
};

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
        pub struct $name(pub [u8; 32]);

        impl $name {
            /// Generate a fresh random identifier.
            pub fn random(rng: &mut impl CryptoRngCore) -> Self {
                let mut out = [0u8; 32];
                rng.fill_bytes(&mut out);
                Self(out)
            }

            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }
    };
}

define_id!(
    /// Identifies an instance stored on a ledger.
    InstanceId
);
define_id!(
    /// Identifies a ledger.
    LedgerId
);
define_id!(
    /// Identifies the access-control rules of a data owner.
    DarcId
);
define_id!(
    /// Binds one write and one read to a single decryption statement.
    Dkid
);

/// The roster a long-term secret is shared among.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "C: CSCurve")]
pub struct LtsInstanceInfo<C: CSCurve> {
    pub roster: Roster<C>,
}

/// A symmetric key, encrypted under the public key of a long-term secret.
///
/// With `u = s * G` and `c = K + s * X`, where `K` embeds the key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "C: CSCurve")]
pub struct Write<C: CSCurve> {
    #[serde(
        serialize_with = "serialize_point::<C, _>",
        deserialize_with = "deserialize_point::<C, _>"
    )]
    pub u: C::AffinePoint,
    #[serde(
        serialize_with = "serialize_point::<C, _>",
        deserialize_with = "deserialize_point::<C, _>"
    )]
    pub c: C::AffinePoint,
    pub lts_instance_id: InstanceId,
    pub darc: DarcId,
}

impl<C: CSCurve> Write<C> {
    /// Encrypt a key under the public key `x` of the given instance.
    pub fn new(
        rng: &mut impl CryptoRngCore,
        lts_instance_id: InstanceId,
        darc: DarcId,
        x: &C::AffinePoint,
        key: &[u8],
    ) -> Result<Self, LtsError> {
        let big_k = C::embed(key, rng).ok_or(LtsError::KeyTooLong {
            len: key.len(),
            max: C::EMBED_LEN,
        })?;
        let s = C::Scalar::random(&mut *rng);
        let u = C::ProjectivePoint::generator() * s;
        let c = C::ProjectivePoint::from(big_k) + C::ProjectivePoint::from(*x) * s;
        Ok(Self {
            u: u.into(),
            c: c.into(),
            lts_instance_id,
            darc,
        })
    }
}

/// A request to have the key of some write re-encrypted under `xc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "C: CSCurve")]
pub struct Read<C: CSCurve> {
    pub write: InstanceId,
    #[serde(
        serialize_with = "serialize_point::<C, _>",
        deserialize_with = "deserialize_point::<C, _>"
    )]
    pub xc: C::AffinePoint,
}

impl Dkid {
    /// Derive the statement identifier of a read, and the write it names.
    pub fn compute<C: CSCurve>(write: &Write<C>, read: &Read<C>) -> Self {
        let mut h = Sha256::new();
        h.update(read.write.as_bytes());
        h.update(encode(&SerializablePoint::<C>::from_affine(&read.xc)));
        h.update(encode(&SerializablePoint::<C>::from_affine(&write.u)));
        Self(h.finalize().into())
    }
}

/// Check that a read names the write it is presented with.
pub fn check_pair<C: CSCurve>(
    write_id: &InstanceId,
    read: &Read<C>,
) -> Result<(), LtsError> {
    if read.write != *write_id {
        return Err(LtsError::ReadWriteMismatch {
            expected: *write_id,
            found: read.write,
        });
    }
    Ok(())
}

/// A record decoded according to the contract which stored it.
#[derive(Debug, Clone)]
pub enum Record<C: CSCurve> {
    LtsInstanceInfo(LtsInstanceInfo<C>),
    Write(Write<C>),
    Read(Read<C>),
}

impl<C: CSCurve> Record<C> {
    pub fn kind(&self) -> ContractKind {
        match self {
            Record::LtsInstanceInfo(_) => ContractKind::LongTermSecret,
            Record::Write(_) => ContractKind::Write,
            Record::Read(_) => ContractKind::Read,
        }
    }

    /// Decode the value stored by a contract of some kind.
    pub fn decode(kind: ContractKind, value: &[u8]) -> Result<Self, LtsError> {
        let what = kind.id();
        let wrap = |source| LtsError::Decode { what, source };
        Ok(match kind {
            ContractKind::LongTermSecret => Record::LtsInstanceInfo(decode(value).map_err(wrap)?),
            ContractKind::Write => Record::Write(decode(value).map_err(wrap)?),
            ContractKind::Read => Record::Read(decode(value).map_err(wrap)?),
        })
    }

    /// Encode the record the way the ledger stores it.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Record::LtsInstanceInfo(x) => encode_named(x),
            Record::Write(x) => encode_named(x),
            Record::Read(x) => encode_named(x),
        }
    }
}
