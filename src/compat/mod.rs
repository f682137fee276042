use elliptic_curve::{CurveArithmetic, PrimeCurve};
use rand_core::CryptoRngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

mod k256_impl;

/// Represents a curve suitable for holding long-term secrets.
///
/// This is the trait that any curve usable in this library must implement.
/// This library does provide a feature-gated implementation for secp256k1
/// itself, beyond that you'll need to implement this trait yourself.
///
/// The bulk of the trait are the bounds requiring a curve according
/// to RustCrypto's traits.
///
/// Beyond that, we also require that curves have a name, for domain separation,
/// a way to serialize points with serde, and a way to carry a short byte string
/// inside of a point, which is how symmetric keys get encrypted.
pub trait CSCurve: PrimeCurve + CurveArithmetic {
    const NAME: &'static [u8];

    /// The maximum number of bytes [CSCurve::embed] can carry.
    const EMBED_LEN: usize;

    /// Serialize a point with serde.
    fn serialize_point<S: Serializer>(
        point: &Self::AffinePoint,
        serializer: S,
    ) -> Result<S::Ok, S::Error>;

    /// Deserialize a point with serde.
    fn deserialize_point<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Self::AffinePoint, D::Error>;

    /// Embed some data into a point.
    ///
    /// Returns `None` if the data is longer than [CSCurve::EMBED_LEN].
    fn embed(data: &[u8], rng: &mut impl CryptoRngCore) -> Option<Self::AffinePoint>;

    /// Extract the data embedded into a point.
    ///
    /// Points which weren't produced by [CSCurve::embed] usually yield `None`.
    fn extract(point: &Self::AffinePoint) -> Option<Vec<u8>>;
}

#[derive(Clone, Copy)]
pub(crate) struct SerializablePoint<C: CSCurve>(C::AffinePoint);

impl<C: CSCurve> SerializablePoint<C> {
    pub fn to_projective(self) -> C::ProjectivePoint {
        self.0.into()
    }

    pub fn from_projective(point: &C::ProjectivePoint) -> Self {
        Self((*point).into())
    }

    pub fn from_affine(point: &C::AffinePoint) -> Self {
        Self(*point)
    }
}

impl<C: CSCurve> Serialize for SerializablePoint<C> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        C::serialize_point(&self.0, serializer)
    }
}

impl<'de, C: CSCurve> Deserialize<'de> for SerializablePoint<C> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let affine = C::deserialize_point(deserializer)?;
        Ok(Self(affine))
    }
}
