use std::io::Write;

use elliptic_curve::ScalarPrimitive;
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize, Serializer};

use crate::compat::{CSCurve, SerializablePoint};

/// Encode an arbitrary serializable value into a vec.
pub fn encode<T: Serialize + ?Sized>(val: &T) -> Vec<u8> {
    rmp_serde::encode::to_vec(val).expect("failed to encode value")
}

/// Encode a value with field names, for data other implementations read back.
pub fn encode_named<T: Serialize + ?Sized>(val: &T) -> Vec<u8> {
    rmp_serde::encode::to_vec_named(val).expect("failed to encode value")
}

/// Encode a value behind a fixed header.
pub fn encode_with_header<T: Serialize + ?Sized>(header: &[u8], val: &T) -> Vec<u8> {
    let mut out = header.to_vec();
    encode_writer(&mut out, val);
    out
}

/// Encode a value into a writer.
pub fn encode_writer<T: Serialize + ?Sized, W: Write>(w: &mut W, val: &T) {
    rmp_serde::encode::write(w, val).expect("failed to encode value");
}

/// Decode a value previously produced by one of the encoding functions.
pub fn decode<T: DeserializeOwned>(input: &[u8]) -> Result<T, rmp_serde::decode::Error> {
    rmp_serde::decode::from_slice(input)
}

/// Serialize an arbitrary scalar.
pub fn serialize_scalar<C: CSCurve, S: Serializer>(
    data: &C::Scalar,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let data: ScalarPrimitive<C> = (*data).into();
    data.serialize(serializer)
}

/// Deserialize an arbitrary scalar.
pub fn deserialize_scalar<'de, C: CSCurve, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<C::Scalar, D::Error> {
    let out: ScalarPrimitive<C> = ScalarPrimitive::deserialize(deserializer)?;
    Ok(out.into())
}

/// Serialize an affine point.
pub fn serialize_point<C: CSCurve, S: Serializer>(
    data: &C::AffinePoint,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    C::serialize_point(data, serializer)
}

/// Deserialize an affine point.
pub fn deserialize_point<'de, C: CSCurve, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<C::AffinePoint, D::Error> {
    C::deserialize_point(deserializer)
}

/// Serialize a list of projective points.
pub fn serialize_projective_points<C: CSCurve, S: Serializer>(
    data: &[C::ProjectivePoint],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(data.iter().map(SerializablePoint::<C>::from_projective))
}

/// Deserialize a list of projective points.
pub fn deserialize_projective_points<'de, C: CSCurve, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<C::ProjectivePoint>, D::Error> {
    let points: Vec<SerializablePoint<C>> = Vec::deserialize(deserializer)?;
    Ok(points.into_iter().map(|p| p.to_projective()).collect())
}

/// Serialize a single projective point.
pub fn serialize_projective_point<C: CSCurve, S: Serializer>(
    data: &C::ProjectivePoint,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    SerializablePoint::<C>::from_projective(data).serialize(serializer)
}
