//! Turning the answer of a decryption back into key bytes, on the client.
use crate::{compat::CSCurve, error::LtsError};

fn extract<C: CSCurve>(big_k: C::ProjectivePoint) -> Result<Vec<u8>, LtsError> {
    C::extract(&big_k.into())
        .ok_or_else(|| LtsError::Recovery("point does not carry any data".to_string()))
}

/// Recover a key which was re-encrypted under `xc * G`.
///
/// `xhat_enc` is `s*X + xc*X`, so removing `xc*X` leaves the mask of `c`.
pub fn recover_reencrypted_key<C: CSCurve>(
    xc: &C::Scalar,
    x: &C::AffinePoint,
    xhat_enc: &C::AffinePoint,
    c: &C::AffinePoint,
) -> Result<Vec<u8>, LtsError> {
    let xhat_dec = -(C::ProjectivePoint::from(*x) * xc);
    let xhat = C::ProjectivePoint::from(*xhat_enc) + xhat_dec;
    extract::<C>(C::ProjectivePoint::from(*c) - xhat)
}

/// Recover a key from a base decryption, where `xhat_enc` is `s*X` already.
pub fn recover_key<C: CSCurve>(
    xhat_enc: &C::AffinePoint,
    c: &C::AffinePoint,
) -> Result<Vec<u8>, LtsError> {
    extract::<C>(C::ProjectivePoint::from(*c) - C::ProjectivePoint::from(*xhat_enc))
}
