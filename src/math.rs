use std::ops::{AddAssign, Index};

use elliptic_curve::{Field, Group};
use rand_core::CryptoRngCore;
use serde::{Deserialize, Serialize};

use crate::{
    compat::CSCurve,
    serde::{deserialize_projective_points, serialize_projective_points},
};

/// Represents a polynomial with coefficients in the scalar field of the curve.
pub struct Polynomial<C: CSCurve> {
    /// The coefficients of our polynomial, from 0..size-1.
    coefficients: Vec<C::Scalar>,
}

impl<C: CSCurve> Polynomial<C> {
    /// Generate a random polynomial with a certain number of coefficients.
    #[cfg(test)]
    pub fn random(rng: &mut impl CryptoRngCore, size: usize) -> Self {
        let coefficients = (0..size).map(|_| C::Scalar::random(&mut *rng)).collect();
        Self { coefficients }
    }

    /// Extend a constant to a random polynomial of a certain size.
    ///
    /// This is useful if you want the polynomial to have a certain value, but
    /// otherwise be random.
    pub fn extend_random(rng: &mut impl CryptoRngCore, size: usize, constant: &C::Scalar) -> Self {
        let mut coefficients = Vec::with_capacity(size);
        coefficients.push(*constant);
        for _ in 1..size {
            coefficients.push(C::Scalar::random(&mut *rng));
        }
        Self { coefficients }
    }

    /// Evaluate this polynomial at 0.
    ///
    /// This is much more efficient than evaluating at other points.
    pub fn evaluate_zero(&self) -> C::Scalar {
        self.coefficients.first().copied().unwrap_or(C::Scalar::ZERO)
    }

    /// Evaluate this polynomial at a specific point.
    pub fn evaluate(&self, x: &C::Scalar) -> C::Scalar {
        let mut out = C::Scalar::ZERO;
        for c in self.coefficients.iter().rev() {
            out = out * x + c;
        }
        out
    }

    /// Commit to this polynomial by acting on the generator
    pub fn commit(&self) -> GroupPolynomial<C> {
        let coefficients = self
            .coefficients
            .iter()
            .map(|x| C::ProjectivePoint::generator() * x)
            .collect();
        GroupPolynomial { coefficients }
    }
}

impl<C: CSCurve> Index<usize> for Polynomial<C> {
    type Output = C::Scalar;

    fn index(&self, i: usize) -> &Self::Output {
        &self.coefficients[i]
    }
}

/// A polynomial with group coefficients.
///
/// This is the public face of a secret sharing: evaluating it at a participant
/// gives the commitment `s_i * G` to that participant's share, and at zero the
/// public key itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "C: CSCurve")]
pub struct GroupPolynomial<C: CSCurve> {
    #[serde(
        serialize_with = "serialize_projective_points::<C, _>",
        deserialize_with = "deserialize_projective_points::<C, _>"
    )]
    coefficients: Vec<C::ProjectivePoint>,
}

impl<C: CSCurve> GroupPolynomial<C> {
    /// Evaluate this polynomial at 0.
    ///
    /// This is more efficient than evaluating at an arbitrary point.
    pub fn evaluate_zero(&self) -> C::ProjectivePoint {
        self.coefficients
            .first()
            .copied()
            .unwrap_or(C::ProjectivePoint::identity())
    }

    /// Evaluate this polynomial at a specific value.
    pub fn evaluate(&self, x: &C::Scalar) -> C::ProjectivePoint {
        let mut out = C::ProjectivePoint::identity();
        for c in self.coefficients.iter().rev() {
            out = out * x + c;
        }
        out
    }

    /// Multiply every coefficient by a scalar.
    pub fn scale(&self, s: &C::Scalar) -> Self {
        Self {
            coefficients: self.coefficients.iter().map(|c| *c * s).collect(),
        }
    }

    /// The number of coefficients in this polynomial.
    pub fn len(&self) -> usize {
        self.coefficients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coefficients.is_empty()
    }
}

impl<C: CSCurve> Default for GroupPolynomial<C> {
    fn default() -> Self {
        Self {
            coefficients: Vec::new(),
        }
    }
}

impl<C: CSCurve> AddAssign<&Self> for GroupPolynomial<C> {
    fn add_assign(&mut self, rhs: &Self) {
        if rhs.coefficients.len() > self.coefficients.len() {
            self.coefficients
                .resize(rhs.coefficients.len(), C::ProjectivePoint::identity());
        }
        for (a, b) in self.coefficients.iter_mut().zip(rhs.coefficients.iter()) {
            *a += b;
        }
    }
}
