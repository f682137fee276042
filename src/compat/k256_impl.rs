#[cfg(any(feature = "k256", test))]
mod k256_impl {
    use super::super::*;

    use elliptic_curve::point::{AffineCoordinates, DecompressPoint};
    use k256::{AffinePoint, FieldBytes, Secp256k1};
    use subtle::Choice;

    /// How many random x-coordinates we try before giving up on an embedding.
    ///
    /// Each candidate lands on the curve with probability about one half.
    const EMBED_ATTEMPTS: usize = 256;

    impl CSCurve for Secp256k1 {
        const NAME: &'static [u8] = b"Secp256k1";
        // One length byte, the payload, and at least one byte of randomness.
        const EMBED_LEN: usize = 30;

        fn serialize_point<S: Serializer>(
            point: &Self::AffinePoint,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            point.serialize(serializer)
        }

        fn deserialize_point<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Self::AffinePoint, D::Error> {
            Self::AffinePoint::deserialize(deserializer)
        }

        fn embed(data: &[u8], rng: &mut impl CryptoRngCore) -> Option<Self::AffinePoint> {
            if data.len() > Self::EMBED_LEN {
                return None;
            }
            let mut x = FieldBytes::default();
            for _ in 0..EMBED_ATTEMPTS {
                rng.fill_bytes(&mut x);
                // A small first byte also keeps x below the field modulus.
                x[0] = data.len() as u8;
                x[1..1 + data.len()].copy_from_slice(data);
                let candidate: Option<AffinePoint> =
                    AffinePoint::decompress(&x, Choice::from(0)).into();
                if candidate.is_some() {
                    return candidate;
                }
            }
            None
        }

        fn extract(point: &Self::AffinePoint) -> Option<Vec<u8>> {
            if *point == AffinePoint::IDENTITY || bool::from(point.y_is_odd()) {
                return None;
            }
            let x = point.x();
            let len = usize::from(x[0]);
            if len > Self::EMBED_LEN {
                return None;
            }
            Some(x[1..1 + len].to_vec())
        }
    }

}
