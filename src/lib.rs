//! Calypso LTS keeps *long-term secrets*: key pairs whose private half is
//! Shamir-shared across a roster of nodes, and never reconstructed anywhere.
//!
//! Data owners encrypt symmetric keys under the public key of such a secret.
//! Readers who got a read recorded on a ledger can then have the roster
//! re-encrypt a key towards a key pair they control, without any node
//! learning the key itself.
//!
//! # Warning
//!
//! This is experimental cryptographic software.
//!
//! - The protocols do not have a formal proof of security.
//! - This library has not undergone any form of audit.
//!
//! # Design
//!
//! Three protocols are run among the nodes:
//!
//! - A distributed key generation, producing the public key `X` and one share per node.
//! Every node checks every contribution against public commitments before
//! accepting it, and contributors which fail these checks are excluded.
//! - A resharing, which moves the secret behind `X` to a new roster, possibly
//! with a new threshold, leaving `X` unchanged.
//! - A threshold decryption. For a write `(U, C)` with `U = s*G` and `C = K + s*X`,
//! and a read asking for `K` to be re-encrypted to `Xc = xc*G`, every node `i` publishes
//! `s_i * (U + Xc)` along with a DLEQ proof against its commitment. Any threshold
//! of these combine into `XhatEnc = s*X + xc*X`, which only the reader can turn back into `K`.
//!
//! A variant of the decryption also has the roster sign the result, so that
//! clients don't need to trust the node which answered.
//!
//! The threshold is `n - (n - 1) / 3`, strictly more than two thirds of the roster.
//!
//! ## API Design
//!
//! The protocols are exposed through a sans-IO interface:
//! ```ignore
//! pub trait Protocol {
//!    type Output;
//!
//!    fn poke(&mut self) -> Result<Action<Self::Output>, ProtocolError>;
//!    fn message(&mut self, from: Participant, data: MessageData);
//! }
//! ```
//! Given an instance of this trait, which represents a single party
//! participating in a protocol, you can do two things:
//! - You can provide a new message received from some other party.
//! - You can "poke" the protocol to see if it has some kind of action it wants you to perform, or if an error happened.
//!
//! A [service::Service] wraps this for a single node: it checks requests against
//! ledger proofs, prepares the protocols, and keeps the resulting shares.
//! [service::LocalCluster] runs several nodes in one process.
//!
//! # Generic Curves
//!
//! The support for generic curves is done through a custom `CSCurve` trait,
//! which can be easily implemented for any curve from the
//! RustCrypto [elliptic-curves](https://github.com/RustCrypto/elliptic-curves)
//! suite of libraries, as long as points can carry some data.
//!
//! | Curve | Feature |
//! |-------|---------|
//! |Secp256k1|`k256`|
mod compat;
mod config;
mod cosi;
mod crypto;
mod decrypt;
mod error;
mod keyshare;
pub mod ledger;
mod math;
mod participants;
mod proofs;
pub mod protocol;
pub mod records;
mod recovery;
pub mod roster;
mod serde;
pub mod service;
pub mod store;
#[cfg(test)]
mod test;

pub use compat::CSCurve;
pub use config::Config;
pub use cosi::{statement_hash, verify_signature, CollectiveSignature};
pub use decrypt::{
    decrypt, decrypt_and_sign, DecryptArguments, SignedDecryption, SigningArguments,
};
pub use error::LtsError;
pub use keyshare::{keygen, reshare, KeygenOutput, ReshareArguments, ReshareOutput};
pub use math::GroupPolynomial;
pub use recovery::{recover_key, recover_reencrypted_key};
