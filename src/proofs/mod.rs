//! Zero-knowledge proofs used by the protocols.
//!
//! All of these are sigma protocols made non-interactive with a Fiat-Shamir
//! transcript. Callers fork the transcript per prover, so a proof can't be replayed
//! on behalf of another participant.
pub mod dlog;
pub mod dlogeq;
