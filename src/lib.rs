//! Crate root: public surface, core aliases, and system-wide invariants
//!
//! This crate compiles SPARQL SELECT/ASK queries over cryptographically
//! signed RDF datasets into constraint programs, and builds the witness
//! data a zero-knowledge proof backend needs to prove that disclosed
//! variable bindings are a valid query solution, without revealing the
//! datasets beyond the disclosed bindings and the fixed architectural
//! parameters.
//!
//! ## Invariants
//!
//! - **Field.** The scalar field is `ark_bn254::Fr` (`F` in this crate),
//!   well above the required 2^250 order. We **forbid unsafe** throughout.
//!
//! - **Determinism.** Every operation is a pure function of its inputs
//!   plus a read-only [`ProofConfig`]. Encodings are bitwise reproducible
//!   across processes; assertion emission order depends only on the
//!   normalized algebra (ordered containers everywhere iteration order is
//!   observable). Prover and verifier MUST run under identical
//!   configurations; the envelope discloses them.
//!
//! - **Single-threaded, synchronous.** No operation suspends and no
//!   global state exists. Coarse-grain parallelism (independent proofs on
//!   independent threads) is safe because everything shared is immutable.
//!
//! - **Failure is precise.** All failure modes surface as one
//!   [`Error`] kind; there is no retry and no partial output.

#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms)]

use std::sync::atomic::{AtomicBool, Ordering};

/// Normalized algebra tree, patterns, and filter expressions.
pub mod algebra;
/// Library surface: signing, proving, verification one-shots.
pub mod api;
/// Proof backend seam and the mock development backend.
pub mod backend;
/// Fixed-depth Merkle commitment over encoded quads.
pub mod commit;
/// Read-only proof configuration.
pub mod config;
/// Deterministic RDF term and quad encoding into the field.
pub mod encode;
/// Disclosure info and the proof envelope (wire format, verification).
pub mod envelope;
/// Crate-wide error taxonomy.
pub mod error;
/// Filter-expression lowering (value equality, comparisons, EBV).
mod filter;
/// Hash oracle abstraction (h2 / h4 / byte hashing).
pub mod hash;
/// Algebra lowering into the constraint program.
pub mod lower;
/// Query normalization into the circuit-accepted subset.
pub mod normalize;
/// Signature scheme seam and the reference Schnorr signer.
pub mod signer;
/// Prover input builder (backtracking quad selection).
pub mod witness;

// ============================================================================
// Canonical aliases and root-level re-exports
// ============================================================================

/// Scalar field used across the crate (BN254).
pub type F = ark_bn254::Fr;

/// A candidate binding: projected variable → RDF term. Variables absent
/// from the map are unconstrained (they may come back unbound).
pub type Binding = std::collections::BTreeMap<oxrdf::Variable, oxrdf::Term>;

pub use crate::config::ProofConfig;
pub use crate::error::{Error, Result};

pub use crate::api::{generate_keypair, prepare_proof, sign_dataset, ProofBundle};
pub use crate::envelope::{info, verify_envelope, DisclosureInfo, Envelope, VerificationResult};

/// The reserved field value disclosed for an optional variable that did
/// not match. It is a fixed small constant outside the image of `h2`
/// (term encodings are hash outputs), so it cannot collide with any
/// legitimate encoding.
pub fn unbound_sentinel() -> F {
    F::from(1u64)
}

/// A dataset committed to a Merkle root and signed under one public key.
///
/// Produced once by [`api::sign_dataset`]; append-only from the prover's
/// viewpoint (changing a leaf requires re-signing).
#[derive(Clone, Debug)]
pub struct SignedDataset {
    /// The canonicalized quads, in committed order.
    pub quads: Vec<oxrdf::Quad>,
    /// The Merkle commitment over the encoded quads.
    pub commitment: commit::Commitment,
    /// Signature over the root under `public_key`.
    pub signature: signer::Signature,
    /// The signing public key (opaque scheme bytes).
    pub public_key: signer::PublicKey,
}

impl SignedDataset {
    /// The signed Merkle root.
    pub fn root(&self) -> F {
        self.commitment.root()
    }
}

/// Cooperative cancellation flag.
///
/// Polled between decisions of the witness search and between tree nodes
/// of the lowering; cancellation aborts the current call with
/// [`Error::Cancelled`] and commits no partial output.
#[derive(Debug, Default)]
pub struct CancelFlag(AtomicBool);

impl CancelFlag {
    /// A fresh, uncancelled flag.
    pub fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// True once [`CancelFlag::cancel`] has been called.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_is_small_and_fixed() {
        assert_eq!(unbound_sentinel(), F::from(1u64));
    }

    #[test]
    fn cancel_flag_latches() {
        let flag = CancelFlag::new();
        assert!(!flag.is_cancelled());
        flag.cancel();
        assert!(flag.is_cancelled());
    }
}
