//! Plumo-fetch proof verification types.

use crate::Proof;
use std::sync::Arc;

/// Cryptographic validation of a received proof.
///
/// Called from the fetcher's event loop right before a proof is imported.
/// Must be synchronous and non-blocking; the fetcher treats a `false` as
/// evidence of peer misbehavior.
pub trait ProofVerifier: 'static + Send + Sync + std::fmt::Debug {
    /// Verify the given proof.
    fn verify(&self, proof: &Proof) -> bool;
}

/// Trait-object version of the plumo-fetch proof verifier.
pub type DynProofVerifier = Arc<dyn ProofVerifier>;
