//! Plumo-fetch proof store types.

use crate::{PfResult, Proof, ProofMetadata};
use std::sync::Arc;

/// The api a host must implement to provide proof persistence for the
/// fetcher.
///
/// Both methods are called from the fetcher's event loop and must be fast:
/// an implementation backed by slow media should front itself with a cache
/// or an in-memory index.
pub trait ProofStore: 'static + Send + Sync + std::fmt::Debug {
    /// Retrieve a locally stored proof, if any. Read-only.
    fn get_proof(&self, metadata: &ProofMetadata) -> Option<Proof>;

    /// Persist verified proofs.
    ///
    /// A returned error is terminal for the affected proofs within the
    /// fetcher's lifetime: the fetcher logs and continues, it does not
    /// re-queue.
    fn insert_proofs(&self, proofs: Vec<Proof>) -> PfResult<()>;
}

/// Trait-object version of the plumo-fetch proof store.
pub type DynProofStore = Arc<dyn ProofStore>;
