//! Plumo-fetch instrumentation hooks.

use crate::{Proof, ProofMetadata};
use std::sync::Arc;

/// Observation points inside the fetcher, primarily for tests and metrics.
///
/// All methods are invoked from the fetcher's event loop and MUST be
/// non-blocking; forward to a channel or a counter, never wait. Every
/// method has a no-op default body, so implementors override only what
/// they care about.
///
/// An observer is handed to the fetcher once at construction. There is no
/// way to swap it afterwards.
pub trait FetchObserver: 'static + Send + Sync {
    /// A metadata started (`added = true`) or stopped (`added = false`)
    /// being tracked in the announce/fetch stage.
    fn announce_change(&self, metadata: ProofMetadata, added: bool) {
        let _ = (metadata, added);
    }

    /// A proof entered (`added = true`) or left (`added = false`) the
    /// import queue.
    fn queue_change(&self, metadata: ProofMetadata, added: bool) {
        let _ = (metadata, added);
    }

    /// A batched retrieval request is about to be dispatched.
    fn proofs_fetching(&self, batch: &[ProofMetadata]) {
        let _ = batch;
    }

    /// A queued proof is about to be verified and imported.
    fn proof_importing(&self, metadata: ProofMetadata) {
        let _ = metadata;
    }

    /// A proof completed the verify/broadcast/insert sequence.
    fn proof_imported(&self, proof: &Proof) {
        let _ = proof;
    }
}

/// Trait-object version of the plumo-fetch observer.
pub type DynFetchObserver = Arc<dyn FetchObserver>;

/// An observer that observes nothing.
#[derive(Debug)]
pub struct NoopFetchObserver;

impl FetchObserver for NoopFetchObserver {}
