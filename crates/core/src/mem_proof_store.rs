//! An in-memory proof store.

use plumo_fetch_api::{
    DynProofStore, PfResult, Proof, ProofMetadata, ProofStore,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// An in-memory implementation of the [ProofStore] api.
///
/// Proofs live in a map behind a mutex and vanish with the process. Useful
/// for tests and for nodes that treat proofs as a cache they can re-fetch.
#[derive(Debug, Default)]
pub struct MemProofStore {
    proofs: Mutex<HashMap<ProofMetadata, Proof>>,
}

impl MemProofStore {
    /// Construct a new MemProofStore.
    pub fn create() -> DynProofStore {
        Arc::new(Self::default())
    }

    /// The number of proofs currently stored.
    pub fn proof_count(&self) -> usize {
        self.proofs.lock().unwrap().len()
    }

    /// The metadata of every stored proof, in unspecified order.
    pub fn stored_metadata(&self) -> Vec<ProofMetadata> {
        self.proofs.lock().unwrap().keys().copied().collect()
    }
}

impl ProofStore for MemProofStore {
    fn get_proof(&self, metadata: &ProofMetadata) -> Option<Proof> {
        self.proofs.lock().unwrap().get(metadata).cloned()
    }

    fn insert_proofs(&self, proofs: Vec<Proof>) -> PfResult<()> {
        let mut lock = self.proofs.lock().unwrap();
        for proof in proofs {
            lock.insert(proof.metadata, proof);
        }
        Ok(())
    }
}
