//! Test helpers shared by the plumo-fetch crates.

use plumo_fetch_api::{Proof, ProofMetadata};
use std::collections::HashMap;

/// Enable tracing with the RUST_LOG environment variable.
///
/// This is intended to be used in tests, so it defaults to DEBUG level.
pub fn enable_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing::Level::DEBUG.into())
                .from_env_lossy(),
        )
        .try_init();
}

/// Create `n` proofs whose epoch ranges step forward by one epoch each:
/// `(0, 1, 0)`, `(1, 2, 0)`, and so on.
///
/// Returns the metadata in generation order plus a lookup of the full
/// proofs, which is the shape peer doubles want: the list drives
/// announcements, the map answers retrieval requests.
pub fn make_proofs(
    n: usize,
) -> (Vec<ProofMetadata>, HashMap<ProofMetadata, Proof>) {
    let mut metadata_list = Vec::with_capacity(n);
    let mut proofs = HashMap::with_capacity(n);
    for i in 0..n as u64 {
        let metadata = ProofMetadata::new(i, i + 1, 0);
        metadata_list.push(metadata);
        proofs.insert(metadata, make_proof(metadata));
    }
    (metadata_list, proofs)
}

/// Create a proof with a deterministic dummy payload for the given
/// metadata.
pub fn make_proof(metadata: ProofMetadata) -> Proof {
    let payload = format!(
        "proof:{}:{}:{}",
        metadata.first_epoch, metadata.last_epoch, metadata.version_number
    );
    Proof::new(metadata, bytes::Bytes::from(payload.into_bytes()))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn proofs_step_forward() {
        let (metadata_list, proofs) = make_proofs(3);
        assert_eq!(3, metadata_list.len());
        assert_eq!(3, proofs.len());
        assert_eq!(ProofMetadata::new(1, 2, 0), metadata_list[1]);
        for metadata in &metadata_list {
            assert!(metadata.is_valid());
            assert_eq!(*metadata, proofs[metadata].metadata);
        }
    }

    #[test]
    fn payloads_are_distinct() {
        let (_, proofs) = make_proofs(2);
        let a = &proofs[&ProofMetadata::new(0, 1, 0)];
        let b = &proofs[&ProofMetadata::new(1, 2, 0)];
        assert_ne!(a.proof, b.proof);
    }
}
