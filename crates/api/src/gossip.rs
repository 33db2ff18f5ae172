//! Plumo-fetch gossip and peer-sanction types.

use crate::{PeerId, Proof};
use std::sync::Arc;

/// The network side-effects the fetcher needs from its host: announcing
/// imported proofs onward and severing misbehaving peers.
///
/// Both methods are fire-and-forget, invoked from the fetcher's event loop,
/// and must not block. Implementations that need to do real i/o should
/// dispatch to their own tasks and return.
pub trait ProofGossip: 'static + Send + Sync + std::fmt::Debug {
    /// Broadcast a proof to connected peers.
    ///
    /// `propagate` distinguishes a full re-propagation from a mere
    /// availability announcement. The fetcher always passes `false`:
    /// it announces what it imported, it does not flood payloads.
    fn broadcast_proof(&self, proof: &Proof, propagate: bool);

    /// Sever the connection to a peer deemed malicious or irredeemably
    /// unresponsive. Idempotent.
    fn drop_peer(&self, peer: &PeerId);
}

/// Trait-object version of the plumo-fetch gossip interface.
pub type DynProofGossip = Arc<dyn ProofGossip>;
