//! Intake events feeding the fetcher's event loop.

use plumo_fetch_api::{
    DynProofRequester, PeerId, Proof, ProofMetadata, Timestamp,
};
use tokio::sync::oneshot;

/// A single proof announcement.
///
/// Created when `notify` reaches the loop, carried through the announced
/// and inflight stages, and dropped when the metadata is imported, times
/// out, or the peer is purged.
pub(crate) struct Announce {
    /// The announcing peer.
    pub peer: PeerId,

    /// The announced proof identity.
    pub metadata: ProofMetadata,

    /// When the peer made the announcement. Used only for timer
    /// scheduling; ordering between events is arrival order at the loop.
    pub announce_time: Timestamp,

    /// How to retrieve the proof from the announcing peer.
    pub requester: DynProofRequester,
}

impl std::fmt::Debug for Announce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Announce")
            .field("peer", &self.peer)
            .field("metadata", &self.metadata)
            .field("announce_time", &self.announce_time)
            .finish_non_exhaustive()
    }
}

/// Events posted by the intake api to the event loop.
#[derive(Debug)]
pub(crate) enum FetchEvent {
    /// A peer announced a proof it claims to have.
    Announce(Announce),

    /// A peer directly propagated a full proof, bypassing announce and
    /// retrieval.
    Inject {
        /// The propagating peer.
        peer: PeerId,
        /// The propagated proof.
        proof: Proof,
    },

    /// A retrieval response arrived from a peer. Proofs with no pending
    /// retrieval attributed to the peer are sent back through `reply` as
    /// residual.
    Response {
        /// The responding peer.
        peer: PeerId,
        /// The proofs the peer delivered.
        proofs: Vec<Proof>,
        /// When the response arrived; becomes the import time of claimed
        /// proofs.
        arrival_time: Timestamp,
        /// Where to send the residual.
        reply: oneshot::Sender<Vec<Proof>>,
    },

    /// Shut the loop down, dropping all pending state.
    Stop,
}
