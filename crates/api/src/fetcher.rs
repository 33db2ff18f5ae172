//! Plumo-fetch fetcher types.

use crate::{
    config, BoxFut, DynFetchObserver, DynProofGossip, DynProofStore,
    DynProofVerifier, PeerId, PfResult, Proof, ProofMetadata, Timestamp,
};
use std::sync::Arc;

/// The per-announcement retrieval function.
///
/// A peer announcing a proof supplies the means to go get it. The
/// implementation MUST NOT block: it dispatches its network work
/// asynchronously and returns promptly. The response arrives later through
/// [ProofFetcher::filter_proofs].
pub trait ProofRequester: 'static + Send + Sync {
    /// Request the proofs identified by `batch` from the announcing peer.
    fn request_proofs(&self, batch: Vec<ProofMetadata>) -> PfResult<()>;
}

impl<F> ProofRequester for F
where
    F: Fn(Vec<ProofMetadata>) -> PfResult<()> + 'static + Send + Sync,
{
    fn request_proofs(&self, batch: Vec<ProofMetadata>) -> PfResult<()> {
        self(batch)
    }
}

/// Trait-object version of the plumo-fetch proof requester.
pub type DynProofRequester = Arc<dyn ProofRequester>;

/// Trait for implementing the proof fetcher: accept proof announcements
/// and direct propagations, retrieve announced proofs from peers, and
/// import them into local storage exactly once.
pub trait ProofFetcher: 'static + Send + Sync + std::fmt::Debug {
    /// Spawn the fetcher's event loop.
    ///
    /// Idempotent while the loop is running. The fetcher is single-use:
    /// calling `start` after [ProofFetcher::stop] is an error.
    fn start(&self) -> PfResult<()>;

    /// Shut the event loop down.
    ///
    /// Pending announcements and queued imports are dropped without
    /// import. Safe to call from multiple tasks; at most one stop takes
    /// effect.
    fn stop(&self);

    /// Announce that `peer` claims to have the proof identified by
    /// `metadata`, retrievable via `requester`.
    ///
    /// Non-blocking. Returns [crate::PfError::QueueFull] when the intake
    /// queue is saturated.
    fn notify(
        &self,
        peer: PeerId,
        metadata: ProofMetadata,
        announce_time: Timestamp,
        requester: DynProofRequester,
    ) -> PfResult<()>;

    /// Hand the fetcher a directly propagated proof, bypassing the
    /// announce/retrieve phase.
    ///
    /// Non-blocking. Returns [crate::PfError::QueueFull] when the intake
    /// queue is saturated.
    fn enqueue(&self, peer: PeerId, proof: Proof) -> PfResult<()>;

    /// Offer `peer`'s retrieval response to the fetcher.
    ///
    /// Resolves to the residual: exactly those proofs whose metadata had
    /// no pending retrieval attributed to `peer`, so upstream layers can
    /// route them elsewhere. When the fetcher is not running, everything
    /// is residual.
    fn filter_proofs(
        &self,
        peer: PeerId,
        proofs: Vec<Proof>,
        arrival_time: Timestamp,
    ) -> BoxFut<'_, Vec<Proof>>;
}

/// Trait-object version of the plumo-fetch fetcher.
pub type DynProofFetcher = Arc<dyn ProofFetcher>;

/// A factory for creating ProofFetcher instances.
pub trait ProofFetcherFactory: 'static + Send + Sync + std::fmt::Debug {
    /// Help the host construct a default config for this module.
    fn default_config(&self, config: &mut config::Config) -> PfResult<()>;

    /// Construct a fetcher instance from the host's collaborators.
    fn create(
        &self,
        config: &config::Config,
        store: DynProofStore,
        verifier: DynProofVerifier,
        gossip: DynProofGossip,
        observer: DynFetchObserver,
    ) -> PfResult<DynProofFetcher>;
}

/// Trait-object version of the plumo-fetch fetcher factory.
pub type DynProofFetcherFactory = Arc<dyn ProofFetcherFactory>;
