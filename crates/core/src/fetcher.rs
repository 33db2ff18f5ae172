//! The proof fetcher: accepts proof announcements and direct propagations
//! from peers, retrieves announced proofs, and imports them into local
//! storage exactly once.
//!
//! It consists of multiple parts:
//! - Intake api that turns external calls into events on a bounded channel
//! - A single event-loop task that owns all scheduling state
//! - An announce tracker mapping proof identities to announcing peers and
//!   pending retrievals
//! - An import queue holding received proofs until their import time
//!
//! ### Scheduling
//!
//! An announced proof waits out a short gather window, so announcements of
//! the same proof from several peers coalesce into a single retrieval. One
//! announcer is selected per proof (pseudo-randomly, preferring the least
//! loaded peer) and the selected peers' requesters are invoked with their
//! batches. Responses come back through `filter_proofs`; claimed proofs
//! move to the import queue and are popped in import-time order for
//! verify, broadcast and insert. A retrieval that produces no response
//! within the fetch timeout drops the unresponsive peer.
//!
//! ### Dedup guarantees
//!
//! However many peers announce or propagate a proof, at most one retrieval
//! is issued for it and it reaches the store at most once. Late
//! announcements attach to the pending retrieval as attribution only, and
//! everything already queued, imported, or stored is discarded on intake.

use crate::fetcher::{
    event::{Announce, FetchEvent},
    queue::{ImportQueue, PushOutcome},
    tracker::AnnounceTracker,
};
use plumo_fetch_api::{
    config::Config, BoxFut, DynFetchObserver, DynProofFetcher,
    DynProofFetcherFactory, DynProofGossip, DynProofRequester, DynProofStore,
    DynProofVerifier, PeerId, PfError, PfResult, Proof, ProofFetcher,
    ProofFetcherFactory, ProofMetadata, Timestamp,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

mod event;
mod queue;
mod tracker;

#[cfg(test)]
mod test;

const MOD_NAME: &str = "proofFetch";

/// Capacity of the intake channel feeding the event loop. Intake calls
/// fail with `QueueFull` once this many events are waiting.
const EVENT_CHANNEL_CAPACITY: usize = 4096;

/// ProofFetch configuration types.
pub mod config {
    use std::time::Duration;

    /// Configuration parameters for [ProofFetchFactory](super::ProofFetchFactory).
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    pub struct ProofFetchConfig {
        /// Maximum age of an announcement before its retrieval is
        /// triggered. Default: 500 ms.
        pub arrive_timeout_ms: u64,

        /// Tolerance for batching announcements of the same proof that
        /// arrive near-simultaneously from different peers. Default: 100 ms.
        pub gather_slack_ms: u64,

        /// Maximum wait for a retrieval response before the peer is
        /// declared unresponsive and dropped. Default: 5000 ms.
        pub fetch_timeout_ms: u64,

        /// Bound on queued proof imports, per delivering peer and in
        /// total. Default: 64.
        pub proof_limit: u32,

        /// Global bound on the import queue. Default: 64.
        pub max_queue_dist: u32,

        /// Per-peer bound on outstanding announcements. Default: 256.
        pub hash_limit: u32,
    }

    impl Default for ProofFetchConfig {
        fn default() -> Self {
            Self {
                arrive_timeout_ms: 500,
                gather_slack_ms: 100,
                fetch_timeout_ms: 5000,
                proof_limit: 64,
                max_queue_dist: 64,
                hash_limit: 256,
            }
        }
    }

    impl ProofFetchConfig {
        /// Maximum age of an announcement before its retrieval is
        /// triggered.
        pub fn arrive_timeout(&self) -> Duration {
            Duration::from_millis(self.arrive_timeout_ms)
        }

        /// Tolerance for batching near-simultaneous announcements.
        pub fn gather_slack(&self) -> Duration {
            Duration::from_millis(self.gather_slack_ms)
        }

        /// Maximum wait for a retrieval response.
        pub fn fetch_timeout(&self) -> Duration {
            Duration::from_millis(self.fetch_timeout_ms)
        }

        /// How long an announcement sits before graduating to a
        /// retrieval: the arrive timeout less the gather slack.
        pub(crate) fn gather_delay(&self) -> Duration {
            self.arrive_timeout()
                .saturating_sub(self.gather_slack())
        }
    }

    /// Module-level configuration for ProofFetch.
    #[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    pub struct ProofFetchModConfig {
        /// ProofFetch configuration.
        pub proof_fetch: ProofFetchConfig,
    }

    impl plumo_fetch_api::config::ModConfig for ProofFetchModConfig {}
}

pub use config::*;

/// A production-ready proof fetcher module.
#[derive(Debug)]
pub struct ProofFetchFactory {}

impl ProofFetchFactory {
    /// Construct a new ProofFetchFactory.
    pub fn create() -> DynProofFetcherFactory {
        Arc::new(Self {})
    }
}

impl ProofFetcherFactory for ProofFetchFactory {
    fn default_config(&self, config: &mut Config) -> PfResult<()> {
        config.add_default_module_config::<ProofFetchModConfig>(
            MOD_NAME.to_string(),
        )
    }

    fn create(
        &self,
        config: &Config,
        store: DynProofStore,
        verifier: DynProofVerifier,
        gossip: DynProofGossip,
        observer: DynFetchObserver,
    ) -> PfResult<DynProofFetcher> {
        let config: ProofFetchModConfig =
            config.get_module_config(MOD_NAME)?;
        let out: DynProofFetcher = Arc::new(ProofFetch::new(
            config.proof_fetch,
            store,
            verifier,
            gossip,
            observer,
        ));
        Ok(out)
    }
}

enum RunState {
    Idle {
        intake_rx: mpsc::Receiver<FetchEvent>,
        fetch_loop: FetchLoop,
    },
    Running(JoinHandle<()>),
    Stopped(Option<JoinHandle<()>>),
}

/// The reference [ProofFetcher] implementation.
///
/// All scheduling state lives in a single task spawned by
/// [ProofFetcher::start]; the handle only posts events to it.
pub struct ProofFetch {
    intake_tx: mpsc::Sender<FetchEvent>,
    run_state: Mutex<RunState>,
}

impl std::fmt::Debug for ProofFetch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &*self.run_state.lock().unwrap() {
            RunState::Idle { .. } => "idle",
            RunState::Running(_) => "running",
            RunState::Stopped(_) => "stopped",
        };
        f.debug_struct("ProofFetch").field("state", &state).finish()
    }
}

impl ProofFetch {
    /// Construct a fetcher around the host's collaborators. The event
    /// loop does not run until [ProofFetcher::start] is called; intake
    /// posted before then is buffered up to the channel capacity.
    pub fn new(
        config: ProofFetchConfig,
        store: DynProofStore,
        verifier: DynProofVerifier,
        gossip: DynProofGossip,
        observer: DynFetchObserver,
    ) -> Self {
        let (intake_tx, intake_rx) =
            mpsc::channel::<FetchEvent>(EVENT_CHANNEL_CAPACITY);
        let fetch_loop =
            FetchLoop::new(config, store, verifier, gossip, observer);
        Self {
            intake_tx,
            run_state: Mutex::new(RunState::Idle {
                intake_rx,
                fetch_loop,
            }),
        }
    }

    fn post(&self, event: FetchEvent) -> PfResult<()> {
        self.intake_tx.try_send(event).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => PfError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => {
                PfError::other("proof fetcher is stopped")
            }
        })
    }
}

impl ProofFetcher for ProofFetch {
    fn start(&self) -> PfResult<()> {
        let mut lock = self.run_state.lock().unwrap();
        match std::mem::replace(&mut *lock, RunState::Stopped(None)) {
            RunState::Idle {
                intake_rx,
                fetch_loop,
            } => {
                *lock = RunState::Running(tokio::task::spawn(
                    fetch_loop.run(intake_rx),
                ));
                Ok(())
            }
            running @ RunState::Running(_) => {
                *lock = running;
                Ok(())
            }
            stopped @ RunState::Stopped(_) => {
                *lock = stopped;
                Err(PfError::other(
                    "proof fetcher cannot be restarted after stop",
                ))
            }
        }
    }

    fn stop(&self) {
        let mut lock = self.run_state.lock().unwrap();
        match std::mem::replace(&mut *lock, RunState::Stopped(None)) {
            RunState::Running(task) => {
                if self.post(FetchEvent::Stop).is_ok() {
                    *lock = RunState::Stopped(Some(task));
                } else {
                    // intake saturated, the loop cannot hear the signal
                    task.abort();
                }
            }
            RunState::Idle { .. } => {}
            stopped @ RunState::Stopped(_) => *lock = stopped,
        }
    }

    fn notify(
        &self,
        peer: PeerId,
        metadata: ProofMetadata,
        announce_time: Timestamp,
        requester: DynProofRequester,
    ) -> PfResult<()> {
        self.post(FetchEvent::Announce(Announce {
            peer,
            metadata,
            announce_time,
            requester,
        }))
    }

    fn enqueue(&self, peer: PeerId, proof: Proof) -> PfResult<()> {
        self.post(FetchEvent::Inject { peer, proof })
    }

    fn filter_proofs(
        &self,
        peer: PeerId,
        proofs: Vec<Proof>,
        arrival_time: Timestamp,
    ) -> BoxFut<'_, Vec<Proof>> {
        Box::pin(async move {
            let (reply, reply_rx) = oneshot::channel();
            let event = FetchEvent::Response {
                peer,
                proofs: proofs.clone(),
                arrival_time,
                reply,
            };
            if self.intake_tx.send(event).await.is_err() {
                // loop is gone, nothing gets claimed
                return proofs;
            }
            match reply_rx.await {
                Ok(residual) => residual,
                Err(_) => proofs,
            }
        })
    }
}

impl Drop for ProofFetch {
    fn drop(&mut self) {
        if let Ok(state) = self.run_state.get_mut() {
            match state {
                RunState::Running(task) => task.abort(),
                RunState::Stopped(Some(task)) => task.abort(),
                _ => {}
            }
        }
    }
}

/// The event loop's state. Owned by the loop task; nothing else mutates
/// it.
struct FetchLoop {
    config: ProofFetchConfig,
    store: DynProofStore,
    verifier: DynProofVerifier,
    gossip: DynProofGossip,
    observer: DynFetchObserver,
    tracker: AnnounceTracker,
    queue: ImportQueue,
    completed: HashSet<ProofMetadata>,
    gather_cycle: u64,
}

impl FetchLoop {
    fn new(
        config: ProofFetchConfig,
        store: DynProofStore,
        verifier: DynProofVerifier,
        gossip: DynProofGossip,
        observer: DynFetchObserver,
    ) -> Self {
        let queue = ImportQueue::new(
            config.max_queue_dist as usize,
            config.proof_limit as usize,
        );
        Self {
            config,
            store,
            verifier,
            gossip,
            observer,
            tracker: AnnounceTracker::default(),
            queue,
            completed: HashSet::new(),
            gather_cycle: 0,
        }
    }

    async fn run(mut self, mut intake_rx: mpsc::Receiver<FetchEvent>) {
        tracing::debug!("proof fetcher started");
        loop {
            let gather_at =
                self.tracker.next_gather_at(self.config.gather_delay());
            let expire_at =
                self.tracker.next_expire_at(self.config.fetch_timeout());
            let import_at = self.queue.next_import_at();
            tokio::select! {
                event = intake_rx.recv() => match event {
                    None | Some(FetchEvent::Stop) => break,
                    Some(event) => self.handle_event(event),
                },
                _ = wait_until(gather_at) => self.issue_fetches(),
                _ = wait_until(import_at) => self.import_due(),
                _ = wait_until(expire_at) => self.expire_fetches(),
            }
        }
        tracing::debug!("proof fetcher stopped");
    }

    fn handle_event(&mut self, event: FetchEvent) {
        match event {
            FetchEvent::Announce(announce) => self.handle_announce(announce),
            FetchEvent::Inject { peer, proof } => {
                self.handle_inject(peer, proof)
            }
            FetchEvent::Response {
                peer,
                proofs,
                arrival_time,
                reply,
            } => self.handle_response(peer, proofs, arrival_time, reply),
            FetchEvent::Stop => {}
        }
    }

    fn handle_announce(&mut self, announce: Announce) {
        let metadata = announce.metadata;
        let peer = announce.peer.clone();

        if !metadata.is_valid() {
            tracing::warn!(
                %peer,
                %metadata,
                "peer announced proof with invalid epoch range, dropping peer"
            );
            self.drop_peer(&peer);
            return;
        }
        if self.tracker.announce_count(&peer)
            >= self.config.hash_limit as usize
        {
            tracing::debug!(
                %peer,
                %metadata,
                "peer exceeded outstanding proof announces, discarding"
            );
            return;
        }
        if self.completed.contains(&metadata)
            || self.store.get_proof(&metadata).is_some()
        {
            tracing::trace!(
                %peer,
                %metadata,
                "ignoring announce for already imported proof"
            );
            return;
        }

        // A proof already being fetched or queued gains another potential
        // source here, never a second retrieval.
        if self.tracker.record(announce) {
            self.observer.announce_change(metadata, true);
        }
    }

    fn handle_inject(&mut self, peer: PeerId, proof: Proof) {
        self.enqueue_proof(peer, proof, Timestamp::now());
    }

    fn handle_response(
        &mut self,
        peer: PeerId,
        proofs: Vec<Proof>,
        arrival_time: Timestamp,
        reply: oneshot::Sender<Vec<Proof>>,
    ) {
        let mut matched = Vec::new();
        let mut residual = Vec::new();
        for proof in proofs {
            if self.tracker.is_fetching_from(&proof.metadata, &peer) {
                matched.push(proof);
            } else {
                residual.push(proof);
            }
        }
        tracing::trace!(
            %peer,
            matched = matched.len(),
            residual = residual.len(),
            "filtered retrieval response"
        );
        let _ = reply.send(residual);

        for proof in matched {
            let metadata = proof.metadata;
            self.tracker.finish_fetch(&metadata);
            self.observer.announce_change(metadata, false);
            self.enqueue_proof(peer.clone(), proof, arrival_time);
        }
    }

    /// Graduate every announcement whose gather window has closed into a
    /// retrieval, batched per selected peer.
    fn issue_fetches(&mut self) {
        let now = Timestamp::now();
        self.gather_cycle += 1;
        let mut rng = StdRng::seed_from_u64(self.gather_cycle);
        let mut batches: HashMap<PeerId, (DynProofRequester, Vec<ProofMetadata>)> =
            HashMap::new();

        for (metadata, announces) in
            self.tracker.take_due(now, self.config.gather_delay())
        {
            // satisfied through another path while waiting
            if self.completed.contains(&metadata)
                || self.queue.contains(&metadata)
                || self.store.get_proof(&metadata).is_some()
            {
                self.tracker.retire(&announces);
                self.observer.announce_change(metadata, false);
                continue;
            }
            let chosen =
                self.select_announcer(&announces, &batches, &mut rng);
            let peer = announces[chosen].peer.clone();
            let requester = announces[chosen].requester.clone();
            self.tracker.begin_fetch(metadata, peer.clone(), announces, now);
            batches
                .entry(peer)
                .or_insert_with(|| (requester, Vec::new()))
                .1
                .push(metadata);
        }

        for (peer, (requester, batch)) in batches {
            tracing::trace!(%peer, count = batch.len(), "requesting proofs");
            self.observer.proofs_fetching(&batch);
            if let Err(err) = requester.request_proofs(batch) {
                // the entries stay inflight; the fetch timeout reclaims them
                tracing::warn!(
                    %peer,
                    ?err,
                    "could not dispatch proof request"
                );
            }
        }
    }

    /// Pick the announcement that serves the retrieval: lowest-loaded
    /// announcer first, pseudo-random among equals, deterministic within a
    /// gather cycle.
    fn select_announcer(
        &self,
        announces: &[Announce],
        batches: &HashMap<PeerId, (DynProofRequester, Vec<ProofMetadata>)>,
        rng: &mut StdRng,
    ) -> usize {
        let mut best: Vec<usize> = Vec::new();
        let mut best_load = usize::MAX;
        for (index, announce) in announces.iter().enumerate() {
            let load = self.tracker.fetch_load(&announce.peer)
                + batches
                    .get(&announce.peer)
                    .map(|(_, batch)| batch.len())
                    .unwrap_or(0);
            match load.cmp(&best_load) {
                std::cmp::Ordering::Less => {
                    best_load = load;
                    best.clear();
                    best.push(index);
                }
                std::cmp::Ordering::Equal => best.push(index),
                std::cmp::Ordering::Greater => {}
            }
        }
        best[rng.gen_range(0..best.len())]
    }

    /// Common tail of the inject and response paths: dedup, apply caps,
    /// and queue the proof for import.
    fn enqueue_proof(
        &mut self,
        peer: PeerId,
        proof: Proof,
        import_time: Timestamp,
    ) {
        let metadata = proof.metadata;
        if !metadata.is_valid() {
            tracing::warn!(
                %peer,
                %metadata,
                "peer delivered proof with invalid epoch range, dropping peer"
            );
            self.drop_peer(&peer);
            return;
        }
        if self.completed.contains(&metadata)
            || self.queue.contains(&metadata)
            || self.store.get_proof(&metadata).is_some()
        {
            tracing::trace!(%peer, %metadata, "discarding already known proof");
            return;
        }
        match self.queue.push(peer.clone(), proof, import_time) {
            PushOutcome::Queued => {
                // the import stage owns the metadata now
                if self.tracker.forget(&metadata) {
                    self.observer.announce_change(metadata, false);
                }
                self.observer.queue_change(metadata, true);
            }
            PushOutcome::PeerLimit => {
                tracing::debug!(
                    %peer,
                    %metadata,
                    "peer exceeded queued proof imports, discarding"
                );
            }
            PushOutcome::Full => {
                tracing::debug!(
                    %peer,
                    %metadata,
                    "proof import queue full, discarding"
                );
            }
        }
    }

    /// Import every queued proof whose import time has elapsed.
    fn import_due(&mut self) {
        let now = Timestamp::now();
        for entry in self.queue.pop_due(now) {
            self.observer.queue_change(entry.proof.metadata, false);
            self.import_proof(entry.peer, entry.proof);
        }
    }

    fn import_proof(&mut self, peer: PeerId, proof: Proof) {
        let metadata = proof.metadata;
        self.observer.proof_importing(metadata);

        if !self.verifier.verify(&proof) {
            tracing::warn!(
                %peer,
                %metadata,
                "proof failed verification, dropping peer"
            );
            self.drop_peer(&peer);
            return;
        }

        self.gossip.broadcast_proof(&proof, false);

        self.completed.insert(metadata);
        if self.tracker.forget(&metadata) {
            self.observer.announce_change(metadata, false);
        }

        if let Err(err) = self.store.insert_proofs(vec![proof.clone()]) {
            tracing::warn!(%metadata, ?err, "could not store imported proof");
            return;
        }
        tracing::debug!(%peer, %metadata, "imported proof");
        self.observer.proof_imported(&proof);
    }

    /// Drop every inflight retrieval that outlived the fetch timeout and
    /// sanction the unresponsive peers.
    fn expire_fetches(&mut self) {
        let now = Timestamp::now();
        for (metadata, fetch) in self
            .tracker
            .take_expired(now, self.config.fetch_timeout())
        {
            tracing::warn!(
                peer = %fetch.peer,
                %metadata,
                "proof retrieval timed out, dropping peer"
            );
            self.observer.announce_change(metadata, false);
            self.drop_peer(&fetch.peer);
        }
    }

    /// Sever a misbehaving peer and discard all state attributed to it.
    fn drop_peer(&mut self, peer: &PeerId) {
        self.gossip.drop_peer(peer);
        for metadata in self.tracker.purge_peer(peer) {
            self.observer.announce_change(metadata, false);
        }
        for metadata in self.queue.purge_peer(peer) {
            self.observer.queue_change(metadata, false);
        }
    }
}

/// Sleep until the given deadline, or forever when there is none. Due and
/// past deadlines resolve immediately.
async fn wait_until(deadline: Option<Timestamp>) {
    match deadline {
        Some(deadline) => {
            tokio::time::sleep(deadline.saturating_since(Timestamp::now()))
                .await
        }
        None => std::future::pending::<()>().await,
    }
}
