
pub(crate) mod harness {
    use crate::fetcher::{ProofFetch, ProofFetchConfig};
    use crate::MemProofStore;
    use plumo_fetch_api::*;
    use plumo_fetch_test_utils::enable_tracing;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Proof store double: a MemProofStore that counts insert
    /// invocations and inserted proofs.
    #[derive(Debug, Default)]
    pub struct TestStore {
        pub inner: MemProofStore,
        pub insert_calls: AtomicUsize,
        pub inserted: AtomicUsize,
    }

    impl ProofStore for TestStore {
        fn get_proof(&self, metadata: &ProofMetadata) -> Option<Proof> {
            self.inner.get_proof(metadata)
        }

        fn insert_proofs(&self, proofs: Vec<Proof>) -> PfResult<()> {
            self.insert_calls.fetch_add(1, Ordering::SeqCst);
            self.inserted.fetch_add(proofs.len(), Ordering::SeqCst);
            self.inner.insert_proofs(proofs)
        }
    }

    /// Verifier double rejecting a configurable set of metadata.
    #[derive(Debug, Default)]
    pub struct TestVerifier {
        rejected: Mutex<Vec<ProofMetadata>>,
    }

    impl TestVerifier {
        pub fn reject(&self, metadata: ProofMetadata) {
            self.rejected.lock().unwrap().push(metadata);
        }
    }

    impl ProofVerifier for TestVerifier {
        fn verify(&self, proof: &Proof) -> bool {
            !self.rejected.lock().unwrap().contains(&proof.metadata)
        }
    }

    /// Gossip double recording broadcasts and dropped peers.
    #[derive(Debug, Default)]
    pub struct TestGossip {
        pub broadcasts: Mutex<Vec<ProofMetadata>>,
        pub drops: Mutex<Vec<PeerId>>,
    }

    impl TestGossip {
        pub fn dropped(&self, peer: &str) -> bool {
            self.drops.lock().unwrap().contains(&PeerId::from(peer))
        }
    }

    impl ProofGossip for TestGossip {
        fn broadcast_proof(&self, proof: &Proof, _propagate: bool) {
            self.broadcasts.lock().unwrap().push(proof.metadata);
        }

        fn drop_peer(&self, peer: &PeerId) {
            self.drops.lock().unwrap().push(peer.clone());
        }
    }

    /// Observer forwarding every hook into unbounded channels, the test
    /// side of the non-blocking hook contract.
    pub struct ChannelObserver {
        imported_tx: mpsc::UnboundedSender<Proof>,
        fetching_tx: mpsc::UnboundedSender<Vec<ProofMetadata>>,
        announce_tx: mpsc::UnboundedSender<(ProofMetadata, bool)>,
        queue_tx: mpsc::UnboundedSender<(ProofMetadata, bool)>,
    }

    impl FetchObserver for ChannelObserver {
        fn announce_change(&self, metadata: ProofMetadata, added: bool) {
            let _ = self.announce_tx.send((metadata, added));
        }

        fn queue_change(&self, metadata: ProofMetadata, added: bool) {
            let _ = self.queue_tx.send((metadata, added));
        }

        fn proofs_fetching(&self, batch: &[ProofMetadata]) {
            let _ = self.fetching_tx.send(batch.to_vec());
        }

        fn proof_imported(&self, proof: &Proof) {
            let _ = self.imported_tx.send(proof.clone());
        }
    }

    /// Test rig around a started fetcher, standing in for the host node.
    pub struct Tester {
        pub fetch: Arc<ProofFetch>,
        pub store: Arc<TestStore>,
        pub verifier: Arc<TestVerifier>,
        pub gossip: Arc<TestGossip>,
        pub config: ProofFetchConfig,
        pub imported_rx: mpsc::UnboundedReceiver<Proof>,
        pub fetching_rx: mpsc::UnboundedReceiver<Vec<ProofMetadata>>,
        pub announce_rx: mpsc::UnboundedReceiver<(ProofMetadata, bool)>,
        pub queue_rx: mpsc::UnboundedReceiver<(ProofMetadata, bool)>,
    }

    impl Tester {
        pub fn new() -> Self {
            Self::with_config(ProofFetchConfig::default())
        }

        pub fn with_config(config: ProofFetchConfig) -> Self {
            enable_tracing();
            let store = Arc::new(TestStore::default());
            let verifier = Arc::new(TestVerifier::default());
            let gossip = Arc::new(TestGossip::default());
            let (imported_tx, imported_rx) = mpsc::unbounded_channel();
            let (fetching_tx, fetching_rx) = mpsc::unbounded_channel();
            let (announce_tx, announce_rx) = mpsc::unbounded_channel();
            let (queue_tx, queue_rx) = mpsc::unbounded_channel();
            let observer = ChannelObserver {
                imported_tx,
                fetching_tx,
                announce_tx,
                queue_tx,
            };
            let dyn_store: DynProofStore = store.clone();
            let dyn_verifier: DynProofVerifier = verifier.clone();
            let dyn_gossip: DynProofGossip = gossip.clone();
            let dyn_observer: DynFetchObserver = Arc::new(observer);
            let fetch = Arc::new(ProofFetch::new(
                config.clone(),
                dyn_store,
                dyn_verifier,
                dyn_gossip,
                dyn_observer,
            ));
            fetch.start().unwrap();
            Self {
                fetch,
                store,
                verifier,
                gossip,
                config,
                imported_rx,
                fetching_rx,
                announce_rx,
                queue_rx,
            }
        }

        /// An announce time old enough that the gather window has already
        /// closed, so retrieval is triggered on the next loop pass.
        pub fn stale_announce_time(&self) -> Timestamp {
            Timestamp::now().saturating_sub(self.config.arrive_timeout())
        }

        /// A requester answering from `proofs` the way a remote peer
        /// would: on its own task, through `filter_proofs`.
        pub fn requester(
            &self,
            peer: &str,
            proofs: &HashMap<ProofMetadata, Proof>,
        ) -> DynProofRequester {
            make_requester(
                self.fetch.clone(),
                peer,
                proofs.clone(),
                self.config.gather_slack(),
            )
        }

        /// Announce with a stale announce time.
        pub fn notify(
            &self,
            peer: &str,
            metadata: ProofMetadata,
            requester: &DynProofRequester,
        ) {
            self.fetch
                .notify(
                    PeerId::from(peer),
                    metadata,
                    self.stale_announce_time(),
                    requester.clone(),
                )
                .unwrap();
        }

        pub async fn expect_import(&mut self) -> Proof {
            tokio::time::timeout(
                Duration::from_secs(2),
                self.imported_rx.recv(),
            )
            .await
            .expect("import timeout")
            .expect("imported hook channel closed")
        }

        pub async fn expect_no_import(&mut self) {
            tokio::time::sleep(Duration::from_millis(50)).await;
            assert!(
                self.imported_rx.try_recv().is_err(),
                "extra proof imported"
            );
        }

        pub async fn expect_import_count(&mut self, count: usize) {
            for i in 0..count {
                tokio::time::timeout(
                    Duration::from_secs(2),
                    self.imported_rx.recv(),
                )
                .await
                .unwrap_or_else(|_| panic!("proof {}: import timeout", i + 1))
                .expect("imported hook channel closed");
            }
            self.expect_no_import().await;
        }
    }

    /// Requester double answering from a canned proof map via
    /// `filter_proofs` on its own task, with the response arrival time
    /// backdated by `drift_back` so imports are due immediately.
    pub fn make_requester(
        fetch: Arc<ProofFetch>,
        peer: &str,
        proofs: HashMap<ProofMetadata, Proof>,
        drift_back: Duration,
    ) -> DynProofRequester {
        let peer = PeerId::from(peer);
        Arc::new(move |batch: Vec<ProofMetadata>| -> PfResult<()> {
            let found: Vec<Proof> = batch
                .iter()
                .filter_map(|metadata| proofs.get(metadata).cloned())
                .collect();
            let fetch = fetch.clone();
            let peer = peer.clone();
            tokio::task::spawn(async move {
                let arrival = Timestamp::now().saturating_sub(drift_back);
                fetch.filter_proofs(peer, found, arrival).await;
            });
            Ok(())
        })
    }

    /// Wrap a requester with an invocation counter.
    pub fn counting(
        counter: Arc<AtomicUsize>,
        inner: DynProofRequester,
    ) -> DynProofRequester {
        Arc::new(move |batch: Vec<ProofMetadata>| -> PfResult<()> {
            counter.fetch_add(1, Ordering::SeqCst);
            inner.request_proofs(batch)
        })
    }

    /// Poll `cond` until it holds, failing the test after two seconds.
    pub async fn wait_for(mut cond: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }
}
