//! The priority-ordered holding area of fully-received proofs awaiting
//! verification and insertion.

use plumo_fetch_api::{PeerId, Proof, ProofMetadata, Timestamp};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet};

/// A proof waiting for its import time.
#[derive(Debug)]
pub(crate) struct QueuedImport {
    /// When the proof becomes eligible for import.
    pub import_time: Timestamp,

    /// The peer that delivered the proof, sanctioned if verification
    /// fails.
    pub peer: PeerId,

    /// The proof itself.
    pub proof: Proof,

    seq: u64,
}

impl PartialEq for QueuedImport {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedImport {}

impl Ord for QueuedImport {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.import_time, self.seq).cmp(&(other.import_time, other.seq))
    }
}

impl PartialOrd for QueuedImport {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Outcome of offering a proof to the queue.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum PushOutcome {
    /// The proof is queued for import.
    Queued,
    /// The delivering peer has reached its queued-import cap.
    PeerLimit,
    /// The queue is globally full; the new proof is the one rejected.
    Full,
}

/// Min-heap of received proofs keyed by `(import_time, insertion seq)`,
/// with a metadata index for dedup and per-peer accounting for caps.
///
/// The insertion sequence makes the pop order deterministic when import
/// times collide.
#[derive(Debug)]
pub(crate) struct ImportQueue {
    heap: BinaryHeap<Reverse<QueuedImport>>,
    queued: HashSet<ProofMetadata>,
    peer_counts: HashMap<PeerId, usize>,
    next_seq: u64,
    limit: usize,
    peer_limit: usize,
}

impl ImportQueue {
    /// Construct a queue bounded to `limit` entries globally and
    /// `peer_limit` entries per delivering peer.
    pub fn new(limit: usize, peer_limit: usize) -> Self {
        Self {
            heap: BinaryHeap::new(),
            queued: HashSet::new(),
            peer_counts: HashMap::new(),
            next_seq: 0,
            limit,
            peer_limit,
        }
    }

    /// Whether a proof with this metadata is queued.
    pub fn contains(&self, metadata: &ProofMetadata) -> bool {
        self.queued.contains(metadata)
    }

    /// The number of queued proofs.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// The number of queued proofs attributed to `peer`.
    pub fn peer_count(&self, peer: &PeerId) -> usize {
        self.peer_counts.get(peer).copied().unwrap_or(0)
    }

    /// Offer a proof. The caller has already deduplicated against queued
    /// and imported metadata.
    pub fn push(
        &mut self,
        peer: PeerId,
        proof: Proof,
        import_time: Timestamp,
    ) -> PushOutcome {
        debug_assert!(!self.queued.contains(&proof.metadata));
        if self.peer_count(&peer) >= self.peer_limit {
            return PushOutcome::PeerLimit;
        }
        if self.heap.len() >= self.limit {
            return PushOutcome::Full;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queued.insert(proof.metadata);
        *self.peer_counts.entry(peer.clone()).or_insert(0) += 1;
        self.heap.push(Reverse(QueuedImport {
            import_time,
            peer,
            proof,
            seq,
        }));
        PushOutcome::Queued
    }

    /// The import time of the head of the queue.
    pub fn next_import_at(&self) -> Option<Timestamp> {
        self.heap.peek().map(|entry| entry.0.import_time)
    }

    /// Remove and return every entry whose import time has elapsed, in
    /// `(import_time, seq)` order.
    pub fn pop_due(&mut self, now: Timestamp) -> Vec<QueuedImport> {
        let mut out = Vec::new();
        while let Some(Reverse(head)) = self.heap.peek() {
            if head.import_time > now {
                break;
            }
            let Some(Reverse(entry)) = self.heap.pop() else {
                break;
            };
            self.queued.remove(&entry.proof.metadata);
            self.decrement(&entry.peer);
            out.push(entry);
        }
        out
    }

    /// Discard every queued proof delivered by `peer`. Returns the
    /// discarded metadata.
    pub fn purge_peer(&mut self, peer: &PeerId) -> Vec<ProofMetadata> {
        let mut removed = Vec::new();
        let entries = std::mem::take(&mut self.heap).into_vec();
        let mut kept = Vec::with_capacity(entries.len());
        for Reverse(entry) in entries {
            if entry.peer == *peer {
                self.queued.remove(&entry.proof.metadata);
                removed.push(entry.proof.metadata);
            } else {
                kept.push(Reverse(entry));
            }
        }
        self.heap = BinaryHeap::from(kept);
        self.peer_counts.remove(peer);
        removed
    }

    fn decrement(&mut self, peer: &PeerId) {
        if let Some(count) = self.peer_counts.get_mut(peer) {
            *count -= 1;
            if *count == 0 {
                self.peer_counts.remove(peer);
            }
        }
    }
}
