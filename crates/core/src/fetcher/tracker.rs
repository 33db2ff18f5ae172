//! Bookkeeping of which proofs have been announced by which peers and
//! which are currently being retrieved.

use super::event::Announce;
use plumo_fetch_api::{PeerId, ProofMetadata, Timestamp};
use std::collections::{hash_map::Entry, HashMap};
use std::time::Duration;

/// A retrieval request issued to a peer whose response is pending.
///
/// At most one exists per metadata, however many peers announced it.
#[derive(Debug)]
pub(crate) struct InflightFetch {
    /// The peer the request was issued to.
    pub peer: PeerId,

    /// When the request was issued.
    pub issued: Timestamp,

    /// Every announcement attributed to the metadata, including ones that
    /// arrived after the request went out.
    announces: Vec<Announce>,
}

/// Tracks announcements through their two pre-import stages: announced
/// (waiting for the gather window to close) and inflight (request issued,
/// response pending).
///
/// Per-peer attribution counts cover both stages, so a peer's announce cap
/// applies to everything it has outstanding.
#[derive(Debug, Default)]
pub(crate) struct AnnounceTracker {
    announced: HashMap<ProofMetadata, Vec<Announce>>,
    fetching: HashMap<ProofMetadata, InflightFetch>,
    announce_counts: HashMap<PeerId, usize>,
}

impl AnnounceTracker {
    /// The number of announcements currently attributed to `peer`.
    pub fn announce_count(&self, peer: &PeerId) -> usize {
        self.announce_counts.get(peer).copied().unwrap_or(0)
    }

    /// The number of inflight retrievals issued to `peer`.
    pub fn fetch_load(&self, peer: &PeerId) -> usize {
        self.fetching.values().filter(|f| f.peer == *peer).count()
    }

    /// Record an announcement.
    ///
    /// A metadata already inflight gains the announcement as attribution
    /// only. Returns true when the metadata was not tracked before.
    pub fn record(&mut self, announce: Announce) -> bool {
        *self
            .announce_counts
            .entry(announce.peer.clone())
            .or_insert(0) += 1;
        if let Some(fetch) = self.fetching.get_mut(&announce.metadata) {
            fetch.announces.push(announce);
            return false;
        }
        match self.announced.entry(announce.metadata) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().push(announce);
                false
            }
            Entry::Vacant(entry) => {
                entry.insert(vec![announce]);
                true
            }
        }
    }

    /// The next moment an announced metadata becomes due for retrieval,
    /// i.e. its earliest announcement plus the gather delay.
    pub fn next_gather_at(&self, gather_delay: Duration) -> Option<Timestamp> {
        self.announced
            .values()
            .map(|announces| announces[0].announce_time + gather_delay)
            .min()
    }

    /// Remove and return every announced metadata due for retrieval at
    /// `now`, with all its announcements. Attribution counts are left
    /// untouched; the caller either begins a fetch or retires the
    /// announcements.
    pub fn take_due(
        &mut self,
        now: Timestamp,
        gather_delay: Duration,
    ) -> Vec<(ProofMetadata, Vec<Announce>)> {
        let due: Vec<ProofMetadata> = self
            .announced
            .iter()
            .filter(|(_, announces)| {
                announces[0].announce_time + gather_delay <= now
            })
            .map(|(metadata, _)| *metadata)
            .collect();
        let mut out = Vec::with_capacity(due.len());
        for metadata in due {
            if let Some(announces) = self.announced.remove(&metadata) {
                out.push((metadata, announces));
            }
        }
        out
    }

    /// Retire announcements without issuing a retrieval, releasing their
    /// per-peer attribution.
    pub fn retire(&mut self, announces: &[Announce]) {
        for announce in announces {
            self.decrement(&announce.peer, 1);
        }
    }

    /// Transition a metadata taken from the announced stage into an
    /// inflight retrieval issued to `peer`.
    pub fn begin_fetch(
        &mut self,
        metadata: ProofMetadata,
        peer: PeerId,
        announces: Vec<Announce>,
        issued: Timestamp,
    ) {
        debug_assert!(!self.fetching.contains_key(&metadata));
        self.fetching.insert(
            metadata,
            InflightFetch {
                peer,
                issued,
                announces,
            },
        );
    }

    /// Whether a retrieval for `metadata` is pending with `peer`.
    pub fn is_fetching_from(
        &self,
        metadata: &ProofMetadata,
        peer: &PeerId,
    ) -> bool {
        self.fetching
            .get(metadata)
            .map(|fetch| fetch.peer == *peer)
            .unwrap_or(false)
    }

    /// Resolve an inflight retrieval, releasing all attribution for the
    /// metadata.
    pub fn finish_fetch(&mut self, metadata: &ProofMetadata) {
        if let Some(fetch) = self.fetching.remove(metadata) {
            self.retire(&fetch.announces);
        }
    }

    /// Drop all announce-stage and inflight state for a metadata,
    /// whichever stage it is in. Returns true if anything was tracked.
    pub fn forget(&mut self, metadata: &ProofMetadata) -> bool {
        let mut found = false;
        if let Some(announces) = self.announced.remove(metadata) {
            self.retire(&announces);
            found = true;
        }
        if let Some(fetch) = self.fetching.remove(metadata) {
            self.retire(&fetch.announces);
            found = true;
        }
        found
    }

    /// The next moment an inflight retrieval exceeds `fetch_timeout`.
    pub fn next_expire_at(&self, fetch_timeout: Duration) -> Option<Timestamp> {
        self.fetching
            .values()
            .map(|fetch| fetch.issued + fetch_timeout)
            .min()
    }

    /// Remove and return every inflight retrieval that exceeded
    /// `fetch_timeout` at `now`, releasing its attribution.
    pub fn take_expired(
        &mut self,
        now: Timestamp,
        fetch_timeout: Duration,
    ) -> Vec<(ProofMetadata, InflightFetch)> {
        let expired: Vec<ProofMetadata> = self
            .fetching
            .iter()
            .filter(|(_, fetch)| fetch.issued + fetch_timeout <= now)
            .map(|(metadata, _)| *metadata)
            .collect();
        let mut out = Vec::with_capacity(expired.len());
        for metadata in expired {
            if let Some(fetch) = self.fetching.remove(&metadata) {
                self.retire(&fetch.announces);
                out.push((metadata, fetch));
            }
        }
        out
    }

    /// Discard every announcement attributed to `peer` and every inflight
    /// retrieval issued to it. Returns the metadata that are no longer
    /// tracked at all as a result.
    pub fn purge_peer(&mut self, peer: &PeerId) -> Vec<ProofMetadata> {
        let mut forgotten = Vec::new();
        let mut stripped = 0usize;

        self.announced.retain(|metadata, announces| {
            let before = announces.len();
            announces.retain(|a| a.peer != *peer);
            stripped += before - announces.len();
            if announces.is_empty() {
                forgotten.push(*metadata);
                false
            } else {
                true
            }
        });
        self.decrement(peer, stripped);

        let issued_to_peer: Vec<ProofMetadata> = self
            .fetching
            .iter()
            .filter(|(_, fetch)| fetch.peer == *peer)
            .map(|(metadata, _)| *metadata)
            .collect();
        for metadata in issued_to_peer {
            if let Some(fetch) = self.fetching.remove(&metadata) {
                self.retire(&fetch.announces);
                forgotten.push(metadata);
            }
        }

        let mut stripped = 0usize;
        for fetch in self.fetching.values_mut() {
            let before = fetch.announces.len();
            fetch.announces.retain(|a| a.peer != *peer);
            stripped += before - fetch.announces.len();
        }
        self.decrement(peer, stripped);

        forgotten
    }

    fn decrement(&mut self, peer: &PeerId, by: usize) {
        if by == 0 {
            return;
        }
        if let Some(count) = self.announce_counts.get_mut(peer) {
            *count = count.saturating_sub(by);
            if *count == 0 {
                self.announce_counts.remove(peer);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use plumo_fetch_api::PfResult;
    use std::sync::Arc;
    use std::time::Duration;

    fn announce(
        peer: &str,
        metadata: ProofMetadata,
        at: Timestamp,
    ) -> Announce {
        Announce {
            peer: PeerId::from(peer),
            metadata,
            announce_time: at,
            requester: Arc::new(|_: Vec<ProofMetadata>| PfResult::Ok(())),
        }
    }

    fn peer(s: &str) -> PeerId {
        PeerId::from(s)
    }

    #[test]
    fn record_counts_attribution_across_stages() {
        let mut tracker = AnnounceTracker::default();
        let m = ProofMetadata::new(0, 1, 0);
        let now = Timestamp::now();

        assert!(tracker.record(announce("a", m, now)));
        assert!(!tracker.record(announce("b", m, now)));
        assert_eq!(1, tracker.announce_count(&peer("a")));
        assert_eq!(1, tracker.announce_count(&peer("b")));

        let due = tracker.take_due(now, Duration::ZERO);
        assert_eq!(1, due.len());
        let (metadata, announces) = due.into_iter().next().unwrap();
        tracker.begin_fetch(metadata, peer("a"), announces, now);
        assert_eq!(1, tracker.fetch_load(&peer("a")));

        // attribution survives graduation, and late announces attach
        assert_eq!(1, tracker.announce_count(&peer("a")));
        assert!(!tracker.record(announce("c", m, now)));
        assert!(tracker.is_fetching_from(&m, &peer("a")));
        assert!(!tracker.is_fetching_from(&m, &peer("b")));

        tracker.finish_fetch(&m);
        assert_eq!(0, tracker.announce_count(&peer("a")));
        assert_eq!(0, tracker.announce_count(&peer("b")));
        assert_eq!(0, tracker.announce_count(&peer("c")));
        assert_eq!(0, tracker.fetch_load(&peer("a")));
    }

    #[test]
    fn take_due_respects_gather_delay() {
        let mut tracker = AnnounceTracker::default();
        let now = Timestamp::now();
        let m1 = ProofMetadata::new(0, 1, 0);
        let m2 = ProofMetadata::new(1, 2, 0);
        tracker.record(announce("a", m1, now));
        tracker.record(announce(
            "a",
            m2,
            now + Duration::from_millis(400),
        ));

        let delay = Duration::from_millis(400);
        assert_eq!(Some(now + delay), tracker.next_gather_at(delay));

        let due = tracker.take_due(now + delay, delay);
        assert_eq!(
            vec![m1],
            due.iter().map(|(m, _)| *m).collect::<Vec<_>>()
        );
        // counts untouched until the caller retires or begins a fetch
        assert_eq!(2, tracker.announce_count(&peer("a")));
        tracker.retire(&due.into_iter().next().unwrap().1);
        assert_eq!(1, tracker.announce_count(&peer("a")));
    }

    #[test]
    fn expiry_releases_attribution() {
        let mut tracker = AnnounceTracker::default();
        let now = Timestamp::now();
        let m = ProofMetadata::new(0, 1, 0);
        tracker.record(announce("a", m, now));
        let (_, announces) =
            tracker.take_due(now, Duration::ZERO).into_iter().next().unwrap();
        tracker.begin_fetch(m, peer("a"), announces, now);

        let timeout = Duration::from_secs(5);
        assert_eq!(Some(now + timeout), tracker.next_expire_at(timeout));
        assert!(tracker
            .take_expired(now + Duration::from_secs(1), timeout)
            .is_empty());

        let expired = tracker.take_expired(now + timeout, timeout);
        assert_eq!(1, expired.len());
        assert_eq!(peer("a"), expired[0].1.peer);
        assert_eq!(0, tracker.announce_count(&peer("a")));
    }

    #[test]
    fn purge_peer_strips_attribution_and_fetches() {
        let mut tracker = AnnounceTracker::default();
        let now = Timestamp::now();
        let m1 = ProofMetadata::new(0, 1, 0);
        let m2 = ProofMetadata::new(1, 2, 0);
        let m3 = ProofMetadata::new(2, 3, 0);

        // m3 inflight, issued to the good peer, with a bad attribution
        tracker.record(announce("good", m3, now));
        let (_, announces) =
            tracker.take_due(now, Duration::ZERO).into_iter().next().unwrap();
        tracker.begin_fetch(m3, peer("good"), announces, now);
        tracker.record(announce("bad", m3, now));

        // m1 announced by the bad peer only, m2 by both
        tracker.record(announce("bad", m1, now));
        tracker.record(announce("bad", m2, now));
        tracker.record(announce("good", m2, now));

        let forgotten = tracker.purge_peer(&peer("bad"));
        assert_eq!(vec![m1], forgotten);
        assert_eq!(0, tracker.announce_count(&peer("bad")));
        assert_eq!(2, tracker.announce_count(&peer("good")));
        assert!(tracker.is_fetching_from(&m3, &peer("good")));

        // purging the fetch target abandons the inflight entry
        let forgotten = tracker.purge_peer(&peer("good"));
        assert_eq!(2, forgotten.len());
        assert!(forgotten.contains(&m2));
        assert!(forgotten.contains(&m3));
        assert_eq!(0, tracker.announce_count(&peer("good")));
        assert_eq!(0, tracker.fetch_load(&peer("good")));
    }
}
