//! Types dealing with peer identity.

use std::sync::Arc;

/// Identifies a remote peer to the fetcher.
///
/// The fetcher never inspects the contents. It only uses the id as a map
/// key for per-peer accounting and hands it back out through
/// [crate::ProofGossip::drop_peer]. The inner `Arc<str>` makes cloning
/// cheap; peer ids flow through every intake event.
#[derive(
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(transparent)]
pub struct PeerId(pub Arc<str>);

impl std::ops::Deref for PeerId {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.into())
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self(s.into())
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Debug for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
