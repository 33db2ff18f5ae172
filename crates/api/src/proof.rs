//! Plumo proof types.

use bytes::Bytes;

/// The identity of a Plumo proof: the epoch range it covers and the
/// version of the proving circuit that produced it.
///
/// Metadata is the map key of the whole fetcher. Two proofs with equal
/// metadata are the same proof as far as scheduling is concerned, whatever
/// their payloads contain.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct ProofMetadata {
    /// The first epoch covered by the proof.
    pub first_epoch: u64,

    /// The last epoch covered by the proof. Must be greater than
    /// [ProofMetadata::first_epoch].
    pub last_epoch: u64,

    /// The version of the proving circuit.
    pub version_number: u32,
}

impl ProofMetadata {
    /// Construct metadata for the given epoch range and version.
    pub fn new(first_epoch: u64, last_epoch: u64, version_number: u32) -> Self {
        Self {
            first_epoch,
            last_epoch,
            version_number,
        }
    }

    /// A proof must cover a forward epoch range. Peers announcing metadata
    /// that fails this check are treated as malicious.
    pub fn is_valid(&self) -> bool {
        self.first_epoch < self.last_epoch
    }
}

impl std::fmt::Display for ProofMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}-{}:v{}",
            self.first_epoch, self.last_epoch, self.version_number
        )
    }
}

/// A Plumo proof: its identifying metadata plus the proof bytes.
///
/// The payload is opaque to the fetcher. It is carried to the verifier,
/// the broadcaster and the store without interpretation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proof {
    /// The identity of this proof.
    pub metadata: ProofMetadata,

    /// The serialized proof itself.
    pub proof: Bytes,
}

impl Proof {
    /// Construct a proof from metadata and payload bytes.
    pub fn new(metadata: ProofMetadata, proof: Bytes) -> Self {
        Self { metadata, proof }
    }
}
