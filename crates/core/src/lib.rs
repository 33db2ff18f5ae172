#![deny(missing_docs)]
//! Reference implementation of the [plumo-fetch API](plumo_fetch_api).

pub mod fetcher;
pub use fetcher::{ProofFetch, ProofFetchConfig, ProofFetchFactory, ProofFetchModConfig};

mod mem_proof_store;
pub use mem_proof_store::*;
