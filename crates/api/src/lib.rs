#![deny(missing_docs)]
//! Plumo-fetch API contains the fetcher module traits and the basic types
//! required to define the api of those traits.
//!
//! If you want to use the fetcher itself, please see the plumo_fetch_core
//! crate.

/// Boxed future type.
pub type BoxFut<'a, T> =
    std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

pub mod config;

mod error;
pub use error::*;

pub mod id;
pub use id::PeerId;

mod timestamp;
pub use timestamp::*;

mod proof;
pub use proof::*;

pub mod proof_store;
pub use proof_store::*;

pub mod verifier;
pub use verifier::*;

pub mod gossip;
pub use gossip::*;

pub mod observer;
pub use observer::*;

pub mod fetcher;
pub use fetcher::*;
