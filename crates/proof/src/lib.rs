//! Claim proof assembly.
//!
//! A claim needs two sibling sequences: one over the origin network's exit
//! tree and one over the rollups-exit tree, both anchored under a global
//! exit root already committed on the destination side. The per-network
//! proof is built by walking node pairs down from the exit root through
//! the reverse hash table; the rollups-exit proof is recomputed from the
//! leaf set recorded under the rollups root.

mod error;
mod service;

pub use error::ProofError;
pub use service::{BridgeService, ClaimProof};
