//! Per-network synchronizer: the sole writer of the indexed data model.
//!
//! One synchronizer task runs per configured network. It detects and
//! repairs reorgs, applies chain events block by block under a single
//! transaction each, keeps the Merkle trees in lockstep with storage, and
//! fans fresh global exit roots out to the claim tx managers.

mod synchronizer;

pub use synchronizer::{ClientSynchronizer, SynchronizerConfig};
