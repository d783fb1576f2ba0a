//! Sparse append-only Merkle trees over a pluggable node store.
//!
//! Every network has an exit tree of fixed height whose leaves are deposit
//! hashes; one aggregate rollups-exit tree collects the latest local exit
//! root of every rollup. Interior nodes are content-addressed
//! `hash(left ‖ right) -> (left, right)` pairs shared across trees.

mod controller;
mod error;
mod rollup_tree;
mod store;
mod tree;
mod zero_hashes;

pub use controller::BridgeController;
pub use error::MerkleError;
pub use rollup_tree::{compute_siblings, rollup_leaves_to_vector};
pub use store::{MemMerkleStore, MerkleStore, NodeRow};
pub use tree::{verify_proof, MerkleTree};
pub use zero_hashes::zero_hashes;

/// Height of every exit tree and of the rollups-exit tree.
pub const TREE_HEIGHT: usize = 32;

/// Network sentinel identifying the rollups-exit tree in shared tables.
pub const ROLLUPS_TREE_NETWORK: u32 = i32::MAX as u32;
