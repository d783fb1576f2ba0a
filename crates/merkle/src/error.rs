use alloy_primitives::B256;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MerkleError {
    #[error("leaf index {got} out of order, next expected index is {expected}")]
    OutOfOrder { expected: u32, got: u32 },

    #[error("node {0} missing from the reverse hash table")]
    MissingNode(B256),

    #[error("root missing for deposit count {deposit_count} on network {network}")]
    MissingRoot { deposit_count: u32, network: u32 },

    #[error("root mismatch: required {required}, calculated {calculated}")]
    RootMismatch { required: B256, calculated: B256 },

    #[error("rollup index {0} has no leaf in the rollups-exit tree yet")]
    LeafNotSynced(u32),

    #[error("network {0} is not registered")]
    NetworkNotRegistered(u32),

    #[error("store error: {0}")]
    Store(String),
}
