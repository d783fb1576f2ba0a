use alloy_primitives::B256;
use thiserror::Error;
use tr_merkle::MerkleError;
use tr_storage::StorageError;

#[derive(Error, Debug)]
pub enum ProofError {
    /// The deposit exists but no allowed GER witnesses it yet.
    #[error("deposit is not synced to a claimable state yet")]
    DepositNotSynced,

    #[error("rollups-exit root mismatch: required {required}, calculated {calculated}")]
    RollupRootMismatch { required: B256, calculated: B256 },

    #[error("no rollups-exit leaves recorded under root {0}")]
    NoRollupLeaves(B256),

    #[error("rollup index {0} has no leaf under this root yet")]
    RollupLeafNotSynced(u32),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Merkle(#[from] MerkleError),
}

impl ProofError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProofError::Storage(StorageError::NotFound))
    }
}
