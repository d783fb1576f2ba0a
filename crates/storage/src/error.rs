use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    /// The requested row does not exist. Distinct from transport and
    /// database failures so callers can branch on absence.
    #[error("not found")]
    NotFound,

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("corrupted row: {0}")]
    Decode(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound)
    }
}

impl From<StorageError> for tr_merkle::MerkleError {
    fn from(err: StorageError) -> Self {
        tr_merkle::MerkleError::Store(err.to_string())
    }
}
