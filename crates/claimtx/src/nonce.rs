use std::collections::HashMap;

use alloy_primitives::Address;
use parking_lot::Mutex;
use tr_rpc_client::{EthClient, RpcRequestError};

/// In-process nonce allocator for one chain. Seeded lazily from the node's
/// pending count, bumped on every allocation, and re-synchronized with the
/// node on review.
pub struct NonceCache {
    client: EthClient,
    next_nonces: Mutex<HashMap<Address, u64>>,
}

impl NonceCache {
    pub fn new(client: EthClient) -> Self {
        NonceCache {
            client,
            next_nonces: Mutex::new(HashMap::new()),
        }
    }

    /// Allocates the next nonce for `from`.
    pub async fn get_next_nonce(&self, from: Address) -> Result<u64, RpcRequestError> {
        if let Some(nonce) = self.allocate_cached(from) {
            return Ok(nonce);
        }
        let remote = self.client.pending_nonce_at(from).await?;
        let mut nonces = self.next_nonces.lock();
        let slot = nonces.entry(from).or_insert(remote);
        let nonce = *slot;
        *slot = nonce + 1;
        Ok(nonce)
    }

    fn allocate_cached(&self, from: Address) -> Option<u64> {
        let mut nonces = self.next_nonces.lock();
        let slot = nonces.get_mut(&from)?;
        let nonce = *slot;
        *slot = nonce + 1;
        Some(nonce)
    }

    /// Re-seeds from the node, keeping the local counter when it is ahead.
    /// Returns the next nonce to use without consuming it.
    pub async fn refresh_from_network(&self, from: Address) -> Result<u64, RpcRequestError> {
        let remote = self.client.pending_nonce_at(from).await?;
        let mut nonces = self.next_nonces.lock();
        let slot = nonces.entry(from).or_insert(remote);
        *slot = (*slot).max(remote);
        Ok(*slot)
    }
}
