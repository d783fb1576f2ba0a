use std::num::NonZeroUsize;

use alloy_primitives::B256;
use lru::LruCache;
use parking_lot::Mutex;
use sqlx::PgConnection;
use tr_merkle::{compute_siblings, rollup_leaves_to_vector, MerkleStore};
use tr_storage::{self as storage, PgMerkleStore, StorageError};
use tr_types::GlobalExitRoot;
use tracing::warn;

use crate::ProofError;

/// A complete claim proof: the witnessing GER plus both sibling sequences.
#[derive(Clone, Debug)]
pub struct ClaimProof {
    pub global_exit_root: GlobalExitRoot,
    pub merkle_proof: Vec<B256>,
    pub rollup_merkle_proof: Vec<B256>,
}

/// Read-side service that assembles claim proofs. One instance per
/// process; the node cache is shared across requests.
pub struct BridgeService {
    height: u8,
    cache: Mutex<LruCache<B256, (B256, B256)>>,
}

impl BridgeService {
    pub fn new(height: u8, cache_size: usize) -> Self {
        let capacity = NonZeroUsize::new(cache_size.max(1)).expect("nonzero capacity");
        BridgeService {
            height,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Children of an interior node, via the LRU.
    async fn get_node<S: MerkleStore>(
        &self,
        store: &mut S,
        parent: B256,
    ) -> Result<(B256, B256), ProofError> {
        if let Some(children) = self.cache.lock().get(&parent).copied() {
            return Ok(children);
        }
        let children = store
            .get_node(parent)
            .await?
            .ok_or(StorageError::NotFound)?;
        self.cache.lock().put(parent, children);
        Ok(children)
    }

    /// Sibling sequence for `index` under `root`, leaf level first.
    ///
    /// Walks from the root towards the leaf: at height `h` the path goes
    /// right when bit `h` of the index is set, and the sibling is whichever
    /// child the path does not take.
    async fn get_proof<S: MerkleStore>(
        &self,
        store: &mut S,
        index: u32,
        root: B256,
    ) -> Result<Vec<B256>, ProofError> {
        let mut siblings = Vec::with_capacity(self.height as usize);
        let mut cur = root;
        for h in (0..self.height).rev() {
            let (left, right) = self.get_node(store, cur).await?;
            if index & (1 << h) > 0 {
                siblings.push(left);
                cur = right;
            } else {
                siblings.push(right);
                cur = left;
            }
        }
        siblings.reverse();
        Ok(siblings)
    }

    /// Proof of a rollup's leaf under a recorded rollups-exit root, plus
    /// the leaf itself.
    async fn get_rollup_exit_proof(
        &self,
        conn: &mut PgConnection,
        rollup_index: u32,
        root: B256,
    ) -> Result<(Vec<B256>, B256), ProofError> {
        let leaves = storage::get_rollup_exit_leaves_by_root(conn, root).await?;
        if leaves.is_empty() {
            return Err(ProofError::NoRollupLeaves(root));
        }
        let vector = rollup_leaves_to_vector(&leaves);
        let (siblings, calculated) =
            compute_siblings(rollup_index, &vector, self.height as usize)?;
        if calculated != root {
            warn!(required = %root, calculated = %calculated, "rollups-exit root check failed");
            return Err(ProofError::RollupRootMismatch {
                required: root,
                calculated,
            });
        }
        if rollup_index as usize >= vector.len() {
            return Err(ProofError::RollupLeafNotSynced(rollup_index));
        }
        Ok((siblings, vector[rollup_index as usize]))
    }

    /// The proof pair for a deposit under the newest GER that witnesses it.
    pub async fn get_claim_proof(
        &self,
        conn: &mut PgConnection,
        deposit_cnt: u32,
        network_id: u32,
    ) -> Result<ClaimProof, ProofError> {
        let deposit = storage::get_deposit(conn, deposit_cnt, network_id).await?;
        if !deposit.ready_for_claim {
            return Err(ProofError::DepositNotSynced);
        }
        let ger = storage::get_latest_exit_root(conn, network_id, deposit.dest_net).await?;
        self.assemble(conn, deposit_cnt, network_id, ger).await
    }

    /// Like [`Self::get_claim_proof`] but pinned to a caller-supplied GER.
    pub async fn get_claim_proof_by_ger(
        &self,
        conn: &mut PgConnection,
        deposit_cnt: u32,
        network_id: u32,
        ger: B256,
    ) -> Result<ClaimProof, ProofError> {
        let deposit = storage::get_deposit(conn, deposit_cnt, network_id).await?;
        if !deposit.ready_for_claim {
            warn!(deposit_cnt, network_id, "deposit not ready for claim");
        }
        let ger = storage::get_l1_exit_root_by_ger(conn, ger).await?;
        self.assemble(conn, deposit_cnt, network_id, ger).await
    }

    /// Proof builder for the grouped-claim path: the manager already
    /// validated the deposit inside its own transaction.
    pub async fn get_claim_proof_for_compressed(
        &self,
        conn: &mut PgConnection,
        deposit_cnt: u32,
        network_id: u32,
        ger: B256,
    ) -> Result<ClaimProof, ProofError> {
        let ger = storage::get_l1_exit_root_by_ger(conn, ger).await?;
        self.assemble(conn, deposit_cnt, network_id, ger).await
    }

    async fn assemble(
        &self,
        conn: &mut PgConnection,
        deposit_cnt: u32,
        network_id: u32,
        ger: GlobalExitRoot,
    ) -> Result<ClaimProof, ProofError> {
        let (merkle_proof, rollup_merkle_proof) = if network_id == 0 {
            let proof = {
                let mut store = PgMerkleStore(conn);
                self.get_proof(&mut store, deposit_cnt, ger.mainnet_exit_root())
                    .await?
            };
            (proof, empty_proof(self.height))
        } else {
            let (rollup_proof, rollup_leaf) = self
                .get_rollup_exit_proof(conn, network_id - 1, ger.rollup_exit_root())
                .await?;
            let proof = {
                let mut store = PgMerkleStore(conn);
                self.get_proof(&mut store, deposit_cnt, rollup_leaf).await?
            };
            (proof, rollup_proof)
        };
        Ok(ClaimProof {
            global_exit_root: ger,
            merkle_proof,
            rollup_merkle_proof,
        })
    }

    /// The claim tx hash when the deposit was already redeemed at the
    /// destination.
    pub async fn get_deposit_status(
        &self,
        conn: &mut PgConnection,
        deposit_cnt: u32,
        origin_network_id: u32,
        dest_network_id: u32,
    ) -> Result<Option<B256>, ProofError> {
        match storage::get_claim(conn, deposit_cnt, origin_network_id, dest_network_id).await {
            Ok(claim) => Ok(Some(claim.tx_hash)),
            Err(StorageError::NotFound) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

fn empty_proof(height: u8) -> Vec<B256> {
    vec![B256::ZERO; height as usize]
}

#[cfg(test)]
mod tests {
    use alloy_primitives::U256;
    use tr_merkle::{verify_proof, MemMerkleStore, MerkleTree, TREE_HEIGHT};
    use tr_types::{deposit_leaf_hash, Deposit};

    use super::*;

    fn deposit(cnt: u32) -> Deposit {
        Deposit {
            network_id: 0,
            deposit_cnt: cnt,
            dest_net: 1,
            amount: U256::from(cnt + 1),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn downward_walk_yields_verifying_proofs() {
        let mut store = MemMerkleStore::new();
        let mut tree = MerkleTree::new(&mut store, TREE_HEIGHT as u8, 0).await.unwrap();
        let mut leaves = Vec::new();
        let mut roots = Vec::new();
        for cnt in 0..21u32 {
            let leaf = deposit_leaf_hash(&deposit(cnt));
            leaves.push(leaf);
            roots.push(
                tree.add_leaf(&mut store, cnt as u64 + 1, leaf, cnt)
                    .await
                    .unwrap(),
            );
        }

        let service = BridgeService::new(TREE_HEIGHT as u8, 1024);
        let final_root = *roots.last().unwrap();
        for (i, leaf) in leaves.iter().enumerate() {
            let siblings = service
                .get_proof(&mut store, i as u32, final_root)
                .await
                .unwrap();
            assert_eq!(siblings.len(), TREE_HEIGHT);
            assert!(verify_proof(*leaf, i as u32, &siblings, final_root));
        }
        // Proofs under an intermediate root also verify.
        let siblings = service.get_proof(&mut store, 3, roots[7]).await.unwrap();
        assert!(verify_proof(leaves[3], 3, &siblings, roots[7]));
    }

    #[tokio::test]
    async fn walk_caches_node_pairs() {
        let mut store = MemMerkleStore::new();
        let mut tree = MerkleTree::new(&mut store, TREE_HEIGHT as u8, 0).await.unwrap();
        let mut root = B256::ZERO;
        for cnt in 0..4u32 {
            root = tree
                .add_leaf(&mut store, cnt as u64 + 1, deposit_leaf_hash(&deposit(cnt)), cnt)
                .await
                .unwrap();
        }
        let service = BridgeService::new(TREE_HEIGHT as u8, 64);
        service.get_proof(&mut store, 0, root).await.unwrap();
        assert!(service.cache.lock().len() > 0);
        // Second walk over the same path is served from the cache.
        service.get_proof(&mut store, 0, root).await.unwrap();
    }
}
