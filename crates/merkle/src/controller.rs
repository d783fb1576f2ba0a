use std::collections::HashMap;

use alloy_primitives::B256;
use tr_types::{deposit_leaf_hash, Deposit, RollupExitLeaf};

use crate::{
    rollup_tree::{compute_siblings, rollup_leaves_to_vector},
    store::MerkleStore,
    tree::MerkleTree,
    MerkleError,
};

/// The family of exit trees: one per registered network plus the aggregate
/// rollups-exit tree. Sole writer of Merkle nodes and roots.
pub struct BridgeController {
    exit_trees: HashMap<u32, MerkleTree>,
    height: u8,
}

impl BridgeController {
    pub async fn new<S: MerkleStore>(
        store: &mut S,
        height: u8,
        network_ids: &[u32],
    ) -> Result<Self, MerkleError> {
        let mut exit_trees = HashMap::with_capacity(network_ids.len());
        for network_id in network_ids {
            let tree = MerkleTree::new(store, height, *network_id).await?;
            exit_trees.insert(*network_id, tree);
        }
        Ok(BridgeController { exit_trees, height })
    }

    fn tree_mut(&mut self, network_id: u32) -> Result<&mut MerkleTree, MerkleError> {
        self.exit_trees
            .get_mut(&network_id)
            .ok_or(MerkleError::NetworkNotRegistered(network_id))
    }

    /// Appends the deposit's leaf to its network's exit tree.
    pub async fn add_deposit<S: MerkleStore>(
        &mut self,
        store: &mut S,
        deposit: &Deposit,
        deposit_id: u64,
    ) -> Result<B256, MerkleError> {
        let leaf = deposit_leaf_hash(deposit);
        self.tree_mut(deposit.network_id)?
            .add_leaf(store, deposit_id, leaf, deposit.deposit_cnt)
            .await
    }

    /// Rewinds a network's exit tree after a reorg truncated storage.
    pub async fn reorg_tree<S: MerkleStore>(
        &mut self,
        store: &mut S,
        deposit_count: u32,
        network_id: u32,
    ) -> Result<(), MerkleError> {
        self.tree_mut(network_id)?
            .reset_leaf(store, deposit_count)
            .await
    }

    /// Current root of a network's exit tree.
    pub async fn get_exit_root<S: MerkleStore>(
        &self,
        store: &mut S,
        network_id: u32,
    ) -> Result<B256, MerkleError> {
        self.exit_trees
            .get(&network_id)
            .ok_or(MerkleError::NetworkNotRegistered(network_id))?
            .get_root(store)
            .await
    }

    /// Installs a rollup's new local exit root in the rollups-exit tree.
    ///
    /// Every currently-latest leaf is re-inserted under the recomputed
    /// root; leaves of untouched rollups carry their original block id
    /// forward, so a root lookup always yields the full leaf set.
    pub async fn add_rollup_exit_leaf<S: MerkleStore>(
        &mut self,
        store: &mut S,
        new_leaf: RollupExitLeaf,
    ) -> Result<B256, MerkleError> {
        let mut leaves = store.get_latest_rollup_exit_leaves().await?;
        match leaves
            .iter_mut()
            .find(|leaf| leaf.rollup_id == new_leaf.rollup_id)
        {
            Some(slot) => {
                slot.leaf = new_leaf.leaf;
                slot.block_id = new_leaf.block_id;
            }
            None => {
                leaves.push(new_leaf);
                leaves.sort_by_key(|leaf| leaf.rollup_id);
            }
        }

        let vector = rollup_leaves_to_vector(&leaves);
        let (_, root) = compute_siblings(0, &vector, self.height as usize)?;
        let rows: Vec<RollupExitLeaf> = leaves
            .into_iter()
            .map(|leaf| RollupExitLeaf {
                id: 0,
                root,
                ..leaf
            })
            .collect();
        store.add_rollup_exit_leaves(&rows).await?;
        Ok(root)
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::U256;

    use super::*;
    use crate::{store::MemMerkleStore, zero_hashes, TREE_HEIGHT};

    fn deposit(network_id: u32, deposit_cnt: u32) -> Deposit {
        Deposit {
            network_id,
            deposit_cnt,
            amount: U256::from(deposit_cnt + 1),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn trees_are_isolated_per_network() {
        let mut store = MemMerkleStore::new();
        let mut controller = BridgeController::new(&mut store, TREE_HEIGHT as u8, &[0, 1])
            .await
            .unwrap();
        controller
            .add_deposit(&mut store, &deposit(0, 0), 1)
            .await
            .unwrap();
        let root0 = controller.get_exit_root(&mut store, 0).await.unwrap();
        let root1 = controller.get_exit_root(&mut store, 1).await.unwrap();
        assert_ne!(root0, root1);
        assert_eq!(root1, zero_hashes(TREE_HEIGHT)[TREE_HEIGHT]);
    }

    #[tokio::test]
    async fn unregistered_network_is_an_error() {
        let mut store = MemMerkleStore::new();
        let mut controller = BridgeController::new(&mut store, TREE_HEIGHT as u8, &[0])
            .await
            .unwrap();
        let err = controller
            .add_deposit(&mut store, &deposit(9, 0), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, MerkleError::NetworkNotRegistered(9)));
    }

    #[tokio::test]
    async fn rollup_leaf_updates_carry_other_leaves_forward() {
        let mut store = MemMerkleStore::new();
        let mut controller = BridgeController::new(&mut store, TREE_HEIGHT as u8, &[0])
            .await
            .unwrap();

        let first = RollupExitLeaf {
            rollup_id: 1,
            leaf: B256::repeat_byte(0xa1),
            block_id: 1,
            ..Default::default()
        };
        let second = RollupExitLeaf {
            rollup_id: 2,
            leaf: B256::repeat_byte(0xb2),
            block_id: 1,
            ..Default::default()
        };
        controller
            .add_rollup_exit_leaf(&mut store, first)
            .await
            .unwrap();
        controller
            .add_rollup_exit_leaf(&mut store, second)
            .await
            .unwrap();

        // Update rollup 1 in a later block; rollup 2's row must be
        // re-inserted under the new root with its old block id.
        let updated = RollupExitLeaf {
            rollup_id: 1,
            leaf: B256::repeat_byte(0xa2),
            block_id: 7,
            ..Default::default()
        };
        let root = controller
            .add_rollup_exit_leaf(&mut store, updated)
            .await
            .unwrap();

        let rows: Vec<_> = store
            .all_rollup_leaves()
            .iter()
            .filter(|row| row.root == root)
            .cloned()
            .collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].rollup_id, 1);
        assert_eq!(rows[0].block_id, 7);
        assert_eq!(rows[1].rollup_id, 2);
        assert_eq!(rows[1].block_id, 1);
        assert_eq!(rows[1].leaf, B256::repeat_byte(0xb2));

        let latest = store.get_latest_rollup_exit_leaves().await.unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].leaf, B256::repeat_byte(0xa2));
    }
}
