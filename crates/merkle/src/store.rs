use std::collections::HashMap;

use alloy_primitives::B256;
use async_trait::async_trait;
use tr_types::RollupExitLeaf;

use crate::MerkleError;

/// An interior node row destined for the reverse hash table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeRow {
    /// `keccak256(left ‖ right)`.
    pub key: B256,
    pub left: B256,
    pub right: B256,
}

/// Node and root persistence the trees run against. The live implementation
/// wraps a database transaction; tests use [`MemMerkleStore`].
#[async_trait]
pub trait MerkleStore: Send {
    /// Children of an interior node, by its hash.
    async fn get_node(&mut self, key: B256) -> Result<Option<(B256, B256)>, MerkleError>;

    /// Inserts a batch of interior nodes attributed to one deposit.
    async fn bulk_set_nodes(&mut self, deposit_id: u64, nodes: &[NodeRow])
        -> Result<(), MerkleError>;

    /// Links a new root to the deposit that produced it.
    async fn set_root(&mut self, root: B256, deposit_id: u64, network: u32)
        -> Result<(), MerkleError>;

    /// Deposit count of the most recent root of a network, `None` when the
    /// tree is empty.
    async fn get_last_deposit_count(&mut self, network: u32) -> Result<Option<u32>, MerkleError>;

    /// Root recorded right after the leaf with this deposit count landed.
    async fn get_root_by_deposit_count(
        &mut self,
        deposit_count: u32,
        network: u32,
    ) -> Result<Option<B256>, MerkleError>;

    /// Drops roots past `deposit_count` leaves and any interior nodes only
    /// they referenced.
    async fn reset_merkle_roots(
        &mut self,
        deposit_count: u32,
        network: u32,
    ) -> Result<(), MerkleError>;

    /// The newest leaf of every rollup, ordered by rollup id.
    async fn get_latest_rollup_exit_leaves(
        &mut self,
    ) -> Result<Vec<RollupExitLeaf>, MerkleError>;

    /// Bulk-inserts rollup-exit leaf rows.
    async fn add_rollup_exit_leaves(
        &mut self,
        leaves: &[RollupExitLeaf],
    ) -> Result<(), MerkleError>;
}

/// In-memory store used by tree and proof tests.
#[derive(Default)]
pub struct MemMerkleStore {
    nodes: HashMap<B256, (B256, B256)>,
    /// Per network, the root written after each leaf, in leaf order.
    roots: HashMap<u32, Vec<B256>>,
    rollup_leaves: Vec<RollupExitLeaf>,
    next_rollup_leaf_id: u64,
}

impl MemMerkleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn all_rollup_leaves(&self) -> &[RollupExitLeaf] {
        &self.rollup_leaves
    }
}

#[async_trait]
impl MerkleStore for MemMerkleStore {
    async fn get_node(&mut self, key: B256) -> Result<Option<(B256, B256)>, MerkleError> {
        Ok(self.nodes.get(&key).copied())
    }

    async fn bulk_set_nodes(
        &mut self,
        _deposit_id: u64,
        nodes: &[NodeRow],
    ) -> Result<(), MerkleError> {
        for node in nodes {
            self.nodes.insert(node.key, (node.left, node.right));
        }
        Ok(())
    }

    async fn set_root(
        &mut self,
        root: B256,
        _deposit_id: u64,
        network: u32,
    ) -> Result<(), MerkleError> {
        self.roots.entry(network).or_default().push(root);
        Ok(())
    }

    async fn get_last_deposit_count(&mut self, network: u32) -> Result<Option<u32>, MerkleError> {
        Ok(self
            .roots
            .get(&network)
            .filter(|roots| !roots.is_empty())
            .map(|roots| roots.len() as u32 - 1))
    }

    async fn get_root_by_deposit_count(
        &mut self,
        deposit_count: u32,
        network: u32,
    ) -> Result<Option<B256>, MerkleError> {
        Ok(self
            .roots
            .get(&network)
            .and_then(|roots| roots.get(deposit_count as usize))
            .copied())
    }

    async fn reset_merkle_roots(
        &mut self,
        deposit_count: u32,
        network: u32,
    ) -> Result<(), MerkleError> {
        if let Some(roots) = self.roots.get_mut(&network) {
            roots.truncate(deposit_count as usize);
        }
        Ok(())
    }

    async fn get_latest_rollup_exit_leaves(
        &mut self,
    ) -> Result<Vec<RollupExitLeaf>, MerkleError> {
        let mut latest: HashMap<u32, RollupExitLeaf> = HashMap::new();
        for leaf in &self.rollup_leaves {
            let keep = latest
                .get(&leaf.rollup_id)
                .map(|existing| existing.id < leaf.id)
                .unwrap_or(true);
            if keep {
                latest.insert(leaf.rollup_id, leaf.clone());
            }
        }
        let mut leaves: Vec<_> = latest.into_values().collect();
        leaves.sort_by_key(|leaf| leaf.rollup_id);
        Ok(leaves)
    }

    async fn add_rollup_exit_leaves(
        &mut self,
        leaves: &[RollupExitLeaf],
    ) -> Result<(), MerkleError> {
        for leaf in leaves {
            self.next_rollup_leaf_id += 1;
            let mut row = leaf.clone();
            row.id = self.next_rollup_leaf_id;
            self.rollup_leaves.push(row);
        }
        Ok(())
    }
}
