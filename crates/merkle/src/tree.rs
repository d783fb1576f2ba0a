use alloy_primitives::B256;

use crate::{
    store::{MerkleStore, NodeRow},
    zero_hashes::{hash_pair, zero_hashes},
    MerkleError,
};

/// One append-only exit tree. The struct caches the leaf count and the
/// frontier (root of every completed left subtree); both are rebuilt from
/// the store on construction and after a reorg reset, so the only durable
/// state is the node and root tables.
pub struct MerkleTree {
    network: u32,
    height: usize,
    count: u32,
    frontier: Vec<B256>,
    zero: Vec<B256>,
}

impl MerkleTree {
    pub async fn new<S: MerkleStore>(
        store: &mut S,
        height: u8,
        network: u32,
    ) -> Result<Self, MerkleError> {
        let height = height as usize;
        let mut tree = MerkleTree {
            network,
            height,
            count: 0,
            frontier: vec![B256::ZERO; height],
            zero: zero_hashes(height),
        };
        tree.reload(store).await?;
        Ok(tree)
    }

    pub fn network(&self) -> u32 {
        self.network
    }

    /// Number of leaves currently in the tree.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Appends a leaf at `expected_index`, persisting the new spine and the
    /// resulting root attributed to `deposit_id`.
    pub async fn add_leaf<S: MerkleStore>(
        &mut self,
        store: &mut S,
        deposit_id: u64,
        leaf: B256,
        expected_index: u32,
    ) -> Result<B256, MerkleError> {
        if expected_index != self.count {
            return Err(MerkleError::OutOfOrder {
                expected: self.count,
                got: expected_index,
            });
        }

        let mut nodes = Vec::with_capacity(self.height);
        let mut cur = leaf;
        for h in 0..self.height {
            let (left, right) = if expected_index >> h & 1 == 1 {
                (self.frontier[h], cur)
            } else {
                self.frontier[h] = cur;
                (cur, self.zero[h])
            };
            cur = hash_pair(left, right);
            nodes.push(NodeRow {
                key: cur,
                left,
                right,
            });
        }

        store.bulk_set_nodes(deposit_id, &nodes).await?;
        store.set_root(cur, deposit_id, self.network).await?;
        self.count += 1;
        Ok(cur)
    }

    /// Root after the last append; the empty-tree root when no leaf landed.
    pub async fn get_root<S: MerkleStore>(&self, store: &mut S) -> Result<B256, MerkleError> {
        if self.count == 0 {
            return Ok(self.zero[self.height]);
        }
        store
            .get_root_by_deposit_count(self.count - 1, self.network)
            .await?
            .ok_or(MerkleError::MissingRoot {
                deposit_count: self.count - 1,
                network: self.network,
            })
    }

    /// Rewinds the tree to `deposit_count` leaves after a reorg truncated
    /// storage, then rebuilds the in-memory state from what survived.
    pub async fn reset_leaf<S: MerkleStore>(
        &mut self,
        store: &mut S,
        deposit_count: u32,
    ) -> Result<(), MerkleError> {
        store
            .reset_merkle_roots(deposit_count, self.network)
            .await?;
        self.reload(store).await
    }

    async fn reload<S: MerkleStore>(&mut self, store: &mut S) -> Result<(), MerkleError> {
        self.frontier = vec![B256::ZERO; self.height];
        self.count = match store.get_last_deposit_count(self.network).await? {
            None => 0,
            Some(last) => last + 1,
        };
        if self.count == 0 {
            return Ok(());
        }
        let root = store
            .get_root_by_deposit_count(self.count - 1, self.network)
            .await?
            .ok_or(MerkleError::MissingRoot {
                deposit_count: self.count - 1,
                network: self.network,
            })?;
        self.rebuild_frontier(store, root).await
    }

    /// Walks the node pairs down from `root` along the path of the next
    /// insertion index, recording the left child wherever the path goes
    /// right. The walk stops once the remaining suffix of the index is
    /// zero: below that point every subtree on the path is empty and no
    /// frontier entry will be read before it is rewritten.
    async fn rebuild_frontier<S: MerkleStore>(
        &mut self,
        store: &mut S,
        root: B256,
    ) -> Result<(), MerkleError> {
        let index = self.count as u64;
        let mut cur = root;
        for h in (0..self.height).rev() {
            let remaining = index & ((1u64 << (h + 1)) - 1);
            if remaining == 0 {
                break;
            }
            let (left, right) = store
                .get_node(cur)
                .await?
                .ok_or(MerkleError::MissingNode(cur))?;
            if index >> h & 1 == 1 {
                self.frontier[h] = left;
                cur = right;
            } else {
                cur = left;
            }
        }
        Ok(())
    }
}

/// Recomputes a root bottom-up from a leaf and its siblings.
pub fn verify_proof(leaf: B256, index: u32, siblings: &[B256], root: B256) -> bool {
    let mut cur = leaf;
    for (h, sibling) in siblings.iter().enumerate() {
        cur = if index >> h & 1 == 1 {
            hash_pair(*sibling, cur)
        } else {
            hash_pair(cur, *sibling)
        };
    }
    cur == root
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, Rng, SeedableRng};

    use super::*;
    use crate::{store::MemMerkleStore, TREE_HEIGHT};

    /// Reference implementation: full recompute over the padded leaf set.
    fn reference_root(leaves: &[B256], height: usize) -> B256 {
        let zero = zero_hashes(height);
        let mut level = leaves.to_vec();
        for item in zero.iter().take(height) {
            let mut next = Vec::with_capacity(level.len() / 2 + 1);
            for pair in level.chunks(2) {
                let left = pair[0];
                let right = if pair.len() == 2 { pair[1] } else { *item };
                next.push(hash_pair(left, right));
            }
            if next.is_empty() {
                next.push(hash_pair(*item, *item));
            }
            level = next;
        }
        level[0]
    }

    fn random_leaves(n: usize, seed: u64) -> Vec<B256> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| {
                let mut bytes = [0u8; 32];
                rng.fill(&mut bytes);
                B256::from(bytes)
            })
            .collect()
    }

    #[tokio::test]
    async fn roots_match_reference_after_every_append() {
        let mut store = MemMerkleStore::new();
        let mut tree = MerkleTree::new(&mut store, TREE_HEIGHT as u8, 0).await.unwrap();
        let leaves = random_leaves(130, 1);
        for (i, leaf) in leaves.iter().enumerate() {
            let root = tree
                .add_leaf(&mut store, i as u64 + 1, *leaf, i as u32)
                .await
                .unwrap();
            assert_eq!(
                root,
                reference_root(&leaves[..=i], TREE_HEIGHT),
                "root diverged at leaf {i}"
            );
        }
    }

    #[tokio::test]
    async fn empty_tree_root_is_top_of_zero_chain() {
        let mut store = MemMerkleStore::new();
        let tree = MerkleTree::new(&mut store, TREE_HEIGHT as u8, 0).await.unwrap();
        assert_eq!(
            tree.get_root(&mut store).await.unwrap(),
            zero_hashes(TREE_HEIGHT)[TREE_HEIGHT]
        );
    }

    #[tokio::test]
    async fn rejects_out_of_order_append() {
        let mut store = MemMerkleStore::new();
        let mut tree = MerkleTree::new(&mut store, TREE_HEIGHT as u8, 0).await.unwrap();
        let err = tree
            .add_leaf(&mut store, 1, B256::repeat_byte(1), 5)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MerkleError::OutOfOrder {
                expected: 0,
                got: 5
            }
        ));
    }

    #[tokio::test]
    async fn frontier_rebuild_continues_identically() {
        let leaves = random_leaves(77, 2);
        // Continuous tree.
        let mut store_a = MemMerkleStore::new();
        let mut continuous = MerkleTree::new(&mut store_a, TREE_HEIGHT as u8, 3).await.unwrap();
        // Tree reloaded from the store midway.
        let mut store_b = MemMerkleStore::new();
        let mut reloaded = MerkleTree::new(&mut store_b, TREE_HEIGHT as u8, 3).await.unwrap();
        for (i, leaf) in leaves[..40].iter().enumerate() {
            continuous
                .add_leaf(&mut store_a, i as u64 + 1, *leaf, i as u32)
                .await
                .unwrap();
            reloaded
                .add_leaf(&mut store_b, i as u64 + 1, *leaf, i as u32)
                .await
                .unwrap();
        }
        let mut reloaded = MerkleTree::new(&mut store_b, TREE_HEIGHT as u8, 3).await.unwrap();
        assert_eq!(reloaded.count(), 40);
        for (i, leaf) in leaves.iter().enumerate().skip(40) {
            let a = continuous
                .add_leaf(&mut store_a, i as u64 + 1, *leaf, i as u32)
                .await
                .unwrap();
            let b = reloaded
                .add_leaf(&mut store_b, i as u64 + 1, *leaf, i as u32)
                .await
                .unwrap();
            assert_eq!(a, b, "diverged after reload at leaf {i}");
        }
    }

    #[tokio::test]
    async fn reset_rewinds_to_earlier_root() {
        let leaves = random_leaves(20, 3);
        let mut store = MemMerkleStore::new();
        let mut tree = MerkleTree::new(&mut store, TREE_HEIGHT as u8, 0).await.unwrap();
        let mut roots = Vec::new();
        for (i, leaf) in leaves.iter().enumerate() {
            roots.push(
                tree.add_leaf(&mut store, i as u64 + 1, *leaf, i as u32)
                    .await
                    .unwrap(),
            );
        }
        tree.reset_leaf(&mut store, 12).await.unwrap();
        assert_eq!(tree.count(), 12);
        assert_eq!(tree.get_root(&mut store).await.unwrap(), roots[11]);
        // Appends continue as if leaves 12.. never happened.
        let root = tree
            .add_leaf(&mut store, 100, leaves[12], 12)
            .await
            .unwrap();
        assert_eq!(root, roots[12]);
    }

    #[tokio::test]
    async fn two_engines_same_stream_same_roots() {
        let leaves = random_leaves(50, 4);
        let mut store_a = MemMerkleStore::new();
        let mut store_b = MemMerkleStore::new();
        let mut tree_a = MerkleTree::new(&mut store_a, TREE_HEIGHT as u8, 1).await.unwrap();
        let mut tree_b = MerkleTree::new(&mut store_b, TREE_HEIGHT as u8, 1).await.unwrap();
        for (i, leaf) in leaves.iter().enumerate() {
            let a = tree_a
                .add_leaf(&mut store_a, i as u64 + 1, *leaf, i as u32)
                .await
                .unwrap();
            let b = tree_b
                .add_leaf(&mut store_b, i as u64 + 1, *leaf, i as u32)
                .await
                .unwrap();
            assert_eq!(a, b);
        }
        assert_eq!(store_a.node_count(), store_b.node_count());
    }
}
