use alloy_primitives::B256;
use tr_types::RollupExitLeaf;

use crate::{
    zero_hashes::{hash_pair, zero_hashes},
    MerkleError,
};

/// Lays the latest per-rollup leaves out as a leaf vector, rollup `r` at
/// position `r - 1`. Rollups that never verified a batch stay at the zero
/// leaf.
pub fn rollup_leaves_to_vector(leaves: &[RollupExitLeaf]) -> Vec<B256> {
    let max_rollup = leaves.iter().map(|l| l.rollup_id).max().unwrap_or(0);
    let mut vector = vec![B256::ZERO; max_rollup as usize];
    for leaf in leaves {
        if leaf.rollup_id > 0 {
            vector[leaf.rollup_id as usize - 1] = leaf.leaf;
        }
    }
    vector
}

/// Siblings and root for `index` over an ordered leaf vector padded with
/// the zero chain to `2^height` entries.
pub fn compute_siblings(
    index: u32,
    leaves: &[B256],
    height: usize,
) -> Result<(Vec<B256>, B256), MerkleError> {
    let zero = zero_hashes(height);
    let mut level: Vec<B256> = leaves.to_vec();
    let mut siblings = Vec::with_capacity(height);
    let mut idx = index as usize;
    for (h, z) in zero.iter().enumerate().take(height) {
        if level.is_empty() {
            level.push(*z);
        }
        let sibling = if idx % 2 == 1 {
            level.get(idx - 1).copied().unwrap_or(*z)
        } else {
            level.get(idx + 1).copied().unwrap_or(*z)
        };
        siblings.push(sibling);

        let mut next = Vec::with_capacity(level.len() / 2 + 1);
        for pair in level.chunks(2) {
            let left = pair[0];
            let right = if pair.len() == 2 { pair[1] } else { *z };
            next.push(hash_pair(left, right));
        }
        level = next;
        idx /= 2;
    }
    Ok((siblings, level[0]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{tree::verify_proof, TREE_HEIGHT};

    fn leaf(rollup_id: u32, byte: u8) -> RollupExitLeaf {
        RollupExitLeaf {
            rollup_id,
            leaf: B256::repeat_byte(byte),
            ..Default::default()
        }
    }

    #[test]
    fn empty_set_root_is_zero_chain_top() {
        let (siblings, root) = compute_siblings(0, &[], TREE_HEIGHT).unwrap();
        let zero = zero_hashes(TREE_HEIGHT);
        assert_eq!(root, zero[TREE_HEIGHT]);
        assert_eq!(siblings.len(), TREE_HEIGHT);
        assert_eq!(siblings[0], zero[0]);
    }

    #[test]
    fn proofs_verify_for_every_index() {
        let leaves: Vec<B256> = (1u8..=7).map(B256::repeat_byte).collect();
        let (_, root) = compute_siblings(0, &leaves, TREE_HEIGHT).unwrap();
        for (i, leaf) in leaves.iter().enumerate() {
            let (siblings, r) = compute_siblings(i as u32, &leaves, TREE_HEIGHT).unwrap();
            assert_eq!(r, root);
            assert!(verify_proof(*leaf, i as u32, &siblings, root));
        }
    }

    #[test]
    fn vector_layout_skips_missing_rollups() {
        let vector = rollup_leaves_to_vector(&[leaf(1, 0xaa), leaf(3, 0xcc)]);
        assert_eq!(vector.len(), 3);
        assert_eq!(vector[0], B256::repeat_byte(0xaa));
        assert_eq!(vector[1], B256::ZERO);
        assert_eq!(vector[2], B256::repeat_byte(0xcc));
    }
}
