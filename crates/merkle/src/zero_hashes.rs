use alloy_primitives::B256;
use sha3::{Digest, Keccak256};

pub(crate) fn hash_pair(left: B256, right: B256) -> B256 {
    let mut hasher = Keccak256::new();
    hasher.update(left.as_slice());
    hasher.update(right.as_slice());
    B256::from_slice(&hasher.finalize())
}

/// The zero chain `Z[0..=height]`: `Z[0] = 0^32`,
/// `Z[h+1] = keccak256(Z[h] ‖ Z[h])`.
pub fn zero_hashes(height: usize) -> Vec<B256> {
    let mut chain = Vec::with_capacity(height + 1);
    chain.push(B256::ZERO);
    for h in 0..height {
        chain.push(hash_pair(chain[h], chain[h]));
    }
    chain
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_prefix() {
        let chain = zero_hashes(3);
        assert_eq!(chain[0], B256::ZERO);
        assert_eq!(
            hex::encode(chain[1].as_slice()),
            "ad3228b676f7d3cd4284a5443f17f1962b36e491b30a40b2405849e597ba5fb5"
        );
        assert_eq!(
            hex::encode(chain[2].as_slice()),
            "b4c11951957c6f8f642c4af61cd6b24640fec6dc7fc607ee8206a99e92410d30"
        );
    }
}
