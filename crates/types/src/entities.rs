use alloy_primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};

/// A chain block that carried at least one event of interest.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Block {
    /// Storage row id, 0 until persisted.
    pub id: u64,
    pub block_number: u64,
    pub block_hash: B256,
    pub parent_hash: B256,
    pub network_id: u32,
    pub received_at: DateTime<Utc>,
}

/// A decoded block together with its events in log-index order.
///
/// The single ordered event vector replaces per-kind arrays plus a separate
/// order map: the position of an `Event` in `events` *is* its order.
#[derive(Clone, Debug, Default)]
pub struct BlockEvents {
    pub block: Block,
    pub events: Vec<Event>,
}

/// Everything the synchronizer knows how to apply, in one tagged stream.
#[derive(Clone, Debug)]
pub enum Event {
    GlobalExitRoot(GlobalExitRoot),
    RemoveL2Ger(GlobalExitRoot),
    Deposit(Deposit),
    Claim(Claim),
    TokenWrapped(TokenWrapped),
    VerifiedBatch(VerifiedBatch),
}

/// A global exit root observed on chain or served by a trusted node.
///
/// L1-originated entries carry both exit roots; L2 sovereign-chain entries
/// carry only the combined hash until the matching L1 pair is synced.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GlobalExitRoot {
    pub id: u64,
    pub block_id: u64,
    pub block_number: u64,
    pub global_exit_root: B256,
    /// `(mainnet_exit_root, rollup_exit_root)` when known.
    pub exit_roots: Option<(B256, B256)>,
    pub network_id: u32,
}

impl GlobalExitRoot {
    pub fn mainnet_exit_root(&self) -> B256 {
        self.exit_roots.map(|(m, _)| m).unwrap_or_default()
    }

    pub fn rollup_exit_root(&self) -> B256 {
        self.exit_roots.map(|(_, r)| r).unwrap_or_default()
    }
}

/// A bridge deposit; the leaf of a per-network exit tree.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Deposit {
    /// Storage row id, 0 until persisted.
    pub id: u64,
    pub leaf_type: u8,
    pub orig_net: u32,
    pub orig_addr: Address,
    pub amount: U256,
    pub dest_net: u32,
    pub dest_addr: Address,
    pub deposit_cnt: u32,
    pub block_id: u64,
    pub block_number: u64,
    pub network_id: u32,
    pub tx_hash: B256,
    pub metadata: Vec<u8>,
    pub ready_for_claim: bool,
}

/// An on-chain redemption of a deposit at its destination network.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Claim {
    pub mainnet_flag: bool,
    pub rollup_index: u32,
    pub index: u32,
    pub orig_net: u32,
    pub orig_addr: Address,
    pub amount: U256,
    pub dest_addr: Address,
    pub block_id: u64,
    pub block_number: u64,
    pub network_id: u32,
    pub tx_hash: B256,
}

/// ERC20 metadata decoded from deposit call data.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TokenMetadata {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

impl TokenMetadata {
    /// Decodes the bridge's token metadata payload, the ABI encoding of
    /// `(string name, string symbol, uint8 decimals)`. Malformed payloads
    /// yield `None`; the original deposit may carry arbitrary bytes.
    pub fn decode(data: &[u8]) -> Option<TokenMetadata> {
        let word = |offset: usize| -> Option<&[u8]> { data.get(offset..offset + 32) };
        let word_usize = |offset: usize| -> Option<usize> {
            let w = word(offset)?;
            if w[..24].iter().any(|b| *b != 0) {
                return None;
            }
            Some(u64::from_be_bytes(w[24..].try_into().ok()?) as usize)
        };
        let string_at = |head: usize| -> Option<String> {
            let tail = word_usize(head)?;
            let len = word_usize(tail)?;
            let bytes = data.get(tail + 32..tail + 32 + len)?;
            Some(String::from_utf8_lossy(bytes).into_owned())
        };
        let name = string_at(0)?;
        let symbol = string_at(32)?;
        let decimals = *word(64)?.last()?;
        Some(TokenMetadata {
            name,
            symbol,
            decimals,
        })
    }
}

/// A wrapped token deployed at a destination network.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TokenWrapped {
    pub orig_net: u32,
    pub orig_token_addr: Address,
    pub wrapped_token_addr: Address,
    pub block_id: u64,
    pub block_number: u64,
    pub network_id: u32,
    pub metadata: TokenMetadata,
}

/// A batch verification observed on the rollup manager.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VerifiedBatch {
    pub block_number: u64,
    pub batch_number: u64,
    pub rollup_id: u32,
    pub local_exit_root: B256,
    pub state_root: B256,
    pub aggregator: Address,
    pub tx_hash: B256,
}

/// One leaf of the rollups-exit tree: a rollup's local exit root together
/// with the aggregate root it produced.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RollupExitLeaf {
    pub id: u64,
    pub block_id: u64,
    pub leaf: B256,
    pub rollup_id: u32,
    pub root: B256,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn abi_string_word(s: &str) -> Vec<u8> {
        let mut out = Vec::new();
        let mut len = [0u8; 32];
        len[24..].copy_from_slice(&(s.len() as u64).to_be_bytes());
        out.extend_from_slice(&len);
        let mut body = s.as_bytes().to_vec();
        while body.len() % 32 != 0 {
            body.push(0);
        }
        out.extend_from_slice(&body);
        out
    }

    #[test]
    fn decodes_token_metadata() {
        // abi.encode("Wrapped Ether", "WETH", 18)
        let mut data = Vec::new();
        let head = |offset: u64| {
            let mut w = [0u8; 32];
            w[24..].copy_from_slice(&offset.to_be_bytes());
            w
        };
        let name_tail = abi_string_word("Wrapped Ether");
        data.extend_from_slice(&head(96));
        data.extend_from_slice(&head(96 + name_tail.len() as u64));
        let mut decimals = [0u8; 32];
        decimals[31] = 18;
        data.extend_from_slice(&decimals);
        data.extend_from_slice(&name_tail);
        data.extend_from_slice(&abi_string_word("WETH"));

        let metadata = TokenMetadata::decode(&data).unwrap();
        assert_eq!(metadata.name, "Wrapped Ether");
        assert_eq!(metadata.symbol, "WETH");
        assert_eq!(metadata.decimals, 18);
    }

    #[test]
    fn malformed_metadata_is_none() {
        assert!(TokenMetadata::decode(&[]).is_none());
        assert!(TokenMetadata::decode(&[0u8; 40]).is_none());
    }
}
