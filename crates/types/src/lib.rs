//! Entity types shared by the trestle bridge service crates.
//!
//! Everything that crosses a crate boundary lives here: the chain-facing
//! records produced by the event decoder, the rows persisted by storage,
//! and the hashing/codec rules both sides must agree on.

mod entities;
mod global_index;
mod hashing;
mod monitored;

pub use entities::{
    Block, BlockEvents, Claim, Deposit, Event, GlobalExitRoot, RollupExitLeaf, TokenMetadata,
    TokenWrapped, VerifiedBatch,
};
pub use global_index::{decode_global_index, generate_global_index};
pub use hashing::{deposit_leaf_hash, ger_hash, keccak256};
pub use monitored::{
    MonitoredTx, MonitoredTxGroup, MonitoredTxGroupStatus, MonitoredTxStatus, StatusParseError,
    MAX_HISTORY_SIZE,
};

/// Network identifier. `0` is the L1 settlement chain, positive values are
/// rollups. A rollup's index into the rollups-exit tree is `network_id - 1`.
pub type NetworkId = u32;

/// The L1 settlement chain network id.
pub const MAINNET_NETWORK_ID: NetworkId = 0;

/// Leaf type of an asset bridge deposit.
pub const LEAF_TYPE_ASSET: u8 = 0;

/// Leaf type of a message bridge deposit.
pub const LEAF_TYPE_MESSAGE: u8 = 1;
