//! The claim transaction manager.
//!
//! One manager runs per auto-claimable destination network. Fresh global
//! exit roots flip deposits to claimable and enqueue monitored claim
//! transactions; a periodic tick drives every monitored tx through its
//! state machine until it is mined or given up on. A grouping variant
//! batches ready claims into single compressed transactions.

mod manager;
mod monitor;
mod monitor_compressed;
mod nonce;
mod store_changes;

pub use manager::ClaimTxManager;
pub use monitor::MonitorTxs;
pub use monitor_compressed::MonitorCompressedTxs;
pub use nonce::NonceCache;
pub use store_changes::StoreChanges;
