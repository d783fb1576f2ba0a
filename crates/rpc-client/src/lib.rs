//! Chain-facing clients for the trestle bridge service.
//!
//! The transport is a thin tracing wrapper over an HTTP JSON-RPC client.
//! On top of it live the typed eth method surface, the trusted-node
//! surface served by rollup sequencers, the log decoder that turns raw
//! logs into ordered per-block event streams, and the ABI builders for
//! claim transactions.

pub mod calldata;
mod error;
mod eth_client;
mod events;
mod rollup_client;
mod types;
mod utils;

pub use error::RpcRequestError;
pub use eth_client::{CallMsg, EthClient};
pub use events::EventScanner;
pub use rollup_client::{ExitRoots, RollupNodeClient};
pub use types::{RpcBlockHeader, RpcLog, RpcTransactionReceipt};
pub use utils::TracingHttpClient;
