use alloy_primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Keep at most this many attempted tx hashes per monitored tx.
pub const MAX_HISTORY_SIZE: usize = 10;

#[derive(Error, Debug)]
#[error("unknown status: {0}")]
pub struct StatusParseError(pub String);

/// Lifecycle of a claim transaction the manager is responsible for landing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MonitoredTxStatus {
    /// Recorded but not broadcast yet.
    Created,
    /// Broadcast at least once, no successful receipt yet.
    Sent,
    /// A receipt with success status was observed. Terminal.
    Mined,
    /// Given up. Terminal.
    Failed,
}

impl MonitoredTxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitoredTxStatus::Created => "created",
            MonitoredTxStatus::Sent => "sent",
            MonitoredTxStatus::Mined => "mined",
            MonitoredTxStatus::Failed => "failed",
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, MonitoredTxStatus::Mined | MonitoredTxStatus::Failed)
    }
}

impl std::str::FromStr for MonitoredTxStatus {
    type Err = StatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(MonitoredTxStatus::Created),
            "sent" => Ok(MonitoredTxStatus::Sent),
            "mined" => Ok(MonitoredTxStatus::Mined),
            "failed" => Ok(MonitoredTxStatus::Failed),
            other => Err(StatusParseError(other.to_string())),
        }
    }
}

/// A claim transaction tracked to completion by the claim tx manager.
#[derive(Clone, Debug)]
pub struct MonitoredTx {
    /// Primary key; at most one monitored tx per deposit.
    pub deposit_id: u64,
    pub from: Address,
    pub to: Option<Address>,
    pub nonce: u64,
    pub value: U256,
    pub data: Vec<u8>,
    pub gas: u64,
    pub status: MonitoredTxStatus,
    /// Every tx hash this entry was ever broadcast under.
    pub history: Vec<B256>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub group_id: Option<u64>,
    /// The GER under which the claim proof was built.
    pub global_exit_root: B256,
}

impl MonitoredTx {
    /// Records an attempted tx hash, dropping the oldest entry beyond
    /// [`MAX_HISTORY_SIZE`].
    pub fn record_history(&mut self, tx_hash: B256) {
        if self.history.contains(&tx_hash) {
            return;
        }
        if self.history.len() >= MAX_HISTORY_SIZE {
            self.history.remove(0);
        }
        self.history.push(tx_hash);
    }
}

/// Lifecycle of a compressed claim group.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MonitoredTxGroupStatus {
    Created,
    Sent,
    Mined,
    Failed,
}

impl MonitoredTxGroupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitoredTxGroupStatus::Created => "created",
            MonitoredTxGroupStatus::Sent => "sent",
            MonitoredTxGroupStatus::Mined => "mined",
            MonitoredTxGroupStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for MonitoredTxGroupStatus {
    type Err = StatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(MonitoredTxGroupStatus::Created),
            "sent" => Ok(MonitoredTxGroupStatus::Sent),
            "mined" => Ok(MonitoredTxGroupStatus::Mined),
            "failed" => Ok(MonitoredTxGroupStatus::Failed),
            other => Err(StatusParseError(other.to_string())),
        }
    }
}

/// A batch of claims submitted through the claim compressor in one tx.
/// Member deposits are the monitored txs carrying this `group_id`.
#[derive(Clone, Debug)]
pub struct MonitoredTxGroup {
    pub group_id: u64,
    pub status: MonitoredTxGroupStatus,
    pub compressed_tx_data: Vec<u8>,
    pub tx_hash: Option<B256>,
    pub num_retries: u32,
    pub last_log: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_dedups_and_caps() {
        let mut mtx = MonitoredTx {
            deposit_id: 1,
            from: Address::ZERO,
            to: None,
            nonce: 0,
            value: U256::ZERO,
            data: vec![],
            gas: 0,
            status: MonitoredTxStatus::Created,
            history: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
            group_id: None,
            global_exit_root: B256::ZERO,
        };
        for i in 0..(MAX_HISTORY_SIZE as u8 + 5) {
            mtx.record_history(B256::repeat_byte(i));
            mtx.record_history(B256::repeat_byte(i));
        }
        assert_eq!(mtx.history.len(), MAX_HISTORY_SIZE);
        assert_eq!(*mtx.history.last().unwrap(), B256::repeat_byte(14));
    }

    #[test]
    fn status_round_trip() {
        for status in [
            MonitoredTxStatus::Created,
            MonitoredTxStatus::Sent,
            MonitoredTxStatus::Mined,
            MonitoredTxStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<MonitoredTxStatus>().unwrap(), status);
        }
    }
}
