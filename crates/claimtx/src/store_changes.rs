use sqlx::PgConnection;
use tr_storage::{self as storage, StorageError};
use tr_types::{MonitoredTx, MonitoredTxGroup};
use tracing::debug;

/// Row updates staged during one monitor pass and flushed in a single
/// transaction at the end, so a failing RPC mid-pass never leaves half a
/// tick's bookkeeping behind.
#[derive(Default)]
pub struct StoreChanges {
    update_groups: Vec<MonitoredTxGroup>,
    update_txs: Vec<MonitoredTx>,
}

impl StoreChanges {
    pub fn new() -> Self {
        StoreChanges::default()
    }

    pub fn update_group(&mut self, group: MonitoredTxGroup) {
        self.update_groups.push(group);
    }

    pub fn update_tx(&mut self, mtx: MonitoredTx) {
        self.update_txs.push(mtx);
    }

    pub fn is_empty(&self) -> bool {
        self.update_groups.is_empty() && self.update_txs.is_empty()
    }

    pub async fn execute(self, conn: &mut PgConnection) -> Result<(), StorageError> {
        for group in &self.update_groups {
            debug!(group_id = group.group_id, status = group.status.as_str(), "updating group");
            storage::update_monitored_txs_group(conn, group).await?;
        }
        for mtx in &self.update_txs {
            debug!(deposit_id = mtx.deposit_id, status = mtx.status.as_str(), "updating tx");
            storage::update_claim_tx(conn, mtx).await?;
        }
        Ok(())
    }
}
