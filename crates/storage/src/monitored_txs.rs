use std::str::FromStr;

use alloy_primitives::B256;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, Row};
use tr_types::{MonitoredTx, MonitoredTxGroup, MonitoredTxGroupStatus, MonitoredTxStatus};

use crate::{
    row::{as_address, as_amount, as_b256},
    StorageError,
};

fn monitored_tx_from_row(row: &sqlx::postgres::PgRow) -> Result<MonitoredTx, StorageError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = MonitoredTxStatus::from_str(&status_raw)
        .map_err(|err| StorageError::Decode(err.to_string()))?;
    let history = row
        .try_get::<Vec<Vec<u8>>, _>("history")?
        .iter()
        .map(|raw| as_b256(raw))
        .collect::<Result<Vec<B256>, _>>()?;
    let to = row
        .try_get::<Option<Vec<u8>>, _>("to_addr")?
        .map(|raw| as_address(&raw))
        .transpose()?;
    Ok(MonitoredTx {
        deposit_id: row.try_get::<i64, _>("deposit_id")? as u64,
        from: as_address(&row.try_get::<Vec<u8>, _>("from_addr")?)?,
        to,
        nonce: row.try_get::<i64, _>("nonce")? as u64,
        value: as_amount(&row.try_get::<String, _>("value")?)?,
        data: row.try_get::<Vec<u8>, _>("data")?,
        gas: row.try_get::<i64, _>("gas")? as u64,
        status,
        history,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
        group_id: row.try_get::<Option<i64>, _>("group_id")?.map(|id| id as u64),
        global_exit_root: as_b256(&row.try_get::<Vec<u8>, _>("global_exit_root")?)?,
    })
}

fn history_to_vec(history: &[B256]) -> Vec<Vec<u8>> {
    history.iter().map(|h| h.as_slice().to_vec()).collect()
}

/// Inserts a monitored claim tx. The deposit-id primary key enforces at
/// most one per deposit.
pub async fn add_claim_tx(
    conn: &mut PgConnection,
    mtx: &MonitoredTx,
) -> Result<(), StorageError> {
    let now = Utc::now();
    sqlx::query(
        "INSERT INTO sync.monitored_txs (deposit_id, from_addr, to_addr, nonce, value, data, \
         gas, status, history, created_at, updated_at, group_id, global_exit_root) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
    )
    .bind(mtx.deposit_id as i64)
    .bind(mtx.from.as_slice())
    .bind(mtx.to.map(|to| to.as_slice().to_vec()))
    .bind(mtx.nonce as i64)
    .bind(mtx.value.to_string())
    .bind(&mtx.data)
    .bind(mtx.gas as i64)
    .bind(mtx.status.as_str())
    .bind(history_to_vec(&mtx.history))
    .bind(now)
    .bind(now)
    .bind(mtx.group_id.map(|id| id as i64))
    .bind(mtx.global_exit_root.as_slice())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Whether a deposit already has a monitored tx.
pub async fn monitored_tx_exists(
    conn: &mut PgConnection,
    deposit_id: u64,
) -> Result<bool, StorageError> {
    let row = sqlx::query("SELECT 1 AS one FROM sync.monitored_txs WHERE deposit_id = $1")
        .bind(deposit_id as i64)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.is_some())
}

pub async fn update_claim_tx(
    conn: &mut PgConnection,
    mtx: &MonitoredTx,
) -> Result<(), StorageError> {
    sqlx::query(
        "UPDATE sync.monitored_txs SET from_addr = $2, to_addr = $3, nonce = $4, value = $5, \
         data = $6, gas = $7, status = $8, history = $9, updated_at = $10, group_id = $11 \
         WHERE deposit_id = $1",
    )
    .bind(mtx.deposit_id as i64)
    .bind(mtx.from.as_slice())
    .bind(mtx.to.map(|to| to.as_slice().to_vec()))
    .bind(mtx.nonce as i64)
    .bind(mtx.value.to_string())
    .bind(&mtx.data)
    .bind(mtx.gas as i64)
    .bind(mtx.status.as_str())
    .bind(history_to_vec(&mtx.history))
    .bind(Utc::now())
    .bind(mtx.group_id.map(|id| id as i64))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Monitored txs for one destination network in any of `statuses`, oldest
/// first.
pub async fn get_claim_txs_by_status(
    conn: &mut PgConnection,
    statuses: &[MonitoredTxStatus],
    dest_net: u32,
) -> Result<Vec<MonitoredTx>, StorageError> {
    let statuses: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
    let rows = sqlx::query(
        "SELECT deposit_id, from_addr, to_addr, nonce, value, data, gas, status, history, \
         created_at, updated_at, group_id, global_exit_root \
         FROM sync.monitored_txs \
         INNER JOIN sync.deposit ON sync.deposit.id = sync.monitored_txs.deposit_id \
         WHERE status = ANY($1) AND sync.deposit.dest_net = $2 ORDER BY created_at ASC",
    )
    .bind(statuses)
    .bind(dest_net as i64)
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(monitored_tx_from_row).collect()
}

/// Created txs not attached to any group yet, oldest first.
pub async fn get_ungrouped_created_txs(
    conn: &mut PgConnection,
    dest_net: u32,
) -> Result<Vec<MonitoredTx>, StorageError> {
    let rows = sqlx::query(
        "SELECT deposit_id, from_addr, to_addr, nonce, value, data, gas, status, history, \
         created_at, updated_at, group_id, global_exit_root \
         FROM sync.monitored_txs \
         INNER JOIN sync.deposit ON sync.deposit.id = sync.monitored_txs.deposit_id \
         WHERE status = $1 AND group_id IS NULL AND sync.deposit.dest_net = $2 \
         ORDER BY created_at ASC",
    )
    .bind(MonitoredTxStatus::Created.as_str())
    .bind(dest_net as i64)
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(monitored_tx_from_row).collect()
}

/// Member txs of a compressed claim group, oldest first.
pub async fn get_claim_txs_by_group_id(
    conn: &mut PgConnection,
    group_id: u64,
) -> Result<Vec<MonitoredTx>, StorageError> {
    let rows = sqlx::query(
        "SELECT deposit_id, from_addr, to_addr, nonce, value, data, gas, status, history, \
         created_at, updated_at, group_id, global_exit_root \
         FROM sync.monitored_txs WHERE group_id = $1 ORDER BY created_at ASC",
    )
    .bind(group_id as i64)
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(monitored_tx_from_row).collect()
}

fn group_from_row(row: &sqlx::postgres::PgRow) -> Result<MonitoredTxGroup, StorageError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = MonitoredTxGroupStatus::from_str(&status_raw)
        .map_err(|err| StorageError::Decode(err.to_string()))?;
    let tx_hash = row
        .try_get::<Option<Vec<u8>>, _>("tx_hash")?
        .map(|raw| as_b256(&raw))
        .transpose()?;
    Ok(MonitoredTxGroup {
        group_id: row.try_get::<i64, _>("group_id")? as u64,
        status,
        compressed_tx_data: row.try_get::<Vec<u8>, _>("compressed_tx_data")?,
        tx_hash,
        num_retries: row.try_get::<i64, _>("num_retries")? as u32,
        last_log: row.try_get::<String, _>("last_log")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

/// Inserts a group and returns its assigned id.
pub async fn add_monitored_txs_group(
    conn: &mut PgConnection,
    group: &MonitoredTxGroup,
) -> Result<u64, StorageError> {
    let now = Utc::now();
    let row = sqlx::query(
        "INSERT INTO sync.monitored_txs_group (status, compressed_tx_data, tx_hash, num_retries, \
         last_log, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING group_id",
    )
    .bind(group.status.as_str())
    .bind(&group.compressed_tx_data)
    .bind(group.tx_hash.map(|h| h.as_slice().to_vec()))
    .bind(group.num_retries as i64)
    .bind(&group.last_log)
    .bind(now)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;
    Ok(row.try_get::<i64, _>("group_id")? as u64)
}

pub async fn update_monitored_txs_group(
    conn: &mut PgConnection,
    group: &MonitoredTxGroup,
) -> Result<(), StorageError> {
    sqlx::query(
        "UPDATE sync.monitored_txs_group SET status = $2, compressed_tx_data = $3, tx_hash = $4, \
         num_retries = $5, last_log = $6, updated_at = $7 WHERE group_id = $1",
    )
    .bind(group.group_id as i64)
    .bind(group.status.as_str())
    .bind(&group.compressed_tx_data)
    .bind(group.tx_hash.map(|h| h.as_slice().to_vec()))
    .bind(group.num_retries as i64)
    .bind(&group.last_log)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Groups in any of `statuses`, oldest first.
pub async fn get_monitored_txs_groups(
    conn: &mut PgConnection,
    statuses: &[MonitoredTxGroupStatus],
) -> Result<Vec<MonitoredTxGroup>, StorageError> {
    let statuses: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
    let rows = sqlx::query(
        "SELECT group_id, status, compressed_tx_data, tx_hash, num_retries, last_log, \
         created_at, updated_at \
         FROM sync.monitored_txs_group WHERE status = ANY($1) ORDER BY created_at ASC",
    )
    .bind(statuses)
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(group_from_row).collect()
}

/// Detaches a failed group's members and puts them back on the individual
/// retry path.
pub async fn release_group_txs(
    conn: &mut PgConnection,
    group_id: u64,
) -> Result<(), StorageError> {
    sqlx::query(
        "UPDATE sync.monitored_txs SET group_id = NULL, status = $2, updated_at = $3 \
         WHERE group_id = $1",
    )
    .bind(group_id as i64)
    .bind(MonitoredTxStatus::Created.as_str())
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Marks every member of a group with one status.
pub async fn set_group_txs_status(
    conn: &mut PgConnection,
    group_id: u64,
    status: MonitoredTxStatus,
) -> Result<(), StorageError> {
    sqlx::query(
        "UPDATE sync.monitored_txs SET status = $2, updated_at = $3 WHERE group_id = $1",
    )
    .bind(group_id as i64)
    .bind(status.as_str())
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// The trusted GER able to witness an L2-origin deposit: it walks deposit →
/// exit-tree root → rollups-exit leaf → GER on the destination network,
/// newest first.
pub async fn get_latest_trusted_ger_by_deposit(
    conn: &mut PgConnection,
    deposit_cnt: u32,
    network_id: u32,
    dest_net: u32,
) -> Result<B256, StorageError> {
    let row = sqlx::query(
        "SELECT sync.exit_root.global_exit_root AS ger FROM sync.deposit \
         INNER JOIN mt.root ON mt.root.deposit_id = sync.deposit.id \
         INNER JOIN mt.rollup_exit ON mt.rollup_exit.leaf = mt.root.root \
         INNER JOIN sync.exit_root ON sync.exit_root.exit_roots[2] = mt.rollup_exit.root \
         WHERE sync.exit_root.allowed = true AND deposit_cnt = $1 \
         AND sync.deposit.network_id = $2 AND dest_net = $3 AND mt.rollup_exit.rollup_id = $2 \
         AND sync.exit_root.network_id = sync.deposit.dest_net \
         ORDER BY sync.exit_root.id DESC LIMIT 1",
    )
    .bind(deposit_cnt as i64)
    .bind(network_id as i64)
    .bind(dest_net as i64)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(StorageError::NotFound)?;
    as_b256(&row.try_get::<Vec<u8>, _>("ger")?)
}
