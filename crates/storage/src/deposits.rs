use alloy_primitives::{Address, B256};
use sqlx::{PgConnection, Row};
use tr_types::Deposit;

use crate::{
    row::{as_address, as_amount, as_b256},
    StorageError,
};

const DEPOSIT_WITH_BLOCK_COLUMNS: &str = "d.id, d.leaf_type, d.orig_net, d.orig_addr, d.amount, \
     d.dest_net, d.dest_addr, d.deposit_cnt, d.block_id, b.block_num, d.network_id, d.tx_hash, \
     d.metadata, d.ready_for_claim";

fn deposit_from_row(
    row: &sqlx::postgres::PgRow,
    with_block_num: bool,
) -> Result<Deposit, StorageError> {
    Ok(Deposit {
        id: row.try_get::<i64, _>("id")? as u64,
        leaf_type: row.try_get::<i16, _>("leaf_type")? as u8,
        orig_net: row.try_get::<i64, _>("orig_net")? as u32,
        orig_addr: as_address(&row.try_get::<Vec<u8>, _>("orig_addr")?)?,
        amount: as_amount(&row.try_get::<String, _>("amount")?)?,
        dest_net: row.try_get::<i64, _>("dest_net")? as u32,
        dest_addr: as_address(&row.try_get::<Vec<u8>, _>("dest_addr")?)?,
        deposit_cnt: row.try_get::<i64, _>("deposit_cnt")? as u32,
        block_id: row.try_get::<i64, _>("block_id")? as u64,
        block_number: if with_block_num {
            row.try_get::<i64, _>("block_num")? as u64
        } else {
            0
        },
        network_id: row.try_get::<i64, _>("network_id")? as u32,
        tx_hash: as_b256(&row.try_get::<Vec<u8>, _>("tx_hash")?)?,
        metadata: row.try_get::<Vec<u8>, _>("metadata")?,
        ready_for_claim: row.try_get::<bool, _>("ready_for_claim")?,
    })
}

/// Inserts a deposit and returns its row id, which the caller hands to the
/// Merkle engine right away.
pub async fn add_deposit(conn: &mut PgConnection, deposit: &Deposit) -> Result<u64, StorageError> {
    let row = sqlx::query(
        "INSERT INTO sync.deposit (leaf_type, network_id, orig_net, orig_addr, amount, dest_net, \
         dest_addr, block_id, deposit_cnt, tx_hash, metadata) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) RETURNING id",
    )
    .bind(deposit.leaf_type as i16)
    .bind(deposit.network_id as i64)
    .bind(deposit.orig_net as i64)
    .bind(deposit.orig_addr.as_slice())
    .bind(deposit.amount.to_string())
    .bind(deposit.dest_net as i64)
    .bind(deposit.dest_addr.as_slice())
    .bind(deposit.block_id as i64)
    .bind(deposit.deposit_cnt as i64)
    .bind(deposit.tx_hash.as_slice())
    .bind(&deposit.metadata)
    .fetch_one(&mut *conn)
    .await?;
    Ok(row.try_get::<i64, _>("id")? as u64)
}

/// One deposit by `(network, deposit_cnt)`.
pub async fn get_deposit(
    conn: &mut PgConnection,
    deposit_cnt: u32,
    network_id: u32,
) -> Result<Deposit, StorageError> {
    let query = format!(
        "SELECT {DEPOSIT_WITH_BLOCK_COLUMNS} FROM sync.deposit AS d \
         INNER JOIN sync.block AS b ON d.network_id = b.network_id AND d.block_id = b.id \
         WHERE d.network_id = $1 AND deposit_cnt = $2"
    );
    let row = sqlx::query(&query)
        .bind(network_id as i64)
        .bind(deposit_cnt as i64)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(StorageError::NotFound)?;
    deposit_from_row(&row, true)
}

/// One deposit by its row id.
pub async fn get_deposit_by_row_id(
    conn: &mut PgConnection,
    id: u64,
) -> Result<Deposit, StorageError> {
    let query = format!(
        "SELECT {DEPOSIT_WITH_BLOCK_COLUMNS} FROM sync.deposit AS d \
         INNER JOIN sync.block AS b ON d.network_id = b.network_id AND d.block_id = b.id \
         WHERE d.id = $1"
    );
    let row = sqlx::query(&query)
        .bind(id as i64)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(StorageError::NotFound)?;
    deposit_from_row(&row, true)
}

/// Deposits addressed to `dest_addr`, newest first.
pub async fn get_deposits(
    conn: &mut PgConnection,
    dest_addr: Address,
    limit: u32,
    offset: u32,
) -> Result<Vec<Deposit>, StorageError> {
    let query = format!(
        "SELECT {DEPOSIT_WITH_BLOCK_COLUMNS} FROM sync.deposit AS d \
         INNER JOIN sync.block AS b ON d.network_id = b.network_id AND d.block_id = b.id \
         WHERE dest_addr = $1 ORDER BY d.block_id DESC, d.deposit_cnt DESC LIMIT $2 OFFSET $3"
    );
    let rows = sqlx::query(&query)
        .bind(dest_addr.as_slice())
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(|row| deposit_from_row(row, true)).collect()
}

pub async fn get_deposit_count(
    conn: &mut PgConnection,
    dest_addr: Address,
) -> Result<u64, StorageError> {
    let row = sqlx::query("SELECT COUNT(*) AS cnt FROM sync.deposit WHERE dest_addr = $1")
        .bind(dest_addr.as_slice())
        .fetch_one(&mut *conn)
        .await?;
    Ok(row.try_get::<i64, _>("cnt")? as u64)
}

/// Number of this network's deposits observed up to `block_number`.
pub async fn get_number_deposits(
    conn: &mut PgConnection,
    network_id: u32,
    block_number: u64,
) -> Result<u32, StorageError> {
    let row = sqlx::query(
        "SELECT coalesce(MAX(deposit_cnt), -1) AS cnt FROM sync.deposit AS d \
         INNER JOIN sync.block AS b ON d.network_id = b.network_id AND d.block_id = b.id \
         WHERE d.network_id = $1 AND b.block_num <= $2",
    )
    .bind(network_id as i64)
    .bind(block_number as i64)
    .fetch_one(&mut *conn)
    .await?;
    Ok((row.try_get::<i64, _>("cnt")? + 1) as u32)
}

/// Flips `ready_for_claim` on L1 deposits witnessed by the exit root and
/// destined for `dest_net`, returning the flipped rows.
///
/// "Witnessed" is defined through root linkage: a deposit is covered when
/// its count is at or below the count of the deposit that produced the
/// given L1 exit tree root.
pub async fn update_l1_deposits_status(
    conn: &mut PgConnection,
    exit_root: B256,
    dest_net: u32,
) -> Result<Vec<Deposit>, StorageError> {
    let rows = sqlx::query(
        "UPDATE sync.deposit SET ready_for_claim = true \
         WHERE deposit_cnt <= \
            (SELECT sync.deposit.deposit_cnt FROM mt.root INNER JOIN sync.deposit \
             ON sync.deposit.id = mt.root.deposit_id \
             WHERE mt.root.root = $1 AND mt.root.network = 0) \
         AND network_id = 0 AND ready_for_claim = false AND dest_net = $2 \
         RETURNING id, leaf_type, orig_net, orig_addr, amount, dest_net, dest_addr, deposit_cnt, \
                   block_id, network_id, tx_hash, metadata, ready_for_claim",
    )
    .bind(exit_root.as_slice())
    .bind(dest_net as i64)
    .fetch_all(&mut *conn)
    .await?;
    rows.iter()
        .map(|row| deposit_from_row(row, false))
        .collect()
}

/// Flips `ready_for_claim` on an L2 network's deposits once its local exit
/// root landed in the given rollups-exit root.
pub async fn update_l2_deposits_status(
    conn: &mut PgConnection,
    rollup_exit_root: B256,
    rollup_id: u32,
    network_id: u32,
) -> Result<(), StorageError> {
    sqlx::query(
        "UPDATE sync.deposit SET ready_for_claim = true \
         WHERE deposit_cnt <= \
            (SELECT sync.deposit.deposit_cnt FROM mt.root INNER JOIN sync.deposit \
             ON sync.deposit.id = mt.root.deposit_id \
             WHERE mt.root.root = \
                (SELECT leaf FROM mt.rollup_exit WHERE root = $1 AND rollup_id = $2) \
             AND mt.root.network = $3) \
         AND network_id = $3 AND ready_for_claim = false",
    )
    .bind(rollup_exit_root.as_slice())
    .bind(rollup_id as i64)
    .bind(network_id as i64)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Rollup-origin deposits destined for `dest_net` that have no claim there
/// yet.
pub async fn get_deposits_from_other_l2_to_claim(
    conn: &mut PgConnection,
    dest_net: u32,
) -> Result<Vec<Deposit>, StorageError> {
    let rows = sqlx::query(
        "SELECT id, leaf_type, orig_net, orig_addr, amount, dest_net, dest_addr, deposit_cnt, \
                block_id, network_id, tx_hash, metadata, ready_for_claim \
         FROM sync.deposit \
         WHERE deposit_cnt NOT IN \
            (SELECT index FROM sync.claim WHERE sync.claim.network_id = $1) \
         AND network_id != 0 AND dest_net = $1 AND ready_for_claim = true \
         ORDER BY id DESC",
    )
    .bind(dest_net as i64)
    .fetch_all(&mut *conn)
    .await?;
    rows.iter()
        .map(|row| deposit_from_row(row, false))
        .collect()
}

/// Claimable-but-unclaimed deposits at a destination, with the total count
/// for paging. `dest_addr` narrows to one receiver when set.
pub async fn get_pending_deposits_to_claim(
    conn: &mut PgConnection,
    dest_addr: Option<Address>,
    dest_net: u32,
    leaf_type: u8,
    limit: u32,
    offset: u32,
) -> Result<(Vec<Deposit>, u64), StorageError> {
    let addr_filter = match dest_addr {
        Some(addr) => format!("AND dest_addr = decode('{}', 'hex')", hex::encode(addr)),
        None => String::new(),
    };
    let count_query = format!(
        "SELECT count(*) AS cnt FROM sync.deposit \
         WHERE dest_net = $1 AND ready_for_claim = true AND leaf_type = $2 {addr_filter} \
         AND deposit_cnt NOT IN (SELECT index FROM sync.claim WHERE sync.claim.network_id = $1)"
    );
    let total = sqlx::query(&count_query)
        .bind(dest_net as i64)
        .bind(leaf_type as i16)
        .fetch_one(&mut *conn)
        .await?
        .try_get::<i64, _>("cnt")? as u64;

    let page_query = format!(
        "SELECT {DEPOSIT_WITH_BLOCK_COLUMNS} FROM sync.deposit AS d \
         INNER JOIN sync.block AS b ON d.block_id = b.id \
         WHERE dest_net = $1 AND ready_for_claim = true AND leaf_type = $2 {addr_filter} \
         AND d.deposit_cnt NOT IN (SELECT index FROM sync.claim WHERE sync.claim.network_id = $1) \
         ORDER BY d.deposit_cnt ASC LIMIT $3 OFFSET $4"
    );
    let rows = sqlx::query(&page_query)
        .bind(dest_net as i64)
        .bind(leaf_type as i16)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&mut *conn)
        .await?;
    let deposits = rows
        .iter()
        .map(|row| deposit_from_row(row, true))
        .collect::<Result<_, _>>()?;
    Ok((deposits, total))
}
