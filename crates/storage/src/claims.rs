use alloy_primitives::Address;
use sqlx::{PgConnection, Row};
use tr_types::Claim;

use crate::{
    row::{as_address, as_amount, as_b256},
    StorageError,
};

fn claim_from_row(row: &sqlx::postgres::PgRow) -> Result<Claim, StorageError> {
    Ok(Claim {
        mainnet_flag: row.try_get::<bool, _>("mainnet_flag")?,
        rollup_index: row.try_get::<i64, _>("rollup_index")? as u32,
        index: row.try_get::<i64, _>("index")? as u32,
        orig_net: row.try_get::<i64, _>("orig_net")? as u32,
        orig_addr: as_address(&row.try_get::<Vec<u8>, _>("orig_addr")?)?,
        amount: as_amount(&row.try_get::<String, _>("amount")?)?,
        dest_addr: as_address(&row.try_get::<Vec<u8>, _>("dest_addr")?)?,
        block_id: row.try_get::<i64, _>("block_id")? as u64,
        block_number: 0,
        network_id: row.try_get::<i64, _>("network_id")? as u32,
        tx_hash: as_b256(&row.try_get::<Vec<u8>, _>("tx_hash")?)?,
    })
}

pub async fn add_claim(conn: &mut PgConnection, claim: &Claim) -> Result<(), StorageError> {
    sqlx::query(
        "INSERT INTO sync.claim (network_id, index, orig_net, orig_addr, amount, dest_addr, \
         block_id, tx_hash, rollup_index, mainnet_flag) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
    )
    .bind(claim.network_id as i64)
    .bind(claim.index as i64)
    .bind(claim.orig_net as i64)
    .bind(claim.orig_addr.as_slice())
    .bind(claim.amount.to_string())
    .bind(claim.dest_addr.as_slice())
    .bind(claim.block_id as i64)
    .bind(claim.tx_hash.as_slice())
    .bind(claim.rollup_index as i64)
    .bind(claim.mainnet_flag)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// A claim by its deposit count and origin/destination networks. The
/// origin rollup id maps onto `(mainnet_flag, rollup_index)`.
pub async fn get_claim(
    conn: &mut PgConnection,
    deposit_cnt: u32,
    origin_network_id: u32,
    network_id: u32,
) -> Result<Claim, StorageError> {
    let row = if origin_network_id == 0 {
        sqlx::query(
            "SELECT index, orig_net, orig_addr, amount, dest_addr, block_id, network_id, \
             tx_hash, rollup_index, mainnet_flag \
             FROM sync.claim WHERE index = $1 AND mainnet_flag AND network_id = $2",
        )
        .bind(deposit_cnt as i64)
        .bind(network_id as i64)
        .fetch_optional(&mut *conn)
        .await?
    } else {
        sqlx::query(
            "SELECT index, orig_net, orig_addr, amount, dest_addr, block_id, network_id, \
             tx_hash, rollup_index, mainnet_flag \
             FROM sync.claim \
             WHERE index = $1 AND NOT mainnet_flag AND rollup_index + 1 = $2 AND network_id = $3",
        )
        .bind(deposit_cnt as i64)
        .bind(origin_network_id as i64)
        .bind(network_id as i64)
        .fetch_optional(&mut *conn)
        .await?
    };
    claim_from_row(&row.ok_or(StorageError::NotFound)?)
}

/// Claims paid out to `dest_addr`, newest first.
pub async fn get_claims(
    conn: &mut PgConnection,
    dest_addr: Address,
    limit: u32,
    offset: u32,
) -> Result<Vec<Claim>, StorageError> {
    let rows = sqlx::query(
        "SELECT index, orig_net, orig_addr, amount, dest_addr, block_id, network_id, tx_hash, \
         rollup_index, mainnet_flag \
         FROM sync.claim WHERE dest_addr = $1 ORDER BY block_id DESC LIMIT $2 OFFSET $3",
    )
    .bind(dest_addr.as_slice())
    .bind(limit as i64)
    .bind(offset as i64)
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(claim_from_row).collect()
}

pub async fn get_claim_count(
    conn: &mut PgConnection,
    dest_addr: Address,
) -> Result<u64, StorageError> {
    let row = sqlx::query("SELECT COUNT(*) AS cnt FROM sync.claim WHERE dest_addr = $1")
        .bind(dest_addr.as_slice())
        .fetch_one(&mut *conn)
        .await?;
    Ok(row.try_get::<i64, _>("cnt")? as u64)
}
