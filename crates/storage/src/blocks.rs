use chrono::{DateTime, Utc};
use sqlx::{PgConnection, Row};
use tr_types::Block;

use crate::{row::as_b256, StorageError};

fn block_from_row(row: &sqlx::postgres::PgRow) -> Result<Block, StorageError> {
    Ok(Block {
        id: row.try_get::<i64, _>("id")? as u64,
        block_number: row.try_get::<i64, _>("block_num")? as u64,
        block_hash: as_b256(&row.try_get::<Vec<u8>, _>("block_hash")?)?,
        parent_hash: as_b256(&row.try_get::<Vec<u8>, _>("parent_hash")?)?,
        network_id: row.try_get::<i64, _>("network_id")? as u32,
        received_at: row.try_get::<DateTime<Utc>, _>("received_at")?,
    })
}

/// Inserts a block, or returns the existing row id when the hash is
/// already stored.
pub async fn add_block(conn: &mut PgConnection, block: &Block) -> Result<u64, StorageError> {
    let row = sqlx::query(
        r#"WITH block_id AS
            (INSERT INTO sync.block (block_num, block_hash, parent_hash, network_id, received_at)
            VALUES ($1, $2, $3, $4, $5) ON CONFLICT (block_hash) DO NOTHING RETURNING id)
            SELECT id FROM block_id
            UNION ALL
            SELECT id FROM sync.block WHERE block_hash = $2"#,
    )
    .bind(block.block_number as i64)
    .bind(block.block_hash.as_slice())
    .bind(block.parent_hash.as_slice())
    .bind(block.network_id as i64)
    .bind(block.received_at)
    .fetch_one(&mut *conn)
    .await?;
    Ok(row.try_get::<i64, _>("id")? as u64)
}

/// The newest stored block of a network.
pub async fn get_last_block(
    conn: &mut PgConnection,
    network_id: u32,
) -> Result<Block, StorageError> {
    let row = sqlx::query(
        "SELECT id, block_num, block_hash, parent_hash, network_id, received_at
         FROM sync.block WHERE network_id = $1 ORDER BY block_num DESC LIMIT 1",
    )
    .bind(network_id as i64)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(StorageError::NotFound)?;
    block_from_row(&row)
}

/// The block `offset` places behind the newest stored one.
pub async fn get_previous_block(
    conn: &mut PgConnection,
    network_id: u32,
    offset: u64,
) -> Result<Block, StorageError> {
    let row = sqlx::query(
        "SELECT id, block_num, block_hash, parent_hash, network_id, received_at
         FROM sync.block WHERE network_id = $1 ORDER BY block_num DESC LIMIT 1 OFFSET $2",
    )
    .bind(network_id as i64)
    .bind(offset as i64)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(StorageError::NotFound)?;
    block_from_row(&row)
}

/// Drops every block of the network past `block_number`; deposits, claims,
/// wrapped tokens, exit roots, rollup-exit leaves, monitored txs, Merkle
/// roots and nodes hanging off them go with the cascade.
pub async fn reset(
    conn: &mut PgConnection,
    block_number: u64,
    network_id: u32,
) -> Result<(), StorageError> {
    sqlx::query("DELETE FROM sync.block WHERE block_num > $1 AND network_id = $2")
        .bind(block_number as i64)
        .bind(network_id as i64)
        .execute(&mut *conn)
        .await?;
    Ok(())
}
