use alloy_primitives::B256;
use sqlx::{PgConnection, Row};
use tr_types::GlobalExitRoot;
use tracing::warn;

use crate::{
    row::{as_b256, as_exit_roots, exit_roots_to_vec},
    StorageError,
};

fn ger_from_row(row: &sqlx::postgres::PgRow) -> Result<GlobalExitRoot, StorageError> {
    Ok(GlobalExitRoot {
        id: row.try_get::<i64, _>("id")? as u64,
        block_id: row.try_get::<i64, _>("block_id")? as u64,
        block_number: 0,
        global_exit_root: as_b256(&row.try_get::<Vec<u8>, _>("global_exit_root")?)?,
        exit_roots: as_exit_roots(&row.try_get::<Vec<Vec<u8>>, _>("exit_roots")?)?,
        network_id: row.try_get::<i64, _>("network_id")? as u32,
    })
}

pub async fn add_global_exit_root(
    conn: &mut PgConnection,
    ger: &GlobalExitRoot,
) -> Result<(), StorageError> {
    sqlx::query(
        "INSERT INTO sync.exit_root (block_id, global_exit_root, exit_roots, network_id, allowed) \
         VALUES ($1, $2, $3, $4, true)",
    )
    .bind(ger.block_id as i64)
    .bind(ger.global_exit_root.as_slice())
    .bind(exit_roots_to_vec(ger.exit_roots))
    .bind(ger.network_id as i64)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Inserts a GER reported by a trusted sequencer. Returns whether a row
/// actually landed; replays of an already-stored GER are ignored.
pub async fn add_trusted_global_exit_root(
    conn: &mut PgConnection,
    ger: &GlobalExitRoot,
) -> Result<bool, StorageError> {
    let result = sqlx::query(
        "INSERT INTO sync.exit_root (block_id, global_exit_root, exit_roots, network_id, allowed) \
         VALUES (0, $1, $2, $3, true) \
         ON CONFLICT ON CONSTRAINT exit_root_uc DO NOTHING",
    )
    .bind(ger.global_exit_root.as_slice())
    .bind(exit_roots_to_vec(ger.exit_roots))
    .bind(ger.network_id as i64)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Latest GER able to witness claims towards `dest_net`: the trusted one
/// for L1-origin deposits, the latest L1-synced one otherwise.
pub async fn get_latest_exit_root(
    conn: &mut PgConnection,
    network_id: u32,
    dest_net: u32,
) -> Result<GlobalExitRoot, StorageError> {
    if network_id == 0 {
        get_latest_trusted_exit_root(conn, dest_net).await
    } else {
        get_latest_l1_synced_exit_root(conn).await
    }
}

pub async fn get_latest_l1_synced_exit_root(
    conn: &mut PgConnection,
) -> Result<GlobalExitRoot, StorageError> {
    let row = sqlx::query(
        "SELECT id, block_id, global_exit_root, exit_roots, network_id FROM sync.exit_root \
         WHERE allowed = true AND block_id > 0 AND network_id = 0 ORDER BY id DESC LIMIT 1",
    )
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(StorageError::NotFound)?;
    ger_from_row(&row)
}

/// The L1-synced row for a specific GER hash.
pub async fn get_l1_exit_root_by_ger(
    conn: &mut PgConnection,
    ger: B256,
) -> Result<GlobalExitRoot, StorageError> {
    let row = sqlx::query(
        "SELECT id, block_id, global_exit_root, exit_roots, network_id FROM sync.exit_root \
         WHERE allowed = true AND block_id > 0 AND global_exit_root = $1 AND network_id = 0 \
         ORDER BY id DESC LIMIT 1",
    )
    .bind(ger.as_slice())
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(StorageError::NotFound)?;
    ger_from_row(&row)
}

/// L2 rows for a GER that are still waiting for their exit-root pair.
/// Only rows with an empty pair qualify; an L2 row that somehow carries
/// both roots is deliberately left alone.
pub async fn get_l2_exit_roots_by_ger(
    conn: &mut PgConnection,
    ger: B256,
) -> Result<Vec<GlobalExitRoot>, StorageError> {
    let rows = sqlx::query(
        "SELECT id, block_id, global_exit_root, exit_roots, network_id FROM sync.exit_root \
         WHERE allowed = true AND block_id > 0 AND global_exit_root = $1 AND network_id != 0 \
         AND cardinality(exit_roots) = 0 ORDER BY id DESC",
    )
    .bind(ger.as_slice())
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(ger_from_row).collect()
}

/// Back-fills the exit-root pair of an L2 GER row.
pub async fn update_l2_ger(
    conn: &mut PgConnection,
    ger: &GlobalExitRoot,
) -> Result<(), StorageError> {
    sqlx::query("UPDATE sync.exit_root SET exit_roots = $2 WHERE id = $1")
        .bind(ger.id as i64)
        .bind(exit_roots_to_vec(ger.exit_roots))
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Newest allowed GER of an L2 network. When the row was stored from the
/// sovereign event stream without roots, the matching L1 row fills them.
pub async fn get_latest_trusted_exit_root(
    conn: &mut PgConnection,
    network_id: u32,
) -> Result<GlobalExitRoot, StorageError> {
    let row = sqlx::query(
        "SELECT id, block_id, global_exit_root, exit_roots, network_id FROM sync.exit_root \
         WHERE network_id = $1 AND allowed = true ORDER BY id DESC LIMIT 1",
    )
    .bind(network_id as i64)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(StorageError::NotFound)?;
    let mut ger = ger_from_row(&row)?;
    if ger.exit_roots.is_none() {
        match get_l1_exit_root_by_ger(conn, ger.global_exit_root).await {
            Ok(l1_ger) => ger.exit_roots = l1_ger.exit_roots,
            Err(StorageError::NotFound) => {
                warn!(ger = %ger.global_exit_root, "missing L1 row for the L2 GER entry");
                return Err(StorageError::NotFound);
            }
            Err(err) => return Err(err),
        }
    }
    Ok(ger)
}

/// Deposit row id and count linked to a GER through the exit-root pair.
/// `rollups_tree` selects which half of the pair anchors the lookup.
pub async fn get_deposit_count_by_ger(
    conn: &mut PgConnection,
    ger: B256,
    network_id: u32,
    rollups_tree: bool,
) -> Result<(u64, u32), StorageError> {
    let (array_index, root_network) = if rollups_tree {
        (2i32, network_id as i64)
    } else {
        (1i32, 0i64)
    };
    let row = sqlx::query(
        "SELECT sync.deposit.id AS deposit_id, sync.deposit.deposit_cnt AS deposit_cnt \
         FROM sync.deposit \
         INNER JOIN mt.root ON sync.deposit.id = mt.root.deposit_id \
         INNER JOIN sync.exit_root ON mt.root.root = sync.exit_root.exit_roots[$1] \
         WHERE sync.exit_root.global_exit_root = $2 AND sync.exit_root.network_id = $3 \
         AND mt.root.network = $4",
    )
    .bind(array_index)
    .bind(ger.as_slice())
    .bind(network_id as i64)
    .bind(root_network)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(StorageError::NotFound)?;
    Ok((
        row.try_get::<i64, _>("deposit_id")? as u64,
        row.try_get::<i64, _>("deposit_cnt")? as u32,
    ))
}

/// Handles a sovereign chain's `remove last GER` signal: log the removal,
/// disallow the GER, and rewind `ready_for_claim` on the deposit window
/// `(previous GER's deposit, removed GER's deposit]` headed for that
/// network.
pub async fn add_remove_l2_ger(
    conn: &mut PgConnection,
    ger: &GlobalExitRoot,
) -> Result<(), StorageError> {
    sqlx::query(
        "INSERT INTO sync.remove_exit_root (block_id, global_exit_root, network_id) \
         VALUES ($1, $2, $3)",
    )
    .bind(ger.block_id as i64)
    .bind(ger.global_exit_root.as_slice())
    .bind(ger.network_id as i64)
    .execute(&mut *conn)
    .await?;

    let ger_id = sqlx::query(
        "UPDATE sync.exit_root SET allowed = false \
         WHERE global_exit_root = $1 AND network_id = $2 RETURNING id",
    )
    .bind(ger.global_exit_root.as_slice())
    .bind(ger.network_id as i64)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(StorageError::NotFound)?
    .try_get::<i64, _>("id")?;

    let prev_ger_row = sqlx::query(
        "SELECT global_exit_root FROM sync.exit_root \
         WHERE network_id = $1 AND id < $2 ORDER BY id DESC LIMIT 1",
    )
    .bind(ger.network_id as i64)
    .bind(ger_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(StorageError::NotFound)?;
    let prev_ger = as_b256(&prev_ger_row.try_get::<Vec<u8>, _>("global_exit_root")?)?;

    let prev_deposit_id =
        match get_deposit_count_by_ger(conn, prev_ger, ger.network_id, false).await {
            Ok((deposit_id, _)) => deposit_id,
            Err(StorageError::NotFound) => {
                warn!(
                    prev_ger = %prev_ger,
                    network_id = ger.network_id,
                    current_ger = %ger.global_exit_root,
                    "no deposit found in L1 for the previous GER",
                );
                0
            }
            Err(err) => return Err(err),
        };
    let current_deposit_id =
        match get_deposit_count_by_ger(conn, ger.global_exit_root, ger.network_id, false).await {
            Ok((deposit_id, _)) => deposit_id,
            Err(StorageError::NotFound) => {
                warn!(
                    ger = %ger.global_exit_root,
                    network_id = ger.network_id,
                    "no deposit found in L1 for the removed GER",
                );
                u64::MAX
            }
            Err(err) => return Err(err),
        };

    sqlx::query(
        "UPDATE sync.deposit SET ready_for_claim = false \
         WHERE id > $1 AND id <= $2 AND network_id = 0 AND dest_net = $3",
    )
    .bind(prev_deposit_id as i64)
    .bind(i64::try_from(current_deposit_id).unwrap_or(i64::MAX))
    .bind(ger.network_id as i64)
    .execute(&mut *conn)
    .await?;
    Ok(())
}
