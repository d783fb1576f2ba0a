use alloy_primitives::B256;
use async_trait::async_trait;
use sqlx::{PgConnection, QueryBuilder, Row};
use tr_merkle::{MerkleError, MerkleStore, NodeRow};
use tr_types::RollupExitLeaf;

use crate::{row::as_b256, StorageError};

/// Children of an interior node by its hash, from the reverse hash table.
pub async fn get_node(
    conn: &mut PgConnection,
    key: B256,
) -> Result<Option<(B256, B256)>, StorageError> {
    let row = sqlx::query("SELECT value FROM mt.rht WHERE key = $1 LIMIT 1")
        .bind(key.as_slice())
        .fetch_optional(&mut *conn)
        .await?;
    match row {
        None => Ok(None),
        Some(row) => {
            let value = row.try_get::<Vec<Vec<u8>>, _>("value")?;
            if value.len() != 2 {
                return Err(StorageError::Decode(format!(
                    "node {key} holds {} children",
                    value.len()
                )));
            }
            Ok(Some((as_b256(&value[0])?, as_b256(&value[1])?)))
        }
    }
}

pub async fn bulk_set_nodes(
    conn: &mut PgConnection,
    deposit_id: u64,
    nodes: &[NodeRow],
) -> Result<(), StorageError> {
    if nodes.is_empty() {
        return Ok(());
    }
    let mut builder = QueryBuilder::new("INSERT INTO mt.rht (key, value, deposit_id) ");
    builder.push_values(nodes, |mut b, node| {
        b.push_bind(node.key.as_slice().to_vec())
            .push_bind(vec![
                node.left.as_slice().to_vec(),
                node.right.as_slice().to_vec(),
            ])
            .push_bind(deposit_id as i64);
    });
    builder.build().execute(&mut *conn).await?;
    Ok(())
}

pub async fn set_root(
    conn: &mut PgConnection,
    root: B256,
    deposit_id: u64,
    network: u32,
) -> Result<(), StorageError> {
    sqlx::query("INSERT INTO mt.root (root, deposit_id, network) VALUES ($1, $2, $3)")
        .bind(root.as_slice())
        .bind(deposit_id as i64)
        .bind(network as i64)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Deposit count of the deposit behind the newest root of a tree.
pub async fn get_last_deposit_count(
    conn: &mut PgConnection,
    network: u32,
) -> Result<Option<u32>, StorageError> {
    let row = sqlx::query(
        "SELECT coalesce(MAX(deposit_cnt), -1) AS cnt FROM sync.deposit \
         WHERE id = (SELECT coalesce(MAX(deposit_id), -1) FROM mt.root WHERE network = $1)",
    )
    .bind(network as i64)
    .fetch_one(&mut *conn)
    .await?;
    let cnt = row.try_get::<i64, _>("cnt")?;
    Ok((cnt >= 0).then_some(cnt as u32))
}

/// Root recorded for the leaf at `deposit_cnt` in a tree.
pub async fn get_root_by_deposit_count(
    conn: &mut PgConnection,
    deposit_cnt: u32,
    network: u32,
) -> Result<Option<B256>, StorageError> {
    let row = sqlx::query(
        "SELECT root FROM mt.root INNER JOIN sync.deposit ON mt.root.deposit_id = sync.deposit.id \
         WHERE sync.deposit.deposit_cnt = $1 AND network = $2",
    )
    .bind(deposit_cnt as i64)
    .bind(network as i64)
    .fetch_optional(&mut *conn)
    .await?;
    row.map(|row| as_b256(&row.try_get::<Vec<u8>, _>("root")?))
        .transpose()
}

/// Deposit count behind an exit root.
pub async fn get_deposit_count_by_root(
    conn: &mut PgConnection,
    root: B256,
    network: u32,
) -> Result<u32, StorageError> {
    let row = sqlx::query(
        "SELECT sync.deposit.deposit_cnt AS cnt FROM mt.root \
         INNER JOIN sync.deposit ON sync.deposit.id = mt.root.deposit_id \
         WHERE mt.root.root = $1 AND mt.root.network = $2",
    )
    .bind(root.as_slice())
    .bind(network as i64)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(StorageError::NotFound)?;
    Ok(row.try_get::<i64, _>("cnt")? as u32)
}

pub async fn check_if_root_exists(
    conn: &mut PgConnection,
    root: B256,
    network: u32,
) -> Result<bool, StorageError> {
    let row = sqlx::query("SELECT count(*) AS cnt FROM mt.root WHERE root = $1 AND network = $2")
        .bind(root.as_slice())
        .bind(network as i64)
        .fetch_one(&mut *conn)
        .await?;
    Ok(row.try_get::<i64, _>("cnt")? > 0)
}

/// Prunes roots past `deposit_count` leaves plus the nodes written by the
/// pruned deposits. The block-reset cascade usually removed everything
/// already; this keeps the tree tables consistent when it did not.
pub async fn reset_merkle_roots(
    conn: &mut PgConnection,
    deposit_count: u32,
    network: u32,
) -> Result<(), StorageError> {
    sqlx::query(
        "DELETE FROM mt.root WHERE network = $2 AND deposit_id > \
            (SELECT coalesce(MAX(r.deposit_id), 0) FROM mt.root r \
             INNER JOIN sync.deposit d ON d.id = r.deposit_id \
             WHERE r.network = $2 AND d.deposit_cnt < $1)",
    )
    .bind(deposit_count as i64)
    .bind(network as i64)
    .execute(&mut *conn)
    .await?;
    sqlx::query(
        "DELETE FROM mt.rht WHERE deposit_id IN \
            (SELECT id FROM sync.deposit WHERE network_id = $2 AND deposit_cnt >= $1)",
    )
    .bind(deposit_count as i64)
    .bind(network as i64)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

fn rollup_leaf_from_row(row: &sqlx::postgres::PgRow) -> Result<RollupExitLeaf, StorageError> {
    Ok(RollupExitLeaf {
        id: row.try_get::<i64, _>("id")? as u64,
        leaf: as_b256(&row.try_get::<Vec<u8>, _>("leaf")?)?,
        rollup_id: row.try_get::<i64, _>("rollup_id")? as u32,
        root: as_b256(&row.try_get::<Vec<u8>, _>("root")?)?,
        block_id: row.try_get::<i64, _>("block_id")? as u64,
    })
}

/// All leaves recorded under a rollups-exit root, ordered by rollup id.
pub async fn get_rollup_exit_leaves_by_root(
    conn: &mut PgConnection,
    root: B256,
) -> Result<Vec<RollupExitLeaf>, StorageError> {
    let rows = sqlx::query(
        "SELECT id, leaf, rollup_id, root, block_id FROM mt.rollup_exit \
         WHERE root = $1 ORDER BY rollup_id ASC",
    )
    .bind(root.as_slice())
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(rollup_leaf_from_row).collect()
}

pub async fn is_rollup_exit_root(
    conn: &mut PgConnection,
    root: B256,
) -> Result<bool, StorageError> {
    let row = sqlx::query("SELECT count(*) AS cnt FROM mt.rollup_exit WHERE root = $1")
        .bind(root.as_slice())
        .fetch_one(&mut *conn)
        .await?;
    Ok(row.try_get::<i64, _>("cnt")? > 0)
}

/// The newest leaf of every rollup.
pub async fn get_latest_rollup_exit_leaves(
    conn: &mut PgConnection,
) -> Result<Vec<RollupExitLeaf>, StorageError> {
    let rows = sqlx::query(
        "SELECT DISTINCT re.id, re.leaf, re.rollup_id, re.root, re.block_id \
         FROM mt.rollup_exit re \
         INNER JOIN \
            (SELECT DISTINCT rollup_id, MAX(id) AS maxid \
             FROM mt.rollup_exit GROUP BY rollup_id) groupedre \
         ON re.id = groupedre.maxid \
         ORDER BY rollup_id ASC",
    )
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(rollup_leaf_from_row).collect()
}

pub async fn add_rollup_exit_leaves(
    conn: &mut PgConnection,
    leaves: &[RollupExitLeaf],
) -> Result<(), StorageError> {
    if leaves.is_empty() {
        return Ok(());
    }
    let mut builder = QueryBuilder::new("INSERT INTO mt.rollup_exit (leaf, rollup_id, root, block_id) ");
    builder.push_values(leaves, |mut b, leaf| {
        b.push_bind(leaf.leaf.as_slice().to_vec())
            .push_bind(leaf.rollup_id as i64)
            .push_bind(leaf.root.as_slice().to_vec())
            .push_bind(leaf.block_id as i64);
    });
    builder.build().execute(&mut *conn).await?;
    Ok(())
}

/// [`MerkleStore`] over a live connection, so the trees run inside the
/// caller's transaction.
pub struct PgMerkleStore<'a>(pub &'a mut PgConnection);

#[async_trait]
impl MerkleStore for PgMerkleStore<'_> {
    async fn get_node(&mut self, key: B256) -> Result<Option<(B256, B256)>, MerkleError> {
        Ok(get_node(self.0, key).await?)
    }

    async fn bulk_set_nodes(
        &mut self,
        deposit_id: u64,
        nodes: &[NodeRow],
    ) -> Result<(), MerkleError> {
        Ok(bulk_set_nodes(self.0, deposit_id, nodes).await?)
    }

    async fn set_root(
        &mut self,
        root: B256,
        deposit_id: u64,
        network: u32,
    ) -> Result<(), MerkleError> {
        Ok(set_root(self.0, root, deposit_id, network).await?)
    }

    async fn get_last_deposit_count(&mut self, network: u32) -> Result<Option<u32>, MerkleError> {
        Ok(get_last_deposit_count(self.0, network).await?)
    }

    async fn get_root_by_deposit_count(
        &mut self,
        deposit_count: u32,
        network: u32,
    ) -> Result<Option<B256>, MerkleError> {
        Ok(get_root_by_deposit_count(self.0, deposit_count, network).await?)
    }

    async fn reset_merkle_roots(
        &mut self,
        deposit_count: u32,
        network: u32,
    ) -> Result<(), MerkleError> {
        Ok(reset_merkle_roots(self.0, deposit_count, network).await?)
    }

    async fn get_latest_rollup_exit_leaves(
        &mut self,
    ) -> Result<Vec<RollupExitLeaf>, MerkleError> {
        Ok(get_latest_rollup_exit_leaves(self.0).await?)
    }

    async fn add_rollup_exit_leaves(
        &mut self,
        leaves: &[RollupExitLeaf],
    ) -> Result<(), MerkleError> {
        Ok(add_rollup_exit_leaves(self.0, leaves).await?)
    }
}
