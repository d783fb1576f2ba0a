//! Integration tests against a live Postgres, enabled by `DATABASE_URL`.
//! `cargo test` without it skips everything here.

use std::sync::Arc;

use alloy_primitives::{Address, B256, U256};
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tr_storage::{self as storage, PgStorage};
use tr_types::{Block, Deposit, GlobalExitRoot, RollupExitLeaf};

lazy_static::lazy_static! {
    // The tests share one database; run them one at a time.
    static ref DB_LOCK: Arc<Mutex<()>> = Arc::new(Mutex::new(()));
}

async fn connect() -> Option<(OwnedMutexGuard<()>, PgStorage)> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let guard = DB_LOCK.clone().lock_owned().await;
    let storage = PgStorage::connect(&url, 5).await.expect("connect test db");
    let mut conn = storage.acquire().await.unwrap();
    // Isolated reruns: wipe rows, keep the schema and the sentinel block.
    for statement in [
        "DELETE FROM mt.rollup_exit",
        "DELETE FROM sync.monitored_txs_group",
        "DELETE FROM sync.exit_root",
        "DELETE FROM sync.remove_exit_root",
        "DELETE FROM sync.block WHERE id > 0",
    ] {
        sqlx::query(statement).execute(&mut *conn).await.unwrap();
    }
    Some((guard, storage))
}

fn block(network_id: u32, number: u64, seed: u8) -> Block {
    Block {
        id: 0,
        block_number: number,
        block_hash: B256::repeat_byte(seed),
        parent_hash: B256::repeat_byte(seed.wrapping_sub(1)),
        network_id,
        received_at: Utc::now(),
    }
}

#[tokio::test]
async fn block_round_trip_and_reset_cascade() {
    let Some((_guard, storage)) = connect().await else {
        return;
    };
    let mut conn = storage.acquire().await.unwrap();

    let b1 = storage::add_block(&mut conn, &block(0, 100, 0x10)).await.unwrap();
    let _b2 = storage::add_block(&mut conn, &block(0, 101, 0x11)).await.unwrap();
    // Same hash resolves to the same row.
    let again = storage::add_block(&mut conn, &block(0, 100, 0x10)).await.unwrap();
    assert_eq!(b1, again);

    let last = storage::get_last_block(&mut conn, 0).await.unwrap();
    assert_eq!(last.block_number, 101);
    let previous = storage::get_previous_block(&mut conn, 0, 1).await.unwrap();
    assert_eq!(previous.block_number, 100);

    storage::reset(&mut conn, 100, 0).await.unwrap();
    let last = storage::get_last_block(&mut conn, 0).await.unwrap();
    assert_eq!(last.block_number, 100);
}

#[tokio::test]
async fn latest_rollup_exit_leaves_follow_max_id_per_rollup() {
    let Some((_guard, storage)) = connect().await else {
        return;
    };
    let mut conn = storage.acquire().await.unwrap();
    let b1 = storage::add_block(&mut conn, &block(0, 200, 0x20)).await.unwrap();
    let b2 = storage::add_block(&mut conn, &block(0, 201, 0x21)).await.unwrap();

    let root_a = B256::repeat_byte(0xa0);
    let root_b = B256::repeat_byte(0xb0);
    let leaf = |rollup_id: u32, byte: u8, root: B256, block_id: u64| RollupExitLeaf {
        id: 0,
        leaf: B256::repeat_byte(byte),
        rollup_id,
        root,
        block_id,
    };
    storage::add_rollup_exit_leaves(
        &mut conn,
        &[
            leaf(1, 0x01, root_a, b1),
            leaf(2, 0x02, root_a, b1),
            leaf(3, 0x03, root_a, b1),
            leaf(4, 0x04, root_a, b1),
        ],
    )
    .await
    .unwrap();
    storage::add_rollup_exit_leaves(
        &mut conn,
        &[
            leaf(1, 0x11, root_b, b2),
            leaf(4, 0x14, root_b, b2),
            leaf(3, 0x13, root_b, b2),
            leaf(2, 0x12, root_b, b1),
        ],
    )
    .await
    .unwrap();

    let latest = storage::get_latest_rollup_exit_leaves(&mut conn).await.unwrap();
    assert_eq!(latest.len(), 4);
    assert_eq!(latest[0].rollup_id, 1);
    assert_eq!(latest[0].leaf, B256::repeat_byte(0x11));
    assert_eq!(latest[1].leaf, B256::repeat_byte(0x12));
    assert_eq!(latest[1].block_id, b1);
    assert_eq!(latest[2].leaf, B256::repeat_byte(0x13));
    assert_eq!(latest[3].leaf, B256::repeat_byte(0x14));

    assert!(storage::is_rollup_exit_root(&mut conn, root_b).await.unwrap());
    let by_root = storage::get_rollup_exit_leaves_by_root(&mut conn, root_a)
        .await
        .unwrap();
    assert_eq!(by_root.len(), 4);
}

#[tokio::test]
async fn l2_gers_without_roots_are_the_only_backfill_candidates() {
    let Some((_guard, storage)) = connect().await else {
        return;
    };
    let mut conn = storage.acquire().await.unwrap();
    let b1 = storage::add_block(&mut conn, &block(1, 300, 0x30)).await.unwrap();

    let ger_hash = B256::repeat_byte(0x77);
    // One L2 row without roots, one (anomalous) with both pre-filled.
    storage::add_global_exit_root(
        &mut conn,
        &GlobalExitRoot {
            block_id: b1,
            global_exit_root: ger_hash,
            exit_roots: None,
            network_id: 1,
            ..Default::default()
        },
    )
    .await
    .unwrap();
    let b2 = storage::add_block(&mut conn, &block(2, 300, 0x31)).await.unwrap();
    storage::add_global_exit_root(
        &mut conn,
        &GlobalExitRoot {
            block_id: b2,
            global_exit_root: ger_hash,
            exit_roots: Some((B256::repeat_byte(1), B256::repeat_byte(2))),
            network_id: 2,
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let candidates = storage::get_l2_exit_roots_by_ger(&mut conn, ger_hash)
        .await
        .unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].network_id, 1);
    assert_eq!(candidates[0].exit_roots, None);
}

#[tokio::test]
async fn l1_deposit_readiness_is_defined_by_root_linkage() {
    let Some((_guard, storage)) = connect().await else {
        return;
    };
    let mut conn = storage.acquire().await.unwrap();
    let b1 = storage::add_block(&mut conn, &block(0, 400, 0x40)).await.unwrap();

    let mut deposit_ids = Vec::new();
    for cnt in 0..3u32 {
        let deposit = Deposit {
            leaf_type: 0,
            network_id: 0,
            orig_net: 0,
            orig_addr: Address::repeat_byte(0x01),
            amount: U256::from(1_000u64),
            dest_net: 1,
            dest_addr: Address::repeat_byte(0x02),
            deposit_cnt: cnt,
            block_id: b1,
            tx_hash: B256::repeat_byte(cnt as u8),
            metadata: Vec::new(),
            ..Default::default()
        };
        deposit_ids.push(storage::add_deposit(&mut conn, &deposit).await.unwrap());
    }
    // Roots after the first and second leaves.
    let root_0 = B256::repeat_byte(0xe0);
    let root_1 = B256::repeat_byte(0xe1);
    storage::set_root(&mut conn, root_0, deposit_ids[0], 0).await.unwrap();
    storage::set_root(&mut conn, root_1, deposit_ids[1], 0).await.unwrap();

    // The root covering two leaves flips exactly deposits 0 and 1.
    let flipped = storage::update_l1_deposits_status(&mut conn, root_1, 1)
        .await
        .unwrap();
    let mut counts: Vec<u32> = flipped.iter().map(|deposit| deposit.deposit_cnt).collect();
    counts.sort_unstable();
    assert_eq!(counts, vec![0, 1]);
    let third = storage::get_deposit(&mut conn, 2, 0).await.unwrap();
    assert!(!third.ready_for_claim);

    assert_eq!(
        storage::get_deposit_count_by_root(&mut conn, root_1, 0)
            .await
            .unwrap(),
        1
    );
    assert_eq!(
        storage::get_last_deposit_count(&mut conn, 0).await.unwrap(),
        Some(1)
    );
}
