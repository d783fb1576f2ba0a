//! End-to-end claim proof round-trip against a live Postgres, enabled by
//! `DATABASE_URL`. `cargo test` without it skips this.

use alloy_primitives::{Address, B256, U256};
use tr_merkle::{verify_proof, MerkleTree, TREE_HEIGHT};
use tr_proof::{BridgeService, ProofError};
use tr_storage::{self as storage, PgMerkleStore, PgStorage};
use tr_types::{deposit_leaf_hash, ger_hash, Block, Deposit, GlobalExitRoot};

async fn connect() -> Option<PgStorage> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let storage = PgStorage::connect(&url, 5).await.expect("connect test db");
    let mut conn = storage.acquire().await.unwrap();
    for statement in [
        "DELETE FROM mt.rollup_exit",
        "DELETE FROM sync.exit_root",
        "DELETE FROM sync.block WHERE id > 0",
    ] {
        sqlx::query(statement).execute(&mut *conn).await.unwrap();
    }
    Some(storage)
}

fn deposit(cnt: u32, block_id: u64) -> Deposit {
    Deposit {
        leaf_type: 0,
        network_id: 0,
        orig_net: 0,
        orig_addr: Address::ZERO,
        amount: U256::from(1_000_000_000u64 + cnt as u64),
        dest_net: 1,
        dest_addr: Address::repeat_byte(0xc9),
        deposit_cnt: cnt,
        block_id,
        tx_hash: B256::repeat_byte(cnt as u8 + 1),
        metadata: Vec::new(),
        ..Default::default()
    }
}

/// Deposits go in through storage and the exit tree; a GER that witnesses
/// the first five lands; the proofs the service hands back must recompute
/// to the witnessed exit root.
#[tokio::test]
async fn claim_proof_round_trip() {
    let Some(pg) = connect().await else {
        return;
    };
    let mut conn = pg.acquire().await.unwrap();
    let block_id = storage::add_block(
        &mut conn,
        &Block {
            block_number: 100,
            block_hash: B256::repeat_byte(0x50),
            parent_hash: B256::repeat_byte(0x4f),
            network_id: 0,
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let mut tree = {
        let mut store = PgMerkleStore(&mut conn);
        MerkleTree::new(&mut store, TREE_HEIGHT as u8, 0).await.unwrap()
    };
    let mut leaves = Vec::new();
    let mut roots = Vec::new();
    for cnt in 0..6u32 {
        let deposit = deposit(cnt, block_id);
        let deposit_id = storage::add_deposit(&mut conn, &deposit).await.unwrap();
        let leaf = deposit_leaf_hash(&deposit);
        leaves.push(leaf);
        let root = {
            let mut store = PgMerkleStore(&mut conn);
            tree.add_leaf(&mut store, deposit_id, leaf, cnt).await.unwrap()
        };
        roots.push(root);
    }

    // The GER witnesses the tree state after the fifth deposit.
    let witnessed_root = roots[4];
    let ger = ger_hash(witnessed_root, B256::ZERO);
    let exit_roots = Some((witnessed_root, B256::ZERO));
    storage::add_trusted_global_exit_root(
        &mut conn,
        &GlobalExitRoot {
            network_id: 1,
            global_exit_root: ger,
            exit_roots,
            ..Default::default()
        },
    )
    .await
    .unwrap();
    storage::add_global_exit_root(
        &mut conn,
        &GlobalExitRoot {
            block_id,
            network_id: 0,
            global_exit_root: ger,
            exit_roots,
            ..Default::default()
        },
    )
    .await
    .unwrap();
    let flipped = storage::update_l1_deposits_status(&mut conn, witnessed_root, 1)
        .await
        .unwrap();
    assert_eq!(flipped.len(), 5);

    let service = BridgeService::new(TREE_HEIGHT as u8, 1024);
    for cnt in 0..5u32 {
        let proof = service.get_claim_proof(&mut conn, cnt, 0).await.unwrap();
        assert_eq!(proof.global_exit_root.global_exit_root, ger);
        assert_eq!(proof.merkle_proof.len(), TREE_HEIGHT);
        assert!(verify_proof(
            leaves[cnt as usize],
            cnt,
            &proof.merkle_proof,
            witnessed_root,
        ));
        assert_eq!(proof.rollup_merkle_proof, vec![B256::ZERO; TREE_HEIGHT]);
    }

    // Pinning the GER takes the same path through the L1 row.
    let pinned = service.get_claim_proof_by_ger(&mut conn, 3, 0, ger).await.unwrap();
    assert!(verify_proof(leaves[3], 3, &pinned.merkle_proof, witnessed_root));

    // The sixth deposit is not witnessed by any GER yet.
    let err = service.get_claim_proof(&mut conn, 5, 0).await.unwrap_err();
    assert!(matches!(err, ProofError::DepositNotSynced));
}
