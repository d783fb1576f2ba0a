use sqlx::PgPool;

use crate::StorageError;

/// Idempotent schema, applied at startup. Statements are separated by
/// blank-line markers so they can run one at a time over the prepared
/// statement protocol.
const SCHEMA: &[&str] = &[
    "CREATE SCHEMA IF NOT EXISTS sync",
    "CREATE SCHEMA IF NOT EXISTS mt",
    r#"CREATE TABLE IF NOT EXISTS sync.block (
        id BIGSERIAL PRIMARY KEY,
        block_num BIGINT NOT NULL,
        block_hash BYTEA NOT NULL UNIQUE,
        parent_hash BYTEA,
        network_id BIGINT NOT NULL,
        received_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    "CREATE INDEX IF NOT EXISTS block_network_num_idx ON sync.block (network_id, block_num)",
    // Trusted exit roots carry block_id = 0; the sentinel row satisfies
    // the foreign keys without pointing at a real block.
    r#"INSERT INTO sync.block (id, block_num, block_hash, parent_hash, network_id)
        VALUES (0, 0, decode('ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff', 'hex'), decode('', 'hex'), 2147483647)
        ON CONFLICT (id) DO NOTHING"#,
    r#"CREATE TABLE IF NOT EXISTS sync.deposit (
        id BIGSERIAL PRIMARY KEY,
        leaf_type SMALLINT NOT NULL,
        network_id BIGINT NOT NULL,
        orig_net BIGINT NOT NULL,
        orig_addr BYTEA NOT NULL,
        amount VARCHAR NOT NULL,
        dest_net BIGINT NOT NULL,
        dest_addr BYTEA NOT NULL,
        block_id BIGINT NOT NULL REFERENCES sync.block (id) ON DELETE CASCADE,
        deposit_cnt BIGINT NOT NULL,
        tx_hash BYTEA NOT NULL,
        metadata BYTEA NOT NULL,
        ready_for_claim BOOLEAN NOT NULL DEFAULT FALSE,
        UNIQUE (network_id, deposit_cnt)
    )"#,
    "CREATE INDEX IF NOT EXISTS deposit_dest_addr_idx ON sync.deposit (dest_addr)",
    "CREATE INDEX IF NOT EXISTS deposit_dest_net_ready_idx ON sync.deposit (dest_net, ready_for_claim)",
    r#"CREATE TABLE IF NOT EXISTS sync.claim (
        network_id BIGINT NOT NULL,
        index BIGINT NOT NULL,
        mainnet_flag BOOLEAN NOT NULL,
        rollup_index BIGINT NOT NULL,
        orig_net BIGINT NOT NULL,
        orig_addr BYTEA NOT NULL,
        amount VARCHAR NOT NULL,
        dest_addr BYTEA NOT NULL,
        block_id BIGINT NOT NULL REFERENCES sync.block (id) ON DELETE CASCADE,
        tx_hash BYTEA NOT NULL,
        PRIMARY KEY (network_id, index, mainnet_flag, rollup_index)
    )"#,
    "CREATE INDEX IF NOT EXISTS claim_dest_addr_idx ON sync.claim (dest_addr)",
    r#"CREATE TABLE IF NOT EXISTS sync.token_wrapped (
        network_id BIGINT NOT NULL,
        orig_net BIGINT NOT NULL,
        orig_token_addr BYTEA NOT NULL,
        wrapped_token_addr BYTEA NOT NULL,
        block_id BIGINT NOT NULL REFERENCES sync.block (id) ON DELETE CASCADE,
        name VARCHAR NOT NULL DEFAULT '',
        symbol VARCHAR NOT NULL DEFAULT '',
        decimals SMALLINT NOT NULL DEFAULT 0
    )"#,
    r#"CREATE TABLE IF NOT EXISTS sync.exit_root (
        id BIGSERIAL PRIMARY KEY,
        block_id BIGINT NOT NULL REFERENCES sync.block (id) ON DELETE CASCADE,
        global_exit_root BYTEA NOT NULL,
        exit_roots BYTEA[] NOT NULL DEFAULT '{}',
        network_id BIGINT NOT NULL,
        allowed BOOLEAN NOT NULL DEFAULT TRUE,
        CONSTRAINT exit_root_uc UNIQUE (block_id, global_exit_root, network_id)
    )"#,
    "CREATE INDEX IF NOT EXISTS exit_root_ger_idx ON sync.exit_root (global_exit_root)",
    r#"CREATE TABLE IF NOT EXISTS sync.remove_exit_root (
        id BIGSERIAL PRIMARY KEY,
        block_id BIGINT NOT NULL REFERENCES sync.block (id) ON DELETE CASCADE,
        global_exit_root BYTEA NOT NULL,
        network_id BIGINT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS sync.monitored_txs (
        deposit_id BIGINT PRIMARY KEY REFERENCES sync.deposit (id) ON DELETE CASCADE,
        from_addr BYTEA NOT NULL,
        to_addr BYTEA,
        nonce BIGINT NOT NULL,
        value VARCHAR NOT NULL,
        data BYTEA NOT NULL,
        gas BIGINT NOT NULL,
        status VARCHAR NOT NULL,
        history BYTEA[] NOT NULL DEFAULT '{}',
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL,
        group_id BIGINT,
        global_exit_root BYTEA NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS monitored_txs_status_idx ON sync.monitored_txs (status)",
    r#"CREATE TABLE IF NOT EXISTS sync.monitored_txs_group (
        group_id BIGSERIAL PRIMARY KEY,
        status VARCHAR NOT NULL,
        compressed_tx_data BYTEA NOT NULL,
        tx_hash BYTEA,
        num_retries BIGINT NOT NULL DEFAULT 0,
        last_log VARCHAR NOT NULL DEFAULT '',
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS mt.root (
        root BYTEA NOT NULL,
        deposit_id BIGINT NOT NULL REFERENCES sync.deposit (id) ON DELETE CASCADE,
        network BIGINT NOT NULL,
        PRIMARY KEY (network, deposit_id)
    )"#,
    "CREATE INDEX IF NOT EXISTS root_root_idx ON mt.root (root)",
    // Reverse hash table. The key is the hash of the value, so duplicate
    // rows from different deposits are equivalent; reads take any one.
    r#"CREATE TABLE IF NOT EXISTS mt.rht (
        key BYTEA NOT NULL,
        value BYTEA[] NOT NULL,
        deposit_id BIGINT NOT NULL REFERENCES sync.deposit (id) ON DELETE CASCADE
    )"#,
    "CREATE INDEX IF NOT EXISTS rht_key_idx ON mt.rht (key)",
    r#"CREATE TABLE IF NOT EXISTS mt.rollup_exit (
        id BIGSERIAL PRIMARY KEY,
        leaf BYTEA NOT NULL,
        rollup_id BIGINT NOT NULL,
        root BYTEA NOT NULL,
        block_id BIGINT NOT NULL REFERENCES sync.block (id) ON DELETE CASCADE
    )"#,
    "CREATE INDEX IF NOT EXISTS rollup_exit_root_idx ON mt.rollup_exit (root)",
];

/// Creates schemas, tables and indexes when missing.
pub async fn init_schema(pool: &PgPool) -> Result<(), StorageError> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
