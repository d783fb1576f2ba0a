use std::{sync::Arc, time::Duration};

use alloy_primitives::B256;
use anyhow::{anyhow, bail, Context, Result};
use sqlx::PgConnection;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tr_merkle::BridgeController;
use tr_rpc_client::{EventScanner, RollupNodeClient};
use tr_storage::{self as storage, PgMerkleStore, PgStorage, StorageError};
use tr_types::{
    Block, BlockEvents, Claim, Deposit, Event, GlobalExitRoot, TokenWrapped, VerifiedBatch,
};
use tr_utils::ExponentialBackoff;
use tracing::{debug, error, info, warn};

#[derive(Clone, Copy, Debug)]
pub struct SynchronizerConfig {
    pub sync_interval: Duration,
    pub sync_chunk_size: u64,
}

/// Synchronizes one network's bridge state from its chain.
pub struct ClientSynchronizer {
    storage: PgStorage,
    bridge_ctrl: Arc<Mutex<BridgeController>>,
    scanner: EventScanner,
    rollup_client: Option<RollupNodeClient>,
    cfg: SynchronizerConfig,
    network_id: u32,
    genesis_block_number: u64,
    /// Own-network GER events (rollups only).
    ch_exit_root_event_l2: Option<mpsc::Sender<GlobalExitRoot>>,
    /// L1 GER fan-out to every destination claim manager (L1 only).
    chs_exit_root_event: Vec<mpsc::Sender<GlobalExitRoot>>,
    ch_synced: broadcast::Sender<u32>,
    synced: bool,
    l1_rollup_exit_root: B256,
    all_network_ids: Vec<u32>,
    sovereign_chain: bool,
    cancel: CancellationToken,
}

impl ClientSynchronizer {
    #[allow(clippy::too_many_arguments)]
    pub async fn new(
        storage: PgStorage,
        bridge_ctrl: Arc<Mutex<BridgeController>>,
        scanner: EventScanner,
        rollup_client: Option<RollupNodeClient>,
        cfg: SynchronizerConfig,
        network_id: u32,
        genesis_block_number: u64,
        ch_exit_root_event_l2: Option<mpsc::Sender<GlobalExitRoot>>,
        chs_exit_root_event: Vec<mpsc::Sender<GlobalExitRoot>>,
        ch_synced: broadcast::Sender<u32>,
        all_network_ids: Vec<u32>,
        sovereign_chain: bool,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let mut conn = storage.acquire().await?;
        let l1_rollup_exit_root = match storage::get_latest_l1_synced_exit_root(&mut conn).await {
            Ok(ger) => ger.rollup_exit_root(),
            Err(StorageError::NotFound) => B256::ZERO,
            Err(err) => return Err(err).context("load last L1 synced exit root"),
        };
        Ok(ClientSynchronizer {
            storage,
            bridge_ctrl,
            scanner,
            rollup_client,
            cfg,
            network_id,
            genesis_block_number,
            ch_exit_root_event_l2,
            chs_exit_root_event,
            ch_synced,
            synced: false,
            l1_rollup_exit_root,
            all_network_ids,
            sovereign_chain,
            cancel,
        })
    }

    /// Reads the last state synced and keeps following the chain from
    /// there until cancelled.
    pub async fn sync(mut self) -> Result<()> {
        info!(network_id = self.network_id, "synchronization started");
        let mut last_block_synced = self.load_last_block().await?;
        debug!(
            network_id = self.network_id,
            block_number = last_block_synced.block_number,
            "initial block",
        );
        let mut wait = Duration::ZERO;
        let mut backoff = ExponentialBackoff::new(Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!(network_id = self.network_id, "synchronizer stopping");
                    return Ok(());
                }
                _ = tokio::time::sleep(wait) => {}
            }
            debug!(network_id = self.network_id, "syncing");
            match self.sync_blocks(&last_block_synced).await {
                Ok(block) => {
                    last_block_synced = block;
                    backoff.reset();
                    wait = if self.synced {
                        self.cfg.sync_interval
                    } else {
                        Duration::ZERO
                    };
                }
                Err(err) => {
                    warn!(network_id = self.network_id, %err, "error syncing blocks");
                    last_block_synced = self.load_last_block().await?;
                    wait = backoff.next_sleep();
                    continue;
                }
            }
            if self.synced {
                // Virtual state is in sync; poll the trusted state on
                // rollups that mirror L1 GER updates.
                if self.network_id != 0 && !self.sovereign_chain {
                    if let Err(err) = self.sync_trusted_state().await {
                        error!(
                            network_id = self.network_id,
                            %err,
                            "error getting current trusted state",
                        );
                    }
                }
            } else {
                // Tip probe: a stored block past the chain tip means the
                // chain itself went backwards.
                let header = match self.scanner.client().header_by_number(None).await {
                    Ok(Some(header)) => header,
                    Ok(None) => continue,
                    Err(err) => {
                        warn!(network_id = self.network_id, %err, "error getting latest block");
                        continue;
                    }
                };
                if last_block_synced.block_number == header.number {
                    self.mark_synced().await;
                } else if last_block_synced.block_number > header.number {
                    if self.network_id == 0 {
                        bail!(
                            "network {}: last synced block {} is ahead of the chain tip {}",
                            self.network_id,
                            last_block_synced.block_number,
                            header.number,
                        );
                    }
                    error!(
                        network_id = self.network_id,
                        synced = last_block_synced.block_number,
                        tip = header.number,
                        "last synced block is ahead of the chain tip, rewinding",
                    );
                    if let Err(err) = self.reset_state(header.number).await {
                        error!(network_id = self.network_id, %err, "error resetting the state");
                    }
                }
            }
        }
    }

    async fn load_last_block(&self) -> Result<Block> {
        let mut conn = self.storage.acquire().await?;
        match storage::get_last_block(&mut conn, self.network_id).await {
            Ok(block) => Ok(block),
            Err(StorageError::NotFound) => {
                warn!(
                    network_id = self.network_id,
                    genesis = self.genesis_block_number,
                    "no block stored, starting from genesis",
                );
                Ok(Block {
                    block_number: self.genesis_block_number,
                    network_id: self.network_id,
                    ..Default::default()
                })
            }
            Err(err) => Err(err).context("get last synced block"),
        }
    }

    async fn mark_synced(&mut self) {
        if !self.synced {
            info!(network_id = self.network_id, "synced");
            self.synced = true;
            let _ = self.ch_synced.send(self.network_id);
        }
    }

    /// Catches up from `last_block_synced` towards the chain tip, one
    /// chunk of blocks at a time.
    async fn sync_blocks(&mut self, last_block_synced: &Block) -> Result<Block> {
        let mut last_block_synced = last_block_synced.clone();
        let tip = self
            .scanner
            .client()
            .header_by_number(None)
            .await?
            .ok_or_else(|| anyhow!("chain tip header unavailable"))?
            .number;

        // Everything from here on assumes the stored chain still matches
        // the node; repair first when it does not.
        if let Some(block) = self.check_reorg(&last_block_synced, None).await? {
            self.reset_state(block.block_number).await?;
            return Ok(block);
        }
        debug!(network_id = self.network_id, "no reorg detected");

        let mut from_block = if self.synced {
            last_block_synced.block_number
        } else {
            last_block_synced.block_number + 1
        };
        let mut to_block = from_block + self.cfg.sync_chunk_size;

        loop {
            if to_block > tip {
                debug!(network_id = self.network_id, tip, "clamping range to the tip");
                to_block = tip;
                if !self.synced {
                    from_block = last_block_synced.block_number;
                    self.mark_synced().await;
                }
            }
            if from_block > to_block {
                debug!(network_id = self.network_id, "from block above to block, skipping");
                return Ok(last_block_synced);
            }

            debug!(
                network_id = self.network_id,
                from_block, to_block, "getting bridge info",
            );
            let mut blocks = self
                .scanner
                .get_events_by_block_range(from_block, to_block)
                .await?;

            if from_block == self.genesis_block_number {
                let missing_genesis = blocks
                    .first()
                    .map(|b| b.block.block_number != self.genesis_block_number)
                    .unwrap_or(true);
                if missing_genesis {
                    debug!(network_id = self.network_id, "adding genesis placeholder block");
                    blocks.insert(0, BlockEvents::default());
                }
            } else if from_block < self.genesis_block_number {
                bail!(
                    "network {}: from block {} is lower than the genesis block {}",
                    self.network_id,
                    from_block,
                    self.genesis_block_number,
                );
            }

            if self.synced {
                if blocks.is_empty() {
                    // The range came back empty although the probe saw the
                    // stored block: a reorg slid in between the two calls.
                    info!(
                        network_id = self.network_id,
                        from_block, "empty range after probe, assuming reorg",
                    );
                    let mut conn = self.storage.acquire().await?;
                    let prev_block =
                        match storage::get_previous_block(&mut conn, self.network_id, 1).await {
                            Ok(block) => block,
                            Err(StorageError::NotFound) => {
                                warn!(
                                    network_id = self.network_id,
                                    "previous block not found in db",
                                );
                                Block::default()
                            }
                            Err(err) => return Err(err).context("get previous block"),
                        };
                    drop(conn);
                    let reorged = self
                        .check_reorg(&prev_block, None)
                        .await?
                        .unwrap_or(prev_block);
                    self.reset_state(reorged.block_number).await?;
                    return Ok(reorged);
                }
                // Double check against the first received block: the chain
                // may have changed between the probe and the range fetch.
                let init_block = blocks.remove(0).block;
                if let Some(block) = self
                    .check_reorg(&last_block_synced, Some(&init_block))
                    .await?
                {
                    self.reset_state(block.block_number).await?;
                    return Ok(block);
                }
            }

            if let Some(last) = self.process_block_range(blocks).await? {
                last_block_synced = last;
            }

            if tip <= to_block {
                self.mark_synced().await;
                return Ok(last_block_synced);
            } else if !self.synced {
                from_block = to_block + 1;
                to_block = from_block + self.cfg.sync_chunk_size;
            } else {
                from_block = last_block_synced.block_number;
                to_block += self.cfg.sync_chunk_size;
            }
        }
    }

    /// Applies a range of decoded blocks, one transaction per block.
    /// Returns the last applied block, if any.
    async fn process_block_range(&mut self, blocks: Vec<BlockEvents>) -> Result<Option<Block>> {
        let mut is_new_ger = false;
        let mut last_applied = None;
        for block_events in blocks {
            let mut block = block_events.block;
            block.network_id = self.network_id;
            info!(
                network_id = self.network_id,
                block_number = block.block_number,
                "syncing block",
            );

            let mut tx = self.storage.begin().await?;
            let applied = self
                .apply_block(&mut tx, &block, block_events.events, &mut is_new_ger)
                .await;
            match applied {
                Ok(()) => tx.commit().await.context("commit block")?,
                Err(err) => {
                    error!(
                        network_id = self.network_id,
                        block_number = block.block_number,
                        %err,
                        "error storing block, rolling back",
                    );
                    if let Err(rollback_err) = tx.rollback().await {
                        error!(
                            network_id = self.network_id,
                            %rollback_err,
                            "error rolling back block",
                        );
                        return Err(rollback_err).context("rollback block");
                    }
                    return Err(err);
                }
            }
            last_applied = Some(block);
        }

        if is_new_ger {
            // Push the freshest stored GER to every destination once per
            // range, and only when the rollups side actually moved.
            let mut conn = self.storage.acquire().await?;
            let ger = storage::get_latest_l1_synced_exit_root(&mut conn).await?;
            drop(conn);
            if self.l1_rollup_exit_root != ger.rollup_exit_root() {
                debug!(ger = %ger.global_exit_root, "updating ger");
                self.l1_rollup_exit_root = ger.rollup_exit_root();
                for ch in &self.chs_exit_root_event {
                    let _ = ch.send(ger.clone()).await;
                }
            }
        }
        Ok(last_applied)
    }

    async fn apply_block(
        &self,
        conn: &mut PgConnection,
        block: &Block,
        events: Vec<Event>,
        is_new_ger: &mut bool,
    ) -> Result<()> {
        let block_id = storage::add_block(conn, block).await?;
        for event in events {
            match event {
                Event::GlobalExitRoot(ger) => {
                    *is_new_ger = true;
                    self.process_global_exit_root(conn, ger, block_id).await?;
                }
                Event::RemoveL2Ger(ger) => {
                    self.process_remove_l2_ger(conn, ger, block_id).await?;
                }
                Event::Deposit(deposit) => self.process_deposit(conn, deposit, block_id).await?,
                Event::Claim(claim) => self.process_claim(conn, claim, block_id).await?,
                Event::TokenWrapped(token) => {
                    self.process_token_wrapped(conn, token, block_id).await?;
                }
                Event::VerifiedBatch(batch) => {
                    self.process_verify_batch(conn, batch, block_id).await?;
                }
            }
        }
        Ok(())
    }

    async fn process_global_exit_root(
        &self,
        conn: &mut PgConnection,
        mut ger: GlobalExitRoot,
        block_id: u64,
    ) -> Result<()> {
        ger.block_id = block_id;
        ger.network_id = self.network_id;
        if ger.exit_roots.is_some() {
            debug!(network_id = self.network_id, ger = %ger.global_exit_root, "storing L1 ger");
            // Root-less L2 copies of this GER were synced first; complete
            // them now that the pair is known.
            let pending = storage::get_l2_exit_roots_by_ger(conn, ger.global_exit_root)
                .await
                .context("get L2 exit roots by ger")?;
            for mut l2_ger in pending {
                l2_ger.exit_roots = ger.exit_roots;
                storage::update_l2_ger(conn, &l2_ger)
                    .await
                    .context("update L2 ger")?;
            }
            storage::add_global_exit_root(conn, &ger)
                .await
                .context("store global exit root")?;
        } else {
            debug!(network_id = self.network_id, ger = %ger.global_exit_root, "storing L2 ger");
            match storage::get_l1_exit_root_by_ger(conn, ger.global_exit_root).await {
                Ok(l1_ger) => ger.exit_roots = l1_ger.exit_roots,
                Err(StorageError::NotFound) => {
                    warn!(
                        network_id = self.network_id,
                        ger = %ger.global_exit_root,
                        "L1 ger entry not found in the database",
                    );
                }
                Err(err) => return Err(err).context("get L1 exit root by ger"),
            }
            storage::add_global_exit_root(conn, &ger)
                .await
                .context("store global exit root")?;
            info!(
                network_id = self.network_id,
                ger = %ger.global_exit_root,
                "adding L2 ger to the channel",
            );
            if let Some(ch) = &self.ch_exit_root_event_l2 {
                let _ = ch.send(ger.clone()).await;
            }
        }
        Ok(())
    }

    async fn process_remove_l2_ger(
        &self,
        conn: &mut PgConnection,
        mut ger: GlobalExitRoot,
        block_id: u64,
    ) -> Result<()> {
        ger.block_id = block_id;
        ger.network_id = self.network_id;
        storage::add_remove_l2_ger(conn, &ger)
            .await
            .context("store removed L2 ger")
    }

    async fn process_deposit(
        &self,
        conn: &mut PgConnection,
        mut deposit: Deposit,
        block_id: u64,
    ) -> Result<()> {
        deposit.block_id = block_id;
        deposit.network_id = self.network_id;
        let deposit_id = storage::add_deposit(conn, &deposit)
            .await
            .context("store deposit")?;
        let mut bridge_ctrl = self.bridge_ctrl.lock().await;
        bridge_ctrl
            .add_deposit(&mut PgMerkleStore(conn), &deposit, deposit_id)
            .await
            .context("store deposit in the bridge tree")?;
        Ok(())
    }

    async fn process_claim(
        &self,
        conn: &mut PgConnection,
        mut claim: Claim,
        block_id: u64,
    ) -> Result<()> {
        claim.block_id = block_id;
        claim.network_id = self.network_id;
        storage::add_claim(conn, &claim).await.context("store claim")
    }

    async fn process_token_wrapped(
        &self,
        conn: &mut PgConnection,
        mut token: TokenWrapped,
        block_id: u64,
    ) -> Result<()> {
        token.block_id = block_id;
        token.network_id = self.network_id;
        storage::add_token_wrapped(conn, &token)
            .await
            .context("store wrapped token")
    }

    async fn process_verify_batch(
        &self,
        conn: &mut PgConnection,
        batch: VerifiedBatch,
        block_id: u64,
    ) -> Result<()> {
        if batch.local_exit_root == B256::ZERO {
            debug!(
                network_id = self.network_id,
                rollup_id = batch.rollup_id,
                "skipping empty local exit root in verify batch event",
            );
            return Ok(());
        }
        if self.all_network_ids.contains(&batch.rollup_id) {
            // The rollup is synced here too, so its exit root must already
            // be a known tree state; anything else is corruption.
            let known = storage::check_if_root_exists(conn, batch.local_exit_root, batch.rollup_id)
                .await
                .context("check if root exists")?;
            if !known {
                bail!(
                    "network {}: root {} does not exist for rollup {}",
                    self.network_id,
                    batch.local_exit_root,
                    batch.rollup_id,
                );
            }
        }
        let rollup_leaf = tr_types::RollupExitLeaf {
            block_id,
            leaf: batch.local_exit_root,
            rollup_id: batch.rollup_id,
            ..Default::default()
        };
        let mut bridge_ctrl = self.bridge_ctrl.lock().await;
        bridge_ctrl
            .add_rollup_exit_leaf(&mut PgMerkleStore(conn), rollup_leaf)
            .await
            .context("add rollup exit leaf")?;
        Ok(())
    }

    /// Rewinds storage and the Merkle trees to `block_number`.
    async fn reset_state(&self, block_number: u64) -> Result<()> {
        info!(
            network_id = self.network_id,
            block_number, "reverting synchronization",
        );
        let mut tx = self.storage.begin().await?;
        let result = async {
            storage::reset(&mut tx, block_number, self.network_id)
                .await
                .context("reset storage")?;
            let deposit_count =
                storage::get_number_deposits(&mut tx, self.network_id, block_number)
                    .await
                    .context("get number of deposits")?;
            let mut bridge_ctrl = self.bridge_ctrl.lock().await;
            bridge_ctrl
                .reorg_tree(&mut PgMerkleStore(&mut tx), deposit_count, self.network_id)
                .await
                .context("reorg merkle tree")?;
            Ok::<(), anyhow::Error>(())
        }
        .await;
        match result {
            Ok(()) => tx.commit().await.context("commit reset"),
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    error!(
                        network_id = self.network_id,
                        %rollback_err,
                        "error rolling back reset",
                    );
                    return Err(rollback_err).context("rollback reset");
                }
                Err(err)
            }
        }
    }

    /// Compares the stored chain against the node, walking one block
    /// deeper per mismatch. Returns the block to resume from when a reorg
    /// is found.
    async fn check_reorg(
        &self,
        latest_stored_block: &Block,
        synced_block: Option<&Block>,
    ) -> Result<Option<Block>> {
        let mut reorged_block = latest_stored_block.clone();
        let mut depth = 0u64;
        let mut block = synced_block.cloned();
        loop {
            let candidate = match block.take() {
                Some(candidate) => candidate,
                None => {
                    info!(
                        network_id = self.network_id,
                        block_number = reorged_block.block_number,
                        "checking block on chain",
                    );
                    let header = self
                        .scanner
                        .client()
                        .header_by_number(Some(reorged_block.block_number))
                        .await?
                        .ok_or_else(|| {
                            anyhow!("header {} unavailable", reorged_block.block_number)
                        })?;
                    if header.number != reorged_block.block_number {
                        bail!(
                            "network {}: wrong block retrieved from the chain, stored {} retrieved {}",
                            self.network_id,
                            reorged_block.block_number,
                            header.number,
                        );
                    }
                    Block {
                        block_number: header.number,
                        block_hash: header.hash,
                        parent_hash: header.parent_hash,
                        ..Default::default()
                    }
                }
            };

            let mismatch = candidate.block_hash != reorged_block.block_hash
                || candidate.parent_hash != reorged_block.parent_hash;
            if mismatch && reorged_block.block_number > self.genesis_block_number {
                depth += 1;
                info!(
                    network_id = self.network_id,
                    depth,
                    block_number = reorged_block.block_number,
                    "reorg: looking for the latest correct block",
                );
                let mut conn = self.storage.acquire().await?;
                match storage::get_previous_block(&mut conn, self.network_id, depth).await {
                    Ok(previous) => reorged_block = previous,
                    Err(StorageError::NotFound) => {
                        warn!(
                            network_id = self.network_id,
                            "previous block not found in db, rewinding to genesis",
                        );
                        return Ok(Some(Block {
                            block_number: self.genesis_block_number,
                            network_id: self.network_id,
                            ..Default::default()
                        }));
                    }
                    Err(err) => return Err(err).context("get previous block"),
                }
            } else {
                debug!(
                    network_id = self.network_id,
                    block_number = reorged_block.block_number,
                    hash_ok = candidate.block_hash == reorged_block.block_hash,
                    parent_ok = candidate.parent_hash == reorged_block.parent_hash,
                    "reorg check step",
                );
                break;
            }
        }
        if latest_stored_block.block_hash != reorged_block.block_hash {
            info!(
                network_id = self.network_id,
                detected_at = latest_stored_block.block_number,
                last_ok = reorged_block.block_number,
                "reorg detected",
            );
            return Ok(Some(reorged_block));
        }
        debug!(
            network_id = self.network_id,
            block_number = latest_stored_block.block_number,
            "no reorg detected",
        );
        Ok(None)
    }

    /// When the virtual state is synced, mirror the trusted sequencer's
    /// latest GER so claims become available before L1 finality.
    async fn sync_trusted_state(&self) -> Result<()> {
        let Some(rollup_client) = &self.rollup_client else {
            return Ok(());
        };
        let last_ger = rollup_client
            .get_latest_global_exit_root()
            .await
            .context("get latest ger from trusted state")?;
        if last_ger == B256::ZERO {
            debug!(network_id = self.network_id, "trusted state has no ger yet");
            return Ok(());
        }
        let Some(exit_roots) = rollup_client
            .exit_roots_by_ger(last_ger)
            .await
            .context("get exit roots from trusted state")?
        else {
            debug!(network_id = self.network_id, "trusted state has no exit roots yet");
            return Ok(());
        };
        let ger = GlobalExitRoot {
            network_id: self.network_id,
            global_exit_root: last_ger,
            exit_roots: Some((exit_roots.mainnet_exit_root, exit_roots.rollup_exit_root)),
            ..Default::default()
        };
        let mut conn = self.storage.acquire().await?;
        let is_updated = storage::add_trusted_global_exit_root(&mut conn, &ger)
            .await
            .context("store trusted global exit root")?;
        drop(conn);
        if is_updated {
            debug!(ger = %last_ger, "adding trusted ger to the channel");
            if let Some(ch) = &self.ch_exit_root_event_l2 {
                let _ = ch.send(ger).await;
            }
        }
        Ok(())
    }
}
