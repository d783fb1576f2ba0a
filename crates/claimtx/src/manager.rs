use std::{sync::Arc, time::Duration};

use alloy_primitives::{Address, B256, U256};
use anyhow::{Context, Result};
use sqlx::PgConnection;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tr_config::ClaimTxManagerConfig;
use tr_proof::BridgeService;
use tr_rpc_client::{
    calldata::{self, ClaimProofBundle, PROOF_LEN},
    CallMsg, EthClient,
};
use tr_storage::{self as storage, PgStorage, StorageError};
use tr_types::{
    generate_global_index, Deposit, GlobalExitRoot, MonitoredTx, MonitoredTxStatus,
    LEAF_TYPE_MESSAGE,
};
use tracing::{debug, error, info};

use crate::{monitor, MonitorCompressedTxs, MonitorTxs, NonceCache};

/// Which monitor drives the pending claim transactions.
enum Monitor {
    Individual(MonitorTxs),
    Compressed(MonitorCompressedTxs),
}

/// The claim transaction manager for one destination network.
pub struct ClaimTxManager {
    storage: PgStorage,
    client: EthClient,
    bridge_service: Arc<BridgeService>,
    cfg: ClaimTxManagerConfig,
    l2_network_id: u32,
    rollup_id: u32,
    l2_bridge_addr: Address,
    wallet: Arc<tr_utils::Wallet>,
    nonce_cache: Arc<NonceCache>,
    l2_synced: bool,
    monitor: Monitor,
    cancel: CancellationToken,
}

impl ClaimTxManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        storage: PgStorage,
        client: EthClient,
        bridge_service: Arc<BridgeService>,
        cfg: ClaimTxManagerConfig,
        l2_network_id: u32,
        rollup_id: u32,
        l2_bridge_addr: Address,
        claim_compressor_addr: Option<Address>,
        wallet: Arc<tr_utils::Wallet>,
        chain_id: u64,
        cancel: CancellationToken,
    ) -> Self {
        let nonce_cache = Arc::new(NonceCache::new(client.clone()));
        let monitor = if cfg.grouping_claims.enabled {
            info!(
                rollup_id,
                "claim tx manager working in compressor mode to group claim txs",
            );
            Monitor::Compressed(MonitorCompressedTxs::new(
                storage.clone(),
                client.clone(),
                bridge_service.clone(),
                cfg.grouping_claims.clone(),
                nonce_cache.clone(),
                wallet.clone(),
                chain_id,
                l2_network_id,
                claim_compressor_addr.unwrap_or_default(),
            ))
        } else {
            info!(
                rollup_id,
                "claim tx manager working in regular mode to send claim txs individually",
            );
            Monitor::Individual(MonitorTxs::new(
                storage.clone(),
                client.clone(),
                cfg.clone(),
                nonce_cache.clone(),
                wallet.clone(),
                chain_id,
                l2_network_id,
            ))
        };
        ClaimTxManager {
            storage,
            client,
            bridge_service,
            cfg,
            l2_network_id,
            rollup_id,
            l2_bridge_addr,
            wallet,
            nonce_cache,
            l2_synced: false,
            monitor,
            cancel,
        }
    }

    /// Runs until cancelled: reacts to GER updates, ticks the monitored-tx
    /// state machine, and (in compressor mode) groups pending claims.
    pub async fn start(
        mut self,
        mut ch_exit_root_event: mpsc::Receiver<GlobalExitRoot>,
        mut ch_synced: broadcast::Receiver<u32>,
    ) -> Result<()> {
        let mut ticker =
            tokio::time::interval(Duration::from_millis(self.cfg.frequency_to_monitor_txs_ms));
        let mut compressor_ticker = tokio::time::interval(Duration::from_millis(
            self.cfg.grouping_claims.frequency_to_process_compressed_claims_ms,
        ));
        let mut ger = GlobalExitRoot::default();
        let mut latest_processed_ger = B256::ZERO;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!(rollup_id = self.rollup_id, "claim tx manager stopping");
                    return Ok(());
                }
                synced = ch_synced.recv() => {
                    if let Ok(network_id) = synced {
                        if network_id == self.l2_network_id && !self.l2_synced {
                            info!(network_id, "network synced");
                            self.l2_synced = true;
                        }
                    }
                }
                event = ch_exit_root_event.recv() => {
                    let Some(new_ger) = event else {
                        debug!(rollup_id = self.rollup_id, "ger channel closed");
                        return Ok(());
                    };
                    ger = new_ger;
                    if !self.l2_synced {
                        info!(
                            network_id = self.l2_network_id,
                            "waiting for the network to be synced before processing deposits",
                        );
                        continue;
                    }
                    debug!(
                        rollup_id = self.rollup_id,
                        ger = %ger.global_exit_root,
                        "update deposits status for ger",
                    );
                    if self.cfg.grouping_claims.enabled {
                        debug!(rollup_id = self.rollup_id, "ger updated, ready to be processed");
                        continue;
                    }
                    if let Err(err) = self.update_deposits_status(&ger).await {
                        error!(rollup_id = self.rollup_id, %err, "failed to update deposits status");
                    }
                }
                _ = compressor_ticker.tick() => {
                    if !self.l2_synced
                        || !self.cfg.grouping_claims.enabled
                        || ger.global_exit_root == latest_processed_ger
                        || ger.global_exit_root == B256::ZERO
                    {
                        continue;
                    }
                    info!(
                        rollup_id = self.rollup_id,
                        ger = %ger.global_exit_root,
                        "processing deposits for ger",
                    );
                    match self.update_deposits_status(&ger).await {
                        Ok(()) => latest_processed_ger = ger.global_exit_root,
                        Err(err) => {
                            error!(rollup_id = self.rollup_id, %err, "failed to update deposits status");
                            continue;
                        }
                    }
                    if let Monitor::Compressed(compressed) = &self.monitor {
                        if let Err(err) = compressed.compress_pending_claims().await {
                            error!(rollup_id = self.rollup_id, %err, "failed to compress claims");
                        }
                    }
                }
                _ = ticker.tick() => {
                    let result = match &self.monitor {
                        Monitor::Individual(individual) => individual.monitor_txs().await,
                        Monitor::Compressed(compressed) => compressed.monitor_txs().await,
                    };
                    if let Err(err) = result {
                        error!(rollup_id = self.rollup_id, %err, "failed to monitor txs");
                    }
                }
            }
        }
    }

    /// Applies a GER update inside one transaction: flip newly witnessed
    /// deposits and enqueue their claim transactions.
    async fn update_deposits_status(&self, ger: &GlobalExitRoot) -> Result<()> {
        let mut tx = self.storage.begin().await?;
        let result = self.process_deposit_status(ger, &mut tx).await;
        match result {
            Ok(()) => tx.commit().await.context("commit deposit status update"),
            Err(err) => {
                error!(rollup_id = self.rollup_id, %err, "error processing ger");
                if let Err(rollback_err) = tx.rollback().await {
                    error!(rollup_id = self.rollup_id, %rollback_err, "error rolling back");
                    return Err(rollback_err).context("rollback deposit status update");
                }
                Err(err)
            }
        }
    }

    async fn process_deposit_status(
        &self,
        ger: &GlobalExitRoot,
        conn: &mut PgConnection,
    ) -> Result<()> {
        let mut deposits = Vec::new();
        let mut global_exit_root = ger.global_exit_root;
        if ger.block_id != 0 && ger.network_id == 0 {
            // The rollups exit root moved on L1: rollup-origin deposits
            // towards this network become claimable.
            info!(
                rollup_id = self.rollup_id,
                rollup_exit_root = %ger.rollup_exit_root(),
                "rollup exit root is updated",
            );
            storage::update_l2_deposits_status(
                conn,
                ger.rollup_exit_root(),
                self.rollup_id,
                self.l2_network_id,
            )
            .await
            .context("update L2 deposits status")?;
            if self.cfg.are_claims_between_l2s_enabled {
                debug!(rollup_id = self.rollup_id, "getting L2 deposits to auto claim");
                deposits = storage::get_deposits_from_other_l2_to_claim(conn, self.l2_network_id)
                    .await
                    .context("get deposits from other L2 to claim")?;
                if let Some(first) = deposits.first() {
                    match self.pinned_trusted_ger(conn, first).await? {
                        Some(trusted_ger) => global_exit_root = trusted_ger,
                        None => info!(
                            rollup_id = self.rollup_id,
                            "trusted ger still missing, it will be retried later",
                        ),
                    }
                }
            }
        } else {
            // Trusted or sovereign GER: L1-origin deposits become
            // claimable on this network.
            info!(
                rollup_id = self.rollup_id,
                mainnet_exit_root = %ger.mainnet_exit_root(),
                "mainnet exit root is updated",
            );
            deposits =
                storage::update_l1_deposits_status(conn, ger.mainnet_exit_root(), self.l2_network_id)
                    .await
                    .context("update L1 deposits status")?;
        }

        for deposit in deposits {
            if deposit.dest_net != self.l2_network_id {
                info!(
                    deposit_id = deposit.id,
                    deposit_cnt = deposit.deposit_cnt,
                    dest_net = deposit.dest_net,
                    "ignoring deposit for another destination",
                );
                continue;
            }
            let claim_tx_hash = self
                .bridge_service
                .get_deposit_status(conn, deposit.deposit_cnt, deposit.network_id, deposit.dest_net)
                .await
                .context("get deposit status")?;
            if claim_tx_hash.is_some()
                || (deposit.leaf_type == LEAF_TYPE_MESSAGE
                    && !self.is_deposit_message_allowed(&deposit))
            {
                info!(
                    rollup_id = self.rollup_id,
                    deposit_id = deposit.id,
                    leaf_type = deposit.leaf_type,
                    "ignoring deposit",
                );
                continue;
            }
            if storage::monitored_tx_exists(conn, deposit.id).await? {
                debug!(deposit_id = deposit.id, "deposit already monitored");
                continue;
            }

            info!(
                rollup_id = self.rollup_id,
                deposit_cnt = deposit.deposit_cnt,
                deposit_id = deposit.id,
                "creating the claim tx",
            );
            let proof = self
                .bridge_service
                .get_claim_proof_for_compressed(
                    conn,
                    deposit.deposit_cnt,
                    deposit.network_id,
                    global_exit_root,
                )
                .await
                .context("get claim proof")?;
            let mainnet_flag = deposit.network_id == 0;
            let rollup_index = if mainnet_flag { 0 } else { deposit.network_id - 1 };
            let bundle = ClaimProofBundle {
                proof: to_proof_array(&proof.merkle_proof)?,
                rollup_proof: to_proof_array(&proof.rollup_merkle_proof)?,
                mainnet_exit_root: proof.global_exit_root.mainnet_exit_root(),
                rollup_exit_root: proof.global_exit_root.rollup_exit_root(),
                global_index: generate_global_index(
                    mainnet_flag,
                    rollup_index,
                    deposit.deposit_cnt,
                ),
            };
            let data = calldata::build_claim_calldata(&deposit, &bundle);
            self.add_claim_tx(
                conn,
                deposit.id,
                data,
                proof.global_exit_root.global_exit_root,
            )
            .await
            .context("add claim tx")?;
        }
        Ok(())
    }

    async fn pinned_trusted_ger(
        &self,
        conn: &mut PgConnection,
        deposit: &Deposit,
    ) -> Result<Option<B256>> {
        for attempt in 0..2 {
            match storage::get_latest_trusted_ger_by_deposit(
                conn,
                deposit.deposit_cnt,
                deposit.network_id,
                deposit.dest_net,
            )
            .await
            {
                Ok(trusted_ger) => return Ok(Some(trusted_ger)),
                Err(StorageError::NotFound) if attempt == 0 => {
                    info!(rollup_id = self.rollup_id, "not fully synced yet, retrying");
                    tokio::time::sleep(Duration::from_millis(self.cfg.retry_interval_ms)).await;
                }
                Err(StorageError::NotFound) => return Ok(None),
                Err(err) => return Err(err).context("get latest trusted ger by deposit"),
            }
        }
        Ok(None)
    }

    fn is_deposit_message_allowed(&self, deposit: &Deposit) -> bool {
        for addr in &self.cfg.authorized_claim_message_addresses {
            if deposit.orig_addr == *addr {
                info!(
                    rollup_id = self.rollup_id,
                    deposit_id = deposit.id,
                    account = %addr,
                    "message bridge from authorized account detected",
                );
                return true;
            }
        }
        info!(
            rollup_id = self.rollup_id,
            deposit_id = deposit.id,
            deposit_cnt = deposit.deposit_cnt,
            "message bridge not authorized",
        );
        false
    }

    /// Estimates gas, assigns a nonce and records the monitored tx. A
    /// reverting estimation skips the deposit: it may become claimable
    /// under a later GER, or never.
    async fn add_claim_tx(
        &self,
        conn: &mut PgConnection,
        deposit_id: u64,
        data: Vec<u8>,
        global_exit_root: B256,
    ) -> Result<()> {
        let call = CallMsg {
            from: self.wallet.address(),
            to: Some(self.l2_bridge_addr),
            value: None,
            data,
        };
        let gas = match monitor::estimate_gas_with_retries(
            &self.client,
            &call,
            self.cfg.retry_number,
            Duration::from_millis(self.cfg.retry_interval_ms),
        )
        .await
        {
            Ok(gas) => gas,
            Err(err) => {
                let block_number = self.client.block_number().await.ok();
                monitor::log_estimation_reproducer(self.client.url(), &call, block_number);
                error!(
                    rollup_id = self.rollup_id,
                    deposit_id,
                    %err,
                    ger = %global_exit_root,
                    "failed to estimate gas, ignoring tx",
                );
                return Ok(());
            }
        };

        let nonce = self
            .nonce_cache
            .get_next_nonce(self.wallet.address())
            .await
            .context("failed to get current nonce")?;

        let mtx = MonitoredTx {
            deposit_id,
            from: self.wallet.address(),
            to: Some(self.l2_bridge_addr),
            nonce,
            value: U256::ZERO,
            data: call.data,
            gas,
            status: MonitoredTxStatus::Created,
            history: Vec::new(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            group_id: None,
            global_exit_root,
        };
        storage::add_claim_tx(conn, &mtx)
            .await
            .context("failed to add tx to get monitored")?;
        Ok(())
    }
}

fn to_proof_array(siblings: &[B256]) -> Result<[B256; PROOF_LEN]> {
    if siblings.len() != PROOF_LEN {
        anyhow::bail!("expected {PROOF_LEN} siblings, found {}", siblings.len());
    }
    let mut proof = [B256::ZERO; PROOF_LEN];
    proof.copy_from_slice(siblings);
    Ok(proof)
}
