use std::{sync::Arc, time::Duration};

use alloy_primitives::Address;
use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use sqlx::PgConnection;
use tr_config::GroupingClaimsConfig;
use tr_proof::BridgeService;
use tr_rpc_client::{
    calldata::{self, CompressClaimData, PROOF_LEN},
    CallMsg, EthClient,
};
use tr_storage::{self as storage, PgStorage};
use tr_types::{
    generate_global_index, MonitoredTx, MonitoredTxGroup, MonitoredTxGroupStatus,
    MonitoredTxStatus,
};
use tr_utils::{wallet::LegacyTx, Wallet};
use tracing::{debug, info, warn};

use crate::{NonceCache, StoreChanges};

/// Drives compressed claim groups: collects ready claims into groups,
/// submits each group as one transaction, and breaks failed groups back
/// into individually monitored txs.
pub struct MonitorCompressedTxs {
    storage: PgStorage,
    client: EthClient,
    bridge_service: Arc<BridgeService>,
    cfg: GroupingClaimsConfig,
    nonce_cache: Arc<NonceCache>,
    wallet: Arc<Wallet>,
    chain_id: u64,
    l2_network_id: u32,
    compressor_addr: Address,
}

impl MonitorCompressedTxs {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        storage: PgStorage,
        client: EthClient,
        bridge_service: Arc<BridgeService>,
        cfg: GroupingClaimsConfig,
        nonce_cache: Arc<NonceCache>,
        wallet: Arc<Wallet>,
        chain_id: u64,
        l2_network_id: u32,
        compressor_addr: Address,
    ) -> Self {
        MonitorCompressedTxs {
            storage,
            client,
            bridge_service,
            cfg,
            nonce_cache,
            wallet,
            chain_id,
            l2_network_id,
            compressor_addr,
        }
    }

    /// Collects ungrouped claims into new groups. A group forms when the
    /// trigger size is reached, or earlier once the oldest claim has been
    /// waiting past the retained period.
    pub async fn compress_pending_claims(&self) -> Result<()> {
        let mut tx = self.storage.begin().await?;
        let pending = storage::get_ungrouped_created_txs(&mut tx, self.l2_network_id)
            .await
            .context("get ungrouped claims")?;
        if pending.is_empty() {
            return Ok(());
        }

        let retained_for = Utc::now()
            .signed_duration_since(pending[0].created_at)
            .to_std()
            .unwrap_or_default();
        let retained_trigger =
            retained_for > Duration::from_millis(self.cfg.trigger_retained_claim_period_ms);
        if pending.len() < self.cfg.trigger_number_of_claims && !retained_trigger {
            debug!(
                pending = pending.len(),
                trigger = self.cfg.trigger_number_of_claims,
                "not enough claims to group yet",
            );
            return Ok(());
        }

        for chunk in pending.chunks(self.cfg.max_number_of_claims_per_group.max(1)) {
            if chunk.len() < self.cfg.trigger_number_of_claims && !retained_trigger {
                break;
            }
            if let Err(err) = self.create_group(&mut tx, chunk).await {
                warn!(%err, "error creating compressed claim group");
                break;
            }
        }
        tx.commit().await.context("commit compressed groups")?;
        Ok(())
    }

    /// Builds the compressed calldata for a chunk of claims via the
    /// compressor's view call and records the group.
    async fn create_group(
        &self,
        conn: &mut PgConnection,
        members: &[MonitoredTx],
    ) -> Result<()> {
        let mut claims = Vec::with_capacity(members.len());
        let mut roots = None;
        for mtx in members {
            let deposit = storage::get_deposit_by_row_id(conn, mtx.deposit_id)
                .await
                .context("load group member deposit")?;
            let proof = self
                .bridge_service
                .get_claim_proof_for_compressed(
                    conn,
                    deposit.deposit_cnt,
                    deposit.network_id,
                    mtx.global_exit_root,
                )
                .await
                .context("build claim proof for compressed claim")?;
            let mainnet_flag = deposit.network_id == 0;
            let rollup_index = if mainnet_flag { 0 } else { deposit.network_id - 1 };
            claims.push(CompressClaimData {
                proof: to_proof_array(&proof.merkle_proof)?,
                rollup_proof: to_proof_array(&proof.rollup_merkle_proof)?,
                global_index: generate_global_index(
                    mainnet_flag,
                    rollup_index,
                    deposit.deposit_cnt,
                ),
                orig_net: deposit.orig_net,
                orig_addr: deposit.orig_addr,
                dest_addr: deposit.dest_addr,
                amount: deposit.amount,
                metadata: deposit.metadata.clone(),
                is_message: deposit.leaf_type == tr_types::LEAF_TYPE_MESSAGE,
            });
            roots.get_or_insert((
                proof.global_exit_root.mainnet_exit_root(),
                proof.global_exit_root.rollup_exit_root(),
            ));
        }
        let (mainnet_exit_root, rollup_exit_root) =
            roots.ok_or_else(|| anyhow!("empty claim group"))?;

        let view_call = CallMsg {
            from: self.wallet.address(),
            to: Some(self.compressor_addr),
            value: None,
            data: calldata::build_compress_claim_call(
                mainnet_exit_root,
                rollup_exit_root,
                &claims,
            ),
        };
        let compressed = self
            .client
            .call(&view_call)
            .await
            .context("compress claim call")?;

        let group_id = storage::add_monitored_txs_group(
            conn,
            &MonitoredTxGroup {
                group_id: 0,
                status: MonitoredTxGroupStatus::Created,
                compressed_tx_data: compressed.to_vec(),
                tx_hash: None,
                num_retries: 0,
                last_log: String::new(),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
        )
        .await
        .context("store claim group")?;

        for member in members {
            let mut member = member.clone();
            member.group_id = Some(group_id);
            storage::update_claim_tx(conn, &member)
                .await
                .context("attach member to group")?;
        }
        info!(group_id, members = members.len(), "compressed claim group created");
        Ok(())
    }

    /// One monitor pass over live groups.
    pub async fn monitor_txs(&self) -> Result<()> {
        let mut tx = self.storage.begin().await?;
        let groups = storage::get_monitored_txs_groups(
            &mut tx,
            &[MonitoredTxGroupStatus::Created, MonitoredTxGroupStatus::Sent],
        )
        .await
        .context("get claim groups")?;

        let mut changes = StoreChanges::new();
        for mut group in groups {
            match self.handle_group(&mut tx, &mut group).await {
                Ok(()) => changes.update_group(group),
                Err(err) => {
                    warn!(group_id = group.group_id, %err, "error handling claim group");
                    group.last_log = err.to_string();
                    changes.update_group(group);
                }
            }
        }
        changes.execute(&mut tx).await.context("flush group changes")?;
        tx.commit().await.context("commit group pass")?;
        Ok(())
    }

    async fn handle_group(
        &self,
        conn: &mut PgConnection,
        group: &mut MonitoredTxGroup,
    ) -> Result<()> {
        match group.status {
            MonitoredTxGroupStatus::Created => self.send_group(group).await,
            MonitoredTxGroupStatus::Sent => self.observe_group(conn, group).await,
            _ => Ok(()),
        }
    }

    async fn send_group(&self, group: &mut MonitoredTxGroup) -> Result<()> {
        let data = calldata::build_send_compressed_claims(&group.compressed_tx_data);
        let call = CallMsg {
            from: self.wallet.address(),
            to: Some(self.compressor_addr),
            value: None,
            data: data.clone(),
        };
        let gas = crate::monitor::estimate_gas_with_retries(
            &self.client,
            &call,
            self.cfg.max_retries,
            Duration::from_millis(self.cfg.retry_interval_ms),
        )
        .await
        .context("estimate compressed claim gas")?
            + self.cfg.gas_offset;
        let nonce = self.nonce_cache.get_next_nonce(self.wallet.address()).await?;
        let gas_price = self.client.gas_price().await?;
        let signed = self.wallet.sign_legacy_tx(&LegacyTx {
            nonce,
            gas_price,
            gas,
            to: Some(self.compressor_addr),
            value: alloy_primitives::U256::ZERO,
            data,
            chain_id: self.chain_id,
        })?;
        let tx_hash = self
            .client
            .send_raw_transaction(&signed.raw)
            .await
            .context("send compressed claims")?;
        info!(group_id = group.group_id, %tx_hash, "compressed claim group sent");
        group.tx_hash = Some(tx_hash);
        group.status = MonitoredTxGroupStatus::Sent;
        group.last_log = "sent".to_string();
        Ok(())
    }

    async fn observe_group(
        &self,
        conn: &mut PgConnection,
        group: &mut MonitoredTxGroup,
    ) -> Result<()> {
        let tx_hash = group
            .tx_hash
            .ok_or_else(|| anyhow!("sent group without a tx hash"))?;
        if let Some(receipt) = self.client.transaction_receipt(tx_hash).await? {
            if receipt.is_successful() {
                info!(group_id = group.group_id, "compressed claim group mined");
                group.status = MonitoredTxGroupStatus::Mined;
                group.last_log = "mined".to_string();
                storage::set_group_txs_status(conn, group.group_id, MonitoredTxStatus::Mined)
                    .await
                    .context("mark group members mined")?;
                return Ok(());
            }
            warn!(group_id = group.group_id, %tx_hash, "compressed claim group reverted");
        }

        let waited = Utc::now()
            .signed_duration_since(group.updated_at)
            .to_std()
            .unwrap_or_default();
        if waited < Duration::from_millis(self.cfg.retry_timeout_ms) {
            return Ok(());
        }

        group.num_retries += 1;
        if group.num_retries > self.cfg.max_retries {
            // Break glass: a wedged batch must not hold its members
            // hostage, so they fall back to the individual retry path.
            warn!(
                group_id = group.group_id,
                retries = group.num_retries,
                "claim group exhausted its retries, releasing members",
            );
            group.status = MonitoredTxGroupStatus::Failed;
            group.last_log = "retries exhausted, members released".to_string();
            storage::release_group_txs(conn, group.group_id)
                .await
                .context("release group members")?;
            return Ok(());
        }
        info!(
            group_id = group.group_id,
            retry = group.num_retries,
            "compressed claim group stuck, resending",
        );
        group.last_log = format!("retry {}", group.num_retries);
        self.send_group(group).await
    }
}

fn to_proof_array(siblings: &[alloy_primitives::B256]) -> Result<[alloy_primitives::B256; PROOF_LEN]> {
    if siblings.len() != PROOF_LEN {
        bail!("expected {PROOF_LEN} siblings, found {}", siblings.len());
    }
    let mut proof = [alloy_primitives::B256::ZERO; PROOF_LEN];
    proof.copy_from_slice(siblings);
    Ok(proof)
}
