use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use tr_config::ClaimTxManagerConfig;
use tr_rpc_client::{CallMsg, EthClient, RpcRequestError};
use tr_storage::{self as storage, PgStorage};
use tr_types::{MonitoredTx, MonitoredTxStatus, MAX_HISTORY_SIZE};
use tr_utils::{wallet::LegacyTx, Wallet};
use tracing::{debug, info, warn};

use crate::NonceCache;

/// Drives individually monitored claim txs to completion.
pub struct MonitorTxs {
    storage: PgStorage,
    client: EthClient,
    cfg: ClaimTxManagerConfig,
    nonce_cache: Arc<NonceCache>,
    wallet: Arc<Wallet>,
    chain_id: u64,
    l2_network_id: u32,
}

impl MonitorTxs {
    pub fn new(
        storage: PgStorage,
        client: EthClient,
        cfg: ClaimTxManagerConfig,
        nonce_cache: Arc<NonceCache>,
        wallet: Arc<Wallet>,
        chain_id: u64,
        l2_network_id: u32,
    ) -> Self {
        MonitorTxs {
            storage,
            client,
            cfg,
            nonce_cache,
            wallet,
            chain_id,
            l2_network_id,
        }
    }

    /// One monitor pass: load every live tx for this destination, step its
    /// state machine, persist the outcome in a single transaction.
    pub async fn monitor_txs(&self) -> Result<()> {
        let mut tx = self.storage.begin().await?;
        let mtxs = storage::get_claim_txs_by_status(
            &mut tx,
            &[MonitoredTxStatus::Created, MonitoredTxStatus::Sent],
            self.l2_network_id,
        )
        .await
        .context("get monitored txs")?;

        for mut mtx in mtxs {
            debug!(deposit_id = mtx.deposit_id, status = mtx.status.as_str(), "processing tx");
            if let Err(err) = self.handle_monitored_tx(&mut mtx).await {
                warn!(deposit_id = mtx.deposit_id, %err, "error handling monitored tx");
            }
            storage::update_claim_tx(&mut tx, &mtx)
                .await
                .context("update monitored tx")?;
        }
        tx.commit().await.context("commit monitor pass")?;
        Ok(())
    }

    /// Steps one monitored tx: observe receipts first, then review and
    /// (re)send when it is still unmined.
    async fn handle_monitored_tx(&self, mtx: &mut MonitoredTx) -> Result<()> {
        if mtx.status == MonitoredTxStatus::Sent {
            match self.observe_receipts(mtx).await? {
                Observation::Mined => {
                    info!(deposit_id = mtx.deposit_id, "claim tx mined");
                    mtx.status = MonitoredTxStatus::Mined;
                    return Ok(());
                }
                Observation::AllFailed => {
                    warn!(deposit_id = mtx.deposit_id, "all claim tx attempts reverted");
                    mtx.status = MonitoredTxStatus::Failed;
                    return Ok(());
                }
                Observation::Pending => {
                    // Exhausting the history cap means ten distinct
                    // attempts vanished without a receipt.
                    if mtx.history.len() >= MAX_HISTORY_SIZE {
                        warn!(
                            deposit_id = mtx.deposit_id,
                            attempts = mtx.history.len(),
                            "giving up on claim tx",
                        );
                        mtx.status = MonitoredTxStatus::Failed;
                        return Ok(());
                    }
                }
            }
        }

        self.review_monitored_tx(mtx, false).await?;
        self.send_monitored_tx(mtx).await
    }

    /// Checks every historic hash for a receipt.
    async fn observe_receipts(&self, mtx: &MonitoredTx) -> Result<Observation> {
        let mut receipts = Vec::with_capacity(mtx.history.len());
        for tx_hash in &mtx.history {
            let receipt = self.client.transaction_receipt(*tx_hash).await?;
            receipts.push(receipt.map(|r| r.is_successful()));
        }
        Ok(classify_receipts(&receipts))
    }

    /// Re-estimates gas (raising the recorded limit when the chain asks
    /// for more) and, on request, re-seeds the nonce from the network.
    pub(crate) async fn review_monitored_tx(
        &self,
        mtx: &mut MonitoredTx,
        review_nonce: bool,
    ) -> Result<()> {
        debug!(deposit_id = mtx.deposit_id, "reviewing");
        let call = CallMsg {
            from: mtx.from,
            to: mtx.to,
            value: Some(mtx.value),
            data: mtx.data.clone(),
        };
        let gas = estimate_gas_with_retries(
            &self.client,
            &call,
            self.cfg.retry_number,
            Duration::from_millis(self.cfg.retry_interval_ms),
        )
        .await
        .context("failed to estimate gas")?;
        if gas > mtx.gas {
            info!(
                deposit_id = mtx.deposit_id,
                old_gas = mtx.gas,
                new_gas = gas,
                "monitored tx gas updated",
            );
            mtx.gas = gas;
        }

        if review_nonce {
            let nonce = self.nonce_cache.refresh_from_network(mtx.from).await?;
            if nonce > mtx.nonce {
                info!(
                    deposit_id = mtx.deposit_id,
                    old_nonce = mtx.nonce,
                    new_nonce = nonce,
                    "monitored tx nonce updated",
                );
                mtx.nonce = nonce;
            }
        }
        Ok(())
    }

    /// Signs and broadcasts; classifies broadcast failures.
    async fn send_monitored_tx(&self, mtx: &mut MonitoredTx) -> Result<()> {
        let gas_price = self.client.gas_price().await?;
        let signed = self.wallet.sign_legacy_tx(&LegacyTx {
            nonce: mtx.nonce,
            gas_price,
            gas: mtx.gas,
            to: mtx.to,
            value: mtx.value,
            data: mtx.data.clone(),
            chain_id: self.chain_id,
        })?;
        mtx.record_history(signed.tx_hash);
        match self.client.send_raw_transaction(&signed.raw).await {
            Ok(tx_hash) => {
                info!(deposit_id = mtx.deposit_id, %tx_hash, "claim tx sent");
                mtx.status = MonitoredTxStatus::Sent;
            }
            Err(err) if err.is_nonce_too_low() || err.is_replacement_underpriced() => {
                warn!(deposit_id = mtx.deposit_id, %err, "nonce conflict, reviewing");
                self.review_monitored_tx(mtx, true).await?;
            }
            Err(err) => {
                // Transient broadcast failure: the attempt stays in the
                // history and the next tick retries it.
                warn!(deposit_id = mtx.deposit_id, %err, "error sending claim tx");
                mtx.status = MonitoredTxStatus::Sent;
            }
        }
        Ok(())
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Observation {
    Mined,
    AllFailed,
    Pending,
}

/// Folds per-attempt receipt lookups (`Some(success)` / `None`) into one
/// verdict: any success mines the tx, a full set of failed receipts kills
/// it, anything else keeps waiting.
fn classify_receipts(receipts: &[Option<bool>]) -> Observation {
    if receipts.iter().any(|r| *r == Some(true)) {
        return Observation::Mined;
    }
    if !receipts.is_empty() && receipts.iter().all(|r| *r == Some(false)) {
        return Observation::AllFailed;
    }
    Observation::Pending
}

/// Gas estimation with the retry policy for transient failures: reverts
/// are terminal, anything else is retried with a pause.
pub(crate) async fn estimate_gas_with_retries(
    client: &EthClient,
    call: &CallMsg,
    retry_number: u32,
    retry_interval: Duration,
) -> Result<u64, RpcRequestError> {
    let mut attempt = 1;
    loop {
        match client.estimate_gas(call).await {
            Ok(gas) => return Ok(gas),
            Err(err) if err.is_execution_revert() => return Err(err),
            Err(err) if attempt >= retry_number => return Err(err),
            Err(err) => {
                warn!(%err, attempt, "error while doing gas estimation, retrying");
                tokio::time::sleep(retry_interval).await;
                attempt += 1;
            }
        }
    }
}

/// Logs a reproducer for a failed estimation so the revert can be replayed
/// by hand.
pub(crate) fn log_estimation_reproducer(
    url: &str,
    call: &CallMsg,
    block_number: Option<u64>,
) {
    let block = match block_number {
        Some(number) => format!("0x{number:x}"),
        None => "latest".to_string(),
    };
    let to = call.to.map(|to| to.to_string()).unwrap_or_default();
    warn!(
        "use the next command to debug it manually: \
         curl --location --request POST '{url}' \
         --header 'Content-Type: application/json' \
         --data-raw '{{\"jsonrpc\": \"2.0\", \"method\": \"eth_call\", \
         \"params\": [{{\"from\": \"{}\", \"to\": \"{}\", \"data\": \"0x{}\"}}, \"{}\"], \
         \"id\": 1}}'",
        call.from,
        to,
        hex::encode(&call.data),
        block,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receipt_classification() {
        assert_eq!(classify_receipts(&[]), Observation::Pending);
        assert_eq!(classify_receipts(&[None, None]), Observation::Pending);
        assert_eq!(
            classify_receipts(&[Some(false), None]),
            Observation::Pending
        );
        assert_eq!(
            classify_receipts(&[Some(false), Some(false)]),
            Observation::AllFailed
        );
        assert_eq!(
            classify_receipts(&[Some(false), Some(true)]),
            Observation::Mined
        );
        assert_eq!(classify_receipts(&[None, Some(true)]), Observation::Mined);
    }
}
