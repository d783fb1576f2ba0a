use std::{sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tr_claimtx::ClaimTxManager;
use tr_config::Config;
use tr_merkle::BridgeController;
use tr_proof::BridgeService;
use tr_rpc_client::{EthClient, EventScanner, RollupNodeClient};
use tr_storage::{PgMerkleStore, PgStorage};
use tr_synchronizer::{ClientSynchronizer, SynchronizerConfig};
use tr_utils::{AbortOnDropHandle, Wallet};
use tracing::{error, info};

/// Wires storage, trees, synchronizers and claim managers and runs them
/// until interrupted.
pub async fn run(config: Config) -> Result<()> {
    if config.networks.is_empty() || config.networks[0].network_id != 0 {
        bail!("the first configured network must be the L1 (network_id = 0)");
    }
    let network_ids = config.network_ids();

    let storage = PgStorage::connect(&config.database.url, config.database.max_conns)
        .await
        .context("connect to the database")?;

    let bridge_ctrl = {
        let mut conn = storage.acquire().await?;
        let mut store = PgMerkleStore(&mut conn);
        BridgeController::new(&mut store, config.bridge_controller.height, &network_ids)
            .await
            .context("initialize the bridge trees")?
    };
    let bridge_ctrl = Arc::new(Mutex::new(bridge_ctrl));
    let bridge_service = Arc::new(BridgeService::new(
        config.bridge_controller.height,
        config.proof_service.cache_size,
    ));

    let cancel = CancellationToken::new();
    let (ch_synced, _) = broadcast::channel::<u32>(network_ids.len().max(1) * 2);
    let sync_cfg = SynchronizerConfig {
        sync_interval: Duration::from_millis(config.synchronizer.sync_interval_ms),
        sync_chunk_size: config.synchronizer.sync_chunk_size,
    };

    let wallet = if config.claim_tx_manager.enabled {
        Some(Arc::new(
            Wallet::from_hex_key(&config.claim_tx_manager.private_key)
                .context("load claim tx manager key")?,
        ))
    } else {
        None
    };

    let mut tasks: Vec<(String, AbortOnDropHandle<Result<()>>)> = Vec::new();
    let mut l1_ger_senders = Vec::new();

    // Rollup networks first: each gets its GER channel, its synchronizer
    // and, when enabled, its claim manager.
    for network in config.networks.iter().filter(|n| n.network_id != 0) {
        let (ger_tx, ger_rx) = mpsc::channel(1);
        l1_ger_senders.push(ger_tx.clone());

        let client = EthClient::with_url(&network.url)
            .with_context(|| format!("connect to network {}", network.network_id))?;
        let mut addresses = vec![network.bridge_addr];
        if network.sovereign_chain {
            addresses.extend(network.global_exit_root_addr);
        }
        let scanner = EventScanner::new(client.clone(), addresses);
        let rollup_client = if network.sovereign_chain {
            None
        } else {
            Some(RollupNodeClient::with_url(&network.url)?)
        };

        let synchronizer = ClientSynchronizer::new(
            storage.clone(),
            bridge_ctrl.clone(),
            scanner,
            rollup_client,
            sync_cfg,
            network.network_id,
            network.genesis_block_number,
            Some(ger_tx),
            Vec::new(),
            ch_synced.clone(),
            network_ids.clone(),
            network.sovereign_chain,
            cancel.clone(),
        )
        .await?;
        tasks.push((
            format!("synchronizer-{}", network.network_id),
            AbortOnDropHandle::from(tokio::spawn(synchronizer.sync())),
        ));

        if let Some(wallet) = &wallet {
            let chain_id = if network.chain_id != 0 {
                network.chain_id
            } else {
                client.chain_id().await.context("query chain id")?
            };
            let manager = ClaimTxManager::new(
                storage.clone(),
                client,
                bridge_service.clone(),
                config.claim_tx_manager.clone(),
                network.network_id,
                network.network_id,
                network.bridge_addr,
                network.claim_compressor_addr,
                wallet.clone(),
                chain_id,
                cancel.clone(),
            );
            let synced_rx = ch_synced.subscribe();
            tasks.push((
                format!("claim-tx-manager-{}", network.network_id),
                AbortOnDropHandle::from(tokio::spawn(manager.start(ger_rx, synced_rx))),
            ));
        }
    }

    // The L1 synchronizer fans GER updates out to every destination.
    let l1 = &config.networks[0];
    let l1_client = EthClient::with_url(&l1.url).context("connect to L1")?;
    let mut l1_addresses = vec![l1.bridge_addr];
    l1_addresses.extend(l1.global_exit_root_addr);
    l1_addresses.extend(l1.rollup_manager_addr);
    let l1_scanner = EventScanner::new(l1_client, l1_addresses);
    let l1_synchronizer = ClientSynchronizer::new(
        storage.clone(),
        bridge_ctrl.clone(),
        l1_scanner,
        None,
        sync_cfg,
        0,
        l1.genesis_block_number,
        None,
        l1_ger_senders,
        ch_synced.clone(),
        network_ids.clone(),
        false,
        cancel.clone(),
    )
    .await?;
    tasks.push((
        "synchronizer-0".to_string(),
        AbortOnDropHandle::from(tokio::spawn(l1_synchronizer.sync())),
    ));

    info!(tasks = tasks.len(), "all tasks started");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut failure: Option<anyhow::Error> = None;
    loop {
        if tasks.is_empty() {
            break;
        }
        let joined = futures_select(&mut tasks);
        tokio::select! {
            _ = &mut shutdown => {
                info!("interrupt received, shutting down");
                cancel.cancel();
                break;
            }
            (name, result) = joined => {
                match result {
                    Ok(Ok(())) => info!(task = %name, "task finished"),
                    Ok(Err(err)) => {
                        error!(task = %name, %err, "task failed");
                        failure = Some(err);
                        cancel.cancel();
                        break;
                    }
                    Err(join_err) => {
                        error!(task = %name, %join_err, "task panicked");
                        failure = Some(join_err.into());
                        cancel.cancel();
                        break;
                    }
                }
            }
        }
    }

    // Let the remaining tasks finish their in-flight transactions.
    for (name, task) in tasks {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!(task = %name, %err, "task failed during shutdown"),
            Err(join_err) if join_err.is_cancelled() => {}
            Err(join_err) => error!(task = %name, %join_err, "task panicked during shutdown"),
        }
    }

    match failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Waits for whichever task finishes first and removes it from the list.
async fn futures_select(
    tasks: &mut Vec<(String, AbortOnDropHandle<Result<()>>)>,
) -> (String, Result<Result<()>, tokio::task::JoinError>) {
    let (index, name, result) = {
        let futures: Vec<_> = tasks
            .iter_mut()
            .enumerate()
            .map(|(index, (name, task))| {
                let name = name.clone();
                Box::pin(async move { (index, name, task.await) })
            })
            .collect();
        let (finished, _, _) = futures::future::select_all(futures).await;
        finished
    };
    tasks.remove(index);
    (name, result)
}
