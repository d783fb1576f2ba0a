use std::collections::HashMap;

use alloy_primitives::{Address, B256, U256};
use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use tr_types::{
    decode_global_index, ger_hash, keccak256, Block, BlockEvents, Claim, Deposit, Event,
    GlobalExitRoot, TokenWrapped, VerifiedBatch,
};
use tracing::{debug, warn};

use crate::eth_client::EthClient;

fn event_topic(signature: &str) -> B256 {
    keccak256(signature.as_bytes())
}

lazy_static! {
    // GER manager events; the legacy signature carries the same payload.
    pub static ref UPDATE_L1_INFO_TREE_TOPIC: B256 =
        event_topic("UpdateL1InfoTree(bytes32,bytes32)");
    pub static ref UPDATE_GLOBAL_EXIT_ROOT_TOPIC: B256 =
        event_topic("UpdateGlobalExitRoot(bytes32,bytes32)");

    // Bridge events.
    pub static ref BRIDGE_EVENT_TOPIC: B256 =
        event_topic("BridgeEvent(uint8,uint32,address,uint32,address,uint256,bytes,uint32)");
    pub static ref CLAIM_EVENT_TOPIC: B256 =
        event_topic("ClaimEvent(uint256,uint32,address,address,uint256)");
    pub static ref OLD_CLAIM_EVENT_TOPIC: B256 =
        event_topic("ClaimEvent(uint32,uint32,address,address,uint256)");
    pub static ref NEW_WRAPPED_TOKEN_TOPIC: B256 =
        event_topic("NewWrappedToken(uint32,address,address,bytes)");

    // Rollup manager events.
    pub static ref VERIFY_BATCHES_TRUSTED_AGGREGATOR_TOPIC: B256 =
        event_topic("VerifyBatchesTrustedAggregator(uint32,uint64,bytes32,bytes32,address)");
    pub static ref VERIFY_BATCHES_TOPIC: B256 =
        event_topic("VerifyBatches(uint32,uint64,bytes32,bytes32,address)");

    // Sovereign chain GER manager events.
    pub static ref INSERT_GLOBAL_EXIT_ROOT_TOPIC: B256 =
        event_topic("InsertGlobalExitRoot(bytes32)");
    pub static ref REMOVE_LAST_GLOBAL_EXIT_ROOT_TOPIC: B256 =
        event_topic("RemoveLastGlobalExitRoot(bytes32)");

    /// Administrative and lifecycle events we recognize so the scanner
    /// stays quiet about them.
    pub static ref IGNORED_EVENTS: HashMap<B256, &'static str> = {
        let signatures: &[&str] = &[
            // Proxy plumbing.
            "Initialized(uint8)",
            "Initialized(uint64)",
            "AdminChanged(address,address)",
            "BeaconUpgraded(address)",
            "Upgraded(address)",
            "OwnershipTransferred(address,address)",
            // Access control.
            "RoleAdminChanged(bytes32,bytes32,bytes32)",
            "RoleGranted(bytes32,address,address)",
            "RoleRevoked(bytes32,address,address)",
            // Rollup manager administration.
            "SetBatchFee(uint256)",
            "SetTrustedAggregator(address)",
            "SetVerifyBatchTimeTarget(uint64)",
            "SetMultiplierBatchFee(uint16)",
            "SetPendingStateTimeout(uint64)",
            "SetTrustedAggregatorTimeout(uint64)",
            "OverridePendingState(uint32,uint64,bytes32,bytes32,address)",
            "OverridePendingState(uint64,bytes32,address)",
            "ProveNonDeterministicPendingState(bytes32,bytes32)",
            "ConsolidatePendingState(uint32,uint64,bytes32,bytes32,uint64)",
            "ConsolidatePendingState(uint64,bytes32,uint64)",
            "OnSequenceBatches(uint32,uint64)",
            "UpdateRollup(uint32,uint32,uint64)",
            "AddExistingRollup(uint32,uint64,address,uint64,uint8,uint64)",
            "CreateNewRollup(uint32,uint32,address,uint64,address)",
            "ObsoleteRollupType(uint32)",
            "AddNewRollupType(uint32,address,address,uint64,uint8,bytes32,string)",
            "EmergencyStateActivated()",
            "EmergencyStateDeactivated()",
            // Pre-rollup-manager era events.
            "VerifyBatchesTrustedAggregator(uint64,bytes32,address)",
            "VerifyBatches(uint64,bytes32,address)",
            "UpdateZkEVMVersion(uint64,uint64,string)",
            "SequenceBatches(uint64)",
            "SequenceBatches(uint64,bytes32)",
            "SequenceForceBatches(uint64)",
            "ForceBatch(uint64,bytes32,address,bytes)",
            "SetForceBatchTimeout(uint64)",
            "SetTrustedSequencerURL(string)",
            "SetTrustedSequencer(address)",
            "AcceptAdminRole(address)",
            "TransferAdminRole(address)",
            // Sovereign bridge administration.
            "SetBridgeManager(address)",
            "SetSovereignTokenAddress(uint32,address,address,bool)",
            "MigrateLegacyToken(address,address,address,uint256)",
            "RemoveLegacySovereignTokenAddress(address)",
            "SetSovereignWETHAddress(address,bool)",
            "SetGlobalExitRootUpdater(address)",
            "SetGlobalExitRootRemover(address)",
        ];
        signatures
            .iter()
            .map(|signature| (event_topic(signature), *signature))
            .collect()
    };
}

/// Topic-0 values worth pulling from the node.
pub fn interesting_topics() -> Vec<B256> {
    vec![
        *UPDATE_GLOBAL_EXIT_ROOT_TOPIC,
        *UPDATE_L1_INFO_TREE_TOPIC,
        *BRIDGE_EVENT_TOPIC,
        *CLAIM_EVENT_TOPIC,
        *OLD_CLAIM_EVENT_TOPIC,
        *NEW_WRAPPED_TOKEN_TOPIC,
        *VERIFY_BATCHES_TRUSTED_AGGREGATOR_TOPIC,
        *VERIFY_BATCHES_TOPIC,
        *INSERT_GLOBAL_EXIT_ROOT_TOPIC,
        *REMOVE_LAST_GLOBAL_EXIT_ROOT_TOPIC,
    ]
}

/// Reads logs for a block range and folds them into per-block ordered
/// event streams. Pure over the chain RPC; storage never enters here.
pub struct EventScanner {
    client: EthClient,
    addresses: Vec<Address>,
}

impl EventScanner {
    pub fn new(client: EthClient, addresses: Vec<Address>) -> Self {
        EventScanner { client, addresses }
    }

    pub fn client(&self) -> &EthClient {
        &self.client
    }

    /// `(from_block ..= to_block)` worth of decoded events, one entry per
    /// block that carried any, in ascending block order with events in
    /// log-index order.
    pub async fn get_events_by_block_range(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<BlockEvents>> {
        let logs = self
            .client
            .get_logs(from_block, to_block, &self.addresses, &interesting_topics())
            .await?;
        let mut blocks: Vec<BlockEvents> = Vec::new();
        for log in logs {
            let Some(event) = decode_event(&log.topics, &log.data, log.block_number, log.transaction_hash)?
            else {
                continue;
            };
            let last_matches = blocks
                .last()
                .map(|b| b.block.block_hash == log.block_hash && b.block.block_number == log.block_number)
                .unwrap_or(false);
            if !last_matches {
                let header = self
                    .client
                    .header_by_hash(log.block_hash)
                    .await?
                    .ok_or_else(|| {
                        anyhow!("header not found for block {} ({})", log.block_number, log.block_hash)
                    })?;
                blocks.push(BlockEvents {
                    block: Block {
                        id: 0,
                        block_number: log.block_number,
                        block_hash: log.block_hash,
                        parent_hash: header.parent_hash,
                        network_id: 0,
                        received_at: DateTime::<Utc>::from_timestamp(header.timestamp as i64, 0)
                            .unwrap_or_default(),
                    },
                    events: Vec::new(),
                });
            }
            blocks
                .last_mut()
                .expect("block entry was just ensured")
                .events
                .push(event);
        }
        Ok(blocks)
    }
}

/// Decodes one log. `Ok(None)` for recognized-but-uninteresting and
/// unknown topics; unknown topics additionally log a warning.
pub fn decode_event(
    topics: &[B256],
    data: &[u8],
    block_number: u64,
    tx_hash: B256,
) -> Result<Option<Event>> {
    let topic0 = *topics.first().ok_or_else(|| anyhow!("log without topics"))?;

    if topic0 == *UPDATE_L1_INFO_TREE_TOPIC || topic0 == *UPDATE_GLOBAL_EXIT_ROOT_TOPIC {
        let (mainnet_exit_root, rollup_exit_root) = indexed_root_pair(topics)?;
        return Ok(Some(Event::GlobalExitRoot(GlobalExitRoot {
            global_exit_root: ger_hash(mainnet_exit_root, rollup_exit_root),
            exit_roots: Some((mainnet_exit_root, rollup_exit_root)),
            block_number,
            ..Default::default()
        })));
    }
    if topic0 == *BRIDGE_EVENT_TOPIC {
        return decode_bridge_event(data, block_number, tx_hash).map(Some);
    }
    if topic0 == *CLAIM_EVENT_TOPIC {
        return decode_new_claim_event(data, block_number, tx_hash).map(Some);
    }
    if topic0 == *OLD_CLAIM_EVENT_TOPIC {
        return decode_old_claim_event(data, block_number, tx_hash).map(Some);
    }
    if topic0 == *NEW_WRAPPED_TOKEN_TOPIC {
        return decode_wrapped_token_event(data, block_number).map(Some);
    }
    if topic0 == *VERIFY_BATCHES_TRUSTED_AGGREGATOR_TOPIC || topic0 == *VERIFY_BATCHES_TOPIC {
        return decode_verify_batches_event(topics, data, block_number, tx_hash).map(Some);
    }
    if topic0 == *INSERT_GLOBAL_EXIT_ROOT_TOPIC {
        let ger = indexed_hash(topics, 1)?;
        return Ok(Some(Event::GlobalExitRoot(GlobalExitRoot {
            global_exit_root: ger,
            exit_roots: None,
            block_number,
            ..Default::default()
        })));
    }
    if topic0 == *REMOVE_LAST_GLOBAL_EXIT_ROOT_TOPIC {
        let ger = indexed_hash(topics, 1)?;
        return Ok(Some(Event::RemoveL2Ger(GlobalExitRoot {
            global_exit_root: ger,
            exit_roots: None,
            block_number,
            ..Default::default()
        })));
    }

    if let Some(name) = IGNORED_EVENTS.get(&topic0) {
        debug!(event = name, "event detected, ignoring");
    } else {
        warn!(topic = %topic0, block_number, "event not registered");
    }
    Ok(None)
}

fn indexed_hash(topics: &[B256], index: usize) -> Result<B256> {
    topics
        .get(index)
        .copied()
        .ok_or_else(|| anyhow!("missing indexed argument {index}"))
}

fn indexed_root_pair(topics: &[B256]) -> Result<(B256, B256)> {
    Ok((indexed_hash(topics, 1)?, indexed_hash(topics, 2)?))
}

fn decode_bridge_event(data: &[u8], block_number: u64, tx_hash: B256) -> Result<Event> {
    use ethabi::ParamType;
    let tokens = ethabi::decode(
        &[
            ParamType::Uint(8),
            ParamType::Uint(32),
            ParamType::Address,
            ParamType::Uint(32),
            ParamType::Address,
            ParamType::Uint(256),
            ParamType::Bytes,
            ParamType::Uint(32),
        ],
        data,
    )
    .context("decode bridge event")?;
    Ok(Event::Deposit(Deposit {
        leaf_type: token_u32(&tokens[0])? as u8,
        orig_net: token_u32(&tokens[1])?,
        orig_addr: token_address(&tokens[2])?,
        dest_net: token_u32(&tokens[3])?,
        dest_addr: token_address(&tokens[4])?,
        amount: token_u256(&tokens[5])?,
        metadata: token_bytes(&tokens[6])?,
        deposit_cnt: token_u32(&tokens[7])?,
        block_number,
        tx_hash,
        ..Default::default()
    }))
}

fn decode_new_claim_event(data: &[u8], block_number: u64, tx_hash: B256) -> Result<Event> {
    use ethabi::ParamType;
    let tokens = ethabi::decode(
        &[
            ParamType::Uint(256),
            ParamType::Uint(32),
            ParamType::Address,
            ParamType::Address,
            ParamType::Uint(256),
        ],
        data,
    )
    .context("decode claim event")?;
    let global_index = token_u256(&tokens[0])?;
    let (mainnet_flag, rollup_index, index) = decode_global_index(global_index);
    Ok(Event::Claim(Claim {
        mainnet_flag,
        rollup_index,
        index,
        orig_net: token_u32(&tokens[1])?,
        orig_addr: token_address(&tokens[2])?,
        dest_addr: token_address(&tokens[3])?,
        amount: token_u256(&tokens[4])?,
        block_number,
        tx_hash,
        ..Default::default()
    }))
}

fn decode_old_claim_event(data: &[u8], block_number: u64, tx_hash: B256) -> Result<Event> {
    use ethabi::ParamType;
    let tokens = ethabi::decode(
        &[
            ParamType::Uint(32),
            ParamType::Uint(32),
            ParamType::Address,
            ParamType::Address,
            ParamType::Uint(256),
        ],
        data,
    )
    .context("decode legacy claim event")?;
    Ok(Event::Claim(Claim {
        mainnet_flag: false,
        rollup_index: 0,
        index: token_u32(&tokens[0])?,
        orig_net: token_u32(&tokens[1])?,
        orig_addr: token_address(&tokens[2])?,
        dest_addr: token_address(&tokens[3])?,
        amount: token_u256(&tokens[4])?,
        block_number,
        tx_hash,
        ..Default::default()
    }))
}

fn decode_wrapped_token_event(data: &[u8], block_number: u64) -> Result<Event> {
    use ethabi::ParamType;
    let tokens = ethabi::decode(
        &[
            ParamType::Uint(32),
            ParamType::Address,
            ParamType::Address,
            ParamType::Bytes,
        ],
        data,
    )
    .context("decode wrapped token event")?;
    Ok(Event::TokenWrapped(TokenWrapped {
        orig_net: token_u32(&tokens[0])?,
        orig_token_addr: token_address(&tokens[1])?,
        wrapped_token_addr: token_address(&tokens[2])?,
        block_number,
        ..Default::default()
    }))
}

fn decode_verify_batches_event(
    topics: &[B256],
    data: &[u8],
    block_number: u64,
    tx_hash: B256,
) -> Result<Event> {
    use ethabi::ParamType;
    let rollup_id = u32::from_be_bytes(
        indexed_hash(topics, 1)?.as_slice()[28..]
            .try_into()
            .expect("4 bytes"),
    );
    let aggregator = Address::from_slice(&indexed_hash(topics, 2)?.as_slice()[12..]);
    let tokens = ethabi::decode(
        &[
            ParamType::Uint(64),
            ParamType::FixedBytes(32),
            ParamType::FixedBytes(32),
        ],
        data,
    )
    .context("decode verify batches event")?;
    Ok(Event::VerifiedBatch(VerifiedBatch {
        rollup_id,
        aggregator,
        batch_number: token_u64(&tokens[0])?,
        state_root: token_fixed_bytes(&tokens[1])?,
        local_exit_root: token_fixed_bytes(&tokens[2])?,
        block_number,
        tx_hash,
    }))
}

fn token_u256(token: &ethabi::Token) -> Result<U256> {
    match token {
        ethabi::Token::Uint(value) => {
            let mut bytes = [0u8; 32];
            value.to_big_endian(&mut bytes);
            Ok(U256::from_be_bytes(bytes))
        }
        other => bail!("expected uint, got {other:?}"),
    }
}

fn token_u64(token: &ethabi::Token) -> Result<u64> {
    match token {
        ethabi::Token::Uint(value) => Ok(value.low_u64()),
        other => bail!("expected uint, got {other:?}"),
    }
}

fn token_u32(token: &ethabi::Token) -> Result<u32> {
    Ok(token_u64(token)? as u32)
}

fn token_address(token: &ethabi::Token) -> Result<Address> {
    match token {
        ethabi::Token::Address(value) => Ok(Address::from_slice(value.as_bytes())),
        other => bail!("expected address, got {other:?}"),
    }
}

fn token_bytes(token: &ethabi::Token) -> Result<Vec<u8>> {
    match token {
        ethabi::Token::Bytes(value) => Ok(value.clone()),
        other => bail!("expected bytes, got {other:?}"),
    }
}

fn token_fixed_bytes(token: &ethabi::Token) -> Result<B256> {
    match token {
        ethabi::Token::FixedBytes(value) if value.len() == 32 => Ok(B256::from_slice(value)),
        other => bail!("expected bytes32, got {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_constants_match_known_values() {
        assert_eq!(
            hex::encode(UPDATE_L1_INFO_TREE_TOPIC.as_slice()),
            "da61aa7823fcd807e37b95aabcbe17f03a6f3efd514176444dae191d27fd66b3"
        );
        assert_eq!(
            hex::encode(BRIDGE_EVENT_TOPIC.as_slice()),
            "501781209a1f8899323b96b4ef08b168df93e0a90c673d1e4cce39366cb62f9b"
        );
        assert_eq!(
            hex::encode(CLAIM_EVENT_TOPIC.as_slice()),
            "1df3f2a973a00d6635911755c260704e95e8a5876997546798770f76396fda4d"
        );
    }

    #[test]
    fn decodes_bridge_event() {
        let data = ethabi::encode(&[
            ethabi::Token::Uint(1u8.into()),
            ethabi::Token::Uint(0u32.into()),
            ethabi::Token::Address([0x11; 20].into()),
            ethabi::Token::Uint(2u32.into()),
            ethabi::Token::Address([0x22; 20].into()),
            ethabi::Token::Uint(1_000_000_001u64.into()),
            ethabi::Token::Bytes(vec![0xde, 0xad]),
            ethabi::Token::Uint(7u32.into()),
        ]);
        let event = decode_event(
            &[*BRIDGE_EVENT_TOPIC],
            &data,
            42,
            B256::repeat_byte(9),
        )
        .unwrap()
        .unwrap();
        match event {
            Event::Deposit(deposit) => {
                assert_eq!(deposit.leaf_type, 1);
                assert_eq!(deposit.orig_net, 0);
                assert_eq!(deposit.dest_net, 2);
                assert_eq!(deposit.deposit_cnt, 7);
                assert_eq!(deposit.amount, U256::from(1_000_000_001u64));
                assert_eq!(deposit.metadata, vec![0xde, 0xad]);
                assert_eq!(deposit.block_number, 42);
            }
            other => panic!("expected deposit, got {other:?}"),
        }
    }

    #[test]
    fn decodes_new_claim_event_global_index() {
        let global_index = tr_types::generate_global_index(false, 3, 9);
        let mut be = [0u8; 32];
        be.copy_from_slice(&global_index.to_be_bytes::<32>());
        let data = ethabi::encode(&[
            ethabi::Token::Uint(ethabi::Uint::from_big_endian(&be)),
            ethabi::Token::Uint(4u32.into()),
            ethabi::Token::Address([0x33; 20].into()),
            ethabi::Token::Address([0x44; 20].into()),
            ethabi::Token::Uint(5u64.into()),
        ]);
        let event = decode_event(&[*CLAIM_EVENT_TOPIC], &data, 1, B256::ZERO)
            .unwrap()
            .unwrap();
        match event {
            Event::Claim(claim) => {
                assert!(!claim.mainnet_flag);
                assert_eq!(claim.rollup_index, 3);
                assert_eq!(claim.index, 9);
                assert_eq!(claim.orig_net, 4);
            }
            other => panic!("expected claim, got {other:?}"),
        }
    }

    #[test]
    fn ger_update_comes_from_topics() {
        let mainnet = B256::repeat_byte(0xaa);
        let rollup = B256::repeat_byte(0xbb);
        let event = decode_event(
            &[*UPDATE_L1_INFO_TREE_TOPIC, mainnet, rollup],
            &[],
            5,
            B256::ZERO,
        )
        .unwrap()
        .unwrap();
        match event {
            Event::GlobalExitRoot(ger) => {
                assert_eq!(ger.exit_roots, Some((mainnet, rollup)));
                assert_eq!(ger.global_exit_root, ger_hash(mainnet, rollup));
            }
            other => panic!("expected ger, got {other:?}"),
        }
    }

    #[test]
    fn admin_events_are_recognized_and_dropped() {
        let topic = event_topic("RoleGranted(bytes32,address,address)");
        assert!(IGNORED_EVENTS.contains_key(&topic));
        assert!(decode_event(&[topic], &[], 1, B256::ZERO).unwrap().is_none());
    }

    #[test]
    fn unknown_topic_is_dropped() {
        let topic = event_topic("TotallyMadeUp(uint256)");
        assert!(decode_event(&[topic], &[], 1, B256::ZERO).unwrap().is_none());
    }
}
