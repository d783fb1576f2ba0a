use alloy_primitives::{Address, Bytes, B256};
use serde::Deserialize;

/// Hex-quantity (`"0x..."`) u64 fields.
pub(crate) mod hex_u64 {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let digits = raw.strip_prefix("0x").unwrap_or(&raw);
        u64::from_str_radix(digits, 16).map_err(serde::de::Error::custom)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcBlockHeader {
    #[serde(with = "hex_u64")]
    pub number: u64,
    pub hash: B256,
    pub parent_hash: B256,
    #[serde(with = "hex_u64")]
    pub timestamp: u64,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    #[serde(with = "hex_u64")]
    pub block_number: u64,
    pub block_hash: B256,
    pub transaction_hash: B256,
    #[serde(with = "hex_u64")]
    pub log_index: u64,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcTransactionReceipt {
    pub transaction_hash: B256,
    pub block_hash: B256,
    #[serde(with = "hex_u64")]
    pub block_number: u64,
    #[serde(with = "hex_u64")]
    pub status: u64,
}

impl RpcTransactionReceipt {
    pub fn is_successful(&self) -> bool {
        self.status == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_log_json() {
        let raw = serde_json::json!({
            "address": "0x2279b7a0a67db372996a5fab50d91eaa73d2ebe6",
            "topics": [
                "0xda61aa7823fcd807e37b95aabcbe17f03a6f3efd514176444dae191d27fd66b3",
                "0x0000000000000000000000000000000000000000000000000000000000000001"
            ],
            "data": "0x",
            "blockNumber": "0x10",
            "blockHash": "0x27474f16174bbe50c294fe13c190b92e42b2368a6d4aeb8a4a015f52816296c3",
            "transactionHash": "0xc9b5033799adf3739383a0489efbe8a0d4d5e4478778a4f4304562fd51ae4c07",
            "logIndex": "0x2"
        });
        let log: RpcLog = serde_json::from_value(raw).unwrap();
        assert_eq!(log.block_number, 16);
        assert_eq!(log.log_index, 2);
        assert_eq!(log.topics.len(), 2);
        assert!(log.data.is_empty());
    }

    #[test]
    fn receipt_status() {
        let raw = serde_json::json!({
            "transactionHash": "0xc9b5033799adf3739383a0489efbe8a0d4d5e4478778a4f4304562fd51ae4c07",
            "blockHash": "0x27474f16174bbe50c294fe13c190b92e42b2368a6d4aeb8a4a015f52816296c3",
            "blockNumber": "0xff",
            "status": "0x1"
        });
        let receipt: RpcTransactionReceipt = serde_json::from_value(raw).unwrap();
        assert!(receipt.is_successful());
    }
}
