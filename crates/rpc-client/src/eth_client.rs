use alloy_primitives::{Address, Bytes, B256, U256};
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::{
    error::RpcRequestError,
    types::{RpcBlockHeader, RpcLog, RpcTransactionReceipt},
    utils::TracingHttpClient,
};

const CLIENT_NAME: &str = "eth";

/// Call shape for `eth_call` / `eth_estimateGas`.
#[derive(Clone, Debug, Default)]
pub struct CallMsg {
    pub from: Address,
    pub to: Option<Address>,
    pub value: Option<U256>,
    pub data: Vec<u8>,
}

impl CallMsg {
    fn to_json(&self) -> serde_json::Value {
        let mut object = json!({
            "from": self.from,
            "data": format!("0x{}", hex::encode(&self.data)),
        });
        if let Some(to) = self.to {
            object["to"] = json!(to);
        }
        if let Some(value) = self.value {
            object["value"] = json!(format!("0x{value:x}"));
        }
        object
    }
}

/// Typed client for the subset of the eth JSON-RPC surface this service
/// consumes.
#[derive(Clone)]
pub struct EthClient {
    inner: TracingHttpClient,
}

impl EthClient {
    pub fn with_url(url: &str) -> anyhow::Result<Self> {
        Ok(Self {
            inner: TracingHttpClient::with_url(url.into())?,
        })
    }

    pub fn url(&self) -> &str {
        self.inner.url()
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T, RpcRequestError> {
        let raw = serde_json::value::to_raw_value(&params)
            .map_err(|err| RpcRequestError::new(CLIENT_NAME, method.to_string(), err))?;
        let value = self
            .inner
            .rpc(method, &raw)
            .await
            .map_err(|err| RpcRequestError::new(CLIENT_NAME, method.to_string(), err))?;
        serde_json::from_value(value)
            .map_err(|err| RpcRequestError::new(CLIENT_NAME, method.to_string(), err))
    }

    /// Latest block number.
    pub async fn block_number(&self) -> Result<u64, RpcRequestError> {
        let raw: String = self.request("eth_blockNumber", json!([])).await?;
        parse_quantity(&raw)
            .map_err(|err| RpcRequestError::new(CLIENT_NAME, "eth_blockNumber".into(), err))
    }

    /// Header by number; `None` asks for the latest block. Returns `None`
    /// when the node does not know the block.
    pub async fn header_by_number(
        &self,
        number: Option<u64>,
    ) -> Result<Option<RpcBlockHeader>, RpcRequestError> {
        let tag = match number {
            Some(n) => format!("0x{n:x}"),
            None => "latest".to_string(),
        };
        self.request("eth_getBlockByNumber", json!([tag, false]))
            .await
    }

    pub async fn header_by_hash(
        &self,
        hash: B256,
    ) -> Result<Option<RpcBlockHeader>, RpcRequestError> {
        self.request("eth_getBlockByHash", json!([hash, false]))
            .await
    }

    pub async fn get_logs(
        &self,
        from_block: u64,
        to_block: u64,
        addresses: &[Address],
        topics: &[B256],
    ) -> Result<Vec<RpcLog>, RpcRequestError> {
        let filter = json!([{
            "fromBlock": format!("0x{from_block:x}"),
            "toBlock": format!("0x{to_block:x}"),
            "address": addresses,
            "topics": [topics],
        }]);
        self.request("eth_getLogs", filter).await
    }

    pub async fn estimate_gas(&self, call: &CallMsg) -> Result<u64, RpcRequestError> {
        let raw: String = self
            .request("eth_estimateGas", json!([call.to_json()]))
            .await?;
        parse_quantity(&raw)
            .map_err(|err| RpcRequestError::new(CLIENT_NAME, "eth_estimateGas".into(), err))
    }

    pub async fn call(&self, call: &CallMsg) -> Result<Bytes, RpcRequestError> {
        self.request("eth_call", json!([call.to_json(), "latest"]))
            .await
    }

    pub async fn gas_price(&self) -> Result<U256, RpcRequestError> {
        let raw: String = self.request("eth_gasPrice", json!([])).await?;
        U256::from_str_radix(raw.trim_start_matches("0x"), 16)
            .map_err(|err| RpcRequestError::new(CLIENT_NAME, "eth_gasPrice".into(), err))
    }

    pub async fn chain_id(&self) -> Result<u64, RpcRequestError> {
        let raw: String = self.request("eth_chainId", json!([])).await?;
        parse_quantity(&raw)
            .map_err(|err| RpcRequestError::new(CLIENT_NAME, "eth_chainId".into(), err))
    }

    pub async fn send_raw_transaction(&self, raw_tx: &[u8]) -> Result<B256, RpcRequestError> {
        self.request(
            "eth_sendRawTransaction",
            json!([format!("0x{}", hex::encode(raw_tx))]),
        )
        .await
    }

    pub async fn transaction_receipt(
        &self,
        tx_hash: B256,
    ) -> Result<Option<RpcTransactionReceipt>, RpcRequestError> {
        self.request("eth_getTransactionReceipt", json!([tx_hash]))
            .await
    }

    /// The account's next nonce counting pending transactions.
    pub async fn pending_nonce_at(&self, address: Address) -> Result<u64, RpcRequestError> {
        let raw: String = self
            .request("eth_getTransactionCount", json!([address, "pending"]))
            .await?;
        parse_quantity(&raw).map_err(|err| {
            RpcRequestError::new(CLIENT_NAME, "eth_getTransactionCount".into(), err)
        })
    }
}

fn parse_quantity(raw: &str) -> anyhow::Result<u64> {
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    Ok(u64::from_str_radix(digits, 16)?)
}
