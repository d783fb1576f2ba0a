use alloy_primitives::B256;
use serde::Deserialize;
use serde_json::json;

use crate::{error::RpcRequestError, utils::TracingHttpClient};

const CLIENT_NAME: &str = "rollup-node";

/// The exit root pair a trusted rollup node reports for a GER.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExitRoots {
    pub mainnet_exit_root: B256,
    pub rollup_exit_root: B256,
}

/// Client for the trusted-state surface a rollup sequencer node exposes.
#[derive(Clone)]
pub struct RollupNodeClient {
    inner: TracingHttpClient,
}

impl RollupNodeClient {
    pub fn with_url(url: &str) -> anyhow::Result<Self> {
        Ok(Self {
            inner: TracingHttpClient::with_url(url.into())?,
        })
    }

    async fn request<T: serde::de::DeserializeOwned>(
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

    /// The most recent GER the trusted sequencer has injected.
    pub async fn get_latest_global_exit_root(&self) -> Result<B256, RpcRequestError> {
        self.request("zkevm_getLatestGlobalExitRoot", json!([]))
            .await
    }

    /// The exit root pair behind a GER, or `None` when the node has not
    /// seen it.
    pub async fn exit_roots_by_ger(
        &self,
        ger: B256,
    ) -> Result<Option<ExitRoots>, RpcRequestError> {
        self.request("zkevm_getExitRootsByGER", json!([ger])).await
    }
}
