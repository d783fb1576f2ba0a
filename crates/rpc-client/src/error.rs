use thiserror::Error;

/// Error for a single RPC request, carrying the client and method that
/// produced it.
#[derive(Error, Debug)]
#[error("{client} error, method: {method} error: {source}")]
pub struct RpcRequestError {
    pub client: &'static str,
    pub method: String,
    pub source: anyhow::Error,
}

impl RpcRequestError {
    pub fn new<E: Into<anyhow::Error>>(client: &'static str, method: String, source: E) -> Self {
        RpcRequestError {
            client,
            method,
            source: source.into(),
        }
    }

    /// True when the node rejected the call because the transaction would
    /// revert. Back-ends disagree on error codes here, so this is the one
    /// place in the codebase that matches on server error text; swapping a
    /// back-end with a different message only touches this function.
    pub fn is_execution_revert(&self) -> bool {
        let text = self.source.to_string().to_ascii_lowercase();
        text.contains("execution reverted") || text.contains("execution error: revert")
    }

    /// True when a broadcast failed because the nonce was already consumed.
    pub fn is_nonce_too_low(&self) -> bool {
        let text = self.source.to_string().to_ascii_lowercase();
        text.contains("nonce too low") || text.contains("already known")
    }

    /// True when a broadcast failed because a same-nonce transaction with a
    /// better price is already pending.
    pub fn is_replacement_underpriced(&self) -> bool {
        self.source
            .to_string()
            .to_ascii_lowercase()
            .contains("replacement transaction underpriced")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_revert_text() {
        let err = RpcRequestError::new(
            "eth",
            "eth_estimateGas".into(),
            anyhow::anyhow!("Execution reverted: ERC20: insufficient balance"),
        );
        assert!(err.is_execution_revert());
        assert!(!err.is_nonce_too_low());
    }

    #[test]
    fn classifies_nonce_and_price_text() {
        let low = RpcRequestError::new("eth", "m".into(), anyhow::anyhow!("nonce too low"));
        assert!(low.is_nonce_too_low());
        let under = RpcRequestError::new(
            "eth",
            "m".into(),
            anyhow::anyhow!("replacement transaction underpriced"),
        );
        assert!(under.is_replacement_underpriced());
    }
}
