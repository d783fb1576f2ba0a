use std::str::FromStr;

use alloy_primitives::{Address, B256, U256};

use crate::StorageError;

pub(crate) fn as_b256(bytes: &[u8]) -> Result<B256, StorageError> {
    if bytes.len() != 32 {
        return Err(StorageError::Decode(format!(
            "expected 32 hash bytes, found {}",
            bytes.len()
        )));
    }
    Ok(B256::from_slice(bytes))
}

pub(crate) fn as_address(bytes: &[u8]) -> Result<Address, StorageError> {
    if bytes.len() != 20 {
        return Err(StorageError::Decode(format!(
            "expected 20 address bytes, found {}",
            bytes.len()
        )));
    }
    Ok(Address::from_slice(bytes))
}

/// Amounts persist as decimal strings.
pub(crate) fn as_amount(raw: &str) -> Result<U256, StorageError> {
    U256::from_str(raw).map_err(|err| StorageError::Decode(format!("amount {raw:?}: {err}")))
}

/// `exit_roots` columns hold either no roots or the mainnet/rollup pair.
pub(crate) fn as_exit_roots(
    raw: &[Vec<u8>],
) -> Result<Option<(B256, B256)>, StorageError> {
    match raw {
        [] => Ok(None),
        [mainnet, rollup] => Ok(Some((as_b256(mainnet)?, as_b256(rollup)?))),
        other => Err(StorageError::Decode(format!(
            "expected 0 or 2 exit roots, found {}",
            other.len()
        ))),
    }
}

pub(crate) fn exit_roots_to_vec(exit_roots: Option<(B256, B256)>) -> Vec<Vec<u8>> {
    match exit_roots {
        None => Vec::new(),
        Some((mainnet, rollup)) => {
            vec![mainnet.as_slice().to_vec(), rollup.as_slice().to_vec()]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amounts_round_trip_as_decimal_strings() {
        let amount = U256::from(10_000_000_001u64);
        assert_eq!(as_amount(&amount.to_string()).unwrap(), amount);
        assert!(as_amount("not-a-number").is_err());
    }

    #[test]
    fn exit_roots_shapes() {
        assert_eq!(as_exit_roots(&[]).unwrap(), None);
        let pair = vec![vec![0x11; 32], vec![0x22; 32]];
        assert_eq!(
            as_exit_roots(&pair).unwrap(),
            Some((B256::repeat_byte(0x11), B256::repeat_byte(0x22)))
        );
        assert!(as_exit_roots(&[vec![1; 32]]).is_err());
    }
}
