//! ABI builders for the on-chain operations the claim tx manager emits.

use alloy_primitives::{Address, B256, U256};
use lazy_static::lazy_static;
use tr_types::{keccak256, Deposit, LEAF_TYPE_MESSAGE};

/// The fixed proof depth of every exit tree.
pub const PROOF_LEN: usize = 32;

/// A pair of sibling sequences plus the exit roots they verify against.
#[derive(Clone, Debug)]
pub struct ClaimProofBundle {
    pub proof: [B256; PROOF_LEN],
    pub rollup_proof: [B256; PROOF_LEN],
    pub mainnet_exit_root: B256,
    pub rollup_exit_root: B256,
    pub global_index: U256,
}

fn selector(signature: &str) -> [u8; 4] {
    let digest = keccak256(signature.as_bytes());
    digest.as_slice()[..4].try_into().expect("4 bytes")
}

lazy_static! {
    static ref CLAIM_ASSET_SELECTOR: [u8; 4] = selector(
        "claimAsset(bytes32[32],bytes32[32],uint256,bytes32,bytes32,uint32,address,uint32,address,uint256,bytes)"
    );
    static ref CLAIM_MESSAGE_SELECTOR: [u8; 4] = selector(
        "claimMessage(bytes32[32],bytes32[32],uint256,bytes32,bytes32,uint32,address,uint32,address,uint256,bytes)"
    );
    static ref COMPRESS_CLAIM_CALL_SELECTOR: [u8; 4] = selector(
        "compressClaimCall(bytes32,bytes32,(bytes32[32],bytes32[32],uint256,uint32,address,address,uint256,bytes,bool)[])"
    );
    static ref SEND_COMPRESSED_CLAIMS_SELECTOR: [u8; 4] = selector("sendCompressedClaims(bytes)");
}

fn abi_uint(value: U256) -> ethabi::Token {
    ethabi::Token::Uint(ethabi::Uint::from_big_endian(&value.to_be_bytes::<32>()))
}

fn abi_u32(value: u32) -> ethabi::Token {
    ethabi::Token::Uint(value.into())
}

fn abi_address(value: Address) -> ethabi::Token {
    ethabi::Token::Address(ethabi::Address::from_slice(value.as_slice()))
}

fn abi_proof(proof: &[B256; PROOF_LEN]) -> ethabi::Token {
    ethabi::Token::FixedArray(
        proof
            .iter()
            .map(|sibling| ethabi::Token::FixedBytes(sibling.as_slice().to_vec()))
            .collect(),
    )
}

/// Calldata for `claimAsset` / `claimMessage`, selected by the deposit's
/// leaf type.
pub fn build_claim_calldata(deposit: &Deposit, bundle: &ClaimProofBundle) -> Vec<u8> {
    let selector = if deposit.leaf_type == LEAF_TYPE_MESSAGE {
        *CLAIM_MESSAGE_SELECTOR
    } else {
        *CLAIM_ASSET_SELECTOR
    };
    let encoded = ethabi::encode(&[
        abi_proof(&bundle.proof),
        abi_proof(&bundle.rollup_proof),
        abi_uint(bundle.global_index),
        ethabi::Token::FixedBytes(bundle.mainnet_exit_root.as_slice().to_vec()),
        ethabi::Token::FixedBytes(bundle.rollup_exit_root.as_slice().to_vec()),
        abi_u32(deposit.orig_net),
        abi_address(deposit.orig_addr),
        abi_u32(deposit.dest_net),
        abi_address(deposit.dest_addr),
        abi_uint(deposit.amount),
        ethabi::Token::Bytes(deposit.metadata.clone()),
    ]);
    let mut calldata = Vec::with_capacity(4 + encoded.len());
    calldata.extend_from_slice(&selector);
    calldata.extend_from_slice(&encoded);
    calldata
}

/// One element of the claim compressor's call-data array.
#[derive(Clone, Debug)]
pub struct CompressClaimData {
    pub proof: [B256; PROOF_LEN],
    pub rollup_proof: [B256; PROOF_LEN],
    pub global_index: U256,
    pub orig_net: u32,
    pub orig_addr: Address,
    pub dest_addr: Address,
    pub amount: U256,
    pub metadata: Vec<u8>,
    pub is_message: bool,
}

/// Calldata for the `compressClaimCall` view.
pub fn build_compress_claim_call(
    mainnet_exit_root: B256,
    rollup_exit_root: B256,
    claims: &[CompressClaimData],
) -> Vec<u8> {
    let elements = claims
        .iter()
        .map(|claim| {
            ethabi::Token::Tuple(vec![
                abi_proof(&claim.proof),
                abi_proof(&claim.rollup_proof),
                abi_uint(claim.global_index),
                abi_u32(claim.orig_net),
                abi_address(claim.orig_addr),
                abi_address(claim.dest_addr),
                abi_uint(claim.amount),
                ethabi::Token::Bytes(claim.metadata.clone()),
                ethabi::Token::Bool(claim.is_message),
            ])
        })
        .collect();
    let encoded = ethabi::encode(&[
        ethabi::Token::FixedBytes(mainnet_exit_root.as_slice().to_vec()),
        ethabi::Token::FixedBytes(rollup_exit_root.as_slice().to_vec()),
        ethabi::Token::Array(elements),
    ]);
    let mut calldata = Vec::with_capacity(4 + encoded.len());
    calldata.extend_from_slice(&*COMPRESS_CLAIM_CALL_SELECTOR);
    calldata.extend_from_slice(&encoded);
    calldata
}

/// Calldata for the state-changing `sendCompressedClaims`.
pub fn build_send_compressed_claims(compressed: &[u8]) -> Vec<u8> {
    let encoded = ethabi::encode(&[ethabi::Token::Bytes(compressed.to_vec())]);
    let mut calldata = Vec::with_capacity(4 + encoded.len());
    calldata.extend_from_slice(&*SEND_COMPRESSED_CLAIMS_SELECTOR);
    calldata.extend_from_slice(&encoded);
    calldata
}

#[cfg(test)]
mod tests {
    use super::*;
    use tr_types::generate_global_index;

    fn bundle() -> ClaimProofBundle {
        ClaimProofBundle {
            proof: [B256::repeat_byte(1); PROOF_LEN],
            rollup_proof: [B256::ZERO; PROOF_LEN],
            mainnet_exit_root: B256::repeat_byte(2),
            rollup_exit_root: B256::repeat_byte(3),
            global_index: generate_global_index(true, 0, 4),
        }
    }

    #[test]
    fn claim_asset_layout() {
        let deposit = Deposit {
            leaf_type: 0,
            orig_net: 0,
            dest_net: 1,
            amount: U256::from(10u64),
            metadata: vec![],
            ..Default::default()
        };
        let calldata = build_claim_calldata(&deposit, &bundle());
        // selector + two 32-word proofs + 9 head words (metadata head is an
        // offset) + empty-bytes length word.
        assert_eq!(calldata.len(), 4 + 32 * 32 * 2 + 9 * 32 + 32);
        // The first proof sibling sits right after the selector.
        assert_eq!(&calldata[4..36], B256::repeat_byte(1).as_slice());
    }

    #[test]
    fn claim_message_uses_message_selector() {
        let deposit = Deposit {
            leaf_type: tr_types::LEAF_TYPE_MESSAGE,
            ..Default::default()
        };
        let asset = build_claim_calldata(
            &Deposit {
                leaf_type: 0,
                ..Default::default()
            },
            &bundle(),
        );
        let message = build_claim_calldata(&deposit, &bundle());
        assert_ne!(asset[..4], message[..4]);
        assert_eq!(asset[4..], message[4..]);
    }

    #[test]
    fn compressed_call_round_trips_through_ethabi() {
        let claims = vec![CompressClaimData {
            proof: [B256::repeat_byte(5); PROOF_LEN],
            rollup_proof: [B256::ZERO; PROOF_LEN],
            global_index: generate_global_index(false, 1, 2),
            orig_net: 0,
            orig_addr: Address::repeat_byte(6),
            dest_addr: Address::repeat_byte(7),
            amount: U256::from(99u64),
            metadata: vec![1, 2, 3],
            is_message: false,
        }];
        let calldata =
            build_compress_claim_call(B256::repeat_byte(8), B256::repeat_byte(9), &claims);
        use ethabi::ParamType;
        let decoded = ethabi::decode(
            &[
                ParamType::FixedBytes(32),
                ParamType::FixedBytes(32),
                ParamType::Array(Box::new(ParamType::Tuple(vec![
                    ParamType::FixedArray(Box::new(ParamType::FixedBytes(32)), 32),
                    ParamType::FixedArray(Box::new(ParamType::FixedBytes(32)), 32),
                    ParamType::Uint(256),
                    ParamType::Uint(32),
                    ParamType::Address,
                    ParamType::Address,
                    ParamType::Uint(256),
                    ParamType::Bytes,
                    ParamType::Bool,
                ]))),
            ],
            &calldata[4..],
        )
        .unwrap();
        assert_eq!(decoded.len(), 3);
        match &decoded[2] {
            ethabi::Token::Array(items) => assert_eq!(items.len(), 1),
            other => panic!("expected array, got {other:?}"),
        }
    }
}
