use alloy_primitives::{Address, B256, U256};
use anyhow::{anyhow, Context, Result};
use secp256k1::{Message, PublicKey, SecretKey, SECP256K1};
use sha3::{Digest, Keccak256};

/// An unsigned legacy transaction.
#[derive(Clone, Debug, Default)]
pub struct LegacyTx {
    pub nonce: u64,
    pub gas_price: U256,
    pub gas: u64,
    pub to: Option<Address>,
    pub value: U256,
    pub data: Vec<u8>,
    pub chain_id: u64,
}

/// A signed transaction ready for `eth_sendRawTransaction`.
#[derive(Clone, Debug)]
pub struct SignedTx {
    pub raw: Vec<u8>,
    pub tx_hash: B256,
}

/// Signer for claim transactions. Holds a single secp256k1 key.
pub struct Wallet {
    secret: SecretKey,
    address: Address,
}

impl Wallet {
    pub fn new(secret: SecretKey) -> Self {
        let public = PublicKey::from_secret_key(SECP256K1, &secret);
        let uncompressed = public.serialize_uncompressed();
        let digest = keccak(&uncompressed[1..]);
        let address = Address::from_slice(&digest[12..]);
        Wallet { secret, address }
    }

    /// Parses a hex private key, with or without the `0x` prefix.
    pub fn from_hex_key(key: &str) -> Result<Self> {
        let key = key.trim().trim_start_matches("0x");
        let bytes = hex::decode(key).context("decode wallet private key")?;
        let secret = SecretKey::from_slice(&bytes).map_err(|err| anyhow!("invalid key: {err}"))?;
        Ok(Wallet::new(secret))
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Signs a legacy transaction with EIP-155 replay protection.
    pub fn sign_legacy_tx(&self, tx: &LegacyTx) -> Result<SignedTx> {
        let sighash = keccak(&rlp_encode(tx, None));
        let message = Message::from_digest_slice(&sighash).context("sighash into message")?;
        let signature = SECP256K1.sign_ecdsa_recoverable(&message, &self.secret);
        let (recovery_id, compact) = signature.serialize_compact();
        let v = tx.chain_id * 2 + 35 + recovery_id.to_i32() as u64;
        let r = &compact[..32];
        let s = &compact[32..];
        let raw = rlp_encode(tx, Some((v, r, s)));
        let tx_hash = B256::from_slice(&keccak(&raw));
        Ok(SignedTx { raw, tx_hash })
    }
}

/// Without a signature, encodes the EIP-155 signing payload
/// `[nonce, gas_price, gas, to, value, data, chain_id, 0, 0]`; with one,
/// the broadcast payload `[nonce, gas_price, gas, to, value, data, v, r, s]`.
fn rlp_encode(tx: &LegacyTx, signature: Option<(u64, &[u8], &[u8])>) -> Vec<u8> {
    let mut stream = rlp::RlpStream::new();
    stream.begin_list(9);
    stream.append(&tx.nonce);
    stream.append(&tx.gas_price.to_be_bytes_trimmed_vec());
    stream.append(&tx.gas);
    match tx.to {
        Some(addr) => stream.append(&addr.as_slice().to_vec()),
        None => stream.append_empty_data(),
    };
    stream.append(&tx.value.to_be_bytes_trimmed_vec());
    stream.append(&tx.data);
    match signature {
        None => {
            stream.append(&tx.chain_id);
            stream.append_empty_data();
            stream.append_empty_data();
        }
        Some((v, r, s)) => {
            stream.append(&v);
            stream.append(&trim_leading_zeroes(r).to_vec());
            stream.append(&trim_leading_zeroes(s).to_vec());
        }
    }
    stream.out().to_vec()
}

fn trim_leading_zeroes(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

fn keccak(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    // The well-known first dev-chain account.
    const DEV_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    #[test]
    fn derives_known_address() {
        let wallet = Wallet::from_hex_key(DEV_KEY).unwrap();
        assert_eq!(
            wallet.address(),
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"
                .parse::<Address>()
                .unwrap()
        );
    }

    #[test]
    fn signed_tx_has_eip155_v() {
        let wallet = Wallet::from_hex_key(DEV_KEY).unwrap();
        let tx = LegacyTx {
            nonce: 0,
            gas_price: U256::from(1_000_000_000u64),
            gas: 21_000,
            to: Some(Address::repeat_byte(0x11)),
            value: U256::from(1u64),
            data: vec![],
            chain_id: 1001,
        };
        let signed = wallet.sign_legacy_tx(&tx).unwrap();
        let decoded = rlp::Rlp::new(&signed.raw);
        assert_eq!(decoded.item_count().unwrap(), 9);
        let v: u64 = decoded.val_at(6).unwrap();
        assert!(v == 1001 * 2 + 35 || v == 1001 * 2 + 36);
    }

    #[test]
    fn contract_creation_encodes_empty_to() {
        let wallet = Wallet::from_hex_key(DEV_KEY).unwrap();
        let tx = LegacyTx {
            to: None,
            chain_id: 1,
            ..Default::default()
        };
        let signed = wallet.sign_legacy_tx(&tx).unwrap();
        let decoded = rlp::Rlp::new(&signed.raw);
        let to: Vec<u8> = decoded.val_at(3).unwrap();
        assert!(to.is_empty());
    }
}
