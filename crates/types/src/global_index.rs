use alloy_primitives::U256;

/// Decodes a 32-byte global index into `(mainnet_flag, rollup_index,
/// local_exit_root_index)`.
///
/// Layout, big endian: byte 23 is the mainnet flag, bytes 24..28 the rollup
/// index, bytes 28..32 the local exit root index. Bytes 0..23 are unused
/// and ignored; the bridge contract does not constrain them.
pub fn decode_global_index(global_index: U256) -> (bool, u32, u32) {
    let bytes = global_index.to_be_bytes::<32>();
    let mainnet_flag = bytes[23] == 1;
    let rollup_index = u32::from_be_bytes(bytes[24..28].try_into().expect("4 bytes"));
    let local_exit_root_index = u32::from_be_bytes(bytes[28..32].try_into().expect("4 bytes"));
    (mainnet_flag, rollup_index, local_exit_root_index)
}

/// Encodes `(mainnet_flag, rollup_index, local_exit_root_index)` into the
/// 32-byte global index. When the mainnet flag is set the rollup index is
/// zeroed, mirroring the on-chain encoder.
pub fn generate_global_index(
    mainnet_flag: bool,
    rollup_index: u32,
    local_exit_root_index: u32,
) -> U256 {
    let mut bytes = [0u8; 32];
    if mainnet_flag {
        bytes[23] = 1;
    } else {
        bytes[24..28].copy_from_slice(&rollup_index.to_be_bytes());
    }
    bytes[28..32].copy_from_slice(&local_exit_root_index.to_be_bytes());
    U256::from_be_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, Rng, SeedableRng};

    use super::*;

    #[test]
    fn round_trips_field_triples() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            let mainnet_flag: bool = rng.gen();
            let rollup_index: u32 = if mainnet_flag { 0 } else { rng.gen() };
            let local_index: u32 = rng.gen();
            let encoded = generate_global_index(mainnet_flag, rollup_index, local_index);
            assert_eq!(
                decode_global_index(encoded),
                (mainnet_flag, rollup_index, local_index)
            );
        }
    }

    #[test]
    fn round_trips_valid_encodings() {
        let mut rng = StdRng::seed_from_u64(8);
        for _ in 0..1000 {
            let mut bytes = [0u8; 32];
            bytes[23] = if rng.gen::<bool>() { 1 } else { 0 };
            rng.fill(&mut bytes[24..]);
            if bytes[23] == 1 {
                // the encoder zeroes the rollup index under the flag
                bytes[24..28].copy_from_slice(&[0, 0, 0, 0]);
            }
            let x = U256::from_be_bytes(bytes);
            let (flag, rollup, local) = decode_global_index(x);
            assert_eq!(generate_global_index(flag, rollup, local), x);
        }
    }

    #[test]
    fn unused_high_bytes_are_ignored() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0xff;
        bytes[28..32].copy_from_slice(&[0, 0, 0, 9]);
        let (flag, rollup, local) = decode_global_index(U256::from_be_bytes(bytes));
        assert!(!flag);
        assert_eq!(rollup, 0);
        assert_eq!(local, 9);
    }

    #[test]
    fn mainnet_flag_byte() {
        let x = generate_global_index(true, 0, 5);
        let bytes = x.to_be_bytes::<32>();
        assert_eq!(bytes[23], 1);
        assert_eq!(&bytes[28..], &[0, 0, 0, 5]);
    }
}
