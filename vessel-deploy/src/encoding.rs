//! Hex helpers shared by the deployment and validation flows.
//!
//! The bridge portal stores peers as `bytes32`, while the rest of the system deals
//! in 20-byte addresses. These helpers convert between the two representations
//! without losing or inventing bytes.

use ethers::types::{Address, H256};

use crate::error::{DeployError, Result};

/// Prefix `hex` with `0x` unless it already has one.
pub fn maybe_add_0x_prefix(hex: &str) -> String {
    if hex.starts_with("0x") {
        hex.to_string()
    } else {
        format!("0x{hex}")
    }
}

/// Strip a leading `0x` if present.
pub fn maybe_remove_0x_prefix(hex: &str) -> &str {
    hex.strip_prefix("0x").unwrap_or(hex)
}

/// Parse a 20-byte hex address, with or without `0x`.
pub fn parse_address(address_hex: &str) -> Result<Address> {
    let hex = maybe_remove_0x_prefix(address_hex);
    if hex.len() != 40 {
        return Err(DeployError::InvalidAddress(address_hex.to_string()));
    }
    let bytes = hex::decode(hex).map_err(|_| DeployError::InvalidAddress(address_hex.to_string()))?;
    Ok(Address::from_slice(&bytes))
}

/// Left-pad an address to a 32-byte word.
pub fn address_to_bytes32(address: Address) -> H256 {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address.as_bytes());
    H256::from(word)
}

/// Take the low 20 bytes of a word. The upper 12 bytes must be zero.
pub fn bytes32_to_address(word: H256) -> Result<Address> {
    let (padding, address) = word.as_bytes().split_at(12);
    if padding.iter().any(|b| *b != 0) {
        return Err(DeployError::InvalidBytes32(format!("{word:?}")));
    }
    Ok(Address::from_slice(address))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_prefix_helpers() {
        assert_eq!(maybe_add_0x_prefix("abcd"), "0xabcd");
        assert_eq!(maybe_add_0x_prefix("0xabcd"), "0xabcd");
        assert_eq!(maybe_remove_0x_prefix("0xabcd"), "abcd");
        assert_eq!(maybe_remove_0x_prefix("abcd"), "abcd");
    }

    #[test]
    fn test_address_to_bytes32_pads_left() {
        let address = parse_address("0x570b2C710445091C95a2859cE282D16D4Cf1A257").unwrap();
        let word = address_to_bytes32(address);
        assert_eq!(
            format!("{word:?}"),
            "0x000000000000000000000000570b2c710445091c95a2859ce282d16d4cf1a257"
        );
    }

    #[test]
    fn test_malformed_addresses_rejected() {
        assert!(matches!(
            parse_address("0x1234"),
            Err(DeployError::InvalidAddress(_))
        ));
        assert!(matches!(
            parse_address("0xzz0b2C710445091C95a2859cE282D16D4Cf1A257"),
            Err(DeployError::InvalidAddress(_))
        ));
        assert!(parse_address("570b2C710445091C95a2859cE282D16D4Cf1A257").is_ok());
    }

    #[test]
    fn test_dirty_padding_rejected() {
        let mut bytes = address_to_bytes32(Address::repeat_byte(0x42)).to_fixed_bytes();
        bytes[0] = 0x01;
        assert!(matches!(
            bytes32_to_address(H256::from(bytes)),
            Err(DeployError::InvalidBytes32(_))
        ));
        assert_eq!(bytes32_to_address(H256::zero()).unwrap(), Address::zero());
    }

    proptest! {
        #[test]
        fn prop_bytes32_address_roundtrip(bytes in proptest::array::uniform20(any::<u8>())) {
            let address = Address::from(bytes);
            let word = address_to_bytes32(address);
            prop_assert_eq!(&word.as_bytes()[..12], &[0u8; 12]);
            prop_assert_eq!(bytes32_to_address(word).unwrap(), address);
        }

        #[test]
        fn prop_wrong_length_rejected(len in 0usize..80) {
            prop_assume!(len != 40);
            let address = "a".repeat(len);
            prop_assert!(parse_address(&address).is_err());
        }
    }
}
