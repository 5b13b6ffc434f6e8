//! Key material parsing and address codecs

pub mod base58;
pub mod strkey;

use std::str::FromStr;

use secp256k1::SecretKey;

use crate::error::{Error, Result};

/// Parse a secp256k1 secret given as 32-byte hex or WIF
pub fn parse_secp256k1_secret(parameter: &str, private_key: &str) -> Result<SecretKey> {
    let trimmed = private_key.trim();
    let hex_part = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    if hex_part.len() == 64 {
        let bytes = hex::decode(hex_part)
            .map_err(|_| Error::invalid_parameter(parameter, "not a valid hex private key"))?;
        return SecretKey::from_slice(&bytes)
            .map_err(|_| Error::invalid_parameter(parameter, "not a valid secp256k1 private key"));
    }

    bitcoin::PrivateKey::from_str(trimmed)
        .map(|key| key.inner)
        .map_err(|_| Error::invalid_parameter(parameter, "expected a 32-byte hex or WIF private key"))
}

/// Decode hex with an optional `0x` prefix
pub fn decode_hex(parameter: &str, value: &str) -> Result<Vec<u8>> {
    let trimmed = value.trim();
    hex::decode(trimmed.strip_prefix("0x").unwrap_or(trimmed))
        .map_err(|e| Error::invalid_parameter(parameter, format!("invalid hex: {}", e)))
}

/// Decode a 32-byte identifier given as hex
pub fn decode_hash32(parameter: &str, value: &str) -> Result<[u8; 32]> {
    let bytes = decode_hex(parameter, value)?;
    bytes
        .try_into()
        .map_err(|_| Error::invalid_parameter(parameter, "expected 32 bytes"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_and_wif_secrets() {
        let hex_key = "0c28fca386c7a227600b2fe50b7cae11ec86d3bf1fbe471be89827e19d72aa1d";
        let wif = "5HueCGU8rMjxEXxiPuD5BDku4MkFqeZyd4dTmWTDHWbHb1bALvj";

        let from_hex = parse_secp256k1_secret("privateKey", hex_key).unwrap();
        let from_wif = parse_secp256k1_secret("privateKey", wif).unwrap();
        assert_eq!(from_hex, from_wif);
    }

    #[test]
    fn test_invalid_secret_does_not_echo_the_key() {
        let err = parse_secp256k1_secret("privateKey", "not-a-key-secret").unwrap_err();
        assert!(!err.to_string().contains("not-a-key-secret"));
    }
}
