//! Base58Check addresses over a 20-byte public key hash

use bs58::Alphabet;

use crate::crypto::hash::hash160;
use crate::error::{Error, Result};

/// Hathor address version bytes
pub const HATHOR_P2PKH_MAINNET: u8 = 0x28;
pub const HATHOR_P2PKH_TESTNET: u8 = 0x49;
pub const HATHOR_P2SH_MAINNET: u8 = 0x64;
pub const HATHOR_P2SH_TESTNET: u8 = 0x87;

/// XRP ledger account id version byte
pub const RIPPLE_ACCOUNT_ID: u8 = 0x00;

/// Encode `version || payload || checksum`
pub fn encode_check(version: u8, payload: &[u8], alphabet: &Alphabet) -> String {
    bs58::encode(payload)
        .with_alphabet(alphabet)
        .with_check_version(version)
        .into_string()
}

/// Decode and verify the checksum, returning the version byte and payload
pub fn decode_check(parameter: &str, address: &str, alphabet: &Alphabet) -> Result<(u8, Vec<u8>)> {
    let bytes = bs58::decode(address.trim())
        .with_alphabet(alphabet)
        .with_check(None)
        .into_vec()
        .map_err(|e| Error::invalid_parameter(parameter, format!("invalid address '{}': {}", address, e)))?;
    match bytes.split_first() {
        Some((version, payload)) if payload.len() == 20 => Ok((*version, payload.to_vec())),
        _ => Err(Error::invalid_parameter(parameter, format!("invalid address length '{}'", address))),
    }
}

/// Address of a public key: `version || hash160(pubkey)`
pub fn public_key_to_address(public_key: &[u8], version: u8, alphabet: &Alphabet) -> String {
    encode_check(version, &hash160(public_key), alphabet)
}
