//! Stellar StrKey: base32 of `version || key || crc16-xmodem`

use crate::error::{Error, Result};

/// `G...` account ids
pub const VERSION_ACCOUNT_ID: u8 = 6 << 3;
/// `S...` ed25519 secret seeds
pub const VERSION_SEED: u8 = 18 << 3;

const ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

fn crc16_xmodem(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for byte in data {
        crc ^= (*byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 { (crc << 1) ^ 0x1021 } else { crc << 1 };
        }
    }
    crc
}

fn base32_encode(data: &[u8]) -> String {
    let mut out = String::with_capacity((data.len() * 8 + 4) / 5);
    let mut buffer: u32 = 0;
    let mut bits = 0;
    for byte in data {
        buffer = (buffer << 8) | *byte as u32;
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(ALPHABET[((buffer >> bits) & 0x1f) as usize] as char);
        }
    }
    if bits > 0 {
        out.push(ALPHABET[((buffer << (5 - bits)) & 0x1f) as usize] as char);
    }
    out
}

fn base32_decode(text: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(text.len() * 5 / 8);
    let mut buffer: u32 = 0;
    let mut bits = 0;
    for c in text.bytes() {
        let value = ALPHABET.iter().position(|a| *a == c)? as u32;
        buffer = (buffer << 5) | value;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push((buffer >> bits) as u8);
        }
    }
    Some(out)
}

pub fn encode(version: u8, key: &[u8; 32]) -> String {
    let mut payload = Vec::with_capacity(35);
    payload.push(version);
    payload.extend_from_slice(key);
    let crc = crc16_xmodem(&payload);
    payload.extend_from_slice(&crc.to_le_bytes());
    base32_encode(&payload)
}

pub fn decode(parameter: &str, version: u8, text: &str) -> Result<[u8; 32]> {
    let invalid = |reason: &str| Error::invalid_parameter(parameter, reason.to_string());
    let text = text.trim();
    if text.len() != 56 {
        return Err(invalid("strkey must be 56 characters"));
    }
    let bytes = base32_decode(text).ok_or_else(|| invalid("strkey is not base32"))?;
    if bytes.len() != 35 || bytes[0] != version {
        return Err(invalid("unexpected strkey version"));
    }
    let crc = crc16_xmodem(&bytes[..33]);
    if bytes[33..] != crc.to_le_bytes() {
        return Err(invalid("strkey checksum mismatch"));
    }
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes[1..33]);
    Ok(key)
}
