//! Supported ledgers and their fixed unit systems

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::units;

/// Ledger family, which decides how funds are gathered and ordered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolFamily {
    /// Single-asset UTXO ledgers
    Utxo,
    /// UTXO ledgers with native multi-asset outputs and mining
    TokenUtxo,
    /// Account-balance ledgers with a per-account nonce
    Account,
    /// Ledgers with account sequence numbers and trustlines
    Sequence,
}

/// Supported protocols
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Bitcoin,
    Hathor,
    Ethereum,
    Celo,
    Stellar,
    Ripple,
}

impl Protocol {
    pub const ALL: [Protocol; 6] = [
        Protocol::Bitcoin,
        Protocol::Hathor,
        Protocol::Ethereum,
        Protocol::Celo,
        Protocol::Stellar,
        Protocol::Ripple,
    ];

    pub fn family(&self) -> ProtocolFamily {
        match self {
            Protocol::Bitcoin => ProtocolFamily::Utxo,
            Protocol::Hathor => ProtocolFamily::TokenUtxo,
            Protocol::Ethereum | Protocol::Celo => ProtocolFamily::Account,
            Protocol::Stellar | Protocol::Ripple => ProtocolFamily::Sequence,
        }
    }

    /// Number of decimal places between the display unit and the base unit
    pub fn decimals(&self) -> u32 {
        match self {
            Protocol::Bitcoin => 8,
            Protocol::Hathor => 2,
            Protocol::Ethereum | Protocol::Celo => 18,
            Protocol::Stellar => 7,
            Protocol::Ripple => 6,
        }
    }

    /// Name of the integer base unit
    pub fn base_unit(&self) -> &'static str {
        match self {
            Protocol::Bitcoin => "satoshi",
            Protocol::Hathor => "htr",
            Protocol::Ethereum | Protocol::Celo => "wei",
            Protocol::Stellar => "stroop",
            Protocol::Ripple => "drop",
        }
    }

    /// Ticker of the native asset
    pub fn native_symbol(&self) -> &'static str {
        match self {
            Protocol::Bitcoin => "BTC",
            Protocol::Hathor => "HTR",
            Protocol::Ethereum => "ETH",
            Protocol::Celo => "CELO",
            Protocol::Stellar => "XLM",
            Protocol::Ripple => "XRP",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Bitcoin => "bitcoin",
            Protocol::Hathor => "hathor",
            Protocol::Ethereum => "ethereum",
            Protocol::Celo => "celo",
            Protocol::Stellar => "stellar",
            Protocol::Ripple => "ripple",
        }
    }

    pub fn to_base_units(&self, amount: &str) -> Result<u128> {
        units::to_base_units(amount, self.decimals())
    }

    pub fn from_base_units(&self, value: u128) -> Result<String> {
        units::from_base_units(value, self.decimals())
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bitcoin" | "btc" => Ok(Protocol::Bitcoin),
            "hathor" | "htr" => Ok(Protocol::Hathor),
            "ethereum" | "eth" => Ok(Protocol::Ethereum),
            "celo" => Ok(Protocol::Celo),
            "stellar" | "xlm" => Ok(Protocol::Stellar),
            "ripple" | "xrp" => Ok(Protocol::Ripple),
            _ => Err(Error::UnsupportedProtocol(s.to_string())),
        }
    }
}

/// Test or production network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Mainnet,
    Testnet,
}

impl Network {
    pub fn is_mainnet(&self) -> bool {
        matches!(self, Network::Mainnet)
    }
}
