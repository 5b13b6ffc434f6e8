//! Transaction construction
//!
//! This module turns a [`BuildRequest`] into a signed, serialized transaction
//! for UTXO, token-UTXO, account-nonce and sequence-number ledgers.

pub mod types;
pub mod external;
pub mod provider;
pub mod mining;
pub mod builder;
pub mod bitcoin;
pub mod hathor;
pub mod ethereum;
pub mod stellar;
pub mod ripple;

pub use types::*;
pub use external::*;
pub use provider::*;
pub use mining::MiningPolicy;
pub use builder::{BuilderConfig, Collaborators, TransactionBuilder};
