//! Multi-ledger transaction construction
//!
//! Selects funding inputs under a fee that depends on the selected shape,
//! assembles protocol-specific transactions for Bitcoin, Hathor, Ethereum,
//! Celo, Stellar and the XRP ledger, and signs them locally. Every signature
//! is verified before the transaction is returned.

pub mod error;
pub mod protocol;
pub mod units;
pub mod crypto;
pub mod selection;
pub mod transaction;

// Re-export commonly used types for convenience
pub use error::{Error, Result};
pub use protocol::{Network, Protocol, ProtocolFamily};
pub use transaction::{
    BuildRequest, BuilderConfig, Collaborators, OutputRequest, SignedTransaction, SpendableOutput,
    TransactionBuilder, WalletKeys,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
