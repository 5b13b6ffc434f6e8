//! Cryptographic primitives
//!
//! Key parsing, address codecs, digests and the signers used by the
//! transaction builders. Key derivation happens outside this crate.

pub mod hash;
pub mod keys;
pub mod signer;

pub use signer::*;
