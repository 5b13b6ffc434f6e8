//! Local signers that verify every signature they produce

use ed25519_dalek::{Signature as Ed25519Signature, Signer as _, SigningKey, Verifier as _};
use secp256k1::{ecdsa::Signature, All, Message, PublicKey, Secp256k1, SecretKey};

use crate::error::{Error, Result};
use crate::protocol::Protocol;

/// ECDSA over secp256k1
pub struct Secp256k1Signer {
    secp: Secp256k1<All>,
    secret: SecretKey,
    public: PublicKey,
}

impl Secp256k1Signer {
    pub fn new(secret: SecretKey) -> Self {
        let secp = Secp256k1::new();
        let public = PublicKey::from_secret_key(&secp, &secret);
        Self { secp, secret, public }
    }

    pub fn public_key(&self) -> PublicKey {
        self.public
    }

    /// Sign a 32-byte digest, returning a low-S signature
    pub fn sign_digest(&self, protocol: Protocol, digest: &[u8; 32]) -> Result<Signature> {
        let message = Message::from_digest(*digest);
        let signature = self.secp.sign_ecdsa(&message, &self.secret);
        self.secp
            .verify_ecdsa(&message, &signature, &self.public)
            .map_err(|e| Error::verification(protocol, e))?;
        Ok(signature)
    }

    /// DER-encoded signature over `digest`
    pub fn sign_digest_der(&self, protocol: Protocol, digest: &[u8; 32]) -> Result<Vec<u8>> {
        Ok(self.sign_digest(protocol, digest)?.serialize_der().to_vec())
    }
}

/// Ed25519
pub struct Ed25519Signer {
    key: SigningKey,
}

impl Ed25519Signer {
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            key: SigningKey::from_bytes(seed),
        }
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.key.verifying_key().to_bytes()
    }

    pub fn sign(&self, protocol: Protocol, message: &[u8]) -> Result<[u8; 64]> {
        let signature: Ed25519Signature = self.key.sign(message);
        self.key
            .verifying_key()
            .verify(message, &signature)
            .map_err(|e| Error::verification(protocol, e))?;
        Ok(signature.to_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secp256k1_signature_verifies() {
        let secret = SecretKey::from_slice(&[7u8; 32]).unwrap();
        let signer = Secp256k1Signer::new(secret);
        let digest = crate::crypto::hash::sha256(b"payload");

        let signature = signer.sign_digest(Protocol::Bitcoin, &digest).unwrap();
        let secp = Secp256k1::verification_only();
        secp.verify_ecdsa(&Message::from_digest(digest), &signature, &signer.public_key()).unwrap();

        let der = signer.sign_digest_der(Protocol::Bitcoin, &digest).unwrap();
        assert_eq!(der[0], 0x30);
    }

    #[test]
    fn test_ed25519_is_deterministic() {
        let signer = Ed25519Signer::from_seed(&[1u8; 32]);
        let a = signer.sign(Protocol::Stellar, b"message").unwrap();
        let b = signer.sign(Protocol::Stellar, b"message").unwrap();
        assert_eq!(a, b);
        assert_eq!(signer.public_key().len(), 32);
    }
}
