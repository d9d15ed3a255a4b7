//! # Audit Signing Keys
//!
//! Ed25519 keypair used by the audit pipeline to sign record digests.
//!
//! The ledger holds exactly one of these per process. It is loaded from the
//! key store at start-up (or generated and persisted on first run) and then
//! shared by reference with everything that needs to sign.
//!
//! ## Security considerations
//!
//! - Key generation pulls from `OsRng`.
//! - Secret key bytes are never logged and never appear in `Debug` output.
//! - The keypair deliberately does not implement `Serialize`. Persisting it
//!   is an explicit `to_bytes()` call, nothing else.

use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::config::{SIGNATURE_LENGTH, SIGNING_KEY_LENGTH};

/// Errors that can occur while decoding key or signature material.
///
/// Vague on purpose. Key-handling errors shouldn't describe the bytes they
/// choked on.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid secret key bytes: expected 32 bytes")]
    InvalidSecretKey,

    #[error("invalid public key bytes: not a valid Ed25519 point")]
    InvalidPublicKey,

    #[error("invalid signature encoding: expected 64 bytes of hex")]
    InvalidSignature,
}

/// The process-wide audit signing keypair.
///
/// # Examples
///
/// ```
/// use safepay_ledger::crypto::keys::AuditKeypair;
///
/// let kp = AuditKeypair::generate();
/// let digest = b"3f1a...";
/// let sig = kp.sign(digest);
/// assert!(kp.verify(digest, &sig));
/// ```
pub struct AuditKeypair {
    signing_key: SigningKey,
}

/// The public half of the audit keypair. Safe to publish so that third
/// parties can re-verify stored signatures.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditPublicKey {
    bytes: [u8; 32],
}

/// An Ed25519 signature over an audit digest. Always 64 bytes when produced
/// by [`AuditKeypair::sign`]; anything else simply fails verification.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditSignature {
    bytes: Vec<u8>,
}

impl AuditKeypair {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Construct a keypair deterministically from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Rebuild a keypair from persisted seed bytes.
    ///
    /// The slice has to be exactly [`SIGNING_KEY_LENGTH`] bytes; anything
    /// else is a corrupted key file.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let seed: [u8; SIGNING_KEY_LENGTH] =
            bytes.try_into().map_err(|_| KeyError::InvalidSecretKey)?;
        Ok(Self::from_seed(&seed))
    }

    /// Export the 32-byte seed. This is what the key store persists.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// The public half of this keypair.
    pub fn public_key(&self) -> AuditPublicKey {
        AuditPublicKey {
            bytes: self.signing_key.verifying_key().to_bytes(),
        }
    }

    /// Sign a message. Ed25519 is deterministic: same key, same message,
    /// same signature.
    pub fn sign(&self, message: &[u8]) -> AuditSignature {
        AuditSignature {
            bytes: self.signing_key.sign(message).to_bytes().to_vec(),
        }
    }

    /// Verify a signature against this keypair's public key.
    pub fn verify(&self, message: &[u8], signature: &AuditSignature) -> bool {
        self.public_key().verify(message, signature)
    }
}

impl Clone for AuditKeypair {
    fn clone(&self) -> Self {
        Self::from_seed(&self.signing_key.to_bytes())
    }
}

impl fmt::Debug for AuditKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Public half only. Never the seed, not even a prefix of it.
        write!(f, "AuditKeypair(pub={})", self.public_key().to_hex())
    }
}

// ---------------------------------------------------------------------------
// AuditPublicKey
// ---------------------------------------------------------------------------

impl AuditPublicKey {
    /// Parse and validate raw public key bytes.
    pub fn try_from_slice(slice: &[u8]) -> Result<Self, KeyError> {
        let bytes: [u8; 32] = slice.try_into().map_err(|_| KeyError::InvalidPublicKey)?;
        VerifyingKey::from_bytes(&bytes).map_err(|_| KeyError::InvalidPublicKey)?;
        Ok(Self { bytes })
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    /// Returns `true` iff `signature` is a valid signature over `message`.
    ///
    /// Malformed signatures and malformed keys both come back as `false`.
    pub fn verify(&self, message: &[u8], signature: &AuditSignature) -> bool {
        let Ok(verifying_key) = VerifyingKey::from_bytes(&self.bytes) else {
            return false;
        };
        let Some(sig) = signature.to_dalek_signature() else {
            return false;
        };
        verifying_key.verify(message, &sig).is_ok()
    }

    /// Hex-encoded representation (64 characters).
    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }
}

impl fmt::Display for AuditPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for AuditPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuditPublicKey({})", &self.to_hex()[..16])
    }
}

// ---------------------------------------------------------------------------
// AuditSignature
// ---------------------------------------------------------------------------

impl AuditSignature {
    /// Wrap raw signature bytes. Length is checked at verification time.
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Raw signature bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn to_dalek_signature(&self) -> Option<DalekSignature> {
        let arr: [u8; SIGNATURE_LENGTH] = self.bytes.as_slice().try_into().ok()?;
        Some(DalekSignature::from_bytes(&arr))
    }

    /// Hex-encoded signature (128 characters for a well-formed one).
    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    /// Parse a hex-encoded signature, insisting on exactly 64 bytes.
    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(s).map_err(|_| KeyError::InvalidSignature)?;
        if bytes.len() != SIGNATURE_LENGTH {
            return Err(KeyError::InvalidSignature);
        }
        Ok(Self { bytes })
    }
}

impl fmt::Debug for AuditSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex_str = self.to_hex();
        if hex_str.len() >= 128 {
            write!(f, "AuditSignature({}...{})", &hex_str[..8], &hex_str[120..])
        } else {
            write!(f, "AuditSignature({})", hex_str)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keypair_sign_verify_roundtrip() {
        let kp = AuditKeypair::generate();
        let sig = kp.sign(b"digest");
        assert!(kp.verify(b"digest", &sig));
        assert_eq!(sig.as_bytes().len(), SIGNATURE_LENGTH);
    }

    #[test]
    fn wrong_message_fails_verification() {
        let kp = AuditKeypair::generate();
        let sig = kp.sign(b"correct digest");
        assert!(!kp.verify(b"tampered digest", &sig));
    }

    #[test]
    fn wrong_key_fails_verification() {
        let kp1 = AuditKeypair::generate();
        let kp2 = AuditKeypair::generate();
        let sig = kp1.sign(b"digest");
        assert!(!kp2.verify(b"digest", &sig));
    }

    #[test]
    fn test_seed_roundtrip() {
        let kp = AuditKeypair::generate();
        let restored = AuditKeypair::from_bytes(&kp.to_bytes()).unwrap();
        assert_eq!(kp.public_key(), restored.public_key());
    }

    #[test]
    fn test_from_bytes_rejects_wrong_length() {
        assert!(AuditKeypair::from_bytes(&[0u8; 16]).is_err());
        assert!(AuditKeypair::from_bytes(&[0u8; 33]).is_err());
    }

    #[test]
    fn test_signature_hex_roundtrip() {
        let kp = AuditKeypair::generate();
        let sig = kp.sign(b"digest");
        let parsed = AuditSignature::from_hex(&sig.to_hex()).unwrap();
        assert_eq!(sig, parsed);
        assert!(AuditSignature::from_hex("abcd").is_err());
        assert!(AuditSignature::from_hex("zz").is_err());
    }

    #[test]
    fn test_truncated_signature_is_false_not_panic() {
        let kp = AuditKeypair::generate();
        let sig = kp.sign(b"digest");
        let short = AuditSignature::from_vec(sig.as_bytes()[..10].to_vec());
        assert!(!kp.verify(b"digest", &short));
    }

    #[test]
    fn test_public_key_validation() {
        let kp = AuditKeypair::generate();
        let pk = AuditPublicKey::try_from_slice(kp.public_key().as_bytes()).unwrap();
        assert_eq!(pk, kp.public_key());
        assert!(AuditPublicKey::try_from_slice(&[0u8; 8]).is_err());
    }

    #[test]
    fn debug_does_not_leak_secret() {
        let kp = AuditKeypair::generate();
        let debug_str = format!("{:?}", kp);
        assert!(debug_str.starts_with("AuditKeypair(pub="));
        assert!(!debug_str.contains(&hex::encode(kp.to_bytes())));
    }
}
