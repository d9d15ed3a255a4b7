//! # Signing Service
//!
//! The audit pipeline doesn't sign with a key, it signs through a
//! [`SigningService`]. In production that's [`Ed25519Signer`], backed by the
//! persisted [`AuditKeypair`]. In tests it can be anything, including a
//! service that fails on purpose so we can watch the pipeline degrade.
//!
//! Both operations are fallible. A signing backend may be an HSM, a remote
//! KMS or a file on disk, and any of those can be unavailable. The caller
//! decides what a failure means; for the ledger it means "store an empty
//! signature and carry on".

use thiserror::Error;
use tracing::info;

use super::keys::{AuditKeypair, AuditPublicKey, AuditSignature};
use crate::storage::keystore::{KeySlot, KeyStore, KeyStoreError};

/// Errors raised by a signing backend.
#[derive(Debug, Error)]
pub enum SigningError {
    /// The backend could not produce a signature.
    #[error("signing backend unavailable: {0}")]
    Unavailable(String),

    /// A persisted signing key could not be decoded.
    #[error("stored signing key is invalid")]
    InvalidStoredKey,

    /// The key store itself failed.
    #[error("key store error: {0}")]
    KeyStore(#[from] KeyStoreError),
}

/// Sign-and-verify capability over audit digests.
pub trait SigningService: Send + Sync {
    /// Sign `digest` and return the raw signature bytes.
    fn sign(&self, digest: &[u8]) -> Result<Vec<u8>, SigningError>;

    /// Check `signature` over `digest` with the service's public key.
    ///
    /// `Ok(false)` means "checked, and it doesn't match". `Err` means the
    /// check itself couldn't run.
    fn verify(&self, digest: &[u8], signature: &[u8]) -> Result<bool, SigningError>;
}

/// Ed25519 signing service over the process-held audit keypair.
#[derive(Debug, Clone)]
pub struct Ed25519Signer {
    keypair: AuditKeypair,
}

impl Ed25519Signer {
    /// Wrap an existing keypair.
    pub fn new(keypair: AuditKeypair) -> Self {
        Self { keypair }
    }

    /// Load the signing seed from `store`, or generate and persist a new one.
    ///
    /// A seed that is present but malformed is an error. Quietly replacing
    /// it would orphan every signature already on disk.
    pub fn load_or_generate(store: &dyn KeyStore) -> Result<Self, SigningError> {
        if let Some(bytes) = store.load(KeySlot::SigningKey)? {
            let keypair =
                AuditKeypair::from_bytes(&bytes).map_err(|_| SigningError::InvalidStoredKey)?;
            return Ok(Self::new(keypair));
        }

        let keypair = AuditKeypair::generate();
        store.save(KeySlot::SigningKey, &keypair.to_bytes())?;
        info!(public_key = %keypair.public_key(), "generated audit signing key");
        Ok(Self::new(keypair))
    }

    /// Public key for external verification of stored signatures.
    pub fn public_key(&self) -> AuditPublicKey {
        self.keypair.public_key()
    }
}

impl SigningService for Ed25519Signer {
    fn sign(&self, digest: &[u8]) -> Result<Vec<u8>, SigningError> {
        Ok(self.keypair.sign(digest).as_bytes().to_vec())
    }

    fn verify(&self, digest: &[u8], signature: &[u8]) -> Result<bool, SigningError> {
        let sig = AuditSignature::from_vec(signature.to_vec());
        Ok(self.keypair.verify(digest, &sig))
    }
}
