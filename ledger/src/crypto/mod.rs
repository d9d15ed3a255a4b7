//! # Cryptographic Primitives for SafePay
//!
//! Everything the ledger does to keep amounts private and records honest
//! flows through here:
//!
//! - **Paillier** for amounts. Additively homomorphic, so encrypted amounts
//!   can be summed without ever being decrypted. Built on `num-bigint`.
//! - **Keyed BLAKE3** for searchable tokens over account ids.
//! - **SHA-256** for audit digests.
//! - **Ed25519** for signing those digests.
//!
//! [`CryptoSuite`] bundles the three keyed components. It is built once at
//! start-up from a [`KeyStore`](crate::storage::KeyStore) and then shared by
//! `Arc` with the ledger. Nothing here is a global.

pub mod hash;
pub mod keys;
pub mod paillier;
pub mod prime;
pub mod search;
pub mod signatures;

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::audit::AuditPipeline;
use crate::config::LedgerConfig;
use crate::storage::keystore::KeyStore;

pub use hash::{blake3_hash, canonical_json, sha256, sha256_hex};
pub use keys::{AuditKeypair, AuditPublicKey, AuditSignature};
pub use paillier::{Ciphertext, PaillierError, PaillierKeypair, PaillierPublicKey};
pub use search::{SearchTokenizer, TokenizerError};
pub use signatures::{Ed25519Signer, SigningError, SigningService};

/// Failure to bring up one of the keyed components.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("paillier: {0}")]
    Paillier(#[from] PaillierError),

    #[error("search tokenizer: {0}")]
    Tokenizer(#[from] TokenizerError),

    #[error("audit signer: {0}")]
    Signing(#[from] SigningError),
}

/// The process's keyed crypto components.
#[derive(Debug, Clone)]
pub struct CryptoSuite {
    pub paillier: PaillierKeypair,
    pub tokenizer: SearchTokenizer,
    pub auditor: AuditPipeline,
}

impl CryptoSuite {
    pub fn new(
        paillier: PaillierKeypair,
        tokenizer: SearchTokenizer,
        auditor: AuditPipeline,
    ) -> Self {
        Self {
            paillier,
            tokenizer,
            auditor,
        }
    }

    /// Load every key from `store`, generating (and persisting) whatever is
    /// missing. Present-but-corrupt keys are errors, never regenerated.
    pub fn load_or_generate(
        store: &dyn KeyStore,
        config: &LedgerConfig,
    ) -> Result<Self, CryptoError> {
        let config = config.clone().normalized();
        let paillier = PaillierKeypair::generate_or_load(
            store,
            config.paillier_key_bits,
            config.miller_rabin_rounds,
        )?;
        let tokenizer = SearchTokenizer::load_or_generate(store)?;
        let signer = Ed25519Signer::load_or_generate(store)?;

        info!(
            paillier_bits = paillier.public_key().bits(),
            audit_key = %signer.public_key(),
            "crypto suite ready"
        );
        Ok(Self::new(paillier, tokenizer, AuditPipeline::new(Arc::new(signer))))
    }
}
