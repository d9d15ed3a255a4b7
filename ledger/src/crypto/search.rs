//! # Searchable Tokens
//!
//! Deterministic keyed tokens over account ids. The same id always maps to
//! the same 64-character hex token, so records can be indexed and looked up
//! by token without the index ever holding a plaintext id. Without the key,
//! a token says nothing about the id behind it.
//!
//! The key is 256 bits from the OS RNG, generated once and persisted in the
//! [`KeyStore`]. Rotating it would orphan every token already on disk, so
//! nothing in this crate ever does.

use std::fmt;

use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;
use tracing::info;

use super::hash::keyed_hash;
use crate::config::{SEARCH_KEY_LENGTH, TOKEN_HEX_LENGTH};
use crate::storage::keystore::{KeySlot, KeyStore, KeyStoreError};

#[derive(Debug, Error)]
pub enum TokenizerError {
    #[error("stored search key is invalid: expected 32 bytes, found {0}")]
    InvalidStoredKey(usize),

    #[error("key store error: {0}")]
    KeyStore(#[from] KeyStoreError),
}

/// Keyed BLAKE3 tokenizer.
#[derive(Clone)]
pub struct SearchTokenizer {
    key: [u8; SEARCH_KEY_LENGTH],
}

impl SearchTokenizer {
    pub fn new(key: [u8; SEARCH_KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Fresh random key. Not persisted.
    pub fn generate() -> Self {
        let mut key = [0u8; SEARCH_KEY_LENGTH];
        OsRng.fill_bytes(&mut key);
        Self { key }
    }

    /// Load the persisted key, or generate and persist one on first run.
    pub fn load_or_generate(store: &dyn KeyStore) -> Result<Self, TokenizerError> {
        if let Some(bytes) = store.load(KeySlot::SearchKey)? {
            let key: [u8; SEARCH_KEY_LENGTH] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| TokenizerError::InvalidStoredKey(bytes.len()))?;
            return Ok(Self::new(key));
        }

        let tokenizer = Self::generate();
        store.save(KeySlot::SearchKey, &tokenizer.key)?;
        info!("generated searchable-token key");
        Ok(tokenizer)
    }

    /// Token for `value`: hex of keyed BLAKE3 over its UTF-8 bytes.
    pub fn token_for(&self, value: &str) -> String {
        keyed_hash(&self.key, value.as_bytes()).to_hex().to_string()
    }

    /// Recompute the token for `value` and compare it to `token` in
    /// constant time. Malformed tokens are simply `false`.
    pub fn verify_token(&self, value: &str, token: &str) -> bool {
        if token.len() != TOKEN_HEX_LENGTH {
            return false;
        }
        match blake3::Hash::from_hex(token) {
            // `blake3::Hash` equality is constant-time.
            Ok(expected) => keyed_hash(&self.key, value.as_bytes()) == expected,
            Err(_) => false,
        }
    }
}

impl fmt::Debug for SearchTokenizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SearchTokenizer(..)")
    }
}
