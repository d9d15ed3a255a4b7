//! # Audit Pipeline
//!
//! Every row the ledger writes (transaction records, log entries,
//! notifications) carries tamper evidence produced here:
//!
//! ```text
//! payload ──canonical JSON──► bytes ──SHA-256──► hash (hex)
//!                                                  │
//!                                     SigningService::sign
//!                                                  │
//!                                 signature ──verify──► verified: bool
//! ```
//!
//! The pipeline never fails the caller. Each step that can't run degrades
//! its own field (empty string or `false`) and is reported as a
//! [`CryptoDegraded`] entry. Steps that depend on a failed step are skipped
//! and reported too, so a reader of the stored record can tell exactly how
//! much evidence it carries.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::crypto::hash::{canonical_json, sha256_hex};
use crate::crypto::signatures::SigningService;

/// The audit columns stored alongside a row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditFields {
    /// Hex SHA-256 of the canonical payload. Empty if hashing degraded.
    pub hash: String,
    /// Hex Ed25519 signature over `hash`. Empty if signing degraded.
    pub signature_hex: String,
    /// Whether the signature verified right after signing.
    pub verified: bool,
}

/// Which crypto step degraded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStep {
    Canonicalize,
    Hash,
    Sign,
    Verify,
    Encrypt,
}

impl fmt::Display for AuditStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuditStep::Canonicalize => "canonicalize",
            AuditStep::Hash => "hash",
            AuditStep::Sign => "sign",
            AuditStep::Verify => "verify",
            AuditStep::Encrypt => "encrypt",
        };
        f.write_str(s)
    }
}

/// A crypto step that didn't complete. A value, not an error: it travels
/// with the row it degraded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptoDegraded {
    pub step: AuditStep,
    pub reason: String,
}

impl CryptoDegraded {
    pub fn new(step: AuditStep, reason: impl Into<String>) -> Self {
        let degraded = Self {
            step,
            reason: reason.into(),
        };
        warn!(step = %degraded.step, reason = %degraded.reason, "crypto step degraded");
        degraded
    }

    fn skipped(step: AuditStep, after: AuditStep) -> Self {
        Self::new(step, format!("skipped: {after} degraded"))
    }
}

/// Result of running the pipeline over one payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditOutcome {
    pub fields: AuditFields,
    pub degraded: Vec<CryptoDegraded>,
}

impl AuditOutcome {
    /// `true` when every step ran and the signature verified.
    pub fn is_complete(&self) -> bool {
        self.degraded.is_empty() && self.fields.verified
    }
}

/// Canonicalize, hash, sign, verify.
#[derive(Clone)]
pub struct AuditPipeline {
    signer: Arc<dyn SigningService>,
}

impl fmt::Debug for AuditPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuditPipeline(..)")
    }
}

impl AuditPipeline {
    pub fn new(signer: Arc<dyn SigningService>) -> Self {
        Self { signer }
    }

    /// Hex SHA-256 of the canonical form of `payload`.
    pub fn digest<T: Serialize + ?Sized>(payload: &T) -> Result<String, serde_json::Error> {
        Ok(sha256_hex(&canonical_json(payload)?))
    }

    /// Run the full pipeline over `payload`.
    pub fn stamp<T: Serialize + ?Sized>(&self, payload: &T) -> AuditOutcome {
        let mut outcome = AuditOutcome::default();

        let hash = match Self::digest(payload) {
            Ok(hash) => hash,
            Err(e) => {
                outcome
                    .degraded
                    .push(CryptoDegraded::new(AuditStep::Canonicalize, e.to_string()));
                for step in [AuditStep::Hash, AuditStep::Sign, AuditStep::Verify] {
                    outcome
                        .degraded
                        .push(CryptoDegraded::skipped(step, AuditStep::Canonicalize));
                }
                return outcome;
            }
        };
        outcome.fields.hash = hash;

        let signature = match self.signer.sign(outcome.fields.hash.as_bytes()) {
            Ok(signature) => signature,
            Err(e) => {
                outcome
                    .degraded
                    .push(CryptoDegraded::new(AuditStep::Sign, e.to_string()));
                outcome
                    .degraded
                    .push(CryptoDegraded::skipped(AuditStep::Verify, AuditStep::Sign));
                return outcome;
            }
        };
        outcome.fields.signature_hex = hex::encode(&signature);

        match self.signer.verify(outcome.fields.hash.as_bytes(), &signature) {
            Ok(true) => outcome.fields.verified = true,
            Ok(false) => outcome.degraded.push(CryptoDegraded::new(
                AuditStep::Verify,
                "signature did not verify",
            )),
            Err(e) => outcome
                .degraded
                .push(CryptoDegraded::new(AuditStep::Verify, e.to_string())),
        }

        outcome
    }

    /// Re-derive the evidence for `payload` and check it against stored
    /// `fields`. `false` on any mismatch, missing field, or verifier error.
    pub fn check<T: Serialize + ?Sized>(&self, payload: &T, fields: &AuditFields) -> bool {
        if fields.hash.is_empty() || fields.signature_hex.is_empty() {
            return false;
        }
        let Ok(hash) = Self::digest(payload) else {
            return false;
        };
        if hash != fields.hash {
            return false;
        }
        let Ok(signature) = hex::decode(&fields.signature_hex) else {
            return false;
        };
        self.signer
            .verify(hash.as_bytes(), &signature)
            .unwrap_or(false)
    }
}
