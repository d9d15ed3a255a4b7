//! # Ledger
//!
//! The part of the crate that moves money. [`Ledger`] owns nothing itself;
//! it is a bundle of capabilities handed in at construction:
//!
//! - an [`AccountStore`] for balances,
//! - a [`RecordStore`] for records, logs and notifications,
//! - the process's [`CryptoSuite`] (Paillier keypair, tokenizer, auditor),
//! - a [`FraudOracle`].
//!
//! Operations are synchronous and take `&self`; a `Ledger` can be shared
//! across threads behind an `Arc`. There is no in-process locking. The
//! transfer path is protected by per-account compare-and-set, the reversal
//! path is not (see [`reversal`]).
//!
//! ```text
//! transfer.rs        transfer / transfer_request / transfer_with_retry
//! reversal.rs        reverse
//! notifications.rs   reversal notices, listing, mark-read
//! types.rs           rows and results
//! ```

pub mod notifications;
pub mod reversal;
pub mod transfer;
pub mod types;

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::info;
use uuid::Uuid;

use crate::config::LedgerConfig;
use crate::crypto::paillier::Ciphertext;
use crate::crypto::CryptoSuite;
use crate::error::{LedgerError, LedgerResult};
use crate::fraud::FraudOracle;
use crate::money::to_minor_units;
use crate::storage::{AccountStore, RecordStore};

pub use types::{
    Account, EncryptedTotal, LogStatus, Notification, NotificationKind, ReversalOutcome,
    TransactionLog, TransactionRecord, TransferReceipt, TransferRequest,
};

/// The encrypted, reversible ledger.
#[derive(Clone)]
pub struct Ledger {
    accounts: Arc<dyn AccountStore>,
    records: Arc<dyn RecordStore>,
    crypto: Arc<CryptoSuite>,
    oracle: Arc<dyn FraudOracle>,
    config: LedgerConfig,
}

impl Ledger {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        records: Arc<dyn RecordStore>,
        crypto: Arc<CryptoSuite>,
        oracle: Arc<dyn FraudOracle>,
    ) -> Self {
        Self {
            accounts,
            records,
            crypto,
            oracle,
            config: LedgerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: LedgerConfig) -> Self {
        self.config = config.normalized();
        self
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn crypto(&self) -> &CryptoSuite {
        &self.crypto
    }

    // -- Accounts -----------------------------------------------------------

    /// Create `id` with `balance` unless it already exists. Returns whether
    /// the account was created.
    pub fn seed_account(&self, id: &str, balance: Decimal) -> LedgerResult<bool> {
        if id.trim().is_empty() {
            return Err(LedgerError::Validation("account id must not be empty".into()));
        }
        if balance.is_sign_negative() || to_minor_units(balance).is_none() {
            return Err(LedgerError::Validation(format!(
                "opening balance must be a non-negative amount in cents, got {balance}"
            )));
        }
        let created = self.accounts.create_account(id, balance)?;
        if created {
            info!(account = id, %balance, "seeded account");
        }
        Ok(created)
    }

    pub fn balance(&self, id: &str) -> LedgerResult<Decimal> {
        self.accounts
            .balance(id)?
            .ok_or_else(|| LedgerError::not_found("account", id))
    }

    pub fn accounts(&self) -> LedgerResult<Vec<Account>> {
        Ok(self.accounts.accounts()?)
    }

    // -- Queries ------------------------------------------------------------

    pub fn transaction(&self, id: Uuid) -> LedgerResult<TransactionRecord> {
        self.records
            .transaction(id)?
            .ok_or_else(|| LedgerError::not_found("transaction", id))
    }

    pub fn log(&self, id: Uuid) -> LedgerResult<TransactionLog> {
        self.records
            .log(id)?
            .ok_or_else(|| LedgerError::not_found("transaction log", id))
    }

    /// Most recent `limit` logs, newest first.
    pub fn logs(&self, limit: usize) -> LedgerResult<Vec<TransactionLog>> {
        Ok(self.records.logs(limit)?)
    }

    /// Transfers sent by `user_id`, found by searchable token.
    pub fn transactions_sent_by(&self, user_id: &str) -> LedgerResult<Vec<TransactionRecord>> {
        let token = self.crypto.tokenizer.token_for(user_id);
        Ok(self.records.transactions_by_sender_token(&token)?)
    }

    /// Transfers received by `user_id`, found by searchable token.
    pub fn transactions_received_by(&self, user_id: &str) -> LedgerResult<Vec<TransactionRecord>> {
        let token = self.crypto.tokenizer.token_for(user_id);
        Ok(self.records.transactions_by_receiver_token(&token)?)
    }

    // -- Aggregation --------------------------------------------------------

    /// Homomorphic sum of every amount `user_id` has sent.
    ///
    /// Runs entirely on ciphertexts. Records whose encryption degraded
    /// (empty placeholder) or whose ciphertext doesn't belong to this key
    /// are counted as skipped.
    pub fn encrypted_total_sent(&self, user_id: &str) -> LedgerResult<EncryptedTotal> {
        let public = self.crypto.paillier.public_key();
        let mut total = EncryptedTotal {
            ciphertext: Ciphertext::identity(),
            aggregated: 0,
            skipped: 0,
        };

        for record in self.transactions_sent_by(user_id)? {
            match record
                .ciphertext()
                .filter(|c| public.check_ciphertext(c).is_ok())
            {
                Some(c) => {
                    total.ciphertext = public.add_ciphertexts(&total.ciphertext, &c);
                    total.aggregated += 1;
                }
                None => total.skipped += 1,
            }
        }
        Ok(total)
    }

    /// Decrypt an aggregate into currency units.
    pub fn decrypt_total(&self, total: &EncryptedTotal) -> LedgerResult<Decimal> {
        Ok(self.crypto.paillier.decrypt_amount(&total.ciphertext)?)
    }

    // -- Tamper evidence ----------------------------------------------------

    /// Re-derive a stored record's hash and check its signature.
    pub fn verify_transaction(&self, id: Uuid) -> LedgerResult<bool> {
        let record = self.transaction(id)?;
        Ok(self
            .crypto
            .auditor
            .check(&record.audit_payload(), &record.audit))
    }

    /// Re-derive a stored log's hash and check its signature.
    pub fn verify_log(&self, id: Uuid) -> LedgerResult<bool> {
        let log = self.log(id)?;
        Ok(self.crypto.auditor.check(&log.audit_payload(), &log.audit))
    }
}
