//! # Storage Module
//!
//! The ledger talks to storage through two capabilities, plus the key store:
//!
//! - [`AccountStore`]: balances, with compare-and-set as the only guarded
//!   write.
//! - [`RecordStore`]: transaction records, logs and notifications.
//! - [`KeyStore`]: long-lived key material.
//!
//! ## Backends
//!
//! ```text
//! db.rs        LedgerDb: sled, one named tree per row type plus indexes
//! memory.rs    MemoryStore: DashMap balances, RwLock'd record maps
//! keystore.rs  KeyStore trait, FileKeyStore, MemoryKeyStore
//! ```
//!
//! ## Balances are cents
//!
//! Both backends keep balances as `i64` minor units. A byte-wise CAS on a
//! big-endian `i64` is exact; a byte-wise CAS on a formatted decimal is
//! not (`10.5` and `10.50` are the same money and different bytes). The
//! trait speaks `Decimal` and converts at the boundary.

pub mod db;
pub mod keystore;
pub mod memory;

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::ledger::types::{Account, Notification, TransactionLog, TransactionRecord};
use crate::money::to_minor_units;

pub use db::LedgerDb;
pub use keystore::{FileKeyStore, KeySlot, KeyStore, KeyStoreError, MemoryKeyStore};
pub use memory::MemoryStore;

/// Errors raised by a storage backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    /// A balance that isn't a whole number of cents, or doesn't fit.
    #[error("balance not representable in cents: {0}")]
    InvalidBalance(Decimal),

    /// An update targeted a row that doesn't exist.
    #[error("{kind} not found: {id}")]
    Missing { kind: &'static str, id: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

pub(crate) fn cents(balance: Decimal) -> StoreResult<i64> {
    to_minor_units(balance).ok_or(StoreError::InvalidBalance(balance))
}

/// Account balances.
pub trait AccountStore: Send + Sync {
    /// Current balance, or `None` for an unknown account.
    fn balance(&self, id: &str) -> StoreResult<Option<Decimal>>;

    /// Set `id` to `new` only if it currently holds `expected`.
    ///
    /// `Ok(false)` when the stored balance differs or the account is gone.
    fn compare_and_set_balance(
        &self,
        id: &str,
        expected: Decimal,
        new: Decimal,
    ) -> StoreResult<bool>;

    /// Unconditional write. Reversal is the only caller.
    fn put_balance(&self, id: &str, new: Decimal) -> StoreResult<()>;

    /// Create `id` with `balance` if it doesn't exist. `Ok(false)` if it did.
    fn create_account(&self, id: &str, balance: Decimal) -> StoreResult<bool>;

    /// Every account, ordered by id.
    fn accounts(&self) -> StoreResult<Vec<Account>>;
}

/// Transaction records, logs and notifications.
///
/// List operations return newest first. Multi-row writes land as one unit:
/// either every row is visible afterwards or none is.
pub trait RecordStore: Send + Sync {
    /// Persist a committed transfer's record and log together.
    fn insert_transfer(
        &self,
        record: &TransactionRecord,
        log: &TransactionLog,
    ) -> StoreResult<()>;

    fn transaction(&self, id: Uuid) -> StoreResult<Option<TransactionRecord>>;

    /// Records whose `sender_token` equals `token`.
    fn transactions_by_sender_token(&self, token: &str) -> StoreResult<Vec<TransactionRecord>>;

    /// Records whose `receiver_token` equals `token`.
    fn transactions_by_receiver_token(&self, token: &str) -> StoreResult<Vec<TransactionRecord>>;

    fn log(&self, id: Uuid) -> StoreResult<Option<TransactionLog>>;

    /// Replace an existing log. `Missing` if it was never inserted.
    fn update_log(&self, log: &TransactionLog) -> StoreResult<()>;

    /// Replace the stored log with `closed` only while the stored copy is
    /// still reversible. `Ok(false)` if someone closed it first, `Missing`
    /// if it was never inserted.
    fn close_log(&self, closed: &TransactionLog) -> StoreResult<bool>;

    /// Up to `limit` logs, newest first.
    fn logs(&self, limit: usize) -> StoreResult<Vec<TransactionLog>>;

    fn insert_notifications(&self, notifications: &[Notification]) -> StoreResult<()>;

    fn notification(&self, id: Uuid) -> StoreResult<Option<Notification>>;

    /// Replace an existing notification. `Missing` if it was never inserted.
    fn update_notification(&self, notification: &Notification) -> StoreResult<()>;

    /// Every notification addressed to `user_id`, newest first.
    fn notifications_for(&self, user_id: &str) -> StoreResult<Vec<Notification>>;
}
