//! Error taxonomy for ledger operations.
//!
//! Business and validation failures come back as typed [`LedgerError`]s.
//! Crypto-step failures during a mutation are *not* errors: they are
//! recorded as [`CryptoDegraded`](crate::audit::CryptoDegraded) values on
//! the row they affected, and the mutation goes ahead.

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::crypto::paillier::PaillierError;
use crate::storage::StoreError;

#[derive(Debug, Error)]
pub enum LedgerError {
    /// Malformed request: self-transfer, non-positive or sub-cent amount,
    /// empty id.
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds { balance: Decimal, requested: Decimal },

    /// A compare-and-set on `account` lost to a concurrent writer. Nothing
    /// was left half-applied; the request can be retried as-is.
    #[error("concurrent update on account {account}, please retry")]
    ConcurrentUpdate { account: String },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("transaction log {0} has already been reversed")]
    AlreadyUndone(Uuid),

    #[error("transaction log {0} cannot be reversed")]
    Irreversible(Uuid),

    #[error("reversal would leave {account} with a negative balance ({balance})")]
    NegativeBalance { account: String, balance: Decimal },

    /// A half-applied transfer or reversal could not be moved back: the
    /// compensating adjustment kept losing to concurrent writers or would
    /// have overdrawn the account. Needs an operator.
    #[error("failed to apply compensating {amount} to {account}")]
    CompensationFailed { account: String, amount: Decimal },

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("crypto error: {0}")]
    Crypto(#[from] PaillierError),
}

impl LedgerError {
    /// Only lost CAS races are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::ConcurrentUpdate { .. })
    }

    pub(crate) fn not_found(kind: &'static str, id: impl ToString) -> Self {
        LedgerError::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
