//! # LedgerDb: Persistent Storage Engine
//!
//! The on-disk backend, built on sled's embedded key-value store. One
//! handle implements [`AccountStore`], [`RecordStore`] and [`KeyStore`].
//!
//! ## Tree Layout
//!
//! | Tree                 | Key                                   | Value                      |
//! |----------------------|---------------------------------------|----------------------------|
//! | `accounts`           | account id (UTF-8)                    | balance in cents (8B BE)   |
//! | `transactions`       | record id (16B)                       | `bincode(TransactionRecord)` |
//! | `sender_index`       | sender token ++ order key             | record id                  |
//! | `receiver_index`     | receiver token ++ order key           | record id                  |
//! | `logs`               | log id (16B)                          | `bincode(TransactionLog)`  |
//! | `log_order`          | order key                             | log id                     |
//! | `notifications`      | notification id (16B)                 | `bincode(Notification)`    |
//! | `user_notifications` | len-prefixed user id ++ order key     | notification id            |
//! | `keys`               | key file name (UTF-8)                 | raw key bytes              |
//!
//! An *order key* is a sign-flipped big-endian microsecond timestamp
//! followed by the row id, so sled's lexicographic ordering is creation
//! order and a reverse scan is "newest first".
//!
//! ## Compare-and-set
//!
//! Balance CAS maps directly onto `Tree::compare_and_swap`. sled performs
//! it atomically against concurrent writers in this process, which is
//! exactly the guarantee the transfer protocol needs. Closing a log for
//! reversal is the same trick on the `logs` tree.
//!
//! ## Multi-tree writes
//!
//! A transfer touches five trees and a reversal's notices touch two. Each
//! runs as one sled transaction, so a failed write leaves no half-indexed
//! rows behind.

use std::path::Path;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, IVec, Transactional, Tree};
use tracing::debug;
use uuid::Uuid;

use super::keystore::{KeySlot, KeyStore, KeyStoreError};
use super::{cents, AccountStore, RecordStore, StoreError, StoreResult};
use crate::ledger::types::{Account, Notification, TransactionLog, TransactionRecord};
use crate::money::from_minor_units;

// ---------------------------------------------------------------------------
// Key encoding
// ---------------------------------------------------------------------------

fn order_key(at: &DateTime<Utc>, id: &Uuid) -> Vec<u8> {
    let micros = (at.timestamp_micros() as u64) ^ (1 << 63);
    let mut key = Vec::with_capacity(24);
    key.extend_from_slice(&micros.to_be_bytes());
    key.extend_from_slice(id.as_bytes());
    key
}

fn token_key(token: &str, at: &DateTime<Utc>, id: &Uuid) -> Vec<u8> {
    let mut key = token.as_bytes().to_vec();
    key.extend_from_slice(&order_key(at, id));
    key
}

/// User ids are arbitrary strings, so the prefix carries its own length to
/// keep `alice` from matching `alice2`.
fn user_prefix(user_id: &str) -> Vec<u8> {
    let mut key = (user_id.len() as u32).to_be_bytes().to_vec();
    key.extend_from_slice(user_id.as_bytes());
    key
}

fn encode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode_cents(bytes: &[u8]) -> StoreResult<Decimal> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StoreError::Serialization("invalid balance bytes".to_string()))?;
    Ok(from_minor_units(i64::from_be_bytes(raw)))
}

fn decode_id(bytes: &[u8]) -> StoreResult<Uuid> {
    Uuid::from_slice(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn missing_log(id: &Uuid) -> StoreError {
    StoreError::Missing {
        kind: "transaction log",
        id: id.to_string(),
    }
}

impl From<TransactionError<StoreError>> for StoreError {
    fn from(err: TransactionError<StoreError>) -> Self {
        match err {
            TransactionError::Abort(e) => e,
            TransactionError::Storage(e) => StoreError::Sled(e),
        }
    }
}

type TxResult = Result<(), ConflictableTransactionError<StoreError>>;

// ---------------------------------------------------------------------------
// LedgerDb
// ---------------------------------------------------------------------------

/// Persistent storage for accounts, ledger rows and keys.
///
/// Cheap to clone; clones share the same underlying sled handle.
#[derive(Debug, Clone)]
pub struct LedgerDb {
    db: Db,
    accounts: Tree,
    transactions: Tree,
    sender_index: Tree,
    receiver_index: Tree,
    logs: Tree,
    log_order: Tree,
    notifications: Tree,
    user_notifications: Tree,
    keys: Tree,
}

impl LedgerDb {
    /// Open or create a database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// A database that lives in a temporary directory and disappears when
    /// the last handle is dropped. For tests.
    pub fn open_temporary() -> StoreResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> StoreResult<Self> {
        Ok(Self {
            accounts: db.open_tree("accounts")?,
            transactions: db.open_tree("transactions")?,
            sender_index: db.open_tree("sender_index")?,
            receiver_index: db.open_tree("receiver_index")?,
            logs: db.open_tree("logs")?,
            log_order: db.open_tree("log_order")?,
            notifications: db.open_tree("notifications")?,
            user_notifications: db.open_tree("user_notifications")?,
            keys: db.open_tree("keys")?,
            db,
        })
    }

    /// Block until every pending write is durable.
    pub fn flush(&self) -> StoreResult<()> {
        self.db.flush()?;
        Ok(())
    }

    fn get_row<T: DeserializeOwned>(tree: &Tree, id: &Uuid) -> StoreResult<Option<T>> {
        match tree.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Resolve index values (row ids) newest first.
    fn resolve_newest_first<T, I>(tree: &Tree, index: I, limit: usize) -> StoreResult<Vec<T>>
    where
        T: DeserializeOwned,
        I: DoubleEndedIterator<Item = sled::Result<(IVec, IVec)>>,
    {
        let mut rows = Vec::new();
        for entry in index.rev().take(limit) {
            let (_, id) = entry?;
            if let Some(row) = Self::get_row(tree, &decode_id(&id)?)? {
                rows.push(row);
            }
        }
        Ok(rows)
    }
}

impl AccountStore for LedgerDb {
    fn balance(&self, id: &str) -> StoreResult<Option<Decimal>> {
        self.accounts
            .get(id.as_bytes())?
            .map(|bytes| decode_cents(&bytes))
            .transpose()
    }

    fn compare_and_set_balance(
        &self,
        id: &str,
        expected: Decimal,
        new: Decimal,
    ) -> StoreResult<bool> {
        let expected = cents(expected)?.to_be_bytes();
        let new = cents(new)?.to_be_bytes();
        let swapped = self
            .accounts
            .compare_and_swap(id.as_bytes(), Some(&expected[..]), Some(&new[..]))?;
        if swapped.is_err() {
            debug!(account = id, "balance CAS missed");
        }
        Ok(swapped.is_ok())
    }

    fn put_balance(&self, id: &str, new: Decimal) -> StoreResult<()> {
        self.accounts
            .insert(id.as_bytes(), &cents(new)?.to_be_bytes()[..])?;
        Ok(())
    }

    fn create_account(&self, id: &str, balance: Decimal) -> StoreResult<bool> {
        let initial = cents(balance)?.to_be_bytes();
        let created = self
            .accounts
            .compare_and_swap(id.as_bytes(), None::<&[u8]>, Some(&initial[..]))?;
        Ok(created.is_ok())
    }

    fn accounts(&self) -> StoreResult<Vec<Account>> {
        let mut accounts = Vec::new();
        for entry in self.accounts.iter() {
            let (key, value) = entry?;
            let id = String::from_utf8(key.to_vec())
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            accounts.push(Account {
                id,
                balance: decode_cents(&value)?,
            });
        }
        Ok(accounts)
    }
}

impl RecordStore for LedgerDb {
    fn insert_transfer(
        &self,
        record: &TransactionRecord,
        log: &TransactionLog,
    ) -> StoreResult<()> {
        let record_id = &record.id.as_bytes()[..];
        let record_bytes = encode(record)?;
        let sender_key = token_key(&record.sender_token, &record.created_at, &record.id);
        let receiver_key = token_key(&record.receiver_token, &record.created_at, &record.id);
        let log_id = &log.id.as_bytes()[..];
        let log_bytes = encode(log)?;
        let log_key = order_key(&log.timestamp, &log.id);

        (
            &self.transactions,
            &self.sender_index,
            &self.receiver_index,
            &self.logs,
            &self.log_order,
        )
            .transaction(|(transactions, senders, receivers, logs, order)| -> TxResult {
                transactions.insert(record_id, record_bytes.as_slice())?;
                senders.insert(sender_key.as_slice(), record_id)?;
                receivers.insert(receiver_key.as_slice(), record_id)?;
                logs.insert(log_id, log_bytes.as_slice())?;
                order.insert(log_key.as_slice(), log_id)?;
                Ok(())
            })?;
        Ok(())
    }

    fn transaction(&self, id: Uuid) -> StoreResult<Option<TransactionRecord>> {
        Self::get_row(&self.transactions, &id)
    }

    fn transactions_by_sender_token(&self, token: &str) -> StoreResult<Vec<TransactionRecord>> {
        Self::resolve_newest_first(
            &self.transactions,
            self.sender_index.scan_prefix(token.as_bytes()),
            usize::MAX,
        )
    }

    fn transactions_by_receiver_token(&self, token: &str) -> StoreResult<Vec<TransactionRecord>> {
        Self::resolve_newest_first(
            &self.transactions,
            self.receiver_index.scan_prefix(token.as_bytes()),
            usize::MAX,
        )
    }

    fn log(&self, id: Uuid) -> StoreResult<Option<TransactionLog>> {
        Self::get_row(&self.logs, &id)
    }

    fn update_log(&self, log: &TransactionLog) -> StoreResult<()> {
        if !self.logs.contains_key(log.id.as_bytes())? {
            return Err(missing_log(&log.id));
        }
        self.logs.insert(log.id.as_bytes(), encode(log)?)?;
        Ok(())
    }

    fn close_log(&self, closed: &TransactionLog) -> StoreResult<bool> {
        let key = closed.id.as_bytes();
        let replacement = encode(closed)?;
        loop {
            let current = self.logs.get(key)?.ok_or_else(|| missing_log(&closed.id))?;
            let stored: TransactionLog = decode(&current)?;
            if !stored.is_reversible() {
                return Ok(false);
            }
            let new = Some(replacement.as_slice());
            if self.logs.compare_and_swap(key, Some(&current), new)?.is_ok() {
                return Ok(true);
            }
            debug!(log_id = %closed.id, "log changed while closing, re-reading");
        }
    }

    fn logs(&self, limit: usize) -> StoreResult<Vec<TransactionLog>> {
        Self::resolve_newest_first(&self.logs, self.log_order.iter(), limit)
    }

    fn insert_notifications(&self, notifications: &[Notification]) -> StoreResult<()> {
        let mut rows = Vec::with_capacity(notifications.len());
        for notification in notifications {
            let mut key = user_prefix(&notification.user_id);
            key.extend_from_slice(&order_key(&notification.timestamp, &notification.id));
            rows.push((notification.id, encode(notification)?, key));
        }

        (&self.notifications, &self.user_notifications).transaction(
            |(by_id, by_user)| -> TxResult {
                for (id, bytes, key) in &rows {
                    by_id.insert(&id.as_bytes()[..], bytes.as_slice())?;
                    by_user.insert(key.as_slice(), &id.as_bytes()[..])?;
                }
                Ok(())
            },
        )?;
        Ok(())
    }

    fn notification(&self, id: Uuid) -> StoreResult<Option<Notification>> {
        Self::get_row(&self.notifications, &id)
    }

    fn update_notification(&self, notification: &Notification) -> StoreResult<()> {
        if !self.notifications.contains_key(notification.id.as_bytes())? {
            return Err(StoreError::Missing {
                kind: "notification",
                id: notification.id.to_string(),
            });
        }
        self.notifications
            .insert(notification.id.as_bytes(), encode(notification)?)?;
        Ok(())
    }

    fn notifications_for(&self, user_id: &str) -> StoreResult<Vec<Notification>> {
        Self::resolve_newest_first(
            &self.notifications,
            self.user_notifications.scan_prefix(user_prefix(user_id)),
            usize::MAX,
        )
    }
}

impl KeyStore for LedgerDb {
    fn load(&self, slot: KeySlot) -> Result<Option<Vec<u8>>, KeyStoreError> {
        self.keys
            .get(slot.file_name())
            .map(|v| v.map(|bytes| bytes.to_vec()))
            .map_err(|e| KeyStoreError::Backend(e.to_string()))
    }

    fn save(&self, slot: KeySlot, bytes: &[u8]) -> Result<(), KeyStoreError> {
        self.keys
            .insert(slot.file_name(), bytes)
            .map_err(|e| KeyStoreError::Backend(e.to_string()))?;
        self.keys
            .flush()
            .map_err(|e| KeyStoreError::Backend(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::conformance;

    #[test]
    fn open_temporary_database() {
        let db = LedgerDb::open_temporary().expect("should create temp db");
        assert!(db.accounts().unwrap().is_empty());
        assert!(db.logs(10).unwrap().is_empty());
    }

    #[test]
    fn test_account_store_contract() {
        conformance::account_store(&LedgerDb::open_temporary().unwrap());
    }

    #[test]
    fn test_record_store_contract() {
        conformance::record_store(&LedgerDb::open_temporary().unwrap());
    }

    #[test]
    fn test_data_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let record = conformance::sample_record("tok-a", "tok-b", 0);
        let log = conformance::sample_log("alice", "bob", 0);
        {
            let db = LedgerDb::open(dir.path()).unwrap();
            db.create_account("alice", Decimal::new(5_000_000, 2)).unwrap();
            db.insert_transfer(&record, &log).unwrap();
            db.save(KeySlot::SearchKey, &[9u8; 32]).unwrap();
            db.flush().unwrap();
        }

        let db = LedgerDb::open(dir.path()).unwrap();
        assert_eq!(db.balance("alice").unwrap(), Some(Decimal::new(50_000, 0)));
        assert_eq!(db.log(log.id).unwrap(), Some(log));
        assert_eq!(db.transactions_by_sender_token("tok-a").unwrap(), vec![record]);
        assert_eq!(db.load(KeySlot::SearchKey).unwrap(), Some(vec![9u8; 32]));
    }

    #[test]
    fn test_key_slots_are_independent() {
        let db = LedgerDb::open_temporary().unwrap();
        assert!(db.load(KeySlot::SigningKey).unwrap().is_none());
        db.save(KeySlot::SigningKey, b"seed").unwrap();
        assert!(db.load(KeySlot::SearchKey).unwrap().is_none());
        assert_eq!(db.load(KeySlot::SigningKey).unwrap(), Some(b"seed".to_vec()));
    }

    #[test]
    fn test_balance_cas_ignores_decimal_formatting() {
        let db = LedgerDb::open_temporary().unwrap();
        db.create_account("alice", Decimal::new(105, 1)).unwrap(); // 10.5
        assert!(db
            .compare_and_set_balance("alice", Decimal::new(1050, 2), Decimal::new(5, 0))
            .unwrap());
        assert_eq!(db.balance("alice").unwrap(), Some(Decimal::new(500, 2)));
    }

    #[test]
    fn test_order_key_sorts_chronologically() {
        let id = Uuid::nil();
        let early = DateTime::<Utc>::from_timestamp(1_000, 0).unwrap();
        let late = DateTime::<Utc>::from_timestamp(2_000, 0).unwrap();
        let before_epoch = DateTime::<Utc>::from_timestamp(-5, 0).unwrap();
        assert!(order_key(&early, &id) < order_key(&late, &id));
        assert!(order_key(&before_epoch, &id) < order_key(&early, &id));
    }

    #[test]
    fn test_user_prefix_does_not_collide() {
        let a = user_prefix("alice");
        let b = user_prefix("alice2");
        assert!(!b.starts_with(&a));
    }
}
