//! In-memory backend. Same contracts as [`LedgerDb`](super::LedgerDb),
//! nothing on disk.
//!
//! Balances live in a `DashMap`; a CAS takes the shard's write lock through
//! `get_mut`, so compare and swap happen under one guard. Rows live in
//! `parking_lot::RwLock`ed maps; a multi-row write holds the write lock
//! for all of its rows.

use std::collections::HashMap;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use uuid::Uuid;

use super::{cents, AccountStore, RecordStore, StoreError, StoreResult};
use crate::ledger::types::{Account, Notification, TransactionLog, TransactionRecord};
use crate::money::from_minor_units;

#[derive(Debug, Default)]
struct Rows {
    transactions: HashMap<Uuid, TransactionRecord>,
    /// Insertion order, oldest first.
    transaction_order: Vec<Uuid>,
    logs: HashMap<Uuid, TransactionLog>,
    log_order: Vec<Uuid>,
    notifications: HashMap<Uuid, Notification>,
    notification_order: Vec<Uuid>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    balances: DashMap<String, i64>,
    rows: RwLock<Rows>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records_where<F>(&self, pred: F) -> Vec<TransactionRecord>
    where
        F: Fn(&TransactionRecord) -> bool,
    {
        let rows = self.rows.read();
        rows.transaction_order
            .iter()
            .rev()
            .filter_map(|id| rows.transactions.get(id))
            .filter(|r| pred(r))
            .cloned()
            .collect()
    }
}

fn missing_log(id: &Uuid) -> StoreError {
    StoreError::Missing {
        kind: "transaction log",
        id: id.to_string(),
    }
}

impl AccountStore for MemoryStore {
    fn balance(&self, id: &str) -> StoreResult<Option<Decimal>> {
        Ok(self.balances.get(id).map(|c| from_minor_units(*c)))
    }

    fn compare_and_set_balance(
        &self,
        id: &str,
        expected: Decimal,
        new: Decimal,
    ) -> StoreResult<bool> {
        let (expected, new) = (cents(expected)?, cents(new)?);
        match self.balances.get_mut(id) {
            Some(mut current) if *current == expected => {
                *current = new;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn put_balance(&self, id: &str, new: Decimal) -> StoreResult<()> {
        self.balances.insert(id.to_string(), cents(new)?);
        Ok(())
    }

    fn create_account(&self, id: &str, balance: Decimal) -> StoreResult<bool> {
        let initial = cents(balance)?;
        match self.balances.entry(id.to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(initial);
                Ok(true)
            }
        }
    }

    fn accounts(&self) -> StoreResult<Vec<Account>> {
        let mut accounts: Vec<Account> = self
            .balances
            .iter()
            .map(|e| Account {
                id: e.key().clone(),
                balance: from_minor_units(*e.value()),
            })
            .collect();
        accounts.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(accounts)
    }
}

impl RecordStore for MemoryStore {
    fn insert_transfer(
        &self,
        record: &TransactionRecord,
        log: &TransactionLog,
    ) -> StoreResult<()> {
        let mut rows = self.rows.write();
        if rows.transactions.insert(record.id, record.clone()).is_none() {
            rows.transaction_order.push(record.id);
        }
        if rows.logs.insert(log.id, log.clone()).is_none() {
            rows.log_order.push(log.id);
        }
        Ok(())
    }

    fn transaction(&self, id: Uuid) -> StoreResult<Option<TransactionRecord>> {
        Ok(self.rows.read().transactions.get(&id).cloned())
    }

    fn transactions_by_sender_token(&self, token: &str) -> StoreResult<Vec<TransactionRecord>> {
        Ok(self.records_where(|r| r.sender_token == token))
    }

    fn transactions_by_receiver_token(&self, token: &str) -> StoreResult<Vec<TransactionRecord>> {
        Ok(self.records_where(|r| r.receiver_token == token))
    }

    fn log(&self, id: Uuid) -> StoreResult<Option<TransactionLog>> {
        Ok(self.rows.read().logs.get(&id).cloned())
    }

    fn update_log(&self, log: &TransactionLog) -> StoreResult<()> {
        match self.rows.write().logs.get_mut(&log.id) {
            Some(existing) => {
                *existing = log.clone();
                Ok(())
            }
            None => Err(missing_log(&log.id)),
        }
    }

    fn close_log(&self, closed: &TransactionLog) -> StoreResult<bool> {
        match self.rows.write().logs.get_mut(&closed.id) {
            Some(existing) if existing.is_reversible() => {
                *existing = closed.clone();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(missing_log(&closed.id)),
        }
    }

    fn logs(&self, limit: usize) -> StoreResult<Vec<TransactionLog>> {
        let rows = self.rows.read();
        Ok(rows
            .log_order
            .iter()
            .rev()
            .filter_map(|id| rows.logs.get(id))
            .take(limit)
            .cloned()
            .collect())
    }

    fn insert_notifications(&self, notifications: &[Notification]) -> StoreResult<()> {
        let mut rows = self.rows.write();
        for notification in notifications {
            if rows
                .notifications
                .insert(notification.id, notification.clone())
                .is_none()
            {
                rows.notification_order.push(notification.id);
            }
        }
        Ok(())
    }

    fn notification(&self, id: Uuid) -> StoreResult<Option<Notification>> {
        Ok(self.rows.read().notifications.get(&id).cloned())
    }

    fn update_notification(&self, notification: &Notification) -> StoreResult<()> {
        match self.rows.write().notifications.get_mut(&notification.id) {
            Some(existing) => {
                *existing = notification.clone();
                Ok(())
            }
            None => Err(StoreError::Missing {
                kind: "notification",
                id: notification.id.to_string(),
            }),
        }
    }

    fn notifications_for(&self, user_id: &str) -> StoreResult<Vec<Notification>> {
        let rows = self.rows.read();
        Ok(rows
            .notification_order
            .iter()
            .rev()
            .filter_map(|id| rows.notifications.get(id))
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect())
    }
}
