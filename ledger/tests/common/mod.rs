//! Shared fixtures for the integration tests.
//!
//! Paillier key generation dominates test time, so each test binary
//! generates one small key and shares it.

#![allow(dead_code)]

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use rust_decimal::Decimal;

use safepay_ledger::audit::AuditPipeline;
use safepay_ledger::crypto::keys::AuditKeypair;
use safepay_ledger::crypto::paillier::PaillierKeypair;
use safepay_ledger::crypto::search::SearchTokenizer;
use safepay_ledger::crypto::signatures::{Ed25519Signer, SigningService};
use safepay_ledger::crypto::CryptoSuite;
use safepay_ledger::fraud::{FixedOracle, FraudOracle, FraudVerdict};
use safepay_ledger::ledger::types::{Account, Notification, TransactionLog, TransactionRecord};
use safepay_ledger::storage::{AccountStore, MemoryStore, RecordStore, StoreError, StoreResult};
use uuid::Uuid;
use safepay_ledger::Ledger;

pub const TEST_KEY_BITS: u64 = 256;

pub fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

pub fn paillier() -> &'static PaillierKeypair {
    static KP: OnceLock<PaillierKeypair> = OnceLock::new();
    KP.get_or_init(|| PaillierKeypair::generate(TEST_KEY_BITS, 16).unwrap())
}

pub fn suite_with(
    paillier: PaillierKeypair,
    signer: Arc<dyn SigningService>,
) -> Arc<CryptoSuite> {
    Arc::new(CryptoSuite::new(
        paillier,
        SearchTokenizer::generate(),
        AuditPipeline::new(signer),
    ))
}

pub fn suite() -> Arc<CryptoSuite> {
    suite_with(
        paillier().clone(),
        Arc::new(Ed25519Signer::new(AuditKeypair::generate())),
    )
}

pub fn legit() -> Arc<dyn FraudOracle> {
    Arc::new(FixedOracle(FraudVerdict::Legit))
}

/// An in-memory ledger with alice and bob at 50 000.00 each.
pub fn ledger() -> (Ledger, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let ledger = Ledger::new(store.clone(), store.clone(), suite(), legit());
    seed(&ledger);
    (ledger, store)
}

pub fn seed(ledger: &Ledger) {
    ledger.seed_account("alice", dec("50000.00")).unwrap();
    ledger.seed_account("bob", dec("50000.00")).unwrap();
    ledger.seed_account("carol", dec("50000.00")).unwrap();
}

// ---------------------------------------------------------------------------
// Interleaving account store
// ---------------------------------------------------------------------------

type Hook = Box<dyn FnOnce() + Send>;

/// Wraps a [`MemoryStore`] and lets a test inject work at precise points:
/// right before a CAS or a put on a given account, a forced CAS miss, or a
/// put that fails.
///
/// Hooks fire once. They run with no lock held, so they may use another
/// `Ledger` over the same inner store.
pub struct Interleaved {
    pub inner: Arc<MemoryStore>,
    before_cas: Mutex<Vec<(String, Hook)>>,
    before_put: Mutex<Vec<(String, Hook)>>,
    forced_misses: Mutex<HashMap<String, usize>>,
    failing_puts: Mutex<Vec<String>>,
}

impl Interleaved {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            before_cas: Mutex::new(Vec::new()),
            before_put: Mutex::new(Vec::new()),
            forced_misses: Mutex::new(HashMap::new()),
            failing_puts: Mutex::new(Vec::new()),
        }
    }

    pub fn before_cas_on(&self, account: &str, hook: impl FnOnce() + Send + 'static) {
        self.before_cas.lock().push((account.to_string(), Box::new(hook)));
    }

    pub fn before_put_on(&self, account: &str, hook: impl FnOnce() + Send + 'static) {
        self.before_put.lock().push((account.to_string(), Box::new(hook)));
    }

    /// The next `times` CAS calls on `account` report a miss without
    /// touching the store.
    pub fn force_cas_miss(&self, account: &str, times: usize) {
        self.forced_misses.lock().insert(account.to_string(), times);
    }

    /// The next put on `account` fails without touching the store.
    pub fn fail_put_on(&self, account: &str) {
        self.failing_puts.lock().push(account.to_string());
    }

    fn take(hooks: &Mutex<Vec<(String, Hook)>>, account: &str) -> Option<Hook> {
        let mut hooks = hooks.lock();
        let pos = hooks.iter().position(|(a, _)| a == account)?;
        Some(hooks.remove(pos).1)
    }
}

impl AccountStore for Interleaved {
    fn balance(&self, id: &str) -> StoreResult<Option<Decimal>> {
        self.inner.balance(id)
    }

    fn compare_and_set_balance(
        &self,
        id: &str,
        expected: Decimal,
        new: Decimal,
    ) -> StoreResult<bool> {
        if let Some(hook) = Self::take(&self.before_cas, id) {
            hook();
        }
        {
            let mut misses = self.forced_misses.lock();
            if let Some(left) = misses.get_mut(id) {
                if *left > 0 {
                    *left -= 1;
                    return Ok(false);
                }
            }
        }
        self.inner.compare_and_set_balance(id, expected, new)
    }

    fn put_balance(&self, id: &str, new: Decimal) -> StoreResult<()> {
        if let Some(hook) = Self::take(&self.before_put, id) {
            hook();
        }
        {
            let mut failing = self.failing_puts.lock();
            if let Some(pos) = failing.iter().position(|a| a == id) {
                failing.remove(pos);
                return Err(disk_full());
            }
        }
        self.inner.put_balance(id, new)
    }

    fn create_account(&self, id: &str, balance: Decimal) -> StoreResult<bool> {
        self.inner.create_account(id, balance)
    }

    fn accounts(&self) -> StoreResult<Vec<Account>> {
        self.inner.accounts()
    }
}

/// A ledger whose balance writes go through an [`Interleaved`] store, plus
/// a plain "bystander" ledger over the same data for hooks to use.
pub fn interleaved_ledger() -> (Ledger, Arc<Interleaved>, Ledger) {
    let inner = Arc::new(MemoryStore::new());
    let accounts = Arc::new(Interleaved::new(inner.clone()));
    let records: Arc<dyn RecordStore> = inner.clone();
    let crypto = suite();

    let ledger = Ledger::new(accounts.clone(), records.clone(), crypto.clone(), legit());
    let bystander = Ledger::new(inner, records, crypto, legit());
    seed(&bystander);
    (ledger, accounts, bystander)
}

// ---------------------------------------------------------------------------
// Failing record store
// ---------------------------------------------------------------------------

pub fn disk_full() -> StoreError {
    StoreError::Sled(sled::Error::Io(std::io::Error::other("disk full")))
}

/// Record store writes that [`FlakyRecords`] can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordWrite {
    InsertTransfer,
    CloseLog,
    UpdateLog,
    InsertNotifications,
}

/// Wraps a [`MemoryStore`] and fails chosen writes once each, without
/// touching the store. Reads always pass through.
pub struct FlakyRecords {
    pub inner: Arc<MemoryStore>,
    failing: Mutex<Vec<(RecordWrite, Option<Hook>)>>,
}

impl FlakyRecords {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            failing: Mutex::new(Vec::new()),
        }
    }

    /// The next `write` fails.
    pub fn fail_next(&self, write: RecordWrite) {
        self.failing.lock().push((write, None));
    }

    /// The next `write` runs `hook`, then fails.
    pub fn fail_next_after(&self, write: RecordWrite, hook: impl FnOnce() + Send + 'static) {
        self.failing.lock().push((write, Some(Box::new(hook))));
    }

    fn check(&self, write: RecordWrite) -> StoreResult<()> {
        let armed = {
            let mut failing = self.failing.lock();
            let pos = failing.iter().position(|(w, _)| *w == write);
            pos.map(|pos| failing.remove(pos).1)
        };
        match armed {
            Some(hook) => {
                if let Some(hook) = hook {
                    hook();
                }
                Err(disk_full())
            }
            None => Ok(()),
        }
    }
}

impl RecordStore for FlakyRecords {
    fn insert_transfer(
        &self,
        record: &TransactionRecord,
        log: &TransactionLog,
    ) -> StoreResult<()> {
        self.check(RecordWrite::InsertTransfer)?;
        self.inner.insert_transfer(record, log)
    }

    fn transaction(&self, id: Uuid) -> StoreResult<Option<TransactionRecord>> {
        self.inner.transaction(id)
    }

    fn transactions_by_sender_token(&self, token: &str) -> StoreResult<Vec<TransactionRecord>> {
        self.inner.transactions_by_sender_token(token)
    }

    fn transactions_by_receiver_token(&self, token: &str) -> StoreResult<Vec<TransactionRecord>> {
        self.inner.transactions_by_receiver_token(token)
    }

    fn log(&self, id: Uuid) -> StoreResult<Option<TransactionLog>> {
        self.inner.log(id)
    }

    fn update_log(&self, log: &TransactionLog) -> StoreResult<()> {
        self.check(RecordWrite::UpdateLog)?;
        self.inner.update_log(log)
    }

    fn close_log(&self, closed: &TransactionLog) -> StoreResult<bool> {
        self.check(RecordWrite::CloseLog)?;
        self.inner.close_log(closed)
    }

    fn logs(&self, limit: usize) -> StoreResult<Vec<TransactionLog>> {
        self.inner.logs(limit)
    }

    fn insert_notifications(&self, notifications: &[Notification]) -> StoreResult<()> {
        self.check(RecordWrite::InsertNotifications)?;
        self.inner.insert_notifications(notifications)
    }

    fn notification(&self, id: Uuid) -> StoreResult<Option<Notification>> {
        self.inner.notification(id)
    }

    fn update_notification(&self, notification: &Notification) -> StoreResult<()> {
        self.inner.update_notification(notification)
    }

    fn notifications_for(&self, user_id: &str) -> StoreResult<Vec<Notification>> {
        self.inner.notifications_for(user_id)
    }
}

/// A ledger whose balance writes go through [`Interleaved`] and whose row
/// writes go through [`FlakyRecords`], plus a plain bystander ledger over
/// the same data.
pub fn flaky_ledger() -> (Ledger, Arc<Interleaved>, Arc<FlakyRecords>, Ledger) {
    let inner = Arc::new(MemoryStore::new());
    let accounts = Arc::new(Interleaved::new(inner.clone()));
    let records = Arc::new(FlakyRecords::new(inner.clone()));
    let crypto = suite();

    let ledger = Ledger::new(accounts.clone(), records.clone(), crypto.clone(), legit());
    let bystander = Ledger::new(inner.clone(), inner, crypto, legit());
    seed(&bystander);
    (ledger, accounts, records, bystander)
}
