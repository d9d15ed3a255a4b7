//! Row types written by the ledger.
//!
//! Each audited row has a borrowed `*Payload` view: the exact set of fields
//! that gets hashed and signed. Audit columns and degradation notes are
//! never part of their own payload, and neither is the reversal state of a
//! log, so a log's evidence still checks out after it has been undone.
//!
//! All of these are bincode-encoded into sled, so no `flatten` and no
//! `skip_serializing_if` anywhere in this file.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audit::{AuditFields, CryptoDegraded};
use crate::crypto::paillier::Ciphertext;
use crate::fraud::{CardDetails, FraudVerdict};

/// An account and its current balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub balance: Decimal,
}

/// A transfer as submitted by a caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub sender_id: String,
    pub receiver_id: String,
    pub amount: Decimal,
    /// Fed to the fraud oracle only.
    pub card: CardDetails,
}

impl TransferRequest {
    pub fn new(
        sender_id: impl Into<String>,
        receiver_id: impl Into<String>,
        amount: Decimal,
    ) -> Self {
        Self {
            sender_id: sender_id.into(),
            receiver_id: receiver_id.into(),
            amount,
            card: CardDetails::default(),
        }
    }

    pub fn with_card(mut self, card: CardDetails) -> Self {
        self.card = card;
        self
    }
}

// ---------------------------------------------------------------------------
// TransactionRecord
// ---------------------------------------------------------------------------

/// Immutable record of a committed transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: Uuid,
    pub sender_id: String,
    pub receiver_id: String,
    pub amount: Decimal,
    /// Paillier ciphertext of the amount in cents, base 10. Empty when
    /// encryption degraded.
    pub amount_ciphertext: String,
    pub sender_token: String,
    pub receiver_token: String,
    pub sender_balance_after: Decimal,
    pub card_type: Option<String>,
    pub card_expiry: Option<String>,
    pub fraud_status: FraudVerdict,
    pub created_at: DateTime<Utc>,
    pub audit: AuditFields,
    pub degraded: Vec<CryptoDegraded>,
}

/// Hashed and signed view of a [`TransactionRecord`].
#[derive(Debug, Serialize)]
pub struct RecordPayload<'a> {
    pub id: &'a Uuid,
    pub sender_id: &'a str,
    pub receiver_id: &'a str,
    pub amount: &'a Decimal,
    pub amount_ciphertext: &'a str,
    pub sender_token: &'a str,
    pub receiver_token: &'a str,
    pub sender_balance_after: &'a Decimal,
    pub card_type: &'a Option<String>,
    pub card_expiry: &'a Option<String>,
    pub fraud_status: FraudVerdict,
    pub created_at: &'a DateTime<Utc>,
}

impl TransactionRecord {
    pub fn audit_payload(&self) -> RecordPayload<'_> {
        RecordPayload {
            id: &self.id,
            sender_id: &self.sender_id,
            receiver_id: &self.receiver_id,
            amount: &self.amount,
            amount_ciphertext: &self.amount_ciphertext,
            sender_token: &self.sender_token,
            receiver_token: &self.receiver_token,
            sender_balance_after: &self.sender_balance_after,
            card_type: &self.card_type,
            card_expiry: &self.card_expiry,
            fraud_status: self.fraud_status,
            created_at: &self.created_at,
        }
    }

    /// The stored ciphertext, if encryption didn't degrade and it parses.
    pub fn ciphertext(&self) -> Option<Ciphertext> {
        if self.amount_ciphertext.is_empty() {
            return None;
        }
        self.amount_ciphertext.parse().ok()
    }
}

// ---------------------------------------------------------------------------
// TransactionLog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Completed,
    Undone,
}

impl fmt::Display for LogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogStatus::Completed => "completed",
            LogStatus::Undone => "undone",
        })
    }
}

/// Append-only log entry for a transfer, and the handle for reversing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionLog {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub sender_id: String,
    pub receiver_id: String,
    pub amount: Decimal,
    pub sender_balance_before: Decimal,
    pub sender_balance_after: Decimal,
    pub receiver_balance_before: Decimal,
    pub receiver_balance_after: Decimal,
    pub card_type: Option<String>,
    pub card_expiry: Option<String>,
    pub fraud_flagged: bool,
    pub status: LogStatus,
    pub can_undo: bool,
    pub undone_by: Option<String>,
    pub undone_at: Option<DateTime<Utc>>,
    pub timestamp: DateTime<Utc>,
    pub audit: AuditFields,
    pub degraded: Vec<CryptoDegraded>,
}

/// Hashed and signed view of a [`TransactionLog`]: everything fixed at
/// creation time.
#[derive(Debug, Serialize)]
pub struct LogPayload<'a> {
    pub id: &'a Uuid,
    pub transaction_id: &'a Uuid,
    pub sender_id: &'a str,
    pub receiver_id: &'a str,
    pub amount: &'a Decimal,
    pub sender_balance_before: &'a Decimal,
    pub sender_balance_after: &'a Decimal,
    pub receiver_balance_before: &'a Decimal,
    pub receiver_balance_after: &'a Decimal,
    pub card_type: &'a Option<String>,
    pub card_expiry: &'a Option<String>,
    pub fraud_flagged: bool,
    pub timestamp: &'a DateTime<Utc>,
}

impl TransactionLog {
    pub fn audit_payload(&self) -> LogPayload<'_> {
        LogPayload {
            id: &self.id,
            transaction_id: &self.transaction_id,
            sender_id: &self.sender_id,
            receiver_id: &self.receiver_id,
            amount: &self.amount,
            sender_balance_before: &self.sender_balance_before,
            sender_balance_after: &self.sender_balance_after,
            receiver_balance_before: &self.receiver_balance_before,
            receiver_balance_after: &self.receiver_balance_after,
            card_type: &self.card_type,
            card_expiry: &self.card_expiry,
            fraud_flagged: self.fraud_flagged,
            timestamp: &self.timestamp,
        }
    }

    pub fn is_undone(&self) -> bool {
        self.status == LogStatus::Undone
    }

    /// Still completed and still marked undoable.
    pub fn is_reversible(&self) -> bool {
        self.status == LogStatus::Completed && self.can_undo
    }
}

// ---------------------------------------------------------------------------
// Notification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    TransactionReversal,
}

/// A message to one user. Only reversals create these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: String,
    pub log_id: Uuid,
    pub kind: NotificationKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// Flips false to true, never back.
    pub read: bool,
    pub audit: AuditFields,
    pub degraded: Vec<CryptoDegraded>,
}

#[derive(Debug, Serialize)]
pub struct NotificationPayload<'a> {
    pub id: &'a Uuid,
    pub user_id: &'a str,
    pub log_id: &'a Uuid,
    pub kind: NotificationKind,
    pub message: &'a str,
    pub timestamp: &'a DateTime<Utc>,
}

impl Notification {
    pub fn audit_payload(&self) -> NotificationPayload<'_> {
        NotificationPayload {
            id: &self.id,
            user_id: &self.user_id,
            log_id: &self.log_id,
            kind: self.kind,
            message: &self.message,
            timestamp: &self.timestamp,
        }
    }
}

// ---------------------------------------------------------------------------
// Operation results
// ---------------------------------------------------------------------------

/// What a successful transfer produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReceipt {
    pub record: TransactionRecord,
    pub log: TransactionLog,
}

/// What a successful reversal produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReversalOutcome {
    pub log: TransactionLog,
    pub sender_balance: Decimal,
    pub receiver_balance: Decimal,
    /// Sender's notification first, then the receiver's.
    pub notifications: Vec<Notification>,
}

/// Homomorphic sum over a set of records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedTotal {
    pub ciphertext: Ciphertext,
    /// Records whose ciphertext went into the sum.
    pub aggregated: usize,
    /// Records with no usable ciphertext.
    pub skipped: usize,
}
