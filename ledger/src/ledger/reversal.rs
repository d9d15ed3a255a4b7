//! # Reversal Engine
//!
//! Undoes a completed transfer by moving the amount back, notifying both
//! parties, and closing the log so it can't be undone twice.
//!
//! ```text
//! load log ─► reversible? ─► read live balances ─► receiver stays ≥ 0?
//!                                                        │
//!                                                        ▼
//!                             close log (first writer wins, else AlreadyUndone)
//!                                                        │
//!                                                        ▼
//!                            put receiver ─► put sender ─► insert both notices
//!                                                        │ fails: move back, reopen log
//! ```
//!
//! The log is claimed before any money moves. A retry after a failure, or
//! a second reversal racing this one, finds it closed and is rejected
//! instead of applying the amount again. When a later step fails, the
//! balances are moved back and the log is reopened so the reversal can be
//! retried.
//!
//! ## Live balances, unguarded writes
//!
//! The compensating amounts are applied to the accounts' *current*
//! balances, not the ones captured in the log. The two balance writes are
//! plain puts, not compare-and-set. A transfer that touches either account
//! between the read and the write here can be lost. Callers that need
//! reversals to be safe against concurrent transfers must serialize them
//! above this layer.

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::types::{LogStatus, Notification, ReversalOutcome, TransactionLog};
use super::Ledger;
use crate::error::{LedgerError, LedgerResult};

/// Which balance writes of a reversal have landed.
#[derive(Debug, Default)]
struct Applied {
    receiver: bool,
    sender: bool,
}

impl Ledger {
    /// Reverse the transfer behind `log_id` on behalf of `actor_id`.
    pub fn reverse(&self, log_id: Uuid, actor_id: &str) -> LedgerResult<ReversalOutcome> {
        let log = self.log(log_id)?;
        reject_closed(&log)?;

        let sender_live = self.balance(&log.sender_id)?;
        let receiver_live = self.balance(&log.receiver_id)?;
        let sender_balance = sender_live + log.amount;
        let receiver_balance = receiver_live - log.amount;

        if receiver_balance < Decimal::ZERO {
            return Err(LedgerError::NegativeBalance {
                account: log.receiver_id.clone(),
                balance: receiver_balance,
            });
        }

        let mut closed = log.clone();
        closed.status = LogStatus::Undone;
        closed.can_undo = false;
        closed.undone_by = Some(actor_id.to_string());
        closed.undone_at = Some(Utc::now());
        if !self.records.close_log(&closed)? {
            reject_closed(&self.log(log_id)?)?;
            return Err(LedgerError::AlreadyUndone(log_id));
        }

        let notifications = vec![
            self.reversal_notice(&log.sender_id, log.id, log.amount, actor_id, sender_balance),
            self.reversal_notice(
                &log.receiver_id,
                log.id,
                log.amount,
                actor_id,
                receiver_balance,
            ),
        ];

        let mut applied = Applied::default();
        if let Err(e) = self.apply_reversal(
            &log,
            sender_balance,
            receiver_balance,
            &notifications,
            &mut applied,
        ) {
            warn!(log = %log.id, error = %e, ?applied, "reversal failed, rolling back");
            self.roll_back_reversal(&log, &applied)?;
            return Err(e);
        }

        info!(
            log = %closed.id,
            actor = actor_id,
            amount = %closed.amount,
            %sender_balance,
            %receiver_balance,
            "transfer reversed"
        );

        Ok(ReversalOutcome {
            log: closed,
            sender_balance,
            receiver_balance,
            notifications,
        })
    }

    fn apply_reversal(
        &self,
        log: &TransactionLog,
        sender_balance: Decimal,
        receiver_balance: Decimal,
        notifications: &[Notification],
        applied: &mut Applied,
    ) -> LedgerResult<()> {
        self.accounts.put_balance(&log.receiver_id, receiver_balance)?;
        applied.receiver = true;
        self.accounts.put_balance(&log.sender_id, sender_balance)?;
        applied.sender = true;
        self.records.insert_notifications(notifications)?;
        Ok(())
    }

    /// Move back whatever `applied` says landed, then reopen `original`.
    ///
    /// If this fails too the log stays closed, so the reversal can't be
    /// retried into a double credit. The returned error needs an operator.
    fn roll_back_reversal(
        &self,
        original: &TransactionLog,
        applied: &Applied,
    ) -> LedgerResult<()> {
        let result = self.undo_applied(original, applied);
        if let Err(e) = &result {
            error!(log = %original.id, error = %e, "reversal rollback failed, log left closed");
        }
        result
    }

    fn undo_applied(&self, original: &TransactionLog, applied: &Applied) -> LedgerResult<()> {
        if applied.sender {
            self.compensate(&original.sender_id, -original.amount)?;
        }
        if applied.receiver {
            self.compensate(&original.receiver_id, original.amount)?;
        }
        self.records.update_log(original)?;
        Ok(())
    }
}

/// Status first: a retried reversal should say "already undone", not
/// "irreversible".
fn reject_closed(log: &TransactionLog) -> LedgerResult<()> {
    if log.is_undone() {
        return Err(LedgerError::AlreadyUndone(log.id));
    }
    if !log.can_undo {
        return Err(LedgerError::Irreversible(log.id));
    }
    Ok(())
}
