//! # Transfer Engine
//!
//! Moves an amount between two accounts with optimistic concurrency and no
//! locks:
//!
//! ```text
//! validate ─► read Bs, Br ─► Bs ≥ amount? ─► CAS sender Bs → Bs − amount
//!                                               │ miss: ConcurrentUpdate, nothing written
//!                                               ▼
//!                                 CAS receiver Br → Br + amount
//!                                               │ miss: credit sender back, ConcurrentUpdate
//!                                               ▼
//!            encrypt amount, tokenize ids, classify, audit, persist record + log
//!                                               │ fails: debit receiver, credit sender, Store
//! ```
//!
//! The two balance writes are not atomic together. When the second one
//! loses a race, the first is undone by a compensating credit. That credit
//! is itself a CAS loop, because the sender may have been written again in
//! the meantime and a blind write would clobber that update.
//!
//! Record and log are persisted in one store write. If that write fails
//! the balances are moved back the same way, so a transfer either leaves
//! money moved with its audit rows in place or leaves neither.
//!
//! Crypto failures after the balances moved never abort the transfer. They
//! degrade the affected field and are recorded on the row.

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::types::{
    LogStatus, TransactionLog, TransactionRecord, TransferReceipt, TransferRequest,
};
use super::Ledger;
use crate::audit::{AuditFields, AuditStep, CryptoDegraded};
use crate::config::COMPENSATION_MAX_ATTEMPTS;
use crate::error::{LedgerError, LedgerResult};
use crate::fraud::TransactionFeatures;
use crate::money::{from_minor_units, to_minor_units};

/// Balances observed and written by the CAS phase.
struct Committed {
    sender_before: Decimal,
    sender_after: Decimal,
    receiver_before: Decimal,
    receiver_after: Decimal,
}

impl Ledger {
    /// Transfer `amount` from `sender_id` to `receiver_id`.
    pub fn transfer(
        &self,
        sender_id: &str,
        receiver_id: &str,
        amount: Decimal,
    ) -> LedgerResult<TransferReceipt> {
        self.transfer_request(&TransferRequest::new(sender_id, receiver_id, amount))
    }

    /// Transfer with card details for the fraud oracle.
    pub fn transfer_request(&self, request: &TransferRequest) -> LedgerResult<TransferReceipt> {
        let amount = validate(request)?;
        let committed = self.move_funds(&request.sender_id, &request.receiver_id, amount)?;
        self.record_transfer(request, amount, committed)
    }

    /// [`transfer_request`](Self::transfer_request), re-run while it fails
    /// with a retryable error, up to `max_transfer_attempts` times.
    pub fn transfer_with_retry(&self, request: &TransferRequest) -> LedgerResult<TransferReceipt> {
        let max_attempts = self.config.max_transfer_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.transfer_request(request) {
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    debug!(attempt, max_attempts, error = %e, "retrying transfer");
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// Steps 2 to 5: read, check funds, CAS both balances.
    fn move_funds(
        &self,
        sender_id: &str,
        receiver_id: &str,
        amount: Decimal,
    ) -> LedgerResult<Committed> {
        let sender_before = self
            .accounts
            .balance(sender_id)?
            .ok_or_else(|| LedgerError::not_found("account", sender_id))?;
        let receiver_before = self
            .accounts
            .balance(receiver_id)?
            .ok_or_else(|| LedgerError::not_found("account", receiver_id))?;

        if sender_before < amount {
            return Err(LedgerError::InsufficientFunds {
                balance: sender_before,
                requested: amount,
            });
        }

        let sender_after = sender_before - amount;
        if !self
            .accounts
            .compare_and_set_balance(sender_id, sender_before, sender_after)?
        {
            debug!(account = sender_id, "sender CAS missed");
            return Err(LedgerError::ConcurrentUpdate {
                account: sender_id.to_string(),
            });
        }

        let receiver_after = receiver_before + amount;
        let credited = match self
            .accounts
            .compare_and_set_balance(receiver_id, receiver_before, receiver_after)
        {
            Ok(credited) => credited,
            Err(e) => {
                self.compensate(sender_id, amount)?;
                return Err(e.into());
            }
        };
        if !credited {
            warn!(account = receiver_id, "receiver CAS missed, compensating sender");
            self.compensate(sender_id, amount)?;
            return Err(LedgerError::ConcurrentUpdate {
                account: receiver_id.to_string(),
            });
        }

        Ok(Committed {
            sender_before,
            sender_after,
            receiver_before,
            receiver_after,
        })
    }

    /// Apply `amount` (negative for a debit) to `account` to undo part of
    /// a half-applied transfer or reversal.
    ///
    /// Refuses to take the account below zero: money already spent can't
    /// be clawed back, and that is reported as `CompensationFailed`.
    pub(super) fn compensate(&self, account: &str, amount: Decimal) -> LedgerResult<()> {
        for attempt in 1..=COMPENSATION_MAX_ATTEMPTS {
            let current = self
                .accounts
                .balance(account)?
                .ok_or_else(|| LedgerError::not_found("account", account))?;
            let adjusted = current + amount;
            if adjusted < Decimal::ZERO {
                error!(account, %amount, %current, "compensation would overdraw account");
                break;
            }
            if self
                .accounts
                .compare_and_set_balance(account, current, adjusted)?
            {
                info!(account, %amount, attempt, "compensating adjustment applied");
                return Ok(());
            }
        }
        error!(account, %amount, "compensating adjustment gave up");
        Err(LedgerError::CompensationFailed {
            account: account.to_string(),
            amount,
        })
    }

    /// Undo both balance moves of a transfer whose rows never landed.
    fn unwind(&self, request: &TransferRequest, amount: Decimal) -> LedgerResult<()> {
        self.compensate(&request.receiver_id, -amount)?;
        self.compensate(&request.sender_id, amount)
    }

    /// Step 6: build, audit and persist the record and log.
    fn record_transfer(
        &self,
        request: &TransferRequest,
        amount: Decimal,
        committed: Committed,
    ) -> LedgerResult<TransferReceipt> {
        let now = Utc::now();
        let crypto = &self.crypto;

        let features = TransactionFeatures::build(&request.card, amount, committed.sender_before);
        let verdict = self.oracle.classify(&features);

        let mut record_degraded = Vec::new();
        let amount_ciphertext = match crypto.paillier.encrypt_amount(amount) {
            Ok(c) => c.to_string(),
            Err(e) => {
                record_degraded.push(CryptoDegraded::new(AuditStep::Encrypt, e.to_string()));
                String::new()
            }
        };

        let mut record = TransactionRecord {
            id: Uuid::new_v4(),
            sender_id: request.sender_id.clone(),
            receiver_id: request.receiver_id.clone(),
            amount,
            amount_ciphertext,
            sender_token: crypto.tokenizer.token_for(&request.sender_id),
            receiver_token: crypto.tokenizer.token_for(&request.receiver_id),
            sender_balance_after: committed.sender_after,
            card_type: request.card.card_type.clone(),
            card_expiry: request.card.expiry.clone(),
            fraud_status: verdict,
            created_at: now,
            audit: AuditFields::default(),
            degraded: record_degraded,
        };
        let outcome = crypto.auditor.stamp(&record.audit_payload());
        record.audit = outcome.fields;
        record.degraded.extend(outcome.degraded);

        let mut log = TransactionLog {
            id: Uuid::new_v4(),
            transaction_id: record.id,
            sender_id: request.sender_id.clone(),
            receiver_id: request.receiver_id.clone(),
            amount,
            sender_balance_before: committed.sender_before,
            sender_balance_after: committed.sender_after,
            receiver_balance_before: committed.receiver_before,
            receiver_balance_after: committed.receiver_after,
            card_type: request.card.card_type.clone(),
            card_expiry: request.card.expiry.clone(),
            fraud_flagged: verdict.is_fraudulent(),
            status: LogStatus::Completed,
            can_undo: true,
            undone_by: None,
            undone_at: None,
            timestamp: now,
            audit: AuditFields::default(),
            degraded: Vec::new(),
        };
        let outcome = crypto.auditor.stamp(&log.audit_payload());
        log.audit = outcome.fields;
        log.degraded = outcome.degraded;

        if let Err(e) = self.records.insert_transfer(&record, &log) {
            error!(
                transaction = %record.id,
                error = %e,
                "persisting transfer failed, moving balances back"
            );
            self.unwind(request, amount)?;
            return Err(e.into());
        }

        info!(
            transaction = %record.id,
            log = %log.id,
            sender = %record.sender_id,
            receiver = %record.receiver_id,
            %amount,
            fraud = %verdict,
            degraded = record.degraded.len() + log.degraded.len(),
            "transfer committed"
        );

        Ok(TransferReceipt { record, log })
    }
}

/// Step 1. Returns the amount normalised to two decimal places.
fn validate(request: &TransferRequest) -> LedgerResult<Decimal> {
    let invalid = |msg: String| Err(LedgerError::Validation(msg));

    if request.sender_id.trim().is_empty() || request.receiver_id.trim().is_empty() {
        return invalid("sender and receiver ids must not be empty".into());
    }
    if request.sender_id == request.receiver_id {
        return invalid("cannot transfer to self".into());
    }
    if request.amount <= Decimal::ZERO {
        return invalid(format!("amount must be positive, got {}", request.amount));
    }
    match to_minor_units(request.amount) {
        Some(cents) => Ok(from_minor_units(cents)),
        None => invalid(format!(
            "amount must be a whole number of cents, got {}",
            request.amount
        )),
    }
}
