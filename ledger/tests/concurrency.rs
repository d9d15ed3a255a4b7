//! Races on the transfer and reversal paths, staged deterministically.
//!
//! The [`Interleaved`](common::Interleaved) store runs a hook at an exact
//! point inside an operation, so "concurrent" here means "a second writer
//! got in between this read and this write", every time.

mod common;

use std::sync::Arc;
use std::thread;

use common::{dec, interleaved_ledger, ledger};
use safepay_ledger::ledger::types::TransferRequest;
use safepay_ledger::LedgerError;

#[test]
fn racing_debits_one_winner() {
    let (ledger, accounts, bystander) = interleaved_ledger();

    // Between our read of alice and our CAS on alice, someone else debits
    // her.
    let rival = bystander.clone();
    accounts.before_cas_on("alice", move || {
        rival.transfer("alice", "carol", dec("300")).unwrap();
    });

    let err = ledger.transfer("alice", "bob", dec("500")).unwrap_err();
    assert!(matches!(err, LedgerError::ConcurrentUpdate { ref account } if account == "alice"));
    assert!(err.is_retryable());

    // Exactly one debit landed, and only the winner left records behind.
    assert_eq!(bystander.balance("alice").unwrap(), dec("49700.00"));
    assert_eq!(bystander.balance("bob").unwrap(), dec("50000.00"));
    assert_eq!(bystander.balance("carol").unwrap(), dec("50300.00"));
    assert_eq!(bystander.logs(10).unwrap().len(), 1);
}

#[test]
fn retry_recovers_from_a_lost_race() {
    let (ledger, accounts, bystander) = interleaved_ledger();
    let rival = bystander.clone();
    accounts.before_cas_on("alice", move || {
        rival.transfer("alice", "carol", dec("300")).unwrap();
    });

    let receipt = ledger
        .transfer_with_retry(&TransferRequest::new("alice", "bob", dec("500")))
        .unwrap();
    assert_eq!(receipt.log.sender_balance_before, dec("49700.00"));
    assert_eq!(bystander.balance("alice").unwrap(), dec("49200.00"));
    assert_eq!(bystander.balance("bob").unwrap(), dec("50500.00"));
}

#[test]
fn retry_gives_up_after_max_attempts() {
    let (ledger, accounts, bystander) = interleaved_ledger();
    let attempts = ledger.config().max_transfer_attempts as usize;
    accounts.force_cas_miss("alice", attempts);

    let err = ledger
        .transfer_with_retry(&TransferRequest::new("alice", "bob", dec("1")))
        .unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(bystander.balance("alice").unwrap(), dec("50000.00"));
    assert!(bystander.logs(10).unwrap().is_empty());
}

#[test]
fn receiver_cas_miss_restores_sender() {
    let (ledger, accounts, bystander) = interleaved_ledger();
    accounts.force_cas_miss("bob", 1);

    let err = ledger.transfer("alice", "bob", dec("1000")).unwrap_err();
    assert!(matches!(err, LedgerError::ConcurrentUpdate { ref account } if account == "bob"));

    assert_eq!(bystander.balance("alice").unwrap(), dec("50000.00"));
    assert_eq!(bystander.balance("bob").unwrap(), dec("50000.00"));
    assert!(bystander.logs(10).unwrap().is_empty());
    assert!(bystander.transactions_sent_by("alice").unwrap().is_empty());
}

#[test]
fn compensation_preserves_a_concurrent_credit() {
    let (ledger, accounts, bystander) = interleaved_ledger();

    // While our transfer sits between its two CASes, carol pays both alice
    // and bob. Our receiver CAS misses, and the compensating credit to
    // alice must land on top of carol's payment, not over it.
    let rival = bystander.clone();
    accounts.before_cas_on("bob", move || {
        rival.transfer("carol", "alice", dec("10")).unwrap();
        rival.transfer("carol", "bob", dec("20")).unwrap();
    });

    let err = ledger.transfer("alice", "bob", dec("1000")).unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(bystander.balance("alice").unwrap(), dec("50010.00"));
    assert_eq!(bystander.balance("bob").unwrap(), dec("50020.00"));
    assert_eq!(bystander.balance("carol").unwrap(), dec("49970.00"));
}

#[test]
fn compensation_retries_its_own_cas() {
    let (ledger, accounts, bystander) = interleaved_ledger();
    accounts.force_cas_miss("bob", 1);
    // The sender CAS consumes the first "alice" hook slot; the second
    // fires before the first compensation attempt.
    accounts.before_cas_on("alice", || {});
    let rival = bystander.clone();
    accounts.before_cas_on("alice", move || {
        rival.transfer("carol", "alice", dec("5")).unwrap();
    });

    ledger.transfer("alice", "bob", dec("100")).unwrap_err();
    assert_eq!(bystander.balance("alice").unwrap(), dec("50005.00"));
    assert_eq!(bystander.balance("bob").unwrap(), dec("50000.00"));
}

#[test]
fn compensation_that_never_lands_is_reported() {
    let (ledger, accounts, bystander) = interleaved_ledger();

    // Let the sender CAS through, then make bob's CAS and every later CAS
    // on alice miss.
    let arm = accounts.clone();
    accounts.before_cas_on("bob", move || {
        arm.force_cas_miss("bob", 1);
        arm.force_cas_miss("alice", usize::MAX);
    });

    let err = ledger.transfer("alice", "bob", dec("100")).unwrap_err();
    assert!(matches!(
        err,
        LedgerError::CompensationFailed { ref account, amount }
            if account == "alice" && amount == dec("100.00")
    ));
    assert!(!err.is_retryable());
    assert_eq!(bystander.balance("alice").unwrap(), dec("49900.00"));
    assert_eq!(bystander.balance("bob").unwrap(), dec("50000.00"));
}

#[test]
fn racing_reversals_apply_once() {
    let (ledger, accounts, bystander) = interleaved_ledger();
    let receipt = bystander.transfer("alice", "bob", dec("1000")).unwrap();
    let log_id = receipt.log.id;

    // Our reversal has claimed the log and is about to write bob when a
    // second reversal of the same log arrives.
    let rival = bystander.clone();
    accounts.before_put_on("bob", move || {
        let err = rival.reverse(log_id, "rival").unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyUndone(id) if id == log_id));
    });

    let outcome = ledger.reverse(log_id, "admin").unwrap();
    assert_eq!(outcome.log.undone_by.as_deref(), Some("admin"));
    assert_eq!(bystander.balance("alice").unwrap(), dec("50000.00"));
    assert_eq!(bystander.balance("bob").unwrap(), dec("50000.00"));
    assert_eq!(bystander.notifications_for("bob", false).unwrap().len(), 1);
}

/// Reversal writes are not CAS-guarded. A transfer that lands between the
/// reversal's read and its writes is silently overwritten. This pins the
/// limitation down so any change to it is deliberate.
#[test]
fn reversal_can_clobber_an_interleaved_transfer() {
    let (ledger, accounts, bystander) = interleaved_ledger();
    let receipt = bystander.transfer("alice", "bob", dec("1000")).unwrap();

    let rival = bystander.clone();
    accounts.before_put_on("bob", move || {
        rival.transfer("carol", "bob", dec("200")).unwrap();
    });

    let outcome = ledger.reverse(receipt.log.id, "admin").unwrap();
    assert_eq!(outcome.receiver_balance, dec("50000.00"));

    // Carol paid 200, bob doesn't have it: the lost update.
    assert_eq!(bystander.balance("carol").unwrap(), dec("49800.00"));
    assert_eq!(bystander.balance("bob").unwrap(), dec("50000.00"));
    let total: rust_decimal::Decimal = bystander
        .accounts()
        .unwrap()
        .iter()
        .map(|a| a.balance)
        .sum();
    assert_eq!(total, dec("149800.00"));
}

#[test]
fn threaded_transfers_conserve_money() {
    let (ledger, _) = ledger();
    let ledger = Arc::new(ledger);

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let ledger = Arc::clone(&ledger);
            thread::spawn(move || {
                let (from, to) = if i % 2 == 0 { ("alice", "bob") } else { ("bob", "alice") };
                let mut ok = 0;
                for _ in 0..10 {
                    match ledger.transfer_with_retry(&TransferRequest::new(from, to, dec("1.00"))) {
                        Ok(_) => ok += 1,
                        Err(e) => assert!(e.is_retryable(), "{e}"),
                    }
                }
                ok
            })
        })
        .collect();
    let committed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

    let alice = ledger.balance("alice").unwrap();
    let bob = ledger.balance("bob").unwrap();
    assert_eq!(alice + bob, dec("100000.00"));
    assert_eq!(ledger.logs(1000).unwrap().len(), committed);
}
