//! Crypto failures after the balances moved: the transfer commits, the
//! affected columns are left empty, and the row says which step degraded.

mod common;

use std::sync::Arc;

use num_bigint::BigUint;

use common::{dec, legit, paillier, seed, suite_with};
use safepay_ledger::audit::{AuditPipeline, AuditStep};
use safepay_ledger::crypto::keys::AuditKeypair;
use safepay_ledger::crypto::paillier::PaillierKeypair;
use safepay_ledger::crypto::signatures::{Ed25519Signer, SigningError, SigningService};
use safepay_ledger::crypto::CryptoSuite;
use safepay_ledger::storage::MemoryStore;
use safepay_ledger::Ledger;

struct BrokenSigner;

impl SigningService for BrokenSigner {
    fn sign(&self, _digest: &[u8]) -> Result<Vec<u8>, SigningError> {
        Err(SigningError::Unavailable("hsm offline".into()))
    }

    fn verify(&self, _digest: &[u8], _signature: &[u8]) -> Result<bool, SigningError> {
        Err(SigningError::Unavailable("hsm offline".into()))
    }
}

fn ledger_with(paillier: PaillierKeypair, signer: Arc<dyn SigningService>) -> Ledger {
    let store = Arc::new(MemoryStore::new());
    let ledger = Ledger::new(store.clone(), store, suite_with(paillier, signer), legit());
    seed(&ledger);
    ledger
}

/// n = 1009 * 1013, so anything above 10 221.16 has no plaintext.
fn tiny_paillier() -> PaillierKeypair {
    PaillierKeypair::from_primes(&BigUint::from(1009u32), &BigUint::from(1013u32)).unwrap()
}

fn ed25519() -> Arc<dyn SigningService> {
    Arc::new(Ed25519Signer::new(AuditKeypair::generate()))
}

#[test]
fn encryption_failure_still_commits() {
    let ledger = ledger_with(tiny_paillier(), ed25519());

    let receipt = ledger.transfer("alice", "bob", dec("20000.00")).unwrap();
    assert!(receipt.record.amount_ciphertext.is_empty());
    assert!(receipt.record.ciphertext().is_none());
    assert_eq!(receipt.record.degraded.len(), 1);
    assert_eq!(receipt.record.degraded[0].step, AuditStep::Encrypt);

    // Signing was unaffected.
    assert!(receipt.record.audit.verified);
    assert!(receipt.log.degraded.is_empty());
    assert!(ledger.verify_transaction(receipt.record.id).unwrap());

    assert_eq!(ledger.balance("alice").unwrap(), dec("30000.00"));
    assert_eq!(ledger.balance("bob").unwrap(), dec("70000.00"));

    // The degradation is persisted with the row.
    let stored = ledger.transaction(receipt.record.id).unwrap();
    assert_eq!(stored.degraded, receipt.record.degraded);
}

#[test]
fn encrypted_total_skips_degraded_rows() {
    let ledger = ledger_with(tiny_paillier(), ed25519());

    ledger.transfer("alice", "bob", dec("20000.00")).unwrap();
    ledger.transfer("alice", "carol", dec("5.00")).unwrap();
    ledger.transfer("alice", "bob", dec("12.34")).unwrap();

    let total = ledger.encrypted_total_sent("alice").unwrap();
    assert_eq!(total.aggregated, 2);
    assert_eq!(total.skipped, 1);
    assert_eq!(ledger.decrypt_total(&total).unwrap(), dec("17.34"));
}

#[test]
fn foreign_ciphertexts_are_skipped() {
    // Records encrypted under the shared test key, totalled under a tiny
    // one. Same tokenizer, so the reader finds the rows.
    let store = Arc::new(MemoryStore::new());
    let writer_suite = suite_with(paillier().clone(), ed25519());
    let writer = Ledger::new(store.clone(), store.clone(), writer_suite.clone(), legit());
    seed(&writer);
    writer.transfer("alice", "bob", dec("1.00")).unwrap();

    let reader_suite = Arc::new(CryptoSuite::new(
        tiny_paillier(),
        writer_suite.tokenizer.clone(),
        AuditPipeline::new(ed25519()),
    ));
    let reader = Ledger::new(store.clone(), store, reader_suite, legit());

    let total = reader.encrypted_total_sent("alice").unwrap();
    assert_eq!(total.aggregated, 0);
    assert_eq!(total.skipped, 1);
    assert_eq!(reader.decrypt_total(&total).unwrap(), dec("0.00"));
}

#[test]
fn signing_failure_still_commits() {
    let ledger = ledger_with(paillier().clone(), Arc::new(BrokenSigner));

    let receipt = ledger.transfer("alice", "bob", dec("250.00")).unwrap();
    let record = &receipt.record;
    assert!(!record.audit.hash.is_empty());
    assert!(record.audit.signature_hex.is_empty());
    assert!(!record.audit.verified);
    let steps: Vec<_> = record.degraded.iter().map(|d| d.step).collect();
    assert_eq!(steps, vec![AuditStep::Sign, AuditStep::Verify]);
    assert!(!record.amount_ciphertext.is_empty());

    assert!(receipt.log.audit.signature_hex.is_empty());
    assert!(!ledger.verify_transaction(record.id).unwrap());
    assert!(!ledger.verify_log(receipt.log.id).unwrap());
    assert_eq!(ledger.balance("bob").unwrap(), dec("50250.00"));
}

#[test]
fn reversal_proceeds_with_unsigned_notifications() {
    let ledger = ledger_with(paillier().clone(), Arc::new(BrokenSigner));
    let receipt = ledger.transfer("alice", "bob", dec("250.00")).unwrap();

    let outcome = ledger.reverse(receipt.log.id, "admin").unwrap();
    assert_eq!(outcome.sender_balance, dec("50000.00"));
    assert_eq!(outcome.notifications.len(), 2);
    for notification in &outcome.notifications {
        assert!(notification.audit.signature_hex.is_empty());
        assert!(notification
            .degraded
            .iter()
            .any(|d| d.step == AuditStep::Sign));
    }
}
