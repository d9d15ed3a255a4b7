// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # SafePay Ledger Core Library
//!
//! An encrypted, reversible transaction ledger. Balances move between
//! accounts under optimistic concurrency; every transfer leaves behind a
//! record whose amount is Paillier-encrypted (so totals can be computed
//! without decrypting anything), whose parties are indexed by searchable
//! tokens, and whose contents are hashed and signed for tamper evidence.
//! Transfers can be reversed once, and both parties hear about it.
//!
//! ## Architecture
//!
//! - **crypto**: Paillier, Miller–Rabin, keyed tokens, SHA-256, Ed25519.
//! - **audit**: canonicalize, hash, sign, verify. Degrades, never fails.
//! - **ledger**: transfer, reversal, notifications, queries.
//! - **storage**: account/record/key store traits, sled and in-memory.
//! - **fraud**: feature extraction and the oracle seam.
//! - **money**: decimal amounts to integer cents and back.
//! - **config**: constants and `LedgerConfig`.
//! - **error**: the typed error taxonomy.
//!
//! ## Ground rules
//!
//! 1. Money is `Decimal` at the API and integer cents underneath.
//! 2. A failed crypto step never blocks a money movement. It gets recorded.
//! 3. A half-applied transfer is compensated before returning, or reported
//!    as `CompensationFailed` when the credit can't land.
//! 4. Keys are loaded once, passed explicitly, and never silently replaced.

pub mod audit;
pub mod config;
pub mod crypto;
pub mod error;
pub mod fraud;
pub mod ledger;
pub mod money;
pub mod storage;

pub use error::{LedgerError, LedgerResult};
pub use ledger::Ledger;
