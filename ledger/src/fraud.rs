//! # Fraud Oracle Seam
//!
//! The ledger doesn't score fraud itself. It builds a [`TransactionFeatures`]
//! vector for every committed transfer, hands it to whatever
//! [`FraudOracle`] it was given, and stores the verdict label on the record
//! and the `fraud_flagged` bit on the log. The verdict never blocks a
//! transfer; it is evidence for whoever reviews the log later.
//!
//! Two oracles ship with the crate:
//!
//! - [`RuleBasedOracle`]: a few transparent rules (expired card, transfer
//!   that drains most of the balance). Good enough for a devnet and easy
//!   to reason about in tests.
//! - [`FixedOracle`]: always answers the same thing. Tests only, mostly.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::CARD_SOON_EXPIRY_MONTHS;

/// The oracle's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FraudVerdict {
    Fraudulent,
    Legit,
}

impl FraudVerdict {
    pub fn is_fraudulent(self) -> bool {
        matches!(self, FraudVerdict::Fraudulent)
    }
}

impl fmt::Display for FraudVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FraudVerdict::Fraudulent => "Fraudulent",
            FraudVerdict::Legit => "Legit",
        })
    }
}

/// Optional card and customer details that ride along with a transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardDetails {
    pub customer_age: Option<u32>,
    /// Card network, e.g. `"Visa"`. Compared case-insensitively.
    pub card_type: Option<String>,
    /// Card expiry as `MM/YY`.
    pub expiry: Option<String>,
}

/// Months between `today` and an `MM/YY` card expiry.
///
/// Negative once the card has expired. Unparseable input yields `None`.
pub fn months_until_expiry(expiry: &str, today: NaiveDate) -> Option<i32> {
    let (month, year) = expiry.trim().split_once('/')?;
    let month = u32::from_str(month.trim()).ok()?;
    let year = i32::from_str(year.trim()).ok()?;
    if !(1..=12).contains(&month) || !(0..=99).contains(&year) {
        return None;
    }
    let year = 2000 + year;
    Some((year - today.year()) * 12 + (month as i32 - today.month() as i32))
}

/// What the oracle gets to look at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionFeatures {
    pub customer_age: Option<u32>,
    pub amount: Decimal,
    /// Sender balance before the transfer.
    pub account_balance: Decimal,
    pub card_type: Option<String>,
    /// Zero when no expiry was supplied or it didn't parse.
    pub months_until_expiry: i32,
    pub is_expired: bool,
    pub is_soon_expiry: bool,
}

impl TransactionFeatures {
    /// Build features as of today (UTC).
    pub fn build(card: &CardDetails, amount: Decimal, account_balance: Decimal) -> Self {
        Self::build_at(card, amount, account_balance, Utc::now().date_naive())
    }

    /// Build features relative to an explicit date.
    pub fn build_at(
        card: &CardDetails,
        amount: Decimal,
        account_balance: Decimal,
        today: NaiveDate,
    ) -> Self {
        let months = card
            .expiry
            .as_deref()
            .and_then(|e| months_until_expiry(e, today))
            .unwrap_or(0);

        Self {
            customer_age: card.customer_age,
            amount,
            account_balance,
            card_type: card.card_type.as_ref().map(|t| t.trim().to_ascii_lowercase()),
            months_until_expiry: months,
            is_expired: months < 0,
            is_soon_expiry: (0..=CARD_SOON_EXPIRY_MONTHS).contains(&months),
        }
    }
}

/// Classifies a transfer.
pub trait FraudOracle: Send + Sync {
    fn classify(&self, features: &TransactionFeatures) -> FraudVerdict;
}

/// Transparent rules: an expired card, or a transfer of at least
/// `drain_ratio` of the sender's balance, is fraudulent.
#[derive(Debug, Clone)]
pub struct RuleBasedOracle {
    pub drain_ratio: Decimal,
}

impl Default for RuleBasedOracle {
    fn default() -> Self {
        Self {
            drain_ratio: Decimal::new(95, 2),
        }
    }
}

impl FraudOracle for RuleBasedOracle {
    fn classify(&self, f: &TransactionFeatures) -> FraudVerdict {
        if f.is_expired {
            return FraudVerdict::Fraudulent;
        }
        if f.account_balance > Decimal::ZERO && f.amount >= f.account_balance * self.drain_ratio {
            return FraudVerdict::Fraudulent;
        }
        FraudVerdict::Legit
    }
}

/// Always returns the same verdict.
#[derive(Debug, Clone, Copy)]
pub struct FixedOracle(pub FraudVerdict);

impl FraudOracle for FixedOracle {
    fn classify(&self, _features: &TransactionFeatures) -> FraudVerdict {
        self.0
    }
}
