//! # Ledger Configuration & Constants
//!
//! Every tunable number in the ledger lives here. Cryptographic sizes,
//! retry bounds, key file names. If you're hardcoding one of these somewhere
//! else, move it here first.
//!
//! [`LedgerConfig`] is the runtime view of these constants. It deserializes
//! from JSON with every field optional, so a config file only needs to name
//! the values it wants to override.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Paillier Parameters
// ---------------------------------------------------------------------------

/// Default modulus size for freshly generated Paillier keys.
///
/// `n` is the product of two primes of half this size. 2048 bits is the
/// usual floor for production RSA-style moduli; devnet can go lower via
/// config when key generation time matters more than security.
pub const DEFAULT_PAILLIER_KEY_BITS: u64 = 2048;

/// Smallest modulus we agree to generate. Anything below this is a toy,
/// and the amount space (`0 <= m < n`) stops being comfortably large.
pub const MIN_PAILLIER_KEY_BITS: u64 = 128;

/// Default number of Miller–Rabin rounds per prime candidate.
/// False-positive probability is bounded by 4^-rounds, so 40 rounds puts
/// it at 2^-80.
pub const DEFAULT_MILLER_RABIN_ROUNDS: u32 = 40;

/// Lower bound for configured Miller–Rabin rounds.
pub const MIN_MILLER_RABIN_ROUNDS: u32 = 8;

// ---------------------------------------------------------------------------
// Searchable Tokens & Signing
// ---------------------------------------------------------------------------

/// Length of the searchable-token key in bytes (256 bits).
pub const SEARCH_KEY_LENGTH: usize = 32;

/// Length of a hex-encoded searchable token (BLAKE3 output, 32 bytes).
pub const TOKEN_HEX_LENGTH: usize = 64;

/// Ed25519 seed length in bytes.
pub const SIGNING_KEY_LENGTH: usize = 32;

/// Ed25519 signature length in bytes.
pub const SIGNATURE_LENGTH: usize = 64;

// ---------------------------------------------------------------------------
// Money
// ---------------------------------------------------------------------------

/// Decimal places carried by every balance and amount (cents).
pub const MONEY_SCALE: u32 = 2;

/// Multiplier from currency units to minor units.
pub const MINOR_UNITS_PER_UNIT: i64 = 100;

// ---------------------------------------------------------------------------
// Transfer Protocol
// ---------------------------------------------------------------------------

/// Attempts made by `transfer_with_retry` before surfacing the last
/// `ConcurrentUpdate` to the caller.
pub const DEFAULT_MAX_TRANSFER_ATTEMPTS: u32 = 3;

/// Bound on the CAS loop used to restore a sender after the receiver CAS
/// misses. The loop only spins while someone else is writing the same
/// account, so a small number is plenty.
pub const COMPENSATION_MAX_ATTEMPTS: u32 = 16;

/// Months-until-expiry at or below which a card counts as expiring soon.
pub const CARD_SOON_EXPIRY_MONTHS: i32 = 3;

// ---------------------------------------------------------------------------
// Key Files
// ---------------------------------------------------------------------------

/// File holding the Paillier public key `{n, g}`.
pub const PAILLIER_PUBLIC_KEY_FILE: &str = "paillier_pub.json";

/// File holding the Paillier private key `{lambda, mu, n}`.
pub const PAILLIER_PRIVATE_KEY_FILE: &str = "paillier_priv.json";

/// File holding the raw searchable-token key.
pub const SEARCH_KEY_FILE: &str = "search_key.bin";

/// File holding the raw Ed25519 audit signing seed.
pub const SIGNING_KEY_FILE: &str = "audit_signing.key";

// ---------------------------------------------------------------------------
// LedgerConfig
// ---------------------------------------------------------------------------

/// Runtime configuration for the ledger and its crypto suite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Paillier modulus size in bits (must be even).
    pub paillier_key_bits: u64,

    /// Miller–Rabin rounds per prime candidate.
    pub miller_rabin_rounds: u32,

    /// Attempts for `transfer_with_retry`.
    pub max_transfer_attempts: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            paillier_key_bits: DEFAULT_PAILLIER_KEY_BITS,
            miller_rabin_rounds: DEFAULT_MILLER_RABIN_ROUNDS,
            max_transfer_attempts: DEFAULT_MAX_TRANSFER_ATTEMPTS,
        }
    }
}

impl LedgerConfig {
    /// Parses a JSON config document. Missing fields fall back to defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Clamps values that would make the ledger unsafe or useless.
    ///
    /// Odd key sizes are rounded up, sub-minimum sizes and round counts are
    /// raised to their floors, and at least one transfer attempt is allowed.
    pub fn normalized(mut self) -> Self {
        self.paillier_key_bits = self.paillier_key_bits.max(MIN_PAILLIER_KEY_BITS);
        if self.paillier_key_bits % 2 == 1 {
            self.paillier_key_bits += 1;
        }
        self.miller_rabin_rounds = self.miller_rabin_rounds.max(MIN_MILLER_RABIN_ROUNDS);
        self.max_transfer_attempts = self.max_transfer_attempts.max(1);
        self
    }
}
