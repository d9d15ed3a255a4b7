//! # Paillier Homomorphic Encryption
//!
//! Transaction amounts are stored encrypted under a Paillier key so that
//! they can be *summed without being decrypted*. Multiply two ciphertexts
//! and you get an encryption of the sum of their plaintexts. That's the
//! whole reason this scheme is here rather than plain AES.
//!
//! ## The scheme
//!
//! ```text
//! keygen:   p, q random primes (bits/2 each), n = p·q, g = n + 1
//!           λ = lcm(p-1, q-1),  μ = L(g^λ mod n²)^-1 mod n
//!           where L(u) = (u - 1) / n
//! encrypt:  c = g^m · r^n mod n²          (fresh random r, gcd(r, n) = 1)
//! decrypt:  m = L(c^λ mod n²) · μ mod n
//! add:      E(m1) · E(m2) mod n²  = E(m1 + m2 mod n)
//! add k:    E(m) · g^k mod n²     = E(m + k mod n)
//! ```
//!
//! Encryption is randomized: encrypting the same amount twice yields two
//! different ciphertexts (with overwhelming probability). That's semantic
//! security, and tests assert on it.
//!
//! ## Lifecycle
//!
//! One keypair per process. [`PaillierKeypair::generate_or_load`] either
//! loads and validates the persisted key from a [`KeyStore`] or generates
//! and persists a fresh one. The keypair is immutable afterwards and is
//! handed to the ledger explicitly. There is no global instance.

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use num_bigint::{BigUint, RandBigInt};
use num_integer::Integer;
use num_traits::{One, ToPrimitive, Zero};
use rand::rngs::OsRng;
use rand::{CryptoRng, Rng};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use super::prime::{generate_prime, is_toy_sized, mod_inverse};
use crate::config::MIN_PAILLIER_KEY_BITS;
use crate::money::{from_minor_units, to_minor_units};
use crate::storage::keystore::{KeySlot, KeyStore, KeyStoreError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised by the homomorphic engine.
#[derive(Debug, Error)]
pub enum PaillierError {
    /// Plaintext outside `[0, n)`. This is the engine's range error.
    #[error("plaintext out of range: must satisfy 0 <= m < n")]
    OutOfRange,

    /// Ciphertext is zero or not below `n²`.
    #[error("ciphertext out of range: must satisfy 0 < c < n^2")]
    InvalidCiphertext,

    /// Persisted key material failed to parse or validate.
    #[error("stored Paillier key is invalid: {0}")]
    InvalidStoredKey(String),

    /// `p` and `q` can't form a key (equal, too small, or `gcd(λ, n) ≠ 1`).
    #[error("primes do not form a valid Paillier key")]
    InvalidPrimes,

    /// Requested modulus size is too small or odd.
    #[error("unsupported Paillier key size: {0} bits")]
    WeakKeySize(u64),

    /// The key store backend failed.
    #[error("key store error: {0}")]
    KeyStore(#[from] KeyStoreError),
}

pub type PaillierResult<T> = Result<T, PaillierError>;

// ---------------------------------------------------------------------------
// Ciphertext
// ---------------------------------------------------------------------------

/// A Paillier ciphertext, an integer in `(0, n²)`.
///
/// Rendered as a base-10 string when stored on a record. That's the format
/// downstream aggregation jobs parse.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Ciphertext(BigUint);

impl Ciphertext {
    /// The multiplicative identity, a valid encryption of zero. Handy as the
    /// seed of a homomorphic fold.
    pub fn identity() -> Self {
        Self(BigUint::one())
    }

    pub fn from_biguint(value: BigUint) -> Self {
        Self(value)
    }

    pub fn as_biguint(&self) -> &BigUint {
        &self.0
    }
}

impl fmt::Display for Ciphertext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Ciphertext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.0.to_str_radix(16);
        if s.len() > 16 {
            write!(f, "Ciphertext(0x{}…, {} bits)", &s[..16], self.0.bits())
        } else {
            write!(f, "Ciphertext(0x{})", s)
        }
    }
}

impl FromStr for Ciphertext {
    type Err = PaillierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BigUint::parse_bytes(s.trim().as_bytes(), 10)
            .map(Self)
            .ok_or(PaillierError::InvalidCiphertext)
    }
}

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// Public half: `(n, g)`. Anyone holding this can encrypt and add.
#[derive(Clone, PartialEq, Eq)]
pub struct PaillierPublicKey {
    n: BigUint,
    g: BigUint,
    n_squared: BigUint,
}

/// Private half: `(λ, μ, n)`. Needed only to decrypt.
#[derive(Clone, PartialEq, Eq)]
pub struct PaillierPrivateKey {
    lambda: BigUint,
    mu: BigUint,
    n: BigUint,
}

/// The process-wide Paillier keypair.
#[derive(Clone, PartialEq, Eq)]
pub struct PaillierKeypair {
    public: PaillierPublicKey,
    private: PaillierPrivateKey,
}

/// On-disk form of the public key. Integers are `0x`-prefixed hex.
#[derive(Debug, Serialize, Deserialize)]
struct PublicKeyFile {
    n: String,
    g: String,
}

/// On-disk form of the private key.
#[derive(Debug, Serialize, Deserialize)]
struct PrivateKeyFile {
    lambda: String,
    mu: String,
    n: String,
}

fn to_hex(v: &BigUint) -> String {
    format!("0x{}", v.to_str_radix(16))
}

fn from_hex(field: &str, s: &str) -> PaillierResult<BigUint> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    BigUint::parse_bytes(digits.as_bytes(), 16)
        .ok_or_else(|| PaillierError::InvalidStoredKey(format!("{field} is not a hex integer")))
}

/// `L(u) = (u - 1) / n`.
fn l_function(u: &BigUint, n: &BigUint) -> BigUint {
    (u - 1u32) / n
}

impl PaillierPublicKey {
    fn new(n: BigUint) -> Self {
        let g = &n + 1u32;
        let n_squared = &n * &n;
        Self { n, g, n_squared }
    }

    /// The modulus `n`. Plaintexts live in `[0, n)`.
    pub fn n(&self) -> &BigUint {
        &self.n
    }

    /// The generator `g` (always `n + 1` for keys made here).
    pub fn g(&self) -> &BigUint {
        &self.g
    }

    /// Modulus size in bits.
    pub fn bits(&self) -> u64 {
        self.n.bits()
    }

    /// Encrypt `m` with the OS RNG.
    pub fn encrypt(&self, m: &BigUint) -> PaillierResult<Ciphertext> {
        self.encrypt_with_rng(m, &mut OsRng)
    }

    /// Encrypt `m` using the supplied randomness source.
    ///
    /// `r` is drawn uniformly from `[1, n)` and redrawn until it is coprime
    /// to `n`. For a real key, hitting a non-coprime `r` means you just
    /// factored `n`, so the loop runs once in practice.
    pub fn encrypt_with_rng<R: Rng + CryptoRng + ?Sized>(
        &self,
        m: &BigUint,
        rng: &mut R,
    ) -> PaillierResult<Ciphertext> {
        if *m >= self.n {
            return Err(PaillierError::OutOfRange);
        }

        let r = loop {
            let candidate = rng.gen_biguint_below(&self.n);
            if !candidate.is_zero() && candidate.gcd(&self.n).is_one() {
                break candidate;
            }
        };

        let gm = self.g.modpow(m, &self.n_squared);
        let rn = r.modpow(&self.n, &self.n_squared);
        Ok(Ciphertext((gm * rn) % &self.n_squared))
    }

    /// Convenience wrapper for machine-word plaintexts such as amounts in
    /// minor units.
    pub fn encrypt_u64(&self, m: u64) -> PaillierResult<Ciphertext> {
        self.encrypt(&BigUint::from(m))
    }

    /// Encrypt a money amount as its value in minor units.
    ///
    /// Negative or sub-cent amounts have no plaintext and are out of range.
    pub fn encrypt_amount(&self, amount: Decimal) -> PaillierResult<Ciphertext> {
        let cents = to_minor_units(amount)
            .and_then(|c| u64::try_from(c).ok())
            .ok_or(PaillierError::OutOfRange)?;
        self.encrypt_u64(cents)
    }

    /// `E(m1) · E(m2) mod n²`, an encryption of `(m1 + m2) mod n`.
    pub fn add_ciphertexts(&self, c1: &Ciphertext, c2: &Ciphertext) -> Ciphertext {
        Ciphertext((&c1.0 * &c2.0) % &self.n_squared)
    }

    /// `E(m) · g^k mod n²`, an encryption of `(m + k) mod n`.
    pub fn add_plaintext(&self, c: &Ciphertext, k: &BigUint) -> Ciphertext {
        let gk = self.g.modpow(k, &self.n_squared);
        Ciphertext((&c.0 * gk) % &self.n_squared)
    }

    /// Checks that `c` is a plausible ciphertext for this key.
    pub fn check_ciphertext(&self, c: &Ciphertext) -> PaillierResult<()> {
        if c.0.is_zero() || c.0 >= self.n_squared {
            return Err(PaillierError::InvalidCiphertext);
        }
        Ok(())
    }
}

impl fmt::Debug for PaillierPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PaillierPublicKey({} bits)", self.bits())
    }
}

impl fmt::Debug for PaillierPrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PaillierPrivateKey(..)")
    }
}

impl fmt::Debug for PaillierKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PaillierKeypair({} bits)", self.public.bits())
    }
}

impl PaillierKeypair {
    /// Generate a fresh keypair with a modulus of `bits` bits.
    pub fn generate(bits: u64, rounds: u32) -> PaillierResult<Self> {
        Self::generate_with_rng(bits, rounds, &mut OsRng)
    }

    /// Generate with an explicit randomness source.
    pub fn generate_with_rng<R: Rng + CryptoRng + ?Sized>(
        bits: u64,
        rounds: u32,
        rng: &mut R,
    ) -> PaillierResult<Self> {
        if bits < MIN_PAILLIER_KEY_BITS || bits % 2 == 1 {
            return Err(PaillierError::WeakKeySize(bits));
        }

        let started = Instant::now();
        let half = bits / 2;
        let p = generate_prime(half, rounds, rng);
        let q = loop {
            let q = generate_prime(half, rounds, rng);
            if q != p {
                break q;
            }
        };

        let keypair = Self::from_primes(&p, &q)?;

        info!(
            bits = keypair.public.bits(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "generated Paillier keypair"
        );
        Ok(keypair)
    }

    /// Derive the full keypair from two distinct primes.
    ///
    /// Primality is the caller's problem. No size floor is applied here,
    /// which makes this the way to build tiny textbook keys in tests.
    pub fn from_primes(p: &BigUint, q: &BigUint) -> PaillierResult<Self> {
        let two = BigUint::from(2u32);
        if p == q || *p <= two || *q <= two {
            return Err(PaillierError::InvalidPrimes);
        }
        let n = p * q;
        let public = PaillierPublicKey::new(n.clone());
        let lambda = (p - 1u32).lcm(&(q - 1u32));
        let u = public.g.modpow(&lambda, &public.n_squared);
        let mu = mod_inverse(&l_function(&u, &n), &n).ok_or(PaillierError::InvalidPrimes)?;
        Ok(Self {
            public,
            private: PaillierPrivateKey { lambda, mu, n },
        })
    }

    /// Load the persisted keypair if there is one, otherwise generate and
    /// persist a new one.
    pub fn generate_or_load(store: &dyn KeyStore, bits: u64, rounds: u32) -> PaillierResult<Self> {
        if let Some(existing) = Self::load(store)? {
            debug!(bits = existing.public.bits(), "loaded Paillier keypair");
            return Ok(existing);
        }
        let keypair = Self::generate(bits, rounds)?;
        keypair.save(store)?;
        Ok(keypair)
    }

    /// Load and validate the persisted keypair.
    ///
    /// `Ok(None)` when neither half exists. Exactly one half present, or
    /// either half malformed, is `InvalidStoredKey`.
    pub fn load(store: &dyn KeyStore) -> PaillierResult<Option<Self>> {
        let public = store.load(KeySlot::PaillierPublic)?;
        let private = store.load(KeySlot::PaillierPrivate)?;

        let (public, private) = match (public, private) {
            (None, None) => return Ok(None),
            (Some(public), Some(private)) => (public, private),
            _ => {
                return Err(PaillierError::InvalidStoredKey(
                    "only one half of the keypair is stored".into(),
                ))
            }
        };

        let public: PublicKeyFile = serde_json::from_slice(&public)
            .map_err(|e| PaillierError::InvalidStoredKey(format!("public key: {e}")))?;
        let private: PrivateKeyFile = serde_json::from_slice(&private)
            .map_err(|e| PaillierError::InvalidStoredKey(format!("private key: {e}")))?;

        let n = from_hex("n", &public.n)?;
        let g = from_hex("g", &public.g)?;
        let n_squared = &n * &n;
        let keypair = Self {
            public: PaillierPublicKey { n, g, n_squared },
            private: PaillierPrivateKey {
                lambda: from_hex("lambda", &private.lambda)?,
                mu: from_hex("mu", &private.mu)?,
                n: from_hex("private n", &private.n)?,
            },
        };
        keypair.validate()?;
        Ok(Some(keypair))
    }

    /// Persist both halves into their separate slots.
    pub fn save(&self, store: &dyn KeyStore) -> PaillierResult<()> {
        let public = PublicKeyFile {
            n: to_hex(&self.public.n),
            g: to_hex(&self.public.g),
        };
        let private = PrivateKeyFile {
            lambda: to_hex(&self.private.lambda),
            mu: to_hex(&self.private.mu),
            n: to_hex(&self.private.n),
        };
        // Serializing a struct of strings can't fail.
        let public = serde_json::to_vec(&public).unwrap_or_default();
        let private = serde_json::to_vec(&private).unwrap_or_default();

        store.save(KeySlot::PaillierPublic, &public)?;
        store.save(KeySlot::PaillierPrivate, &private)?;
        Ok(())
    }

    /// Structural and algebraic consistency checks on a keypair.
    pub fn validate(&self) -> PaillierResult<()> {
        let invalid = |msg: &str| Err(PaillierError::InvalidStoredKey(msg.to_string()));
        let n = &self.public.n;

        if is_toy_sized(n) || n.is_even() {
            return invalid("modulus is too small or even");
        }
        if self.public.g != n + 1u32 {
            return invalid("g must equal n + 1");
        }
        if self.private.n != *n {
            return invalid("public and private moduli differ");
        }
        if self.private.lambda.is_zero() || self.private.mu.is_zero() || self.private.mu >= *n {
            return invalid("lambda or mu out of range");
        }

        let u = self.public.g.modpow(&self.private.lambda, &self.public.n_squared);
        if !((l_function(&u, n) * &self.private.mu) % n).is_one() {
            return invalid("mu is not the inverse of L(g^lambda mod n^2)");
        }
        Ok(())
    }

    pub fn public_key(&self) -> &PaillierPublicKey {
        &self.public
    }

    /// Encrypt `m`, requiring `0 <= m < n`.
    pub fn encrypt(&self, m: &BigUint) -> PaillierResult<Ciphertext> {
        self.public.encrypt(m)
    }

    pub fn encrypt_u64(&self, m: u64) -> PaillierResult<Ciphertext> {
        self.public.encrypt_u64(m)
    }

    pub fn encrypt_amount(&self, amount: Decimal) -> PaillierResult<Ciphertext> {
        self.public.encrypt_amount(amount)
    }

    /// Decrypt a ciphertext produced by [`encrypt_amount`](Self::encrypt_amount)
    /// (or a homomorphic sum of them) back into currency units.
    pub fn decrypt_amount(&self, c: &Ciphertext) -> PaillierResult<Decimal> {
        let cents = self
            .decrypt(c)?
            .to_i64()
            .ok_or(PaillierError::OutOfRange)?;
        Ok(from_minor_units(cents))
    }

    /// Recover the plaintext: `L(c^λ mod n²) · μ mod n`.
    pub fn decrypt(&self, c: &Ciphertext) -> PaillierResult<BigUint> {
        self.public.check_ciphertext(c)?;
        let n = &self.private.n;
        let u = c.0.modpow(&self.private.lambda, &self.public.n_squared);
        Ok((l_function(&u, n) * &self.private.mu) % n)
    }

    pub fn add_ciphertexts(&self, c1: &Ciphertext, c2: &Ciphertext) -> Ciphertext {
        self.public.add_ciphertexts(c1, c2)
    }

    pub fn add_plaintext(&self, c: &Ciphertext, k: &BigUint) -> Ciphertext {
        self.public.add_plaintext(c, k)
    }
}
