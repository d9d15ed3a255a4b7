//! # Probable-Prime Generation
//!
//! Miller–Rabin over `num_bigint::BigUint`, plus the candidate loop used to
//! draw Paillier primes.
//!
//! Each Miller–Rabin round with a uniformly random witness catches a
//! composite with probability at least 3/4, so `rounds` independent rounds
//! bound the false-positive rate by 4^-rounds. Candidates first go through
//! trial division by small primes, which throws out the vast majority of
//! composites for the price of a few word-sized remainders.

use num_bigint::{BigUint, RandBigInt};
use num_integer::Integer;
use num_traits::{One, ToPrimitive, Zero};
use rand::{CryptoRng, Rng};

/// Small primes for trial division. Cheap filter before the expensive test.
const SMALL_PRIMES: [u32; 54] = [
    2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89,
    97, 101, 103, 107, 109, 113, 127, 131, 137, 139, 149, 151, 157, 163, 167, 173, 179, 181, 191,
    193, 197, 199, 211, 223, 227, 229, 233, 239, 241, 251,
];

/// Miller–Rabin probable-prime test with `rounds` random witnesses.
///
/// Returns `false` for every composite except with probability ≤ 4^-rounds,
/// and `true` for every prime.
pub fn is_probable_prime<R: Rng + CryptoRng + ?Sized>(
    n: &BigUint,
    rounds: u32,
    rng: &mut R,
) -> bool {
    let two = BigUint::from(2u32);
    if *n < two {
        return false;
    }

    for &p in SMALL_PRIMES.iter() {
        let p = BigUint::from(p);
        if *n == p {
            return true;
        }
        if (n % &p).is_zero() {
            return false;
        }
    }

    // n - 1 = d * 2^s with d odd.
    let n_minus_one = n - 1u32;
    let s = n_minus_one.trailing_zeros().unwrap_or(0);
    let d = &n_minus_one >> s;

    // Witnesses are drawn from [2, n - 2]. n > 251 here, so the range is
    // never empty.
    'witness: for _ in 0..rounds {
        let a = rng.gen_biguint_range(&two, &n_minus_one);
        let mut x = a.modpow(&d, n);
        if x.is_one() || x == n_minus_one {
            continue;
        }
        for _ in 1..s {
            x = x.modpow(&two, n);
            if x == n_minus_one {
                continue 'witness;
            }
            if x.is_one() {
                return false;
            }
        }
        return false;
    }

    true
}

/// Draw a random probable prime of exactly `bits` bits.
///
/// The top bit is forced so the product of two such primes has the full
/// modulus length; the bottom bit is forced so we never waste a test on an
/// even number.
pub fn generate_prime<R: Rng + CryptoRng + ?Sized>(bits: u64, rounds: u32, rng: &mut R) -> BigUint {
    debug_assert!(bits >= 2, "a prime needs at least two bits");
    loop {
        let mut candidate = rng.gen_biguint(bits);
        candidate.set_bit(bits - 1, true);
        candidate.set_bit(0, true);
        if is_probable_prime(&candidate, rounds, rng) {
            return candidate;
        }
    }
}

/// Extended-Euclid modular inverse of `a` modulo `m`, if it exists.
pub fn mod_inverse(a: &BigUint, m: &BigUint) -> Option<BigUint> {
    use num_bigint::BigInt;

    if m.is_zero() {
        return None;
    }
    let m_int = BigInt::from(m.clone());
    let (mut old_r, mut r) = (BigInt::from(a % m), m_int.clone());
    let (mut old_s, mut s) = (BigInt::one(), BigInt::zero());

    while !r.is_zero() {
        let q = old_r.div_floor(&r);
        let next_r = &old_r - &q * &r;
        old_r = std::mem::replace(&mut r, next_r);
        let next_s = &old_s - &q * &s;
        old_s = std::mem::replace(&mut s, next_s);
    }

    if !old_r.is_one() {
        return None;
    }
    old_s.mod_floor(&m_int).to_biguint()
}

/// Cheap sanity check used when validating loaded keys: rejects numbers
/// small enough to fit in a machine word.
pub(crate) fn is_toy_sized(n: &BigUint) -> bool {
    n.to_u64().is_some()
}
