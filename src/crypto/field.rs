//! Prime Field Arithmetic
//!
//! All secret sharing math happens in GF(P) with `P = 2^256 - 189`, the
//! largest prime below 2^256. Any 256-bit private key smaller than `P` fits
//! without loss; values at or above `P` are rejected rather than truncated.
//!
//! Every operation returns a canonical residue in `[0, P)`. Subtraction and
//! negation never go through signed integers: they add `P` first and reduce
//! through [`modp`], so no intermediate is ever negative.

use crate::error::{RecoveryError, Result};
use num_bigint::BigUint;
use rand::{CryptoRng, RngCore};
use std::fmt;
use std::sync::OnceLock;

/// Byte width of a serialized field element
pub const FIELD_BYTES: usize = 32;

/// Distance of the prime below 2^256
const PRIME_OFFSET: u32 = 189;

/// The field prime `2^256 - 189`
pub fn prime() -> &'static BigUint {
    static PRIME: OnceLock<BigUint> = OnceLock::new();
    PRIME.get_or_init(|| (BigUint::from(1u32) << 256) - BigUint::from(PRIME_OFFSET))
}

/// Reduce any non-negative integer into `[0, P)`
pub fn modp(value: &BigUint) -> BigUint {
    value % prime()
}

/// An element of GF(P), always in canonical form
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct FieldElement(BigUint);

impl FieldElement {
    /// Wrap a value that must already be below `P`
    pub fn new(value: BigUint) -> Result<Self> {
        if &value >= prime() {
            return Err(RecoveryError::SecretOutOfRange);
        }
        Ok(Self(value))
    }

    /// Explicitly reduce an arbitrary value mod `P`
    pub fn reduce(value: &BigUint) -> Self {
        Self(modp(value))
    }

    pub fn zero() -> Self {
        Self(BigUint::from(0u32))
    }

    pub fn one() -> Self {
        Self(BigUint::from(1u32))
    }

    pub fn is_zero(&self) -> bool {
        self.0 == BigUint::from(0u32)
    }

    /// Uniformly random element drawn by rejection sampling
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut buf = [0u8; FIELD_BYTES];
        loop {
            rng.fill_bytes(&mut buf);
            let candidate = BigUint::from_bytes_be(&buf);
            if &candidate < prime() {
                return Self(candidate);
            }
        }
    }

    pub fn add(&self, other: &Self) -> Self {
        Self(modp(&(&self.0 + &other.0)))
    }

    pub fn sub(&self, other: &Self) -> Self {
        Self(modp(&(&self.0 + prime() - &other.0)))
    }

    pub fn neg(&self) -> Self {
        Self(modp(&(prime() - &self.0)))
    }

    pub fn mul(&self, other: &Self) -> Self {
        Self(modp(&(&self.0 * &other.0)))
    }

    pub fn pow(&self, exponent: &BigUint) -> Self {
        Self(self.0.modpow(exponent, prime()))
    }

    /// Multiplicative inverse via Fermat's little theorem, `a^(P-2)`
    pub fn inv(&self) -> Result<Self> {
        if self.is_zero() {
            return Err(RecoveryError::ShareFormatError(
                "zero has no inverse (duplicate share indices?)".to_string(),
            ));
        }
        let exponent = prime() - BigUint::from(2u32);
        Ok(self.pow(&exponent))
    }

    /// Parse lowercase or uppercase hex, with or without a `0x` prefix
    pub fn from_hex(input: &str) -> Result<Self> {
        let digits = input
            .strip_prefix("0x")
            .or_else(|| input.strip_prefix("0X"))
            .unwrap_or(input);
        if digits.is_empty() {
            return Err(RecoveryError::ShareFormatError("empty hex value".to_string()));
        }
        if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(RecoveryError::ShareFormatError(format!("invalid hex '{}'", digits)));
        }
        let value = BigUint::parse_bytes(digits.as_bytes(), 16)
            .ok_or_else(|| RecoveryError::ShareFormatError(format!("invalid hex '{}'", digits)))?;
        Self::new(value)
    }

    /// Lowercase hex, no prefix, no padding
    pub fn to_hex(&self) -> String {
        format!("{:x}", self.0)
    }

    pub fn from_bytes_be(bytes: &[u8]) -> Result<Self> {
        Self::new(BigUint::from_bytes_be(bytes))
    }

    /// Fixed 32-byte big-endian encoding
    pub fn to_bytes_be(&self) -> [u8; FIELD_BYTES] {
        let raw = self.0.to_bytes_be();
        let mut out = [0u8; FIELD_BYTES];
        out[FIELD_BYTES - raw.len()..].copy_from_slice(&raw);
        out
    }

    pub fn as_biguint(&self) -> &BigUint {
        &self.0
    }
}

impl From<u64> for FieldElement {
    fn from(value: u64) -> Self {
        // u64 is always below P
        Self(BigUint::from(value))
    }
}

impl fmt::Debug for FieldElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldElement(0x{})", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p_minus(n: u32) -> BigUint {
        prime() - BigUint::from(n)
    }

    #[test]
    fn test_prime_value() {
        let expected = BigUint::parse_bytes(
            b"ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff43",
            16,
        )
        .unwrap();
        assert_eq!(prime(), &expected);
    }

    #[test]
    fn test_rejects_values_at_or_above_prime() {
        assert!(matches!(
            FieldElement::new(prime().clone()),
            Err(RecoveryError::SecretOutOfRange)
        ));
        let max = "f".repeat(64);
        assert!(matches!(
            FieldElement::from_hex(&max),
            Err(RecoveryError::SecretOutOfRange)
        ));
        assert!(FieldElement::new(p_minus(1)).is_ok());
    }

    #[test]
    fn test_sub_wraps_without_negatives() {
        let two = FieldElement::from(2u64);
        let five = FieldElement::from(5u64);
        let diff = two.sub(&five);
        assert_eq!(diff.as_biguint(), &p_minus(3));
        assert_eq!(diff.add(&FieldElement::from(3u64)), FieldElement::zero());
    }

    #[test]
    fn test_neg() {
        let x = FieldElement::from(7u64);
        assert_eq!(x.neg().as_biguint(), &p_minus(7));
        assert_eq!(FieldElement::zero().neg(), FieldElement::zero());
        assert_eq!(x.add(&x.neg()), FieldElement::zero());
    }

    #[test]
    fn test_mul_and_inverse() {
        let mut rng = rand::thread_rng();
        for _ in 0..10 {
            let a = FieldElement::random(&mut rng);
            if a.is_zero() {
                continue;
            }
            let inv = a.inv().unwrap();
            assert_eq!(a.mul(&inv), FieldElement::one());
        }
    }

    #[test]
    fn test_inverse_of_negative_one() {
        // (-1)^-1 = -1
        let neg_one = FieldElement::one().neg();
        assert_eq!(neg_one.inv().unwrap(), neg_one);
    }

    #[test]
    fn test_zero_has_no_inverse() {
        assert!(FieldElement::zero().inv().is_err());
    }

    #[test]
    fn test_pow() {
        let three = FieldElement::from(3u64);
        assert_eq!(three.pow(&BigUint::from(4u32)), FieldElement::from(81u64));
        // Fermat: a^(P-1) = 1
        let exp = prime() - BigUint::from(1u32);
        assert_eq!(three.pow(&exp), FieldElement::one());
    }

    #[test]
    fn test_hex_roundtrip_is_canonical() {
        let x = FieldElement::from_hex("0x00ABcd").unwrap();
        assert_eq!(x.to_hex(), "abcd");
        assert_eq!(FieldElement::zero().to_hex(), "0");
        assert!(FieldElement::from_hex("").is_err());
        assert!(FieldElement::from_hex("xyz").is_err());
    }

    #[test]
    fn test_bytes_are_left_padded() {
        let x = FieldElement::from(0x0102u64);
        let bytes = x.to_bytes_be();
        assert_eq!(bytes[30], 0x01);
        assert_eq!(bytes[31], 0x02);
        assert!(bytes[..30].iter().all(|b| *b == 0));
        assert_eq!(FieldElement::from_bytes_be(&bytes).unwrap(), x);
    }

    #[test]
    fn test_reduce() {
        let over = prime() + BigUint::from(10u32);
        assert_eq!(FieldElement::reduce(&over), FieldElement::from(10u64));
    }
}
