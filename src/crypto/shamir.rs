//! Shamir Secret Sharing over GF(P)
//!
//! A secret `s` becomes the constant term of a random polynomial of degree
//! `k - 1`:
//!
//! ```text
//! f(x) = s + a₁x + a₂x² + ... + a_{k-1}x^{k-1}   (mod P)
//!
//! share_i = (i, f(i))   for i = 1..n
//! ```
//!
//! Any `k` shares pin down `f` and therefore `f(0) = s` through Lagrange
//! interpolation at zero. Fewer than `k` shares are consistent with every
//! possible secret, which is why [`recover`] refuses to interpolate them
//! instead of returning a plausible-looking wrong value.

use crate::crypto::field::FieldElement;
use crate::error::{RecoveryError, Result};
use rand::{rngs::OsRng, CryptoRng, RngCore};
use std::collections::BTreeSet;
use std::fmt;
use zeroize::Zeroizing;

/// Upper bound on trustees per share set
pub const MAX_SHARES: usize = 255;

// ============================================================================
// Secret
// ============================================================================

/// A private key held as a field element
///
/// Never printed: `Debug` is redacted and hex output is zeroized on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(FieldElement);

impl Secret {
    /// Parse a hex private key; keys at or above `P` are rejected
    pub fn from_hex(input: &str) -> Result<Self> {
        let trimmed = Zeroizing::new(input.trim().to_string());
        FieldElement::from_hex(&trimmed).map(Self)
    }

    /// Lowercase hex without prefix or padding
    pub fn to_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(self.0.to_hex())
    }

    pub fn as_field(&self) -> &FieldElement {
        &self.0
    }
}

impl From<FieldElement> for Secret {
    fn from(value: FieldElement) -> Self {
        Self(value)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

// ============================================================================
// Share
// ============================================================================

/// One point `(index, f(index))` on the sharing polynomial
#[derive(Clone, PartialEq, Eq)]
pub struct Share {
    pub index: u32,
    pub value: FieldElement,
}

impl Share {
    /// Text encoding `"<decimal index>:<lowercase hex value>"`
    pub fn encode(&self) -> Zeroizing<String> {
        Zeroizing::new(format!("{}:{}", self.index, self.value.to_hex()))
    }

    /// Parse the text encoding produced by [`Share::encode`]
    pub fn decode(text: &str) -> Result<Self> {
        let (index, value) = text
            .split_once(':')
            .ok_or_else(|| RecoveryError::ShareFormatError("missing ':' separator".to_string()))?;

        if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
            return Err(RecoveryError::ShareFormatError(format!(
                "invalid share index '{}'",
                index
            )));
        }
        let index: u32 = index
            .parse()
            .map_err(|_| RecoveryError::ShareFormatError("share index out of range".to_string()))?;
        if index == 0 || index as usize > MAX_SHARES {
            return Err(RecoveryError::ShareFormatError(format!(
                "share index {} outside 1..={}",
                index, MAX_SHARES
            )));
        }

        let value = FieldElement::from_hex(value).map_err(|e| match e {
            RecoveryError::SecretOutOfRange => {
                RecoveryError::ShareFormatError("share value not below field prime".to_string())
            }
            other => other,
        })?;

        Ok(Self { index, value })
    }
}

impl fmt::Debug for Share {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Share")
            .field("index", &self.index)
            .field("value", &"<redacted>")
            .finish()
    }
}

// ============================================================================
// Split
// ============================================================================

/// Split `secret` into `total` shares, any `threshold` of which recover it
///
/// Coefficients come from the operating system CSPRNG, so two calls on the
/// same secret produce unrelated share sets.
pub fn split(secret: &Secret, total: usize, threshold: usize) -> Result<Vec<Share>> {
    split_with_rng(secret, total, threshold, &mut OsRng)
}

/// [`split`] with a caller-provided cryptographic RNG
pub fn split_with_rng<R: RngCore + CryptoRng>(
    secret: &Secret,
    total: usize,
    threshold: usize,
    rng: &mut R,
) -> Result<Vec<Share>> {
    if threshold == 0 || threshold > total || total > MAX_SHARES {
        return Err(RecoveryError::ThresholdExceedsShares { threshold, total });
    }

    let mut coefficients = Vec::with_capacity(threshold);
    coefficients.push(secret.as_field().clone());
    for _ in 1..threshold {
        coefficients.push(FieldElement::random(rng));
    }

    let shares = (1..=total as u32)
        .map(|index| Share {
            index,
            value: evaluate_polynomial(&coefficients, &FieldElement::from(index as u64)),
        })
        .collect();

    Ok(shares)
}

/// Horner evaluation of `coefficients[0] + coefficients[1]·x + ...`
fn evaluate_polynomial(coefficients: &[FieldElement], x: &FieldElement) -> FieldElement {
    coefficients
        .iter()
        .rev()
        .fold(FieldElement::zero(), |acc, coeff| acc.mul(x).add(coeff))
}

// ============================================================================
// Recover
// ============================================================================

/// Compute the Lagrange basis coefficient for `index` at x = 0
///
/// λ_i(0) = Π_{j≠i} (-x_j) · (x_i - x_j)^{-1}
///
/// Both the negated index and the difference are normalized into `[0, P)`
/// before the inverse is taken.
pub fn lagrange_coefficient_at_zero(index: u32, all_indices: &[u32]) -> Result<FieldElement> {
    let x_i = FieldElement::from(index as u64);
    let mut numerator = FieldElement::one();
    let mut denominator = FieldElement::one();

    for &other in all_indices {
        if other == index {
            continue;
        }
        let x_j = FieldElement::from(other as u64);
        numerator = numerator.mul(&x_j.neg());
        denominator = denominator.mul(&x_i.sub(&x_j));
    }

    Ok(numerator.mul(&denominator.inv()?))
}

/// Reconstruct the secret from at least `threshold` distinct shares
///
/// The quorum check happens before any interpolation: the math itself would
/// happily return a wrong value for an under-quorum set.
pub fn recover(shares: &[Share], threshold: usize) -> Result<Secret> {
    if threshold == 0 {
        return Err(RecoveryError::ThresholdExceedsShares {
            threshold,
            total: shares.len(),
        });
    }

    let mut seen = BTreeSet::new();
    for share in shares {
        if share.index == 0 {
            return Err(RecoveryError::ShareFormatError(
                "share index 0 would expose the secret".to_string(),
            ));
        }
        if !seen.insert(share.index) {
            return Err(RecoveryError::ShareFormatError(format!(
                "duplicate share index {}",
                share.index
            )));
        }
    }

    if shares.len() < threshold {
        return Err(RecoveryError::ThresholdNotMet {
            required: threshold,
            provided: shares.len(),
        });
    }

    let indices: Vec<u32> = shares.iter().map(|s| s.index).collect();
    let mut secret = FieldElement::zero();
    for share in shares {
        let lambda = lagrange_coefficient_at_zero(share.index, &indices)?;
        secret = secret.add(&share.value.mul(&lambda));
    }

    Ok(Secret(secret))
}
