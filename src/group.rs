//! Arithmetic in a prime-order subgroup of `Z_p^*`.
//!
//! [GroupContext] owns the parameters `(p, q, g)` and performs every modular
//! operation; [Scalar] and [GroupElement] are plain value types that carry no
//! modulus of their own.

use num_bigint::BigUint;
use num_traits::{One, Zero};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::Zeroize;

use crate::functions::{generate_safe_primes, random_mod, random_range, FunctionError};

/// Largest plaintext searched by [GroupContext::discrete_log] unless overridden.
pub const DEFAULT_DISCRETE_LOG_BOUND: u64 = 100_000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GroupError {
    #[error("q does not divide p - 1")]
    OrderMismatch,
    #[error("generator does not have order q")]
    InvalidGenerator,
    #[error("subgroup order too small")]
    OrderTooSmall,
    #[error("element is not invertible modulo p")]
    NotInvertible,
    #[error("invalid hex encoding: {0}")]
    InvalidHex(String),
    #[error("random number generation failed: {0}")]
    RandomNumberGeneration(#[from] FunctionError),
}

/// An exponent, reduced modulo `q` by every [GroupContext] operation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Scalar(BigUint);

impl Scalar {
    pub fn new(value: BigUint) -> Self {
        Scalar(value)
    }

    pub fn zero() -> Self {
        Scalar(BigUint::zero())
    }

    pub fn one() -> Self {
        Scalar(BigUint::one())
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn value(&self) -> &BigUint {
        &self.0
    }
}

impl From<u64> for Scalar {
    fn from(value: u64) -> Self {
        Scalar(BigUint::from(value))
    }
}

impl Zeroize for Scalar {
    fn zeroize(&mut self) {
        self.0.set_zero();
    }
}

/// An element of `Z_p^*`, expected to lie in the order-`q` subgroup.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupElement(BigUint);

impl GroupElement {
    pub fn new(value: BigUint) -> Self {
        GroupElement(value)
    }

    pub fn one() -> Self {
        GroupElement(BigUint::one())
    }

    pub fn value(&self) -> &BigUint {
        &self.0
    }
}

/// Group parameters plus the discrete-log search bound.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupContext {
    p: BigUint,
    q: BigUint,
    g: BigUint,
    p_bytes: usize,
    q_bytes: usize,
    discrete_log_bound: u64,
}

impl GroupContext {
    /// Validates `q | p - 1`, `g != 1` and `g^q = 1 mod p`.
    pub fn new(p: BigUint, q: BigUint, g: BigUint) -> Result<Self, GroupError> {
        if q <= BigUint::from(256u32) {
            return Err(GroupError::OrderTooSmall);
        }
        let p_minus_one = &p - BigUint::one();
        if !(&p_minus_one % &q).is_zero() {
            return Err(GroupError::OrderMismatch);
        }
        if g <= BigUint::one() || g >= p || !g.modpow(&q, &p).is_one() {
            return Err(GroupError::InvalidGenerator);
        }
        let p_bytes = ((p.bits() + 7) / 8) as usize;
        let q_bytes = ((q.bits() + 7) / 8) as usize;
        Ok(GroupContext {
            p,
            q,
            g,
            p_bytes,
            q_bytes,
            discrete_log_bound: DEFAULT_DISCRETE_LOG_BOUND,
        })
    }

    /// Parses big-endian hex parameters (an optional `0x` prefix is accepted).
    pub fn from_hex(p: &str, q: &str, g: &str) -> Result<Self, GroupError> {
        Self::new(parse_hex(p)?, parse_hex(q)?, parse_hex(g)?)
    }

    /// Builds a fresh safe-prime group `p = 2q + 1` with generator `h^2 mod p`.
    pub fn generate(bits: usize) -> Result<Self, GroupError> {
        let (p, q) = generate_safe_primes(bits)?;
        let two = BigUint::from(2u8);
        loop {
            let h = random_range(&two, &(&p - BigUint::one()))?;
            let g = h.modpow(&two, &p);
            if !g.is_one() {
                return Self::new(p, q, g);
            }
        }
    }

    pub fn with_discrete_log_bound(mut self, bound: u64) -> Self {
        self.discrete_log_bound = bound;
        self
    }

    pub fn p(&self) -> &BigUint {
        &self.p
    }

    pub fn q(&self) -> &BigUint {
        &self.q
    }

    pub fn generator(&self) -> GroupElement {
        GroupElement(self.g.clone())
    }

    pub fn discrete_log_bound(&self) -> u64 {
        self.discrete_log_bound
    }

    /// Width in bytes of a serialized scalar.
    pub fn scalar_len(&self) -> usize {
        self.q_bytes
    }

    pub fn scalar(&self, value: BigUint) -> Scalar {
        Scalar(value % &self.q)
    }

    pub fn add_q(&self, a: &Scalar, b: &Scalar) -> Scalar {
        Scalar((&a.0 + &b.0) % &self.q)
    }

    pub fn sub_q(&self, a: &Scalar, b: &Scalar) -> Scalar {
        let a = &a.0 % &self.q;
        let b = &b.0 % &self.q;
        Scalar((a + &self.q - b) % &self.q)
    }

    pub fn mul_q(&self, a: &Scalar, b: &Scalar) -> Scalar {
        Scalar((&a.0 * &b.0) % &self.q)
    }

    /// Multiplicative inverse mod `q`; `None` for zero.
    pub fn inv_q(&self, a: &Scalar) -> Option<Scalar> {
        let a = &a.0 % &self.q;
        if a.is_zero() {
            return None;
        }
        a.modinv(&self.q).map(Scalar)
    }

    pub fn multiply(&self, a: &GroupElement, b: &GroupElement) -> GroupElement {
        GroupElement((&a.0 * &b.0) % &self.p)
    }

    pub fn power(&self, base: &GroupElement, exponent: &Scalar) -> GroupElement {
        GroupElement(base.0.modpow(&exponent.0, &self.p))
    }

    pub fn g_pow(&self, exponent: &Scalar) -> GroupElement {
        GroupElement(self.g.modpow(&exponent.0, &self.p))
    }

    /// Multiplicative inverse mod `p`; `None` when `a` shares a factor with `p`.
    pub fn invert(&self, a: &GroupElement) -> Option<GroupElement> {
        let a = &a.0 % &self.p;
        if a.is_zero() {
            return None;
        }
        a.modinv(&self.p).map(GroupElement)
    }

    pub fn divide(&self, a: &GroupElement, b: &GroupElement) -> Option<GroupElement> {
        self.invert(b).map(|b_inv| self.multiply(a, &b_inv))
    }

    /// Product of all elements, `1` for an empty iterator.
    pub fn product<'a>(&self, elements: impl IntoIterator<Item = &'a GroupElement>) -> GroupElement {
        elements
            .into_iter()
            .fold(GroupElement::one(), |acc, e| self.multiply(&acc, e))
    }

    /// Uniform scalar in `[minimum, q)`.
    pub fn random_scalar(&self, minimum: u8) -> Result<Scalar, GroupError> {
        if minimum == 0 {
            return Ok(Scalar(random_mod(&self.q, &mut OsRng)?));
        }
        Ok(Scalar(random_range(&BigUint::from(minimum), &self.q)?))
    }

    pub fn is_valid_scalar(&self, s: &Scalar) -> bool {
        s.0 < self.q
    }

    /// True iff `0 < e < p` and `e^q = 1 mod p`.
    pub fn is_valid_residue(&self, e: &GroupElement) -> bool {
        !e.0.is_zero() && e.0 < self.p && e.0.modpow(&self.q, &self.p).is_one()
    }

    /// Smallest `m <= bound` with `g^m = element`, by linear search.
    pub fn discrete_log(&self, element: &GroupElement) -> Option<u64> {
        self.bounded_discrete_log(element, self.discrete_log_bound)
    }

    pub fn bounded_discrete_log(&self, element: &GroupElement, max_search: u64) -> Option<u64> {
        let target = &element.0 % &self.p;
        let mut acc = BigUint::one();
        for m in 0..=max_search {
            if acc == target {
                return Some(m);
            }
            acc = (acc * &self.g) % &self.p;
        }
        None
    }

    /// Hashes group elements under a domain label into a scalar.
    pub fn hash_to_scalar(&self, domain: &[u8], elements: &[&GroupElement]) -> Scalar {
        let mut transcript = Transcript::new(domain);
        for element in elements {
            transcript.append_element(self, element);
        }
        transcript.challenge(self)
    }

    pub fn scalar_to_bytes(&self, s: &Scalar) -> Vec<u8> {
        pad_be(&s.0, self.q_bytes)
    }

    pub fn element_to_bytes(&self, e: &GroupElement) -> Vec<u8> {
        pad_be(&e.0, self.p_bytes)
    }
}

/// Length-prefixed SHA-256 transcript used for Fiat-Shamir challenges.
pub struct Transcript {
    hasher: Sha256,
}

impl Transcript {
    pub fn new(domain: &[u8]) -> Self {
        let mut transcript = Transcript {
            hasher: Sha256::new(),
        };
        transcript.append_bytes(domain);
        transcript
    }

    pub fn append_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.hasher.update((bytes.len() as u64).to_be_bytes());
        self.hasher.update(bytes);
        self
    }

    pub fn append_u64(&mut self, value: u64) -> &mut Self {
        self.append_bytes(&value.to_be_bytes())
    }

    pub fn append_element(&mut self, ctx: &GroupContext, e: &GroupElement) -> &mut Self {
        let bytes = ctx.element_to_bytes(e);
        self.append_bytes(&bytes)
    }

    pub fn append_scalar(&mut self, ctx: &GroupContext, s: &Scalar) -> &mut Self {
        let bytes = ctx.scalar_to_bytes(s);
        self.append_bytes(&bytes)
    }

    pub fn challenge(self, ctx: &GroupContext) -> Scalar {
        let digest = self.hasher.finalize();
        ctx.scalar(BigUint::from_bytes_be(&digest))
    }
}

fn parse_hex(s: &str) -> Result<BigUint, GroupError> {
    let trimmed = s.trim().trim_start_matches("0x");
    BigUint::parse_bytes(trimmed.as_bytes(), 16).ok_or_else(|| GroupError::InvalidHex(s.to_string()))
}

fn pad_be(value: &BigUint, width: usize) -> Vec<u8> {
    let bytes = value.to_bytes_be();
    if bytes.len() >= width {
        return bytes;
    }
    let mut padded = vec![0u8; width - bytes.len()];
    padded.extend_from_slice(&bytes);
    padded
}

/// 256-bit safe-prime group shared by the unit tests.
#[cfg(test)]
pub(crate) fn test_context() -> GroupContext {
    GroupContext::from_hex(
        "866058c7c2583f3ed87236ff6b5f73f46d0d05b80d9dc481fb71c97b2f9a7673",
        "43302c63e12c1f9f6c391b7fb5afb9fa368682dc06cee240fdb8e4bd97cd3b39",
        "4",
    )
    .expect("test group parameters are valid")
    .with_discrete_log_bound(2_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_bad_generator() {
        let ctx = test_context();
        let result = GroupContext::new(ctx.p().clone(), ctx.q().clone(), BigUint::one());
        assert_eq!(result, Err(GroupError::InvalidGenerator));
        // p - 1 has order 2, not q.
        let minus_one = ctx.p() - BigUint::one();
        let result = GroupContext::new(ctx.p().clone(), ctx.q().clone(), minus_one);
        assert_eq!(result, Err(GroupError::InvalidGenerator));
    }

    #[test]
    fn test_new_rejects_order_mismatch() {
        let ctx = test_context();
        let q = ctx.q() + BigUint::from(2u8);
        let result = GroupContext::new(ctx.p().clone(), q, BigUint::from(4u8));
        assert_eq!(result, Err(GroupError::OrderMismatch));
    }

    #[test]
    fn test_generate_small_group() {
        let ctx = GroupContext::generate(64).expect("group generation failed");
        assert!(ctx.is_valid_residue(&ctx.generator()));
        assert_eq!(ctx.p(), &(ctx.q() * BigUint::from(2u8) + BigUint::one()));
    }

    #[test]
    fn test_scalar_arithmetic() {
        let ctx = test_context();
        let a = ctx.random_scalar(1).unwrap();
        let b = ctx.random_scalar(1).unwrap();
        let sum = ctx.add_q(&a, &b);
        assert_eq!(ctx.sub_q(&sum, &b), a);
        let inv = ctx.inv_q(&a).unwrap();
        assert_eq!(ctx.mul_q(&a, &inv), Scalar::one());
        assert!(ctx.inv_q(&Scalar::zero()).is_none());
        // Subtraction wraps below zero.
        assert_eq!(
            ctx.add_q(&ctx.sub_q(&Scalar::zero(), &Scalar::one()), &Scalar::one()),
            Scalar::zero()
        );
    }

    #[test]
    fn test_group_arithmetic() {
        let ctx = test_context();
        let a = ctx.random_scalar(1).unwrap();
        let b = ctx.random_scalar(1).unwrap();
        let ga = ctx.g_pow(&a);
        let gb = ctx.g_pow(&b);
        assert_eq!(ctx.multiply(&ga, &gb), ctx.g_pow(&ctx.add_q(&a, &b)));
        assert_eq!(ctx.divide(&ctx.multiply(&ga, &gb), &gb).unwrap(), ga);
        assert_eq!(ctx.power(&ga, &b), ctx.g_pow(&ctx.mul_q(&a, &b)));
        assert!(ctx.is_valid_residue(&ga));
        assert!(ctx.invert(&GroupElement::new(BigUint::zero())).is_none());
    }

    #[test]
    fn test_random_scalar_minimum() {
        let ctx = test_context();
        for _ in 0..50 {
            let s = ctx.random_scalar(2).unwrap();
            assert!(s.value() >= &BigUint::from(2u8));
            assert!(ctx.is_valid_scalar(&s));
        }
    }

    #[test]
    fn test_is_valid_residue() {
        let ctx = test_context();
        assert!(!ctx.is_valid_residue(&GroupElement::new(BigUint::zero())));
        assert!(!ctx.is_valid_residue(&GroupElement::new(ctx.p().clone())));
        // 2 is a non-residue modulo this safe prime.
        assert!(!ctx.is_valid_residue(&GroupElement::new(BigUint::from(2u8))));
        assert!(ctx.is_valid_residue(&GroupElement::one()));
    }

    #[test]
    fn test_discrete_log() {
        let ctx = test_context();
        for m in [0u64, 1, 7, 1999] {
            assert_eq!(ctx.discrete_log(&ctx.g_pow(&Scalar::from(m))), Some(m));
        }
        assert_eq!(ctx.discrete_log(&ctx.g_pow(&Scalar::from(2_001))), None);
        assert_eq!(ctx.bounded_discrete_log(&ctx.g_pow(&Scalar::from(5)), 4), None);
    }

    #[test]
    fn test_hash_to_scalar_domain_separation() {
        let ctx = test_context();
        let g = ctx.generator();
        let a = ctx.hash_to_scalar(b"one", &[&g]);
        let b = ctx.hash_to_scalar(b"two", &[&g]);
        assert_ne!(a, b);
        assert_eq!(a, ctx.hash_to_scalar(b"one", &[&g]));
        assert!(ctx.is_valid_scalar(&a));
    }

    #[test]
    fn test_from_hex_rejects_garbage() {
        assert!(matches!(
            GroupContext::from_hex("zz", "11", "4"),
            Err(GroupError::InvalidHex(_))
        ));
    }
}
