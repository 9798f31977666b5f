use thiserror::Error;
use zeroize::Zeroize;

use crate::group::{GroupContext, GroupElement, GroupError, Scalar};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolynomialError {
    #[error("random number generation failed: {0}")]
    RandomNumberGeneration(#[from] GroupError),
    #[error("invalid degree")]
    InvalidDegree,
}

/// A guardian's secret sharing polynomial `P(x) = Σ a_j x^j mod q`.
pub struct SecretPolynomial {
    coefficients: Vec<Scalar>,
}

impl SecretPolynomial {
    /// Draws `degree + 1` coefficients; the constant term is kept in `[2, q)`
    /// so that it is usable as an ElGamal secret key.
    pub fn new_random(ctx: &GroupContext, degree: usize) -> Result<Self, PolynomialError> {
        let mut coefficients = Vec::with_capacity(degree + 1);
        coefficients.push(ctx.random_scalar(2)?);
        for _ in 0..degree {
            coefficients.push(ctx.random_scalar(0)?);
        }
        Ok(SecretPolynomial { coefficients })
    }

    pub fn from_coefficients(coefficients: Vec<Scalar>) -> Result<Self, PolynomialError> {
        if coefficients.is_empty() {
            return Err(PolynomialError::InvalidDegree);
        }
        Ok(SecretPolynomial { coefficients })
    }

    pub fn coefficients(&self) -> &[Scalar] {
        &self.coefficients
    }

    /// Horner evaluation at `x`.
    pub fn evaluate(&self, ctx: &GroupContext, x: u32) -> Scalar {
        let x = Scalar::from(u64::from(x));
        self.coefficients
            .iter()
            .rev()
            .fold(Scalar::zero(), |acc, coeff| {
                ctx.add_q(&ctx.mul_q(&acc, &x), coeff)
            })
    }

    /// Feldman commitments `K_j = g^{a_j}`.
    pub fn commit(&self, ctx: &GroupContext) -> Vec<GroupElement> {
        self.coefficients.iter().map(|a| ctx.g_pow(a)).collect()
    }
}

impl Zeroize for SecretPolynomial {
    fn zeroize(&mut self) {
        for coeff in self.coefficients.iter_mut() {
            coeff.zeroize();
        }
    }
}

impl Drop for SecretPolynomial {
    fn drop(&mut self) {
        self.zeroize();
    }
}

/// Evaluates committed coefficients in the exponent:
/// `Π_j K_j^{x^j} = g^{P(x)}`.
pub fn evaluate_commitments(
    ctx: &GroupContext,
    commitments: &[GroupElement],
    x: u32,
) -> GroupElement {
    let x = Scalar::from(u64::from(x));
    let mut x_power = Scalar::one();
    let mut result = GroupElement::one();
    for commitment in commitments {
        result = ctx.multiply(&result, &ctx.power(commitment, &x_power));
        x_power = ctx.mul_q(&x_power, &x);
    }
    result
}

/// True iff `g^{share} = Π_j K_j^{x^j}`.
pub fn verify_share(
    ctx: &GroupContext,
    commitments: &[GroupElement],
    x: u32,
    share: &Scalar,
) -> bool {
    if commitments.is_empty() || share.value() >= ctx.q() {
        return false;
    }
    ctx.g_pow(share) == evaluate_commitments(ctx, commitments, x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::test_context;
    use num_bigint::BigUint;

    #[test]
    fn test_evaluate_known_polynomial() {
        let ctx = test_context();
        // P(x) = 3 + 2x + x^2
        let poly = SecretPolynomial::from_coefficients(vec![
            Scalar::from(3),
            Scalar::from(2),
            Scalar::from(1),
        ])
        .unwrap();
        assert_eq!(poly.evaluate(&ctx, 0), Scalar::from(3));
        assert_eq!(poly.evaluate(&ctx, 1), Scalar::from(6));
        assert_eq!(poly.evaluate(&ctx, 4), Scalar::from(27));
    }

    #[test]
    fn test_evaluate_reduces_mod_q() {
        let ctx = test_context();
        let q_minus_one = Scalar::new(ctx.q() - BigUint::from(1u8));
        let poly =
            SecretPolynomial::from_coefficients(vec![q_minus_one, Scalar::from(1)]).unwrap();
        assert_eq!(poly.evaluate(&ctx, 1), Scalar::zero());
    }

    #[test]
    fn test_empty_polynomial_rejected() {
        assert!(matches!(
            SecretPolynomial::from_coefficients(vec![]),
            Err(PolynomialError::InvalidDegree)
        ));
    }

    #[test]
    fn test_random_polynomial_shape() {
        let ctx = test_context();
        let poly = SecretPolynomial::new_random(&ctx, 2).unwrap();
        assert_eq!(poly.coefficients().len(), 3);
        assert!(poly.coefficients()[0].value() >= &BigUint::from(2u8));
    }

    #[test]
    fn test_feldman_verification() {
        let ctx = test_context();
        let poly = SecretPolynomial::new_random(&ctx, 2).unwrap();
        let commitments = poly.commit(&ctx);
        for x in 1..=5 {
            let share = poly.evaluate(&ctx, x);
            assert!(verify_share(&ctx, &commitments, x, &share));
            assert!(!verify_share(&ctx, &commitments, x + 1, &share));
            let tampered = ctx.add_q(&share, &Scalar::one());
            assert!(!verify_share(&ctx, &commitments, x, &tampered));
        }
        assert!(!verify_share(&ctx, &[], 1, &Scalar::zero()));
    }

    #[test]
    fn test_zeroize_clears_coefficients() {
        let ctx = test_context();
        let mut poly = SecretPolynomial::new_random(&ctx, 1).unwrap();
        poly.zeroize();
        assert!(poly.coefficients().iter().all(|c| c.is_zero()));
    }
}
