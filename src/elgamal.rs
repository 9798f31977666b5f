use num_bigint::BigUint;
use thiserror::Error;
use zeroize::Zeroize;

use crate::group::{GroupContext, GroupElement, GroupError, Scalar};
use crate::zk_proof::DisjunctiveChaumPedersenProof;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ElGamalError {
    #[error("secret key out of range [2, q)")]
    InvalidKey,
    #[error("nonce must be non-zero")]
    InvalidNonce,
    #[error("message must be non-negative: {0}")]
    NegativeMessage(i64),
    #[error("empty ciphertext list")]
    EmptyAccumulation,
    #[error("only 0 or 1 can be encrypted with a range proof: {0}")]
    InvalidSelection(i64),
    #[error("random number generation failed: {0}")]
    RandomNumberError(#[from] GroupError),
}

/// An ElGamal secret key in `[2, q)` with its public key `g^secret`.
#[derive(Clone, Debug)]
pub struct ElGamalKeyPair {
    secret_key: Scalar,
    public_key: GroupElement,
}

impl ElGamalKeyPair {
    pub fn from_secret(ctx: &GroupContext, secret: Scalar) -> Result<Self, ElGamalError> {
        if secret.value() < &BigUint::from(2u8) || !ctx.is_valid_scalar(&secret) {
            return Err(ElGamalError::InvalidKey);
        }
        let public_key = ctx.g_pow(&secret);
        Ok(ElGamalKeyPair {
            secret_key: secret,
            public_key,
        })
    }

    pub fn random(ctx: &GroupContext) -> Result<Self, ElGamalError> {
        Self::from_secret(ctx, ctx.random_scalar(2)?)
    }

    pub fn secret_key(&self) -> &Scalar {
        &self.secret_key
    }

    pub fn public_key(&self) -> &GroupElement {
        &self.public_key
    }
}

impl Zeroize for ElGamalKeyPair {
    fn zeroize(&mut self) {
        self.secret_key.zeroize();
    }
}

impl Drop for ElGamalKeyPair {
    fn drop(&mut self) {
        self.zeroize();
    }
}

/// Exponential ElGamal ciphertext `(g^r, g^m · K^r)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Ciphertext {
    pub pad: GroupElement,
    pub data: GroupElement,
}

impl Ciphertext {
    /// The identity ciphertext, an encryption of 0 with nonce 0.
    pub fn identity() -> Self {
        Ciphertext {
            pad: GroupElement::one(),
            data: GroupElement::one(),
        }
    }

    pub fn is_valid(&self, ctx: &GroupContext) -> bool {
        ctx.is_valid_residue(&self.pad) && ctx.is_valid_residue(&self.data)
    }

    /// Recovers `m` with the secret key; `None` if `m` exceeds the search bound.
    pub fn decrypt(&self, ctx: &GroupContext, secret_key: &Scalar) -> Option<u64> {
        let blind = ctx.power(&self.pad, secret_key);
        let g_m = ctx.divide(&self.data, &blind)?;
        ctx.discrete_log(&g_m)
    }

    /// Recovers `m` from the encryption nonce instead of the secret key.
    pub fn decrypt_with_nonce(
        &self,
        ctx: &GroupContext,
        public_key: &GroupElement,
        nonce: &Scalar,
    ) -> Option<u64> {
        if ctx.g_pow(nonce) != self.pad {
            return None;
        }
        let blind = ctx.power(public_key, nonce);
        let g_m = ctx.divide(&self.data, &blind)?;
        ctx.discrete_log(&g_m)
    }

    pub fn add(&self, ctx: &GroupContext, other: &Ciphertext) -> Ciphertext {
        Ciphertext {
            pad: ctx.multiply(&self.pad, &other.pad),
            data: ctx.multiply(&self.data, &other.data),
        }
    }
}

/// Encrypts with a fresh nonce drawn from `[1, q)`, returning the nonce too.
pub fn encrypt(
    ctx: &GroupContext,
    message: i64,
    public_key: &GroupElement,
) -> Result<(Ciphertext, Scalar), ElGamalError> {
    let nonce = ctx.random_scalar(1)?;
    let c = encrypt_fixed(ctx, message, public_key, &nonce)?;
    Ok((c, nonce))
}

pub fn encrypt_fixed(
    ctx: &GroupContext,
    message: i64,
    public_key: &GroupElement,
    nonce: &Scalar,
) -> Result<Ciphertext, ElGamalError> {
    if message < 0 {
        return Err(ElGamalError::NegativeMessage(message));
    }
    let nonce = ctx.scalar(nonce.value().clone());
    if nonce.is_zero() {
        return Err(ElGamalError::InvalidNonce);
    }
    let pad = ctx.g_pow(&nonce);
    let g_m = ctx.g_pow(&Scalar::from(message as u64));
    let data = ctx.multiply(&g_m, &ctx.power(public_key, &nonce));
    Ok(Ciphertext { pad, data })
}

/// Encrypts a 0/1 selection and proves it lies in that range.
pub fn encrypt_with_proof(
    ctx: &GroupContext,
    selection: i64,
    public_key: &GroupElement,
) -> Result<(Ciphertext, DisjunctiveChaumPedersenProof, Scalar), ElGamalError> {
    let nonce = ctx.random_scalar(1)?;
    let (c, proof) = encrypt_fixed_with_proof(ctx, selection, public_key, &nonce)?;
    Ok((c, proof, nonce))
}

pub fn encrypt_fixed_with_proof(
    ctx: &GroupContext,
    selection: i64,
    public_key: &GroupElement,
    nonce: &Scalar,
) -> Result<(Ciphertext, DisjunctiveChaumPedersenProof), ElGamalError> {
    if selection != 0 && selection != 1 {
        return Err(ElGamalError::InvalidSelection(selection));
    }
    let c = encrypt_fixed(ctx, selection, public_key, nonce)?;
    let proof = DisjunctiveChaumPedersenProof::prove(ctx, &c, public_key, nonce, selection == 1)?;
    Ok((c, proof))
}

/// Homomorphic sum; fails on an empty list.
pub fn sum<'a>(
    ctx: &GroupContext,
    ciphertexts: impl IntoIterator<Item = &'a Ciphertext>,
) -> Result<Ciphertext, ElGamalError> {
    let mut iter = ciphertexts.into_iter();
    let first = iter.next().ok_or(ElGamalError::EmptyAccumulation)?;
    Ok(iter.fold(first.clone(), |acc, c| acc.add(ctx, c)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::test_context;

    #[test]
    fn test_key_pair_from_secret_bounds() {
        let ctx = test_context();
        assert_eq!(
            ElGamalKeyPair::from_secret(&ctx, Scalar::zero()).unwrap_err(),
            ElGamalError::InvalidKey
        );
        assert_eq!(
            ElGamalKeyPair::from_secret(&ctx, Scalar::one()).unwrap_err(),
            ElGamalError::InvalidKey
        );
        assert_eq!(
            ElGamalKeyPair::from_secret(&ctx, Scalar::new(ctx.q().clone())).unwrap_err(),
            ElGamalError::InvalidKey
        );
        let pair = ElGamalKeyPair::from_secret(&ctx, Scalar::from(2)).unwrap();
        assert_eq!(pair.public_key(), &ctx.g_pow(&Scalar::from(2)));
    }

    #[test]
    fn test_round_trip() {
        let ctx = test_context();
        let pair = ElGamalKeyPair::random(&ctx).unwrap();
        for m in (0..1000).step_by(37).chain([999]) {
            let (c, nonce) = encrypt(&ctx, m, pair.public_key()).unwrap();
            assert_eq!(c.decrypt(&ctx, pair.secret_key()), Some(m as u64));
            assert_eq!(
                c.decrypt_with_nonce(&ctx, pair.public_key(), &nonce),
                Some(m as u64)
            );
        }
    }

    #[test]
    fn test_decrypt_with_wrong_nonce() {
        let ctx = test_context();
        let pair = ElGamalKeyPair::random(&ctx).unwrap();
        let (c, nonce) = encrypt(&ctx, 5, pair.public_key()).unwrap();
        let wrong = ctx.add_q(&nonce, &Scalar::one());
        assert_eq!(c.decrypt_with_nonce(&ctx, pair.public_key(), &wrong), None);
    }

    #[test]
    fn test_decrypt_out_of_range() {
        let ctx = test_context();
        let pair = ElGamalKeyPair::random(&ctx).unwrap();
        let (c, _) = encrypt(&ctx, 5_000, pair.public_key()).unwrap();
        assert_eq!(c.decrypt(&ctx, pair.secret_key()), None);
    }

    #[test]
    fn test_encrypt_validates_arguments() {
        let ctx = test_context();
        let pair = ElGamalKeyPair::random(&ctx).unwrap();
        assert_eq!(
            encrypt_fixed(&ctx, 1, pair.public_key(), &Scalar::zero()).unwrap_err(),
            ElGamalError::InvalidNonce
        );
        // q reduces to zero as well.
        assert_eq!(
            encrypt_fixed(&ctx, 1, pair.public_key(), &Scalar::new(ctx.q().clone())).unwrap_err(),
            ElGamalError::InvalidNonce
        );
        assert_eq!(
            encrypt_fixed(&ctx, -1, pair.public_key(), &Scalar::one()).unwrap_err(),
            ElGamalError::NegativeMessage(-1)
        );
    }

    #[test]
    fn test_homomorphic_addition() {
        let ctx = test_context();
        let pair = ElGamalKeyPair::random(&ctx).unwrap();
        let (a, _) = encrypt(&ctx, 42, pair.public_key()).unwrap();
        let (b, _) = encrypt(&ctx, 58, pair.public_key()).unwrap();
        assert_eq!(a.add(&ctx, &b).decrypt(&ctx, pair.secret_key()), Some(100));
    }

    #[test]
    fn test_sum() {
        let ctx = test_context();
        let pair = ElGamalKeyPair::random(&ctx).unwrap();
        let ciphertexts: Vec<Ciphertext> = [1, 0, 1, 1, 0]
            .iter()
            .map(|m| encrypt(&ctx, *m, pair.public_key()).unwrap().0)
            .collect();
        let total = sum(&ctx, &ciphertexts).unwrap();
        assert_eq!(total.decrypt(&ctx, pair.secret_key()), Some(3));
        assert_eq!(
            sum(&ctx, &Vec::<Ciphertext>::new()).unwrap_err(),
            ElGamalError::EmptyAccumulation
        );
    }

    #[test]
    fn test_encrypt_with_proof() {
        let ctx = test_context();
        let pair = ElGamalKeyPair::random(&ctx).unwrap();
        for selection in [0, 1] {
            let (c, proof, _) = encrypt_with_proof(&ctx, selection, pair.public_key()).unwrap();
            assert!(proof.verify(&ctx, &c, pair.public_key()).is_valid());
            assert_eq!(c.decrypt(&ctx, pair.secret_key()), Some(selection as u64));
        }
        assert_eq!(
            encrypt_with_proof(&ctx, 2, pair.public_key()).unwrap_err(),
            ElGamalError::InvalidSelection(2)
        );
    }
}
