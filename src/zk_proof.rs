//! Non-interactive zero-knowledge proofs (Fiat-Shamir over SHA-256).
//!
//! * [SchnorrProof]: knowledge of the discrete log of a public key.
//! * [ChaumPedersenProof]: a decryption share `pad^s` uses the same `s` as
//!   the public key `g^s`.
//! * [DisjunctiveChaumPedersenProof]: a ciphertext encrypts 0 or 1.
//!
//! Verification never short-circuits: every check runs and the failed ones
//! are reported through [Verification]. A proof is valid only when no check
//! failed.
//!
//! Provers draw a fresh nonce on every call. The `*_fixed` variants take the
//! nonce explicitly and must never be called twice with the same nonce for
//! different statements: doing so reveals the secret.

use crate::elgamal::{Ciphertext, ElGamalKeyPair};
use crate::group::{GroupContext, GroupElement, GroupError, Scalar, Transcript};

const SCHNORR_DOMAIN: &[u8] = b"threshold-election/schnorr/v1";
const DECRYPTION_SHARE_DOMAIN: &[u8] = b"threshold-election/decryption-share/v1";
const RANGE_DOMAIN: &[u8] = b"threshold-election/disjunctive-range/v1";

/// A single verification condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProofCheck {
    PublicKeyMismatch,
    InvalidPublicKey,
    InvalidCiphertext,
    InvalidShare,
    ChallengeOutOfRange,
    ResponseOutOfRange,
    ChallengeMismatch,
}

/// Outcome of a proof verification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Verification {
    failures: Vec<ProofCheck>,
}

impl Verification {
    fn check(&mut self, passed: bool, check: ProofCheck) {
        if !passed && !self.failures.contains(&check) {
            self.failures.push(check);
        }
    }

    pub(crate) fn with_failure(mut self, check: ProofCheck) -> Self {
        self.check(false, check);
        self
    }

    pub fn is_valid(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failures(&self) -> &[ProofCheck] {
        &self.failures
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchnorrProof {
    pub public_key: GroupElement,
    pub challenge: Scalar,
    pub response: Scalar,
}

impl SchnorrProof {
    pub fn prove(
        ctx: &GroupContext,
        secret: &Scalar,
        public_key: &GroupElement,
    ) -> Result<Self, GroupError> {
        let nonce = ctx.random_scalar(1)?;
        Ok(Self::prove_fixed(ctx, secret, public_key, &nonce))
    }

    pub fn for_key_pair(ctx: &GroupContext, pair: &ElGamalKeyPair) -> Result<Self, GroupError> {
        Self::prove(ctx, pair.secret_key(), pair.public_key())
    }

    /// `h = g^u`, `c = H(K, h)`, `v = u + s·c`.
    pub fn prove_fixed(
        ctx: &GroupContext,
        secret: &Scalar,
        public_key: &GroupElement,
        nonce: &Scalar,
    ) -> Self {
        let h = ctx.g_pow(nonce);
        let challenge = ctx.hash_to_scalar(SCHNORR_DOMAIN, &[public_key, &h]);
        let response = ctx.add_q(nonce, &ctx.mul_q(secret, &challenge));
        SchnorrProof {
            public_key: public_key.clone(),
            challenge,
            response,
        }
    }

    pub fn verify(&self, ctx: &GroupContext, public_key: &GroupElement) -> Verification {
        let mut result = Verification::default();
        result.check(&self.public_key == public_key, ProofCheck::PublicKeyMismatch);
        result.check(ctx.is_valid_residue(public_key), ProofCheck::InvalidPublicKey);
        result.check(
            ctx.is_valid_scalar(&self.challenge),
            ProofCheck::ChallengeOutOfRange,
        );
        result.check(
            ctx.is_valid_scalar(&self.response),
            ProofCheck::ResponseOutOfRange,
        );

        // h' = g^v / K^c
        let recomputed = ctx
            .divide(
                &ctx.g_pow(&self.response),
                &ctx.power(public_key, &self.challenge),
            )
            .map(|h| ctx.hash_to_scalar(SCHNORR_DOMAIN, &[public_key, &h]));
        result.check(
            recomputed.as_ref() == Some(&self.challenge),
            ProofCheck::ChallengeMismatch,
        );
        result
    }
}

/// Proof that `share = pad^s` for the `s` behind `public_key = g^s`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChaumPedersenProof {
    pub challenge: Scalar,
    pub response: Scalar,
}

impl ChaumPedersenProof {
    pub fn prove(
        ctx: &GroupContext,
        ciphertext: &Ciphertext,
        secret: &Scalar,
        public_key: &GroupElement,
    ) -> Result<Self, GroupError> {
        let nonce = ctx.random_scalar(1)?;
        Ok(Self::prove_fixed(ctx, ciphertext, secret, public_key, &nonce))
    }

    /// `a = g^u`, `b = pad^u`, `c = H(K, pad, M, a, b)`, `v = u + s·c`.
    pub fn prove_fixed(
        ctx: &GroupContext,
        ciphertext: &Ciphertext,
        secret: &Scalar,
        public_key: &GroupElement,
        nonce: &Scalar,
    ) -> Self {
        let share = ctx.power(&ciphertext.pad, secret);
        let a = ctx.g_pow(nonce);
        let b = ctx.power(&ciphertext.pad, nonce);
        let challenge = ctx.hash_to_scalar(
            DECRYPTION_SHARE_DOMAIN,
            &[public_key, &ciphertext.pad, &share, &a, &b],
        );
        let response = ctx.add_q(nonce, &ctx.mul_q(secret, &challenge));
        ChaumPedersenProof {
            challenge,
            response,
        }
    }

    pub fn verify(
        &self,
        ctx: &GroupContext,
        ciphertext: &Ciphertext,
        public_key: &GroupElement,
        share: &GroupElement,
    ) -> Verification {
        let mut result = Verification::default();
        result.check(ctx.is_valid_residue(public_key), ProofCheck::InvalidPublicKey);
        result.check(
            ctx.is_valid_residue(&ciphertext.pad),
            ProofCheck::InvalidCiphertext,
        );
        result.check(ctx.is_valid_residue(share), ProofCheck::InvalidShare);
        result.check(
            ctx.is_valid_scalar(&self.challenge),
            ProofCheck::ChallengeOutOfRange,
        );
        result.check(
            ctx.is_valid_scalar(&self.response),
            ProofCheck::ResponseOutOfRange,
        );

        // a' = g^v / K^c, b' = pad^v / M^c
        let a = ctx.divide(
            &ctx.g_pow(&self.response),
            &ctx.power(public_key, &self.challenge),
        );
        let b = ctx.divide(
            &ctx.power(&ciphertext.pad, &self.response),
            &ctx.power(share, &self.challenge),
        );
        let recomputed = match (a, b) {
            (Some(a), Some(b)) => Some(ctx.hash_to_scalar(
                DECRYPTION_SHARE_DOMAIN,
                &[public_key, &ciphertext.pad, share, &a, &b],
            )),
            _ => None,
        };
        result.check(
            recomputed.as_ref() == Some(&self.challenge),
            ProofCheck::ChallengeMismatch,
        );
        result
    }
}

/// Proof that a ciphertext encrypts either 0 or 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisjunctiveChaumPedersenProof {
    pub challenge: Scalar,
    pub zero_challenge: Scalar,
    pub zero_response: Scalar,
    pub one_challenge: Scalar,
    pub one_response: Scalar,
}

impl DisjunctiveChaumPedersenProof {
    /// Simulates the branch that is false and proves the true one.
    pub fn prove(
        ctx: &GroupContext,
        ciphertext: &Ciphertext,
        public_key: &GroupElement,
        nonce: &Scalar,
        is_one: bool,
    ) -> Result<Self, GroupError> {
        let u = ctx.random_scalar(1)?;
        let fake_challenge = ctx.random_scalar(0)?;
        let fake_response = ctx.random_scalar(0)?;
        let fake_plaintext = if is_one { 0 } else { 1 };
        let (fake_a, fake_b) = simulate_branch(
            ctx,
            ciphertext,
            public_key,
            fake_plaintext,
            &fake_challenge,
            &fake_response,
        )
        .ok_or(GroupError::NotInvertible)?;
        let real_a = ctx.g_pow(&u);
        let real_b = ctx.power(public_key, &u);

        let (a0, b0, a1, b1) = if is_one {
            (&fake_a, &fake_b, &real_a, &real_b)
        } else {
            (&real_a, &real_b, &fake_a, &fake_b)
        };
        let challenge = range_challenge(ctx, ciphertext, public_key, a0, b0, a1, b1);
        let real_challenge = ctx.sub_q(&challenge, &fake_challenge);
        let real_response = ctx.add_q(&u, &ctx.mul_q(&real_challenge, nonce));

        let proof = if is_one {
            DisjunctiveChaumPedersenProof {
                challenge,
                zero_challenge: fake_challenge,
                zero_response: fake_response,
                one_challenge: real_challenge,
                one_response: real_response,
            }
        } else {
            DisjunctiveChaumPedersenProof {
                challenge,
                zero_challenge: real_challenge,
                zero_response: real_response,
                one_challenge: fake_challenge,
                one_response: fake_response,
            }
        };
        Ok(proof)
    }

    pub fn verify(
        &self,
        ctx: &GroupContext,
        ciphertext: &Ciphertext,
        public_key: &GroupElement,
    ) -> Verification {
        let mut result = Verification::default();
        result.check(ctx.is_valid_residue(public_key), ProofCheck::InvalidPublicKey);
        result.check(ciphertext.is_valid(ctx), ProofCheck::InvalidCiphertext);
        for s in [&self.challenge, &self.zero_challenge, &self.one_challenge] {
            result.check(ctx.is_valid_scalar(s), ProofCheck::ChallengeOutOfRange);
        }
        for s in [&self.zero_response, &self.one_response] {
            result.check(ctx.is_valid_scalar(s), ProofCheck::ResponseOutOfRange);
        }

        let zero = simulate_branch(
            ctx,
            ciphertext,
            public_key,
            0,
            &self.zero_challenge,
            &self.zero_response,
        );
        let one = simulate_branch(
            ctx,
            ciphertext,
            public_key,
            1,
            &self.one_challenge,
            &self.one_response,
        );
        let consistent = match (zero, one) {
            (Some((a0, b0)), Some((a1, b1))) => {
                let expected = range_challenge(ctx, ciphertext, public_key, &a0, &b0, &a1, &b1);
                expected == self.challenge
                    && ctx.add_q(&self.zero_challenge, &self.one_challenge) == self.challenge
            }
            _ => false,
        };
        result.check(consistent, ProofCheck::ChallengeMismatch);
        result
    }
}

/// Commitments of one branch: `a = g^v / pad^c`, `b = K^v / (data / g^m)^c`.
fn simulate_branch(
    ctx: &GroupContext,
    ciphertext: &Ciphertext,
    public_key: &GroupElement,
    plaintext: u64,
    challenge: &Scalar,
    response: &Scalar,
) -> Option<(GroupElement, GroupElement)> {
    let a = ctx.divide(
        &ctx.g_pow(response),
        &ctx.power(&ciphertext.pad, challenge),
    )?;
    let blinded = ctx.divide(&ciphertext.data, &ctx.g_pow(&Scalar::from(plaintext)))?;
    let b = ctx.divide(
        &ctx.power(public_key, response),
        &ctx.power(&blinded, challenge),
    )?;
    Some((a, b))
}

fn range_challenge(
    ctx: &GroupContext,
    ciphertext: &Ciphertext,
    public_key: &GroupElement,
    a0: &GroupElement,
    b0: &GroupElement,
    a1: &GroupElement,
    b1: &GroupElement,
) -> Scalar {
    let mut transcript = Transcript::new(RANGE_DOMAIN);
    for e in [public_key, &ciphertext.pad, &ciphertext.data, a0, b0, a1, b1] {
        transcript.append_element(ctx, e);
    }
    transcript.challenge(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elgamal::{encrypt, encrypt_fixed_with_proof};
    use crate::group::test_context;
    use num_bigint::BigUint;

    fn bump(ctx: &GroupContext, s: &Scalar) -> Scalar {
        ctx.add_q(s, &Scalar::one())
    }

    #[test]
    fn test_schnorr_valid() {
        let ctx = test_context();
        for _ in 0..5 {
            let pair = ElGamalKeyPair::random(&ctx).unwrap();
            let proof = SchnorrProof::for_key_pair(&ctx, &pair).unwrap();
            let verification = proof.verify(&ctx, pair.public_key());
            assert!(verification.is_valid(), "{:?}", verification.failures());
        }
    }

    #[test]
    fn test_schnorr_fixed_nonce_is_deterministic() {
        let ctx = test_context();
        let pair = ElGamalKeyPair::random(&ctx).unwrap();
        let nonce = Scalar::from(12345);
        let a = SchnorrProof::prove_fixed(&ctx, pair.secret_key(), pair.public_key(), &nonce);
        let b = SchnorrProof::prove_fixed(&ctx, pair.secret_key(), pair.public_key(), &nonce);
        assert_eq!(a, b);
    }

    #[test]
    fn test_schnorr_fresh_nonce_per_call() {
        let ctx = test_context();
        let pair = ElGamalKeyPair::random(&ctx).unwrap();
        let a = SchnorrProof::for_key_pair(&ctx, &pair).unwrap();
        let b = SchnorrProof::for_key_pair(&ctx, &pair).unwrap();
        assert_ne!(a.challenge, b.challenge);
    }

    #[test]
    fn test_schnorr_tampered_fields() {
        let ctx = test_context();
        let pair = ElGamalKeyPair::random(&ctx).unwrap();
        let proof = SchnorrProof::for_key_pair(&ctx, &pair).unwrap();

        let mut bad = proof.clone();
        bad.challenge = bump(&ctx, &bad.challenge);
        assert!(bad
            .verify(&ctx, pair.public_key())
            .failures()
            .contains(&ProofCheck::ChallengeMismatch));

        let mut bad = proof.clone();
        bad.response = bump(&ctx, &bad.response);
        assert!(!bad.verify(&ctx, pair.public_key()).is_valid());

        let mut bad = proof.clone();
        bad.public_key = ctx.multiply(&bad.public_key, &ctx.generator());
        assert!(bad
            .verify(&ctx, pair.public_key())
            .failures()
            .contains(&ProofCheck::PublicKeyMismatch));

        let other = ElGamalKeyPair::random(&ctx).unwrap();
        assert!(!proof.verify(&ctx, other.public_key()).is_valid());
    }

    #[test]
    fn test_schnorr_out_of_range_response() {
        let ctx = test_context();
        let pair = ElGamalKeyPair::random(&ctx).unwrap();
        let mut proof = SchnorrProof::for_key_pair(&ctx, &pair).unwrap();
        // v + q is congruent to v but must still be rejected.
        proof.response = Scalar::new(proof.response.value() + ctx.q());
        let verification = proof.verify(&ctx, pair.public_key());
        assert_eq!(verification.failures(), &[ProofCheck::ResponseOutOfRange]);
    }

    #[test]
    fn test_schnorr_non_residue_key() {
        let ctx = test_context();
        let key = GroupElement::new(BigUint::from(2u8));
        let proof = SchnorrProof::prove_fixed(&ctx, &Scalar::from(3), &key, &Scalar::from(5));
        assert!(proof
            .verify(&ctx, &key)
            .failures()
            .contains(&ProofCheck::InvalidPublicKey));
    }

    #[test]
    fn test_decryption_share_proof() {
        let ctx = test_context();
        let pair = ElGamalKeyPair::random(&ctx).unwrap();
        let (c, _) = encrypt(&ctx, 7, pair.public_key()).unwrap();
        let share = ctx.power(&c.pad, pair.secret_key());
        let proof = ChaumPedersenProof::prove(&ctx, &c, pair.secret_key(), pair.public_key()).unwrap();
        assert!(proof.verify(&ctx, &c, pair.public_key(), &share).is_valid());

        let wrong_share = ctx.multiply(&share, &ctx.generator());
        assert!(!proof.verify(&ctx, &c, pair.public_key(), &wrong_share).is_valid());

        let mut bad = proof.clone();
        bad.response = bump(&ctx, &bad.response);
        assert!(!bad.verify(&ctx, &c, pair.public_key(), &share).is_valid());

        let other = ElGamalKeyPair::random(&ctx).unwrap();
        assert!(!proof.verify(&ctx, &c, other.public_key(), &share).is_valid());
    }

    #[test]
    fn test_decryption_share_proof_rejects_other_secret() {
        let ctx = test_context();
        let pair = ElGamalKeyPair::random(&ctx).unwrap();
        let other = ElGamalKeyPair::random(&ctx).unwrap();
        let (c, _) = encrypt(&ctx, 1, pair.public_key()).unwrap();
        // Share and proof from a secret that does not match the claimed key.
        let share = ctx.power(&c.pad, other.secret_key());
        let proof = ChaumPedersenProof::prove(&ctx, &c, other.secret_key(), pair.public_key()).unwrap();
        assert!(!proof.verify(&ctx, &c, pair.public_key(), &share).is_valid());
    }

    #[test]
    fn test_range_proof() {
        let ctx = test_context();
        let pair = ElGamalKeyPair::random(&ctx).unwrap();
        let nonce = ctx.random_scalar(1).unwrap();
        let (c, proof) = encrypt_fixed_with_proof(&ctx, 1, pair.public_key(), &nonce).unwrap();
        assert!(proof.verify(&ctx, &c, pair.public_key()).is_valid());

        // A valid proof for one ciphertext does not transfer to another.
        let (other, _) = encrypt(&ctx, 1, pair.public_key()).unwrap();
        assert!(!proof.verify(&ctx, &other, pair.public_key()).is_valid());

        let mut bad = proof.clone();
        bad.zero_challenge = bump(&ctx, &bad.zero_challenge);
        assert!(!bad.verify(&ctx, &c, pair.public_key()).is_valid());
    }

    #[test]
    fn test_range_proof_cannot_cover_two() {
        let ctx = test_context();
        let pair = ElGamalKeyPair::random(&ctx).unwrap();
        let nonce = ctx.random_scalar(1).unwrap();
        let (two, _) = encrypt(&ctx, 2, pair.public_key()).unwrap();
        // Proving "one" with a ciphertext of two: the real branch does not hold.
        let proof =
            DisjunctiveChaumPedersenProof::prove(&ctx, &two, pair.public_key(), &nonce, true)
                .unwrap();
        assert!(!proof.verify(&ctx, &two, pair.public_key()).is_valid());
    }
}
