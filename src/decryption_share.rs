use thiserror::Error;

use crate::elgamal::Ciphertext;
use crate::group::{GroupContext, GroupElement, GroupError, Scalar};
use crate::key_ceremony::PublicKeys;
use crate::polynomial::evaluate_commitments;
use crate::zk_proof::{ChaumPedersenProof, ProofCheck, Verification};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrusteeError {
    #[error("guardian {guardian} has not finished the key ceremony")]
    NotReady { guardian: String },
    #[error("guardian {guardian} holds no key share from {missing}")]
    MissingShare { guardian: String, missing: String },
    #[error("proof generation failed: {0}")]
    ProofGeneration(#[from] GroupError),
}

/// The decryption-side capabilities of a guardian.
pub trait DecryptingTrustee: Send + Sync {
    fn id(&self) -> &str;
    fn x_coordinate(&self) -> u32;

    /// `pad^{a_0}` with a proof against the guardian's `K_0`.
    fn partial_decrypt(
        &self,
        ctx: &GroupContext,
        ciphertext: &Ciphertext,
    ) -> Result<PartialDecryption, TrusteeError>;

    /// `pad^{P_ℓ(x)}` for the missing guardian `ℓ`, from the share `ℓ` sent
    /// this guardian during the ceremony.
    fn compensated_decrypt(
        &self,
        ctx: &GroupContext,
        missing: &PublicKeys,
        ciphertext: &Ciphertext,
    ) -> Result<CompensatedDecryption, TrusteeError>;
}

/// A present guardian's share `pad^{a_0}` of one ciphertext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialDecryption {
    pub guardian_id: String,
    pub share: GroupElement,
    pub proof: ChaumPedersenProof,
}

impl PartialDecryption {
    /// Checks the share against the guardian's election public key `K_0`.
    pub fn verify(
        &self,
        ctx: &GroupContext,
        ciphertext: &Ciphertext,
        election_public_key: &GroupElement,
    ) -> Verification {
        self.proof
            .verify(ctx, ciphertext, election_public_key, &self.share)
    }
}

/// A present guardian's share `pad^{P_ℓ(x_i)}` computed for a missing
/// guardian `ℓ` from the key share `ℓ` sent it during the ceremony.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompensatedDecryption {
    pub guardian_id: String,
    pub missing_guardian_id: String,
    pub share: GroupElement,
    pub recovery_public_key: GroupElement,
    pub proof: ChaumPedersenProof,
}

impl CompensatedDecryption {
    /// Recomputes the recovery key from the missing guardian's commitments at
    /// the computing guardian's coordinate and checks the proof against it.
    pub fn verify(
        &self,
        ctx: &GroupContext,
        ciphertext: &Ciphertext,
        missing: &PublicKeys,
        guardian_x: u32,
    ) -> Verification {
        let expected = recovery_public_key(ctx, missing, guardian_x);
        let mut result = self
            .proof
            .verify(ctx, ciphertext, &expected, &self.share);
        if expected != self.recovery_public_key || missing.guardian_id != self.missing_guardian_id
        {
            result = result.with_failure(ProofCheck::PublicKeyMismatch);
        }
        result
    }
}

pub(crate) fn partial_decryption(
    ctx: &GroupContext,
    guardian_id: &str,
    secret: &Scalar,
    public_key: &GroupElement,
    ciphertext: &Ciphertext,
) -> Result<PartialDecryption, TrusteeError> {
    let share = ctx.power(&ciphertext.pad, secret);
    let proof = ChaumPedersenProof::prove(ctx, ciphertext, secret, public_key)?;
    Ok(PartialDecryption {
        guardian_id: guardian_id.to_string(),
        share,
        proof,
    })
}

pub(crate) fn compensated_decryption(
    ctx: &GroupContext,
    guardian_id: &str,
    x_coordinate: u32,
    received_share: &Scalar,
    missing: &PublicKeys,
    ciphertext: &Ciphertext,
) -> Result<CompensatedDecryption, TrusteeError> {
    let recovery_public_key = recovery_public_key(ctx, missing, x_coordinate);
    let share = ctx.power(&ciphertext.pad, received_share);
    let proof = ChaumPedersenProof::prove(ctx, ciphertext, received_share, &recovery_public_key)?;
    Ok(CompensatedDecryption {
        guardian_id: guardian_id.to_string(),
        missing_guardian_id: missing.guardian_id.clone(),
        share,
        recovery_public_key,
        proof,
    })
}

/// `g^{P_ℓ(x)}` from `ℓ`'s published commitments.
pub fn recovery_public_key(ctx: &GroupContext, missing: &PublicKeys, x: u32) -> GroupElement {
    evaluate_commitments(ctx, &missing.commitments(), x)
}
