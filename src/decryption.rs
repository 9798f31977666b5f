//! Threshold decryption with compensation for missing guardians.
//!
//! For a ciphertext `(pad, data)` and a set of present guardians `P` with
//! `|P| >= k`:
//!
//! * every `i ∈ P` contributes `pad^{a_{i,0}}`
//! * for every missing `ℓ`, every `i ∈ P` contributes `pad^{P_ℓ(x_i)}` and
//!   `M_ℓ = Π_i (pad^{P_ℓ(x_i)})^{w_i}` recovers `pad^{P_ℓ(0)}` in the group
//! * `g^m = data / (Π_i pad^{a_{i,0}} · Π_ℓ M_ℓ)`
//!
//! `w_i` are the Lagrange coefficients at zero over the coordinates of `P`.
//! No share is combined before every proof has been checked.

use std::collections::{BTreeMap, BTreeSet};

use rayon::{prelude::*, ThreadPoolBuilder};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, ElectionConfig};
use crate::decryption_share::{
    CompensatedDecryption, DecryptingTrustee, PartialDecryption, TrusteeError,
};
use crate::elgamal::Ciphertext;
use crate::group::{GroupContext, GroupElement, Scalar};
use crate::key_ceremony::{
    check_coordinates, guardian_share_public_key, joint_public_key, CeremonyError, PublicKeys,
};
use crate::tally::{EncryptedTally, PlaintextSelection, PlaintextTally};
use crate::zk_proof::ProofCheck;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecryptionError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("invalid guardian public keys: {0}")]
    PublicKeys(#[from] CeremonyError),
    #[error("{present} guardians present, quorum is {quorum}")]
    InsufficientGuardians { present: usize, quorum: u32 },
    #[error("guardian {guardian} is not part of this election")]
    UnknownGuardian { guardian: String },
    #[error("guardian {guardian} listed twice")]
    DuplicateGuardian { guardian: String },
    #[error("guardian {guardian} claims x-coordinate {claimed}, published {published}")]
    CoordinateMismatch {
        guardian: String,
        claimed: u32,
        published: u32,
    },
    #[error("x-coordinates must be distinct and positive")]
    DuplicateCoordinate,
    #[error("selection {selection}: invalid proof from {guardian} (compensating for {missing:?}): {failures:?}")]
    InvalidProof {
        selection: String,
        guardian: String,
        missing: Option<String>,
        failures: Vec<ProofCheck>,
    },
    #[error("selection {selection}: no share from {guardian} to reconstruct {missing}")]
    MissingShareForReconstruction {
        selection: String,
        missing: String,
        guardian: String,
    },
    #[error("selection {selection}: unexpected share from {guardian} for {missing}")]
    UnexpectedShare {
        selection: String,
        guardian: String,
        missing: String,
    },
    #[error("selection {selection}: guardian {guardian} failed: {source}")]
    Trustee {
        selection: String,
        guardian: String,
        source: TrusteeError,
    },
    #[error("selection {selection}: ciphertext is not in the group")]
    InvalidCiphertext { selection: String },
    #[error("selection {selection}: plaintext outside the searchable range")]
    DecryptionFailed { selection: String },
    #[error("thread pool creation failed: {0}")]
    ThreadPool(String),
}

/// `w_i = Π_{j≠i} x_j / (x_j - x_i) mod q` for every `x_i` in `xs`.
pub fn lagrange_coefficients(
    ctx: &GroupContext,
    xs: &[u32],
) -> Result<BTreeMap<u32, Scalar>, DecryptionError> {
    let distinct: BTreeSet<u32> = xs.iter().copied().collect();
    if distinct.len() != xs.len() || distinct.contains(&0) {
        return Err(DecryptionError::DuplicateCoordinate);
    }
    xs.iter()
        .map(|&i| {
            let xi = Scalar::from(u64::from(i));
            let mut numerator = Scalar::one();
            let mut denominator = Scalar::one();
            for &j in xs.iter().filter(|&&j| j != i) {
                let xj = Scalar::from(u64::from(j));
                numerator = ctx.mul_q(&numerator, &xj);
                denominator = ctx.mul_q(&denominator, &ctx.sub_q(&xj, &xi));
            }
            let inverse = ctx
                .inv_q(&denominator)
                .ok_or(DecryptionError::DuplicateCoordinate)?;
            Ok((i, ctx.mul_q(&numerator, &inverse)))
        })
        .collect()
}

/// Who is present, who is missing, and the interpolation weights.
struct Plan<'k> {
    missing: Vec<&'k PublicKeys>,
    weights: BTreeMap<u32, Scalar>,
}

/// Combines decryption shares from a quorum of guardians.
///
/// Holds only public data: the published [PublicKeys] of every guardian.
pub struct Decryptor<'a> {
    ctx: &'a GroupContext,
    config: ElectionConfig,
    public_keys: BTreeMap<String, PublicKeys>,
}

impl<'a> Decryptor<'a> {
    /// Checks the key set is the complete, well-formed output of a ceremony
    /// for `config`.
    pub fn new(
        ctx: &'a GroupContext,
        config: ElectionConfig,
        public_keys: Vec<PublicKeys>,
    ) -> Result<Self, DecryptionError> {
        config.validate()?;
        if public_keys.len() != config.guardians as usize {
            return Err(CeremonyError::WrongParticipantCount {
                expected: config.guardians,
                actual: public_keys.len(),
            }
            .into());
        }
        check_coordinates(
            public_keys
                .iter()
                .map(|k| (k.guardian_id.as_str(), k.x_coordinate)),
        )?;
        for keys in &public_keys {
            if keys.coefficients().len() != config.quorum as usize {
                return Err(CeremonyError::WrongCommitmentCount {
                    guardian: keys.guardian_id.clone(),
                    expected: config.quorum as usize,
                    actual: keys.coefficients().len(),
                }
                .into());
            }
            keys.verify(ctx)?;
        }
        let public_keys = public_keys
            .into_iter()
            .map(|k| (k.guardian_id.clone(), k))
            .collect();
        Ok(Decryptor {
            ctx,
            config,
            public_keys,
        })
    }

    pub fn joint_public_key(&self) -> GroupElement {
        joint_public_key(self.ctx, self.public_keys.values())
    }

    /// `g^{s_i}` for the guardian `guardian_id`.
    pub fn guardian_share_public_key(&self, guardian_id: &str) -> Option<GroupElement> {
        let x = self.public_keys.get(guardian_id)?.x_coordinate;
        Some(guardian_share_public_key(self.ctx, x, self.public_keys.values()))
    }

    fn pool(&self) -> Result<rayon::ThreadPool, DecryptionError> {
        ThreadPoolBuilder::new()
            .num_threads(self.config.workers)
            .build()
            .map_err(|e| DecryptionError::ThreadPool(e.to_string()))
    }

    fn published(&self, guardian_id: &str) -> Result<&PublicKeys, DecryptionError> {
        self.public_keys
            .get(guardian_id)
            .ok_or_else(|| DecryptionError::UnknownGuardian {
                guardian: guardian_id.to_string(),
            })
    }

    /// Validates the present set against the published keys before any
    /// share is requested.
    fn plan<'t>(
        &self,
        present: impl IntoIterator<Item = (&'t str, u32)>,
    ) -> Result<Plan<'_>, DecryptionError> {
        let mut seen = BTreeSet::new();
        let mut xs = Vec::new();
        for (id, claimed) in present {
            let published = self.published(id)?;
            if !seen.insert(id) {
                return Err(DecryptionError::DuplicateGuardian {
                    guardian: id.to_string(),
                });
            }
            if published.x_coordinate != claimed {
                return Err(DecryptionError::CoordinateMismatch {
                    guardian: id.to_string(),
                    claimed,
                    published: published.x_coordinate,
                });
            }
            xs.push(claimed);
        }
        if xs.len() < self.config.quorum as usize {
            return Err(DecryptionError::InsufficientGuardians {
                present: xs.len(),
                quorum: self.config.quorum,
            });
        }
        let missing = self
            .public_keys
            .values()
            .filter(|k| !seen.contains(k.guardian_id.as_str()))
            .collect();
        let weights = lagrange_coefficients(self.ctx, &xs)?;
        Ok(Plan { missing, weights })
    }

    /// Decrypts one ciphertext with the guardians in `present`.
    pub fn decrypt_ciphertext(
        &self,
        selection_id: &str,
        ciphertext: &Ciphertext,
        present: &[&dyn DecryptingTrustee],
    ) -> Result<PlaintextSelection, DecryptionError> {
        let plan = self.plan(present.iter().map(|t| (t.id(), t.x_coordinate())))?;
        let pool = self.pool()?;
        pool.install(|| self.decrypt_selection(selection_id, ciphertext, present, &plan))
    }

    /// Decrypts every selection of `tally`. Selections are independent and
    /// run in parallel on `workers` threads.
    pub fn decrypt_tally(
        &self,
        tally: &EncryptedTally,
        present: &[&dyn DecryptingTrustee],
    ) -> Result<PlaintextTally, DecryptionError> {
        let plan = self.plan(present.iter().map(|t| (t.id(), t.x_coordinate())))?;
        let pool = self.pool()?;
        let selections = pool.install(|| {
            tally
                .selections()
                .collect::<Vec<_>>()
                .into_par_iter()
                .map(|(contest, selection, ciphertext)| -> Result<_, DecryptionError> {
                    let plaintext =
                        self.decrypt_selection(selection, ciphertext, present, &plan)?;
                    Ok((contest, selection, plaintext))
                })
                .collect::<Result<Vec<_>, _>>()
        })?;

        let mut result = PlaintextTally::default();
        for (contest, selection, plaintext) in selections {
            result
                .contests
                .entry(contest.to_string())
                .or_default()
                .insert(selection.to_string(), plaintext);
        }
        info!(
            selections = tally.selections().count(),
            present = present.len(),
            missing = plan.missing.len(),
            "tally decrypted"
        );
        Ok(result)
    }

    fn decrypt_selection(
        &self,
        selection_id: &str,
        ciphertext: &Ciphertext,
        present: &[&dyn DecryptingTrustee],
        plan: &Plan<'_>,
    ) -> Result<PlaintextSelection, DecryptionError> {
        if !ciphertext.is_valid(self.ctx) {
            return Err(DecryptionError::InvalidCiphertext {
                selection: selection_id.to_string(),
            });
        }
        let trustee_error = |guardian: &str, source: TrusteeError| match source {
            TrusteeError::MissingShare { missing, .. } => {
                DecryptionError::MissingShareForReconstruction {
                    selection: selection_id.to_string(),
                    missing,
                    guardian: guardian.to_string(),
                }
            }
            source => DecryptionError::Trustee {
                selection: selection_id.to_string(),
                guardian: guardian.to_string(),
                source,
            },
        };

        let partials = present
            .par_iter()
            .map(|t| {
                t.partial_decrypt(self.ctx, ciphertext)
                    .map_err(|e| trustee_error(t.id(), e))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let requests: Vec<(&dyn DecryptingTrustee, &PublicKeys)> = plan
            .missing
            .iter()
            .flat_map(|m| present.iter().map(move |t| (*t, *m)))
            .collect();
        let compensated = requests
            .into_par_iter()
            .map(|(t, missing)| {
                t.compensated_decrypt(self.ctx, missing, ciphertext)
                    .map_err(|e| trustee_error(t.id(), e))
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.combine(selection_id, ciphertext, partials, compensated)
    }

    /// Verifies every share of one selection without combining them.
    pub fn verify_selection(
        &self,
        selection_id: &str,
        ciphertext: &Ciphertext,
        partials: &[PartialDecryption],
        compensated: &[CompensatedDecryption],
    ) -> Result<(), DecryptionError> {
        let invalid = |guardian: &str, missing: Option<&str>, failures: &[ProofCheck]| {
            warn!(
                selection = selection_id,
                guardian,
                missing,
                ?failures,
                "decryption share rejected"
            );
            DecryptionError::InvalidProof {
                selection: selection_id.to_string(),
                guardian: guardian.to_string(),
                missing: missing.map(str::to_string),
                failures: failures.to_vec(),
            }
        };

        let mut present = Vec::with_capacity(partials.len());
        for partial in partials {
            let published = self.published(&partial.guardian_id)?;
            present.push((partial.guardian_id.as_str(), published.x_coordinate));
        }
        let plan = self.plan(present.iter().copied())?;

        for partial in partials {
            let published = self.published(&partial.guardian_id)?;
            let verification =
                partial.verify(self.ctx, ciphertext, published.election_public_key());
            if !verification.is_valid() {
                return Err(invalid(&partial.guardian_id, None, verification.failures()));
            }
        }

        let mut by_pair: BTreeMap<(&str, &str), &CompensatedDecryption> = BTreeMap::new();
        for share in compensated {
            let known = plan
                .missing
                .iter()
                .any(|m| m.guardian_id == share.missing_guardian_id)
                && present.iter().any(|(id, _)| *id == share.guardian_id);
            let duplicate = by_pair
                .insert(
                    (share.guardian_id.as_str(), share.missing_guardian_id.as_str()),
                    share,
                )
                .is_some();
            if !known || duplicate {
                return Err(DecryptionError::UnexpectedShare {
                    selection: selection_id.to_string(),
                    guardian: share.guardian_id.clone(),
                    missing: share.missing_guardian_id.clone(),
                });
            }
        }
        for missing in &plan.missing {
            for &(guardian, x) in &present {
                let share = by_pair
                    .get(&(guardian, missing.guardian_id.as_str()))
                    .ok_or_else(|| DecryptionError::MissingShareForReconstruction {
                        selection: selection_id.to_string(),
                        missing: missing.guardian_id.clone(),
                        guardian: guardian.to_string(),
                    })?;
                let verification = share.verify(self.ctx, ciphertext, missing, x);
                if !verification.is_valid() {
                    return Err(invalid(
                        guardian,
                        Some(missing.guardian_id.as_str()),
                        verification.failures(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Verifies all shares, then reconstructs each missing guardian's
    /// contribution in the group and recovers the plaintext.
    pub fn combine(
        &self,
        selection_id: &str,
        ciphertext: &Ciphertext,
        partials: Vec<PartialDecryption>,
        compensated: Vec<CompensatedDecryption>,
    ) -> Result<PlaintextSelection, DecryptionError> {
        self.verify_selection(selection_id, ciphertext, &partials, &compensated)?;
        let present = partials
            .iter()
            .map(|p| {
                self.published(&p.guardian_id)
                    .map(|k| (p.guardian_id.as_str(), k.x_coordinate))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let plan = self.plan(present.iter().copied())?;
        let x_of: BTreeMap<&str, u32> = present.into_iter().collect();

        let mut total = self.ctx.product(partials.iter().map(|p| &p.share));
        for missing in &plan.missing {
            let reconstructed = compensated
                .iter()
                .filter(|c| c.missing_guardian_id == missing.guardian_id)
                .fold(GroupElement::one(), |acc, c| {
                    match x_of
                        .get(c.guardian_id.as_str())
                        .and_then(|x| plan.weights.get(x))
                    {
                        Some(w) => self.ctx.multiply(&acc, &self.ctx.power(&c.share, w)),
                        None => acc,
                    }
                });
            total = self.ctx.multiply(&total, &reconstructed);
        }

        let failed = || DecryptionError::DecryptionFailed {
            selection: selection_id.to_string(),
        };
        let value = self.ctx.divide(&ciphertext.data, &total).ok_or_else(failed)?;
        let count = self.ctx.discrete_log(&value).ok_or_else(failed)?;
        debug!(
            selection = selection_id,
            count,
            missing = plan.missing.len(),
            "selection decrypted"
        );
        Ok(PlaintextSelection {
            count,
            value,
            partials,
            compensated,
        })
    }
}
