//! Guardian key ceremony: public key exchange, encrypted share transport and
//! a coordinator that drives both rounds across all guardians.
//!
//! Every guardian draws a secret polynomial of degree `k - 1`, publishes
//! Feldman commitments to its coefficients together with Schnorr proofs of
//! knowledge ([PublicKeys]), then sends each other guardian the evaluation of
//! its polynomial at that guardian's x-coordinate, sealed under the
//! recipient's election public key ([EncryptedKeyShare]). A recipient accepts
//! a share only after checking it against the sender's commitments.
//!
//! The joint election public key is the product of every guardian's `K_0`
//! and is known as soon as all [PublicKeys] have been exchanged.

use chacha20poly1305::{
    aead::{Aead, Payload},
    ChaCha20Poly1305, KeyInit, Nonce,
};
use hkdf::Hkdf;
use num_bigint::BigUint;
use parking_lot::Mutex;
use rayon::{prelude::*, ThreadPoolBuilder};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};
use zeroize::Zeroize;

use crate::config::{ConfigError, ElectionConfig};
use crate::elgamal::ElGamalError;
use crate::group::{GroupContext, GroupElement, GroupError, Scalar};
use crate::polynomial::{evaluate_commitments, PolynomialError};
use crate::zk_proof::{ProofCheck, SchnorrProof};

const SHARE_KDF_PREFIX: &[u8] = b"threshold-election/key-share/KDF/v1/";
const SHARE_KDF_INFO: &[u8] = b"key-share";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CeremonyError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("x-coordinate must be positive, got {0}")]
    InvalidCoordinate(u32),
    #[error("guardians {first} and {second} share x-coordinate {x}")]
    DuplicateCoordinate { x: u32, first: String, second: String },
    #[error("guardian id {0} appears twice")]
    DuplicateGuardianId(String),
    #[error("expected {expected} guardians, got {actual}")]
    WrongParticipantCount { expected: u32, actual: usize },
    #[error("guardian {guardian} not ready in state {state}")]
    NotReady {
        guardian: String,
        state: CeremonyState,
    },
    #[error("public keys carry no commitments")]
    EmptyCommitments,
    #[error("guardian {guardian} published {actual} commitments, expected {expected}")]
    WrongCommitmentCount {
        guardian: String,
        expected: usize,
        actual: usize,
    },
    #[error("invalid proof for coefficient {coefficient} of guardian {guardian}: {failures:?}")]
    InvalidProof {
        guardian: String,
        coefficient: usize,
        failures: Vec<ProofCheck>,
    },
    #[error("guardian {guardian} sent public keys that differ from earlier ones")]
    ConflictingPublicKeys { guardian: String },
    #[error("guardian {guardian} is not part of this ceremony")]
    UnexpectedGuardian { guardian: String },
    #[error("public keys of guardian {guardian} not yet received")]
    MissingPublicKeys { guardian: String },
    #[error("share from {sender} to {recipient} does not match the sender's commitments")]
    ShareMismatch { sender: String, recipient: String },
    #[error("share addressed to {addressed} delivered to {recipient}")]
    MisdirectedShare { addressed: String, recipient: String },
    #[error("could not encrypt share from {sender} to {recipient}")]
    ShareEncryption { sender: String, recipient: String },
    #[error("could not decrypt share from {sender}")]
    ShareDecryption { sender: String },
    #[error("guardian {guardian} did not complete the ceremony")]
    Incomplete { guardian: String },
    #[error("thread pool creation failed: {0}")]
    ThreadPool(String),
    #[error("invalid election key: {0}")]
    ElectionKey(#[from] ElGamalError),
    #[error("polynomial generation failed: {0}")]
    Polynomial(#[from] PolynomialError),
    #[error("random number generation failed: {0}")]
    RandomNumberError(#[from] GroupError),
}

/// Per-guardian ceremony progress. States only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CeremonyState {
    Initialized,
    KeysGenerated,
    PeerKeysReceived,
    SharesExchanged,
    Complete,
}

impl fmt::Display for CeremonyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CeremonyState::Initialized => "initialized",
            CeremonyState::KeysGenerated => "keys generated",
            CeremonyState::PeerKeysReceived => "peer keys received",
            CeremonyState::SharesExchanged => "shares exchanged",
            CeremonyState::Complete => "complete",
        };
        f.write_str(name)
    }
}

/// Commitment `K_j = g^{a_j}` with its proof of knowledge of `a_j`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoefficientCommitment {
    pub commitment: GroupElement,
    pub proof: SchnorrProof,
}

/// The message a guardian publishes to every other guardian.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKeys {
    pub guardian_id: String,
    pub x_coordinate: u32,
    coefficients: Vec<CoefficientCommitment>,
}

impl PublicKeys {
    pub fn new(
        guardian_id: impl Into<String>,
        x_coordinate: u32,
        coefficients: Vec<CoefficientCommitment>,
    ) -> Result<Self, CeremonyError> {
        if coefficients.is_empty() {
            return Err(CeremonyError::EmptyCommitments);
        }
        if x_coordinate == 0 {
            return Err(CeremonyError::InvalidCoordinate(x_coordinate));
        }
        Ok(PublicKeys {
            guardian_id: guardian_id.into(),
            x_coordinate,
            coefficients,
        })
    }

    pub fn coefficients(&self) -> &[CoefficientCommitment] {
        &self.coefficients
    }

    pub fn commitments(&self) -> Vec<GroupElement> {
        self.coefficients
            .iter()
            .map(|c| c.commitment.clone())
            .collect()
    }

    /// `K_0`, the guardian's election public key.
    pub fn election_public_key(&self) -> &GroupElement {
        &self.coefficients[0].commitment
    }

    /// Verifies every coefficient proof; the first failure rejects the message.
    pub fn verify(&self, ctx: &GroupContext) -> Result<(), CeremonyError> {
        for (coefficient, c) in self.coefficients.iter().enumerate() {
            let verification = c.proof.verify(ctx, &c.commitment);
            if !verification.is_valid() {
                return Err(CeremonyError::InvalidProof {
                    guardian: self.guardian_id.clone(),
                    coefficient,
                    failures: verification.failures().to_vec(),
                });
            }
        }
        Ok(())
    }
}

/// A key share sealed to its recipient's election public key.
///
/// `pad = g^r` and the shared secret `K_0^r` keys a ChaCha20-Poly1305
/// cipher through HKDF-SHA256, with both guardian ids as associated data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedKeyShare {
    pub sender_id: String,
    pub recipient_id: String,
    pub pad: GroupElement,
    pub ciphertext: Vec<u8>,
}

impl EncryptedKeyShare {
    pub fn seal(
        ctx: &GroupContext,
        sender_id: &str,
        recipient: &PublicKeys,
        share: &Scalar,
    ) -> Result<Self, CeremonyError> {
        let seal_error = || CeremonyError::ShareEncryption {
            sender: sender_id.to_string(),
            recipient: recipient.guardian_id.clone(),
        };
        let nonce = ctx.random_scalar(1)?;
        let pad = ctx.g_pow(&nonce);
        let shared = ctx.power(recipient.election_public_key(), &nonce);
        let cipher = share_cipher(ctx, &shared, sender_id, &recipient.guardian_id, &pad)
            .ok_or_else(seal_error)?;
        let mut plaintext = ctx.scalar_to_bytes(share);
        let aad = share_aad(sender_id, &recipient.guardian_id);
        let ciphertext = cipher.encrypt(
            &Nonce::default(),
            Payload {
                msg: &plaintext,
                aad: &aad,
            },
        );
        plaintext.zeroize();
        Ok(EncryptedKeyShare {
            sender_id: sender_id.to_string(),
            recipient_id: recipient.guardian_id.clone(),
            pad,
            ciphertext: ciphertext.map_err(|_| seal_error())?,
        })
    }

    pub fn open(
        &self,
        ctx: &GroupContext,
        recipient_secret: &Scalar,
    ) -> Result<Scalar, CeremonyError> {
        let open_error = || CeremonyError::ShareDecryption {
            sender: self.sender_id.clone(),
        };
        if !ctx.is_valid_residue(&self.pad) {
            return Err(open_error());
        }
        let shared = ctx.power(&self.pad, recipient_secret);
        let cipher = share_cipher(ctx, &shared, &self.sender_id, &self.recipient_id, &self.pad)
            .ok_or_else(open_error)?;
        let aad = share_aad(&self.sender_id, &self.recipient_id);
        let mut plaintext = cipher
            .decrypt(
                &Nonce::default(),
                Payload {
                    msg: &self.ciphertext,
                    aad: &aad,
                },
            )
            .map_err(|_| open_error())?;
        let value = BigUint::from_bytes_be(&plaintext);
        plaintext.zeroize();
        if &value >= ctx.q() {
            return Err(open_error());
        }
        Ok(Scalar::new(value))
    }
}

fn share_aad(sender: &str, recipient: &str) -> Vec<u8> {
    let mut aad = Vec::with_capacity(sender.len() + recipient.len() + 16);
    aad.extend_from_slice(&(sender.len() as u64).to_be_bytes());
    aad.extend_from_slice(sender.as_bytes());
    aad.extend_from_slice(&(recipient.len() as u64).to_be_bytes());
    aad.extend_from_slice(recipient.as_bytes());
    aad
}

fn share_cipher(
    ctx: &GroupContext,
    shared: &GroupElement,
    sender: &str,
    recipient: &str,
    pad: &GroupElement,
) -> Option<ChaCha20Poly1305> {
    let mut hasher = Sha256::new();
    hasher.update(SHARE_KDF_PREFIX);
    hasher.update(share_aad(sender, recipient));
    hasher.update(ctx.element_to_bytes(pad));
    let salt = hasher.finalize();

    let mut ikm = ctx.element_to_bytes(shared);
    let prk = Hkdf::<Sha256>::new(Some(salt.as_ref()), &ikm);
    ikm.zeroize();
    let mut key = [0u8; 32];
    prk.expand(SHARE_KDF_INFO, &mut key).ok()?;
    let cipher = ChaCha20Poly1305::new_from_slice(&key).ok();
    key.zeroize();
    cipher
}

/// Product of every guardian's `K_0`.
pub fn joint_public_key<'a>(
    ctx: &GroupContext,
    keys: impl IntoIterator<Item = &'a PublicKeys>,
) -> GroupElement {
    ctx.product(keys.into_iter().map(|k| k.election_public_key()))
}

/// `g^{s_x}` where `s_x = Σ_ℓ P_ℓ(x)` is the secret key share of the
/// guardian at coordinate `x`.
pub fn guardian_share_public_key<'a>(
    ctx: &GroupContext,
    x: u32,
    keys: impl IntoIterator<Item = &'a PublicKeys>,
) -> GroupElement {
    keys.into_iter().fold(GroupElement::one(), |acc, k| {
        ctx.multiply(&acc, &evaluate_commitments(ctx, &k.commitments(), x))
    })
}

/// Rejects zero or repeated x-coordinates and repeated ids.
pub fn check_coordinates<'a>(
    guardians: impl IntoIterator<Item = (&'a str, u32)>,
) -> Result<(), CeremonyError> {
    let mut seen: BTreeMap<u32, &str> = BTreeMap::new();
    let mut ids = BTreeSet::new();
    for (id, x) in guardians {
        if x == 0 {
            return Err(CeremonyError::InvalidCoordinate(x));
        }
        if !ids.insert(id) {
            return Err(CeremonyError::DuplicateGuardianId(id.to_string()));
        }
        if let Some(first) = seen.insert(x, id) {
            return Err(CeremonyError::DuplicateCoordinate {
                x,
                first: first.to_string(),
                second: id.to_string(),
            });
        }
    }
    Ok(())
}

/// The ceremony-side capabilities of a guardian.
///
/// Receive handlers must be idempotent: a replayed message is accepted
/// without changing state.
pub trait CeremonyParticipant: Send {
    fn id(&self) -> &str;
    fn x_coordinate(&self) -> u32;
    fn public_keys(&self) -> Result<PublicKeys, CeremonyError>;
    fn share_for(
        &self,
        ctx: &GroupContext,
        recipient: &PublicKeys,
    ) -> Result<EncryptedKeyShare, CeremonyError>;
    fn receive_public_keys(
        &mut self,
        ctx: &GroupContext,
        peer: PublicKeys,
    ) -> Result<(), CeremonyError>;
    fn receive_encrypted_share(
        &mut self,
        ctx: &GroupContext,
        share: &EncryptedKeyShare,
    ) -> Result<(), CeremonyError>;
    fn is_complete(&self) -> bool;
}

/// Result of a successful ceremony.
pub struct CeremonyOutcome<P> {
    pub joint_public_key: GroupElement,
    pub public_keys: Vec<PublicKeys>,
    pub participants: Vec<P>,
}

/// Drives both exchange rounds among a fixed set of guardians.
///
/// Each guardian sits behind its own mutex so deliveries from different
/// senders are serialized per recipient while different recipients proceed
/// in parallel.
pub struct KeyCeremony<'a, P: CeremonyParticipant> {
    ctx: &'a GroupContext,
    config: ElectionConfig,
    participants: BTreeMap<String, Mutex<P>>,
}

impl<'a, P: CeremonyParticipant> KeyCeremony<'a, P> {
    /// Fails before any exchange if the guardian set does not match the
    /// configuration or coordinates collide.
    pub fn new(
        ctx: &'a GroupContext,
        config: ElectionConfig,
        participants: Vec<P>,
    ) -> Result<Self, CeremonyError> {
        config.validate()?;
        if participants.len() != config.guardians as usize {
            return Err(CeremonyError::WrongParticipantCount {
                expected: config.guardians,
                actual: participants.len(),
            });
        }
        check_coordinates(participants.iter().map(|p| (p.id(), p.x_coordinate())))?;
        let participants = participants
            .into_iter()
            .map(|p| (p.id().to_string(), Mutex::new(p)))
            .collect();
        Ok(KeyCeremony {
            ctx,
            config,
            participants,
        })
    }

    fn pool(&self) -> Result<rayon::ThreadPool, CeremonyError> {
        ThreadPoolBuilder::new()
            .num_threads(self.config.workers)
            .build()
            .map_err(|e| CeremonyError::ThreadPool(e.to_string()))
    }

    /// Round one: every guardian receives every other guardian's public keys.
    pub fn exchange_public_keys(&self) -> Result<Vec<PublicKeys>, CeremonyError> {
        let published = self
            .participants
            .values()
            .map(|p| p.lock().public_keys())
            .collect::<Result<Vec<_>, _>>()?;
        let pool = self.pool()?;
        pool.install(|| {
            self.participants
                .par_iter()
                .try_for_each(|(id, participant)| {
                    let mut participant = participant.lock();
                    for keys in published.iter().filter(|k| &k.guardian_id != id) {
                        participant.receive_public_keys(self.ctx, keys.clone())?;
                    }
                    Ok::<(), CeremonyError>(())
                })
        })?;
        debug!(guardians = published.len(), "public keys exchanged");
        Ok(published)
    }

    /// Round two: every guardian seals a share for every other guardian and
    /// each recipient opens and verifies it.
    pub fn exchange_key_shares(&self, published: &[PublicKeys]) -> Result<(), CeremonyError> {
        let pool = self.pool()?;
        pool.install(|| {
            let sealed = self
                .participants
                .par_iter()
                .map(|(id, sender)| {
                    let sender = sender.lock();
                    published
                        .iter()
                        .filter(|k| &k.guardian_id != id)
                        .map(|recipient| sender.share_for(self.ctx, recipient))
                        .collect::<Result<Vec<_>, _>>()
                })
                .collect::<Result<Vec<_>, _>>()?;

            sealed
                .into_par_iter()
                .flatten()
                .try_for_each(|share| {
                    let recipient = self.participants.get(&share.recipient_id).ok_or_else(|| {
                        CeremonyError::UnexpectedGuardian {
                            guardian: share.recipient_id.clone(),
                        }
                    })?;
                    let result = recipient.lock().receive_encrypted_share(self.ctx, &share);
                    if let Err(err) = &result {
                        warn!(
                            sender = %share.sender_id,
                            recipient = %share.recipient_id,
                            ?err,
                            "key share rejected"
                        );
                    }
                    result
                })
        })
    }

    /// Runs both rounds and checks every guardian completed.
    pub fn run(self) -> Result<CeremonyOutcome<P>, CeremonyError> {
        let published = self.exchange_public_keys()?;
        self.exchange_key_shares(&published)?;
        let participants = self
            .participants
            .into_values()
            .map(Mutex::into_inner)
            .collect::<Vec<_>>();
        if let Some(p) = participants.iter().find(|p| !p.is_complete()) {
            return Err(CeremonyError::Incomplete {
                guardian: p.id().to_string(),
            });
        }
        let joint_public_key = joint_public_key(self.ctx, &published);
        info!(
            guardians = participants.len(),
            quorum = self.config.quorum,
            "key ceremony complete"
        );
        Ok(CeremonyOutcome {
            joint_public_key,
            public_keys: published,
            participants,
        })
    }
}
