//! A single guardian's side of the key ceremony and of threshold decryption.
//!
//! [Guardian] is the live ceremony object: it owns the secret polynomial and
//! advances through [CeremonyState] only on verified input. Once the ceremony
//! is complete it can be turned into a [DecryptingGuardian], the record a
//! guardian keeps for the lifetime of the election.

use std::collections::BTreeMap;
use std::fmt;

use tracing::{debug, warn};
use zeroize::Zeroize;

use crate::config::ElectionConfig;
use crate::decryption_share::{
    compensated_decryption, partial_decryption, CompensatedDecryption, DecryptingTrustee,
    PartialDecryption, TrusteeError,
};
use crate::elgamal::{Ciphertext, ElGamalKeyPair};
use crate::group::{GroupContext, GroupElement, Scalar};
use crate::key_ceremony::{
    joint_public_key, CeremonyError, CeremonyParticipant, CeremonyState, CoefficientCommitment,
    EncryptedKeyShare, PublicKeys,
};
use crate::polynomial::{verify_share, SecretPolynomial};
use crate::zk_proof::SchnorrProof;

pub struct Guardian {
    id: String,
    x_coordinate: u32,
    guardians: u32,
    quorum: u32,
    polynomial: Option<SecretPolynomial>,
    public_keys: Option<PublicKeys>,
    // Indexed by guardian id, own entries included. Entries are only added.
    peer_keys: BTreeMap<String, PublicKeys>,
    received_shares: BTreeMap<String, Scalar>,
    secret_key_share: Option<Scalar>,
    state: CeremonyState,
}

impl Guardian {
    pub fn new(
        id: impl Into<String>,
        x_coordinate: u32,
        config: &ElectionConfig,
    ) -> Result<Self, CeremonyError> {
        config.validate()?;
        if x_coordinate == 0 {
            return Err(CeremonyError::InvalidCoordinate(x_coordinate));
        }
        Ok(Guardian {
            id: id.into(),
            x_coordinate,
            guardians: config.guardians,
            quorum: config.quorum,
            polynomial: None,
            public_keys: None,
            peer_keys: BTreeMap::new(),
            received_shares: BTreeMap::new(),
            secret_key_share: None,
            state: CeremonyState::Initialized,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn x_coordinate(&self) -> u32 {
        self.x_coordinate
    }

    pub fn state(&self) -> CeremonyState {
        self.state
    }

    /// Draws the degree `k - 1` polynomial, its commitments and their
    /// proofs. Calling it again keeps the existing keys.
    pub fn generate_keys(&mut self, ctx: &GroupContext) -> Result<(), CeremonyError> {
        if self.polynomial.is_some() {
            return Ok(());
        }
        let polynomial = SecretPolynomial::new_random(ctx, self.quorum as usize - 1)?;
        let coefficients = polynomial
            .coefficients()
            .iter()
            .zip(polynomial.commit(ctx))
            .map(|(secret, commitment)| -> Result<_, CeremonyError> {
                let proof = SchnorrProof::prove(ctx, secret, &commitment)?;
                Ok(CoefficientCommitment { commitment, proof })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let public_keys = PublicKeys::new(self.id.clone(), self.x_coordinate, coefficients)?;

        let own_share = polynomial.evaluate(ctx, self.x_coordinate);
        self.received_shares.insert(self.id.clone(), own_share);
        self.peer_keys.insert(self.id.clone(), public_keys.clone());
        self.public_keys = Some(public_keys);
        self.polynomial = Some(polynomial);
        self.advance(ctx);
        Ok(())
    }

    pub fn public_keys(&self) -> Result<PublicKeys, CeremonyError> {
        self.public_keys.clone().ok_or_else(|| self.not_ready())
    }

    /// Verifies and records a peer's public keys. A replay of an already
    /// accepted message is a no-op.
    pub fn receive_public_keys(
        &mut self,
        ctx: &GroupContext,
        peer: PublicKeys,
    ) -> Result<(), CeremonyError> {
        if self.polynomial.is_none() {
            return Err(self.not_ready());
        }
        if let Some(known) = self.peer_keys.get(&peer.guardian_id) {
            if known == &peer {
                return Ok(());
            }
            return Err(CeremonyError::ConflictingPublicKeys {
                guardian: peer.guardian_id,
            });
        }
        if self.peer_keys.len() >= self.guardians as usize {
            return Err(CeremonyError::UnexpectedGuardian {
                guardian: peer.guardian_id,
            });
        }
        if let Some(other) = self
            .peer_keys
            .values()
            .find(|k| k.x_coordinate == peer.x_coordinate)
        {
            return Err(CeremonyError::DuplicateCoordinate {
                x: peer.x_coordinate,
                first: other.guardian_id.clone(),
                second: peer.guardian_id,
            });
        }
        let actual = peer.coefficients().len();
        if actual != self.quorum as usize {
            return Err(CeremonyError::WrongCommitmentCount {
                guardian: peer.guardian_id,
                expected: self.quorum as usize,
                actual,
            });
        }
        if let Err(err) = peer.verify(ctx) {
            warn!(guardian = %self.id, peer = %peer.guardian_id, ?err, "public keys rejected");
            return Err(err);
        }

        debug!(guardian = %self.id, peer = %peer.guardian_id, "public keys accepted");
        self.peer_keys.insert(peer.guardian_id.clone(), peer);
        self.advance(ctx);
        Ok(())
    }

    /// `P(x)` for the guardian at coordinate `x`. The caller must seal the
    /// value before it leaves this process.
    pub fn key_share_for(&self, ctx: &GroupContext, x_coordinate: u32) -> Result<Scalar, CeremonyError> {
        if x_coordinate == 0 {
            return Err(CeremonyError::InvalidCoordinate(x_coordinate));
        }
        let polynomial = self.polynomial.as_ref().ok_or_else(|| self.not_ready())?;
        Ok(polynomial.evaluate(ctx, x_coordinate))
    }

    /// The share for `recipient`, sealed to its election public key.
    pub fn share_for(
        &self,
        ctx: &GroupContext,
        recipient: &PublicKeys,
    ) -> Result<EncryptedKeyShare, CeremonyError> {
        let mut share = self.key_share_for(ctx, recipient.x_coordinate)?;
        let sealed = EncryptedKeyShare::seal(ctx, &self.id, recipient, &share);
        share.zeroize();
        sealed
    }

    /// Accepts `P_sender(x)` after checking it against the sender's
    /// commitments.
    pub fn receive_key_share(
        &mut self,
        ctx: &GroupContext,
        sender_id: &str,
        share: Scalar,
    ) -> Result<(), CeremonyError> {
        if self.polynomial.is_none() {
            return Err(self.not_ready());
        }
        let sender = self
            .peer_keys
            .get(sender_id)
            .ok_or_else(|| CeremonyError::MissingPublicKeys {
                guardian: sender_id.to_string(),
            })?;
        if !verify_share(ctx, &sender.commitments(), self.x_coordinate, &share) {
            warn!(guardian = %self.id, sender = sender_id, "key share failed commitment check");
            return Err(CeremonyError::ShareMismatch {
                sender: sender_id.to_string(),
                recipient: self.id.clone(),
            });
        }
        // A second verified share from the same sender is necessarily equal.
        if !self.received_shares.contains_key(sender_id) {
            debug!(guardian = %self.id, sender = sender_id, "key share accepted");
            self.received_shares.insert(sender_id.to_string(), share);
            self.advance(ctx);
        }
        Ok(())
    }

    pub fn receive_encrypted_share(
        &mut self,
        ctx: &GroupContext,
        share: &EncryptedKeyShare,
    ) -> Result<(), CeremonyError> {
        if share.recipient_id != self.id {
            return Err(CeremonyError::MisdirectedShare {
                addressed: share.recipient_id.clone(),
                recipient: self.id.clone(),
            });
        }
        let polynomial = self.polynomial.as_ref().ok_or_else(|| self.not_ready())?;
        let plain = share.open(ctx, &polynomial.coefficients()[0])?;
        self.receive_key_share(ctx, &share.sender_id, plain)
    }

    pub fn is_complete(&self) -> bool {
        self.state == CeremonyState::Complete
    }

    /// `s_i = Σ_ℓ P_ℓ(x_i)`, once complete.
    pub fn secret_key_share(&self) -> Option<&Scalar> {
        self.secret_key_share.as_ref()
    }

    pub fn share_public_key(&self, ctx: &GroupContext) -> Option<GroupElement> {
        self.secret_key_share.as_ref().map(|s| ctx.g_pow(s))
    }

    /// Product of every guardian's `K_0`, available once all public keys
    /// have been received.
    pub fn joint_public_key(&self, ctx: &GroupContext) -> Option<GroupElement> {
        if self.peer_keys.len() < self.guardians as usize {
            return None;
        }
        Some(joint_public_key(ctx, self.peer_keys.values()))
    }

    pub fn peer_public_keys(&self) -> impl Iterator<Item = &PublicKeys> {
        self.peer_keys.values()
    }

    /// The persistent record kept after the ceremony: election key pair,
    /// every received share and the secret key share.
    pub fn to_decrypting_guardian(
        &self,
        ctx: &GroupContext,
    ) -> Result<DecryptingGuardian, CeremonyError> {
        if !self.is_complete() {
            return Err(self.not_ready());
        }
        let polynomial = self.polynomial.as_ref().ok_or_else(|| self.not_ready())?;
        let election_keys = ElGamalKeyPair::from_secret(ctx, polynomial.coefficients()[0].clone())?;
        DecryptingGuardian::restore(
            ctx,
            self.id.clone(),
            self.x_coordinate,
            election_keys,
            self.received_shares.clone(),
        )
    }

    fn not_ready(&self) -> CeremonyError {
        CeremonyError::NotReady {
            guardian: self.id.clone(),
            state: self.state,
        }
    }

    fn advance(&mut self, ctx: &GroupContext) {
        let n = self.guardians as usize;
        let previous = self.state;
        if self.state == CeremonyState::Initialized && self.polynomial.is_some() {
            self.state = CeremonyState::KeysGenerated;
        }
        if self.state == CeremonyState::KeysGenerated && self.peer_keys.len() == n {
            self.state = CeremonyState::PeerKeysReceived;
        }
        if self.state == CeremonyState::PeerKeysReceived && self.received_shares.len() == n {
            self.state = CeremonyState::SharesExchanged;
            let total = self
                .received_shares
                .values()
                .fold(Scalar::zero(), |acc, s| ctx.add_q(&acc, s));
            self.secret_key_share = Some(total);
            self.state = CeremonyState::Complete;
        }
        if previous != self.state {
            debug!(guardian = %self.id, from = %previous, to = %self.state, "ceremony state advanced");
        }
    }
}

impl fmt::Debug for Guardian {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Guardian")
            .field("id", &self.id)
            .field("x_coordinate", &self.x_coordinate)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Zeroize for Guardian {
    fn zeroize(&mut self) {
        if let Some(polynomial) = self.polynomial.as_mut() {
            polynomial.zeroize();
        }
        self.received_shares.values_mut().for_each(Zeroize::zeroize);
        if let Some(share) = self.secret_key_share.as_mut() {
            share.zeroize();
        }
    }
}

impl Drop for Guardian {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl CeremonyParticipant for Guardian {
    fn id(&self) -> &str {
        Guardian::id(self)
    }

    fn x_coordinate(&self) -> u32 {
        Guardian::x_coordinate(self)
    }

    fn public_keys(&self) -> Result<PublicKeys, CeremonyError> {
        Guardian::public_keys(self)
    }

    fn share_for(
        &self,
        ctx: &GroupContext,
        recipient: &PublicKeys,
    ) -> Result<EncryptedKeyShare, CeremonyError> {
        Guardian::share_for(self, ctx, recipient)
    }

    fn receive_public_keys(
        &mut self,
        ctx: &GroupContext,
        peer: PublicKeys,
    ) -> Result<(), CeremonyError> {
        Guardian::receive_public_keys(self, ctx, peer)
    }

    fn receive_encrypted_share(
        &mut self,
        ctx: &GroupContext,
        share: &EncryptedKeyShare,
    ) -> Result<(), CeremonyError> {
        Guardian::receive_encrypted_share(self, ctx, share)
    }

    fn is_complete(&self) -> bool {
        Guardian::is_complete(self)
    }
}

impl DecryptingTrustee for Guardian {
    fn id(&self) -> &str {
        Guardian::id(self)
    }

    fn x_coordinate(&self) -> u32 {
        Guardian::x_coordinate(self)
    }

    fn partial_decrypt(
        &self,
        ctx: &GroupContext,
        ciphertext: &Ciphertext,
    ) -> Result<PartialDecryption, TrusteeError> {
        match (&self.polynomial, &self.public_keys) {
            (Some(polynomial), Some(keys)) if self.is_complete() => partial_decryption(
                ctx,
                &self.id,
                &polynomial.coefficients()[0],
                keys.election_public_key(),
                ciphertext,
            ),
            _ => Err(TrusteeError::NotReady {
                guardian: self.id.clone(),
            }),
        }
    }

    fn compensated_decrypt(
        &self,
        ctx: &GroupContext,
        missing: &PublicKeys,
        ciphertext: &Ciphertext,
    ) -> Result<CompensatedDecryption, TrusteeError> {
        if !self.is_complete() {
            return Err(TrusteeError::NotReady {
                guardian: self.id.clone(),
            });
        }
        let share = self.received_shares.get(&missing.guardian_id).ok_or_else(|| {
            TrusteeError::MissingShare {
                guardian: self.id.clone(),
                missing: missing.guardian_id.clone(),
            }
        })?;
        compensated_decryption(ctx, &self.id, self.x_coordinate, share, missing, ciphertext)
    }
}

/// What a guardian persists after the ceremony.
pub struct DecryptingGuardian {
    id: String,
    x_coordinate: u32,
    election_keys: ElGamalKeyPair,
    received_shares: BTreeMap<String, Scalar>,
    secret_key_share: Scalar,
}

impl DecryptingGuardian {
    /// Rebuilds the record from storage. `received_shares` holds every
    /// guardian's `P_ℓ(x)`, this guardian's own included.
    pub fn restore(
        ctx: &GroupContext,
        id: impl Into<String>,
        x_coordinate: u32,
        election_keys: ElGamalKeyPair,
        received_shares: BTreeMap<String, Scalar>,
    ) -> Result<Self, CeremonyError> {
        if x_coordinate == 0 {
            return Err(CeremonyError::InvalidCoordinate(x_coordinate));
        }
        let secret_key_share = received_shares
            .values()
            .fold(Scalar::zero(), |acc, s| ctx.add_q(&acc, s));
        Ok(DecryptingGuardian {
            id: id.into(),
            x_coordinate,
            election_keys,
            received_shares,
            secret_key_share,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn x_coordinate(&self) -> u32 {
        self.x_coordinate
    }

    pub fn election_public_key(&self) -> &GroupElement {
        self.election_keys.public_key()
    }

    pub fn secret_key_share(&self) -> &Scalar {
        &self.secret_key_share
    }

    pub fn share_public_key(&self, ctx: &GroupContext) -> GroupElement {
        ctx.g_pow(&self.secret_key_share)
    }

    pub fn holds_share_from(&self, guardian_id: &str) -> bool {
        self.received_shares.contains_key(guardian_id)
    }

    /// Re-runs the commitment check on every stored share, e.g. after a
    /// reload from storage.
    pub fn verify_shares(
        &self,
        ctx: &GroupContext,
        public_keys: &[PublicKeys],
    ) -> Result<(), CeremonyError> {
        for keys in public_keys {
            let share = self.received_shares.get(&keys.guardian_id).ok_or_else(|| {
                CeremonyError::Incomplete {
                    guardian: self.id.clone(),
                }
            })?;
            if !verify_share(ctx, &keys.commitments(), self.x_coordinate, share) {
                return Err(CeremonyError::ShareMismatch {
                    sender: keys.guardian_id.clone(),
                    recipient: self.id.clone(),
                });
            }
        }
        Ok(())
    }
}

impl fmt::Debug for DecryptingGuardian {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecryptingGuardian")
            .field("id", &self.id)
            .field("x_coordinate", &self.x_coordinate)
            .field("shares", &self.received_shares.len())
            .finish_non_exhaustive()
    }
}

impl Zeroize for DecryptingGuardian {
    fn zeroize(&mut self) {
        self.received_shares.values_mut().for_each(Zeroize::zeroize);
        self.secret_key_share.zeroize();
    }
}

impl Drop for DecryptingGuardian {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl DecryptingTrustee for DecryptingGuardian {
    fn id(&self) -> &str {
        &self.id
    }

    fn x_coordinate(&self) -> u32 {
        self.x_coordinate
    }

    fn partial_decrypt(
        &self,
        ctx: &GroupContext,
        ciphertext: &Ciphertext,
    ) -> Result<PartialDecryption, TrusteeError> {
        partial_decryption(
            ctx,
            &self.id,
            self.election_keys.secret_key(),
            self.election_keys.public_key(),
            ciphertext,
        )
    }

    fn compensated_decrypt(
        &self,
        ctx: &GroupContext,
        missing: &PublicKeys,
        ciphertext: &Ciphertext,
    ) -> Result<CompensatedDecryption, TrusteeError> {
        let share = self.received_shares.get(&missing.guardian_id).ok_or_else(|| {
            TrusteeError::MissingShare {
                guardian: self.id.clone(),
                missing: missing.guardian_id.clone(),
            }
        })?;
        compensated_decryption(ctx, &self.id, self.x_coordinate, share, missing, ciphertext)
    }
}
