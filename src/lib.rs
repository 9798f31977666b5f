//! This crate implements the cryptographic core of a threshold ElGamal
//! election.
//!
//! Guardians run a key ceremony based on Feldman verifiable secret sharing
//! to produce a joint public key. Ballots are encrypted under that key with
//! exponential ElGamal and summed homomorphically. Any quorum of `k` out of
//! `n` guardians can then decrypt the tally: missing guardians are
//! compensated for by Lagrange interpolation in the exponent, so no secret
//! key is ever reconstructed. Every share carries a Chaum-Pedersen proof and
//! every ceremony commitment a Schnorr proof.
//!
//! # Example
//! ```
//! use threshold_election::{
//!     encrypt, DecryptingTrustee, Decryptor, ElectionConfig, GroupContext, Guardian, KeyCeremony,
//! };
//!
//! let ctx = GroupContext::from_hex(
//!     "866058c7c2583f3ed87236ff6b5f73f46d0d05b80d9dc481fb71c97b2f9a7673",
//!     "43302c63e12c1f9f6c391b7fb5afb9fa368682dc06cee240fdb8e4bd97cd3b39",
//!     "4",
//! )
//! .unwrap()
//! .with_discrete_log_bound(1_000);
//! let config = ElectionConfig::new(3, 2).unwrap();
//!
//! let guardians: Vec<Guardian> = (1..=3)
//!     .map(|x| {
//!         let mut g = Guardian::new(format!("guardian-{}", x), x, &config).unwrap();
//!         g.generate_keys(&ctx).unwrap();
//!         g
//!     })
//!     .collect();
//! let outcome = KeyCeremony::new(&ctx, config.clone(), guardians)
//!     .unwrap()
//!     .run()
//!     .unwrap();
//!
//! let (ciphertext, _) = encrypt(&ctx, 42, &outcome.joint_public_key).unwrap();
//! let decryptor = Decryptor::new(&ctx, config, outcome.public_keys.clone()).unwrap();
//! // Guardian 2 is absent.
//! let present: Vec<&dyn DecryptingTrustee> =
//!     vec![&outcome.participants[0], &outcome.participants[2]];
//! let plaintext = decryptor
//!     .decrypt_ciphertext("answer", &ciphertext, &present)
//!     .unwrap();
//! assert_eq!(plaintext.count, 42);
//! ```

pub mod config;
pub mod decryption;
pub mod decryption_share;
pub mod elgamal;
pub mod functions;
pub mod group;
pub mod guardian;
pub mod key_ceremony;
pub mod polynomial;
pub mod tally;
pub mod zk_proof;

pub use config::{ConfigError, ElectionConfig};
pub use decryption::{lagrange_coefficients, DecryptionError, Decryptor};
pub use decryption_share::{
    CompensatedDecryption, DecryptingTrustee, PartialDecryption, TrusteeError,
};
pub use elgamal::{encrypt, encrypt_with_proof, sum, Ciphertext, ElGamalError, ElGamalKeyPair};
pub use group::{GroupContext, GroupElement, GroupError, Scalar};
pub use guardian::{DecryptingGuardian, Guardian};
pub use key_ceremony::{
    CeremonyError, CeremonyOutcome, CeremonyParticipant, CeremonyState, EncryptedKeyShare,
    KeyCeremony, PublicKeys,
};
pub use tally::{
    EncryptedBallot, EncryptedSelection, EncryptedTally, PlaintextSelection, PlaintextTally,
    TallyError,
};
pub use zk_proof::{
    ChaumPedersenProof, DisjunctiveChaumPedersenProof, ProofCheck, SchnorrProof, Verification,
};
