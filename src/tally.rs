//! Encrypted ballots, their homomorphic accumulation and the decrypted tally.

use std::collections::{BTreeMap, BTreeSet};

use rayon::{prelude::*, ThreadPoolBuilder};
use thiserror::Error;
use tracing::{debug, warn};

use crate::decryption_share::{CompensatedDecryption, PartialDecryption};
use crate::elgamal::{encrypt_with_proof, sum, Ciphertext, ElGamalError};
use crate::group::{GroupContext, GroupElement};
use crate::zk_proof::{DisjunctiveChaumPedersenProof, ProofCheck};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TallyError {
    #[error("ballot id {0} appears twice")]
    DuplicateBallot(String),
    #[error("invalid range proof on ballot {ballot}, {contest}/{selection}: {failures:?}")]
    InvalidSelectionProof {
        ballot: String,
        contest: String,
        selection: String,
        failures: Vec<ProofCheck>,
    },
    #[error("worker count must be at least 1")]
    NoWorkers,
    #[error("thread pool creation failed: {0}")]
    ThreadPool(String),
    #[error("encryption failed: {0}")]
    Encryption(#[from] ElGamalError),
}

/// One encrypted 0/1 selection with its range proof.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedSelection {
    pub ciphertext: Ciphertext,
    pub proof: DisjunctiveChaumPedersenProof,
}

impl EncryptedSelection {
    pub fn encrypt(
        ctx: &GroupContext,
        selection: i64,
        public_key: &GroupElement,
    ) -> Result<Self, ElGamalError> {
        let (ciphertext, proof, _) = encrypt_with_proof(ctx, selection, public_key)?;
        Ok(EncryptedSelection { ciphertext, proof })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedBallot {
    pub id: String,
    pub contests: BTreeMap<String, BTreeMap<String, EncryptedSelection>>,
}

impl EncryptedBallot {
    pub fn new(id: impl Into<String>) -> Self {
        EncryptedBallot {
            id: id.into(),
            contests: BTreeMap::new(),
        }
    }

    /// Encrypts `(contest, selection, vote)` triples under `public_key`.
    pub fn encrypt<'a>(
        ctx: &GroupContext,
        id: impl Into<String>,
        public_key: &GroupElement,
        votes: impl IntoIterator<Item = (&'a str, &'a str, i64)>,
    ) -> Result<Self, ElGamalError> {
        let mut ballot = EncryptedBallot::new(id);
        for (contest, selection, vote) in votes {
            let encrypted = EncryptedSelection::encrypt(ctx, vote, public_key)?;
            ballot.insert(contest, selection, encrypted);
        }
        Ok(ballot)
    }

    pub fn insert(
        &mut self,
        contest: impl Into<String>,
        selection: impl Into<String>,
        encrypted: EncryptedSelection,
    ) {
        self.contests
            .entry(contest.into())
            .or_default()
            .insert(selection.into(), encrypted);
    }

    fn selections(&self) -> impl Iterator<Item = (&String, &String, &EncryptedSelection)> {
        self.contests
            .iter()
            .flat_map(|(c, sels)| sels.iter().map(move |(s, e)| (c, s, e)))
    }
}

/// Per-selection homomorphic sums. Built once and never modified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedTally {
    contests: BTreeMap<String, BTreeMap<String, Ciphertext>>,
    ballot_count: usize,
}

impl EncryptedTally {
    /// Verifies every selection's range proof, then sums each selection
    /// across the ballots that carry it. Work is spread over `workers`
    /// threads.
    pub fn accumulate(
        ctx: &GroupContext,
        public_key: &GroupElement,
        ballots: &[EncryptedBallot],
        workers: usize,
    ) -> Result<Self, TallyError> {
        if workers < 1 {
            return Err(TallyError::NoWorkers);
        }
        let mut ids = BTreeSet::new();
        for ballot in ballots {
            if !ids.insert(ballot.id.as_str()) {
                return Err(TallyError::DuplicateBallot(ballot.id.clone()));
            }
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| TallyError::ThreadPool(e.to_string()))?;

        let sums = pool.install(|| {
            ballots.par_iter().try_for_each(|ballot| {
                for (contest, selection, encrypted) in ballot.selections() {
                    let verification = encrypted.proof.verify(ctx, &encrypted.ciphertext, public_key);
                    if !verification.is_valid() {
                        warn!(ballot = %ballot.id, %contest, %selection, "selection proof rejected");
                        return Err(TallyError::InvalidSelectionProof {
                            ballot: ballot.id.clone(),
                            contest: contest.clone(),
                            selection: selection.clone(),
                            failures: verification.failures().to_vec(),
                        });
                    }
                }
                Ok(())
            })?;

            let keys: BTreeSet<(&String, &String)> = ballots
                .iter()
                .flat_map(|b| b.selections().map(|(c, s, _)| (c, s)))
                .collect();
            keys.into_par_iter()
                .map(|(contest, selection)| -> Result<_, TallyError> {
                    let ciphertexts = ballots.iter().filter_map(|b| {
                        b.contests
                            .get(contest)
                            .and_then(|sels| sels.get(selection))
                            .map(|e| &e.ciphertext)
                    });
                    Ok(((contest.clone(), selection.clone()), sum(ctx, ciphertexts)?))
                })
                .collect::<Result<Vec<_>, _>>()
        })?;

        let mut contests: BTreeMap<String, BTreeMap<String, Ciphertext>> = BTreeMap::new();
        for ((contest, selection), ciphertext) in sums {
            contests.entry(contest).or_default().insert(selection, ciphertext);
        }
        debug!(ballots = ballots.len(), contests = contests.len(), "tally accumulated");
        Ok(EncryptedTally {
            contests,
            ballot_count: ballots.len(),
        })
    }

    pub fn ballot_count(&self) -> usize {
        self.ballot_count
    }

    pub fn contests(&self) -> &BTreeMap<String, BTreeMap<String, Ciphertext>> {
        &self.contests
    }

    pub fn get(&self, contest: &str, selection: &str) -> Option<&Ciphertext> {
        self.contests.get(contest)?.get(selection)
    }

    pub fn selections(&self) -> impl Iterator<Item = (&str, &str, &Ciphertext)> {
        self.contests.iter().flat_map(|(c, sels)| {
            sels.iter()
                .map(move |(s, ciphertext)| (c.as_str(), s.as_str(), ciphertext))
        })
    }
}

/// A decrypted selection together with every share that produced it, so the
/// result can be re-verified without secrets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaintextSelection {
    pub count: u64,
    pub value: GroupElement,
    pub partials: Vec<PartialDecryption>,
    pub compensated: Vec<CompensatedDecryption>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaintextTally {
    pub contests: BTreeMap<String, BTreeMap<String, PlaintextSelection>>,
}

impl PlaintextTally {
    pub fn get(&self, contest: &str, selection: &str) -> Option<&PlaintextSelection> {
        self.contests.get(contest)?.get(selection)
    }

    pub fn count(&self, contest: &str, selection: &str) -> Option<u64> {
        self.get(contest, selection).map(|s| s.count)
    }
}
