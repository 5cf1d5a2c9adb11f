//! All states known for one channel and the support algorithm that decides
//! which of them every participant has agreed on.
//!
//! A channel collects *candidates*: distinct states (by hash) together with
//! the signatures received for them so far. A state is **supported** if a
//! run of consecutive, validly chained candidates exists in which every
//! state is signed by its mover and every participant signed at least one
//! state of the run. Only the latest supported state matters, candidates
//! older than the support run are pruned.

use std::collections::BTreeSet;

use crate::{
    abiencode::types::{Address, Hash},
    channel::{
        state_hash, valid_vars_transition, ChannelConstants, Participant, PartIdx,
        SignatureEntry, SignatureError, SignedState, State, StateVariables,
    },
    sig::{self, Signer},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvariantViolation {
    #[error("signed two different states with turn number {0}")]
    DuplicateTurnSignedByMe(u64),
    #[error("candidates are not sorted by descending turn number")]
    Unsorted,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("{0} is not a participant of this channel")]
    NotParticipant(Address),
    #[error("a channel needs at least one participant")]
    NoParticipants,
    #[error("participant index {0} is out of range")]
    IndexOutOfRange(PartIdx),
    #[error("invalid signature: {0}")]
    InvalidSignature(#[from] SignatureError),
    #[error("already signed turn {latest_signed}, refusing to sign turn {attempted}")]
    StaleState { latest_signed: u64, attempted: u64 },
    #[error("no supported state")]
    NoSupportedState,
    #[error("state belongs to channel {0}")]
    ChannelMismatch(Hash),
    #[error("invariant violated: {0}")]
    InvariantViolation(#[from] InvariantViolation),
    #[error("channel id of the record does not match its constants")]
    InvalidChannelId,
    #[error("stored hash of turn {turn_num} does not match its content")]
    IncorrectHash { turn_num: u64 },
    #[error(transparent)]
    Sign(#[from] sig::Error),
}

/// State variables together with their hash and the signatures collected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedVars {
    #[serde(flatten)]
    pub vars: StateVariables,
    pub state_hash: Hash,
    pub signatures: Vec<SignatureEntry>,
}

impl SignedVars {
    fn is_signed_by(&self, addr: &Address) -> bool {
        self.signatures.iter().any(|s| &s.signer == addr)
    }
}

/// Persisted form of a [ChannelStore].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelRecord {
    pub channel_id: Hash,
    #[serde(flatten)]
    pub constants: ChannelConstants,
    pub my_index: PartIdx,
    pub vars: Vec<SignedVars>,
}

#[derive(Debug, Clone)]
pub struct ChannelStore {
    constants: ChannelConstants,
    channel_id: Hash,
    my_index: PartIdx,
    /// Sorted by descending turn number.
    vars: Vec<SignedVars>,
}

impl ChannelStore {
    /// Create an empty store for the channel, `me` must be one of its
    /// participants.
    pub fn new(constants: ChannelConstants, me: Address) -> Result<Self, StoreError> {
        if constants.participants.is_empty() {
            return Err(StoreError::NoParticipants);
        }
        let my_index = constants
            .index_of(&me)
            .ok_or(StoreError::NotParticipant(me))?;
        Ok(ChannelStore {
            channel_id: constants.channel_id(),
            constants,
            my_index,
            vars: Vec::new(),
        })
    }

    pub fn channel_id(&self) -> Hash {
        self.channel_id
    }

    pub fn constants(&self) -> &ChannelConstants {
        &self.constants
    }

    pub fn participants(&self) -> &[Participant] {
        &self.constants.participants
    }

    pub fn my_index(&self) -> PartIdx {
        self.my_index
    }

    pub fn my_address(&self) -> Address {
        self.constants.participants[self.my_index].signing_address
    }

    fn to_signed_state(&self, candidate: &SignedVars) -> SignedState {
        SignedState {
            state: State {
                constants: self.constants.clone(),
                vars: candidate.vars.clone(),
            },
            signatures: candidate.signatures.clone(),
        }
    }

    /// Record `entry` as signature on `vars`.
    ///
    /// Adding the same signature twice is a no-op. Returns the state with
    /// all signatures known for it.
    pub fn add_state(
        &mut self,
        vars: StateVariables,
        entry: SignatureEntry,
    ) -> Result<SignedState, StoreError> {
        if self.constants.index_of(&entry.signer).is_none() {
            return Err(StoreError::NotParticipant(entry.signer));
        }
        let hash = state_hash(&self.constants, &vars);
        entry.verify(hash)?;

        // Work on a copy, the store stays untouched if an invariant breaks.
        let mut candidates = self.vars.clone();
        let idx = match candidates.iter().position(|c| c.state_hash == hash) {
            Some(idx) => idx,
            None => {
                candidates.push(SignedVars {
                    vars,
                    state_hash: hash,
                    signatures: Vec::new(),
                });
                candidates.len() - 1
            }
        };
        let candidate = &mut candidates[idx];
        if !candidate.is_signed_by(&entry.signer) {
            candidate.signatures.push(entry);
        }
        let result = self.to_signed_state(candidate);

        candidates.sort_by(|a, b| b.vars.turn_num.cmp(&a.vars.turn_num));
        prune(&self.constants, &mut candidates);
        if let Err(e) = check_invariants(&candidates, &self.my_address()) {
            error!(channel_id = %self.channel_id, error = %e, "Refusing to store state");
            return Err(e.into());
        }
        self.vars = candidates;

        debug!(
            channel_id = %self.channel_id,
            turn_num = result.turn_num(),
            signer = %entry.signer,
            "Added state"
        );
        Ok(result)
    }

    /// Add all signatures of `state` to the store.
    pub fn add_signed_state(&mut self, state: &SignedState) -> Result<SignedState, StoreError> {
        let id = state.channel_id();
        if id != self.channel_id || state.state.constants != self.constants {
            return Err(StoreError::ChannelMismatch(id));
        }
        let mut result = SignedState::new(state.state.clone());
        for entry in &state.signatures {
            result = self.add_state(state.state.vars.clone(), *entry)?;
        }
        Ok(result)
    }

    /// Sign `vars` with our key and add the state.
    ///
    /// Refuses to sign anything at or below the latest turn we already
    /// signed, so we never sign two different states for the same turn.
    pub fn sign_and_add(
        &mut self,
        vars: StateVariables,
        signer: &Signer,
    ) -> Result<SignedState, StoreError> {
        if signer.address() != self.my_address() {
            return Err(StoreError::NotParticipant(signer.address()));
        }
        if let Some(latest) = self.latest_signed_by_me() {
            if latest.turn_num() >= vars.turn_num {
                error!(
                    channel_id = %self.channel_id,
                    latest_signed = latest.turn_num(),
                    attempted = vars.turn_num,
                    "Stale state"
                );
                return Err(StoreError::StaleState {
                    latest_signed: latest.turn_num(),
                    attempted: vars.turn_num,
                });
            }
        }
        let signature = signer.sign_eth(state_hash(&self.constants, &vars))?;
        self.add_state(
            vars,
            SignatureEntry {
                signer: signer.address(),
                signature,
            },
        )
    }

    /// The candidate with the highest turn number, signed or not.
    pub fn latest(&self) -> Option<SignedState> {
        self.vars.first().map(|c| self.to_signed_state(c))
    }

    pub fn supported(&self) -> Result<SignedState, StoreError> {
        support_indices(&self.constants, &self.vars)
            .and_then(|s| s.first().copied())
            .map(|i| self.to_signed_state(&self.vars[i]))
            .ok_or(StoreError::NoSupportedState)
    }

    /// The states proving support for [Self::supported], ordered by
    /// ascending turn number. Empty if nothing is supported.
    pub fn support(&self) -> Vec<SignedState> {
        support_indices(&self.constants, &self.vars)
            .unwrap_or_default()
            .into_iter()
            .rev()
            .map(|i| self.to_signed_state(&self.vars[i]))
            .collect()
    }

    pub fn is_supported(&self) -> bool {
        support_indices(&self.constants, &self.vars).is_some()
    }

    /// Whether we signed one of the states of the current support.
    pub fn is_supported_by_me(&self) -> bool {
        let me = self.my_address();
        support_indices(&self.constants, &self.vars)
            .map(|s| s.iter().any(|&i| self.vars[i].is_signed_by(&me)))
            .unwrap_or(false)
    }

    /// Whether we move next after the supported state.
    pub fn my_turn(&self) -> bool {
        match self.supported() {
            Ok(s) => s
                .turn_num()
                .checked_add(1)
                .map_or(false, |next| self.constants.mover_index(next) == self.my_index),
            Err(_) => false,
        }
    }

    /// The support consists of final states only, so the channel can be
    /// concluded on chain.
    pub fn has_conclusion_proof(&self) -> bool {
        match support_indices(&self.constants, &self.vars) {
            Some(s) => s.iter().all(|&i| self.vars[i].vars.is_final),
            None => false,
        }
    }

    pub fn latest_signed_by_me(&self) -> Option<SignedState> {
        let me = self.my_address();
        self.vars
            .iter()
            .find(|c| c.is_signed_by(&me))
            .map(|c| self.to_signed_state(c))
    }

    pub fn latest_not_signed_by_me(&self) -> Option<SignedState> {
        let me = self.my_address();
        self.vars
            .iter()
            .find(|c| !c.is_signed_by(&me))
            .map(|c| self.to_signed_state(c))
    }

    /// All candidates, latest first.
    pub fn signed_states(&self) -> Vec<SignedState> {
        self.vars.iter().map(|c| self.to_signed_state(c)).collect()
    }

    pub fn to_record(&self) -> ChannelRecord {
        ChannelRecord {
            channel_id: self.channel_id,
            constants: self.constants.clone(),
            my_index: self.my_index,
            vars: self.vars.clone(),
        }
    }

    /// Load a persisted record, verifying every hash and signature it
    /// contains. The loaded candidates are pruned like freshly added ones.
    pub fn from_record(record: ChannelRecord) -> Result<Self, StoreError> {
        if record.constants.channel_id() != record.channel_id {
            return Err(StoreError::InvalidChannelId);
        }
        if record.constants.participants.is_empty() {
            return Err(StoreError::NoParticipants);
        }
        let me = record
            .constants
            .participants
            .get(record.my_index)
            .map(|p| p.signing_address)
            .ok_or(StoreError::IndexOutOfRange(record.my_index))?;
        let mut store = ChannelStore::new(record.constants, me)?;

        let mut vars = record.vars;
        for candidate in &mut vars {
            let hash = state_hash(&store.constants, &candidate.vars);
            if hash != candidate.state_hash {
                return Err(StoreError::IncorrectHash {
                    turn_num: candidate.vars.turn_num,
                });
            }
            for entry in &candidate.signatures {
                if store.constants.index_of(&entry.signer).is_none() {
                    return Err(StoreError::NotParticipant(entry.signer));
                }
                entry.verify(hash)?;
            }
            let mut seen = BTreeSet::new();
            candidate.signatures.retain(|s| seen.insert(s.signer));
        }
        vars.sort_by(|a, b| b.vars.turn_num.cmp(&a.vars.turn_num));
        prune(&store.constants, &mut vars);
        check_invariants(&vars, &me)?;
        store.vars = vars;
        Ok(store)
    }
}

/// Indices (into `candidates`, latest first) of the states forming the
/// support of the latest supported state.
///
/// `candidates` must be sorted by descending turn number.
fn support_indices(constants: &ChannelConstants, candidates: &[SignedVars]) -> Option<Vec<usize>> {
    let everyone: BTreeSet<Address> = constants.signing_addresses().collect();
    let mut not_signed = everyone.clone();
    let mut support = Vec::new();
    let mut previous: Option<&SignedVars> = None;

    for (i, candidate) in candidates.iter().enumerate() {
        // An invalid link means nothing above it can be part of the support.
        if let Some(previous) = previous {
            if valid_vars_transition(constants, &candidate.vars, &previous.vars).is_err() {
                support.clear();
                not_signed = everyone.clone();
            }
        }

        let mover = constants.mover(candidate.vars.turn_num).signing_address;
        if candidate.is_signed_by(&mover) {
            support.push(i);
            for s in &candidate.signatures {
                not_signed.remove(&s.signer);
            }
            if not_signed.is_empty() {
                return Some(support);
            }
        }
        previous = Some(candidate);
    }
    None
}

/// Drop candidates older than the earliest state of the support.
fn prune(constants: &ChannelConstants, candidates: &mut Vec<SignedVars>) {
    let earliest = support_indices(constants, candidates)
        .and_then(|s| s.last().copied())
        .map(|i| candidates[i].vars.turn_num);
    if let Some(earliest) = earliest {
        candidates.retain(|c| c.vars.turn_num >= earliest);
    }
}

fn check_invariants(candidates: &[SignedVars], me: &Address) -> Result<(), InvariantViolation> {
    if candidates
        .windows(2)
        .any(|w| w[0].vars.turn_num < w[1].vars.turn_num)
    {
        return Err(InvariantViolation::Unsorted);
    }

    let mine: Vec<u64> = candidates
        .iter()
        .filter(|c| c.is_signed_by(me))
        .map(|c| c.vars.turn_num)
        .collect();
    // Sorted, so duplicates are adjacent.
    if let Some(w) = mine.windows(2).find(|w| w[0] == w[1]) {
        return Err(InvariantViolation::DuplicateTurnSignedByMe(w[0]));
    }
    Ok(())
}
