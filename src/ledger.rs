//! Automatic counter-signing of ledger channels.
//!
//! A hub receives a whole round of states from the other participants at
//! once, validates them against each other and answers with the next state
//! of the round, signed by itself.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    abiencode::types::Hash,
    app::{consensus, AppRegistry, AppState, ConsensusError, TransitionRejection},
    channel::{SignedState, State, StateVariables},
    repository::{ChannelRepository, RepositoryError},
    sig::Signer,
    store::{ChannelStore, StoreError},
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("channel {0} already exists")]
    ChannelExists(Hash),
    #[error("channel {0} is unknown")]
    ChannelMissing(Hash),
    #[error("the round does not contain any new state")]
    EmptyRound,
    #[error("state at turn {turn_num} is not signed by its mover")]
    StateNotSigned { turn_num: u64 },
    #[error("state at turn {turn_num} changes the value held by the channel")]
    ValueLost { turn_num: u64 },
    #[error("invalid transition to turn {turn_num}: {reason}")]
    InvalidTransition {
        turn_num: u64,
        reason: TransitionRejection,
    },
    #[error("turn {turn_num} is not ours")]
    NotOurTurn { turn_num: u64 },
    #[error("turn {turn_num} is the last possible turn")]
    TurnNumOverflow { turn_num: u64 },
    #[error("not a ledger channel, cannot answer in the app phase")]
    NotLedgerChannel,
    #[error("cannot build the response: {0}")]
    Response(#[from] ConsensusError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<RepositoryError> for LedgerError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::ChannelExists(id) => LedgerError::ChannelExists(id),
            RepositoryError::ChannelMissing(id) => LedgerError::ChannelMissing(id),
            RepositoryError::Corrupt(e) => LedgerError::Store(e),
        }
    }
}

#[derive(Debug)]
pub struct LedgerChannelManager<R> {
    repository: Arc<R>,
    signer: Signer,
    apps: AppRegistry,
}

impl<R: ChannelRepository> LedgerChannelManager<R> {
    pub fn new(repository: Arc<R>, signer: Signer, apps: AppRegistry) -> Self {
        Self {
            repository,
            signer,
            apps,
        }
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repository
    }

    /// Validate `round` and answer with our signed state.
    ///
    /// Without `last_known` the round has to open a new channel, otherwise
    /// the channel must exist and only states after `last_known` are
    /// considered. Nothing is stored unless the whole round is accepted and
    /// a response could be signed.
    pub fn update_ledger_channel(
        &self,
        round: Vec<SignedState>,
        last_known: Option<&State>,
    ) -> Result<SignedState, LedgerError> {
        let first = round.first().ok_or(LedgerError::EmptyRound)?;
        let channel_id = first.channel_id();
        let constants = first.state.constants.clone();

        let mut round: Vec<_> = round
            .into_iter()
            .filter(|s| last_known.map_or(true, |l| s.turn_num() > l.turn_num()))
            .collect();
        round.sort_by_key(|s| s.turn_num());
        if round.is_empty() {
            return Err(LedgerError::EmptyRound);
        }

        match last_known {
            None => {
                if self.repository.contains(&channel_id) {
                    warn!(channel_id = %channel_id, "Channel already exists");
                    return Err(LedgerError::ChannelExists(channel_id));
                }
                let mut store = ChannelStore::new(constants, self.signer.address())?;
                let response = self.process_round(&mut store, &round, None)?;
                self.repository.insert(store)?;
                Ok(response)
            }
            Some(last_known) => {
                if !self.repository.contains(&channel_id) {
                    warn!(channel_id = %channel_id, "Update for unknown channel");
                    return Err(LedgerError::ChannelMissing(channel_id));
                }
                self.repository.update(&channel_id, |store| {
                    self.process_round(store, &round, Some(last_known))
                })
            }
        }
    }

    fn process_round(
        &self,
        store: &mut ChannelStore,
        round: &[SignedState],
        last_known: Option<&State>,
    ) -> Result<SignedState, LedgerError> {
        let mut previous = last_known.cloned();
        for state in round {
            self.should_accept(state, previous.as_ref())?;
            store.add_signed_state(state)?;
            previous = Some(state.state.clone());
        }
        // `round` is never empty.
        let latest = previous.ok_or(LedgerError::EmptyRound)?;

        let vars = self.next_vars(store, &latest)?;
        let response = store.sign_and_add(vars, &self.signer)?;
        debug!(
            channel_id = %store.channel_id(),
            turn_num = response.turn_num(),
            "Signed response"
        );
        Ok(response)
    }

    /// Checks, in this order, the signature of the mover, that no value is
    /// created or destroyed and that `state` is a valid successor of
    /// `previous`.
    pub fn should_accept(
        &self,
        state: &SignedState,
        previous: Option<&State>,
    ) -> Result<(), LedgerError> {
        let turn_num = state.turn_num();
        let constants = &state.state.constants;
        if constants.participants.is_empty() {
            return Err(LedgerError::StateNotSigned { turn_num });
        }

        let mover = constants.mover(turn_num).signing_address;
        let hash = state.state.hash();
        let signed_by_mover = state
            .signatures
            .iter()
            .any(|s| s.signer == mover && s.verify(hash).is_ok());
        if !signed_by_mover || state.verify_signatures().is_err() {
            warn!(channel_id = %state.channel_id(), turn_num, "State not signed by mover");
            return Err(LedgerError::StateNotSigned { turn_num });
        }

        let Some(previous) = previous else {
            return Ok(());
        };
        if turn_num > 0 && previous.vars.outcome.totals() != state.state.vars.outcome.totals() {
            warn!(channel_id = %state.channel_id(), turn_num, "Value not preserved");
            return Err(LedgerError::ValueLost { turn_num });
        }
        self.apps
            .valid_transition(previous, &state.state)
            .map_err(|reason| {
                warn!(channel_id = %state.channel_id(), turn_num, %reason, "Invalid transition");
                LedgerError::InvalidTransition { turn_num, reason }
            })
    }

    /// Our move after `latest`.
    fn next_vars(&self, store: &ChannelStore, latest: &State) -> Result<StateVariables, LedgerError> {
        let constants = &latest.constants;
        let turn_num = latest
            .turn_num()
            .checked_add(1)
            .ok_or(LedgerError::TurnNumOverflow {
                turn_num: latest.turn_num(),
            })?;
        if constants.mover_index(turn_num) != store.my_index() {
            warn!(channel_id = %store.channel_id(), turn_num, "Not our turn");
            return Err(LedgerError::NotOurTurn { turn_num });
        }

        if latest.is_final() || turn_num < constants.app_phase_start() {
            return Ok(latest.vars.make_next_state());
        }

        let n = constants.num_participants();
        let data = match self
            .apps
            .decode(&constants.app_definition, &latest.vars.app_data)?
        {
            AppState::Consensus(data) => data,
            AppState::Opaque(_) => return Err(LedgerError::NotLedgerChannel),
        };
        let next = if !data.is_proposal() {
            consensus::pass(n, &latest.vars)
        } else if data.further_votes_required == 1 {
            consensus::final_vote(n, &latest.vars)
        } else {
            consensus::vote(n, &latest.vars)
        };
        Ok(next?)
    }
}
