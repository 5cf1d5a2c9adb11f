//! Application specific state and transition rules.
//!
//! Which rules apply is decided by the channel's `appDefinition`. Only the
//! consensus app (used by ledger channels) is understood natively, the app
//! data of any other application is carried around opaquely and only the
//! generic rules apply to it.

pub mod consensus;

pub use consensus::{ConsensusData, ConsensusError};

use crate::{
    abiencode::types::Address,
    channel::{self, State, TransitionError},
};

/// App data decoded according to the app definition of its channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppState {
    Consensus(ConsensusData),
    Opaque(Vec<u8>),
}

/// Why a state was rejected as successor of another one.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionRejection {
    #[error(transparent)]
    Generic(#[from] TransitionError),
    #[error(transparent)]
    Consensus(#[from] ConsensusError),
}

/// Maps app definitions to the rules they implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppRegistry {
    consensus_app: Address,
}

impl AppRegistry {
    pub fn new(consensus_app: Address) -> Self {
        AppRegistry { consensus_app }
    }

    pub fn consensus_app(&self) -> Address {
        self.consensus_app
    }

    pub fn is_consensus_app(&self, app_definition: &Address) -> bool {
        app_definition == &self.consensus_app
    }

    pub fn decode(
        &self,
        app_definition: &Address,
        app_data: &[u8],
    ) -> Result<AppState, ConsensusError> {
        if self.is_consensus_app(app_definition) {
            Ok(AppState::Consensus(ConsensusData::decode(app_data)?))
        } else {
            Ok(AppState::Opaque(app_data.to_vec()))
        }
    }

    /// Generic rules followed by the rules of the channel's application.
    ///
    /// Application rules only apply in the app phase and not to final
    /// states, setup and conclusion are handled by the generic rules.
    pub fn valid_transition(&self, prev: &State, next: &State) -> Result<(), TransitionRejection> {
        channel::valid_transition(prev, next)?;

        let constants = &next.constants;
        if next.is_final() || next.turn_num() < constants.app_phase_start() {
            return Ok(());
        }
        if self.is_consensus_app(&constants.app_definition) {
            consensus::validate_transition(constants.num_participants(), &prev.vars, &next.vars)?;
        }
        Ok(())
    }
}
