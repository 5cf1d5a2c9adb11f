//! Crate wide error type.
//!
//! Every layer has its own error enum, [Error] wraps all of them so
//! callers that drive several layers need a single `?`. [Error::kind]
//! classifies the failure, for example to tell a peer that sent a state
//! out of turn apart from a peer that tried to cheat.

use crate::{
    abiencode,
    app::{ConsensusError, TransitionRejection},
    chain::ChainError,
    channel::{SignatureError, TransitionError},
    config::ConfigError,
    ledger::LedgerError,
    repository::RepositoryError,
    sig,
    store::StoreError,
    wallet::WalletError,
    wire::WireError,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Abi(#[from] abiencode::Error),
    #[error(transparent)]
    Sig(#[from] sig::Error),
    #[error(transparent)]
    Signature(#[from] SignatureError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Consensus(#[from] ConsensusError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Wallet(#[from] WalletError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ChannelExists,
    ChannelMissing,
    /// A state lacks a valid signature of its mover.
    StateNotSigned,
    InvalidTransition,
    ValueLost,
    /// The state is fine, but it is not the turn it was sent for.
    NotOurTurn,
    StaleState,
    NotParticipant,
    /// Our own data is inconsistent. Never caused by a peer.
    InvariantViolation,
    /// A transaction was rejected.
    Chain,
    /// A message could not be encoded, decoded or sent.
    Transport,
    Config,
    UnknownReason,
}

impl ErrorKind {
    /// Whether the error proves that a peer misbehaved, as opposed to a
    /// race or a mistake on our side.
    pub fn is_misbehaviour(self) -> bool {
        matches!(
            self,
            ErrorKind::StateNotSigned | ErrorKind::InvalidTransition | ErrorKind::ValueLost
        )
    }
}

fn store_kind(e: &StoreError) -> ErrorKind {
    match e {
        StoreError::NotParticipant(_) | StoreError::NoParticipants => ErrorKind::NotParticipant,
        StoreError::InvalidSignature(_) => ErrorKind::StateNotSigned,
        StoreError::StaleState { .. } => ErrorKind::StaleState,
        StoreError::ChannelMismatch(_) => ErrorKind::InvalidTransition,
        StoreError::InvariantViolation(_)
        | StoreError::InvalidChannelId
        | StoreError::IndexOutOfRange(_)
        | StoreError::IncorrectHash { .. } => ErrorKind::InvariantViolation,
        StoreError::NoSupportedState | StoreError::Sign(_) => ErrorKind::UnknownReason,
    }
}

fn repository_kind(e: &RepositoryError) -> ErrorKind {
    match e {
        RepositoryError::ChannelExists(_) => ErrorKind::ChannelExists,
        RepositoryError::ChannelMissing(_) => ErrorKind::ChannelMissing,
        RepositoryError::Corrupt(_) => ErrorKind::InvariantViolation,
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Abi(_) | Error::Wire(_) => ErrorKind::Transport,
            Error::Sig(_) | Error::Signature(_) => ErrorKind::StateNotSigned,
            Error::Transition(_) | Error::Consensus(_) => ErrorKind::InvalidTransition,
            Error::Store(e) => store_kind(e),
            Error::Repository(e) => repository_kind(e),
            Error::Ledger(e) => match e {
                LedgerError::ChannelExists(_) => ErrorKind::ChannelExists,
                LedgerError::ChannelMissing(_) => ErrorKind::ChannelMissing,
                LedgerError::StateNotSigned { .. } => ErrorKind::StateNotSigned,
                LedgerError::ValueLost { .. } => ErrorKind::ValueLost,
                LedgerError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
                LedgerError::NotOurTurn { .. } => ErrorKind::NotOurTurn,
                LedgerError::TurnNumOverflow { .. } => ErrorKind::InvalidTransition,
                LedgerError::Store(e) => store_kind(e),
                LedgerError::EmptyRound
                | LedgerError::NotLedgerChannel
                | LedgerError::Response(_) => ErrorKind::UnknownReason,
            },
            Error::Chain(_) => ErrorKind::Chain,
            Error::Config(_) => ErrorKind::Config,
            Error::Wallet(e) => match e {
                WalletError::NotMyTurn(_) => ErrorKind::NotOurTurn,
                WalletError::InvalidTransition(_) => ErrorKind::InvalidTransition,
                WalletError::Store(e) => store_kind(e),
                WalletError::Repository(e) => repository_kind(e),
                WalletError::Chain(_) => ErrorKind::Chain,
                WalletError::Wire(_) => ErrorKind::Transport,
                WalletError::NotRunning(_)
                | WalletError::NotFunded(_)
                | WalletError::AlreadyJoined(_)
                | WalletError::NoConclusionProof(_) => ErrorKind::UnknownReason,
            },
        }
    }
}

impl From<TransitionRejection> for Error {
    fn from(e: TransitionRejection) -> Self {
        match e {
            TransitionRejection::Generic(e) => Error::Transition(e),
            TransitionRejection::Consensus(e) => Error::Consensus(e),
        }
    }
}
