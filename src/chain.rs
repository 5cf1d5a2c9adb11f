//! Everything the wallet needs from the blockchain.
//!
//! [ChainService] submits transactions, [ChainEventSubscriber]s are notified
//! about what happened on chain. Events from asset holders can arrive twice
//! (once from the initial snapshot, once from the live subscription), the
//! [ChainEventTracker] in front of every subscriber filters those.

mod event_tracker;
mod memory;
mod service;

pub use event_tracker::ChainEventTracker;
pub use memory::InMemoryChain;
pub use service::{
    ChainService, FundChannelArg, Registration, SubmissionQueue, SubscriberRegistry, TxHandle,
};

use crate::{
    abiencode::types::{Address, Hash, U256},
    channel::{AllocationItem, SignatureError, SignedState},
};

/// Position of a log in the chain, ordered by block first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogPosition {
    pub block_number: u64,
    pub log_index: u64,
}

impl LogPosition {
    pub const fn new(block_number: u64, log_index: u64) -> Self {
        Self {
            block_number,
            log_index,
        }
    }

    /// Position of a value read at the end of `block_number` instead of from
    /// a log. Every log of that block is considered to be included.
    pub const fn snapshot(block_number: u64) -> Self {
        Self::new(block_number, u64::MAX)
    }
}

/// The amount an asset holder keeps for a channel changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HoldingUpdated {
    pub channel_id: Hash,
    pub asset_holder: Address,
    pub amount: U256,
}

/// Funds of a channel were paid out according to its outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetOutcomeUpdated {
    pub channel_id: Hash,
    pub asset_holder: Address,
    pub new_holdings: U256,
    pub external_payouts: Vec<AllocationItem>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelFinalized {
    pub channel_id: Hash,
    pub block_number: u64,
    pub block_timestamp: u64,
    pub finalized_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeRegistered {
    pub channel_id: Hash,
    pub challenger: Address,
    pub challenge_states: Vec<SignedState>,
    pub finalizes_at: u64,
}

/// Receives chain events for the channels it was registered for.
///
/// Called from whatever task observed the event, implementations must not
/// block.
pub trait ChainEventSubscriber: Send + Sync {
    fn holding_updated(&self, event: HoldingUpdated);
    fn asset_outcome_updated(&self, event: AssetOutcomeUpdated);
    fn channel_finalized(&self, event: ChannelFinalized);
    fn challenge_registered(&self, event: ChallengeRegistered);
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    #[error("deposit expected {expected} held, but only {held} is held")]
    DepositTooEarly { held: U256, expected: U256 },
    #[error("channel already holds {held}, the deposit is not needed")]
    DepositNotNeeded { held: U256 },
    #[error("nonce {used} is stale, the next nonce is {expected}")]
    NonceConflict { used: u64, expected: u64 },
    #[error("the proof does not contain any state")]
    EmptyProof,
    #[error("states of different channels in one proof")]
    MixedChannels,
    #[error("not every participant signed one of the states")]
    Unsupported,
    #[error("the proof must consist of final states")]
    NotFinal,
    #[error("turn {turn_num} is not newer than the registered turn {registered}")]
    StaleChallenge { turn_num: u64, registered: u64 },
    #[error("channel {0} is already finalized")]
    AlreadyFinalized(Hash),
    #[error("channel {0} is not finalized yet")]
    NotFinalized(Hash),
    #[error("state does not match the registered challenge")]
    ChallengeMismatch,
    #[error("bytecode missing at {0}")]
    BytecodeMissing(Address),
    #[error(transparent)]
    InvalidSignature(#[from] SignatureError),
}
