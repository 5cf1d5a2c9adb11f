//! The consensus application run in ledger channels.
//!
//! The current allocation lives in the (single asset) outcome of the state,
//! the app data only carries the pending proposal. A state is in
//! **Consensus** if there is nothing to vote on (`furtherVotesRequired == 0`
//! or both proposed fields empty) and a **Proposal** otherwise.
//!
//! ```solidity
//! struct ConsensusAppData {
//!     uint32 furtherVotesRequired;
//!     uint32 consensusCounter;
//!     uint256[] proposedAllocation;
//!     bytes32[] proposedDestination;
//! }
//! ```

use crate::{
    abiencode::{
        self, decode_canonical, encode,
        types::{Address, Bytes32, U256},
        ParamType, Token, Tokenize,
    },
    channel::{AllocationItem, Outcome, StateVariables},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConsensusError {
    #[error("'proposedAllocation' must be reset during consensus")]
    ProposedAllocationNotReset,
    #[error("'proposedDestination' must be reset during consensus")]
    ProposedDestinationNotReset,
    #[error("'furtherVotesRequired' must be initialized to the number of other participants")]
    FurtherVotesRequiredNotInitialized,
    #[error("'furtherVotesRequired' must be decremented by one")]
    FurtherVotesRequiredNotDecremented,
    #[error("the current allocation must not change")]
    BalancesChanged,
    #[error("the proposal must not change")]
    ProposalsChanged,
    #[error("proposed allocation and destination must have the same, non-zero length")]
    ProposalLengthMismatch,
    #[error("a proposal must allocate exactly the current total")]
    ProposalTotalMismatch,
    #[error("'consensusCounter' does not match the number of votes cast")]
    ConsensusCounterMismatch,
    #[error("ledger channels hold a single-asset allocation")]
    UnsupportedOutcome,
    #[error("invalid app data: {0}")]
    InvalidAppData(#[from] abiencode::Error),
    #[error("there is no proposal to vote on")]
    NoPendingProposal,
    #[error("a proposal is pending")]
    ProposalPending,
    #[error("this is the last vote, use a final vote")]
    FinalVoteRequired,
    #[error("{0} more votes are required before the final vote")]
    VotesOutstanding(u32),
}

/// Decoded app data of a consensus app state.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsensusData {
    pub further_votes_required: u32,
    /// Votes cast on the pending proposal so far.
    pub consensus_counter: u32,
    pub proposed_allocation: Vec<U256>,
    pub proposed_destination: Vec<Bytes32>,
}

impl Tokenize for ConsensusData {
    fn tokenize(&self) -> Token {
        Token::Tuple(vec![
            Token::uint(self.further_votes_required),
            Token::uint(self.consensus_counter),
            Token::Array(self.proposed_allocation.iter().map(|a| Token::Uint(*a)).collect()),
            Token::Array(
                self.proposed_destination
                    .iter()
                    .map(|d| Token::FixedBytes(*d))
                    .collect(),
            ),
        ])
    }
}

fn into_u32(token: Token) -> Result<u32, abiencode::Error> {
    u32::try_from(token.into_u64()?).map_err(|_| abiencode::Error::InvalidValue("uint32"))
}

impl ConsensusData {
    /// App data of a state in consensus with nothing proposed.
    pub fn consensus() -> Self {
        Self::default()
    }

    fn proposal(num_participants: u32, allocation: Vec<U256>, destination: Vec<Bytes32>) -> Self {
        ConsensusData {
            further_votes_required: num_participants.saturating_sub(1),
            consensus_counter: 0,
            proposed_allocation: allocation,
            proposed_destination: destination,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        encode(&[self.tokenize()])
    }

    pub fn decode(data: &[u8]) -> Result<Self, ConsensusError> {
        let ty = ParamType::Tuple(vec![
            ParamType::Uint,
            ParamType::Uint,
            ParamType::Array(Box::new(ParamType::Uint)),
            ParamType::Array(Box::new(ParamType::FixedBytes)),
        ]);
        let mut fields = decode_canonical(&[ty], data)?
            .into_iter()
            .next()
            .ok_or(abiencode::Error::UnexpectedToken("tuple"))?
            .into_tuple()?
            .into_iter();
        let mut next = || fields.next().ok_or(abiencode::Error::UnexpectedToken("field"));

        let further_votes_required = into_u32(next()?)?;
        let consensus_counter = into_u32(next()?)?;
        let proposed_allocation = next()?
            .into_array()?
            .into_iter()
            .map(Token::into_uint)
            .collect::<Result<_, _>>()?;
        let proposed_destination = next()?
            .into_array()?
            .into_iter()
            .map(Token::into_fixed_bytes)
            .collect::<Result<_, _>>()?;

        Ok(ConsensusData {
            further_votes_required,
            consensus_counter,
            proposed_allocation,
            proposed_destination,
        })
    }

    pub fn is_proposal(&self) -> bool {
        self.further_votes_required > 0
            && !(self.proposed_allocation.is_empty() && self.proposed_destination.is_empty())
    }

    fn same_proposal(&self, other: &Self) -> bool {
        self.proposed_allocation == other.proposed_allocation
            && self.proposed_destination == other.proposed_destination
    }

    fn proposed_total(&self) -> U256 {
        self.proposed_allocation
            .iter()
            .fold(U256::zero(), |acc, a| acc.saturating_add(*a))
    }

    /// The outcome the channel will have once the proposal is adopted.
    pub fn proposed_outcome(&self, asset_holder: Address) -> Outcome {
        Outcome::simple(
            asset_holder,
            self.proposed_destination
                .iter()
                .zip(&self.proposed_allocation)
                .map(|(destination, amount)| AllocationItem {
                    destination: *destination,
                    amount: *amount,
                })
                .collect(),
        )
    }

    /// Rules a single state has to follow, independent of its predecessor.
    fn check_shape(&self, num_participants: u32) -> Result<(), ConsensusError> {
        if self.further_votes_required == 0 {
            if !self.proposed_allocation.is_empty() {
                return Err(ConsensusError::ProposedAllocationNotReset);
            }
            if !self.proposed_destination.is_empty() {
                return Err(ConsensusError::ProposedDestinationNotReset);
            }
        }
        if !self.is_proposal() {
            if self.consensus_counter != 0 {
                return Err(ConsensusError::ConsensusCounterMismatch);
            }
            return Ok(());
        }

        if self.proposed_allocation.len() != self.proposed_destination.len() {
            return Err(ConsensusError::ProposalLengthMismatch);
        }
        let others = num_participants.saturating_sub(1);
        if self.further_votes_required > others {
            return Err(ConsensusError::FurtherVotesRequiredNotInitialized);
        }
        if self.consensus_counter != others - self.further_votes_required {
            return Err(ConsensusError::ConsensusCounterMismatch);
        }
        Ok(())
    }
}

fn current_allocation(outcome: &Outcome) -> Result<(Address, &[AllocationItem]), ConsensusError> {
    outcome
        .single_allocation()
        .ok_or(ConsensusError::UnsupportedOutcome)
}

fn check_total(current: &[AllocationItem], proposal: &ConsensusData) -> Result<(), ConsensusError> {
    let total = current
        .iter()
        .fold(U256::zero(), |acc, i| acc.saturating_add(i.amount));
    if proposal.proposed_total() != total {
        return Err(ConsensusError::ProposalTotalMismatch);
    }
    Ok(())
}

/// Check the consensus app rules for `prev -> next`.
///
/// Turn numbers, finality and the setup phase are covered by
/// [crate::channel::valid_transition], this only looks at app data and
/// outcome.
pub fn validate_transition(
    num_participants: usize,
    prev: &StateVariables,
    next: &StateVariables,
) -> Result<(), ConsensusError> {
    let n = u32::try_from(num_participants).map_err(|_| ConsensusError::UnsupportedOutcome)?;
    let old = ConsensusData::decode(&prev.app_data)?;
    let new = ConsensusData::decode(&next.app_data)?;
    old.check_shape(n)?;
    new.check_shape(n)?;

    let (asset_holder, current) = current_allocation(&prev.outcome)?;
    let balances_unchanged = prev.outcome == next.outcome;
    let others = n.saturating_sub(1);

    match (old.is_proposal(), new.is_proposal()) {
        // pass
        (false, false) => {
            if !balances_unchanged {
                return Err(ConsensusError::BalancesChanged);
            }
            if old != new {
                return Err(ConsensusError::ProposalsChanged);
            }
        }
        // propose
        (false, true) => {
            if !balances_unchanged {
                return Err(ConsensusError::BalancesChanged);
            }
            if new.further_votes_required != others {
                return Err(ConsensusError::FurtherVotesRequiredNotInitialized);
            }
            check_total(current, &new)?;
        }
        // vote
        (true, true) if old.same_proposal(&new) => {
            if old.further_votes_required.checked_sub(1) != Some(new.further_votes_required) {
                return Err(ConsensusError::FurtherVotesRequiredNotDecremented);
            }
            if !balances_unchanged {
                return Err(ConsensusError::BalancesChanged);
            }
        }
        // propose alternative
        (true, true) => {
            if new.further_votes_required != others {
                return Err(ConsensusError::ProposalsChanged);
            }
            if !balances_unchanged {
                return Err(ConsensusError::BalancesChanged);
            }
            check_total(current, &new)?;
        }
        // final vote or veto
        (true, false) => {
            let adopts = old.further_votes_required == 1
                && new.further_votes_required == 0
                && next.outcome == old.proposed_outcome(asset_holder);
            if !adopts && !balances_unchanged {
                return Err(ConsensusError::BalancesChanged);
            }
        }
    }
    Ok(())
}

fn decode_app_data(vars: &StateVariables) -> Result<ConsensusData, ConsensusError> {
    ConsensusData::decode(&vars.app_data)
}

/// Decode app data we are about to build on. It may come straight from a
/// peer, so its counters are checked before any arithmetic.
fn decode_checked(
    num_participants: usize,
    vars: &StateVariables,
) -> Result<ConsensusData, ConsensusError> {
    let n = u32::try_from(num_participants).map_err(|_| ConsensusError::UnsupportedOutcome)?;
    let data = decode_app_data(vars)?;
    data.check_shape(n)?;
    Ok(data)
}

fn next_with(
    num_participants: usize,
    prev: &StateVariables,
    data: &ConsensusData,
    outcome: Option<Outcome>,
) -> Result<StateVariables, ConsensusError> {
    let mut next = prev.make_next_state();
    next.app_data = data.encode();
    if let Some(outcome) = outcome {
        next.outcome = outcome;
    }
    validate_transition(num_participants, prev, &next)?;
    Ok(next)
}

/// Start voting on a new allocation.
pub fn propose(
    num_participants: usize,
    prev: &StateVariables,
    proposed_allocation: Vec<U256>,
    proposed_destination: Vec<Bytes32>,
) -> Result<StateVariables, ConsensusError> {
    if decode_app_data(prev)?.is_proposal() {
        return Err(ConsensusError::ProposalPending);
    }
    let data = ConsensusData::proposal(
        num_participants as u32,
        proposed_allocation,
        proposed_destination,
    );
    next_with(num_participants, prev, &data, None)
}

/// Replace the pending proposal, restarting the vote.
pub fn propose_alternative(
    num_participants: usize,
    prev: &StateVariables,
    proposed_allocation: Vec<U256>,
    proposed_destination: Vec<Bytes32>,
) -> Result<StateVariables, ConsensusError> {
    if !decode_app_data(prev)?.is_proposal() {
        return Err(ConsensusError::NoPendingProposal);
    }
    let data = ConsensusData::proposal(
        num_participants as u32,
        proposed_allocation,
        proposed_destination,
    );
    next_with(num_participants, prev, &data, None)
}

pub fn vote(num_participants: usize, prev: &StateVariables) -> Result<StateVariables, ConsensusError> {
    let mut data = decode_checked(num_participants, prev)?;
    if !data.is_proposal() {
        return Err(ConsensusError::NoPendingProposal);
    }
    if data.further_votes_required == 1 {
        return Err(ConsensusError::FinalVoteRequired);
    }
    data.further_votes_required = data
        .further_votes_required
        .checked_sub(1)
        .ok_or(ConsensusError::FurtherVotesRequiredNotDecremented)?;
    data.consensus_counter = data
        .consensus_counter
        .checked_add(1)
        .ok_or(ConsensusError::ConsensusCounterMismatch)?;
    next_with(num_participants, prev, &data, None)
}

/// Cast the last vote and adopt the proposal.
pub fn final_vote(
    num_participants: usize,
    prev: &StateVariables,
) -> Result<StateVariables, ConsensusError> {
    let data = decode_checked(num_participants, prev)?;
    if !data.is_proposal() {
        return Err(ConsensusError::NoPendingProposal);
    }
    if data.further_votes_required != 1 {
        return Err(ConsensusError::VotesOutstanding(
            data.further_votes_required.saturating_sub(1),
        ));
    }
    let (asset_holder, _) = current_allocation(&prev.outcome)?;
    let outcome = data.proposed_outcome(asset_holder);
    next_with(num_participants, prev, &ConsensusData::consensus(), Some(outcome))
}

/// Reject the pending proposal, keeping the current allocation.
pub fn veto(num_participants: usize, prev: &StateVariables) -> Result<StateVariables, ConsensusError> {
    if !decode_app_data(prev)?.is_proposal() {
        return Err(ConsensusError::NoPendingProposal);
    }
    next_with(num_participants, prev, &ConsensusData::consensus(), None)
}

/// Move the turn on without changing anything.
pub fn pass(num_participants: usize, prev: &StateVariables) -> Result<StateVariables, ConsensusError> {
    let data = decode_checked(num_participants, prev)?;
    if data.is_proposal() {
        return Err(ConsensusError::ProposalPending);
    }
    next_with(num_participants, prev, &data, None)
}
