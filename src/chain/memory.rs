use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{
    AssetOutcomeUpdated, ChainError, ChainEventSubscriber, ChainService, ChallengeRegistered,
    ChannelFinalized, FundChannelArg, HoldingUpdated, LogPosition, Registration, SubmissionQueue,
    SubscriberRegistry, TxHandle,
};
use crate::{
    abiencode::{
        hash_tokens,
        types::{Address, Bytes32, Hash, U256},
        Token,
    },
    channel::{AllocationItem, AssetOutcome, Outcome, SignedState, State},
    sig::Signer,
};

#[derive(Debug, Clone)]
enum AssetEvent {
    Holding(HoldingUpdated),
    Outcome(AssetOutcomeUpdated),
}

impl AssetEvent {
    fn source(&self) -> (Hash, Address) {
        match self {
            AssetEvent::Holding(e) => (e.channel_id, e.asset_holder),
            AssetEvent::Outcome(e) => (e.channel_id, e.asset_holder),
        }
    }

    /// What the asset holder holds for the channel after the event.
    fn holdings(&self) -> U256 {
        match self {
            AssetEvent::Holding(e) => e.amount,
            AssetEvent::Outcome(e) => e.new_holdings,
        }
    }
}

#[derive(Debug, Clone)]
struct Log {
    position: LogPosition,
    event: AssetEvent,
}

#[derive(Debug)]
enum Notification {
    Asset(Log),
    Finalized(ChannelFinalized),
    Challenge(ChallengeRegistered),
}

/// Adjudicator storage of one channel.
#[derive(Debug, Default)]
struct ChannelStatus {
    turn_num_record: u64,
    finalizes_at: Option<u64>,
    /// Hash of the challenge state and who registered it.
    challenge: Option<(Hash, Address)>,
    finalized_reported: bool,
}

impl ChannelStatus {
    fn is_finalized(&self, now: u64) -> bool {
        self.finalizes_at.map_or(false, |t| t <= now)
    }
}

/// The block a transaction is mined in.
#[derive(Debug)]
struct Block {
    number: u64,
    timestamp: u64,
    logs: Vec<Log>,
    notifications: Vec<Notification>,
}

impl Block {
    fn log(&mut self, event: AssetEvent) {
        let position = LogPosition::new(self.number, self.logs.len() as u64);
        self.logs.push(Log { position, event });
    }
}

#[derive(Debug, Default)]
struct ChainState {
    block_number: u64,
    timestamp: u64,
    nonces: HashMap<Address, u64>,
    holdings: HashMap<(Hash, Address), U256>,
    balances: HashMap<(Address, Bytes32), U256>,
    channels: HashMap<Hash, ChannelStatus>,
    logs: Vec<Log>,
    bytecode: HashMap<Address, Vec<u8>>,
}

impl ChainState {
    fn nonce(&self, account: &Address) -> u64 {
        self.nonces.get(account).copied().unwrap_or(0)
    }

    fn holdings(&self, channel_id: Hash, asset_holder: Address) -> U256 {
        self.holdings
            .get(&(channel_id, asset_holder))
            .copied()
            .unwrap_or_else(U256::zero)
    }

    /// Holdings at the end of `block_number`, reconstructed from the logs.
    fn holdings_at(&self, source: (Hash, Address), block_number: u64) -> U256 {
        self.logs
            .iter()
            .rev()
            .find(|l| l.position.block_number <= block_number && l.event.source() == source)
            .map(|l| l.event.holdings())
            .unwrap_or_else(U256::zero)
    }

    fn mine(&mut self, mut block: Block, hash: Hash) -> (TxHandle, Vec<Notification>) {
        self.block_number = block.number;
        self.logs.extend(block.logs.iter().cloned());

        let mut notifications: Vec<_> = block.logs.into_iter().map(Notification::Asset).collect();
        notifications.append(&mut block.notifications);
        let handle = TxHandle {
            hash,
            block_number: block.number,
        };
        (handle, notifications)
    }

    /// Pay out the allocations of `outcome` as far as the holdings allow.
    fn pay_out(&mut self, block: &mut Block, channel_id: Hash, outcome: &Outcome) {
        for asset in &outcome.0 {
            let AssetOutcome::Allocation {
                asset_holder,
                items,
            } = asset
            else {
                debug!(channel_id = %channel_id, "Guarantees are not paid out directly");
                continue;
            };

            let mut held = self.holdings(channel_id, *asset_holder);
            let mut external_payouts = Vec::new();
            for item in items {
                let paid = item.amount.min(held);
                if paid.is_zero() {
                    continue;
                }
                held = held - paid;
                let balance = self
                    .balances
                    .entry((*asset_holder, item.destination))
                    .or_insert_with(U256::zero);
                *balance = balance.saturating_add(paid);
                external_payouts.push(AllocationItem {
                    destination: item.destination,
                    amount: paid,
                });
            }
            self.holdings.insert((channel_id, *asset_holder), held);
            block.log(AssetEvent::Outcome(AssetOutcomeUpdated {
                channel_id,
                asset_holder: *asset_holder,
                new_holdings: held,
                external_payouts,
            }));
        }
    }
}

/// Check that `states` prove support for the last one: same channel, valid
/// signatures and every participant signed at least one state.
fn check_proof(states: &[SignedState]) -> Result<(Hash, &State), ChainError> {
    let last = states.last().ok_or(ChainError::EmptyProof)?;
    let channel_id = last.channel_id();

    let mut signers = BTreeSet::new();
    for state in states {
        if state.channel_id() != channel_id {
            return Err(ChainError::MixedChannels);
        }
        state.verify_signatures()?;
        signers.extend(state.signatures.iter().map(|e| e.signer));
    }
    if !last
        .state
        .constants
        .signing_addresses()
        .all(|a| signers.contains(&a))
    {
        return Err(ChainError::Unsupported);
    }
    Ok((channel_id, &last.state))
}

/// Chain simulated in memory.
///
/// Every transaction is mined in a block of its own and its events are
/// delivered right away. Time only moves with [InMemoryChain::advance_time].
/// Registering a channel reports the holdings as of `block_confirmations`
/// blocks ago and replays the logs since then, like a node with a
/// confirmation depth would.
#[derive(Debug)]
pub struct InMemoryChain {
    account: Address,
    block_confirmations: u64,
    queue: SubmissionQueue,
    registry: Arc<SubscriberRegistry>,
    state: Mutex<ChainState>,
}

impl InMemoryChain {
    /// Transactions that don't name a signer are sent from `account`.
    pub fn new(account: Address, block_confirmations: u64) -> Self {
        Self {
            account,
            block_confirmations,
            queue: SubmissionQueue::new(),
            registry: SubscriberRegistry::new(),
            state: Mutex::new(ChainState::default()),
        }
    }

    pub fn account(&self) -> Address {
        self.account
    }

    pub fn block_number(&self) -> u64 {
        self.state.lock().block_number
    }

    pub fn timestamp(&self) -> u64 {
        self.state.lock().timestamp
    }

    pub fn holdings(&self, channel_id: Hash, asset_holder: Address) -> U256 {
        self.state.lock().holdings(channel_id, asset_holder)
    }

    /// What `destination` was paid out by `asset_holder` so far.
    pub fn balance(&self, asset_holder: Address, destination: Bytes32) -> U256 {
        self.state
            .lock()
            .balances
            .get(&(asset_holder, destination))
            .copied()
            .unwrap_or_else(U256::zero)
    }

    /// When the channel finalizes, if a challenge or conclusion happened.
    pub fn finalizes_at(&self, channel_id: &Hash) -> Option<u64> {
        self.state
            .lock()
            .channels
            .get(channel_id)
            .and_then(|s| s.finalizes_at)
    }

    pub fn deploy(&self, address: Address, code: Vec<u8>) {
        self.state.lock().bytecode.insert(address, code);
    }

    /// Move the clock forward and mine an empty block. Channels whose
    /// challenge expired are reported as finalized.
    pub fn advance_time(&self, seconds: u64) {
        let notifications = {
            let mut state = self.state.lock();
            state.timestamp += seconds;
            state.block_number += 1;
            let (block_number, now) = (state.block_number, state.timestamp);

            let mut notifications = Vec::new();
            for (channel_id, status) in state.channels.iter_mut() {
                let Some(finalized_at) = status.finalizes_at else {
                    continue;
                };
                if finalized_at <= now && !status.finalized_reported {
                    status.finalized_reported = true;
                    notifications.push(Notification::Finalized(ChannelFinalized {
                        channel_id: *channel_id,
                        block_number,
                        block_timestamp: now,
                        finalized_at,
                    }));
                }
            }
            notifications
        };
        self.deliver(notifications);
    }

    fn deliver(&self, notifications: Vec<Notification>) {
        for notification in notifications {
            match notification {
                Notification::Asset(log) => {
                    let (channel_id, _) = log.event.source();
                    for tracker in self.registry.trackers(&channel_id) {
                        match &log.event {
                            AssetEvent::Holding(e) => {
                                tracker.holding_updated(e.clone(), log.position);
                            }
                            AssetEvent::Outcome(e) => {
                                tracker.asset_outcome_updated(e.clone(), log.position);
                            }
                        }
                    }
                }
                Notification::Finalized(e) => {
                    for tracker in self.registry.trackers(&e.channel_id) {
                        tracker.channel_finalized(e.clone());
                    }
                }
                Notification::Challenge(e) => {
                    for tracker in self.registry.trackers(&e.channel_id) {
                        tracker.challenge_registered(e.clone());
                    }
                }
            }
        }
    }

    /// Send a transaction from `from` that runs `apply` when mined.
    ///
    /// The nonce is picked before the transaction is signed and checked
    /// when it is mined, the submission queue keeps them in sync. A failing
    /// transaction is rejected before it is mined and does not use up the
    /// nonce.
    async fn submit<F>(&self, from: Address, apply: F) -> Result<TxHandle, ChainError>
    where
        F: FnOnce(&mut ChainState, &mut Block) -> Result<(), ChainError> + Send,
    {
        self.queue
            .run(from, async move {
                let nonce = self.state.lock().nonce(&from);
                // Signing and broadcasting, other tasks may run meanwhile.
                tokio::task::yield_now().await;

                let (handle, notifications) = {
                    let mut state = self.state.lock();
                    let expected = state.nonce(&from);
                    if nonce != expected {
                        return Err(ChainError::NonceConflict {
                            used: nonce,
                            expected,
                        });
                    }
                    let mut block = Block {
                        number: state.block_number + 1,
                        timestamp: state.timestamp,
                        logs: Vec::new(),
                        notifications: Vec::new(),
                    };
                    apply(&mut state, &mut block)?;
                    state.nonces.insert(from, nonce + 1);
                    let hash = hash_tokens(&[Token::Address(from), Token::uint(nonce)]);
                    state.mine(block, hash)
                };
                self.deliver(notifications);
                Ok(handle)
            })
            .await
    }
}

#[async_trait]
impl ChainService for InMemoryChain {
    async fn fund_channel(&self, arg: FundChannelArg) -> Result<TxHandle, ChainError> {
        info!(
            channel_id = %arg.channel_id,
            asset_holder = %arg.asset_holder,
            expected_held = %arg.expected_held,
            amount = %arg.amount,
            "Funding channel"
        );
        let handle = self
            .submit(self.account, |state, block| {
                let held = state.holdings(arg.channel_id, arg.asset_holder);
                if held < arg.expected_held {
                    return Err(ChainError::DepositTooEarly {
                        held,
                        expected: arg.expected_held,
                    });
                }
                let target = arg.expected_held.saturating_add(arg.amount);
                if held >= target {
                    return Err(ChainError::DepositNotNeeded { held });
                }
                state
                    .holdings
                    .insert((arg.channel_id, arg.asset_holder), target);
                block.log(AssetEvent::Holding(HoldingUpdated {
                    channel_id: arg.channel_id,
                    asset_holder: arg.asset_holder,
                    amount: target,
                }));
                Ok(())
            })
            .await
            .map_err(|e| {
                warn!(channel_id = %arg.channel_id, error = %e, "Deposit failed");
                e
            })?;
        info!(channel_id = %arg.channel_id, tx = %handle.hash, "Finished funding channel");
        Ok(handle)
    }

    fn register_channel(
        &self,
        channel_id: Hash,
        asset_holders: &[Address],
        subscriber: Arc<dyn ChainEventSubscriber>,
    ) -> Registration {
        let (registration, tracker) = self.registry.register(channel_id, subscriber);

        let (snapshots, replay) = {
            let state = self.state.lock();
            let confirmed = state.block_number.saturating_sub(self.block_confirmations);
            let snapshots: Vec<_> = asset_holders
                .iter()
                .map(|holder| HoldingUpdated {
                    channel_id,
                    asset_holder: *holder,
                    amount: state.holdings_at((channel_id, *holder), confirmed),
                })
                .collect();
            let replay: Vec<_> = state
                .logs
                .iter()
                .filter(|l| {
                    let (id, holder) = l.event.source();
                    id == channel_id
                        && asset_holders.contains(&holder)
                        && l.position.block_number >= confirmed
                })
                .cloned()
                .collect();
            (
                snapshots
                    .into_iter()
                    .map(|s| (s, LogPosition::snapshot(confirmed)))
                    .collect::<Vec<_>>(),
                replay,
            )
        };

        for (event, position) in snapshots {
            tracker.holding_updated(event, position);
        }
        for log in replay {
            match log.event {
                AssetEvent::Holding(e) => tracker.holding_updated(e, log.position),
                AssetEvent::Outcome(e) => tracker.asset_outcome_updated(e, log.position),
            };
        }
        registration
    }

    fn unregister_channel(&self, channel_id: &Hash) {
        self.registry.unregister_channel(channel_id);
    }

    async fn challenge(
        &self,
        states: &[SignedState],
        challenger: &Signer,
    ) -> Result<TxHandle, ChainError> {
        let (channel_id, last) = check_proof(states)?;
        info!(channel_id = %channel_id, turn_num = last.turn_num(), "Registering challenge");

        let challenger = challenger.address();
        self.submit(challenger, |state, block| {
            let status = state.channels.entry(channel_id).or_default();
            if status.is_finalized(block.timestamp) {
                return Err(ChainError::AlreadyFinalized(channel_id));
            }
            if status.finalizes_at.is_some() && last.turn_num() <= status.turn_num_record {
                return Err(ChainError::StaleChallenge {
                    turn_num: last.turn_num(),
                    registered: status.turn_num_record,
                });
            }
            status.turn_num_record = last.turn_num();
            let finalizes_at = block.timestamp + last.constants.challenge_duration;
            status.finalizes_at = Some(finalizes_at);
            status.challenge = Some((last.hash(), challenger));
            block
                .notifications
                .push(Notification::Challenge(ChallengeRegistered {
                    channel_id,
                    challenger,
                    challenge_states: states.to_vec(),
                    finalizes_at,
                }));
            Ok(())
        })
        .await
    }

    async fn conclude_and_withdraw(&self, proof: &[SignedState]) -> Result<TxHandle, ChainError> {
        let (channel_id, last) = check_proof(proof)?;
        if !proof.iter().all(|s| s.state.is_final()) {
            return Err(ChainError::NotFinal);
        }
        info!(channel_id = %channel_id, "Concluding channel");

        self.submit(self.account, |state, block| {
            let status = state.channels.entry(channel_id).or_default();
            if status.is_finalized(block.timestamp) {
                warn!(channel_id = %channel_id, "Conclude failed: channel is already finalized");
                return Err(ChainError::AlreadyFinalized(channel_id));
            }
            status.turn_num_record = last.turn_num();
            status.finalizes_at = Some(block.timestamp);
            status.finalized_reported = true;
            block
                .notifications
                .push(Notification::Finalized(ChannelFinalized {
                    channel_id,
                    block_number: block.number,
                    block_timestamp: block.timestamp,
                    finalized_at: block.timestamp,
                }));
            state.pay_out(block, channel_id, &last.vars.outcome);
            Ok(())
        })
        .await
    }

    async fn push_outcome_and_withdraw(
        &self,
        state: &State,
        challenger: Address,
    ) -> Result<TxHandle, ChainError> {
        let channel_id = state.channel_id();
        info!(channel_id = %channel_id, "Pushing outcome");

        self.submit(self.account, |chain, block| {
            let status = chain
                .channels
                .get(&channel_id)
                .ok_or(ChainError::NotFinalized(channel_id))?;
            if !status.is_finalized(block.timestamp) {
                return Err(ChainError::NotFinalized(channel_id));
            }
            if status.challenge != Some((state.hash(), challenger)) {
                return Err(ChainError::ChallengeMismatch);
            }
            chain.pay_out(block, channel_id, &state.vars.outcome);
            Ok(())
        })
        .await
    }

    async fn fetch_bytecode(&self, address: &Address) -> Result<Vec<u8>, ChainError> {
        match self.state.lock().bytecode.get(address) {
            Some(code) if !code.is_empty() => Ok(code.clone()),
            _ => Err(ChainError::BytecodeMissing(*address)),
        }
    }
}
