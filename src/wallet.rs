//! The application facing API.
//!
//! A [Wallet] owns one signing key. It keeps the channels it takes part in
//! in a [ChannelRepository], talks to the other participants through a
//! [MessageBus] and to the blockchain through a [ChainService]. Operations
//! return a [ChannelResult], the view of a channel an application works
//! with.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    abiencode::{
        as_hex,
        types::{Address, Hash, U256},
    },
    app::{AppRegistry, TransitionRejection},
    chain::{
        AssetOutcomeUpdated, ChainError, ChainEventSubscriber, ChainService, ChallengeRegistered,
        ChannelFinalized, FundChannelArg, HoldingUpdated, Registration, TxHandle,
    },
    channel::{
        AssetOutcome, ChannelConstants, Outcome, Participant, SignedState, State, StateVariables,
    },
    config::WalletConfig,
    repository::{ChannelRepository, RepositoryError},
    sig::Signer,
    store::{ChannelStore, StoreError},
    wire::{Message, MessageBus, Objective, Payload, WireError},
};

#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    #[error("channel {0} is not running")]
    NotRunning(Hash),
    #[error("it is not our turn in channel {0}")]
    NotMyTurn(Hash),
    #[error("channel {0} is not fully funded")]
    NotFunded(Hash),
    #[error("already joined channel {0}")]
    AlreadyJoined(Hash),
    #[error("channel {0} cannot be concluded yet")]
    NoConclusionProof(Hash),
    #[error(transparent)]
    InvalidTransition(#[from] TransitionRejection),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Wire(#[from] WireError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    /// Someone else proposed the channel, we did not join yet.
    Proposed,
    Opening,
    Funding,
    Running,
    /// We registered a challenge on chain.
    Challenging,
    /// Someone else registered a challenge on chain.
    Responding,
    Closing,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelResult {
    pub participants: Vec<Participant>,
    pub allocations: Outcome,
    #[serde(with = "as_hex")]
    pub app_data: Vec<u8>,
    pub app_definition: Address,
    pub channel_id: Hash,
    pub status: ChannelStatus,
    pub turn_num: u64,
}

/// What the chain told us about one channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainStatus {
    pub holdings: BTreeMap<Address, U256>,
    pub challenger: Option<Address>,
    pub finalizes_at: Option<u64>,
    pub finalized: bool,
}

/// Collects chain events of all channels of a wallet.
#[derive(Debug, Default)]
pub struct ChainView {
    channels: Mutex<HashMap<Hash, ChainStatus>>,
}

impl ChainView {
    pub fn status(&self, channel_id: &Hash) -> Option<ChainStatus> {
        self.channels.lock().get(channel_id).cloned()
    }

    pub fn holdings(&self, channel_id: &Hash, asset_holder: &Address) -> U256 {
        self.channels
            .lock()
            .get(channel_id)
            .and_then(|s| s.holdings.get(asset_holder).copied())
            .unwrap_or_else(U256::zero)
    }

    fn update(&self, channel_id: Hash, f: impl FnOnce(&mut ChainStatus)) {
        f(self.channels.lock().entry(channel_id).or_default());
    }
}

impl ChainEventSubscriber for ChainView {
    fn holding_updated(&self, event: HoldingUpdated) {
        debug!(channel_id = %event.channel_id, amount = %event.amount, "Holdings updated");
        self.update(event.channel_id, |s| {
            s.holdings.insert(event.asset_holder, event.amount);
        });
    }

    fn asset_outcome_updated(&self, event: AssetOutcomeUpdated) {
        self.update(event.channel_id, |s| {
            s.holdings.insert(event.asset_holder, event.new_holdings);
        });
    }

    fn channel_finalized(&self, event: ChannelFinalized) {
        info!(channel_id = %event.channel_id, "Channel finalized");
        self.update(event.channel_id, |s| s.finalized = true);
    }

    fn challenge_registered(&self, event: ChallengeRegistered) {
        warn!(
            channel_id = %event.channel_id,
            challenger = %event.challenger,
            finalizes_at = event.finalizes_at,
            "Challenge registered"
        );
        self.update(event.channel_id, |s| {
            s.challenger = Some(event.challenger);
            s.finalizes_at = Some(event.finalizes_at);
        });
    }
}

/// Where in its life a channel is, from what we stored and what the chain
/// reported.
pub fn derive_status(store: &ChannelStore, chain: Option<&ChainStatus>) -> ChannelStatus {
    if store.has_conclusion_proof() || chain.map_or(false, |c| c.finalized) {
        return ChannelStatus::Closed;
    }
    if let Some(challenger) = chain.and_then(|c| c.challenger) {
        return if challenger == store.my_address() {
            ChannelStatus::Challenging
        } else {
            ChannelStatus::Responding
        };
    }
    if store.latest().map_or(false, |l| l.state.is_final()) {
        return ChannelStatus::Closing;
    }

    let n = store.participants().len() as u64;
    match store.supported().ok().map(|s| s.turn_num()) {
        None if store.latest_signed_by_me().is_some() => ChannelStatus::Opening,
        None => ChannelStatus::Proposed,
        Some(t) if t.saturating_add(1) < n => ChannelStatus::Opening,
        Some(t) if t.saturating_add(1) < 2 * n => ChannelStatus::Funding,
        Some(_) => ChannelStatus::Running,
    }
}

pub struct Wallet<R, B, C> {
    signer: Signer,
    config: WalletConfig,
    apps: AppRegistry,
    repository: Arc<R>,
    bus: B,
    chain: Arc<C>,
    chain_view: Arc<ChainView>,
    registrations: Mutex<HashMap<Hash, Registration>>,
    bytecode: Mutex<HashMap<Address, Vec<u8>>>,
}

impl<R, B: core::fmt::Debug, C> core::fmt::Debug for Wallet<R, B, C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Wallet")
            .field("address", &self.signer.address())
            .field("bus", &self.bus)
            .finish_non_exhaustive()
    }
}

impl<R, B, C> Wallet<R, B, C>
where
    R: ChannelRepository,
    B: MessageBus,
    C: ChainService,
{
    pub fn new(
        signer: Signer,
        config: WalletConfig,
        repository: Arc<R>,
        bus: B,
        chain: Arc<C>,
    ) -> Self {
        Self {
            apps: AppRegistry::new(config.ledger_app_definition),
            signer,
            config,
            repository,
            bus,
            chain,
            chain_view: Arc::new(ChainView::default()),
            registrations: Mutex::new(HashMap::new()),
            bytecode: Mutex::new(HashMap::new()),
        }
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn chain_view(&self) -> &ChainView {
        &self.chain_view
    }

    fn result(&self, store: &ChannelStore) -> Result<ChannelResult, WalletError> {
        let latest = store.latest().ok_or(StoreError::NoSupportedState)?;
        let chain = self.chain_view.status(&store.channel_id());
        let SignedState {
            state: State { constants, vars },
            ..
        } = latest;
        Ok(ChannelResult {
            status: derive_status(store, chain.as_ref()),
            participants: constants.participants,
            allocations: vars.outcome,
            app_data: vars.app_data,
            app_definition: constants.app_definition,
            channel_id: store.channel_id(),
            turn_num: vars.turn_num,
        })
    }

    /// Send `data` to every participant but us.
    fn broadcast(&self, store: &ChannelStore, data: Payload) -> Result<(), WalletError> {
        let me = &store.participants()[store.my_index()];
        for (i, p) in store.participants().iter().enumerate() {
            if i == store.my_index() {
                continue;
            }
            self.bus.send(Message {
                to: p.participant_id.clone(),
                from: me.participant_id.clone(),
                data: data.clone(),
            })?;
        }
        Ok(())
    }

    fn register_with_chain(&self, channel_id: Hash, outcome: &Outcome) {
        let mut registrations = self.registrations.lock();
        if registrations.contains_key(&channel_id) {
            return;
        }
        let asset_holders: Vec<_> = outcome.totals().into_keys().collect();
        let registration =
            self.chain
                .register_channel(channel_id, &asset_holders, self.chain_view.clone());
        registrations.insert(channel_id, registration);
    }

    /// Propose a new channel and sign our pre fund state.
    pub fn create_channel(
        &self,
        participants: Vec<Participant>,
        allocations: Outcome,
        app_definition: Address,
        app_data: Vec<u8>,
    ) -> Result<ChannelResult, WalletError> {
        let constants = ChannelConstants {
            chain_id: U256::from(self.config.chain_id),
            participants,
            channel_nonce: rand::random(),
            app_definition,
            challenge_duration: self.config.challenge_duration,
        };
        let mut store = ChannelStore::new(constants, self.address())?;
        let channel_id = store.channel_id();

        let vars = StateVariables {
            turn_num: store.my_index() as u64,
            is_final: false,
            app_data,
            outcome: allocations,
        };
        let signed = store.sign_and_add(vars, &self.signer)?;
        self.repository.insert(store.clone())?;
        self.register_with_chain(channel_id, &signed.state.vars.outcome);
        info!(channel_id = %channel_id, "Created channel");

        self.broadcast(
            &store,
            Payload {
                signed_states: vec![signed],
                objectives: vec![Objective::OpenChannel { channel_id }],
            },
        )?;
        self.result(&store)
    }

    /// Accept a channel someone else proposed by signing our pre fund
    /// state.
    pub fn join_channel(&self, channel_id: Hash) -> Result<ChannelResult, WalletError> {
        let (store, signed) = self.repository.update(&channel_id, |store| {
            if store.latest_signed_by_me().is_some() {
                return Err(WalletError::AlreadyJoined(channel_id));
            }
            let proposal = store.latest().ok_or(StoreError::NoSupportedState)?;
            let mut vars = proposal.state.vars;
            vars.turn_num = store.my_index() as u64;
            let signed = store.sign_and_add(vars, &self.signer)?;
            Ok((store.clone(), signed))
        })?;
        info!(channel_id = %channel_id, "Joined channel");

        self.broadcast(
            &store,
            Payload {
                signed_states: vec![signed],
                objectives: vec![],
            },
        )?;
        self.result(&store)
    }

    /// Deposit our share of the supported outcome.
    ///
    /// Our share of an asset is the amount allocated to our destination,
    /// deposited on top of what is allocated to the destinations before
    /// ours.
    pub async fn fund_channel(&self, channel_id: Hash) -> Result<Vec<TxHandle>, WalletError> {
        let store = self.repository.get(&channel_id)?;
        if derive_status(&store, self.chain_view.status(&channel_id).as_ref())
            != ChannelStatus::Funding
        {
            return Err(WalletError::NotRunning(channel_id));
        }
        let supported = store.supported()?;
        let my_destination = store.participants()[store.my_index()].destination;

        let mut deposits = Vec::new();
        for asset in &supported.state.vars.outcome.0 {
            let AssetOutcome::Allocation {
                asset_holder,
                items,
            } = asset
            else {
                continue;
            };
            let Some(mine) = items.iter().position(|i| i.destination == my_destination) else {
                continue;
            };
            let expected_held = items[..mine]
                .iter()
                .fold(U256::zero(), |acc, i| acc.saturating_add(i.amount));
            let amount = items[mine].amount;
            if amount.is_zero() {
                continue;
            }
            deposits.push(FundChannelArg {
                channel_id,
                asset_holder: *asset_holder,
                expected_held,
                amount,
            });
        }

        let mut handles = Vec::with_capacity(deposits.len());
        for deposit in deposits {
            handles.push(self.chain.fund_channel(deposit).await?);
        }
        Ok(handles)
    }

    /// Sign our post fund state once the chain holds everything the
    /// supported outcome allocates.
    pub fn confirm_funding(&self, channel_id: Hash) -> Result<ChannelResult, WalletError> {
        let (store, signed) = self.repository.update(&channel_id, |store| {
            let supported = store.supported()?;
            let n = store.participants().len() as u64;
            let after = supported.turn_num().saturating_add(1);
            if after < n || after >= 2 * n {
                return Err(WalletError::NotRunning(channel_id));
            }
            let funded = supported
                .state
                .vars
                .outcome
                .totals()
                .iter()
                .all(|(holder, total)| self.chain_view.holdings(&channel_id, holder) >= *total);
            if !funded {
                return Err(WalletError::NotFunded(channel_id));
            }
            let mut vars = supported.state.vars;
            vars.turn_num = n + store.my_index() as u64;
            let signed = store.sign_and_add(vars, &self.signer)?;
            Ok((store.clone(), signed))
        })?;
        debug!(channel_id = %channel_id, turn_num = signed.turn_num(), "Signed post fund state");

        self.broadcast(
            &store,
            Payload {
                signed_states: vec![signed],
                objectives: vec![],
            },
        )?;
        self.result(&store)
    }

    /// Sign the successor of the supported state.
    fn advance(
        &self,
        store: &mut ChannelStore,
        make_next: impl FnOnce(&StateVariables) -> StateVariables,
    ) -> Result<SignedState, WalletError> {
        let channel_id = store.channel_id();
        if derive_status(store, self.chain_view.status(&channel_id).as_ref())
            != ChannelStatus::Running
        {
            return Err(WalletError::NotRunning(channel_id));
        }
        if !store.my_turn() {
            return Err(WalletError::NotMyTurn(channel_id));
        }
        let supported = store.supported()?;
        let next = State {
            constants: store.constants().clone(),
            vars: make_next(&supported.state.vars),
        };
        self.apps.valid_transition(&supported.state, &next)?;
        Ok(store.sign_and_add(next.vars, &self.signer)?)
    }

    pub fn update_channel(
        &self,
        channel_id: Hash,
        allocations: Outcome,
        app_data: Vec<u8>,
    ) -> Result<ChannelResult, WalletError> {
        let (store, signed) = self.repository.update(&channel_id, |store| {
            let signed = self.advance(store, |prev| {
                let mut next = prev.make_next_state();
                next.outcome = allocations;
                next.app_data = app_data;
                next
            })?;
            Ok::<_, WalletError>((store.clone(), signed))
        })?;
        debug!(channel_id = %channel_id, turn_num = signed.turn_num(), "Updated channel");

        self.broadcast(
            &store,
            Payload {
                signed_states: vec![signed],
                objectives: vec![],
            },
        )?;
        self.result(&store)
    }

    /// Sign a final state, the others countersign it when they receive it.
    pub fn close_channel(&self, channel_id: Hash) -> Result<ChannelResult, WalletError> {
        let (store, signed) = self.repository.update(&channel_id, |store| {
            let signed = self.advance(store, |prev| {
                let mut next = prev.make_next_state();
                next.is_final = true;
                next
            })?;
            Ok::<_, WalletError>((store.clone(), signed))
        })?;
        info!(channel_id = %channel_id, "Closing channel");

        self.broadcast(
            &store,
            Payload {
                signed_states: vec![signed],
                objectives: vec![Objective::CloseChannel { channel_id }],
            },
        )?;
        self.result(&store)
    }

    /// Store the states of a message from another wallet.
    ///
    /// Channels we did not know yet are created. Final states are
    /// countersigned when it is our turn, so closing needs no further
    /// action from the application.
    pub fn push_message(&self, message: Message) -> Result<Vec<ChannelResult>, WalletError> {
        debug!(from = %message.from, states = message.data.signed_states.len(), "Received message");
        for objective in &message.data.objectives {
            debug!(channel_id = %objective.channel_id(), ?objective, "Received objective");
        }

        let mut touched: Vec<Hash> = Vec::new();
        for state in &message.data.signed_states {
            let channel_id = state.channel_id();
            let apply = |store: &mut ChannelStore| -> Result<Option<SignedState>, WalletError> {
                store.add_signed_state(state)?;
                self.countersign_final(store)
            };
            // Unknown channels are only stored once their first state was
            // accepted.
            let countersigned = if self.repository.contains(&channel_id) {
                self.repository.update(&channel_id, &apply)?
            } else {
                let mut store = ChannelStore::new(state.state.constants.clone(), self.address())?;
                let countersigned = apply(&mut store)?;
                match self.repository.insert(store) {
                    Ok(()) => countersigned,
                    Err(RepositoryError::ChannelExists(_)) => {
                        self.repository.update(&channel_id, &apply)?
                    }
                    Err(e) => return Err(e.into()),
                }
            };
            self.register_with_chain(channel_id, &state.state.vars.outcome);
            if let Some(signed) = countersigned {
                let store = self.repository.get(&channel_id)?;
                self.broadcast(
                    &store,
                    Payload {
                        signed_states: vec![signed],
                        objectives: vec![],
                    },
                )?;
            }
            if !touched.contains(&channel_id) {
                touched.push(channel_id);
            }
        }

        touched
            .iter()
            .map(|id| self.result(&self.repository.get(id)?))
            .collect()
    }

    fn countersign_final(
        &self,
        store: &mut ChannelStore,
    ) -> Result<Option<SignedState>, WalletError> {
        let Ok(supported) = store.supported() else {
            return Ok(None);
        };
        if !supported.state.is_final() || store.has_conclusion_proof() || !store.my_turn() {
            return Ok(None);
        }
        let signed = store.sign_and_add(supported.state.vars.make_next_state(), &self.signer)?;
        info!(channel_id = %store.channel_id(), turn_num = signed.turn_num(), "Countersigned final state");
        Ok(Some(signed))
    }

    pub fn get_state(&self, channel_id: Hash) -> Result<ChannelResult, WalletError> {
        self.result(&self.repository.get(&channel_id)?)
    }

    /// Register a challenge with the support of the latest supported state.
    pub async fn challenge(&self, channel_id: Hash) -> Result<TxHandle, WalletError> {
        let support = self.repository.get(&channel_id)?.support();
        if support.is_empty() {
            return Err(StoreError::NoSupportedState.into());
        }
        Ok(self.chain.challenge(&support, &self.signer).await?)
    }

    pub async fn conclude_and_withdraw(&self, channel_id: Hash) -> Result<TxHandle, WalletError> {
        let store = self.repository.get(&channel_id)?;
        if !store.has_conclusion_proof() {
            return Err(WalletError::NoConclusionProof(channel_id));
        }
        let handle = self.chain.conclude_and_withdraw(&store.support()).await?;
        if let Some(registration) = self.registrations.lock().remove(&channel_id) {
            registration.unregister();
        }
        Ok(handle)
    }

    /// Fetch the bytecode of an app so its transitions can be checked.
    pub async fn register_app_definition(&self, app_definition: Address) -> Result<(), WalletError> {
        let code = self.chain.fetch_bytecode(&app_definition).await?;
        self.bytecode.lock().insert(app_definition, code);
        Ok(())
    }

    pub fn is_app_registered(&self, app_definition: &Address) -> bool {
        self.bytecode.lock().contains_key(app_definition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chain::InMemoryChain,
        channel::test_utils::{constants, outcome, signed, signers, vars, ASSET_HOLDER},
        repository::MemoryRepository,
    };

    #[derive(Debug, Default)]
    struct Outbox(Mutex<Vec<Message>>);

    impl MessageBus for Outbox {
        fn send(&self, msg: Message) -> Result<(), WireError> {
            self.0.lock().push(msg);
            Ok(())
        }
    }

    type TestWallet = Wallet<MemoryRepository, Outbox, InMemoryChain>;

    const APP: Address = Address([0xaa; 20]);

    struct Setup {
        alice: TestWallet,
        bob: TestWallet,
        chain: Arc<InMemoryChain>,
        constants: ChannelConstants,
    }

    impl Setup {
        fn new() -> Self {
            let s = signers(2);
            let config = WalletConfig {
                asset_holder: ASSET_HOLDER,
                ledger_app_definition: Address([0xbb; 20]),
                ..Default::default()
            };
            let chain = Arc::new(InMemoryChain::new(Address([0xcc; 20]), 0));
            let wallet = |signer: &Signer| {
                Wallet::new(
                    signer.clone(),
                    config.clone(),
                    Arc::new(MemoryRepository::new()),
                    Outbox::default(),
                    chain.clone(),
                )
            };
            Setup {
                alice: wallet(&s[0]),
                bob: wallet(&s[1]),
                chain: chain.clone(),
                constants: constants(&s),
            }
        }

        fn deliver(from: &TestWallet, to: &TestWallet) -> Vec<ChannelResult> {
            let messages: Vec<_> = from.bus().0.lock().drain(..).collect();
            messages
                .into_iter()
                .flat_map(|m| to.push_message(m).unwrap())
                .collect()
        }

        fn status(wallet: &TestWallet, id: Hash) -> ChannelStatus {
            wallet.get_state(id).unwrap().status
        }

        /// Both wallets in the running state, returns the channel id.
        async fn running(&self) -> Hash {
            let created = self
                .alice
                .create_channel(
                    self.constants.participants.clone(),
                    outcome(&self.constants, &[5, 5]),
                    APP,
                    vec![],
                )
                .unwrap();
            let id = created.channel_id;
            Self::deliver(&self.alice, &self.bob);
            self.bob.join_channel(id).unwrap();
            Self::deliver(&self.bob, &self.alice);

            self.alice.fund_channel(id).await.unwrap();
            self.bob.fund_channel(id).await.unwrap();

            self.alice.confirm_funding(id).unwrap();
            self.bob.confirm_funding(id).unwrap();
            Self::deliver(&self.alice, &self.bob);
            Self::deliver(&self.bob, &self.alice);
            id
        }
    }

    #[tokio::test]
    async fn opening_a_channel() {
        let s = Setup::new();
        let created = s
            .alice
            .create_channel(
                s.constants.participants.clone(),
                outcome(&s.constants, &[5, 5]),
                APP,
                vec![],
            )
            .unwrap();
        let id = created.channel_id;
        assert_eq!(created.status, ChannelStatus::Opening);
        assert_eq!(created.turn_num, 0);

        let received = Setup::deliver(&s.alice, &s.bob);
        assert_eq!(received[0].status, ChannelStatus::Proposed);

        let joined = s.bob.join_channel(id).unwrap();
        assert_eq!(joined.status, ChannelStatus::Funding);
        assert!(matches!(
            s.bob.join_channel(id),
            Err(WalletError::AlreadyJoined(_))
        ));
        Setup::deliver(&s.bob, &s.alice);
        assert_eq!(Setup::status(&s.alice, id), ChannelStatus::Funding);

        // Nobody deposited yet.
        assert!(matches!(
            s.alice.confirm_funding(id),
            Err(WalletError::NotFunded(_))
        ));

        let handles = s.alice.fund_channel(id).await.unwrap();
        assert_eq!(handles.len(), 1);
        s.bob.fund_channel(id).await.unwrap();
        assert_eq!(s.chain.holdings(id, ASSET_HOLDER), U256::from(10u64));
        assert_eq!(
            s.alice.chain_view().holdings(&id, &ASSET_HOLDER),
            U256::from(10u64)
        );

        s.alice.confirm_funding(id).unwrap();
        s.bob.confirm_funding(id).unwrap();
        Setup::deliver(&s.alice, &s.bob);
        Setup::deliver(&s.bob, &s.alice);
        assert_eq!(Setup::status(&s.alice, id), ChannelStatus::Running);
        assert_eq!(Setup::status(&s.bob, id), ChannelStatus::Running);
        assert_eq!(s.bob.get_state(id).unwrap().turn_num, 3);
    }

    #[tokio::test]
    async fn updating_and_closing() {
        let s = Setup::new();
        let id = s.running().await;

        // Turn 4 belongs to alice.
        assert!(matches!(
            s.bob.update_channel(id, outcome(&s.constants, &[6, 4]), vec![]),
            Err(WalletError::NotMyTurn(_))
        ));
        let updated = s
            .alice
            .update_channel(id, outcome(&s.constants, &[3, 7]), vec![1])
            .unwrap();
        assert_eq!(updated.turn_num, 4);
        assert_eq!(updated.app_data, vec![1]);
        Setup::deliver(&s.alice, &s.bob);
        assert_eq!(s.bob.get_state(id).unwrap().allocations, outcome(&s.constants, &[3, 7]));

        let closing = s.bob.close_channel(id).unwrap();
        assert_eq!(closing.status, ChannelStatus::Closing);

        // Alice countersigns right away.
        let results = Setup::deliver(&s.bob, &s.alice);
        assert_eq!(results[0].status, ChannelStatus::Closed);
        assert_eq!(results[0].turn_num, 6);
        Setup::deliver(&s.alice, &s.bob);
        assert_eq!(Setup::status(&s.bob, id), ChannelStatus::Closed);

        s.alice.conclude_and_withdraw(id).await.unwrap();
        let bob_dest = s.constants.participants[1].destination;
        assert_eq!(s.chain.balance(ASSET_HOLDER, bob_dest), U256::from(7u64));
        assert!(matches!(
            s.bob.conclude_and_withdraw(id).await,
            Err(WalletError::Chain(ChainError::AlreadyFinalized(_)))
        ));
    }

    #[tokio::test]
    async fn updates_need_a_running_channel() {
        let s = Setup::new();
        let created = s
            .alice
            .create_channel(
                s.constants.participants.clone(),
                outcome(&s.constants, &[5, 5]),
                APP,
                vec![],
            )
            .unwrap();
        assert!(matches!(
            s.alice
                .update_channel(created.channel_id, outcome(&s.constants, &[5, 5]), vec![]),
            Err(WalletError::NotRunning(_))
        ));
        assert!(matches!(
            s.alice.conclude_and_withdraw(created.channel_id).await,
            Err(WalletError::NoConclusionProof(_))
        ));
    }

    #[tokio::test]
    async fn turns_alternate() {
        let s = Setup::new();
        let id = s.running().await;
        let result = s
            .alice
            .update_channel(id, outcome(&s.constants, &[5, 5]), vec![])
            .unwrap();
        assert_eq!(result.turn_num, 4);
        assert!(matches!(
            s.alice
                .update_channel(id, outcome(&s.constants, &[5, 5]), vec![]),
            Err(WalletError::NotMyTurn(_))
        ));
    }

    #[tokio::test]
    async fn challenges_show_up_in_the_status() {
        let s = Setup::new();
        let id = s.running().await;

        s.alice.challenge(id).await.unwrap();
        assert_eq!(Setup::status(&s.alice, id), ChannelStatus::Challenging);
        assert_eq!(Setup::status(&s.bob, id), ChannelStatus::Responding);
        assert!(matches!(
            s.alice
                .update_channel(id, outcome(&s.constants, &[5, 5]), vec![]),
            Err(WalletError::NotRunning(_))
        ));

        s.chain.advance_time(WalletConfig::default().challenge_duration);
        assert_eq!(Setup::status(&s.alice, id), ChannelStatus::Closed);
        assert_eq!(Setup::status(&s.bob, id), ChannelStatus::Closed);
    }

    #[tokio::test]
    async fn outsiders_cannot_receive_channels() {
        let s = Setup::new();
        let others = signers(3);
        let c = constants(&others[1..]);
        let foreign = signed(&c, vars(0, outcome(&c, &[1, 1])), &[&others[1]]);
        let message = Message {
            to: "participant-0".into(),
            from: "participant-1".into(),
            data: Payload {
                signed_states: vec![foreign],
                objectives: vec![],
            },
        };
        assert!(matches!(
            s.alice.push_message(message),
            Err(WalletError::Store(StoreError::NotParticipant(_)))
        ));
    }

    #[tokio::test]
    async fn rejected_states_leave_no_channel_behind() {
        let s = Setup::new();
        let id = s
            .alice
            .create_channel(
                s.constants.participants.clone(),
                outcome(&s.constants, &[5, 5]),
                APP,
                vec![],
            )
            .unwrap()
            .channel_id;
        let genuine = s.alice.bus().0.lock().pop().unwrap();

        // Alice's signature presented as Bob's.
        let mut forged = genuine.clone();
        forged.data.signed_states[0].signatures[0].signer =
            s.constants.participants[1].signing_address;
        assert!(matches!(
            s.bob.push_message(forged),
            Err(WalletError::Store(StoreError::InvalidSignature(_)))
        ));
        assert!(!s.bob.repository.contains(&id));
        assert!(matches!(
            s.bob.get_state(id),
            Err(WalletError::Repository(RepositoryError::ChannelMissing(_)))
        ));
        assert!(!s.bob.registrations.lock().contains_key(&id));

        let received = s.bob.push_message(genuine).unwrap();
        assert_eq!(received[0].status, ChannelStatus::Proposed);
        assert!(s.bob.registrations.lock().contains_key(&id));
    }

    #[tokio::test]
    async fn app_bytecode_is_fetched() {
        let s = Setup::new();
        assert!(s.alice.register_app_definition(APP).await.is_err());
        s.chain.deploy(APP, vec![0x60]);
        s.alice.register_app_definition(APP).await.unwrap();
        assert!(s.alice.is_app_registered(&APP));
    }

    #[test]
    fn status_is_lowercase_json() {
        assert_eq!(
            serde_json::to_string(&ChannelStatus::Responding).unwrap(),
            "\"responding\""
        );
    }
}
