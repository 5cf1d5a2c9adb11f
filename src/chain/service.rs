use std::{
    collections::HashMap,
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};

use super::{ChainError, ChainEventSubscriber, ChainEventTracker};
use crate::{
    abiencode::types::{Address, Hash, U256},
    channel::{SignedState, State},
    sig::Signer,
};

/// Deposit `amount` into `channel_id`, provided the asset holder already
/// holds `expected_held` for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundChannelArg {
    pub channel_id: Hash,
    pub asset_holder: Address,
    pub expected_held: U256,
    pub amount: U256,
}

/// A submitted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxHandle {
    pub hash: Hash,
    pub block_number: u64,
}

#[async_trait]
pub trait ChainService: Send + Sync {
    async fn fund_channel(&self, arg: FundChannelArg) -> Result<TxHandle, ChainError>;

    /// Start delivering events of `channel_id` to `subscriber`.
    ///
    /// The current holdings of every asset holder are reported right away.
    /// Delivery stops when the returned handle is unregistered.
    fn register_channel(
        &self,
        channel_id: Hash,
        asset_holders: &[Address],
        subscriber: Arc<dyn ChainEventSubscriber>,
    ) -> Registration;

    /// Stop delivering events of `channel_id` to any subscriber.
    fn unregister_channel(&self, channel_id: &Hash);

    /// Register a challenge with `states`, the last one being the challenge
    /// state.
    async fn challenge(&self, states: &[SignedState], challenger: &Signer)
        -> Result<TxHandle, ChainError>;

    /// Conclude the channel with a proof of final states and pay out.
    async fn conclude_and_withdraw(&self, proof: &[SignedState]) -> Result<TxHandle, ChainError>;

    /// Pay out a channel finalized by a challenge.
    async fn push_outcome_and_withdraw(
        &self,
        state: &State,
        challenger: Address,
    ) -> Result<TxHandle, ChainError>;

    async fn fetch_bytecode(&self, address: &Address) -> Result<Vec<u8>, ChainError>;
}

/// Serializes transaction submission per signing key.
///
/// Two transactions signed by the same key must not be in flight at the same
/// time, they would race for the same nonce.
#[derive(Debug, Default)]
pub struct SubmissionQueue {
    locks: Mutex<HashMap<Address, Arc<tokio::sync::Mutex<()>>>>,
}

impl SubmissionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `submit` once every earlier submission of `signer` finished.
    /// Submissions of one signer run in the order they were queued.
    pub async fn run<F, T>(&self, signer: Address, submit: F) -> T
    where
        F: Future<Output = T>,
    {
        let lock = self.locks.lock().entry(signer).or_default().clone();
        let _guard = lock.lock().await;
        debug!(signer = %signer, "Submitting transaction");
        submit.await
    }
}

type Entry = (u64, Arc<ChainEventTracker>);

/// Trackers of all registered subscribers, by channel.
#[derive(Debug, Default)]
pub struct SubscriberRegistry {
    next_id: AtomicU64,
    channels: Mutex<HashMap<Hash, Vec<Entry>>>,
}

impl SubscriberRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Wrap `subscriber` in its own tracker and add it.
    pub fn register(
        self: &Arc<Self>,
        channel_id: Hash,
        subscriber: Arc<dyn ChainEventSubscriber>,
    ) -> (Registration, Arc<ChainEventTracker>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let tracker = Arc::new(ChainEventTracker::new(subscriber));
        self.channels
            .lock()
            .entry(channel_id)
            .or_default()
            .push((id, tracker.clone()));
        info!(channel_id = %channel_id, "Registered channel");

        let registration = Registration {
            id,
            channel_id,
            registry: Arc::downgrade(self),
        };
        (registration, tracker)
    }

    fn remove(&self, channel_id: &Hash, id: u64) {
        let mut channels = self.channels.lock();
        if let Some(entries) = channels.get_mut(channel_id) {
            entries.retain(|(i, _)| *i != id);
            if entries.is_empty() {
                channels.remove(channel_id);
            }
        }
    }

    pub fn unregister_channel(&self, channel_id: &Hash) {
        if self.channels.lock().remove(channel_id).is_some() {
            info!(channel_id = %channel_id, "Unregistered channel");
        }
    }

    /// Snapshot of the trackers for `channel_id`. Delivery happens without
    /// holding the registry lock.
    pub fn trackers(&self, channel_id: &Hash) -> Vec<Arc<ChainEventTracker>> {
        self.channels
            .lock()
            .get(channel_id)
            .map(|entries| entries.iter().map(|(_, t)| t.clone()).collect())
            .unwrap_or_default()
    }

    pub fn is_registered(&self, channel_id: &Hash) -> bool {
        self.channels.lock().contains_key(channel_id)
    }
}

/// Handle returned by [ChainService::register_channel].
///
/// Dropping the handle keeps the registration alive, call
/// [Registration::unregister] to stop delivery.
#[derive(Debug)]
#[must_use = "keep the registration to be able to unregister"]
pub struct Registration {
    id: u64,
    channel_id: Hash,
    registry: Weak<SubscriberRegistry>,
}

impl Registration {
    pub fn channel_id(&self) -> Hash {
        self.channel_id
    }

    pub fn unregister(self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.channel_id, self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{event_tracker::tests::Recorder, HoldingUpdated, LogPosition};

    #[tokio::test]
    async fn queue_runs_in_order() {
        let queue = SubmissionQueue::new();
        let order = Mutex::new(Vec::new());
        let signer = Address([1; 20]);

        let first = queue.run(signer, async {
            tokio::task::yield_now().await;
            order.lock().push(1);
        });
        let second = queue.run(signer, async {
            order.lock().push(2);
        });
        tokio::join!(first, second);

        assert_eq!(*order.lock(), vec![1, 2]);
    }

    #[tokio::test]
    async fn different_signers_do_not_wait() {
        let queue = SubmissionQueue::new();
        let (tx, rx) = tokio::sync::oneshot::channel();

        // The first submission can only finish once the second one ran.
        let waiting = queue.run(Address([1; 20]), async { rx.await.unwrap() });
        let sending = queue.run(Address([2; 20]), async { tx.send(7).unwrap() });
        let (value, ()) = tokio::join!(waiting, sending);
        assert_eq!(value, 7);
    }

    #[test]
    fn unregister_stops_delivery() {
        let registry = SubscriberRegistry::new();
        let channel_id = Hash([9; 32]);
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());

        let (reg_a, _) = registry.register(channel_id, a.clone());
        let (_reg_b, _) = registry.register(channel_id, b.clone());
        reg_a.unregister();

        let event = HoldingUpdated {
            channel_id,
            asset_holder: Address([1; 20]),
            amount: U256::from(3u64),
        };
        for tracker in registry.trackers(&channel_id) {
            tracker.holding_updated(event.clone(), LogPosition::new(1, 0));
        }
        assert!(a.holdings.lock().is_empty());
        assert_eq!(b.holdings.lock().len(), 1);

        registry.unregister_channel(&channel_id);
        assert!(!registry.is_registered(&channel_id));
        assert!(registry.trackers(&channel_id).is_empty());
    }
}
