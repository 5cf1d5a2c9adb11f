use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use parking_lot::Mutex;
use tracing::trace;

use super::{
    AssetOutcomeUpdated, ChainEventSubscriber, ChallengeRegistered, ChannelFinalized,
    HoldingUpdated, LogPosition,
};
use crate::abiencode::types::{Address, Hash};

/// An accepted event waiting for delivery.
#[derive(Debug)]
enum Pending {
    Holding(HoldingUpdated),
    Outcome(AssetOutcomeUpdated),
    Finalized(ChannelFinalized),
    Challenge(ChallengeRegistered),
}

impl Pending {
    fn deliver(self, subscriber: &dyn ChainEventSubscriber) {
        match self {
            Pending::Holding(e) => subscriber.holding_updated(e),
            Pending::Outcome(e) => subscriber.asset_outcome_updated(e),
            Pending::Finalized(e) => subscriber.channel_finalized(e),
            Pending::Challenge(e) => subscriber.challenge_registered(e),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    watermarks: HashMap<(Hash, Address), LogPosition>,
    queue: VecDeque<Pending>,
    /// Some caller is draining `queue`.
    delivering: bool,
}

/// Deduplicates and orders asset holder events before they reach the
/// subscriber.
///
/// Keeps the position of the last accepted event per channel and asset
/// holder. Asset holder events at or before that position are dropped.
/// Adjudicator events come from a single ordered source and are always
/// forwarded.
///
/// Accepted events are queued and handed to the subscriber one at a time,
/// in the order they were accepted, by whichever caller finds nobody else
/// delivering. No lock is held while the subscriber runs, so it may call
/// back into the tracker.
pub struct ChainEventTracker {
    subscriber: Arc<dyn ChainEventSubscriber>,
    inner: Mutex<Inner>,
}

impl core::fmt::Debug for ChainEventTracker {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ChainEventTracker")
            .field("inner", &*self.inner.lock())
            .finish_non_exhaustive()
    }
}

impl ChainEventTracker {
    pub fn new(subscriber: Arc<dyn ChainEventSubscriber>) -> Self {
        Self {
            subscriber,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Queue `event` if `position` is newer than anything accepted so far
    /// for the source.
    fn forward_if_new(&self, source: (Hash, Address), position: LogPosition, event: Pending) -> bool {
        let mut inner = self.inner.lock();
        if let Some(last) = inner.watermarks.get(&source) {
            if position <= *last {
                trace!(
                    channel_id = %source.0,
                    asset_holder = %source.1,
                    block_number = position.block_number,
                    log_index = position.log_index,
                    "Dropping already delivered event"
                );
                return false;
            }
        }
        inner.watermarks.insert(source, position);
        inner.queue.push_back(event);
        drop(inner);
        self.drain();
        true
    }

    fn enqueue(&self, event: Pending) {
        self.inner.lock().queue.push_back(event);
        self.drain();
    }

    /// Deliver queued events unless another caller already does.
    fn drain(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.delivering {
                return;
            }
            inner.delivering = true;
        }
        loop {
            let next = {
                let mut inner = self.inner.lock();
                let next = inner.queue.pop_front();
                if next.is_none() {
                    inner.delivering = false;
                }
                next
            };
            match next {
                Some(event) => event.deliver(self.subscriber.as_ref()),
                None => return,
            }
        }
    }

    /// Returns whether the event was forwarded.
    pub fn holding_updated(&self, event: HoldingUpdated, position: LogPosition) -> bool {
        let source = (event.channel_id, event.asset_holder);
        self.forward_if_new(source, position, Pending::Holding(event))
    }

    /// Returns whether the event was forwarded.
    pub fn asset_outcome_updated(&self, event: AssetOutcomeUpdated, position: LogPosition) -> bool {
        let source = (event.channel_id, event.asset_holder);
        self.forward_if_new(source, position, Pending::Outcome(event))
    }

    pub fn channel_finalized(&self, event: ChannelFinalized) {
        self.enqueue(Pending::Finalized(event));
    }

    pub fn challenge_registered(&self, event: ChallengeRegistered) {
        self.enqueue(Pending::Challenge(event));
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::abiencode::types::U256;
    use std::thread;

    /// Remembers everything it receives.
    #[derive(Debug, Default)]
    pub struct Recorder {
        pub holdings: Mutex<Vec<HoldingUpdated>>,
        pub outcomes: Mutex<Vec<AssetOutcomeUpdated>>,
        pub finalized: Mutex<Vec<ChannelFinalized>>,
        pub challenges: Mutex<Vec<ChallengeRegistered>>,
    }

    impl ChainEventSubscriber for Recorder {
        fn holding_updated(&self, event: HoldingUpdated) {
            self.holdings.lock().push(event);
        }

        fn asset_outcome_updated(&self, event: AssetOutcomeUpdated) {
            self.outcomes.lock().push(event);
        }

        fn channel_finalized(&self, event: ChannelFinalized) {
            self.finalized.lock().push(event);
        }

        fn challenge_registered(&self, event: ChallengeRegistered) {
            self.challenges.lock().push(event);
        }
    }

    const CHANNEL: Hash = Hash([1; 32]);
    const HOLDER: Address = Address([2; 20]);

    fn holding(amount: u64) -> HoldingUpdated {
        HoldingUpdated {
            channel_id: CHANNEL,
            asset_holder: HOLDER,
            amount: U256::from(amount),
        }
    }

    fn tracker() -> (Arc<Recorder>, ChainEventTracker) {
        let recorder = Arc::new(Recorder::default());
        (recorder.clone(), ChainEventTracker::new(recorder))
    }

    #[test]
    fn duplicates_are_delivered_once() {
        let (recorder, tracker) = tracker();

        assert!(tracker.holding_updated(holding(5), LogPosition::new(5, 2)));
        assert!(!tracker.holding_updated(holding(5), LogPosition::new(5, 2)));
        assert!(tracker.holding_updated(holding(7), LogPosition::new(5, 3)));
        // Older block, larger index.
        assert!(!tracker.holding_updated(holding(3), LogPosition::new(4, 9)));

        assert_eq!(*recorder.holdings.lock(), vec![holding(5), holding(7)]);
    }

    #[test]
    fn snapshot_covers_its_block() {
        let (recorder, tracker) = tracker();

        assert!(tracker.holding_updated(holding(10), LogPosition::snapshot(8)));
        assert!(!tracker.holding_updated(holding(10), LogPosition::new(8, 4)));
        assert!(tracker.holding_updated(holding(12), LogPosition::new(9, 0)));
        assert_eq!(recorder.holdings.lock().len(), 2);
    }

    #[test]
    fn sources_are_independent() {
        let (recorder, tracker) = tracker();
        let mut other = holding(1);
        other.asset_holder = Address([3; 20]);

        assert!(tracker.holding_updated(holding(1), LogPosition::new(5, 2)));
        assert!(tracker.holding_updated(other, LogPosition::new(5, 1)));
        assert_eq!(recorder.holdings.lock().len(), 2);
    }

    #[test]
    fn outcome_updates_share_the_watermark() {
        let (recorder, tracker) = tracker();
        let outcome = AssetOutcomeUpdated {
            channel_id: CHANNEL,
            asset_holder: HOLDER,
            new_holdings: U256::zero(),
            external_payouts: vec![],
        };

        assert!(tracker.holding_updated(holding(5), LogPosition::new(5, 2)));
        assert!(!tracker.asset_outcome_updated(outcome.clone(), LogPosition::new(5, 1)));
        assert!(tracker.asset_outcome_updated(outcome, LogPosition::new(6, 0)));
        assert_eq!(recorder.outcomes.lock().len(), 1);
    }

    #[test]
    fn adjudicator_events_are_always_forwarded() {
        let (recorder, tracker) = tracker();
        let event = ChannelFinalized {
            channel_id: CHANNEL,
            block_number: 3,
            block_timestamp: 30,
            finalized_at: 30,
        };
        tracker.channel_finalized(event.clone());
        tracker.channel_finalized(event);
        assert_eq!(recorder.finalized.lock().len(), 2);
    }

    /// Feeds one more event back into the tracker from within delivery.
    #[derive(Default)]
    struct Echo {
        tracker: Mutex<Option<Arc<ChainEventTracker>>>,
        seen: Mutex<Vec<U256>>,
    }

    impl ChainEventSubscriber for Echo {
        fn holding_updated(&self, event: HoldingUpdated) {
            self.seen.lock().push(event.amount);
            let tracker = self.tracker.lock().take();
            if let Some(tracker) = tracker {
                assert!(tracker.holding_updated(holding(2), LogPosition::new(2, 0)));
                // Not delivered yet, the first event is still being handled.
                assert_eq!(self.seen.lock().len(), 1);
            }
        }

        fn asset_outcome_updated(&self, _: AssetOutcomeUpdated) {}

        fn channel_finalized(&self, _: ChannelFinalized) {}

        fn challenge_registered(&self, _: ChallengeRegistered) {}
    }

    #[test]
    fn subscriber_may_call_back() {
        let echo = Arc::new(Echo::default());
        let tracker = Arc::new(ChainEventTracker::new(echo.clone()));
        *echo.tracker.lock() = Some(tracker.clone());

        assert!(tracker.holding_updated(holding(1), LogPosition::new(1, 0)));
        assert_eq!(*echo.seen.lock(), vec![U256::from(1u64), U256::from(2u64)]);
        assert!(!tracker.holding_updated(holding(2), LogPosition::new(2, 0)));
    }

    #[test]
    fn racing_sources_deliver_once() {
        let (recorder, tracker) = tracker();
        let tracker = Arc::new(tracker);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let tracker = tracker.clone();
                thread::spawn(move || {
                    for i in 0..50 {
                        tracker.holding_updated(holding(i), LogPosition::new(i, 0));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let delivered = recorder.holdings.lock();
        assert!(delivered.len() <= 50);
        assert!(delivered.windows(2).all(|w| w[0].amount < w[1].amount));
        assert_eq!(delivered.last().unwrap().amount, U256::from(49u64));
    }
}
