//! Storage for channel stores.
//!
//! All changes to one channel go through [ChannelRepository::update], which
//! runs the change as a transaction: concurrent updates of the same channel
//! are serialized, updates of different channels don't block each other, and
//! a failing update leaves the channel untouched.

use std::{collections::HashMap, sync::Arc};

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::{
    abiencode::types::Hash,
    store::{ChannelRecord, ChannelStore, StoreError},
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("channel {0} already exists")]
    ChannelExists(Hash),
    #[error("channel {0} is unknown")]
    ChannelMissing(Hash),
    #[error("stored channel is corrupt: {0}")]
    Corrupt(#[from] StoreError),
}

pub trait ChannelRepository: Send + Sync {
    fn contains(&self, channel_id: &Hash) -> bool;

    /// Add a new channel, fails if one with the same id exists.
    fn insert(&self, store: ChannelStore) -> Result<(), RepositoryError>;

    /// Snapshot of the channel, later changes are not reflected.
    fn get(&self, channel_id: &Hash) -> Result<ChannelStore, RepositoryError>;

    fn channel_ids(&self) -> Vec<Hash>;

    /// Read-modify-write `channel_id`.
    ///
    /// The changes made by `f` are only kept if it returns `Ok`.
    fn update<T, E, F>(&self, channel_id: &Hash, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut ChannelStore) -> Result<T, E>,
        E: From<RepositoryError>;
}

/// Keeps the persisted form of every channel in memory.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    channels: RwLock<HashMap<Hash, Arc<Mutex<ChannelRecord>>>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, channel_id: &Hash) -> Result<Arc<Mutex<ChannelRecord>>, RepositoryError> {
        self.channels
            .read()
            .get(channel_id)
            .cloned()
            .ok_or(RepositoryError::ChannelMissing(*channel_id))
    }
}

impl ChannelRepository for MemoryRepository {
    fn contains(&self, channel_id: &Hash) -> bool {
        self.channels.read().contains_key(channel_id)
    }

    fn insert(&self, store: ChannelStore) -> Result<(), RepositoryError> {
        let channel_id = store.channel_id();
        let mut channels = self.channels.write();
        if channels.contains_key(&channel_id) {
            return Err(RepositoryError::ChannelExists(channel_id));
        }
        channels.insert(channel_id, Arc::new(Mutex::new(store.to_record())));
        debug!(channel_id = %channel_id, "Stored new channel");
        Ok(())
    }

    fn get(&self, channel_id: &Hash) -> Result<ChannelStore, RepositoryError> {
        let entry = self.entry(channel_id)?;
        let record = entry.lock().clone();
        Ok(ChannelStore::from_record(record)?)
    }

    fn channel_ids(&self) -> Vec<Hash> {
        self.channels.read().keys().copied().collect()
    }

    fn update<T, E, F>(&self, channel_id: &Hash, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut ChannelStore) -> Result<T, E>,
        E: From<RepositoryError>,
    {
        // Only the lock of this channel is held while `f` runs.
        let entry = self.entry(channel_id)?;
        let mut record = entry.lock();
        let mut store = ChannelStore::from_record(record.clone()).map_err(RepositoryError::from)?;
        let result = f(&mut store)?;
        *record = store.to_record();
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::test_utils::{constants, outcome, signers, vars};
    use std::thread;

    fn repo_with_channel() -> (MemoryRepository, Hash, Vec<crate::sig::Signer>) {
        let s = signers(2);
        let store = ChannelStore::new(constants(&s), s[0].address()).unwrap();
        let id = store.channel_id();
        let repo = MemoryRepository::new();
        repo.insert(store).unwrap();
        (repo, id, s)
    }

    #[test]
    fn insert_twice_fails() {
        let (repo, id, s) = repo_with_channel();
        let store = ChannelStore::new(constants(&s), s[0].address()).unwrap();
        assert_eq!(
            repo.insert(store).unwrap_err(),
            RepositoryError::ChannelExists(id)
        );
        assert_eq!(repo.channel_ids(), vec![id]);
    }

    #[test]
    fn failed_update_is_rolled_back() {
        let (repo, id, s) = repo_with_channel();
        let c = constants(&s);

        let result: Result<(), RepositoryError> = repo.update(&id, |store| {
            store.sign_and_add(vars(0, outcome(&c, &[1, 1])), &s[0])?;
            Err(RepositoryError::ChannelMissing(id))
        });
        assert!(result.is_err());
        assert!(repo.get(&id).unwrap().latest().is_none());

        repo.update(&id, |store| {
            store.sign_and_add(vars(0, outcome(&c, &[1, 1])), &s[0])?;
            Ok::<_, RepositoryError>(())
        })
        .unwrap();
        assert_eq!(repo.get(&id).unwrap().latest().unwrap().turn_num(), 0);
    }

    #[test]
    fn unknown_channel() {
        let repo = MemoryRepository::new();
        let id = Hash([1; 32]);
        assert!(!repo.contains(&id));
        let result: Result<(), RepositoryError> = repo.update(&id, |_| Ok(()));
        assert_eq!(result.unwrap_err(), RepositoryError::ChannelMissing(id));
    }

    #[test]
    fn concurrent_updates_are_serialized() {
        let (repo, id, s) = repo_with_channel();
        let repo = Arc::new(repo);
        let c = constants(&s);

        // Every thread reads the latest turn and adds the next one. Lost
        // updates would show up as duplicate turns.
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let repo = repo.clone();
                let signer = s[0].clone();
                let c = c.clone();
                thread::spawn(move || {
                    repo.update(&id, |store| {
                        let turn_num = store.latest().map_or(0, |l| l.turn_num() + 1);
                        store.sign_and_add(vars(turn_num, outcome(&c, &[1, 1])), &signer)?;
                        Ok::<_, RepositoryError>(())
                    })
                    .unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(repo.get(&id).unwrap().latest().unwrap().turn_num(), 7);
    }
}
