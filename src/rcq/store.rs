use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use crate::protocol::error::ErrorKind;

/// The last write a transaction holds for one key.
#[derive(Debug, Clone)]
enum WriteState<V> {
    Added(V),
    Removed,
}

/// One write in commit order.
#[derive(Debug, Clone)]
pub(crate) enum WriteOp<V> {
    Add { key: i64, value: V },
    Remove { key: i64 },
}

/// A transaction over [`OrderedStore`].
///
/// Writes are buffered until commit; written keys stay locked so a racing
/// transaction observes the conflict instead of silently interleaving.
#[derive(Debug)]
pub struct StoreTransaction<V> {
    id: u64,
    writes: Vec<WriteOp<V>>,
    write_state: HashMap<i64, WriteState<V>>,
    locked: HashSet<i64>,
}

impl<V> StoreTransaction<V> {
    pub fn id(&self) -> u64 {
        self.id
    }
}

#[derive(Debug, Default)]
struct LockTable {
    locked: Mutex<HashSet<i64>>,
    released: Notify,
}

impl LockTable {
    async fn lock_key(&self, key: i64, deadline: Instant) -> Result<(), ErrorKind> {
        loop {
            let notified = self.released.notified();
            {
                let mut locked = self.locked.lock();
                if !locked.contains(&key) {
                    locked.insert(key);
                    return Ok(());
                }
            }

            let wait = deadline
                .checked_duration_since(Instant::now())
                .ok_or(ErrorKind::Timeout)?;

            // a release between the check above and the select registering
            // the waiter would be lost, so never sleep unboundedly
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep(wait.min(Duration::from_millis(50))) => {}
            }
        }
    }

    fn unlock_all(&self, keys: impl IntoIterator<Item = i64>) {
        let mut locked = self.locked.lock();
        for key in keys {
            locked.remove(&key);
        }
        drop(locked);
        self.released.notify_waiters();
    }
}

/// In-memory transactional store ordered by `i64` key.
///
/// Provides the surface the queue needs from its persistence layer:
/// transactional add and conditional remove, read-your-own-writes within a
/// transaction, and snapshot-consistent key enumeration.
#[derive(Debug)]
pub struct OrderedStore<V> {
    committed: RwLock<BTreeMap<i64, V>>,
    locks: LockTable,
    next_txn_id: AtomicU64,
}

impl<V> Default for OrderedStore<V>
where
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> OrderedStore<V>
where
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            committed: RwLock::new(BTreeMap::new()),
            locks: LockTable::default(),
            next_txn_id: AtomicU64::new(0),
        }
    }

    pub fn create_transaction(&self) -> StoreTransaction<V> {
        StoreTransaction {
            id: self.next_txn_id.fetch_add(1, Ordering::Relaxed) + 1,
            writes: Vec::new(),
            write_state: HashMap::new(),
            locked: HashSet::new(),
        }
    }

    /// Buffer an insert of a fresh key.
    pub async fn add(
        &self,
        txn: &mut StoreTransaction<V>,
        key: i64,
        value: V,
        timeout: Duration,
    ) -> Result<(), ErrorKind> {
        if !txn.locked.contains(&key) {
            self.locks.lock_key(key, Instant::now() + timeout).await?;
            txn.locked.insert(key);
        }

        let exists = match txn.write_state.get(&key) {
            Some(WriteState::Added(_)) => true,
            Some(WriteState::Removed) => false,
            None => self.committed.read().contains_key(&key),
        };
        if exists {
            self.release_if_unwritten(txn, key);
            return Err(ErrorKind::InvalidArgument);
        }

        txn.writes.push(WriteOp::Add {
            key,
            value: value.clone(),
        });
        txn.write_state.insert(key, WriteState::Added(value));
        Ok(())
    }

    /// The value visible to this transaction: its own writes shadow the
    /// committed state.
    pub fn conditional_get(&self, txn: &StoreTransaction<V>, key: i64) -> Option<V> {
        match txn.write_state.get(&key) {
            Some(WriteState::Added(value)) => Some(value.clone()),
            Some(WriteState::Removed) => None,
            None => self.committed.read().get(&key).cloned(),
        }
    }

    /// Buffer a removal of `key` if it is visible to this transaction.
    ///
    /// Returns false when the key is gone or another transaction holds it
    /// past the timeout; the caller treats both as a lost race.
    pub async fn conditional_remove(
        &self,
        txn: &mut StoreTransaction<V>,
        key: i64,
        timeout: Duration,
    ) -> Result<bool, ErrorKind> {
        match txn.write_state.get(&key) {
            Some(WriteState::Added(_)) => {
                // removing our own uncommitted add
                txn.writes.push(WriteOp::Remove { key });
                txn.write_state.insert(key, WriteState::Removed);
                return Ok(true);
            }
            Some(WriteState::Removed) => return Ok(false),
            None => {}
        }

        if !txn.locked.contains(&key) {
            match self.locks.lock_key(key, Instant::now() + timeout).await {
                Ok(()) => {
                    txn.locked.insert(key);
                }
                Err(ErrorKind::Timeout) => {
                    debug!(key, "conditional remove lost the key lock");
                    return Ok(false);
                }
                Err(kind) => return Err(kind),
            }
        }

        if !self.committed.read().contains_key(&key) {
            self.release_if_unwritten(txn, key);
            return Ok(false);
        }

        txn.writes.push(WriteOp::Remove { key });
        txn.write_state.insert(key, WriteState::Removed);
        Ok(true)
    }

    /// Keys visible to this transaction as of now, in order. The snapshot
    /// does not move with later commits of other transactions.
    pub fn create_key_enumerator(&self, txn: &StoreTransaction<V>) -> KeyEnumerator {
        let mut keys: Vec<i64> = self.committed.read().keys().copied().collect();
        for (key, state) in &txn.write_state {
            match state {
                WriteState::Added(_) => keys.push(*key),
                WriteState::Removed => keys.retain(|k| k != key),
            }
        }
        keys.sort_unstable();
        keys.dedup();
        KeyEnumerator { keys, position: 0 }
    }

    /// Apply the transaction's writes and release its locks.
    pub fn commit(&self, txn: StoreTransaction<V>) -> Vec<WriteOp<V>> {
        {
            let mut committed = self.committed.write();
            for write in &txn.writes {
                match write {
                    WriteOp::Add { key, value } => {
                        committed.insert(*key, value.clone());
                    }
                    WriteOp::Remove { key } => {
                        committed.remove(key);
                    }
                }
            }
        }
        self.locks.unlock_all(txn.locked);
        txn.writes
    }

    /// Discard the transaction's writes and release its locks.
    pub fn abort(&self, txn: StoreTransaction<V>) {
        self.locks.unlock_all(txn.locked);
    }

    /// Write around the transaction machinery; the apply paths of a
    /// replica use this for operations that already committed elsewhere.
    pub fn apply_add(&self, key: i64, value: V) {
        self.committed.write().insert(key, value);
    }

    pub fn apply_remove(&self, key: i64) -> Option<V> {
        self.committed.write().remove(&key)
    }

    pub fn get_committed(&self, key: i64) -> Option<V> {
        self.committed.read().get(&key).cloned()
    }

    pub fn largest_key(&self) -> Option<i64> {
        self.committed.read().keys().next_back().copied()
    }

    pub fn len(&self) -> usize {
        self.committed.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.committed.read().is_empty()
    }

    fn release_if_unwritten(&self, txn: &mut StoreTransaction<V>, key: i64) {
        if !txn.write_state.contains_key(&key) && txn.locked.remove(&key) {
            self.locks.unlock_all(std::iter::once(key));
        }
    }
}

/// Snapshot key cursor.
#[derive(Debug)]
pub struct KeyEnumerator {
    keys: Vec<i64>,
    position: usize,
}

impl Iterator for KeyEnumerator {
    type Item = i64;

    fn next(&mut self) -> Option<i64> {
        let key = self.keys.get(self.position).copied()?;
        self.position += 1;
        Some(key)
    }
}
