use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::protocol::error::ErrorKind;
use crate::rcq::segment::SegmentQueue;
use crate::rcq::store::{OrderedStore, StoreTransaction, WriteOp};

const DEFAULT_START_SEGMENT_SIZE: usize = 64;
const DEFAULT_MAX_SEGMENT_SIZE: usize = 8192;

/// Which replication path an operation is applied on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyContext {
    /// Local commit on the primary.
    PrimaryCommit,
    /// Redo on an active secondary; operations arrive in arbitrary order.
    SecondaryRedo,
    /// Redo during log recovery.
    RecoveryRedo,
    /// Undo of false progress on a secondary.
    FalseProgressUndo,
}

/// One replicated queue operation.
///
/// `Remove` carries the removed value so a false-progress undo can
/// reinstate it.
#[derive(Debug, Clone)]
pub enum QueueOperation<V> {
    Add { key: i64, value: V },
    Remove { key: i64, value: V },
}

/// Transaction handle of the queue.
#[derive(Debug)]
pub struct QueueTransaction<V> {
    inner: StoreTransaction<V>,
}

impl<V> QueueTransaction<V> {
    pub fn id(&self) -> u64 {
        self.inner.id()
    }
}

/// Transactional FIFO state provider.
///
/// Persists exclusively through the ordered key store; the segment queue
/// is a replica-local accelerator that absorbs out-of-order applies on
/// secondaries. Keys are assigned on the primary from a monotonic counter
/// seeded with the largest stored key.
#[derive(Debug)]
pub struct ReliableConcurrentQueue<V> {
    store: OrderedStore<V>,
    segments: SegmentQueue,
    next_key: AtomicI64,
}

impl<V> Default for ReliableConcurrentQueue<V>
where
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> ReliableConcurrentQueue<V>
where
    V: Clone,
{
    pub fn new() -> Self {
        Self::with_segment_sizes(DEFAULT_START_SEGMENT_SIZE, DEFAULT_MAX_SEGMENT_SIZE)
    }

    pub fn with_segment_sizes(start_segment_size: usize, max_segment_size: usize) -> Self {
        Self {
            store: OrderedStore::new(),
            segments: SegmentQueue::new(start_segment_size, max_segment_size),
            next_key: AtomicI64::new(0),
        }
    }

    pub fn create_transaction(&self) -> QueueTransaction<V> {
        QueueTransaction {
            inner: self.store.create_transaction(),
        }
    }

    /// Append `value` under a fresh key.
    pub async fn enqueue(
        &self,
        txn: &mut QueueTransaction<V>,
        value: V,
        timeout: Duration,
    ) -> Result<(), ErrorKind> {
        let key = self.next_key.fetch_add(1, Ordering::SeqCst) + 1;
        self.store.add(&mut txn.inner, key, value, timeout).await
    }

    /// Remove and return the oldest visible value.
    ///
    /// Walks a snapshot of the key space in order; keys whose conditional
    /// remove is lost to a racing transaction are skipped.
    pub async fn try_dequeue(
        &self,
        txn: &mut QueueTransaction<V>,
        timeout: Duration,
    ) -> Result<Option<V>, ErrorKind> {
        let deadline = Instant::now() + timeout;

        let enumerator = self.store.create_key_enumerator(&txn.inner);
        for key in enumerator {
            if Instant::now() > deadline {
                return Err(ErrorKind::Timeout);
            }

            let Some(value) = self.store.conditional_get(&txn.inner, key) else {
                continue;
            };

            if self
                .store
                .conditional_remove(&mut txn.inner, key, Duration::ZERO)
                .await?
            {
                return Ok(Some(value));
            }
            // another transaction got the key first; advance
            debug!(key, "dequeue lost conditional remove, advancing");
        }

        Ok(None)
    }

    /// Commit the transaction and mirror its writes into the in-memory
    /// queue.
    pub fn commit(&self, txn: QueueTransaction<V>) {
        let writes = self.store.commit(txn.inner);
        for write in writes {
            match write {
                WriteOp::Add { key, .. } => {
                    self.observe_key(key);
                    self.segments.enqueue(key);
                }
                WriteOp::Remove { key } => {
                    // on the primary the key sits at the queue head
                    self.segments.remove(key);
                }
            }
        }
    }

    pub fn abort(&self, txn: QueueTransaction<V>) {
        self.store.abort(txn.inner);
    }

    /// Apply one already-replicated operation.
    pub fn apply(&self, context: ApplyContext, operation: QueueOperation<V>) {
        match context {
            ApplyContext::PrimaryCommit
            | ApplyContext::SecondaryRedo
            | ApplyContext::RecoveryRedo => match operation {
                QueueOperation::Add { key, value } => {
                    self.store.apply_add(key, value);
                    self.observe_key(key);
                    self.segments.enqueue(key);
                }
                QueueOperation::Remove { key, .. } => {
                    self.store.apply_remove(key);
                    // arbitrary-order applies leave gaps instead of
                    // dequeuing
                    self.segments.remove(key);
                }
            },
            ApplyContext::FalseProgressUndo => match operation {
                QueueOperation::Add { key, .. } => {
                    self.store.apply_remove(key);
                    self.segments.remove(key);
                }
                QueueOperation::Remove { key, value } => {
                    self.store.apply_add(key, value);
                    self.observe_key(key);
                    self.segments.enqueue(key);
                }
            },
        }
    }

    /// Re-seed the key counter from the store; called when this replica
    /// becomes the primary.
    pub fn change_role_to_primary(&self) {
        let largest = self.store.largest_key().unwrap_or(0);
        self.next_key.fetch_max(largest, Ordering::SeqCst);
    }

    fn observe_key(&self, key: i64) {
        self.next_key.fetch_max(key, Ordering::SeqCst);
    }

    /// Committed item count.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Segments currently linked in the in-memory queue.
    pub fn segment_count(&self) -> usize {
        self.segments.segment_count()
    }
}
