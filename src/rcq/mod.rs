//! Reliable concurrent queue state provider.
//!
//! A transactional FIFO persisted through an ordered key store
//! ([`store::OrderedStore`]) and accelerated by a lock-free linked list of
//! ring segments ([`segment::SegmentQueue`]). Primaries assign strictly
//! increasing keys; secondaries apply operations in whatever order the
//! replicator delivers them and converge through the ordered key space.

mod queue;
mod segment;
mod store;

pub use queue::{ApplyContext, QueueOperation, QueueTransaction, ReliableConcurrentQueue};
pub use segment::SegmentQueue;
pub use store::{KeyEnumerator, OrderedStore, StoreTransaction};
