use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::protocol::error::ErrorKind;
use crate::protocol::messages::{PollRequestEntry, PreviousResolve};
use crate::types::{AddressDetectionFailure, Cuid, PartitionKey, Rsp, RspVersion, ServiceName};

/// Identifies one callback registration.
pub type HandlerId = u64;

/// Update delivered to a registered address-change callback.
#[derive(Debug, Clone)]
pub enum AddressUpdate {
    Resolved(Arc<Rsp>),
    Failed(AddressDetectionFailure),
}

pub type AddressChangeHandler = Arc<dyn Fn(HandlerId, AddressUpdate) + Send + Sync>;

#[derive(Default)]
struct TrackerState {
    /// `None` marks a registration that was removed while a delivery was
    /// in flight; the worker skips it.
    callbacks: HashMap<HandlerId, Option<AddressChangeHandler>>,
    previous_resolves: HashMap<Cuid, RspVersion>,
    previous_error: Option<ErrorKind>,
    queue: VecDeque<AddressUpdate>,
    worker_running: bool,
}

/// The union of all application callbacks for one (name, partition key)
/// pair, with the version history needed to suppress duplicates.
pub struct AddressTracker {
    name: ServiceName,
    key: PartitionKey,
    state: Mutex<TrackerState>,
    cancelled: AtomicBool,
}

impl std::fmt::Debug for AddressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressTracker")
            .field("name", &self.name)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl AddressTracker {
    pub(crate) fn new(name: ServiceName, key: PartitionKey) -> Self {
        Self {
            name,
            key,
            state: Mutex::new(TrackerState::default()),
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &ServiceName {
        &self.name
    }

    pub fn key(&self) -> &PartitionKey {
        &self.key
    }

    pub(crate) fn add_callback(&self, handler_id: HandlerId, handler: AddressChangeHandler) {
        self.state.lock().callbacks.insert(handler_id, Some(handler));
    }

    /// Returns the number of live registrations left.
    pub(crate) fn remove_callback(&self, handler_id: HandlerId) -> usize {
        let mut state = self.state.lock();
        // empty the slot first so an in-flight delivery skips it
        if let Some(slot) = state.callbacks.get_mut(&handler_id) {
            *slot = None;
        }
        state.callbacks.remove(&handler_id);
        state.callbacks.values().filter(|slot| slot.is_some()).count()
    }

    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Record an incoming RSP; returns true when it is more recent than
    /// anything this tracker has delivered for the CUID.
    fn observe_rsp(&self, rsp: &Arc<Rsp>) -> bool {
        let mut state = self.state.lock();
        match state.previous_resolves.get(&rsp.cuid) {
            Some(previous) if rsp.version <= *previous => false,
            _ => {
                state.previous_resolves.insert(rsp.cuid, rsp.version);
                state.previous_error = None;
                true
            }
        }
    }

    /// Record an incoming failure; repeats of the same error kind are
    /// duplicates.
    fn observe_failure(&self, failure: &AddressDetectionFailure) -> bool {
        let mut state = self.state.lock();
        if state.previous_error == Some(failure.kind) {
            return false;
        }
        state.previous_error = Some(failure.kind);
        true
    }

    /// Enqueue an update for callback delivery if it is news to this
    /// tracker. Delivery happens on a single worker per tracker; when one
    /// is already draining, the update just joins its queue.
    pub(crate) fn post(self: &Arc<Self>, update: AddressUpdate) {
        if self.cancelled.load(Ordering::SeqCst) {
            return;
        }

        let is_news = match &update {
            AddressUpdate::Resolved(rsp) => self.observe_rsp(rsp),
            AddressUpdate::Failed(failure) => self.observe_failure(failure),
        };
        if !is_news {
            debug!(name=%self.name, "discarding duplicate address update");
            return;
        }

        let spawn_worker = {
            let mut state = self.state.lock();
            state.queue.push_back(update);
            if state.worker_running {
                false
            } else {
                state.worker_running = true;
                true
            }
        };

        if spawn_worker {
            let tracker = Arc::clone(self);
            tokio::spawn(async move { tracker.drain() });
        }
    }

    /// Deliver queued updates outside the tracker lock until the queue is
    /// empty.
    fn drain(&self) {
        loop {
            let (update, callbacks) = {
                let mut state = self.state.lock();
                match state.queue.pop_front() {
                    Some(update) => {
                        let callbacks: Vec<(HandlerId, AddressChangeHandler)> = state
                            .callbacks
                            .iter()
                            .filter_map(|(id, slot)| {
                                slot.as_ref().map(|handler| (*id, Arc::clone(handler)))
                            })
                            .collect();
                        (update, callbacks)
                    }
                    None => {
                        state.worker_running = false;
                        return;
                    }
                }
            };

            if self.cancelled.load(Ordering::SeqCst) {
                let mut state = self.state.lock();
                state.queue.clear();
                state.worker_running = false;
                return;
            }

            for (handler_id, handler) in callbacks {
                handler(handler_id, update.clone());
            }
        }
    }

    /// Build this tracker's entry of the next location-change poll.
    pub(crate) fn poll_entry(&self) -> PollRequestEntry {
        let state = self.state.lock();
        PollRequestEntry {
            name: self.name.as_str().to_owned(),
            key: self.key.clone(),
            previous_resolves: state
                .previous_resolves
                .iter()
                .map(|(cuid, version)| PreviousResolve {
                    cuid: *cuid,
                    version: *version,
                })
                .collect(),
            previous_error: state.previous_error,
        }
    }
}
