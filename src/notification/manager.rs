use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use futures::future::join_all;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::cache::{CacheUpdate, ResolutionCache};
use crate::notification::tracker::{AddressChangeHandler, AddressTracker, AddressUpdate, HandlerId};
use crate::protocol::error::ErrorKind;
use crate::protocol::messages::{LocationChangePollReply, LocationChangePollRequest, PollRequestEntry};
use crate::settings::Settings;
use crate::transport::Gateway;
use crate::types::{PartitionInfo, PartitionKey, Rsp, ServiceName};

type TrackerKey = (ServiceName, PartitionKey);

#[derive(Default)]
struct ManagerState {
    trackers: HashMap<TrackerKey, Arc<AddressTracker>>,
    by_handler: HashMap<HandlerId, TrackerKey>,
    next_handler_id: HandlerId,
    /// Where the next poll resumes after a gateway ran out of room.
    resume_index: usize,
}

/// Holds every address tracker and turns cache updates plus gateway polls
/// into per-registration callbacks.
pub struct TrackerManager {
    gateway: Arc<dyn Gateway>,
    settings: Arc<Settings>,
    cache: Arc<ResolutionCache>,
    state: Mutex<ManagerState>,
    poll_wakeup: tokio::sync::Notify,
    cancelled: AtomicBool,
}

impl std::fmt::Debug for TrackerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackerManager").finish_non_exhaustive()
    }
}

impl TrackerManager {
    pub fn new(
        gateway: Arc<dyn Gateway>,
        settings: Arc<Settings>,
        cache: Arc<ResolutionCache>,
    ) -> Arc<Self> {
        Arc::new(Self {
            gateway,
            settings,
            cache,
            state: Mutex::new(ManagerState::default()),
            poll_wakeup: tokio::sync::Notify::new(),
            cancelled: AtomicBool::new(false),
        })
    }

    /// Register a callback for address changes of `(name, key)`. The
    /// tracker is created on first registration and hooked into the
    /// resolution cache's update stream.
    pub fn add_tracker(
        self: &Arc<Self>,
        name: &ServiceName,
        key: PartitionKey,
        handler: AddressChangeHandler,
    ) -> HandlerId {
        let base = name.without_member();
        let tracker_key = (base.clone(), key.clone());

        let (handler_id, is_new_name) = {
            let mut state = self.state.lock();
            state.next_handler_id += 1;
            let handler_id = state.next_handler_id;

            let is_new_name = !state.trackers.keys().any(|(n, _)| *n == base);
            let tracker = Arc::clone(
                state
                    .trackers
                    .entry(tracker_key.clone())
                    .or_insert_with(|| Arc::new(AddressTracker::new(base.clone(), key))),
            );
            tracker.add_callback(handler_id, handler);
            state.by_handler.insert(handler_id, tracker_key);
            (handler_id, is_new_name)
        };

        if is_new_name {
            // trackers hold the manager only weakly; the cache callback
            // must not keep it alive
            let weak: Weak<Self> = Arc::downgrade(self);
            self.cache.register_rsp_update_callback(
                &base,
                Arc::new(move |_, update| {
                    if let Some(manager) = weak.upgrade() {
                        manager.cache_updated(update);
                    }
                }),
            );
        }

        self.poll_wakeup.notify_one();
        handler_id
    }

    /// Remove a registration; the tracker disappears with its last one.
    pub fn remove_tracker(&self, handler_id: HandlerId) {
        let mut state = self.state.lock();
        let Some(tracker_key) = state.by_handler.remove(&handler_id) else {
            debug!(handler_id, "remove of unknown tracker registration");
            return;
        };

        let remaining = state
            .trackers
            .get(&tracker_key)
            .map(|tracker| tracker.remove_callback(handler_id))
            .unwrap_or(0);

        if remaining == 0 {
            state.trackers.remove(&tracker_key);
            let name = tracker_key.0;
            if !state.trackers.keys().any(|(n, _)| *n == name) {
                self.cache.release_rsp_update_callback(&name);
            }
        }
    }

    /// Forward a cache update to every matching tracker.
    pub fn cache_updated(&self, update: CacheUpdate) {
        match update {
            CacheUpdate::Rsp(rsp) => {
                for tracker in self.matching_trackers(&rsp) {
                    tracker.post(AddressUpdate::Resolved(Arc::clone(&rsp)));
                }
            }
            CacheUpdate::Failure(failure) => {
                let trackers = {
                    let state = self.state.lock();
                    state
                        .trackers
                        .iter()
                        .filter(|((name, _), _)| name.as_str() == failure.service_name)
                        .map(|(_, tracker)| Arc::clone(tracker))
                        .collect::<Vec<_>>()
                };
                for tracker in trackers {
                    tracker.post(AddressUpdate::Failed(failure.clone()));
                }
            }
        }
    }

    fn matching_trackers(&self, rsp: &Arc<Rsp>) -> Vec<Arc<AddressTracker>> {
        let state = self.state.lock();
        state
            .trackers
            .iter()
            .filter(|((name, key), _)| *name == rsp.service_name && info_covers(&rsp.info, key))
            .map(|(_, tracker)| Arc::clone(tracker))
            .collect()
    }

    /// Run the poll loop until [`TrackerManager::cancel`]. At most one
    /// poll is in flight; a reply (or retryable failure) schedules the
    /// next immediately, anything else waits out the poll interval.
    pub fn start(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                if manager.cancelled.load(Ordering::SeqCst) {
                    return;
                }

                let outcome = manager.poll_once().await;

                match outcome {
                    PollOutcome::Idle => {
                        manager.poll_wakeup.notified().await;
                    }
                    PollOutcome::Again => {}
                    PollOutcome::Backoff => {
                        tokio::select! {
                            _ = tokio::time::sleep(manager.settings.service_change_poll_interval) => {}
                            _ = manager.poll_wakeup.notified() => {}
                        }
                    }
                }
            }
        });
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.poll_wakeup.notify_one();

        let state = self.state.lock();
        for tracker in state.trackers.values() {
            tracker.cancel();
        }
    }

    /// Build and send one poll round, split into size-bounded batches sent
    /// concurrently.
    pub async fn poll_once(&self) -> PollOutcome {
        let (entries, resume_index) = {
            let state = self.state.lock();
            let entries: Vec<PollRequestEntry> =
                state.trackers.values().map(|t| t.poll_entry()).collect();
            (entries, state.resume_index.min(state.trackers.len()))
        };

        if entries.is_empty() {
            return PollOutcome::Idle;
        }

        // resume from where the gateway stopped processing last time
        let mut ordered = entries;
        ordered.rotate_left(resume_index);

        let threshold = self.settings.message_content_threshold();
        let mut batches: Vec<Vec<PollRequestEntry>> = Vec::new();
        let mut batch_size = 0usize;
        for entry in ordered {
            let size = entry.estimated_size();
            if batches.is_empty() || batch_size + size > threshold {
                batches.push(Vec::new());
                batch_size = 0;
            }
            batch_size += size;
            batches
                .last_mut()
                .expect("batch was just pushed")
                .push(entry);
        }

        let batch_starts: Vec<usize> = batches
            .iter()
            .scan(0usize, |offset, batch| {
                let start = *offset;
                *offset += batch.len();
                Some(start)
            })
            .collect();

        let replies = join_all(batches.into_iter().map(|requests| {
            self.gateway
                .poll_service_locations(LocationChangePollRequest { requests })
        }))
        .await;

        let mut outcome = PollOutcome::Again;
        let mut min_unprocessed: Option<usize> = None;

        for (batch_index, reply) in replies.into_iter().enumerate() {
            match reply {
                Ok(reply) => {
                    if let Some(first) = reply.first_non_processed_request_index {
                        let absolute = batch_starts[batch_index] + first as usize;
                        min_unprocessed =
                            Some(min_unprocessed.map_or(absolute, |m| m.min(absolute)));
                    }
                    self.apply_poll_reply(reply);
                }
                Err(kind) if kind.is_retryable_transport() => {
                    debug!(error=%kind, "poll batch hit transport backpressure");
                }
                Err(kind) => {
                    warn!(error=%kind, "poll batch failed");
                    outcome = PollOutcome::Backoff;
                }
            }
        }

        {
            let mut state = self.state.lock();
            state.resume_index = min_unprocessed
                .map(|index| (resume_index + index) % state.trackers.len().max(1))
                .unwrap_or(0);
        }

        outcome
    }

    fn apply_poll_reply(&self, reply: LocationChangePollReply) {
        for rsp in reply.partitions {
            // updates flow through the cache, whose callback fans them out
            // to the trackers
            self.cache.install_rsp(Arc::new(rsp));
        }

        for failure in reply.failures {
            if let Ok(name) = failure.service_name.parse::<ServiceName>() {
                info!(service=%name, error=%failure.kind, "address detection failure");
                self.cache
                    .invalidate_on_error(&name, &PartitionKey::None, failure.kind);
            }
            self.cache_updated(CacheUpdate::Failure(failure));
        }
    }

    pub fn tracker_count(&self) -> usize {
        self.state.lock().trackers.len()
    }
}

/// What the poll loop should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing to poll for.
    Idle,
    /// Poll again immediately.
    Again,
    /// Wait out the poll interval first.
    Backoff,
}

fn info_covers(info: &PartitionInfo, key: &PartitionKey) -> bool {
    match (info, key) {
        (PartitionInfo::Singleton, PartitionKey::None) => true,
        (PartitionInfo::Int64Range { low, high }, PartitionKey::Int64(k)) => low <= k && k <= high,
        (PartitionInfo::Named(name), PartitionKey::Named(k)) => name == k,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_covers_matches_key_space() {
        assert!(info_covers(&PartitionInfo::Singleton, &PartitionKey::None));
        assert!(info_covers(
            &PartitionInfo::Int64Range { low: 0, high: 9 },
            &PartitionKey::Int64(9)
        ));
        assert!(!info_covers(
            &PartitionInfo::Int64Range { low: 0, high: 9 },
            &PartitionKey::Int64(10)
        ));
        assert!(info_covers(
            &PartitionInfo::Named("hot".to_owned()),
            &PartitionKey::Named("hot".to_owned())
        ));
        assert!(!info_covers(
            &PartitionInfo::Named("hot".to_owned()),
            &PartitionKey::None
        ));
    }
}
