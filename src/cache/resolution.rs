use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::cache::gate::{FetchGate, TryGet};
use crate::cache::lru::LruCache;
use crate::protocol::error::ErrorKind;
use crate::protocol::messages::{GetServiceDescriptionRequest, ResolveServiceRequest};
use crate::settings::Settings;
use crate::transport::Gateway;
use crate::types::{
    AddressDetectionFailure, PartitionKey, Psd, Rsp, RspVersion, ServiceTableEntry, ServiceName,
};

/// Version metadata of a previously returned RSP, supplied by a caller
/// that wants a strictly newer resolution.
pub type PreviousRsp = RspVersion;

/// Update pushed to a registered per-name callback.
#[derive(Debug, Clone)]
pub enum CacheUpdate {
    Rsp(Arc<Rsp>),
    Failure(AddressDetectionFailure),
}

pub type RspUpdateCallback = Arc<dyn Fn(&ServiceName, CacheUpdate) + Send + Sync>;

/// A cached RSP plus its lazily parsed service-group member views.
#[derive(Debug)]
pub struct RspEntry {
    pub rsp: Arc<Rsp>,
    members: Mutex<HashMap<String, Arc<Rsp>>>,
}

impl RspEntry {
    pub(crate) fn new(rsp: Arc<Rsp>) -> Self {
        Self {
            rsp,
            members: Mutex::new(HashMap::new()),
        }
    }

    /// The member view for a service-group fragment, parsed on first use.
    pub fn member(&self, fragment: &str) -> Result<Arc<Rsp>, ErrorKind> {
        let mut members = self.members.lock();
        if let Some(member) = members.get(fragment) {
            return Ok(Arc::clone(member));
        }
        let member = Arc::new(self.rsp.member_rsp(fragment)?);
        members.insert(fragment.to_owned(), Arc::clone(&member));
        Ok(member)
    }
}

/// One cached service: the descriptor plus per-partition slots.
#[derive(Debug)]
pub(crate) struct CacheEntry {
    psd: FetchGate<Arc<Psd>>,
    slots: Mutex<HashMap<usize, Arc<FetchGate<Arc<RspEntry>>>>>,
}

impl CacheEntry {
    fn new() -> Self {
        Self {
            psd: FetchGate::new(),
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, index: usize) -> Arc<FetchGate<Arc<RspEntry>>> {
        let mut slots = self.slots.lock();
        Arc::clone(slots.entry(index).or_default())
    }

    /// Fail the descriptor gate and every slot gate.
    fn fail_all(&self, kind: ErrorKind) {
        self.psd.fail(kind);
        let slots = {
            let slots = self.slots.lock();
            slots.values().cloned().collect::<Vec<_>>()
        };
        for slot in slots {
            slot.fail(kind);
        }
    }
}

/// Replace policy for descriptor refreshes: equal or newer wins.
fn psd_newer(existing: &Arc<Psd>, incoming: &Arc<Psd>) -> bool {
    existing.version <= incoming.version
}

/// Replace policy for RSP refreshes: only strictly newer wins.
fn rsp_newer(existing: &Arc<RspEntry>, incoming: &Arc<RspEntry>) -> bool {
    incoming.rsp.version > existing.rsp.version
}

/// Client-side resolution cache.
///
/// Translates `(service name, partition key)` into a current RSP,
/// coordinating fetches with the naming service and absorbing version
/// changes pushed by notifications.
pub struct ResolutionCache {
    gateway: Arc<dyn Gateway>,
    entries: LruCache<ServiceName, Arc<CacheEntry>>,
    update_callbacks: Mutex<HashMap<ServiceName, RspUpdateCallback>>,
}

impl std::fmt::Debug for ResolutionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolutionCache")
            .field("entries", &self.entries.len())
            .finish_non_exhaustive()
    }
}

impl ResolutionCache {
    pub fn new(gateway: Arc<dyn Gateway>, settings: &Settings) -> Self {
        Self {
            gateway,
            entries: LruCache::new(
                settings.partition_location_cache_limit,
                settings.partition_location_cache_bucket_count,
            ),
            update_callbacks: Mutex::new(HashMap::new()),
        }
    }

    /// The service's partitioned descriptor, fetched on miss.
    pub async fn get_psd(&self, name: &ServiceName, timeout: Duration) -> Result<Arc<Psd>, ErrorKind> {
        let deadline = Instant::now() + timeout;
        let base = name.without_member();
        loop {
            let (entry, _) = self.entries.try_put_or_get(&base, || Arc::new(CacheEntry::new()));
            match self.get_psd_inner(&base, &entry, deadline).await {
                Ok(psd) => return Ok(psd),
                Err(ErrorKind::OperationCanceled) if Instant::now() < deadline => continue,
                Err(kind) => return Err(kind),
            }
        }
    }

    /// Resolve the current location of the partition covering `key`.
    pub async fn resolve(
        &self,
        name: &ServiceName,
        key: &PartitionKey,
        previous: Option<PreviousRsp>,
        timeout: Duration,
    ) -> Result<Arc<Rsp>, ErrorKind> {
        let deadline = Instant::now() + timeout;
        let base = name.without_member();

        let mut previous = previous;
        let mut psd_refreshed_for_previous = false;

        loop {
            if Instant::now() >= deadline {
                return Err(ErrorKind::Timeout);
            }

            let (entry, _) = self.entries.try_put_or_get(&base, || Arc::new(CacheEntry::new()));
            let psd = match self.get_psd_inner(&base, &entry, deadline).await {
                Ok(psd) => psd,
                Err(ErrorKind::OperationCanceled) if Instant::now() < deadline => continue,
                Err(kind) => return Err(kind),
            };

            // A caller-supplied store version that disagrees with the cached
            // descriptor forces one descriptor refresh.
            if let Some(prev) = previous {
                if prev.store_version != psd.version && !psd_refreshed_for_previous {
                    debug!(
                        service=%base,
                        cached_version=psd.version,
                        previous_version=prev.store_version,
                        "descriptor version mismatch, refreshing",
                    );
                    psd_refreshed_for_previous = true;
                    entry.psd.invalidate();
                    continue;
                }
            }

            let index = psd.partition_index(key)?;
            let slot = entry.slot(index);

            let rsp_entry = match slot.begin_try_get(remaining(deadline)?).await {
                Ok(TryGet::Ready(rsp_entry)) => rsp_entry,
                Ok(TryGet::First(permit)) => {
                    match self
                        .gateway
                        .resolve_service(ResolveServiceRequest {
                            name: base.as_str().to_owned(),
                            key: key.clone(),
                            // no descriptor expectation on this path
                            previous_version: None,
                            include_psd: false,
                        })
                        .await
                    {
                        Ok(reply) => permit
                            .complete(Arc::new(RspEntry::new(Arc::new(reply.rsp))), rsp_newer),
                        Err(kind) => {
                            return Err(self.fail_fetch(&base, &entry, permit, kind));
                        }
                    }
                }
                Err(ErrorKind::OperationCanceled) if Instant::now() < deadline => continue,
                Err(kind) => return Err(kind),
            };

            // A caller that has already seen an RSP gets one invalidation
            // round to obtain a strictly newer snapshot.
            if let Some(prev) = previous.take() {
                if rsp_entry.rsp.version <= prev {
                    debug!(
                        service=%base,
                        "cached RSP not newer than caller's, invalidating slot",
                    );
                    slot.invalidate();
                    continue;
                }
            }

            return finish_resolve(name, &rsp_entry);
        }
    }

    async fn get_psd_inner(
        &self,
        base: &ServiceName,
        entry: &Arc<CacheEntry>,
        deadline: Instant,
    ) -> Result<Arc<Psd>, ErrorKind> {
        match entry.psd.begin_try_get(remaining(deadline)?).await? {
            TryGet::Ready(psd) => Ok(psd),
            TryGet::First(permit) => {
                match self
                    .gateway
                    .get_service_description(GetServiceDescriptionRequest {
                        name: base.as_str().to_owned(),
                    })
                    .await
                {
                    Ok(reply) => Ok(permit.complete(Arc::new(reply.psd), psd_newer)),
                    Err(kind) => Err(self.fail_fetch(base, entry, permit, kind)),
                }
            }
        }
    }

    /// Apply the error policy for a failed fetch and return the error to
    /// surface to the fetching caller.
    fn fail_fetch<T: Clone>(
        &self,
        base: &ServiceName,
        entry: &Arc<CacheEntry>,
        permit: crate::cache::gate::FetchPermit<'_, T>,
        kind: ErrorKind,
    ) -> ErrorKind {
        if kind.is_invalid_service() {
            info!(service=%base, error=%kind, "evicting service entry");
            permit.fail(kind);
            entry.fail_all(kind);
            self.entries.try_remove(base);
        } else if kind.is_invalid_partition() {
            permit.fail(kind);
        } else {
            // waiters retry, cache state stays
            permit.fail(ErrorKind::OperationCanceled);
        }
        kind
    }

    /// Install an accepted notification entry.
    ///
    /// An empty entry with no cached descriptor means the partition was
    /// already deleted from this client's point of view; the cache is left
    /// untouched.
    pub fn update_from_notification(
        &self,
        ste: &ServiceTableEntry,
        psd: Option<&Psd>,
    ) -> Result<(), ErrorKind> {
        let name: ServiceName = ste.service_name.parse()?;
        let base = name.without_member();

        if ste.is_empty() && psd.is_none() {
            let cached = self
                .entries
                .try_get(&base)
                .and_then(|entry| entry.psd.peek());
            if cached.is_none() {
                debug!(service=%base, cuid=%ste.cuid, "empty entry for unknown service, ignoring");
                return Ok(());
            }
        }

        let (entry, _) = self.entries.try_put_or_get(&base, || Arc::new(CacheEntry::new()));
        let resident_psd = match psd {
            Some(psd) => Some(entry.psd.complete(Arc::new(psd.clone()), psd_newer)),
            None => entry.psd.peek(),
        };

        let store_version = resident_psd.as_ref().map(|p| p.version).unwrap_or(0);
        let rsp = Arc::new(ste.to_rsp(base.clone(), store_version));

        if let Some(psd) = &resident_psd {
            if let Some(index) = psd.partitions.iter().position(|p| p.cuid == ste.cuid) {
                let slot = entry.slot(index);
                slot.complete(Arc::new(RspEntry::new(Arc::clone(&rsp))), rsp_newer);
            }
        }

        self.notify_update(&base, CacheUpdate::Rsp(rsp));
        Ok(())
    }

    /// Install an RSP obtained out of band (location-change polls), then
    /// fan it out through the registered update callback.
    pub fn install_rsp(&self, rsp: Arc<Rsp>) {
        let base = rsp.service_name.without_member();
        let (entry, _) = self.entries.try_put_or_get(&base, || Arc::new(CacheEntry::new()));

        if let Some(psd) = entry.psd.peek() {
            if let Some(index) = psd.partitions.iter().position(|p| p.cuid == rsp.cuid) {
                let slot = entry.slot(index);
                slot.complete(Arc::new(RspEntry::new(Arc::clone(&rsp))), rsp_newer);
            }
        }

        self.notify_update(&base, CacheUpdate::Rsp(rsp));
    }

    /// Drop the whole entry for a service.
    pub fn invalidate(&self, name: &ServiceName) {
        self.entries.try_remove(&name.without_member());
    }

    /// Apply the error policy for an externally observed error.
    pub fn invalidate_on_error(&self, name: &ServiceName, key: &PartitionKey, kind: ErrorKind) {
        let base = name.without_member();
        if kind.is_invalid_service() {
            if let Some(entry) = self.entries.try_remove(&base) {
                info!(service=%base, error=%kind, "evicting service entry");
                entry.fail_all(kind);
            }
        } else if kind.is_invalid_partition() {
            if let Some(entry) = self.entries.try_get(&base) {
                if let Some(psd) = entry.psd.get() {
                    if let Ok(index) = psd.partition_index(key) {
                        let slot = entry.slots.lock().remove(&index);
                        if let Some(slot) = slot {
                            slot.fail(kind);
                        }
                    }
                }
            }
        }
    }

    pub fn register_rsp_update_callback(&self, name: &ServiceName, callback: RspUpdateCallback) {
        self.update_callbacks
            .lock()
            .insert(name.without_member(), callback);
    }

    pub fn release_rsp_update_callback(&self, name: &ServiceName) {
        self.update_callbacks.lock().remove(&name.without_member());
    }

    pub(crate) fn notify_update(&self, base: &ServiceName, update: CacheUpdate) {
        let callback = self.update_callbacks.lock().get(base).cloned();
        if let Some(callback) = callback {
            callback(base, update);
        }
    }

    /// Number of cached service entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Decorate the resolved entry for the caller: service-group RSPs are
/// narrowed to the requested member and never returned bare.
fn finish_resolve(name: &ServiceName, rsp_entry: &Arc<RspEntry>) -> Result<Arc<Rsp>, ErrorKind> {
    if rsp_entry.rsp.is_service_group {
        return match name.member() {
            Some(fragment) => rsp_entry.member(fragment),
            None => Err(ErrorKind::AccessDenied),
        };
    }
    Ok(Arc::clone(&rsp_entry.rsp))
}

fn remaining(deadline: Instant) -> Result<Duration, ErrorKind> {
    deadline
        .checked_duration_since(Instant::now())
        .filter(|d| !d.is_zero())
        .ok_or(ErrorKind::Timeout)
}
