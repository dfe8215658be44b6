use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::cache::gate::FetchGate;
use crate::cache::lru::LruCache;
use crate::cache::resolution::{PreviousRsp, RspEntry};
use crate::protocol::error::ErrorKind;
use crate::protocol::messages::ResolveServiceRequest;
use crate::settings::Settings;
use crate::transport::Gateway;
use crate::types::{PartitionKey, Psd, Rsp, ServiceName};

/// One prefix entry: the descriptor of a registered prefix plus resolved
/// slots, installed together from prefix-resolution replies.
#[derive(Debug)]
struct PrefixEntry {
    psd: Arc<Psd>,
    slots: Mutex<HashMap<usize, Arc<FetchGate<Arc<RspEntry>>>>>,
}

/// Longest-prefix wrapper over the resolution machinery.
///
/// Keys are the service-name prefixes the naming service reports back; a
/// lookup walks the request name's ancestor chain. Replies always carry
/// the authoritative descriptor, which doubles as a consistency check
/// against the cached one.
#[derive(Debug)]
pub struct PrefixResolutionCache {
    gateway: Arc<dyn Gateway>,
    entries: LruCache<ServiceName, Arc<PrefixEntry>>,
}

impl PrefixResolutionCache {
    pub fn new(gateway: Arc<dyn Gateway>, settings: &Settings) -> Self {
        Self {
            gateway,
            entries: LruCache::new(
                settings.partition_location_cache_limit,
                settings.partition_location_cache_bucket_count,
            ),
        }
    }

    /// Resolve `key` under the longest registered prefix of `name`.
    pub async fn prefix_resolve(
        &self,
        name: &ServiceName,
        key: &PartitionKey,
        previous: Option<PreviousRsp>,
        bypass_cache: bool,
        timeout: Duration,
    ) -> Result<Arc<Rsp>, ErrorKind> {
        let deadline = Instant::now() + timeout;
        let base = name.without_member();

        let mut previous = previous;
        let mut bypass = bypass_cache;

        loop {
            if Instant::now() >= deadline {
                return Err(ErrorKind::Timeout);
            }

            let hit = if bypass { None } else { self.lookup_prefix(&base) };
            let (prefix_name, entry) = match hit {
                Some(hit) => hit,
                None => {
                    bypass = false;
                    let reply = self
                        .gateway
                        .prefix_resolve(ResolveServiceRequest {
                            name: base.as_str().to_owned(),
                            key: key.clone(),
                            previous_version: None,
                            include_psd: true,
                        })
                        .await?;

                    let prefix_name: ServiceName = reply
                        .rsp
                        .service_name
                        .clone();
                    let entry = self.install(&prefix_name, reply.psd, reply.rsp);
                    (prefix_name, entry)
                }
            };

            let index = entry.psd.partition_index(key)?;
            let slot = {
                let mut slots = entry.slots.lock();
                Arc::clone(slots.entry(index).or_default())
            };

            let rsp_entry = match slot.begin_try_get(remaining(deadline)?).await {
                Ok(crate::cache::gate::TryGet::Ready(rsp_entry)) => rsp_entry,
                Ok(crate::cache::gate::TryGet::First(permit)) => {
                    let reply = match self
                        .gateway
                        .prefix_resolve(ResolveServiceRequest {
                            name: base.as_str().to_owned(),
                            key: key.clone(),
                            previous_version: None,
                            include_psd: true,
                        })
                        .await
                    {
                        Ok(reply) => reply,
                        Err(kind) => {
                            if kind.is_invalid_service() {
                                permit.fail(kind);
                                self.entries.try_remove(&prefix_name);
                            } else if kind.is_invalid_partition() {
                                permit.fail(kind);
                            } else {
                                permit.fail(ErrorKind::OperationCanceled);
                            }
                            return Err(kind);
                        }
                    };

                    // The naming service moved on to a different descriptor:
                    // drop the prefix entry and start over.
                    if reply.psd.version != entry.psd.version
                        || reply.rsp.service_name != prefix_name
                    {
                        debug!(
                            prefix=%prefix_name,
                            cached_version=entry.psd.version,
                            reply_version=reply.psd.version,
                            "prefix descriptor changed, restarting",
                        );
                        permit.fail(ErrorKind::OperationCanceled);
                        self.entries.try_remove(&prefix_name);
                        continue;
                    }

                    permit.complete(
                        Arc::new(RspEntry::new(Arc::new(reply.rsp))),
                        |existing, incoming| incoming.rsp.version > existing.rsp.version,
                    )
                }
                Err(ErrorKind::OperationCanceled) if Instant::now() < deadline => continue,
                Err(kind) => return Err(kind),
            };

            if let Some(prev) = previous.take() {
                if rsp_entry.rsp.version <= prev {
                    slot.invalidate();
                    continue;
                }
            }

            if rsp_entry.rsp.is_service_group {
                return match name.member() {
                    Some(fragment) => rsp_entry.member(fragment),
                    None => Err(ErrorKind::AccessDenied),
                };
            }
            return Ok(Arc::clone(&rsp_entry.rsp));
        }
    }

    /// Walk the ancestor chain looking for a cached prefix.
    fn lookup_prefix(&self, base: &ServiceName) -> Option<(ServiceName, Arc<PrefixEntry>)> {
        let mut candidate = Some(base.clone());
        while let Some(name) = candidate {
            if let Some(entry) = self.entries.try_get(&name) {
                return Some((name, entry));
            }
            candidate = name.parent();
        }
        None
    }

    fn install(&self, prefix_name: &ServiceName, psd: Psd, rsp: Rsp) -> Arc<PrefixEntry> {
        // Replace an out-of-date entry wholesale; descriptors never roll
        // back.
        self.entries
            .try_invalidate(prefix_name, |entry| entry.psd.version < psd.version);

        let (entry, _) = self.entries.try_put_or_get(prefix_name, || {
            Arc::new(PrefixEntry {
                psd: Arc::new(psd),
                slots: Mutex::new(HashMap::new()),
            })
        });

        if let Some(index) = entry.psd.partitions.iter().position(|p| p.cuid == rsp.cuid) {
            let slot = {
                let mut slots = entry.slots.lock();
                Arc::clone(slots.entry(index).or_default())
            };
            slot.complete(
                Arc::new(RspEntry::new(Arc::new(rsp))),
                |existing, incoming| incoming.rsp.version > existing.rsp.version,
            );
        }

        entry
    }

    /// Drop the cached entry for a prefix.
    pub fn invalidate(&self, prefix_name: &ServiceName) {
        self.entries.try_remove(&prefix_name.without_member());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn remaining(deadline: Instant) -> Result<Duration, ErrorKind> {
    deadline
        .checked_duration_since(Instant::now())
        .filter(|d| !d.is_zero())
        .ok_or(ErrorKind::Timeout)
}
