use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::cache::ResolutionCache;
use crate::notification::undeleted::UndeletedIndex;
use crate::protocol::error::ErrorKind;
use crate::protocol::messages::{
    NotificationConnectRequest, NotificationFilter, NotificationFilterSpec, NotificationSyncRequest,
    ServiceNotificationPage, VersionedCuid,
};
use crate::settings::Settings;
use crate::transport::{Gateway, GatewayAddress};
use crate::types::{ReplicaSet, ServiceTableEntry, VersionRangeCollection};

/// Rough serialized size of one undeleted (version, CUID) pair, used to
/// page synchronization requests.
const UNDELETED_ENTRY_SIZE: usize = 24;

/// One notification as handed to the application.
#[derive(Debug, Clone)]
pub struct DeliveredNotification {
    pub entry: ServiceTableEntry,
    pub matched_primary_only: bool,
    /// Synthesized during reconnect synchronization rather than pushed by
    /// a gateway.
    pub is_synthetic: bool,
}

pub type NotificationHandler = Arc<dyn Fn(DeliveredNotification) + Send + Sync>;

#[derive(Debug)]
struct Inner {
    generation: i64,
    versions: VersionRangeCollection,
    filters: HashMap<u64, NotificationFilterSpec>,
    next_filter_id: u64,
    undeleted: UndeletedIndex,
    is_synchronized: bool,
    pending: Vec<ServiceNotificationPage>,
    target_gateway: Option<GatewayAddress>,
    /// Bumped whenever the target gateway changes; an in-flight
    /// synchronization that observes a bump abandons itself.
    sync_epoch: u64,
}

/// Client half of the notification session protocol.
///
/// Gateways trim tombstoned partition entries beyond the last N versions,
/// so a client reconnecting after a long gap must discover which deletions
/// it missed. The client keeps the set of delivered versions and an index
/// of still-live partitions; on reconnect the gateway checks that index
/// and the client synthesizes empty notifications for whatever fell out.
pub struct NotificationClient {
    gateway: Arc<dyn Gateway>,
    settings: Arc<Settings>,
    cache: Arc<ResolutionCache>,
    client_id: Arc<str>,
    handler: NotificationHandler,
    inner: Mutex<Inner>,
    /// Serializes synchronization runs.
    sync_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for NotificationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationClient")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

impl NotificationClient {
    pub fn new(
        gateway: Arc<dyn Gateway>,
        settings: Arc<Settings>,
        cache: Arc<ResolutionCache>,
        client_id: Arc<str>,
        handler: NotificationHandler,
    ) -> Self {
        Self {
            gateway,
            settings,
            cache,
            client_id,
            handler,
            inner: Mutex::new(Inner {
                generation: 0,
                versions: VersionRangeCollection::new(),
                filters: HashMap::new(),
                next_filter_id: 0,
                undeleted: UndeletedIndex::new(),
                is_synchronized: false,
                pending: Vec::new(),
                target_gateway: None,
                sync_epoch: 0,
            }),
            sync_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// The connection manager reports a (re)connect. Cancels any in-flight
    /// synchronization against the previous gateway and synchronizes with
    /// the new one when filters are registered.
    pub async fn on_gateway_connected(&self, gateway: GatewayAddress) -> Result<(), ErrorKind> {
        let has_filters = {
            let mut inner = self.inner.lock();
            info!(gateway=%gateway, "notification target gateway changed");
            inner.target_gateway = Some(gateway);
            inner.sync_epoch += 1;
            inner.is_synchronized = false;
            !inner.filters.is_empty()
        };

        if has_filters {
            self.synchronize().await?;
        }
        Ok(())
    }

    /// The connection manager reports a disconnect.
    pub fn on_gateway_disconnected(&self) {
        let mut inner = self.inner.lock();
        inner.target_gateway = None;
        inner.sync_epoch += 1;
        inner.is_synchronized = false;
    }

    /// Register a notification filter. The first registration after a
    /// reconnect drives the synchronization protocol.
    pub async fn register_filter(&self, spec: NotificationFilterSpec) -> Result<u64, ErrorKind> {
        let (filter_id, needs_sync) = {
            let mut inner = self.inner.lock();
            inner.next_filter_id += 1;
            let filter_id = inner.next_filter_id;
            inner.filters.insert(filter_id, spec);
            (filter_id, inner.target_gateway.is_some())
        };

        if needs_sync {
            match self.synchronize().await {
                Ok(()) => {}
                // duplicate registration counts as success
                Err(ErrorKind::ServiceNotificationFilterAlreadyExists) => {}
                Err(kind) => return Err(kind),
            }
        }
        Ok(filter_id)
    }

    /// Unregister a filter; unknown ids count as success.
    pub fn unregister_filter(&self, filter_id: u64) -> Result<(), ErrorKind> {
        let mut inner = self.inner.lock();
        if inner.filters.remove(&filter_id).is_none() {
            debug!(filter_id, "unregister of unknown filter");
        }
        Ok(())
    }

    /// Entry point for gateway-pushed notification pages. While the client
    /// is not synchronized, pages are buffered and drained after the
    /// protocol finishes.
    pub fn process_notification_page(&self, page: ServiceNotificationPage) -> Result<(), ErrorKind> {
        let deliveries = {
            let mut inner = self.inner.lock();
            if !inner.is_synchronized {
                debug!(
                    notification_id=%page.page_id.notification_id,
                    "buffering notification until synchronized",
                );
                inner.pending.push(page);
                return Ok(());
            }
            inner.accept(&page)
        };

        self.deliver(deliveries);
        Ok(())
    }

    /// Run the connect / synchronize handshake against the current target
    /// gateway.
    async fn synchronize(&self) -> Result<(), ErrorKind> {
        let _guard = self.sync_lock.lock().await;

        let (epoch, request) = {
            let inner = self.inner.lock();
            if inner.is_synchronized {
                return Ok(());
            }
            if inner.target_gateway.is_none() {
                return Err(ErrorKind::GatewayUnreachable);
            }
            let request = NotificationConnectRequest {
                client_id: self.client_id.to_string(),
                generation: inner.generation,
                versions: inner.versions.clone(),
                filters: inner
                    .filters
                    .iter()
                    .map(|(filter_id, spec)| NotificationFilter {
                        filter_id: *filter_id,
                        spec: spec.clone(),
                    })
                    .collect(),
            };
            (inner.sync_epoch, request)
        };

        let reply = tokio::time::timeout(
            self.settings.notification_gateway_connection_timeout,
            self.gateway.notification_connect(request),
        )
        .await
        .map_err(|_| ErrorKind::Timeout)??;

        self.check_epoch(epoch)?;

        // A different gateway cache generation invalidates everything we
        // know; adopt it and start over.
        let needs_paging = {
            let mut inner = self.inner.lock();
            if reply.cache_generation != inner.generation {
                info!(
                    old_generation = inner.generation,
                    new_generation = reply.cache_generation,
                    gateway=%reply.actual_gateway,
                    "gateway generation changed, resetting notification state",
                );
                inner.generation = reply.cache_generation;
                inner.versions.clear();
                inner.undeleted.clear();
                false
            } else {
                !inner
                    .versions
                    .contains(reply.last_deleted_empty_partition_version)
                    && reply.last_deleted_empty_partition_version > 0
            }
        };

        if needs_paging {
            self.synchronize_deletions(epoch, reply.last_deleted_empty_partition_version)
                .await?;
        }

        let buffered = {
            let mut inner = self.inner.lock();
            inner.is_synchronized = true;
            std::mem::take(&mut inner.pending)
        };

        let mut deliveries = Vec::new();
        {
            let mut inner = self.inner.lock();
            for page in &buffered {
                deliveries.extend(inner.accept(page));
            }
        }
        self.deliver(deliveries);

        Ok(())
    }

    /// Page the undeleted index through the gateway and synthesize empty
    /// notifications for versions it no longer remembers.
    async fn synchronize_deletions(&self, epoch: u64, last_deleted: i64) -> Result<(), ErrorKind> {
        let pages = {
            let inner = self.inner.lock();
            let per_page =
                (self.settings.message_content_threshold() / UNDELETED_ENTRY_SIZE).max(1);

            let mut pages: Vec<Vec<VersionedCuid>> = Vec::new();
            for (version, partition) in inner.undeleted.entries_up_to(last_deleted) {
                if pages.last().map(|p| p.len() >= per_page).unwrap_or(true) {
                    pages.push(Vec::new());
                }
                pages
                    .last_mut()
                    .expect("page was just pushed")
                    .push(VersionedCuid {
                        version,
                        cuid: partition.cuid,
                    });
            }
            pages
        };

        debug!(pages = pages.len(), "synchronizing undeleted partitions");

        for page in pages {
            let request = {
                let inner = self.inner.lock();
                NotificationSyncRequest {
                    client_id: self.client_id.to_string(),
                    generation: inner.generation,
                    undeleted_partitions: page,
                }
            };

            let reply = tokio::time::timeout(
                self.settings.notification_gateway_connection_timeout,
                self.gateway.notification_synchronize(request),
            )
            .await
            .map_err(|_| ErrorKind::Timeout)??;

            self.check_epoch(epoch)?;

            let deliveries = {
                let mut inner = self.inner.lock();
                let mut deliveries = Vec::new();
                for version in reply.deleted_versions {
                    let Some(partition) = inner.undeleted.get_by_version(version).cloned() else {
                        warn!(version, "gateway reported an unknown deleted version");
                        continue;
                    };
                    let entry = ServiceTableEntry {
                        cuid: partition.cuid,
                        service_name: partition.service_name,
                        version,
                        generation: crate::types::Generation(0, 0),
                        info: crate::types::PartitionInfo::Singleton,
                        is_service_group: false,
                        replicas: ReplicaSet::default(),
                    };
                    inner.undeleted.remove_version(version);
                    inner.versions.add(version);
                    deliveries.push(DeliveredNotification {
                        entry,
                        matched_primary_only: false,
                        is_synthetic: true,
                    });
                }
                deliveries
            };

            self.deliver(deliveries);
        }

        Ok(())
    }

    fn check_epoch(&self, epoch: u64) -> Result<(), ErrorKind> {
        let inner = self.inner.lock();
        if inner.sync_epoch != epoch {
            debug!("target gateway changed mid-synchronization");
            return Err(ErrorKind::OperationCanceled);
        }
        Ok(())
    }

    /// Push accepted entries into the resolution cache and the handler.
    fn deliver(&self, deliveries: Vec<DeliveredNotification>) {
        for delivery in deliveries {
            if let Err(kind) = self.cache.update_from_notification(&delivery.entry, None) {
                warn!(
                    service=%delivery.entry.service_name,
                    error=%kind,
                    "failed to apply notification to resolution cache",
                );
            }

            if delivery.entry.is_empty() {
                (self.handler)(delivery);
                continue;
            }

            // Service-group entries fan out to one notification per member.
            match expand_service_group(&delivery.entry) {
                Some(members) => {
                    for entry in members {
                        (self.handler)(DeliveredNotification {
                            entry,
                            matched_primary_only: delivery.matched_primary_only,
                            is_synthetic: delivery.is_synthetic,
                        });
                    }
                }
                None => (self.handler)(delivery),
            }
        }
    }

    pub fn generation(&self) -> i64 {
        self.inner.lock().generation
    }

    pub fn is_synchronized(&self) -> bool {
        self.inner.lock().is_synchronized
    }

    pub fn known_versions(&self) -> VersionRangeCollection {
        self.inner.lock().versions.clone()
    }

    pub fn undeleted_len(&self) -> usize {
        self.inner.lock().undeleted.len()
    }
}

impl Inner {
    /// Apply the accept rules to one page, mutating the notification state
    /// and returning what must be delivered.
    fn accept(&mut self, page: &ServiceNotificationPage) -> Vec<DeliveredNotification> {
        if page.generation < self.generation {
            debug!(
                page_generation = page.generation,
                generation = self.generation,
                "dropping stale-generation notification",
            );
            return Vec::new();
        }

        let deliver_all = if page.generation > self.generation {
            info!(
                old_generation = self.generation,
                new_generation = page.generation,
                "notification generation moved forward, resetting",
            );
            self.generation = page.generation;
            self.versions.clear();
            self.undeleted.clear();
            true
        } else {
            false
        };

        let mut deliveries = Vec::new();
        for (index, entry) in page.entries.iter().enumerate() {
            let matched_primary_only = page.is_matched_primary_only(index);

            if !deliver_all && self.versions.contains(entry.version) {
                continue;
            }

            let update = self.undeleted.try_update(entry, matched_primary_only);
            if deliver_all || update {
                deliveries.push(DeliveredNotification {
                    entry: entry.clone(),
                    matched_primary_only,
                    is_synthetic: false,
                });
            }
        }

        self.versions.merge(&page.versions);
        deliveries
    }
}

/// Split a non-empty service-group entry into per-member entries.
///
/// Member names come from the packed `member=address` replica addresses;
/// returns `None` for plain services.
fn expand_service_group(entry: &ServiceTableEntry) -> Option<Vec<ServiceTableEntry>> {
    if !entry.is_service_group {
        return None;
    }

    let packed = entry
        .replicas
        .primary
        .as_deref()
        .or_else(|| entry.replicas.secondaries.first().map(String::as_str))?;

    let members: Vec<&str> = packed
        .split(';')
        .filter_map(|pair| pair.split_once('=').map(|(member, _)| member))
        .collect();
    if members.is_empty() {
        return None;
    }

    let project = |address: &str, member: &str| -> String {
        address
            .split(';')
            .find_map(|pair| {
                let (name, addr) = pair.split_once('=')?;
                (name == member).then(|| addr.to_owned())
            })
            .unwrap_or_default()
    };

    Some(
        members
            .iter()
            .map(|member| ServiceTableEntry {
                cuid: entry.cuid,
                service_name: format!("{}#{}", entry.service_name, member),
                version: entry.version,
                generation: entry.generation,
                info: entry.info.clone(),
                is_service_group: false,
                replicas: ReplicaSet {
                    is_stateful: entry.replicas.is_stateful,
                    is_primary_valid: entry.replicas.is_primary_valid,
                    primary: entry
                        .replicas
                        .primary
                        .as_deref()
                        .map(|address| project(address, member)),
                    secondaries: entry
                        .replicas
                        .secondaries
                        .iter()
                        .map(|address| project(address, member))
                        .collect(),
                },
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Cuid, Generation, PartitionInfo};
    use uuid::Uuid;

    #[test]
    fn service_group_expansion() {
        let entry = ServiceTableEntry {
            cuid: Cuid(Uuid::from_u128(1)),
            service_name: "fabric:/group".to_owned(),
            version: 5,
            generation: Generation(1, 1),
            info: PartitionInfo::Singleton,
            is_service_group: true,
            replicas: ReplicaSet {
                is_stateful: true,
                is_primary_valid: true,
                primary: Some("a=tcp://n1:1;b=tcp://n1:2".to_owned()),
                secondaries: vec![],
            },
        };

        let members = expand_service_group(&entry).unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].service_name, "fabric:/group#a");
        assert_eq!(members[0].replicas.primary.as_deref(), Some("tcp://n1:1"));
        assert_eq!(members[1].service_name, "fabric:/group#b");
        assert_eq!(members[1].replicas.primary.as_deref(), Some("tcp://n1:2"));
    }

    #[test]
    fn plain_services_are_not_expanded() {
        let entry = ServiceTableEntry {
            cuid: Cuid(Uuid::from_u128(1)),
            service_name: "fabric:/svc".to_owned(),
            version: 5,
            generation: Generation(1, 1),
            info: PartitionInfo::Singleton,
            is_service_group: false,
            replicas: ReplicaSet::default(),
        };
        assert!(expand_service_group(&entry).is_none());
    }
}
