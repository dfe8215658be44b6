
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use rfabric::client::ClientBuilder;
use rfabric::notification::{AddressUpdate, DeliveredNotification, PollOutcome};
use rfabric::protocol::error::ErrorKind;
use rfabric::protocol::messages::{
    FileTransferMessage, GetServiceDescriptionReply, GetServiceDescriptionRequest,
    LocationChangePollReply, LocationChangePollRequest, NotificationConnectReply,
    NotificationConnectRequest, NotificationFilterSpec, NotificationPageId, NotificationSyncReply,
    NotificationSyncRequest, PrefixResolveReply, ResolveServiceReply, ResolveServiceRequest,
    ServiceNotificationPage, VersionedCuid,
};
use rfabric::transport::{Gateway, GatewayAddress};
use rfabric::types::{
    Cuid, Generation, PartitionInfo, ReplicaSet, Rsp, RspVersion, ServiceTableEntry, VersionRange,
    VersionRangeCollection,
};

use crate::test_helpers::maybe_start_logging;

fn cuid(id: u128) -> Cuid {
    Cuid(Uuid::from_u128(id))
}

fn entry(id: u128, version: i64, primary: Option<&str>) -> ServiceTableEntry {
    ServiceTableEntry {
        cuid: cuid(id),
        service_name: "fabric:/svc".to_owned(),
        version,
        generation: Generation(1, 1),
        info: PartitionInfo::Singleton,
        is_service_group: false,
        replicas: ReplicaSet {
            is_stateful: true,
            is_primary_valid: true,
            primary: primary.map(str::to_owned),
            secondaries: vec![],
        },
    }
}

fn page(generation: i64, versions: &[(i64, i64)], entries: Vec<ServiceTableEntry>) -> ServiceNotificationPage {
    let mut collection = VersionRangeCollection::new();
    for &(begin, end) in versions {
        collection.add_range(VersionRange::new(begin, end));
    }
    ServiceNotificationPage {
        page_id: NotificationPageId {
            notification_id: Uuid::new_v4(),
            page_index: 0,
            page_count: 1,
        },
        generation,
        versions: collection,
        entries,
        matched_primary_only: vec![],
    }
}

/// Gateway stub with programmable connect / synchronize replies; records
/// every synchronization page it sees.
#[derive(Debug)]
struct NotificationMock {
    cache_generation: AtomicI64,
    last_deleted_version: AtomicI64,
    deleted_versions: Mutex<Vec<i64>>,
    sync_requests: Mutex<Vec<Vec<VersionedCuid>>>,
    poll_reply: Mutex<Option<LocationChangePollReply>>,
}

impl NotificationMock {
    fn new(cache_generation: i64) -> Arc<Self> {
        Arc::new(Self {
            cache_generation: AtomicI64::new(cache_generation),
            last_deleted_version: AtomicI64::new(0),
            deleted_versions: Mutex::new(Vec::new()),
            sync_requests: Mutex::new(Vec::new()),
            poll_reply: Mutex::new(None),
        })
    }
}

#[async_trait]
impl Gateway for NotificationMock {
    async fn get_service_description(
        &self,
        _request: GetServiceDescriptionRequest,
    ) -> Result<GetServiceDescriptionReply, ErrorKind> {
        Err(ErrorKind::NameNotFound)
    }

    async fn resolve_service(
        &self,
        _request: ResolveServiceRequest,
    ) -> Result<ResolveServiceReply, ErrorKind> {
        Err(ErrorKind::NameNotFound)
    }

    async fn prefix_resolve(
        &self,
        _request: ResolveServiceRequest,
    ) -> Result<PrefixResolveReply, ErrorKind> {
        Err(ErrorKind::NameNotFound)
    }

    async fn notification_connect(
        &self,
        _request: NotificationConnectRequest,
    ) -> Result<NotificationConnectReply, ErrorKind> {
        Ok(NotificationConnectReply {
            cache_generation: self.cache_generation.load(Ordering::SeqCst),
            last_deleted_empty_partition_version: self.last_deleted_version.load(Ordering::SeqCst),
            actual_gateway: "gateway-1".to_owned(),
        })
    }

    async fn notification_synchronize(
        &self,
        request: NotificationSyncRequest,
    ) -> Result<NotificationSyncReply, ErrorKind> {
        self.sync_requests
            .lock()
            .unwrap()
            .push(request.undeleted_partitions.clone());

        let trimmed = self.deleted_versions.lock().unwrap();
        Ok(NotificationSyncReply {
            deleted_versions: request
                .undeleted_partitions
                .iter()
                .map(|p| p.version)
                .filter(|v| trimmed.contains(v))
                .collect(),
        })
    }

    async fn poll_service_locations(
        &self,
        _request: LocationChangePollRequest,
    ) -> Result<LocationChangePollReply, ErrorKind> {
        match self.poll_reply.lock().unwrap().take() {
            Some(reply) => Ok(reply),
            None => Err(ErrorKind::GatewayUnreachable),
        }
    }

    async fn send_file_message(&self, _message: FileTransferMessage) -> Result<(), ErrorKind> {
        Err(ErrorKind::OperationFailed)
    }
}

type Delivered = Arc<Mutex<Vec<DeliveredNotification>>>;

fn client_with_recorder(
    gateway: &Arc<NotificationMock>,
) -> (rfabric::client::Client, Delivered) {
    let delivered: Delivered = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&delivered);
    let client = ClientBuilder::new(Arc::<NotificationMock>::clone(gateway) as Arc<dyn Gateway>)
        .client_id("notification-test")
        .notification_handler(Arc::new(move |notification| {
            sink.lock().unwrap().push(notification);
        }))
        .build();
    (client, delivered)
}

#[tokio::test]
async fn reconnect_synthesizes_tombstones_for_trimmed_versions() {
    maybe_start_logging();

    let gateway = NotificationMock::new(7);
    let (client, delivered) = client_with_recorder(&gateway);
    let notifications = client.notification_client();

    // first connect adopts the gateway generation
    notifications
        .on_gateway_connected(GatewayAddress("gw-1".to_owned()))
        .await
        .unwrap();
    notifications
        .register_filter(NotificationFilterSpec {
            name: "fabric:/svc".to_owned(),
            match_name_prefix: true,
            match_primary_change_only: false,
        })
        .await
        .unwrap();
    assert!(notifications.is_synchronized());
    assert_eq!(notifications.generation(), 7);

    // the client learns about a live partition at version 40 and knows
    // versions 1..=50
    notifications
        .process_notification_page(page(
            7,
            &[(1, 51)],
            vec![entry(0xc, 40, Some("tcp://n1:1"))],
        ))
        .unwrap();
    assert_eq!(notifications.undeleted_len(), 1);
    assert_eq!(delivered.lock().unwrap().len(), 1);

    // while the client is away the gateway trims version 40 and moves its
    // tombstone horizon to 55
    gateway.last_deleted_version.store(55, Ordering::SeqCst);
    gateway.deleted_versions.lock().unwrap().push(40);

    notifications
        .on_gateway_connected(GatewayAddress("gw-2".to_owned()))
        .await
        .unwrap();

    // the synchronization page carried exactly (40, C)
    let sync_pages = gateway.sync_requests.lock().unwrap().clone();
    assert_eq!(sync_pages.len(), 1);
    assert_eq!(sync_pages[0].len(), 1);
    assert_eq!(sync_pages[0][0].version, 40);
    assert_eq!(sync_pages[0][0].cuid, cuid(0xc));

    // a synthetic empty notification was delivered and the index cleared
    let all = delivered.lock().unwrap().clone();
    let synthetic = all.last().unwrap();
    assert!(synthetic.is_synthetic);
    assert!(synthetic.entry.is_empty());
    assert_eq!(synthetic.entry.version, 40);
    assert_eq!(synthetic.entry.cuid, cuid(0xc));
    assert_eq!(notifications.undeleted_len(), 0);
    assert!(notifications.is_synchronized());
}

#[tokio::test]
async fn reconnect_without_missed_deletions_skips_paging() {
    maybe_start_logging();

    let gateway = NotificationMock::new(3);
    let (client, _delivered) = client_with_recorder(&gateway);
    let notifications = client.notification_client();

    notifications
        .on_gateway_connected(GatewayAddress("gw-1".to_owned()))
        .await
        .unwrap();
    notifications
        .register_filter(NotificationFilterSpec {
            name: "fabric:/svc".to_owned(),
            match_name_prefix: false,
            match_primary_change_only: false,
        })
        .await
        .unwrap();

    notifications
        .process_notification_page(page(3, &[(1, 31)], vec![entry(1, 20, Some("tcp://n1:1"))]))
        .unwrap();

    // the horizon is inside the known versions: nothing to synchronize
    gateway.last_deleted_version.store(30, Ordering::SeqCst);
    notifications
        .on_gateway_connected(GatewayAddress("gw-2".to_owned()))
        .await
        .unwrap();

    assert!(gateway.sync_requests.lock().unwrap().is_empty());
    assert!(notifications.is_synchronized());
}

#[tokio::test]
async fn generation_change_resets_client_state() {
    maybe_start_logging();

    let gateway = NotificationMock::new(1);
    let (client, delivered) = client_with_recorder(&gateway);
    let notifications = client.notification_client();

    notifications
        .on_gateway_connected(GatewayAddress("gw-1".to_owned()))
        .await
        .unwrap();
    notifications
        .register_filter(NotificationFilterSpec {
            name: "fabric:/svc".to_owned(),
            match_name_prefix: true,
            match_primary_change_only: false,
        })
        .await
        .unwrap();
    notifications
        .process_notification_page(page(1, &[(1, 11)], vec![entry(1, 10, Some("tcp://n1:1"))]))
        .unwrap();
    assert_eq!(notifications.undeleted_len(), 1);

    // the gateway restarted with a new cache generation
    gateway.cache_generation.store(2, Ordering::SeqCst);
    notifications
        .on_gateway_connected(GatewayAddress("gw-2".to_owned()))
        .await
        .unwrap();

    assert_eq!(notifications.generation(), 2);
    assert_eq!(notifications.undeleted_len(), 0);
    assert!(notifications.known_versions().is_empty());

    // entries on the new generation flow again
    notifications
        .process_notification_page(page(2, &[(1, 6)], vec![entry(2, 5, Some("tcp://n2:1"))]))
        .unwrap();
    assert_eq!(delivered.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn duplicate_and_stale_notifications_are_dropped() {
    maybe_start_logging();

    let gateway = NotificationMock::new(5);
    let (client, delivered) = client_with_recorder(&gateway);
    let notifications = client.notification_client();

    notifications
        .on_gateway_connected(GatewayAddress("gw-1".to_owned()))
        .await
        .unwrap();
    notifications
        .register_filter(NotificationFilterSpec {
            name: "fabric:/svc".to_owned(),
            match_name_prefix: true,
            match_primary_change_only: false,
        })
        .await
        .unwrap();

    notifications
        .process_notification_page(page(5, &[(10, 11)], vec![entry(1, 10, Some("tcp://n1:1"))]))
        .unwrap();
    assert_eq!(delivered.lock().unwrap().len(), 1);

    // same version again: duplicate
    notifications
        .process_notification_page(page(5, &[(10, 11)], vec![entry(1, 10, Some("tcp://n1:1"))]))
        .unwrap();
    assert_eq!(delivered.lock().unwrap().len(), 1);

    // older generation: dropped wholesale
    notifications
        .process_notification_page(page(4, &[(20, 21)], vec![entry(2, 20, Some("tcp://n1:2"))]))
        .unwrap();
    assert_eq!(delivered.lock().unwrap().len(), 1);

    // the known version set covers everything processed
    let versions = notifications.known_versions();
    assert!(versions.contains(10));
    assert!(!versions.contains(20));
}

#[tokio::test]
async fn notifications_are_buffered_until_synchronized() {
    maybe_start_logging();

    let gateway = NotificationMock::new(1);
    let (client, delivered) = client_with_recorder(&gateway);
    let notifications = client.notification_client();

    // no gateway yet: everything is buffered
    notifications
        .process_notification_page(page(1, &[(1, 2)], vec![entry(1, 1, Some("tcp://n1:1"))]))
        .unwrap();
    assert_eq!(delivered.lock().unwrap().len(), 0);

    notifications
        .on_gateway_connected(GatewayAddress("gw-1".to_owned()))
        .await
        .unwrap();
    notifications
        .register_filter(NotificationFilterSpec {
            name: "fabric:/svc".to_owned(),
            match_name_prefix: true,
            match_primary_change_only: false,
        })
        .await
        .unwrap();

    // the buffer drained through the normal accept path
    assert_eq!(delivered.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn filter_registration_is_idempotent() {
    maybe_start_logging();

    let gateway = NotificationMock::new(1);
    let (client, _delivered) = client_with_recorder(&gateway);
    let notifications = client.notification_client();
    notifications
        .on_gateway_connected(GatewayAddress("gw-1".to_owned()))
        .await
        .unwrap();

    let spec = NotificationFilterSpec {
        name: "fabric:/svc".to_owned(),
        match_name_prefix: false,
        match_primary_change_only: false,
    };
    let first = notifications.register_filter(spec.clone()).await.unwrap();
    let second = notifications.register_filter(spec).await.unwrap();
    assert_ne!(first, second);

    notifications.unregister_filter(first).unwrap();
    // unknown ids count as success
    notifications.unregister_filter(first).unwrap();
    notifications.unregister_filter(9999).unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn trackers_observe_poll_replies_through_the_cache() {
    maybe_start_logging();

    let gateway = NotificationMock::new(1);
    let (client, _delivered) = client_with_recorder(&gateway);
    let manager = client.tracker_manager();

    let updates: Arc<Mutex<Vec<AddressUpdate>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&updates);
    let name = "fabric:/svc".parse().unwrap();
    let handler_id = manager.add_tracker(
        &name,
        rfabric::types::PartitionKey::None,
        Arc::new(move |_, update| {
            sink.lock().unwrap().push(update);
        }),
    );
    assert_eq!(manager.tracker_count(), 1);

    let rsp = Rsp {
        cuid: cuid(9),
        service_name: "fabric:/svc".parse().unwrap(),
        version: RspVersion {
            generation: Generation(1, 1),
            fm_version: 10,
            store_version: 100,
        },
        info: PartitionInfo::Singleton,
        is_service_group: false,
        replicas: ReplicaSet {
            is_stateful: true,
            is_primary_valid: true,
            primary: Some("tcp://node1:9000".to_owned()),
            secondaries: vec![],
        },
    };
    *gateway.poll_reply.lock().unwrap() = Some(LocationChangePollReply {
        partitions: vec![rsp.clone()],
        failures: vec![],
        first_non_processed_request_index: None,
    });

    let outcome = manager.poll_once().await;
    assert_eq!(outcome, PollOutcome::Again);

    // callback delivery is asynchronous
    tokio::time::sleep(Duration::from_millis(100)).await;
    {
        let updates = updates.lock().unwrap();
        assert_eq!(updates.len(), 1);
        match &updates[0] {
            AddressUpdate::Resolved(update) => assert_eq!(**update, rsp),
            other => panic!("unexpected update {other:?}"),
        }
    }

    // a second poll with no news delivers nothing new
    *gateway.poll_reply.lock().unwrap() = Some(LocationChangePollReply {
        partitions: vec![rsp],
        failures: vec![],
        first_non_processed_request_index: None,
    });
    manager.poll_once().await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(updates.lock().unwrap().len(), 1);

    manager.remove_tracker(handler_id);
    assert_eq!(manager.tracker_count(), 0);
}

#[tokio::test]
async fn poll_with_no_trackers_is_idle() {
    maybe_start_logging();

    let gateway = NotificationMock::new(1);
    let (client, _delivered) = client_with_recorder(&gateway);
    assert_eq!(client.tracker_manager().poll_once().await, PollOutcome::Idle);
}
