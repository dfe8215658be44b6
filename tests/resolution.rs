
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use uuid::Uuid;

use rfabric::client::ClientBuilder;
use rfabric::protocol::error::ErrorKind;
use rfabric::protocol::messages::{
    FileTransferMessage, GetServiceDescriptionReply, GetServiceDescriptionRequest,
    LocationChangePollReply, LocationChangePollRequest, NotificationConnectReply,
    NotificationConnectRequest, NotificationSyncReply, NotificationSyncRequest, PrefixResolveReply,
    ResolveServiceReply, ResolveServiceRequest,
};
use rfabric::transport::Gateway;
use rfabric::types::{
    Cuid, Generation, PartitionDescription, PartitionInfo, PartitionKey, PartitionScheme, Psd,
    ReplicaSet, Rsp, RspVersion,
};

use crate::test_helpers::maybe_start_logging;

const TIMEOUT: Duration = Duration::from_secs(30);

const SVC: &str = "fabric:/svc";
const GROUP: &str = "fabric:/group";

fn svc_cuid() -> Cuid {
    Cuid(Uuid::from_u128(0xc001))
}

fn svc_psd(version: i64) -> Psd {
    Psd {
        version,
        scheme: PartitionScheme::UniformInt64Range { low: 0, high: 9 },
        partitions: vec![PartitionDescription {
            cuid: svc_cuid(),
            info: PartitionInfo::Int64Range { low: 0, high: 9 },
        }],
        is_service_group: false,
    }
}

fn svc_rsp(name: &str, fm_version: i64, store_version: i64, is_group: bool, primary: &str) -> Rsp {
    Rsp {
        cuid: svc_cuid(),
        service_name: name.parse().unwrap(),
        version: RspVersion {
            generation: Generation(1, 1),
            fm_version,
            store_version,
        },
        info: PartitionInfo::Int64Range { low: 0, high: 9 },
        is_service_group: is_group,
        replicas: ReplicaSet {
            is_stateful: true,
            is_primary_valid: true,
            primary: Some(primary.to_owned()),
            secondaries: vec![],
        },
    }
}

/// Serves one uniform-int64 service plus one service group; counts the
/// naming calls it handles.
#[derive(Debug)]
struct NamingMock {
    rsp_fm_version: AtomicI64,
    psd_calls: AtomicUsize,
    resolve_calls: AtomicUsize,
    prefix_calls: AtomicUsize,
    fetch_delay: Option<Duration>,
}

impl NamingMock {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            rsp_fm_version: AtomicI64::new(10),
            psd_calls: AtomicUsize::new(0),
            resolve_calls: AtomicUsize::new(0),
            prefix_calls: AtomicUsize::new(0),
            fetch_delay: None,
        })
    }

    fn with_fetch_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            rsp_fm_version: AtomicI64::new(10),
            psd_calls: AtomicUsize::new(0),
            resolve_calls: AtomicUsize::new(0),
            prefix_calls: AtomicUsize::new(0),
            fetch_delay: Some(delay),
        })
    }
}

#[async_trait]
impl Gateway for NamingMock {
    async fn get_service_description(
        &self,
        request: GetServiceDescriptionRequest,
    ) -> Result<GetServiceDescriptionReply, ErrorKind> {
        self.psd_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.fetch_delay {
            tokio::time::sleep(delay).await;
        }
        match request.name.as_str() {
            SVC => Ok(GetServiceDescriptionReply { psd: svc_psd(100) }),
            GROUP => Ok(GetServiceDescriptionReply {
                psd: Psd {
                    is_service_group: true,
                    ..svc_psd(100)
                },
            }),
            _ => Err(ErrorKind::NameNotFound),
        }
    }

    async fn resolve_service(
        &self,
        request: ResolveServiceRequest,
    ) -> Result<ResolveServiceReply, ErrorKind> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        let fm = self.rsp_fm_version.load(Ordering::SeqCst);
        match request.name.as_str() {
            SVC => Ok(ResolveServiceReply {
                rsp: svc_rsp(SVC, fm, 100, false, "tcp://node1:9000"),
                psd: None,
            }),
            GROUP => Ok(ResolveServiceReply {
                rsp: svc_rsp(GROUP, fm, 100, true, "a=tcp://n1:1;b=tcp://n1:2"),
                psd: None,
            }),
            _ => Err(ErrorKind::NameNotFound),
        }
    }

    async fn prefix_resolve(
        &self,
        request: ResolveServiceRequest,
    ) -> Result<PrefixResolveReply, ErrorKind> {
        self.prefix_calls.fetch_add(1, Ordering::SeqCst);
        if request.name.starts_with(SVC) {
            let fm = self.rsp_fm_version.load(Ordering::SeqCst);
            Ok(PrefixResolveReply {
                rsp: svc_rsp(SVC, fm, 100, false, "tcp://node1:9000"),
                psd: svc_psd(100),
            })
        } else {
            Err(ErrorKind::NameNotFound)
        }
    }

    async fn notification_connect(
        &self,
        _request: NotificationConnectRequest,
    ) -> Result<NotificationConnectReply, ErrorKind> {
        Err(ErrorKind::OperationFailed)
    }

    async fn notification_synchronize(
        &self,
        _request: NotificationSyncRequest,
    ) -> Result<NotificationSyncReply, ErrorKind> {
        Err(ErrorKind::OperationFailed)
    }

    async fn poll_service_locations(
        &self,
        _request: LocationChangePollRequest,
    ) -> Result<LocationChangePollReply, ErrorKind> {
        Err(ErrorKind::OperationFailed)
    }

    async fn send_file_message(&self, _message: FileTransferMessage) -> Result<(), ErrorKind> {
        Err(ErrorKind::OperationFailed)
    }
}

#[tokio::test]
async fn resolve_round_trip_and_cache_hit() {
    maybe_start_logging();

    let gateway = NamingMock::new();
    let client = ClientBuilder::new(Arc::<NamingMock>::clone(&gateway) as Arc<dyn Gateway>)
        .client_id("resolution-test")
        .build();
    let cache = client.resolution_cache();

    let name = SVC.parse().unwrap();
    let rsp = cache
        .resolve(&name, &PartitionKey::Int64(5), None, TIMEOUT)
        .await
        .unwrap();

    assert_eq!(rsp.replicas.primary.as_deref(), Some("tcp://node1:9000"));
    assert_eq!(gateway.psd_calls.load(Ordering::SeqCst), 1);
    assert_eq!(gateway.resolve_calls.load(Ordering::SeqCst), 1);

    // second resolve with the same key is answered from the cache
    let again = cache
        .resolve(&name, &PartitionKey::Int64(5), None, TIMEOUT)
        .await
        .unwrap();
    assert_eq!(again, rsp);
    assert_eq!(gateway.psd_calls.load(Ordering::SeqCst), 1);
    assert_eq!(gateway.resolve_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn resolve_with_previous_version_fetches_newer() {
    maybe_start_logging();

    let gateway = NamingMock::new();
    let client = ClientBuilder::new(Arc::<NamingMock>::clone(&gateway) as Arc<dyn Gateway>).build();
    let cache = client.resolution_cache();
    let name = SVC.parse().unwrap();

    let cached = cache
        .resolve(&name, &PartitionKey::Int64(5), None, TIMEOUT)
        .await
        .unwrap();
    assert_eq!(cached.version.fm_version, 10);

    // the naming service has moved on
    gateway.rsp_fm_version.store(11, Ordering::SeqCst);

    let previous = RspVersion {
        generation: Generation(1, 1),
        fm_version: 10,
        store_version: 100,
    };
    let newer = cache
        .resolve(&name, &PartitionKey::Int64(5), Some(previous), TIMEOUT)
        .await
        .unwrap();

    assert_eq!(newer.version.fm_version, 11);
    assert!(newer.version > previous);
    // exactly one extra naming resolve, no descriptor refetch
    assert_eq!(gateway.resolve_calls.load(Ordering::SeqCst), 2);
    assert_eq!(gateway.psd_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_resolves_share_one_fetch() {
    maybe_start_logging();

    let gateway = NamingMock::with_fetch_delay(Duration::from_millis(100));
    let client = Arc::new(
        ClientBuilder::new(Arc::<NamingMock>::clone(&gateway) as Arc<dyn Gateway>).build(),
    );

    let mut handles = Vec::new();
    for _ in 0..8 {
        let client = Arc::clone(&client);
        handles.push(tokio::spawn(async move {
            let name = SVC.parse().unwrap();
            client
                .resolution_cache()
                .resolve(&name, &PartitionKey::Int64(3), None, TIMEOUT)
                .await
        }));
    }

    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }

    // single-flight: one descriptor fetch and one partition resolve
    assert_eq!(gateway.psd_calls.load(Ordering::SeqCst), 1);
    assert_eq!(gateway.resolve_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unknown_service_is_evicted_with_the_original_error() {
    maybe_start_logging();

    let gateway = NamingMock::new();
    let client = ClientBuilder::new(Arc::<NamingMock>::clone(&gateway) as Arc<dyn Gateway>).build();
    let cache = client.resolution_cache();
    let name = "fabric:/missing".parse().unwrap();

    let err = cache
        .resolve(&name, &PartitionKey::Int64(1), None, TIMEOUT)
        .await
        .unwrap_err();
    assert_eq!(err, ErrorKind::NameNotFound);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn key_outside_partition_range_is_rejected() {
    maybe_start_logging();

    let gateway = NamingMock::new();
    let client = ClientBuilder::new(Arc::<NamingMock>::clone(&gateway) as Arc<dyn Gateway>).build();
    let name = SVC.parse().unwrap();

    let err = client
        .resolution_cache()
        .resolve(&name, &PartitionKey::Int64(1000), None, TIMEOUT)
        .await
        .unwrap_err();
    assert_eq!(err, ErrorKind::InvalidServicePartition);
}

#[tokio::test]
async fn service_group_resolution_narrows_to_the_member() {
    maybe_start_logging();

    let gateway = NamingMock::new();
    let client = ClientBuilder::new(Arc::<NamingMock>::clone(&gateway) as Arc<dyn Gateway>).build();
    let cache = client.resolution_cache();

    let member_name = format!("{GROUP}#b").parse().unwrap();
    let rsp = cache
        .resolve(&member_name, &PartitionKey::Int64(5), None, TIMEOUT)
        .await
        .unwrap();
    assert!(!rsp.is_service_group);
    assert_eq!(rsp.replicas.primary.as_deref(), Some("tcp://n1:2"));

    // a bare service-group name is refused
    let bare = GROUP.parse().unwrap();
    let err = cache
        .resolve(&bare, &PartitionKey::Int64(5), None, TIMEOUT)
        .await
        .unwrap_err();
    assert_eq!(err, ErrorKind::AccessDenied);
}

#[tokio::test]
async fn get_psd_is_cached() {
    maybe_start_logging();

    let gateway = NamingMock::new();
    let client = ClientBuilder::new(Arc::<NamingMock>::clone(&gateway) as Arc<dyn Gateway>).build();
    let name = SVC.parse().unwrap();

    let psd = client.resolution_cache().get_psd(&name, TIMEOUT).await.unwrap();
    assert_eq!(psd.version, 100);
    assert_eq!(psd.partition_count(), 1);

    client.resolution_cache().get_psd(&name, TIMEOUT).await.unwrap();
    assert_eq!(gateway.psd_calls.load(Ordering::SeqCst), 1);

    // invalidation forces a refetch
    client.resolution_cache().invalidate(&name);
    client.resolution_cache().get_psd(&name, TIMEOUT).await.unwrap();
    assert_eq!(gateway.psd_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn prefix_resolution_caches_under_the_matched_prefix() {
    maybe_start_logging();

    let gateway = NamingMock::new();
    let client = ClientBuilder::new(Arc::<NamingMock>::clone(&gateway) as Arc<dyn Gateway>).build();
    let prefix_cache = client.prefix_cache();

    let name = SVC.parse().unwrap();
    let rsp = prefix_cache
        .prefix_resolve(&name, &PartitionKey::Int64(5), None, false, TIMEOUT)
        .await
        .unwrap();
    assert_eq!(rsp.replicas.primary.as_deref(), Some("tcp://node1:9000"));
    assert_eq!(gateway.prefix_calls.load(Ordering::SeqCst), 1);

    // the entry serves repeat lookups without talking to naming
    prefix_cache
        .prefix_resolve(&name, &PartitionKey::Int64(5), None, false, TIMEOUT)
        .await
        .unwrap();
    assert_eq!(gateway.prefix_calls.load(Ordering::SeqCst), 1);

    // bypassing the cache always refetches
    prefix_cache
        .prefix_resolve(&name, &PartitionKey::Int64(5), None, true, TIMEOUT)
        .await
        .unwrap();
    assert_matches!(gateway.prefix_calls.load(Ordering::SeqCst), 2..);
}
