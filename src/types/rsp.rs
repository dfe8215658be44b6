use std::fmt::{Display, Formatter};

use uuid::Uuid;

use crate::protocol::error::ErrorKind;
use crate::types::name::ServiceName;
use crate::types::psd::PartitionInfo;

/// Consistency-unit id: the 128-bit identity of a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cuid(pub Uuid);

impl Cuid {
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for Cuid {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Replica-set generation assigned by the failover manager.
///
/// Ordered lexicographically by (owner instance, number).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Generation(pub i64, pub i64);

impl Display for Generation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{})", self.0, self.1)
    }
}

/// Total order on resolved-partition snapshots.
///
/// A cached RSP is replaced only by a strictly greater version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RspVersion {
    pub generation: Generation,
    pub fm_version: i64,
    pub store_version: i64,
}

/// The replica set of one partition.
///
/// An empty replica set inside a notification entry marks the partition as
/// deleted.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReplicaSet {
    pub is_stateful: bool,
    pub is_primary_valid: bool,
    pub primary: Option<String>,
    pub secondaries: Vec<String>,
}

impl ReplicaSet {
    pub fn is_empty(&self) -> bool {
        self.primary.is_none() && self.secondaries.is_empty()
    }
}

/// Resolved service partition: a versioned snapshot of one partition's
/// replica set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rsp {
    pub cuid: Cuid,
    /// Owning service, fragment-stripped.
    pub service_name: ServiceName,
    pub version: RspVersion,
    pub info: PartitionInfo,
    pub is_service_group: bool,
    pub replicas: ReplicaSet,
}

impl Rsp {
    /// Extract the member view of a service-group RSP.
    ///
    /// Service-group replica addresses pack one address per member as
    /// `member=address` pairs separated by `;`.
    pub fn member_rsp(&self, member: &str) -> Result<Self, ErrorKind> {
        debug_assert!(self.is_service_group);

        let project = |address: &String| member_address(address, member);

        let primary = match &self.replicas.primary {
            Some(address) => Some(project(address).ok_or(ErrorKind::UserServiceNotFound)?),
            None => None,
        };
        let secondaries = self
            .replicas
            .secondaries
            .iter()
            .map(|address| project(address).ok_or(ErrorKind::UserServiceNotFound))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            cuid: self.cuid,
            service_name: self.service_name.clone(),
            version: self.version,
            info: self.info.clone(),
            is_service_group: false,
            replicas: ReplicaSet {
                is_stateful: self.replicas.is_stateful,
                is_primary_valid: self.replicas.is_primary_valid,
                primary,
                secondaries,
            },
        })
    }
}

fn member_address(packed: &str, member: &str) -> Option<String> {
    packed.split(';').find_map(|pair| {
        let (name, address) = pair.split_once('=')?;
        (name == member).then(|| address.to_owned())
    })
}

/// On-wire form of an RSP inside a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceTableEntry {
    pub cuid: Cuid,
    pub service_name: String,
    /// Notification version assigned by the failover manager.
    pub version: i64,
    pub generation: Generation,
    pub info: PartitionInfo,
    pub is_service_group: bool,
    /// Empty marks the partition deleted.
    pub replicas: ReplicaSet,
}

impl ServiceTableEntry {
    pub fn is_empty(&self) -> bool {
        self.replicas.is_empty()
    }

    /// Build the RSP this entry describes; `store_version` comes from the
    /// descriptor the entry is applied against.
    pub fn to_rsp(&self, service_name: ServiceName, store_version: i64) -> Rsp {
        Rsp {
            cuid: self.cuid,
            service_name,
            version: RspVersion {
                generation: self.generation,
                fm_version: self.version,
                store_version,
            },
            info: self.info.clone(),
            is_service_group: self.is_service_group,
            replicas: self.replicas.clone(),
        }
    }
}

/// Per-partition negative result surfaced to notification consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressDetectionFailure {
    pub service_name: String,
    pub kind: ErrorKind,
    pub store_version: i64,
}
