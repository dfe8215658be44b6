use std::io::{Read, Write};

use uuid::Uuid;

use crate::protocol::wire::{read_array, write_array, ReadError, ReadType, WriteError, WriteType};
use crate::types::{Cuid, ServiceTableEntry, VersionRangeCollection};

/// What a notification filter matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationFilterSpec {
    pub name: String,
    /// Match every name under `name` instead of the exact name.
    pub match_name_prefix: bool,
    /// Only deliver when the primary endpoint changes.
    pub match_primary_change_only: bool,
}

impl<R: Read> ReadType<R> for NotificationFilterSpec {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        Ok(Self {
            name: String::read(reader)?,
            match_name_prefix: bool::read(reader)?,
            match_primary_change_only: bool::read(reader)?,
        })
    }
}

impl<W: Write> WriteType<W> for NotificationFilterSpec {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        self.name.write(writer)?;
        self.match_name_prefix.write(writer)?;
        self.match_primary_change_only.write(writer)
    }
}

/// A registered filter; ids are assigned client-side and monotonic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationFilter {
    pub filter_id: u64,
    pub spec: NotificationFilterSpec,
}

impl<R: Read> ReadType<R> for NotificationFilter {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        Ok(Self {
            filter_id: u64::read(reader)?,
            spec: NotificationFilterSpec::read(reader)?,
        })
    }
}

impl<W: Write> WriteType<W> for NotificationFilter {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        self.filter_id.write(writer)?;
        self.spec.write(writer)
    }
}

/// Identity of one page of a (possibly multi-page) notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NotificationPageId {
    pub notification_id: Uuid,
    pub page_index: i32,
    pub page_count: i32,
}

impl<R: Read> ReadType<R> for NotificationPageId {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        Ok(Self {
            notification_id: Uuid::read(reader)?,
            page_index: i32::read(reader)?,
            page_count: i32::read(reader)?,
        })
    }
}

impl<W: Write> WriteType<W> for NotificationPageId {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        self.notification_id.write(writer)?;
        self.page_index.write(writer)?;
        self.page_count.write(writer)
    }
}

/// One gateway-pushed notification page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceNotificationPage {
    pub page_id: NotificationPageId,
    pub generation: i64,
    /// Versions covered by this notification, merged into the client's
    /// known-version set after processing.
    pub versions: VersionRangeCollection,
    pub entries: Vec<ServiceTableEntry>,
    /// Bitset, one bit per entry: the entry matched only primary-change
    /// filters.
    pub matched_primary_only: Vec<u8>,
}

impl ServiceNotificationPage {
    pub fn is_matched_primary_only(&self, entry_index: usize) -> bool {
        self.matched_primary_only
            .get(entry_index / 8)
            .is_some_and(|byte| byte & (1 << (entry_index % 8)) != 0)
    }
}

impl<R: Read> ReadType<R> for ServiceNotificationPage {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        Ok(Self {
            page_id: NotificationPageId::read(reader)?,
            generation: i64::read(reader)?,
            versions: VersionRangeCollection::read(reader)?,
            entries: read_array(reader)?,
            matched_primary_only: Vec::<u8>::read(reader)?,
        })
    }
}

impl<W: Write> WriteType<W> for ServiceNotificationPage {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        self.page_id.write(writer)?;
        self.generation.write(writer)?;
        self.versions.write(writer)?;
        write_array(writer, &self.entries)?;
        self.matched_primary_only.write(writer)
    }
}

/// Sent on (re)connect to a gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationConnectRequest {
    pub client_id: String,
    pub generation: i64,
    pub versions: VersionRangeCollection,
    pub filters: Vec<NotificationFilter>,
}

impl<R: Read> ReadType<R> for NotificationConnectRequest {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        Ok(Self {
            client_id: String::read(reader)?,
            generation: i64::read(reader)?,
            versions: VersionRangeCollection::read(reader)?,
            filters: read_array(reader)?,
        })
    }
}

impl<W: Write> WriteType<W> for NotificationConnectRequest {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        self.client_id.write(writer)?;
        self.generation.write(writer)?;
        self.versions.write(writer)?;
        write_array(writer, &self.filters)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationConnectReply {
    pub cache_generation: i64,
    /// Highest empty-partition version the gateway has already trimmed.
    pub last_deleted_empty_partition_version: i64,
    pub actual_gateway: String,
}

impl<R: Read> ReadType<R> for NotificationConnectReply {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        Ok(Self {
            cache_generation: i64::read(reader)?,
            last_deleted_empty_partition_version: i64::read(reader)?,
            actual_gateway: String::read(reader)?,
        })
    }
}

impl<W: Write> WriteType<W> for NotificationConnectReply {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        self.cache_generation.write(writer)?;
        self.last_deleted_empty_partition_version.write(writer)?;
        self.actual_gateway.write(writer)
    }
}

/// A (version, CUID) pair from the client's undeleted index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionedCuid {
    pub version: i64,
    pub cuid: Cuid,
}

impl<R: Read> ReadType<R> for VersionedCuid {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        Ok(Self {
            version: i64::read(reader)?,
            cuid: Cuid::read(reader)?,
        })
    }
}

impl<W: Write> WriteType<W> for VersionedCuid {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        self.version.write(writer)?;
        self.cuid.write(writer)
    }
}

/// One page of the reconnect synchronization: the undeleted partitions the
/// client still believes in, for the gateway to check against its index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationSyncRequest {
    pub client_id: String,
    pub generation: i64,
    pub undeleted_partitions: Vec<VersionedCuid>,
}

impl<R: Read> ReadType<R> for NotificationSyncRequest {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        Ok(Self {
            client_id: String::read(reader)?,
            generation: i64::read(reader)?,
            undeleted_partitions: read_array(reader)?,
        })
    }
}

impl<W: Write> WriteType<W> for NotificationSyncRequest {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        self.client_id.write(writer)?;
        self.generation.write(writer)?;
        write_array(writer, &self.undeleted_partitions)
    }
}

/// Versions from the request page that are no longer in the gateway index;
/// the partitions behind them were deleted while the client was away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationSyncReply {
    pub deleted_versions: Vec<i64>,
}

impl<R: Read> ReadType<R> for NotificationSyncReply {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        Ok(Self {
            deleted_versions: Vec::<i64>::read(reader)?,
        })
    }
}

impl<W: Write> WriteType<W> for NotificationSyncReply {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        self.deleted_versions.write(writer)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::assert_reversible;
    use super::*;
    use crate::types::{Generation, PartitionInfo, ReplicaSet, VersionRange};

    fn entry(version: i64) -> ServiceTableEntry {
        ServiceTableEntry {
            cuid: Cuid(Uuid::from_u128(version as u128)),
            service_name: "fabric:/svc".to_owned(),
            version,
            generation: Generation(1, 1),
            info: PartitionInfo::Singleton,
            is_service_group: false,
            replicas: ReplicaSet {
                is_stateful: true,
                is_primary_valid: true,
                primary: Some("tcp://node1:9000".to_owned()),
                secondaries: vec![],
            },
        }
    }

    #[test]
    fn page_reversible() {
        let mut versions = VersionRangeCollection::new();
        versions.add_range(VersionRange::new(1, 3));

        assert_reversible(&ServiceNotificationPage {
            page_id: NotificationPageId {
                notification_id: Uuid::from_u128(1),
                page_index: 0,
                page_count: 1,
            },
            generation: 1,
            versions,
            entries: vec![entry(1), entry(2)],
            matched_primary_only: vec![0b10],
        });
    }

    #[test]
    fn primary_only_bitset() {
        let page = ServiceNotificationPage {
            page_id: NotificationPageId {
                notification_id: Uuid::from_u128(1),
                page_index: 0,
                page_count: 1,
            },
            generation: 1,
            versions: VersionRangeCollection::new(),
            entries: (1..=9).map(entry).collect(),
            matched_primary_only: vec![0b0000_0001, 0b0000_0001],
        };
        assert!(page.is_matched_primary_only(0));
        assert!(!page.is_matched_primary_only(1));
        assert!(page.is_matched_primary_only(8));
        assert!(!page.is_matched_primary_only(100));
    }

    #[test]
    fn sync_messages_reversible() {
        assert_reversible(&NotificationConnectRequest {
            client_id: "client-1".to_owned(),
            generation: 3,
            versions: VersionRangeCollection::new(),
            filters: vec![NotificationFilter {
                filter_id: 1,
                spec: NotificationFilterSpec {
                    name: "fabric:/app".to_owned(),
                    match_name_prefix: true,
                    match_primary_change_only: false,
                },
            }],
        });
        assert_reversible(&NotificationConnectReply {
            cache_generation: 3,
            last_deleted_empty_partition_version: 55,
            actual_gateway: "gateway-2".to_owned(),
        });
        assert_reversible(&NotificationSyncRequest {
            client_id: "client-1".to_owned(),
            generation: 3,
            undeleted_partitions: vec![VersionedCuid {
                version: 40,
                cuid: Cuid(Uuid::from_u128(0xc)),
            }],
        });
        assert_reversible(&NotificationSyncReply {
            deleted_versions: vec![40],
        });
    }
}
