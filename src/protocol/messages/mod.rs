//! Message bodies exchanged with a gateway.
//!
//! Only logical content is encoded here; framing and transport headers are
//! the transport's concern.

use std::io::{Read, Write};

use crate::protocol::error::ErrorKind;
use crate::protocol::wire::{read_array, write_array, ReadError, ReadType, WriteError, WriteType};
use crate::types::{
    AddressDetectionFailure, Cuid, Generation, PartitionDescription, PartitionInfo, PartitionKey,
    PartitionScheme, Psd, ReplicaSet, Rsp, RspVersion, ServiceTableEntry, VersionRange,
    VersionRangeCollection,
};

mod file_transfer;
mod naming;
mod notification;
mod poll;

pub use file_transfer::{
    FileChunkAck, FileContent, FileCreateSessionReply, FileCreateSessionRequest, FileSessionControl,
    FileTransferEvent, FileTransferMessage, FileUploadHeader,
};
pub use naming::{
    GetServiceDescriptionReply, GetServiceDescriptionRequest, PrefixResolveReply,
    ResolveServiceReply, ResolveServiceRequest,
};
pub use notification::{
    NotificationConnectReply, NotificationConnectRequest, NotificationFilter,
    NotificationFilterSpec, NotificationPageId, NotificationSyncReply, NotificationSyncRequest,
    ServiceNotificationPage, VersionedCuid,
};
pub use poll::{LocationChangePollReply, LocationChangePollRequest, PollRequestEntry, PreviousResolve};

fn malformed(msg: &str) -> ReadError {
    ReadError::Malformed(msg.to_owned().into())
}

impl<R: Read> ReadType<R> for ErrorKind {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        let code = i16::read(reader)?;
        Self::new(code).ok_or_else(|| malformed("unknown error code"))
    }
}

impl<W: Write> WriteType<W> for ErrorKind {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        self.code().write(writer)
    }
}

/// `0` encodes success.
impl<R: Read> ReadType<R> for Option<ErrorKind> {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        let code = i16::read(reader)?;
        if code == 0 {
            return Ok(None);
        }
        ErrorKind::new(code)
            .map(Some)
            .ok_or_else(|| malformed("unknown error code"))
    }
}

impl<W: Write> WriteType<W> for Option<ErrorKind> {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        match self {
            Some(kind) => kind.code().write(writer),
            None => 0i16.write(writer),
        }
    }
}

impl<R: Read> ReadType<R> for Cuid {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        Ok(Self(uuid::Uuid::read(reader)?))
    }
}

impl<W: Write> WriteType<W> for Cuid {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        self.0.write(writer)
    }
}

impl<R: Read> ReadType<R> for Generation {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        Ok(Self(i64::read(reader)?, i64::read(reader)?))
    }
}

impl<W: Write> WriteType<W> for Generation {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        self.0.write(writer)?;
        self.1.write(writer)
    }
}

impl<R: Read> ReadType<R> for RspVersion {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        Ok(Self {
            generation: Generation::read(reader)?,
            fm_version: i64::read(reader)?,
            store_version: i64::read(reader)?,
        })
    }
}

impl<W: Write> WriteType<W> for RspVersion {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        self.generation.write(writer)?;
        self.fm_version.write(writer)?;
        self.store_version.write(writer)
    }
}

impl<R: Read> ReadType<R> for ReplicaSet {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        Ok(Self {
            is_stateful: bool::read(reader)?,
            is_primary_valid: bool::read(reader)?,
            primary: Option::<String>::read(reader)?,
            secondaries: read_array(reader)?,
        })
    }
}

impl<W: Write> WriteType<W> for ReplicaSet {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        self.is_stateful.write(writer)?;
        self.is_primary_valid.write(writer)?;
        self.primary.write(writer)?;
        write_array(writer, &self.secondaries)
    }
}

impl<R: Read> ReadType<R> for PartitionInfo {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        match i16::read(reader)? {
            0 => Ok(Self::Singleton),
            1 => Ok(Self::Int64Range {
                low: i64::read(reader)?,
                high: i64::read(reader)?,
            }),
            2 => Ok(Self::Named(String::read(reader)?)),
            _ => Err(malformed("unknown partition info tag")),
        }
    }
}

impl<W: Write> WriteType<W> for PartitionInfo {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        match self {
            Self::Singleton => 0i16.write(writer),
            Self::Int64Range { low, high } => {
                1i16.write(writer)?;
                low.write(writer)?;
                high.write(writer)
            }
            Self::Named(name) => {
                2i16.write(writer)?;
                name.write(writer)
            }
        }
    }
}

impl<R: Read> ReadType<R> for PartitionKey {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        match i16::read(reader)? {
            0 => Ok(Self::None),
            1 => Ok(Self::Int64(i64::read(reader)?)),
            2 => Ok(Self::Named(String::read(reader)?)),
            _ => Err(malformed("unknown partition key tag")),
        }
    }
}

impl<W: Write> WriteType<W> for PartitionKey {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        match self {
            Self::None => 0i16.write(writer),
            Self::Int64(key) => {
                1i16.write(writer)?;
                key.write(writer)
            }
            Self::Named(key) => {
                2i16.write(writer)?;
                key.write(writer)
            }
        }
    }
}

impl<R: Read> ReadType<R> for PartitionScheme {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        match i16::read(reader)? {
            0 => Ok(Self::Singleton),
            1 => Ok(Self::UniformInt64Range {
                low: i64::read(reader)?,
                high: i64::read(reader)?,
            }),
            2 => Ok(Self::Named {
                names: read_array(reader)?,
            }),
            _ => Err(malformed("unknown partition scheme tag")),
        }
    }
}

impl<W: Write> WriteType<W> for PartitionScheme {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        match self {
            Self::Singleton => 0i16.write(writer),
            Self::UniformInt64Range { low, high } => {
                1i16.write(writer)?;
                low.write(writer)?;
                high.write(writer)
            }
            Self::Named { names } => {
                2i16.write(writer)?;
                write_array(writer, names)
            }
        }
    }
}

impl<R: Read> ReadType<R> for PartitionDescription {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        Ok(Self {
            cuid: Cuid::read(reader)?,
            info: PartitionInfo::read(reader)?,
        })
    }
}

impl<W: Write> WriteType<W> for PartitionDescription {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        self.cuid.write(writer)?;
        self.info.write(writer)
    }
}

impl<R: Read> ReadType<R> for Psd {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        Ok(Self {
            version: i64::read(reader)?,
            scheme: PartitionScheme::read(reader)?,
            partitions: read_array(reader)?,
            is_service_group: bool::read(reader)?,
        })
    }
}

impl<W: Write> WriteType<W> for Psd {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        self.version.write(writer)?;
        self.scheme.write(writer)?;
        write_array(writer, &self.partitions)?;
        self.is_service_group.write(writer)
    }
}

impl<R: Read> ReadType<R> for Rsp {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        let cuid = Cuid::read(reader)?;
        let raw_name = String::read(reader)?;
        let service_name = raw_name
            .parse()
            .map_err(|_| malformed("invalid service name"))?;
        Ok(Self {
            cuid,
            service_name,
            version: RspVersion::read(reader)?,
            info: PartitionInfo::read(reader)?,
            is_service_group: bool::read(reader)?,
            replicas: ReplicaSet::read(reader)?,
        })
    }
}

impl<W: Write> WriteType<W> for Rsp {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        self.cuid.write(writer)?;
        self.service_name.as_str().write(writer)?;
        self.version.write(writer)?;
        self.info.write(writer)?;
        self.is_service_group.write(writer)?;
        self.replicas.write(writer)
    }
}

impl<R: Read> ReadType<R> for ServiceTableEntry {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        Ok(Self {
            cuid: Cuid::read(reader)?,
            service_name: String::read(reader)?,
            version: i64::read(reader)?,
            generation: Generation::read(reader)?,
            info: PartitionInfo::read(reader)?,
            is_service_group: bool::read(reader)?,
            replicas: ReplicaSet::read(reader)?,
        })
    }
}

impl<W: Write> WriteType<W> for ServiceTableEntry {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        self.cuid.write(writer)?;
        self.service_name.write(writer)?;
        self.version.write(writer)?;
        self.generation.write(writer)?;
        self.info.write(writer)?;
        self.is_service_group.write(writer)?;
        self.replicas.write(writer)
    }
}

impl<R: Read> ReadType<R> for VersionRange {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        let begin = i64::read(reader)?;
        let end = i64::read(reader)?;
        if begin >= end {
            return Err(malformed("empty version range"));
        }
        Ok(Self { begin, end })
    }
}

impl<W: Write> WriteType<W> for VersionRange {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        self.begin.write(writer)?;
        self.end.write(writer)
    }
}

impl<R: Read> ReadType<R> for VersionRangeCollection {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        let ranges: Vec<VersionRange> = read_array(reader)?;
        let mut collection = Self::new();
        for range in ranges {
            collection.add_range(range);
        }
        Ok(collection)
    }
}

impl<W: Write> WriteType<W> for VersionRangeCollection {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        write_array(writer, self.ranges())
    }
}

impl<R: Read> ReadType<R> for AddressDetectionFailure {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        Ok(Self {
            service_name: String::read(reader)?,
            kind: ErrorKind::read(reader)?,
            store_version: i64::read(reader)?,
        })
    }
}

impl<W: Write> WriteType<W> for AddressDetectionFailure {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        self.service_name.write(writer)?;
        self.kind.write(writer)?;
        self.store_version.write(writer)
    }
}


#[cfg(test)]
mod tests {
    use super::test_utils::{assert_reversible, assert_roundtrip};
    use super::*;
    use uuid::Uuid;

    #[test]
    fn error_kind_codec() {
        assert_roundtrip(&Some(ErrorKind::Timeout), &[0x00, 0x02]);
        assert_roundtrip(&None::<ErrorKind>, &[0x00, 0x00]);
    }

    #[test]
    fn generation_codec() {
        assert_roundtrip(
            &Generation(1, 2),
            &[
                0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, //
                0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02,
            ],
        );
    }

    #[test]
    fn replica_set_codec() {
        assert_roundtrip(
            &ReplicaSet {
                is_stateful: true,
                is_primary_valid: true,
                primary: Some("p".to_owned()),
                secondaries: vec!["s".to_owned()],
            },
            &[
                0x01, 0x01, //
                0x00, 0x01, b'p', //
                0x00, 0x00, 0x00, 0x01, 0x00, 0x01, b's',
            ],
        );
    }

    #[test]
    fn structured_types_reversible() {
        assert_reversible(&PartitionInfo::Int64Range { low: -5, high: 5 });
        assert_reversible(&PartitionKey::Named("hot".to_owned()));
        assert_reversible(&Psd {
            version: 7,
            scheme: PartitionScheme::UniformInt64Range { low: 0, high: 99 },
            partitions: vec![PartitionDescription {
                cuid: Cuid(Uuid::from_u128(3)),
                info: PartitionInfo::Int64Range { low: 0, high: 99 },
            }],
            is_service_group: false,
        });
        assert_reversible(&Rsp {
            cuid: Cuid(Uuid::from_u128(9)),
            service_name: "fabric:/app/svc".parse().unwrap(),
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
        });

        let mut versions = VersionRangeCollection::new();
        versions.add_range(VersionRange::new(1, 51));
        versions.add(60);
        assert_reversible(&versions);
    }
}
