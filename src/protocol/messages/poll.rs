use std::io::{Read, Write};

use crate::protocol::error::ErrorKind;
use crate::protocol::wire::{read_array, write_array, ReadError, ReadType, WriteError, WriteType};
use crate::types::{AddressDetectionFailure, Cuid, PartitionKey, Rsp, RspVersion};

/// Last resolution a tracker has seen for one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreviousResolve {
    pub cuid: Cuid,
    pub version: RspVersion,
}

impl<R: Read> ReadType<R> for PreviousResolve {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        Ok(Self {
            cuid: Cuid::read(reader)?,
            version: RspVersion::read(reader)?,
        })
    }
}

impl<W: Write> WriteType<W> for PreviousResolve {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        self.cuid.write(writer)?;
        self.version.write(writer)
    }
}

/// One tracker's poll entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollRequestEntry {
    pub name: String,
    pub key: PartitionKey,
    pub previous_resolves: Vec<PreviousResolve>,
    pub previous_error: Option<ErrorKind>,
}

impl PollRequestEntry {
    /// Rough serialized size, used when splitting a poll into batches.
    pub fn estimated_size(&self) -> usize {
        // name + key + resolve entries + error code
        self.name.len() + 16 + self.previous_resolves.len() * 48 + 2
    }
}

impl<R: Read> ReadType<R> for PollRequestEntry {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        Ok(Self {
            name: String::read(reader)?,
            key: PartitionKey::read(reader)?,
            previous_resolves: read_array(reader)?,
            previous_error: Option::<ErrorKind>::read(reader)?,
        })
    }
}

impl<W: Write> WriteType<W> for PollRequestEntry {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        self.name.write(writer)?;
        self.key.write(writer)?;
        write_array(writer, &self.previous_resolves)?;
        self.previous_error.write(writer)
    }
}

/// One size-bounded batch of a location-change poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationChangePollRequest {
    pub requests: Vec<PollRequestEntry>,
}

impl<R: Read> ReadType<R> for LocationChangePollRequest {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        Ok(Self {
            requests: read_array(reader)?,
        })
    }
}

impl<W: Write> WriteType<W> for LocationChangePollRequest {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        write_array(writer, &self.requests)
    }
}

/// Poll reply. `first_non_processed_request_index` is set when the gateway
/// ran out of room; the next poll resumes from there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationChangePollReply {
    pub partitions: Vec<Rsp>,
    pub failures: Vec<AddressDetectionFailure>,
    pub first_non_processed_request_index: Option<u64>,
}

impl<R: Read> ReadType<R> for LocationChangePollReply {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        let partitions = read_array(reader)?;
        let failures = read_array(reader)?;
        let raw_index = i64::read(reader)?;
        let first_non_processed_request_index = (raw_index >= 0).then_some(raw_index as u64);
        Ok(Self {
            partitions,
            failures,
            first_non_processed_request_index,
        })
    }
}

impl<W: Write> WriteType<W> for LocationChangePollReply {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        write_array(writer, &self.partitions)?;
        write_array(writer, &self.failures)?;
        let raw_index = self
            .first_non_processed_request_index
            .map(|i| i as i64)
            .unwrap_or(-1);
        raw_index.write(writer)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::assert_reversible;
    use super::*;
    use crate::types::Generation;
    use uuid::Uuid;

    #[test]
    fn poll_messages_reversible() {
        assert_reversible(&LocationChangePollRequest {
            requests: vec![PollRequestEntry {
                name: "fabric:/svc".to_owned(),
                key: PartitionKey::Int64(5),
                previous_resolves: vec![PreviousResolve {
                    cuid: Cuid(Uuid::from_u128(1)),
                    version: RspVersion {
                        generation: Generation(1, 1),
                        fm_version: 10,
                        store_version: 100,
                    },
                }],
                previous_error: Some(ErrorKind::ServiceOffline),
            }],
        });

        assert_reversible(&LocationChangePollReply {
            partitions: vec![],
            failures: vec![AddressDetectionFailure {
                service_name: "fabric:/svc".to_owned(),
                kind: ErrorKind::UserServiceNotFound,
                store_version: 100,
            }],
            first_non_processed_request_index: Some(3),
        });

        assert_reversible(&LocationChangePollReply {
            partitions: vec![],
            failures: vec![],
            first_non_processed_request_index: None,
        });
    }

    #[test]
    fn estimated_size_grows_with_resolves() {
        let mut entry = PollRequestEntry {
            name: "fabric:/svc".to_owned(),
            key: PartitionKey::None,
            previous_resolves: vec![],
            previous_error: None,
        };
        let empty = entry.estimated_size();
        entry.previous_resolves.push(PreviousResolve {
            cuid: Cuid(Uuid::from_u128(1)),
            version: RspVersion {
                generation: Generation(0, 0),
                fm_version: 0,
                store_version: 0,
            },
        });
        assert!(entry.estimated_size() > empty);
    }
}
