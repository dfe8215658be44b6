use std::io::{Read, Write};

use crate::protocol::wire::{ReadError, ReadType, WriteError, WriteType};
use crate::types::{PartitionKey, Psd, Rsp, RspVersion};

/// Ask the naming service for a service's partitioned descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetServiceDescriptionRequest {
    pub name: String,
}

impl<R: Read> ReadType<R> for GetServiceDescriptionRequest {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        Ok(Self {
            name: String::read(reader)?,
        })
    }
}

impl<W: Write> WriteType<W> for GetServiceDescriptionRequest {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        self.name.write(writer)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetServiceDescriptionReply {
    pub psd: Psd,
}

impl<R: Read> ReadType<R> for GetServiceDescriptionReply {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        Ok(Self {
            psd: Psd::read(reader)?,
        })
    }
}

impl<W: Write> WriteType<W> for GetServiceDescriptionReply {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        self.psd.write(writer)
    }
}

/// Resolve the current location of one partition.
///
/// `previous_version` asks the naming service for a strictly newer
/// snapshot. `include_psd` also requests the descriptor; a prefix
/// resolution always gets one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveServiceRequest {
    pub name: String,
    pub key: PartitionKey,
    pub previous_version: Option<RspVersion>,
    pub include_psd: bool,
}

impl<R: Read> ReadType<R> for ResolveServiceRequest {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        let name = String::read(reader)?;
        let key = PartitionKey::read(reader)?;
        let previous_version = bool::read(reader)?
            .then(|| RspVersion::read(reader))
            .transpose()?;
        let include_psd = bool::read(reader)?;
        Ok(Self {
            name,
            key,
            previous_version,
            include_psd,
        })
    }
}

impl<W: Write> WriteType<W> for ResolveServiceRequest {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        self.name.write(writer)?;
        self.key.write(writer)?;
        match &self.previous_version {
            Some(version) => {
                true.write(writer)?;
                version.write(writer)?;
            }
            None => false.write(writer)?,
        }
        self.include_psd.write(writer)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveServiceReply {
    pub rsp: Rsp,
    pub psd: Option<Psd>,
}

impl<R: Read> ReadType<R> for ResolveServiceReply {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        let rsp = Rsp::read(reader)?;
        let psd = bool::read(reader)?.then(|| Psd::read(reader)).transpose()?;
        Ok(Self { rsp, psd })
    }
}

impl<W: Write> WriteType<W> for ResolveServiceReply {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        self.rsp.write(writer)?;
        match &self.psd {
            Some(psd) => {
                true.write(writer)?;
                psd.write(writer)
            }
            None => false.write(writer),
        }
    }
}

/// Reply to a prefix resolution: the descriptor of the longest matching
/// registered prefix plus the resolved partition for the request key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixResolveReply {
    pub rsp: Rsp,
    pub psd: Psd,
}

impl<R: Read> ReadType<R> for PrefixResolveReply {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        Ok(Self {
            rsp: Rsp::read(reader)?,
            psd: Psd::read(reader)?,
        })
    }
}

impl<W: Write> WriteType<W> for PrefixResolveReply {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        self.rsp.write(writer)?;
        self.psd.write(writer)
    }
}
