use std::io::{Read, Write};

use bytes::Bytes;
use uuid::Uuid;

use crate::protocol::error::ErrorKind;
use crate::protocol::wire::{ReadError, ReadType, WriteError, WriteType};

impl<R: Read> ReadType<R> for Bytes {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        Ok(Self::from(Vec::<u8>::read(reader)?))
    }
}

impl<W: Write> WriteType<W> for Bytes {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        let len = i32::try_from(self.len())?;
        len.write(writer)?;
        writer.write_all(self)?;
        Ok(())
    }
}

/// Open an upload session for a chunk-based transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCreateSessionRequest {
    pub operation_id: Uuid,
    pub service_name: String,
    pub store_relative_path: String,
    pub overwrite: bool,
    pub file_size: u64,
}

impl<R: Read> ReadType<R> for FileCreateSessionRequest {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        Ok(Self {
            operation_id: Uuid::read(reader)?,
            service_name: String::read(reader)?,
            store_relative_path: String::read(reader)?,
            overwrite: bool::read(reader)?,
            file_size: u64::read(reader)?,
        })
    }
}

impl<W: Write> WriteType<W> for FileCreateSessionRequest {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        self.operation_id.write(writer)?;
        self.service_name.write(writer)?;
        self.store_relative_path.write(writer)?;
        self.overwrite.write(writer)?;
        self.file_size.write(writer)
    }
}

/// Session reply; the gateway dictates the chunk size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileCreateSessionReply {
    pub operation_id: Uuid,
    pub error: Option<ErrorKind>,
    pub max_chunk_size: u64,
}

impl<R: Read> ReadType<R> for FileCreateSessionReply {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        Ok(Self {
            operation_id: Uuid::read(reader)?,
            error: Option::<ErrorKind>::read(reader)?,
            max_chunk_size: u64::read(reader)?,
        })
    }
}

impl<W: Write> WriteType<W> for FileCreateSessionReply {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        self.operation_id.write(writer)?;
        self.error.write(writer)?;
        self.max_chunk_size.write(writer)
    }
}

/// Header carried by the first message of a single-file upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUploadHeader {
    pub service_name: String,
    pub store_relative_path: String,
    pub overwrite: bool,
}

impl<R: Read> ReadType<R> for FileUploadHeader {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        Ok(Self {
            service_name: String::read(reader)?,
            store_relative_path: String::read(reader)?,
            overwrite: bool::read(reader)?,
        })
    }
}

impl<W: Write> WriteType<W> for FileUploadHeader {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        self.service_name.write(writer)?;
        self.store_relative_path.write(writer)?;
        self.overwrite.write(writer)
    }
}

/// One content message: a chunk (chunk-based mode) or a buffer slice
/// (single-file mode, where the first message carries the upload header).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    pub operation_id: Uuid,
    pub sequence_number: u64,
    pub is_last: bool,
    pub upload_header: Option<FileUploadHeader>,
    pub buffer: Bytes,
}

impl<R: Read> ReadType<R> for FileContent {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        let operation_id = Uuid::read(reader)?;
        let sequence_number = u64::read(reader)?;
        let is_last = bool::read(reader)?;
        let upload_header = bool::read(reader)?
            .then(|| FileUploadHeader::read(reader))
            .transpose()?;
        let buffer = Bytes::read(reader)?;
        Ok(Self {
            operation_id,
            sequence_number,
            is_last,
            upload_header,
            buffer,
        })
    }
}

impl<W: Write> WriteType<W> for FileContent {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        self.operation_id.write(writer)?;
        self.sequence_number.write(writer)?;
        self.is_last.write(writer)?;
        match &self.upload_header {
            Some(header) => {
                true.write(writer)?;
                header.write(writer)?;
            }
            None => false.write(writer)?,
        }
        self.buffer.write(writer)
    }
}

/// Per-chunk acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileChunkAck {
    pub operation_id: Uuid,
    pub sequence_number: u64,
    pub buffer_size: u64,
    pub error: Option<ErrorKind>,
}

impl<R: Read> ReadType<R> for FileChunkAck {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        Ok(Self {
            operation_id: Uuid::read(reader)?,
            sequence_number: u64::read(reader)?,
            buffer_size: u64::read(reader)?,
            error: Option::<ErrorKind>::read(reader)?,
        })
    }
}

impl<W: Write> WriteType<W> for FileChunkAck {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        self.operation_id.write(writer)?;
        self.sequence_number.write(writer)?;
        self.buffer_size.write(writer)?;
        self.error.write(writer)
    }
}

/// Commit / commit-ack / delete-session carry only the operation id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSessionControl {
    pub operation_id: Uuid,
}

impl<R: Read> ReadType<R> for FileSessionControl {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        Ok(Self {
            operation_id: Uuid::read(reader)?,
        })
    }
}

impl<W: Write> WriteType<W> for FileSessionControl {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        self.operation_id.write(writer)
    }
}

/// Messages a client sends towards the file store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileTransferMessage {
    CreateSession(FileCreateSessionRequest),
    Content(FileContent),
    Commit(FileSessionControl),
    CommitAck(FileSessionControl),
    DeleteSession(FileSessionControl),
    /// Acks flow this way too when this side is the receiving end of a
    /// download.
    ChunkAck(FileChunkAck),
}

impl FileTransferMessage {
    pub fn operation_id(&self) -> Uuid {
        match self {
            Self::CreateSession(m) => m.operation_id,
            Self::Content(m) => m.operation_id,
            Self::Commit(m) | Self::CommitAck(m) | Self::DeleteSession(m) => m.operation_id,
            Self::ChunkAck(m) => m.operation_id,
        }
    }
}

/// Events a client receives back from the file store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileTransferEvent {
    CreateSessionReply(FileCreateSessionReply),
    ChunkAck(FileChunkAck),
    /// Outcome of a commit request.
    CommitReply { operation_id: Uuid, error: Option<ErrorKind> },
    /// Outcome of a whole single-file upload.
    UploadReply { operation_id: Uuid, error: Option<ErrorKind> },
    /// An inbound chunk when this side is the receiving end of a download.
    Content(FileContent),
}

impl FileTransferEvent {
    pub fn operation_id(&self) -> Uuid {
        match self {
            Self::CreateSessionReply(m) => m.operation_id,
            Self::ChunkAck(m) => m.operation_id,
            Self::CommitReply { operation_id, .. } | Self::UploadReply { operation_id, .. } => {
                *operation_id
            }
            Self::Content(m) => m.operation_id,
        }
    }
}
