use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::protocol::error::ErrorKind;
use crate::protocol::messages::{FileChunkAck, FileContent, FileTransferMessage};
use crate::transport::Gateway;

#[derive(Debug)]
struct ReceiveHandle {
    chunks_tx: mpsc::UnboundedSender<FileContent>,
}

/// Receiving end of a file push.
///
/// Chunks are drained by a single worker per operation so writes happen in
/// strict sequence order; the file lands in a temp sibling of the
/// destination and is renamed into place on the final chunk.
pub struct FileReceiver {
    gateway: Arc<dyn Gateway>,
    ops: Mutex<HashMap<Uuid, ReceiveHandle>>,
    is_open: AtomicBool,
    temp_seq: AtomicU64,
}

impl std::fmt::Debug for FileReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileReceiver").finish_non_exhaustive()
    }
}

impl FileReceiver {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self {
            gateway,
            ops: Mutex::new(HashMap::new()),
            is_open: AtomicBool::new(true),
            temp_seq: AtomicU64::new(0),
        }
    }

    /// Stop accepting messages; inbound chunks are dropped from here on.
    pub fn close(&self) {
        self.is_open.store(false, Ordering::SeqCst);
    }

    /// Route an inbound content message to its operation. Unknown
    /// operations are refused; messages while closed are dropped.
    pub fn process_message(&self, content: FileContent) {
        if !self.is_open.load(Ordering::SeqCst) {
            debug!(operation_id=%content.operation_id, "receiver closed, dropping chunk");
            return;
        }

        let refused = {
            let ops = self.ops.lock();
            match ops.get(&content.operation_id) {
                Some(handle) => {
                    let operation_id = content.operation_id;
                    handle.chunks_tx.send(content).is_err().then_some(operation_id)
                }
                None => Some(content.operation_id),
            }
        };

        if let Some(operation_id) = refused {
            debug!(%operation_id, "chunk for unknown receive operation");
            self.reply(operation_id, 0, 0, Some(ErrorKind::OperationFailed));
        }
    }

    /// Receive one pushed file into `destination`.
    ///
    /// On success the destination file exists and the temp file is gone;
    /// on any failure neither remains.
    pub async fn begin_receive_file(
        &self,
        operation_id: Uuid,
        destination: PathBuf,
        timeout: Duration,
    ) -> Result<PathBuf, ErrorKind> {
        if !self.is_open.load(Ordering::SeqCst) {
            return Err(ErrorKind::OperationFailed);
        }

        let deadline = Instant::now() + timeout;
        let temp_path = PathBuf::from(format!(
            "{}.{}",
            destination.display(),
            self.temp_seq.fetch_add(1, Ordering::SeqCst)
        ));

        let (chunks_tx, chunks_rx) = mpsc::unbounded_channel();
        {
            let mut ops = self.ops.lock();
            if ops.contains_key(&operation_id) {
                return Err(ErrorKind::InvalidArgument);
            }
            ops.insert(operation_id, ReceiveHandle { chunks_tx });
        }

        let result = self
            .receive_inner(operation_id, &destination, &temp_path, chunks_rx, deadline)
            .await;

        self.ops.lock().remove(&operation_id);
        if result.is_err() {
            let _ = tokio::fs::remove_file(&temp_path).await;
        }
        result
    }

    async fn receive_inner(
        &self,
        operation_id: Uuid,
        destination: &PathBuf,
        temp_path: &PathBuf,
        mut chunks_rx: mpsc::UnboundedReceiver<FileContent>,
        deadline: Instant,
    ) -> Result<PathBuf, ErrorKind> {
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(temp_path)
            .await
            .map_err(|err| {
                warn!(%operation_id, error=%err, "failed to create temp file");
                ErrorKind::OperationFailed
            })?;

        let mut expected_sequence = 0u64;

        loop {
            let wait = deadline
                .checked_duration_since(Instant::now())
                .ok_or(ErrorKind::Timeout)?;

            let content = match tokio::time::timeout(wait, chunks_rx.recv()).await {
                Ok(Some(content)) => content,
                Ok(None) => return Err(ErrorKind::OperationCanceled),
                Err(_) => return Err(ErrorKind::Timeout),
            };

            // out-of-order chunks are refused without writing
            if content.sequence_number != expected_sequence {
                warn!(
                    %operation_id,
                    got = content.sequence_number,
                    expected = expected_sequence,
                    "chunk out of sequence",
                );
                self.reply(
                    operation_id,
                    content.sequence_number,
                    content.buffer.len() as u64,
                    Some(ErrorKind::OperationFailed),
                );
                continue;
            }

            if let Err(err) = file.write_all(&content.buffer).await {
                warn!(%operation_id, error=%err, "chunk write failed");
                self.reply(
                    operation_id,
                    content.sequence_number,
                    content.buffer.len() as u64,
                    Some(ErrorKind::OperationFailed),
                );
                return Err(ErrorKind::OperationFailed);
            }
            expected_sequence += 1;

            if content.is_last {
                file.sync_all().await.map_err(|_| ErrorKind::OperationFailed)?;
                drop(file);
                tokio::fs::rename(temp_path, destination)
                    .await
                    .map_err(|err| {
                        warn!(%operation_id, error=%err, "rename into destination failed");
                        ErrorKind::OperationFailed
                    })?;

                self.reply(
                    operation_id,
                    content.sequence_number,
                    content.buffer.len() as u64,
                    None,
                );
                return Ok(destination.clone());
            }

            self.reply(
                operation_id,
                content.sequence_number,
                content.buffer.len() as u64,
                None,
            );
        }
    }

    /// Fire an ack back through the gateway; delivery is best effort.
    fn reply(&self, operation_id: Uuid, sequence_number: u64, buffer_size: u64, error: Option<ErrorKind>) {
        let gateway = Arc::clone(&self.gateway);
        tokio::spawn(async move {
            let _ = gateway
                .send_file_message(FileTransferMessage::ChunkAck(FileChunkAck {
                    operation_id,
                    sequence_number,
                    buffer_size,
                    error,
                }))
                .await;
        });
    }
}
