//! Chunked file transfer.
//!
//! [`FileSender`] pushes files to the cluster file store, preferring the
//! chunk-based protocol (flow-controlled batches, per-chunk retry, commit
//! handshake) and downgrading to the single-file protocol when the cluster
//! does not confirm chunk support. [`FileReceiver`] assembles inbound
//! chunks into a file through a temp-file-then-rename step.
//! [`FileTransferClient`] owns both and routes gateway events to the
//! operation they belong to.

mod progress;
mod receiver;
mod sender;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;
use uuid::Uuid;

use crate::protocol::error::ErrorKind;
use crate::protocol::messages::FileTransferEvent;
use crate::settings::Settings;
use crate::transport::Gateway;

pub use progress::{FileTransferProgress, NoProgress};
pub use receiver::FileReceiver;
pub use sender::FileSender;

/// Owns the sender/receiver pair and dispatches gateway events to the
/// operation they belong to.
#[derive(Debug)]
pub struct FileTransferClient {
    sender: Arc<FileSender>,
    receiver: Arc<FileReceiver>,
}

impl FileTransferClient {
    pub fn new(gateway: Arc<dyn Gateway>, settings: Arc<Settings>) -> Self {
        Self {
            sender: Arc::new(FileSender::new(Arc::clone(&gateway), settings)),
            receiver: Arc::new(FileReceiver::new(gateway)),
        }
    }

    pub fn sender(&self) -> &Arc<FileSender> {
        &self.sender
    }

    pub fn receiver(&self) -> &Arc<FileReceiver> {
        &self.receiver
    }

    /// Upload a local file to the cluster file store.
    #[allow(clippy::too_many_arguments)]
    pub async fn upload_file(
        &self,
        operation_id: Uuid,
        service_name: &str,
        source: &Path,
        store_relative_path: &str,
        overwrite: bool,
        use_chunk_based: bool,
        progress: Arc<dyn FileTransferProgress>,
        timeout: Duration,
    ) -> Result<(), ErrorKind> {
        self.sender
            .upload_file(
                operation_id,
                service_name,
                source,
                store_relative_path,
                overwrite,
                use_chunk_based,
                progress,
                timeout,
            )
            .await
    }

    /// Receive a file pushed by the cluster into `destination`.
    pub async fn begin_receive_file(
        &self,
        operation_id: Uuid,
        destination: PathBuf,
        timeout: Duration,
    ) -> Result<PathBuf, ErrorKind> {
        self.receiver
            .begin_receive_file(operation_id, destination, timeout)
            .await
    }

    /// Entry point for everything the gateway sends back.
    pub fn process_event(&self, event: FileTransferEvent) {
        match event {
            FileTransferEvent::Content(content) => self.receiver.process_message(content),
            other => {
                if !self.sender.process_event(&other) {
                    debug!(
                        operation_id=%other.operation_id(),
                        "event for unknown file transfer operation",
                    );
                }
            }
        }
    }
}
