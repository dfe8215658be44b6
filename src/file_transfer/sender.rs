use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::{mpsc, Notify, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backoff::{Backoff, BackoffConfig, BackoffError};
use crate::file_transfer::progress::FileTransferProgress;
use crate::protocol::error::ErrorKind;
use crate::protocol::messages::{
    FileContent, FileCreateSessionReply, FileCreateSessionRequest, FileSessionControl,
    FileTransferEvent, FileTransferMessage, FileUploadHeader,
};
use crate::settings::Settings;
use crate::transport::Gateway;

/// Spread applied on top of the chunk retry interval.
const CHUNK_RETRY_JITTER_MS: i64 = 500;

#[derive(Debug)]
struct AckState {
    acked: Vec<bool>,
    acked_count: usize,
    consecutive_unreachable: u32,
    failed: Option<ErrorKind>,
}

struct UploadOperation {
    id: Uuid,
    progress: Arc<dyn FileTransferProgress>,
    cancelled: AtomicBool,
    cancel_notify: Notify,
    acks: Mutex<AckState>,
    /// Notified when the ack set completes or the operation fails.
    acks_notify: Notify,
    create_tx: mpsc::UnboundedSender<FileCreateSessionReply>,
    create_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<FileCreateSessionReply>>,
    commit_tx: mpsc::UnboundedSender<Option<ErrorKind>>,
    commit_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Option<ErrorKind>>>,
    upload_tx: mpsc::UnboundedSender<Option<ErrorKind>>,
    upload_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Option<ErrorKind>>>,
}

impl std::fmt::Debug for UploadOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadOperation")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl UploadOperation {
    fn new(id: Uuid, progress: Arc<dyn FileTransferProgress>) -> Self {
        let (create_tx, create_rx) = mpsc::unbounded_channel();
        let (commit_tx, commit_rx) = mpsc::unbounded_channel();
        let (upload_tx, upload_rx) = mpsc::unbounded_channel();
        Self {
            id,
            progress,
            cancelled: AtomicBool::new(false),
            cancel_notify: Notify::new(),
            acks: Mutex::new(AckState {
                acked: Vec::new(),
                acked_count: 0,
                consecutive_unreachable: 0,
                failed: None,
            }),
            acks_notify: Notify::new(),
            create_tx,
            create_rx: tokio::sync::Mutex::new(create_rx),
            commit_tx,
            commit_rx: tokio::sync::Mutex::new(commit_rx),
            upload_tx,
            upload_rx: tokio::sync::Mutex::new(upload_rx),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.cancel_notify.notify_waiters();
        self.acks_notify.notify_waiters();
    }

    fn reset_acks(&self, total_chunks: usize) {
        let mut acks = self.acks.lock();
        acks.acked = vec![false; total_chunks];
        acks.acked_count = 0;
        acks.consecutive_unreachable = 0;
        acks.failed = None;
    }

    fn is_acked(&self, sequence_number: u64) -> bool {
        let acks = self.acks.lock();
        acks.acked
            .get(sequence_number as usize)
            .copied()
            .unwrap_or(false)
    }

    fn all_acked(&self) -> bool {
        let acks = self.acks.lock();
        !acks.acked.is_empty() && acks.acked_count == acks.acked.len()
    }

    fn failure(&self) -> Option<ErrorKind> {
        self.acks.lock().failed
    }

    fn unacked(&self) -> Vec<u64> {
        let acks = self.acks.lock();
        acks.acked
            .iter()
            .enumerate()
            .filter(|(_, acked)| !**acked)
            .map(|(seq, _)| seq as u64)
            .collect()
    }
}

/// Upload engine.
///
/// One instance serves every upload of a client; per-operation state lives
/// in the operation map until the upload completes or fails.
pub struct FileSender {
    gateway: Arc<dyn Gateway>,
    settings: Arc<Settings>,
    ops: Mutex<HashMap<Uuid, Arc<UploadOperation>>>,
    /// Sticky sender-wide downgrade to the single-file protocol.
    single_file_only: AtomicBool,
    consecutive_connect_failures: AtomicU32,
    chunk_upload_succeeded_once: AtomicBool,
}

impl std::fmt::Debug for FileSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSender").finish_non_exhaustive()
    }
}

impl FileSender {
    pub fn new(gateway: Arc<dyn Gateway>, settings: Arc<Settings>) -> Self {
        Self {
            gateway,
            settings,
            ops: Mutex::new(HashMap::new()),
            single_file_only: AtomicBool::new(false),
            consecutive_connect_failures: AtomicU32::new(0),
            chunk_upload_succeeded_once: AtomicBool::new(false),
        }
    }

    /// Whether the sender has downgraded every upload to the single-file
    /// protocol.
    pub fn is_single_file_only(&self) -> bool {
        self.single_file_only.load(Ordering::SeqCst)
    }

    /// Route a gateway event to its operation; returns false for unknown
    /// operations.
    pub fn process_event(&self, event: &FileTransferEvent) -> bool {
        let op = {
            let ops = self.ops.lock();
            ops.get(&event.operation_id()).map(Arc::clone)
        };
        let Some(op) = op else {
            return false;
        };

        match event {
            FileTransferEvent::CreateSessionReply(reply) => {
                let _ = op.create_tx.send(*reply);
            }
            FileTransferEvent::ChunkAck(ack) => {
                self.process_ack(&op, ack.sequence_number, ack.buffer_size, ack.error)
            }
            FileTransferEvent::CommitReply { error, .. } => {
                let _ = op.commit_tx.send(*error);
            }
            FileTransferEvent::UploadReply { error, .. } => {
                let _ = op.upload_tx.send(*error);
            }
            FileTransferEvent::Content(_) => return false,
        }
        true
    }

    fn process_ack(
        &self,
        op: &Arc<UploadOperation>,
        sequence_number: u64,
        buffer_size: u64,
        error: Option<ErrorKind>,
    ) {
        let mut acks = op.acks.lock();
        match error {
            None => {
                acks.consecutive_unreachable = 0;
                if let Some(acked) = acks.acked.get_mut(sequence_number as usize) {
                    if !*acked {
                        *acked = true;
                        acks.acked_count += 1;
                        op.progress.increment_transfer_completed_items(buffer_size);
                    }
                }
                if acks.acked_count == acks.acked.len() {
                    op.acks_notify.notify_waiters();
                }
            }
            // the request is still in flight at the gateway
            Some(kind) if kind.is_retryable_transport() => {
                debug!(operation_id=%op.id, sequence_number, error=%kind, "ignoring transient chunk ack");
            }
            Some(ErrorKind::GatewayUnreachable) => {
                acks.consecutive_unreachable += 1;
                if acks.consecutive_unreachable > self.settings.gateway_not_reachable_threshold_limit {
                    warn!(operation_id=%op.id, "gateway unreachable beyond threshold, failing upload");
                    acks.failed = Some(ErrorKind::GatewayUnreachable);
                    drop(acks);
                    op.cancel();
                }
            }
            Some(kind) => {
                warn!(operation_id=%op.id, sequence_number, error=%kind, "chunk rejected, failing upload");
                acks.failed = Some(kind);
                drop(acks);
                op.cancel();
            }
        }
    }

    /// Cancel an in-flight upload.
    pub fn cancel(&self, operation_id: Uuid) {
        let op = {
            let ops = self.ops.lock();
            ops.get(&operation_id).map(Arc::clone)
        };
        if let Some(op) = op {
            op.cancel();
        }
    }

    /// Upload `source` to `store_relative_path` of the target service's
    /// file store.
    #[allow(clippy::too_many_arguments)]
    pub async fn upload_file(
        self: &Arc<Self>,
        operation_id: Uuid,
        service_name: &str,
        source: &Path,
        store_relative_path: &str,
        overwrite: bool,
        use_chunk_based: bool,
        progress: Arc<dyn FileTransferProgress>,
        timeout: Duration,
    ) -> Result<(), ErrorKind> {
        let deadline = Instant::now() + timeout;
        let file_size = tokio::fs::metadata(source)
            .await
            .map_err(|_| ErrorKind::NotFound)?
            .len();

        progress.increment_total_files(1);

        let op = Arc::new(UploadOperation::new(operation_id, Arc::clone(&progress)));
        {
            let mut ops = self.ops.lock();
            if ops.contains_key(&operation_id) {
                return Err(ErrorKind::InvalidArgument);
            }
            ops.insert(operation_id, Arc::clone(&op));
        }

        let result = self
            .upload_inner(
                &op,
                service_name,
                source,
                store_relative_path,
                overwrite,
                use_chunk_based,
                file_size,
                progress,
                deadline,
            )
            .await;

        self.ops.lock().remove(&operation_id);
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn upload_inner(
        self: &Arc<Self>,
        op: &Arc<UploadOperation>,
        service_name: &str,
        source: &Path,
        store_relative_path: &str,
        overwrite: bool,
        use_chunk_based: bool,
        file_size: u64,
        progress: Arc<dyn FileTransferProgress>,
        deadline: Instant,
    ) -> Result<(), ErrorKind> {
        let mut chunk_mode = use_chunk_based && !self.is_single_file_only();
        let mut confirm_expired_failures = 0u32;

        if chunk_mode {
            let mut resend_attempt = 0u32;
            loop {
                match self
                    .upload_chunked(
                        op,
                        service_name,
                        source,
                        store_relative_path,
                        overwrite,
                        file_size,
                        Arc::clone(&progress),
                        deadline,
                    )
                    .await
                {
                    Ok(()) => return Ok(()),
                    Err(ErrorKind::ConnectionConfirmWaitExpired) => {
                        confirm_expired_failures += 1;
                        let connect_failures = self
                            .consecutive_connect_failures
                            .fetch_add(1, Ordering::SeqCst)
                            + 1;

                        if connect_failures >= self.settings.switch_upload_protocol_threshold {
                            info!(
                                connect_failures,
                                "downgrading every upload to the single-file protocol",
                            );
                            self.single_file_only.store(true, Ordering::SeqCst);
                            chunk_mode = false;
                        } else if !self.chunk_upload_succeeded_once.load(Ordering::SeqCst)
                            && confirm_expired_failures
                                >= self.settings.switch_upload_protocol_resend_retry_attempt
                        {
                            info!(operation_id=%op.id, "downgrading this upload to the single-file protocol");
                            chunk_mode = false;
                        }

                        if !chunk_mode {
                            break;
                        }
                    }
                    Err(kind) if kind.is_chunk_commit_retryable() => {
                        resend_attempt += 1;
                        if resend_attempt > self.settings.file_upload_resend_retry_attempt {
                            self.delete_session(op.id).await;
                            return Err(kind);
                        }
                        info!(
                            operation_id=%op.id,
                            error=%kind,
                            resend_attempt,
                            "re-uploading whole file after retryable commit failure",
                        );
                    }
                    Err(kind) => {
                        self.delete_session(op.id).await;
                        return Err(kind);
                    }
                }

                if Instant::now() >= deadline {
                    self.delete_session(op.id).await;
                    return Err(ErrorKind::Timeout);
                }
            }
        }

        self.upload_single_file(
            op,
            service_name,
            source,
            store_relative_path,
            overwrite,
            file_size,
            progress,
            deadline,
        )
        .await
    }

    /// Chunk-based protocol: create session, flow-controlled chunk sends,
    /// resend rounds, then the commit handshake.
    #[allow(clippy::too_many_arguments)]
    async fn upload_chunked(
        self: &Arc<Self>,
        op: &Arc<UploadOperation>,
        service_name: &str,
        source: &Path,
        store_relative_path: &str,
        overwrite: bool,
        file_size: u64,
        progress: Arc<dyn FileTransferProgress>,
        deadline: Instant,
    ) -> Result<(), ErrorKind> {
        let max_chunk_size = self
            .create_session(op, service_name, store_relative_path, overwrite, file_size, deadline)
            .await?;
        self.consecutive_connect_failures.store(0, Ordering::SeqCst);

        let max_chunk_size = max_chunk_size.min(self.settings.message_content_threshold() as u64).max(1);
        let total_chunks = file_size.div_ceil(max_chunk_size).max(1);

        op.reset_acks(total_chunks as usize);
        progress.increment_total_transfer_items(file_size);

        // Flow control: a fixed number of chunk sends is released up
        // front, the batch timer tops the budget up periodically.
        let release = Arc::new(Semaphore::new(
            self.settings.max_allowed_pending_file_chunk_send_before_next_batch,
        ));
        let workers = Arc::new(Semaphore::new(self.settings.max_file_chunk_sender_threads));

        let batch_timer = {
            let release = Arc::clone(&release);
            let interval = self.settings.file_chunk_batch_upload_interval;
            let batch = self.settings.file_chunk_batch_count;
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(interval).await;
                    release.add_permits(batch);
                }
            })
        };

        let mut tasks = Vec::with_capacity(total_chunks as usize);
        for sequence_number in 0..total_chunks {
            let sender = Arc::clone(self);
            let op = Arc::clone(op);
            let release = Arc::clone(&release);
            let workers = Arc::clone(&workers);
            let source = source.to_path_buf();

            tasks.push(tokio::spawn(async move {
                // the released budget is not returned; the batch timer
                // replenishes it
                let released = tokio::select! {
                    permit = release.acquire() => match permit {
                        Ok(permit) => {
                            permit.forget();
                            true
                        }
                        Err(_) => false,
                    },
                    _ = op.cancel_notify.notified() => false,
                };
                if !released || op.is_cancelled() {
                    return;
                }

                let _worker = workers.acquire().await;
                sender
                    .send_chunk(&op, &source, sequence_number, max_chunk_size, file_size)
                    .await;
            }));
        }

        for task in tasks {
            let _ = task.await;
        }

        // Resend rounds for whatever is still unacknowledged.
        let mut resend_round = 0u32;
        while !op.all_acked() {
            if let Some(kind) = op.failure() {
                batch_timer.abort();
                return Err(kind);
            }
            if op.is_cancelled() {
                batch_timer.abort();
                return Err(ErrorKind::OperationCanceled);
            }
            if resend_round >= self.settings.file_chunk_resend_retry_attempt {
                batch_timer.abort();
                return Err(ErrorKind::Timeout);
            }
            if Instant::now() >= deadline {
                batch_timer.abort();
                return Err(ErrorKind::Timeout);
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.file_chunk_resend_wait_interval) => {}
                _ = op.acks_notify.notified() => {}
            }

            resend_round += 1;
            for sequence_number in op.unacked() {
                if op.is_cancelled() || op.failure().is_some() {
                    break;
                }
                debug!(operation_id=%op.id, sequence_number, resend_round, "resending chunk");
                self.send_chunk(op, source, sequence_number, max_chunk_size, file_size)
                    .await;
            }
        }

        batch_timer.abort();

        if let Some(kind) = op.failure() {
            return Err(kind);
        }

        self.commit(op, deadline).await?;

        self.chunk_upload_succeeded_once.store(true, Ordering::SeqCst);
        progress.increment_replicated_files(1);
        Ok(())
    }

    /// Create-session handshake. The response wait window stays short
    /// until some chunk upload has ever succeeded, so a cluster without
    /// chunk support is detected promptly.
    async fn create_session(
        &self,
        op: &Arc<UploadOperation>,
        service_name: &str,
        store_relative_path: &str,
        overwrite: bool,
        file_size: u64,
        deadline: Instant,
    ) -> Result<u64, ErrorKind> {
        let window = if self.chunk_upload_succeeded_once.load(Ordering::SeqCst) {
            self.settings.file_create_message_response_wait_interval
        } else {
            self.settings.file_create_message_initial_response_wait_interval
        };
        let started = Instant::now();

        let request = FileCreateSessionRequest {
            operation_id: op.id,
            service_name: service_name.to_owned(),
            store_relative_path: store_relative_path.to_owned(),
            overwrite,
            file_size,
        };

        let mut create_rx = op.create_rx.lock().await;

        for attempt in 1..=self.settings.file_create_send_attempt {
            if op.is_cancelled() {
                return Err(ErrorKind::OperationCanceled);
            }
            if Instant::now() >= deadline {
                return Err(ErrorKind::Timeout);
            }

            if let Err(kind) = self
                .gateway
                .send_file_message(FileTransferMessage::CreateSession(request.clone()))
                .await
            {
                debug!(operation_id=%op.id, attempt, error=%kind, "create-session send failed");
            }

            let wait = self
                .settings
                .file_create_send_retry_interval
                .min(deadline.saturating_duration_since(Instant::now()));

            match tokio::time::timeout(wait, create_rx.recv()).await {
                Ok(Some(reply)) => {
                    return match reply.error {
                        None => Ok(reply.max_chunk_size),
                        Some(kind) => Err(kind),
                    };
                }
                Ok(None) => return Err(ErrorKind::OperationCanceled),
                Err(_) => {
                    if started.elapsed() >= window || Instant::now() >= deadline {
                        return Err(ErrorKind::ConnectionConfirmWaitExpired);
                    }
                }
            }
        }

        Err(ErrorKind::ConnectionConfirmWaitExpired)
    }

    /// Send one chunk, retrying transient transport errors with jitter.
    async fn send_chunk(
        &self,
        op: &Arc<UploadOperation>,
        source: &Path,
        sequence_number: u64,
        max_chunk_size: u64,
        file_size: u64,
    ) {
        if op.is_acked(sequence_number) || op.is_cancelled() {
            return;
        }

        let start_offset = sequence_number * max_chunk_size;
        let chunk_len = max_chunk_size.min(file_size - start_offset) as usize;

        let buffer = match read_chunk(source, start_offset, chunk_len).await {
            Ok(buffer) => buffer,
            Err(err) => {
                warn!(operation_id=%op.id, sequence_number, error=%err, "failed to read chunk");
                let mut acks = op.acks.lock();
                acks.failed = Some(ErrorKind::OperationFailed);
                drop(acks);
                op.cancel();
                return;
            }
        };

        let message = FileContent {
            operation_id: op.id,
            sequence_number,
            is_last: false,
            upload_header: None,
            buffer,
        };

        for attempt in 1..=self.settings.file_chunk_retry_attempt {
            if op.is_acked(sequence_number) || op.is_cancelled() {
                return;
            }

            match self
                .gateway
                .send_file_message(FileTransferMessage::Content(message.clone()))
                .await
            {
                Ok(()) => return,
                Err(kind) if kind.is_retryable_transport() => {
                    debug!(
                        operation_id=%op.id,
                        sequence_number,
                        attempt,
                        error=%kind,
                        "chunk send backpressure, retrying",
                    );
                    tokio::time::sleep(jittered(self.settings.file_chunk_retry_interval)).await;
                }
                Err(kind) => {
                    warn!(operation_id=%op.id, sequence_number, error=%kind, "chunk send failed");
                    let mut acks = op.acks.lock();
                    acks.failed = Some(kind);
                    drop(acks);
                    op.cancel();
                    return;
                }
            }
        }
    }

    /// Commit handshake; the n-th wait is n times the base interval.
    async fn commit(&self, op: &Arc<UploadOperation>, deadline: Instant) -> Result<(), ErrorKind> {
        let mut commit_rx = op.commit_rx.lock().await;

        for attempt in 1..=self.settings.file_upload_commit_retry_attempt {
            if op.is_cancelled() {
                return Err(ErrorKind::OperationCanceled);
            }
            if Instant::now() >= deadline {
                return Err(ErrorKind::Timeout);
            }

            if let Err(kind) = self
                .gateway
                .send_file_message(FileTransferMessage::Commit(FileSessionControl {
                    operation_id: op.id,
                }))
                .await
            {
                debug!(operation_id=%op.id, attempt, error=%kind, "commit send failed");
            }

            let wait = self.settings.file_upload_commit_retry_interval * attempt;
            match tokio::time::timeout(wait, commit_rx.recv()).await {
                Ok(Some(None)) => {
                    // best-effort: the gateway re-sends the commit reply if
                    // the ack is lost
                    let _ = self
                        .gateway
                        .send_file_message(FileTransferMessage::CommitAck(FileSessionControl {
                            operation_id: op.id,
                        }))
                        .await;
                    return Ok(());
                }
                Ok(Some(Some(kind))) => return Err(kind),
                Ok(None) => return Err(ErrorKind::OperationCanceled),
                Err(_) => continue,
            }
        }

        Err(ErrorKind::Timeout)
    }

    async fn delete_session(&self, operation_id: Uuid) {
        let _ = self
            .gateway
            .send_file_message(FileTransferMessage::DeleteSession(FileSessionControl {
                operation_id,
            }))
            .await;
    }

    /// Single-file protocol: buffers of at most the content threshold,
    /// sent in sequence, the first carrying the upload header.
    #[allow(clippy::too_many_arguments)]
    async fn upload_single_file(
        &self,
        op: &Arc<UploadOperation>,
        service_name: &str,
        source: &Path,
        store_relative_path: &str,
        overwrite: bool,
        file_size: u64,
        progress: Arc<dyn FileTransferProgress>,
        deadline: Instant,
    ) -> Result<(), ErrorKind> {
        progress.increment_total_transfer_items(file_size);

        let buffer_size = self.settings.message_content_threshold() as u64;
        let total_buffers = file_size.div_ceil(buffer_size).max(1);

        let mut file = tokio::fs::File::open(source)
            .await
            .map_err(|_| ErrorKind::NotFound)?;

        for sequence_number in 0..total_buffers {
            if op.is_cancelled() {
                return Err(ErrorKind::OperationCanceled);
            }
            if Instant::now() >= deadline {
                return Err(ErrorKind::Timeout);
            }

            let len = buffer_size.min(file_size - sequence_number * buffer_size) as usize;
            let mut buffer = vec![0u8; len];
            file.read_exact(&mut buffer)
                .await
                .map_err(|_| ErrorKind::OperationFailed)?;

            let message = FileContent {
                operation_id: op.id,
                sequence_number,
                is_last: sequence_number + 1 == total_buffers,
                upload_header: (sequence_number == 0).then(|| FileUploadHeader {
                    service_name: service_name.to_owned(),
                    store_relative_path: store_relative_path.to_owned(),
                    overwrite,
                }),
                buffer: Bytes::from(buffer),
            };

            let gateway = &self.gateway;
            let mut backoff = Backoff::new(&BackoffConfig {
                deadline: Some(deadline.saturating_duration_since(Instant::now())),
                ..Default::default()
            });
            backoff
                .retry_with_backoff("file_content", || {
                    let message = message.clone();
                    async move {
                        match gateway
                            .send_file_message(FileTransferMessage::Content(message))
                            .await
                        {
                            Ok(()) => std::ops::ControlFlow::Break(Ok(())),
                            Err(kind) if kind.is_retryable_transport() => {
                                std::ops::ControlFlow::Continue(kind)
                            }
                            Err(kind) => std::ops::ControlFlow::Break(Err(kind)),
                        }
                    }
                })
                .await
                .map_err(BackoffError::into_inner)?;

            progress.increment_transfer_completed_items(len as u64);
        }

        // the gateway replies once for the whole upload
        let mut upload_rx = op.upload_rx.lock().await;
        let wait = deadline.saturating_duration_since(Instant::now());
        match tokio::time::timeout(wait, upload_rx.recv()).await {
            Ok(Some(None)) => {
                progress.increment_replicated_files(1);
                Ok(())
            }
            Ok(Some(Some(kind))) => Err(kind),
            Ok(None) => Err(ErrorKind::OperationCanceled),
            Err(_) => Err(ErrorKind::Timeout),
        }
    }
}

async fn read_chunk(source: &Path, offset: u64, len: usize) -> std::io::Result<Bytes> {
    let mut file = tokio::fs::File::open(source).await?;
    file.seek(std::io::SeekFrom::Start(offset)).await?;
    let mut buffer = vec![0u8; len];
    file.read_exact(&mut buffer).await?;
    Ok(Bytes::from(buffer))
}

fn jittered(base: Duration) -> Duration {
    let jitter = rand::thread_rng().gen_range(-CHUNK_RETRY_JITTER_MS..=CHUNK_RETRY_JITTER_MS);
    let millis = (base.as_millis() as i64 + jitter).max(0);
    Duration::from_millis(millis as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_close_to_base() {
        let base = Duration::from_secs(1);
        for _ in 0..100 {
            let d = jittered(base);
            assert!(d >= Duration::from_millis(500));
            assert!(d <= Duration::from_millis(1500));
        }
    }

    #[test]
    fn unacked_tracks_holes() {
        let op = UploadOperation::new(Uuid::from_u128(1), Arc::new(crate::file_transfer::NoProgress));
        op.reset_acks(3);
        assert_eq!(op.unacked(), vec![0, 1, 2]);
        assert!(!op.all_acked());

        {
            let mut acks = op.acks.lock();
            acks.acked[0] = true;
            acks.acked[2] = true;
            acks.acked_count = 2;
        }
        assert_eq!(op.unacked(), vec![1]);
        assert!(op.is_acked(0));
        assert!(!op.is_acked(1));
        assert!(!op.all_acked());
    }
}
