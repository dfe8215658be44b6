//! Client settings.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Fraction of [`Settings::max_message_size`] that may be spent on message
/// content; the rest is reserved for headers and framing.
const MESSAGE_CONTENT_BUFFER_RATIO: f64 = 0.75;

/// All recognized client options.
///
/// Everything is fixed at construction except the three timeouts exposed
/// through getter/setter pairs, which may be changed while the client is
/// open.
#[derive(Debug)]
pub struct Settings {
    /// Interval between two service-location polls when the previous poll
    /// failed with a non-retryable error.
    pub service_change_poll_interval: Duration,

    /// Maximum number of service entries in the resolution cache.
    pub partition_location_cache_limit: usize,

    /// Shard count of the resolution cache. Rounded up to a power of two.
    pub partition_location_cache_bucket_count: usize,

    /// Transport keep-alive interval.
    pub keep_alive_interval: Duration,

    /// Idle timeout after which a gateway connection is torn down.
    pub connection_idle_timeout: Duration,

    /// Timeout for the notification connect handshake.
    pub notification_gateway_connection_timeout: Duration,

    /// Timeout for pushing an accepted notification into the resolution
    /// cache.
    pub notification_cache_update_timeout: Duration,

    /// Upper bound on buffered health reports.
    pub max_number_of_health_reports: usize,

    /// Maximum size (in bytes) of a message frame exchanged with a gateway.
    pub max_message_size: usize,

    /// Upper bound on concurrently running chunk-sender tasks per upload.
    pub max_file_chunk_sender_threads: usize,

    /// Number of chunk sends that may be outstanding before the batch timer
    /// releases the next batch.
    pub max_allowed_pending_file_chunk_send_before_next_batch: usize,

    /// Number of chunks released per batch.
    pub file_chunk_batch_count: usize,

    /// Interval of the batch-release timer.
    pub file_chunk_batch_upload_interval: Duration,

    /// Base delay before a failed chunk send is retried. A jitter of up to
    /// ±500ms is applied.
    pub file_chunk_retry_interval: Duration,

    /// Send attempts per chunk before the upload fails.
    pub file_chunk_retry_attempt: u32,

    /// Wait before re-sending chunks that have not been acknowledged after
    /// all chunk tasks completed.
    pub file_chunk_resend_wait_interval: Duration,

    /// Number of resend rounds before the upload fails.
    pub file_chunk_resend_retry_attempt: u32,

    /// Base interval of the commit retry timer; the n-th attempt waits n
    /// times this.
    pub file_upload_commit_retry_interval: Duration,

    /// Commit attempts before the upload fails.
    pub file_upload_commit_retry_attempt: u32,

    /// Whole-file re-upload attempts after a retryable commit failure.
    pub file_upload_resend_retry_attempt: u32,

    /// Interval between create-session resends.
    pub file_create_send_retry_interval: Duration,

    /// Create-session send attempts.
    pub file_create_send_attempt: u32,

    /// Response wait window for a create-session message before any chunk
    /// upload has ever succeeded. Kept short so that a cluster without
    /// chunk support is detected promptly.
    pub file_create_message_initial_response_wait_interval: Duration,

    /// Response wait window for a create-session message once chunk support
    /// has been observed.
    pub file_create_message_response_wait_interval: Duration,

    /// Consecutive connect failures after which the sender switches every
    /// subsequent upload to the single-file protocol.
    pub switch_upload_protocol_threshold: u32,

    /// Chunk-mode failures with an expired connection-confirm wait after
    /// which a single operation falls back to the single-file protocol.
    pub switch_upload_protocol_resend_retry_attempt: u32,

    /// Consecutive gateway-unreachable chunk acks tolerated before the
    /// upload fails.
    pub gateway_not_reachable_threshold_limit: u32,

    connection_initialization_timeout_ms: AtomicU64,
    health_operation_timeout_ms: AtomicU64,
    health_report_send_interval_ms: AtomicU64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            service_change_poll_interval: Duration::from_secs(120),
            partition_location_cache_limit: 100_000,
            partition_location_cache_bucket_count: 128,
            keep_alive_interval: Duration::from_secs(20),
            connection_idle_timeout: Duration::ZERO,
            notification_gateway_connection_timeout: Duration::from_secs(30),
            notification_cache_update_timeout: Duration::from_secs(30),
            max_number_of_health_reports: 10_000,
            max_message_size: 4 * 1024 * 1024,
            max_file_chunk_sender_threads: 10,
            max_allowed_pending_file_chunk_send_before_next_batch: 100,
            file_chunk_batch_count: 10,
            file_chunk_batch_upload_interval: Duration::from_millis(500),
            file_chunk_retry_interval: Duration::from_secs(1),
            file_chunk_retry_attempt: 10,
            file_chunk_resend_wait_interval: Duration::from_secs(5),
            file_chunk_resend_retry_attempt: 5,
            file_upload_commit_retry_interval: Duration::from_secs(2),
            file_upload_commit_retry_attempt: 10,
            file_upload_resend_retry_attempt: 3,
            file_create_send_retry_interval: Duration::from_secs(5),
            file_create_send_attempt: 10,
            file_create_message_initial_response_wait_interval: Duration::from_secs(10),
            file_create_message_response_wait_interval: Duration::from_secs(60),
            switch_upload_protocol_threshold: 3,
            switch_upload_protocol_resend_retry_attempt: 2,
            gateway_not_reachable_threshold_limit: 10,
            connection_initialization_timeout_ms: AtomicU64::new(2_000),
            health_operation_timeout_ms: AtomicU64::new(120_000),
            health_report_send_interval_ms: AtomicU64::new(30_000),
        }
    }
}

impl Settings {
    /// Largest content payload that fits a single message.
    pub fn message_content_threshold(&self) -> usize {
        (self.max_message_size as f64 * MESSAGE_CONTENT_BUFFER_RATIO) as usize
    }

    pub fn connection_initialization_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_initialization_timeout_ms.load(Ordering::Relaxed))
    }

    pub fn set_connection_initialization_timeout(&self, timeout: Duration) {
        self.connection_initialization_timeout_ms
            .store(timeout.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn health_operation_timeout(&self) -> Duration {
        Duration::from_millis(self.health_operation_timeout_ms.load(Ordering::Relaxed))
    }

    pub fn set_health_operation_timeout(&self, timeout: Duration) {
        self.health_operation_timeout_ms
            .store(timeout.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn health_report_send_interval(&self) -> Duration {
        Duration::from_millis(self.health_report_send_interval_ms.load(Ordering::Relaxed))
    }

    pub fn set_health_report_send_interval(&self, interval: Duration) {
        self.health_report_send_interval_ms
            .store(interval.as_millis() as u64, Ordering::Relaxed);
    }
}
