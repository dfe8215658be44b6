/// Observer of upload progress.
///
/// Totals are reported once per file; resend rounds only add completed
/// items.
pub trait FileTransferProgress: Send + Sync + std::fmt::Debug {
    fn increment_total_files(&self, count: u64);
    fn increment_total_transfer_items(&self, bytes: u64);
    fn increment_transfer_completed_items(&self, bytes: u64);
    fn increment_replicated_files(&self, count: u64);
}

/// Progress sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl FileTransferProgress for NoProgress {
    fn increment_total_files(&self, _count: u64) {}
    fn increment_total_transfer_items(&self, _bytes: u64) {}
    fn increment_transfer_completed_items(&self, _bytes: u64) {}
    fn increment_replicated_files(&self, _count: u64) {}
}
