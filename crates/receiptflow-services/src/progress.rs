use receiptflow_core::UploadProgress;

/// Keeps forwarded progress monotonic.
///
/// Transports may report out of order; anything behind the last admitted
/// value is dropped and byte counts are clamped to the total.
#[derive(Debug, Default)]
pub struct ProgressFilter {
    last: Option<u64>,
}

impl ProgressFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn admit(&mut self, progress: UploadProgress) -> Option<UploadProgress> {
        let progress = UploadProgress::new(progress.bytes_transferred, progress.total_bytes);
        if self.last.is_some_and(|last| progress.bytes_transferred < last) {
            return None;
        }
        self.last = Some(progress.bytes_transferred);
        Some(progress)
    }
}
