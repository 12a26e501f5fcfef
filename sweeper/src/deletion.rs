//! Batched, best-effort deletion of image references.

use std::num::NonZeroUsize;

use tokio_util::sync::CancellationToken;

use crate::backend::Registry;
use crate::error::BackendErrorKind;
use crate::reference::ImageReference;

/// Default number of references per delete call.
pub const DEFAULT_BATCH_SIZE: NonZeroUsize = match NonZeroUsize::new(20) {
    Some(size) => size,
    None => unreachable!(),
};

/// A delete call which failed. Later batches were still issued.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct BatchFailure {
    /// Zero-based position of the batch.
    pub index: usize,
    /// Number of references in the batch.
    pub images: usize,
    /// What went wrong.
    pub kind: BackendErrorKind,
}

/// The outcome of deleting a collection of images.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeletionReport {
    /// Number of images handed to the deletion.
    pub attempted: usize,
    /// Number of delete calls issued.
    pub batches: usize,
    /// Number of images in batches the backend accepted.
    pub deleted: usize,
    /// Batches the backend failed or rejected.
    pub failures: Vec<BatchFailure>,
    /// Remaining batches were skipped because the deletion was cancelled.
    pub cancelled: bool,
}

/// Deletes images in fixed-size batches.
#[derive(Debug, Clone)]
pub struct Deletion<'r> {
    registry: &'r Registry,
    batch_size: NonZeroUsize,
    cancel: CancellationToken,
}

impl<'r> Deletion<'r> {
    /// Create a deletion using the default batch size.
    pub fn new(registry: &'r Registry) -> Self {
        Self {
            registry,
            batch_size: DEFAULT_BATCH_SIZE,
            cancel: CancellationToken::new(),
        }
    }

    /// Set the maximum number of references per delete call.
    pub fn batch_size(mut self, batch_size: NonZeroUsize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Stop before the next batch once `token` is cancelled.
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Delete `images`, one backend call per contiguous batch, in input order.
    ///
    /// A failed batch is recorded and does not stop the batches after it.
    #[tracing::instrument(skip_all, fields(backend=self.registry.name(), images=images.len(), batch_size=self.batch_size.get()))]
    pub async fn delete(&self, images: &[ImageReference]) -> DeletionReport {
        let mut report = DeletionReport {
            attempted: images.len(),
            ..Default::default()
        };

        for (index, batch) in images.chunks(self.batch_size.get()).enumerate() {
            if self.cancel.is_cancelled() {
                tracing::info!(batch = index, "Deletion cancelled");
                report.cancelled = true;
                break;
            }

            report.batches += 1;
            match self.registry.delete_batch(batch).await {
                Ok(()) => {
                    tracing::debug!(batch = index, images = batch.len(), "Deleted batch");
                    report.deleted += batch.len();
                }
                Err(error) => {
                    tracing::warn!(batch = index, images = batch.len(), kind = %error.kind(), "Batch failed: {error}");
                    report.failures.push(BatchFailure {
                        index,
                        images: batch.len(),
                        kind: error.kind(),
                    });
                }
            }
        }

        report
    }
}
