//! Sweeping a list of root repositories: discover, then delete, root by root.

use std::num::NonZeroUsize;
use std::time::Duration;

use futures::StreamExt as _;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::backend::Registry;
use crate::deletion::{BatchFailure, Deletion, DEFAULT_BATCH_SIZE};
use crate::reference::RepositoryPath;
use crate::traversal::{ReadFailure, Traversal};

/// Tuning for a sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepOptions {
    /// Maximum references per delete call.
    pub batch_size: NonZeroUsize,

    /// Delay between repository expansions during discovery.
    pub pacing: Option<Duration>,

    /// Number of roots swept at the same time. Results are still reported in
    /// input order.
    pub concurrency: NonZeroUsize,

    /// Discover untagged images without deleting them.
    pub dry_run: bool,
}

impl Default for SweepOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            pacing: None,
            concurrency: NonZeroUsize::MIN,
            dry_run: false,
        }
    }
}

/// What happened to one requested root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RootReport {
    /// The root, as requested.
    pub root: String,

    /// Why the root was skipped, if it wasn't a valid repository path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalid: Option<String>,

    /// Repositories expanded under this root.
    pub visited: usize,

    /// Untagged images found.
    pub discovered: usize,

    /// Images in delete batches the backend accepted.
    pub deleted: usize,

    /// Delete calls issued.
    pub batches: usize,

    /// Reads which failed and were skipped.
    pub read_failures: Vec<ReadFailure>,

    /// Delete calls which failed.
    pub failed_batches: Vec<BatchFailure>,

    /// Work for this root stopped early because the sweep was cancelled.
    pub cancelled: bool,
}

impl RootReport {
    fn new(root: &str) -> Self {
        Self {
            root: root.to_owned(),
            ..Default::default()
        }
    }
}

/// Totals for a whole sweep, with the per-root detail.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Valid roots which were swept.
    pub roots_processed: usize,
    /// Roots which were rejected as malformed.
    pub invalid_roots: usize,
    /// Untagged images found across all roots.
    pub images_discovered: usize,
    /// Images in delete batches the backend accepted.
    pub images_deleted: usize,
    /// Failed reads across all roots.
    pub read_failures: usize,
    /// Failed delete batches across all roots.
    pub delete_failures: usize,
    /// The sweep was cancelled before it finished.
    pub cancelled: bool,
    /// One entry per requested root, in request order.
    pub roots: Vec<RootReport>,
}

impl RunSummary {
    /// Aggregate per-root reports.
    pub fn from_reports(roots: Vec<RootReport>) -> Self {
        let mut summary = RunSummary::default();
        for root in &roots {
            if root.invalid.is_some() {
                summary.invalid_roots += 1;
                continue;
            }
            summary.roots_processed += 1;
            summary.images_discovered += root.discovered;
            summary.images_deleted += root.deleted;
            summary.read_failures += root.read_failures.len();
            summary.delete_failures += root.failed_batches.len();
            summary.cancelled |= root.cancelled;
        }
        summary.roots = roots;
        summary
    }
}

/// Discovers and deletes untagged images under each requested root.
#[derive(Debug, Clone)]
pub struct Sweeper {
    registry: Registry,
    options: SweepOptions,
}

impl Sweeper {
    /// Create a sweeper for `registry`.
    pub fn new(registry: Registry, options: SweepOptions) -> Self {
        Self { registry, options }
    }

    /// The registry being swept.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The options used for each sweep.
    pub fn options(&self) -> &SweepOptions {
        &self.options
    }

    /// A sweeper with the same registry but different options.
    pub fn with_options(&self, options: SweepOptions) -> Self {
        Self {
            registry: self.registry.clone(),
            options,
        }
    }

    /// Sweep every root to completion.
    pub async fn run<I, S>(&self, roots: I) -> RunSummary
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.run_with_cancel(roots, CancellationToken::new()).await
    }

    /// Sweep roots in order until done or until `cancel` fires.
    ///
    /// Roots are not deduplicated. A malformed root is reported and skipped;
    /// the other roots are unaffected. Once cancelled, the current traversal
    /// or deletion stops at its next step and remaining roots are reported as
    /// cancelled without any backend calls. Deletions already made stand.
    #[tracing::instrument(skip_all, fields(backend=self.registry.name()))]
    pub async fn run_with_cancel<I, S>(&self, roots: I, cancel: CancellationToken) -> RunSummary
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let roots: Vec<String> = roots.into_iter().map(|r| r.as_ref().to_owned()).collect();

        let cancel = &cancel;
        let reports = futures::stream::iter(roots)
            .map(|root: String| async move { self.sweep_root(&root, cancel).await })
            .buffered(self.options.concurrency.get())
            .collect::<Vec<_>>()
            .await;

        let summary = RunSummary::from_reports(reports);
        tracing::info!(
            roots = summary.roots_processed,
            invalid = summary.invalid_roots,
            discovered = summary.images_discovered,
            deleted = summary.images_deleted,
            read_failures = summary.read_failures,
            delete_failures = summary.delete_failures,
            cancelled = summary.cancelled,
            "Sweep finished"
        );
        summary
    }

    async fn sweep_root(&self, root: &str, cancel: &CancellationToken) -> RootReport {
        let mut report = RootReport::new(root);

        let path = match RepositoryPath::new(root) {
            Ok(path) => path,
            Err(error) => {
                tracing::warn!("Skipping root: {error}");
                report.invalid = Some(error.to_string());
                return report;
            }
        };

        let discovery = Traversal::new(&self.registry)
            .pacing(self.options.pacing)
            .cancel_on(cancel.clone())
            .discover_untagged(&path)
            .await;

        report.visited = discovery.visited;
        report.discovered = discovery.images.len();
        report.read_failures = discovery.failures;
        report.cancelled = discovery.cancelled;

        if discovery.images.is_empty() || discovery.cancelled {
            tracing::info!(root = %path, discovered = report.discovered, "No deletion for root");
            return report;
        }

        if self.options.dry_run {
            for image in &discovery.images {
                tracing::info!(%image, "Would delete");
            }
            return report;
        }

        let deletion = Deletion::new(&self.registry)
            .batch_size(self.options.batch_size)
            .cancel_on(cancel.clone())
            .delete(&discovery.images)
            .await;

        report.deleted = deletion.deleted;
        report.batches = deletion.batches;
        report.failed_batches = deletion.failures;
        report.cancelled = deletion.cancelled;

        tracing::info!(
            root = %path,
            discovered = report.discovered,
            deleted = report.deleted,
            failed_batches = report.failed_batches.len(),
            "Swept root"
        );
        report
    }
}
