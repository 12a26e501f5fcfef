//! Depth-first discovery of untagged images below a root repository.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::backend::{Operation, Registry};
use crate::error::{BackendError, BackendErrorKind};
use crate::reference::{ImageReference, RepositoryPath};

/// A read which failed during a traversal. The repository contributed nothing
/// for that operation.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ReadFailure {
    /// The repository being expanded.
    pub repository: RepositoryPath,
    /// The failed call.
    pub operation: Operation,
    /// What went wrong.
    pub kind: BackendErrorKind,
}

/// The outcome of one traversal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovery {
    /// Untagged images, in traversal order.
    pub images: Vec<ImageReference>,
    /// Number of frontier entries expanded.
    pub visited: usize,
    /// Reads which failed and were skipped.
    pub failures: Vec<ReadFailure>,
    /// The traversal stopped early because it was cancelled.
    pub cancelled: bool,
}

/// Walks a registry namespace, collecting untagged images.
///
/// The walk uses an explicit stack, so namespaces of any depth are
/// explored without growing the call stack. Paths are not deduplicated: a path
/// reported twice is expanded twice.
#[derive(Debug, Clone)]
pub struct Traversal<'r> {
    registry: &'r Registry,
    pacing: Option<Duration>,
    cancel: CancellationToken,
}

impl<'r> Traversal<'r> {
    /// Create a traversal over `registry` with no pacing.
    pub fn new(registry: &'r Registry) -> Self {
        Self {
            registry,
            pacing: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Wait this long after expanding each repository, to stay under backend
    /// request quotas.
    pub fn pacing(mut self, pacing: Option<Duration>) -> Self {
        self.pacing = pacing.filter(|interval| !interval.is_zero());
        self
    }

    /// Stop before the next repository once `token` is cancelled.
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Find every untagged image in `root` and the repositories below it.
    ///
    /// Backend failures never abort the walk: the repository being expanded
    /// contributes nothing for the failed call and exploration continues with
    /// the rest of the frontier.
    #[tracing::instrument(skip(self, root), fields(backend=self.registry.name(), %root))]
    pub async fn discover_untagged(&self, root: &RepositoryPath) -> Discovery {
        let mut frontier = vec![root.clone()];
        let mut discovery = Discovery::default();

        while let Some(repository) = frontier.pop() {
            if self.cancel.is_cancelled() {
                tracing::info!(remaining = frontier.len() + 1, "Traversal cancelled");
                discovery.cancelled = true;
                break;
            }
            discovery.visited += 1;

            match self.registry.list_untagged_digests(&repository).await {
                Ok(digests) => {
                    tracing::debug!(%repository, untagged = digests.len(), "Listed untagged digests");
                    discovery
                        .images
                        .extend(digests.into_iter().map(|digest| repository.image(digest)));
                }
                Err(error) => {
                    discovery.record(&repository, Operation::ListUntaggedDigests, &error)
                }
            }

            match self.registry.list_children(&repository).await {
                Ok(children) => {
                    tracing::debug!(%repository, children = children.len(), "Listed children");
                    frontier.extend(children);
                }
                Err(error) => discovery.record(&repository, Operation::ListChildren, &error),
            }

            if let Some(interval) = self.pacing {
                if !frontier.is_empty() {
                    tokio::select! {
                        _ = tokio::time::sleep(interval) => {},
                        _ = self.cancel.cancelled() => {},
                    }
                }
            }
        }

        tracing::debug!(
            visited = discovery.visited,
            images = discovery.images.len(),
            failures = discovery.failures.len(),
            "Traversal finished"
        );
        discovery
    }
}

impl Discovery {
    fn record(&mut self, repository: &RepositoryPath, operation: Operation, error: &BackendError) {
        tracing::warn!(%repository, %operation, kind = %error.kind(), "Skipping repository: {error}");
        self.failures.push(ReadFailure {
            repository: repository.clone(),
            operation,
            kind: error.kind(),
        });
    }
}
