use std::fmt;
use std::sync::Arc;

use crate::error::BackendError;
use crate::reference::{Digest, ImageReference, RepositoryPath};

/// The capabilities the sweeper needs from a container registry.
///
/// Implementations translate these calls into whatever transport the registry
/// speaks. Listing calls must return an empty sequence, not an error, when
/// there is nothing to report.
#[async_trait::async_trait]
pub trait Backend: fmt::Debug {
    /// The name of the backend, used in logs and errors.
    fn name(&self) -> &'static str;

    /// Repository paths below `repository`, in the order the registry reports them.
    ///
    /// Backends may report paths more than one level deep.
    async fn list_children(
        &self,
        repository: &RepositoryPath,
    ) -> Result<Vec<RepositoryPath>, BackendError>;

    /// Digests in `repository` which currently carry no tag.
    ///
    /// This is a point-in-time snapshot; a digest may be tagged again before
    /// it is deleted.
    async fn list_untagged_digests(
        &self,
        repository: &RepositoryPath,
    ) -> Result<Vec<Digest>, BackendError>;

    /// Delete every image in `images`, without prompting for confirmation.
    async fn delete_batch(&self, images: &[ImageReference]) -> Result<(), BackendError>;
}

/// The backend calls made by a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    /// [`Backend::list_children`]
    ListChildren,
    /// [`Backend::list_untagged_digests`]
    ListUntaggedDigests,
    /// [`Backend::delete_batch`]
    DeleteBatch,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::ListChildren => write!(f, "list children"),
            Operation::ListUntaggedDigests => write!(f, "list untagged digests"),
            Operation::DeleteBatch => write!(f, "delete batch"),
        }
    }
}

pub(crate) type ArcBackend = Arc<dyn Backend + Send + Sync>;

/// A shared handle to a registry backend.
#[derive(Debug, Clone)]
pub struct Registry {
    backend: ArcBackend,
}

impl<B> From<B> for Registry
where
    B: Backend + Send + Sync + 'static,
{
    fn from(value: B) -> Self {
        Registry::new(value)
    }
}

impl Registry {
    /// Wrap a backend.
    pub fn new<B: Backend + Send + Sync + 'static>(backend: B) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    /// Wrap a backend which is already shared.
    pub fn from_arc(backend: Arc<dyn Backend + Send + Sync>) -> Self {
        Self { backend }
    }

    /// The backend's name.
    pub fn name(&self) -> &'static str {
        self.backend.name()
    }

    /// See [`Backend::list_children`].
    #[tracing::instrument(skip(self, repository), fields(backend=self.backend.name(), %repository))]
    pub async fn list_children(
        &self,
        repository: &RepositoryPath,
    ) -> Result<Vec<RepositoryPath>, BackendError> {
        self.backend.list_children(repository).await
    }

    /// See [`Backend::list_untagged_digests`].
    #[tracing::instrument(skip(self, repository), fields(backend=self.backend.name(), %repository))]
    pub async fn list_untagged_digests(
        &self,
        repository: &RepositoryPath,
    ) -> Result<Vec<Digest>, BackendError> {
        self.backend.list_untagged_digests(repository).await
    }

    /// See [`Backend::delete_batch`].
    #[tracing::instrument(skip(self, images), fields(backend=self.backend.name(), images=images.len()))]
    pub async fn delete_batch(&self, images: &[ImageReference]) -> Result<(), BackendError> {
        self.backend.delete_batch(images).await
    }
}
