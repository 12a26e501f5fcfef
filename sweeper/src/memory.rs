use std::collections::{BTreeMap, BTreeSet, HashMap};

use parking_lot::{Mutex, RwLock};

use crate::backend::{Backend, Operation};
use crate::error::{BackendError, BackendErrorKind};
use crate::reference::{Digest, ImageReference, RepositoryPath};

/// A backend call recorded by [`MemoryRegistry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// `list_children(repository)`
    ListChildren(RepositoryPath),
    /// `list_untagged_digests(repository)`
    ListUntaggedDigests(RepositoryPath),
    /// `delete_batch(images)`
    DeleteBatch(Vec<ImageReference>),
}

#[derive(Debug)]
struct Manifest {
    digest: Digest,
    tags: Vec<String>,
}

/// Registry backend that keeps repositories in memory.
///
/// Children of a path are derived from the stored repositories: every
/// repository below a path contributes the next path segment, whether or not
/// that intermediate path was stored itself. Listings are sorted by path.
///
/// Faults can be injected per operation and repository, and every call is
/// recorded.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    repositories: RwLock<BTreeMap<RepositoryPath, Vec<Manifest>>>,
    faults: Mutex<HashMap<(Operation, RepositoryPath), BackendErrorKind>>,
    calls: Mutex<Vec<Call>>,
}

impl MemoryRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the given (empty) repositories.
    pub fn with_repositories<'a>(
        repositories: impl IntoIterator<Item = &'a RepositoryPath>,
    ) -> Self {
        let registry = Self::new();
        for repository in repositories {
            registry.create_repository(repository.clone());
        }
        registry
    }

    /// Create a repository without any images.
    pub fn create_repository(&self, repository: RepositoryPath) {
        self.repositories.write().entry(repository).or_default();
    }

    /// Store an image carrying `tags`, creating its repository if needed.
    ///
    /// Storing a digest which is already present replaces its tags.
    pub fn insert(&self, image: ImageReference, tags: &[&str]) {
        let tags = tags.iter().map(|tag| tag.to_string()).collect();
        let mut repositories = self.repositories.write();
        let manifests = repositories.entry(image.repository().clone()).or_default();
        match manifests.iter_mut().find(|m| &m.digest == image.digest()) {
            Some(manifest) => manifest.tags = tags,
            None => manifests.push(Manifest {
                digest: image.digest().clone(),
                tags,
            }),
        }
    }

    /// Add a tag to a stored image. Returns false if the image isn't stored.
    pub fn tag(&self, image: &ImageReference, tag: &str) -> bool {
        let mut repositories = self.repositories.write();
        let Some(manifest) = repositories
            .get_mut(image.repository())
            .and_then(|manifests| manifests.iter_mut().find(|m| &m.digest == image.digest()))
        else {
            return false;
        };
        manifest.tags.push(tag.to_owned());
        true
    }

    /// Whether an image is currently stored.
    pub fn contains(&self, image: &ImageReference) -> bool {
        self.repositories
            .read()
            .get(image.repository())
            .is_some_and(|manifests| manifests.iter().any(|m| &m.digest == image.digest()))
    }

    /// Make every `operation` touching `repository` fail with `kind` until cleared.
    pub fn fail(&self, operation: Operation, repository: RepositoryPath, kind: BackendErrorKind) {
        self.faults.lock().insert((operation, repository), kind);
    }

    /// Remove all injected faults.
    pub fn clear_faults(&self) {
        self.faults.lock().clear();
    }

    /// The calls made so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// The batches passed to `delete_batch` so far, in order.
    pub fn delete_calls(&self) -> Vec<Vec<ImageReference>> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                Call::DeleteBatch(images) => Some(images.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }

    fn fault(&self, operation: Operation, repository: &RepositoryPath) -> Result<(), BackendError> {
        match self.faults.lock().get(&(operation, repository.clone())) {
            Some(kind) => Err(BackendError::new(self.name(), *kind, "injected fault")
                .repository(repository.as_str())
                .context(operation.to_string())),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl Backend for MemoryRegistry {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn list_children(
        &self,
        repository: &RepositoryPath,
    ) -> Result<Vec<RepositoryPath>, BackendError> {
        self.record(Call::ListChildren(repository.clone()));
        self.fault(Operation::ListChildren, repository)?;

        let repositories = self.repositories.read();
        let mut children = BTreeSet::new();
        for path in repositories.keys().filter(|p| p.is_descendant_of(repository)) {
            let rest = &path.as_str()[repository.as_str().len() + 1..];
            let name = rest.split('/').next().unwrap_or(rest);
            let child = repository.child(name).map_err(|err| {
                BackendError::malformed(self.name(), err).repository(repository.as_str())
            })?;
            children.insert(child);
        }

        Ok(children.into_iter().collect())
    }

    async fn list_untagged_digests(
        &self,
        repository: &RepositoryPath,
    ) -> Result<Vec<Digest>, BackendError> {
        self.record(Call::ListUntaggedDigests(repository.clone()));
        self.fault(Operation::ListUntaggedDigests, repository)?;

        Ok(self
            .repositories
            .read()
            .get(repository)
            .map(|manifests| {
                manifests
                    .iter()
                    .filter(|m| m.tags.is_empty())
                    .map(|m| m.digest.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Deletes the whole batch or nothing: a batch naming a missing or tagged
    /// image is rejected without deleting any of its images.
    async fn delete_batch(&self, images: &[ImageReference]) -> Result<(), BackendError> {
        self.record(Call::DeleteBatch(images.to_vec()));
        for image in images {
            self.fault(Operation::DeleteBatch, image.repository())?;
        }

        let mut repositories = self.repositories.write();
        for image in images {
            let manifest = repositories
                .get(image.repository())
                .and_then(|manifests| manifests.iter().find(|m| &m.digest == image.digest()));
            match manifest {
                None => {
                    return Err(BackendError::rejected(
                        self.name(),
                        format!("{image} does not exist"),
                    )
                    .repository(image.repository().as_str()));
                }
                Some(manifest) if !manifest.tags.is_empty() => {
                    return Err(BackendError::rejected(
                        self.name(),
                        format!("{image} is tagged {:?}", manifest.tags),
                    )
                    .repository(image.repository().as_str()));
                }
                Some(_) => {}
            }
        }

        for image in images {
            if let Some(manifests) = repositories.get_mut(image.repository()) {
                manifests.retain(|m| &m.digest != image.digest());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> RepositoryPath {
        s.parse().unwrap()
    }

    fn image(s: &str) -> ImageReference {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn children_include_intermediate_paths() {
        let registry = MemoryRegistry::new();
        registry.insert(image("r/a/x@d1"), &[]);
        registry.create_repository(path("r/b"));
        registry.create_repository(path("r/a-b"));
        registry.create_repository(path("other"));

        let children = registry.list_children(&path("r")).await.unwrap();
        assert_eq!(children, vec![path("r/a"), path("r/a-b"), path("r/b")]);

        let children = registry.list_children(&path("r/a")).await.unwrap();
        assert_eq!(children, vec![path("r/a/x")]);

        assert!(registry.list_children(&path("missing")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn untagged_digests_in_insertion_order() {
        let registry = MemoryRegistry::new();
        registry.insert(image("r@d2"), &[]);
        registry.insert(image("r@d1"), &["latest"]);
        registry.insert(image("r@d0"), &[]);

        let digests = registry.list_untagged_digests(&path("r")).await.unwrap();
        assert_eq!(digests, vec!["d2".parse().unwrap(), "d0".parse().unwrap()]);
    }

    #[tokio::test]
    async fn delete_batch_is_atomic() {
        let registry = MemoryRegistry::new();
        registry.insert(image("r@d1"), &[]);
        registry.insert(image("r@d2"), &[]);
        assert!(registry.tag(&image("r@d2"), "v1"));

        let err = registry
            .delete_batch(&[image("r@d1"), image("r@d2")])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), BackendErrorKind::Rejected);
        assert!(registry.contains(&image("r@d1")));

        registry.delete_batch(&[image("r@d1")]).await.unwrap();
        assert!(!registry.contains(&image("r@d1")));
    }

    #[tokio::test]
    async fn injected_faults_are_recorded() {
        let registry = MemoryRegistry::new();
        registry.fail(
            Operation::ListChildren,
            path("r"),
            BackendErrorKind::Unavailable,
        );

        let err = registry.list_children(&path("r")).await.unwrap_err();
        assert_eq!(err.kind(), BackendErrorKind::Unavailable);
        assert_eq!(registry.calls(), vec![Call::ListChildren(path("r"))]);

        registry.clear_faults();
        assert!(registry.list_children(&path("r")).await.is_ok());
    }
}
