//! End-to-end sweeps against scripted backends.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use parking_lot::Mutex;
use sweeper::{
    Backend, BackendError, Call, CancellationToken, Deletion, Digest, ImageReference,
    MemoryRegistry, Operation, Registry, RepositoryPath, SweepOptions, Sweeper, Traversal,
};

fn path(s: &str) -> RepositoryPath {
    s.parse().unwrap()
}

fn image(s: &str) -> ImageReference {
    s.parse().unwrap()
}

/// A backend which answers from fixed tables and counts visits, so that
/// overlapping child listings can be expressed.
#[derive(Debug, Default)]
struct Scripted {
    children: HashMap<&'static str, Vec<&'static str>>,
    untagged: HashMap<&'static str, Vec<&'static str>>,
    visits: Mutex<HashMap<String, usize>>,
}

#[async_trait::async_trait]
impl Backend for Scripted {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn list_children(
        &self,
        repository: &RepositoryPath,
    ) -> Result<Vec<RepositoryPath>, BackendError> {
        *self
            .visits
            .lock()
            .entry(repository.to_string())
            .or_default() += 1;
        Ok(self
            .children
            .get(repository.as_str())
            .into_iter()
            .flatten()
            .map(|child| path(child))
            .collect())
    }

    async fn list_untagged_digests(
        &self,
        repository: &RepositoryPath,
    ) -> Result<Vec<Digest>, BackendError> {
        Ok(self
            .untagged
            .get(repository.as_str())
            .into_iter()
            .flatten()
            .map(|digest| digest.parse().unwrap())
            .collect())
    }

    async fn delete_batch(&self, _images: &[ImageReference]) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Forwards to a [`MemoryRegistry`], cancelling `token` while serving the
/// first call of `operation`.
#[derive(Debug)]
struct CancelDuring {
    inner: Arc<MemoryRegistry>,
    operation: Operation,
    token: CancellationToken,
}

impl CancelDuring {
    fn fire(&self, operation: Operation) {
        if operation == self.operation {
            self.token.cancel();
        }
    }
}

#[async_trait::async_trait]
impl Backend for CancelDuring {
    fn name(&self) -> &'static str {
        "cancel-during"
    }

    async fn list_children(
        &self,
        repository: &RepositoryPath,
    ) -> Result<Vec<RepositoryPath>, BackendError> {
        let children = self.inner.list_children(repository).await;
        self.fire(Operation::ListChildren);
        children
    }

    async fn list_untagged_digests(
        &self,
        repository: &RepositoryPath,
    ) -> Result<Vec<Digest>, BackendError> {
        let digests = self.inner.list_untagged_digests(repository).await;
        self.fire(Operation::ListUntaggedDigests);
        digests
    }

    async fn delete_batch(&self, images: &[ImageReference]) -> Result<(), BackendError> {
        let outcome = self.inner.delete_batch(images).await;
        self.fire(Operation::DeleteBatch);
        outcome
    }
}

#[tokio::test]
async fn root_with_two_children() {
    let memory = Arc::new(MemoryRegistry::new());
    memory.create_repository(path("R"));
    memory.insert(image("R/a@d1"), &[]);
    memory.insert(image("R/a@d2"), &[]);
    memory.create_repository(path("R/b"));
    let registry = Registry::from_arc(memory.clone());

    let discovery = Traversal::new(&registry).discover_untagged(&path("R")).await;
    assert_eq!(discovery.images, vec![image("R/a@d1"), image("R/a@d2")]);

    let touched: Vec<_> = memory
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            Call::ListChildren(p) | Call::ListUntaggedDigests(p) => Some(p),
            Call::DeleteBatch(_) => None,
        })
        .collect();
    assert!(touched.iter().all(|p| ["R", "R/a", "R/b"].contains(&p.as_str())));
}

#[tokio::test]
async fn three_images_in_batches_of_two() {
    let memory = Arc::new(MemoryRegistry::new());
    for reference in ["x@1", "x@2", "x@3"] {
        memory.insert(image(reference), &[]);
    }
    let registry = Registry::from_arc(memory.clone());

    Deletion::new(&registry)
        .batch_size(NonZeroUsize::new(2).unwrap())
        .delete(&[image("x@1"), image("x@2"), image("x@3")])
        .await;

    assert_eq!(
        memory.delete_calls(),
        vec![vec![image("x@1"), image("x@2")], vec![image("x@3")]]
    );
}

#[tokio::test]
async fn overlapping_listings_are_visited_once_per_report() {
    let backend = Arc::new(Scripted {
        children: HashMap::from([
            ("R", vec!["R/a", "R/a/x"]),
            ("R/a", vec!["R/a/x"]),
        ]),
        untagged: HashMap::from([("R/a/x", vec!["sha256:1"])]),
        ..Default::default()
    });
    let registry = Registry::from_arc(backend.clone());

    let discovery = Traversal::new(&registry).discover_untagged(&path("R")).await;

    assert_eq!(discovery.visited, 4);
    assert_eq!(backend.visits.lock()["R/a/x"], 2);
    assert_eq!(
        discovery.images,
        vec![image("R/a/x@sha256:1"), image("R/a/x@sha256:1")]
    );
}

#[tokio::test]
async fn full_sweep_over_a_tree() {
    let memory = Arc::new(MemoryRegistry::new());
    memory.insert(image("gcr.io/p/app@sha256:old"), &[]);
    memory.insert(image("gcr.io/p/app@sha256:new"), &["latest", "v2"]);
    memory.insert(image("gcr.io/p/app/cache@sha256:c1"), &[]);
    memory.insert(image("gcr.io/p/app/cache@sha256:c2"), &[]);
    memory.insert(image("gcr.io/p/tools@sha256:t1"), &["stable"]);
    memory.insert(image("gcr.io/q/other@sha256:o1"), &[]);

    let sweeper = Sweeper::new(Registry::from_arc(memory.clone()), SweepOptions::default());
    let summary = sweeper.run(vec!["gcr.io/p".to_string()]).await;

    assert_eq!(summary.roots_processed, 1);
    assert_eq!(summary.images_discovered, 3);
    assert_eq!(summary.images_deleted, 3);
    assert_eq!(summary.read_failures, 0);
    assert_eq!(summary.delete_failures, 0);

    assert!(memory.contains(&image("gcr.io/p/app@sha256:new")));
    assert!(memory.contains(&image("gcr.io/p/tools@sha256:t1")));
    assert!(memory.contains(&image("gcr.io/q/other@sha256:o1")));
    assert!(!memory.contains(&image("gcr.io/p/app/cache@sha256:c1")));

    let again = sweeper.run(["gcr.io/p"]).await;
    assert_eq!(again.images_discovered, 0);
    assert_eq!(memory.delete_calls().len(), 1);
}

#[tokio::test]
async fn cancel_between_batches() {
    let memory = Arc::new(MemoryRegistry::new());
    for reference in ["x@1", "x@2", "x@3"] {
        memory.insert(image(reference), &[]);
    }
    let token = CancellationToken::new();
    let registry = Registry::new(CancelDuring {
        inner: memory.clone(),
        operation: Operation::DeleteBatch,
        token: token.clone(),
    });

    let report = Deletion::new(&registry)
        .batch_size(NonZeroUsize::new(1).unwrap())
        .cancel_on(token)
        .delete(&[image("x@1"), image("x@2"), image("x@3")])
        .await;

    assert!(report.cancelled);
    assert_eq!(report.batches, 1);
    assert_eq!(report.deleted, 1);
    assert_eq!(memory.delete_calls(), vec![vec![image("x@1")]]);
    assert!(memory.contains(&image("x@2")));
    assert!(memory.contains(&image("x@3")));
}

#[tokio::test]
async fn cancel_mid_traversal_deletes_nothing_for_the_root() {
    let memory = Arc::new(MemoryRegistry::new());
    memory.insert(image("R@sha256:r1"), &[]);
    memory.insert(image("R/a@sha256:a1"), &[]);
    let token = CancellationToken::new();
    let backend = CancelDuring {
        inner: memory.clone(),
        operation: Operation::ListChildren,
        token: token.clone(),
    };

    let summary = Sweeper::new(Registry::new(backend), SweepOptions::default())
        .run_with_cancel(["R"], token)
        .await;

    assert!(summary.cancelled);
    let root = &summary.roots[0];
    assert!(root.cancelled);
    assert_eq!(root.visited, 1);
    assert_eq!(root.discovered, 1);
    assert_eq!(root.deleted, 0);
    assert_eq!(root.batches, 0);

    assert!(memory.delete_calls().is_empty());
    assert!(memory.contains(&image("R@sha256:r1")));
    assert!(memory.contains(&image("R/a@sha256:a1")));
    assert!(!memory
        .calls()
        .contains(&Call::ListUntaggedDigests(path("R/a"))));
}
