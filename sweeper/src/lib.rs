//! # Sweeper
//!
//! Finds container images which no longer carry any tag ("dangling" images)
//! anywhere below a set of root repositories, and deletes them in batches.
//!
//! The registry namespace is not known in advance. It is discovered one
//! backend call at a time by a depth-first [`Traversal`], and the untagged
//! images it finds are handed to a [`Deletion`]. A [`Sweeper`] runs both for
//! each requested root and aggregates a [`RunSummary`].
//!
//! Registries are reached through the [`Backend`] trait, wrapped in a shared
//! [`Registry`] handle. [`MemoryRegistry`] is an in-memory backend for tests
//! and experiments.
//!
//! Backend failures never abort a sweep: a failed read means that repository
//! contributes nothing for that step, and a failed delete batch is recorded
//! while later batches still run.
//!
//! ## Example
//!
//! ```
//! use sweeper::{MemoryRegistry, Registry, SweepOptions, Sweeper};
//!
//! # async fn example() {
//! let memory = MemoryRegistry::new();
//! memory.insert("gcr.io/project/app@sha256:0123".parse().unwrap(), &[]);
//! memory.insert("gcr.io/project/app@sha256:4567".parse().unwrap(), &["latest"]);
//!
//! let sweeper = Sweeper::new(Registry::new(memory), SweepOptions::default());
//! let summary = sweeper.run(["gcr.io/project"]).await;
//!
//! assert_eq!(summary.images_discovered, 1);
//! assert_eq!(summary.images_deleted, 1);
//! # }
//! ```

mod backend;
mod deletion;
mod error;
mod memory;
mod reference;
mod sweep;
mod traversal;

pub use backend::{Backend, Operation, Registry};
pub use deletion::{BatchFailure, Deletion, DeletionReport, DEFAULT_BATCH_SIZE};
pub use error::{BackendError, BackendErrorKind};
pub use memory::{Call, MemoryRegistry};
pub use reference::{Digest, ImageReference, InvalidInput, RepositoryPath};
pub use sweep::{RootReport, RunSummary, SweepOptions, Sweeper};
pub use traversal::{Discovery, ReadFailure, Traversal};

/// Re-exported so callers can cancel sweeps without depending on `tokio-util`.
pub use tokio_util::sync::CancellationToken;
