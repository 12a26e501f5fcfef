//! # Janitor
//!
//! A service which sweeps dangling (untagged) images out of a container
//! registry on request.
//!
//! The service is an axum [`Router`](axum::Router) built by
//! [`JanitorBuilder`]. A `POST /` with a JSON body naming the roots runs a
//! sweep with [`sweeper::Sweeper`] and answers with the
//! [`RunSummary`](sweeper::RunSummary):
//!
//! ```text
//! POST /
//! {"repositories": ["gcr.io/my-project/app", "gcr.io/my-project/tools"], "dry_run": false}
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use janitor::JanitorBuilder;
//! use sweeper::{MemoryRegistry, Registry, SweepOptions, Sweeper};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let sweeper = Sweeper::new(Registry::new(MemoryRegistry::new()), SweepOptions::default());
//! let app = JanitorBuilder::new(sweeper).build();
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

mod api;
pub mod config;

pub use api::{JanitorBuilder, Repositories, SweepRequest};
pub use config::{ConfigError, JanitorConfig};
