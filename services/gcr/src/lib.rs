//! # GCR
//!
//! A [`sweeper::Backend`] for Google Container Registry and Artifact
//! Registry, speaking the registry HTTP API with Google's `tags/list`
//! extension, which reports nested repositories (`child`) and every
//! manifest with its tags (`manifest`).
//!
//! ```no_run
//! use gcr::{Credentials, RegistryApi, Token};
//! use sweeper::{Registry, SweepOptions, Sweeper};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let credentials = Credentials::Basic {
//!     username: "oauth2accesstoken".into(),
//!     password: Token::from_env("GCR_TOKEN")?,
//! };
//! let api = RegistryApi::new("https://gcr.io".parse()?, credentials);
//!
//! let sweeper = Sweeper::new(Registry::new(api), SweepOptions::default());
//! let summary = sweeper.run(["gcr.io/my-project"]).await;
//! println!("deleted {} images", summary.images_deleted);
//! # Ok(())
//! # }
//! ```

mod client;
mod credentials;
pub mod mock;
pub mod models;

pub use self::client::{BatchDeleteError, HttpStatusError, RegistryApi};
pub use self::credentials::{Credentials, Token};
