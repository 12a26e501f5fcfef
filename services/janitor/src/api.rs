//! HTTP trigger for sweeps.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use sweeper::{RunSummary, SweepOptions, Sweeper};
use tokio_util::sync::CancellationToken;

/// The roots to sweep: one repository path, or a list of them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Repositories {
    /// A single root.
    One(String),
    /// Several roots, swept in order.
    Many(Vec<String>),
}

impl Repositories {
    /// The roots, in request order.
    pub fn into_vec(self) -> Vec<String> {
        match self {
            Repositories::One(root) => vec![root],
            Repositories::Many(roots) => roots,
        }
    }
}

/// Body of a sweep trigger.
#[derive(Debug, Clone, Deserialize)]
pub struct SweepRequest {
    /// Roots to sweep.
    pub repositories: Repositories,

    /// Report untagged images without deleting them.
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
struct Janitor {
    sweeper: Sweeper,
    shutdown: CancellationToken,
}

/// Builds the janitor's HTTP router.
#[derive(Debug)]
pub struct JanitorBuilder {
    sweeper: Sweeper,
    shutdown: CancellationToken,
}

impl JanitorBuilder {
    /// Create a builder which sweeps with `sweeper`.
    pub fn new(sweeper: Sweeper) -> Self {
        Self {
            sweeper,
            shutdown: CancellationToken::new(),
        }
    }

    /// Cancel in-flight sweeps when `shutdown` is cancelled.
    pub fn shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Build the service.
    ///
    /// `POST /` runs a sweep and answers with its summary once every root is
    /// done. `GET /healthz` answers `{}`.
    pub fn build(self) -> Router {
        let janitor = Janitor {
            sweeper: self.sweeper,
            shutdown: self.shutdown,
        };

        Router::new()
            .route("/", post(trigger))
            .route("/healthz", get(healthz))
            .with_state(janitor)
    }
}

async fn trigger(
    State(janitor): State<Janitor>,
    Json(request): Json<SweepRequest>,
) -> Json<RunSummary> {
    let sweeper = if request.dry_run {
        janitor.sweeper.with_options(SweepOptions {
            dry_run: true,
            ..janitor.sweeper.options().clone()
        })
    } else {
        janitor.sweeper.clone()
    };

    let roots = request.repositories.into_vec();
    tracing::info!(?roots, dry_run = request.dry_run, "Sweep triggered");

    let summary = sweeper
        .run_with_cancel(roots, janitor.shutdown.child_token())
        .await;
    Json(summary)
}

async fn healthz() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::OK, Json(json!({})))
}
