use std::sync::Arc;
use std::time::Duration;

use arc_swap::{ArcSwap, Guard};
use bytes::Bytes;
use http::header::{ACCEPT, AUTHORIZATION};
use http::{Method, StatusCode, Uri};
use hyperdriver::service::SharedService;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sweeper::{Backend, BackendError, BackendErrorKind, Digest, ImageReference, RepositoryPath};
use thiserror::Error;
use tower::ServiceExt;

use crate::credentials::Credentials;
use crate::models::TagList;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

const BACKEND: &str = "gcr";

/// Escaped inside one path segment. Leaves the characters of ordinary
/// repository names and `algorithm:hex` digests readable.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b':');

/// Percent-encode each `/`-separated segment of `name`.
fn encode_segments(name: &str) -> String {
    name.split('/')
        .map(|segment| utf8_percent_encode(segment, SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// The registry answered with an unexpected status code.
#[derive(Debug, Clone, Error)]
#[error("HTTP {status} response: {message}")]
pub struct HttpStatusError {
    /// The HTTP status code of the response.
    pub status: StatusCode,

    /// The response body, decoded lossily.
    pub message: String,
}

impl HttpStatusError {
    fn new(status: StatusCode, body: &[u8]) -> Self {
        Self {
            status,
            message: String::from_utf8_lossy(body).trim().to_owned(),
        }
    }
}

/// Some deletes in a batch failed.
#[derive(Debug, Error)]
#[error("{} of {} deletes failed{}", .failures.len(), .total, first_failure(.failures))]
pub struct BatchDeleteError {
    total: usize,
    failures: Vec<(ImageReference, BackendError)>,
}

impl BatchDeleteError {
    /// References which could not be deleted, with the reason for each.
    pub fn failures(&self) -> &[(ImageReference, BackendError)] {
        &self.failures
    }

    fn kind(&self) -> BackendErrorKind {
        if self
            .failures
            .iter()
            .any(|(_, error)| error.kind() == BackendErrorKind::Unavailable)
        {
            BackendErrorKind::Unavailable
        } else {
            BackendErrorKind::Rejected
        }
    }
}

fn first_failure(failures: &[(ImageReference, BackendError)]) -> String {
    failures
        .first()
        .map(|(image, error)| format!(", first {image}: {error}"))
        .unwrap_or_default()
}

/// Client for a Google Container Registry or Artifact Registry host.
///
/// Implements [`Backend`] on top of the registry HTTP API:
/// `GET /v2/{name}/tags/list` for reads and
/// `DELETE /v2/{name}/manifests/{digest}` for deletes.
#[derive(Debug, Clone)]
pub struct RegistryApi {
    base: Uri,
    credentials: Arc<ArcSwap<Credentials>>,
    inner: hyperdriver::client::SharedClientService<hyperdriver::Body, hyperdriver::Body>,
    timeout: Option<Duration>,
}

impl RegistryApi {
    /// Create a client for the registry at `base`, e.g. `https://gcr.io`.
    pub fn new(base: Uri, credentials: Credentials) -> Self {
        let inner = hyperdriver::Client::build_tcp_http()
            .with_default_tls()
            .build_service();

        RegistryApi {
            base,
            credentials: Arc::new(ArcSwap::from_pointee(credentials)),
            inner,
            timeout: None,
        }
    }

    /// Create a client which sends requests through `inner` instead of the network.
    pub fn with_service<S>(base: Uri, credentials: Credentials, inner: S) -> Self
    where
        S: tower::Service<
                http::Request<hyperdriver::Body>,
                Response = http::Response<hyperdriver::Body>,
                Error = hyperdriver::client::Error,
            > + Clone
            + Send
            + Sync
            + 'static,
        S::Future: Send + 'static,
    {
        let service = tower::ServiceBuilder::new()
            .layer(SharedService::layer())
            .service(inner);

        RegistryApi {
            base,
            credentials: Arc::new(ArcSwap::from_pointee(credentials)),
            inner: service,
            timeout: None,
        }
    }

    /// Fail any request which takes longer than `timeout` as unavailable.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The registry this client talks to.
    pub fn base(&self) -> &Uri {
        &self.base
    }

    /// Replace the credentials for all clones of this client.
    pub fn set_credentials(&self, credentials: Credentials) {
        self.credentials.store(Arc::new(credentials));
    }

    /// The credentials currently in use.
    pub fn credentials(&self) -> Guard<Arc<Credentials>> {
        self.credentials.load()
    }

    /// The name of `repository` on this registry.
    ///
    /// Paths are usually written with the registry host in front
    /// (`gcr.io/project/app`); the API wants them without it.
    pub fn remote_name<'a>(&self, repository: &'a RepositoryPath) -> &'a str {
        let name = repository.as_str();
        let Some(authority) = self.base.authority() else {
            return name;
        };

        [authority.as_str(), authority.host()]
            .into_iter()
            .find_map(|host| name.strip_prefix(host)?.strip_prefix('/'))
            .unwrap_or(name)
    }

    fn uri(&self, path: &str) -> Result<Uri, BoxError> {
        let (Some(scheme), Some(authority)) = (self.base.scheme(), self.base.authority()) else {
            return Err(format!("registry url {} is not absolute", self.base).into());
        };
        let prefix = self.base.path().trim_end_matches('/');

        Ok(Uri::builder()
            .scheme(scheme.clone())
            .authority(authority.clone())
            .path_and_query(format!("{prefix}{path}"))
            .build()?)
    }

    fn request(&self, method: Method, path: &str) -> Result<http::Request<hyperdriver::Body>, BoxError> {
        let mut builder = http::Request::builder()
            .method(method)
            .uri(self.uri(path)?)
            .header(ACCEPT, "application/json");

        if let Some(authorization) = self.credentials.load().authorization()? {
            builder = builder.header(AUTHORIZATION, authorization);
        }

        Ok(builder.body(hyperdriver::Body::empty())?)
    }

    /// Send one request and read the whole response.
    ///
    /// Only transport failures are errors here; status codes are left to the caller.
    async fn execute(&self, method: Method, path: &str) -> Result<(StatusCode, Bytes), BackendError> {
        let request = self
            .request(method, path)
            .map_err(BackendError::with(BACKEND, BackendErrorKind::Unavailable))
            .map_err(|error| error.context("building request"))?;

        let exchange = async {
            let response = self.inner.clone().oneshot(request).await?;
            let status = response.status();
            let body = read_body(response.into_body()).await?;
            Ok::<_, BoxError>((status, body))
        };

        let outcome = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, exchange)
                .await
                .unwrap_or_else(|elapsed| Err(elapsed.into())),
            None => exchange.await,
        };

        outcome.map_err(BackendError::with(BACKEND, BackendErrorKind::Unavailable))
    }

    /// Fetch the tag listing of a repository. `None` if it does not exist.
    async fn tag_list(&self, repository: &RepositoryPath) -> Result<Option<TagList>, BackendError> {
        let path = format!(
            "/v2/{}/tags/list",
            encode_segments(self.remote_name(repository))
        );
        let (status, body) = self
            .execute(Method::GET, &path)
            .await
            .map_err(|error| error.repository(repository.as_str()))?;

        if status == StatusCode::NOT_FOUND {
            tracing::debug!(%repository, "Repository not found, treating as empty");
            return Ok(None);
        }

        if !status.is_success() {
            return Err(
                BackendError::unavailable(BACKEND, HttpStatusError::new(status, &body))
                    .repository(repository.as_str())
                    .context("listing tags"),
            );
        }

        serde_json::from_slice(&body).map(Some).map_err(|error| {
            BackendError::malformed(BACKEND, error)
                .repository(repository.as_str())
                .context("decoding tag list")
        })
    }

    async fn delete_manifest(&self, image: &ImageReference) -> Result<(), BackendError> {
        let path = format!(
            "/v2/{}/manifests/{}",
            encode_segments(self.remote_name(image.repository())),
            utf8_percent_encode(image.digest().as_str(), SEGMENT)
        );
        let (status, body) = self
            .execute(Method::DELETE, &path)
            .await
            .map_err(|error| error.repository(image.repository().as_str()))?;

        if status.is_success() {
            return Ok(());
        }

        Err(
            BackendError::new(BACKEND, delete_failure(status), HttpStatusError::new(status, &body))
                .repository(image.repository().as_str())
                .context(format!("deleting {}", image.digest())),
        )
    }
}

/// Throttling, authentication and server failures may succeed on a later
/// run. Any other client error means the registry refused this delete.
fn delete_failure(status: StatusCode) -> BackendErrorKind {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS => {
            BackendErrorKind::Unavailable
        }
        status if status.is_client_error() => BackendErrorKind::Rejected,
        _ => BackendErrorKind::Unavailable,
    }
}

async fn read_body<B>(body: B) -> Result<Bytes, BoxError>
where
    B: http_body::Body,
    B::Error: Into<BoxError>,
{
    use http_body_util::BodyExt as _;

    let collected = body.collect().await.map_err(Into::into)?;
    Ok(collected.to_bytes())
}

#[async_trait::async_trait]
impl Backend for RegistryApi {
    fn name(&self) -> &'static str {
        BACKEND
    }

    async fn list_children(
        &self,
        repository: &RepositoryPath,
    ) -> Result<Vec<RepositoryPath>, BackendError> {
        let Some(list) = self.tag_list(repository).await? else {
            return Ok(Vec::new());
        };

        list.child
            .iter()
            .map(|name| {
                repository.child(name).map_err(|error| {
                    BackendError::malformed(BACKEND, error)
                        .repository(repository.as_str())
                        .context("child repository name")
                })
            })
            .collect()
    }

    async fn list_untagged_digests(
        &self,
        repository: &RepositoryPath,
    ) -> Result<Vec<Digest>, BackendError> {
        let Some(list) = self.tag_list(repository).await? else {
            return Ok(Vec::new());
        };

        list.untagged()
            .map(|digest| {
                Digest::new(digest).map_err(|error| {
                    BackendError::malformed(BACKEND, error)
                        .repository(repository.as_str())
                        .context("manifest digest")
                })
            })
            .collect()
    }

    async fn delete_batch(&self, images: &[ImageReference]) -> Result<(), BackendError> {
        let mut failures = Vec::new();

        for image in images {
            match self.delete_manifest(image).await {
                Ok(()) => tracing::trace!(%image, "Deleted manifest"),
                Err(error) => {
                    tracing::debug!(%image, "Delete failed: {error}");
                    failures.push((image.clone(), error));
                }
            }
        }

        if failures.is_empty() {
            return Ok(());
        }

        let error = BatchDeleteError {
            total: images.len(),
            failures,
        };
        Err(BackendError::new(BACKEND, error.kind(), error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockRegistry;

    fn path(s: &str) -> RepositoryPath {
        s.parse().unwrap()
    }

    fn client(mock: &MockRegistry) -> RegistryApi {
        RegistryApi::with_service(
            "https://gcr.io".parse().unwrap(),
            Credentials::Anonymous,
            mock.clone(),
        )
    }

    #[test]
    fn remote_name_strips_registry_host() {
        let api = client(&MockRegistry::new());
        assert_eq!(api.remote_name(&path("gcr.io/project/app")), "project/app");
        assert_eq!(api.remote_name(&path("project/app")), "project/app");
        assert_eq!(api.remote_name(&path("gcr.iox/app")), "gcr.iox/app");
        assert_eq!(api.remote_name(&path("gcr.io")), "gcr.io");
    }

    #[test]
    fn base_path_is_kept() {
        let api = RegistryApi::with_service(
            "http://localhost:5000/mirror/".parse().unwrap(),
            Credentials::Anonymous,
            MockRegistry::new(),
        );
        assert_eq!(
            api.uri("/v2/app/tags/list").unwrap(),
            "http://localhost:5000/mirror/v2/app/tags/list"
        );
        assert_eq!(api.remote_name(&path("localhost:5000/app")), "app");
    }

    #[test]
    fn relative_base_is_an_error() {
        let api = RegistryApi::with_service(
            Uri::from_static("/v2"),
            Credentials::Anonymous,
            MockRegistry::new(),
        );
        assert!(api.uri("/v2/app/tags/list").is_err());
    }

    #[test]
    fn path_segments_are_escaped() {
        assert_eq!(encode_segments("project/app"), "project/app");
        assert_eq!(encode_segments("p/my-app_v1.2~x"), "p/my-app_v1.2~x");
        assert_eq!(encode_segments("p/caf\u{e9}"), "p/caf%C3%A9");
        assert_eq!(encode_segments("p/a+b"), "p/a%2Bb");
        assert_eq!(encode_segments("p/a?b"), "p/a%3Fb");
    }

    #[test]
    fn delete_status_mapping() {
        assert_eq!(delete_failure(StatusCode::NOT_FOUND), BackendErrorKind::Rejected);
        assert_eq!(delete_failure(StatusCode::BAD_REQUEST), BackendErrorKind::Rejected);
        assert_eq!(delete_failure(StatusCode::FORBIDDEN), BackendErrorKind::Unavailable);
        assert_eq!(
            delete_failure(StatusCode::TOO_MANY_REQUESTS),
            BackendErrorKind::Unavailable
        );
        assert_eq!(
            delete_failure(StatusCode::BAD_GATEWAY),
            BackendErrorKind::Unavailable
        );
    }

    #[tokio::test]
    async fn credentials_can_be_swapped() {
        let mock = MockRegistry::new();
        let api = client(&mock);
        let other = api.clone();

        api.list_children(&path("gcr.io/p")).await.unwrap();
        other.set_credentials(Credentials::Bearer("fresh".into()));
        api.list_children(&path("gcr.io/p")).await.unwrap();

        let requests = mock.requests();
        assert_eq!(requests[0].authorization, None);
        assert_eq!(requests[1].authorization.as_deref(), Some("Bearer fresh"));
        assert!(matches!(**api.credentials(), Credentials::Bearer(_)));
    }
}
