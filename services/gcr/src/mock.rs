//! An in-process stand-in for a registry, for tests.
//!
//! [`MockRegistry`] is a tower service which can be handed to
//! [`RegistryApi::with_service`](crate::RegistryApi::with_service). Responses
//! are configured per method and path; anything unconfigured answers `404`.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::{HeaderValue, Method, StatusCode};
use parking_lot::Mutex;

#[derive(Debug, Clone)]
struct MockResponse {
    status: StatusCode,
    body: Bytes,
}

/// A request received by a [`MockRegistry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    /// Request method.
    pub method: Method,
    /// Request path, without the query.
    pub path: String,
    /// The `Authorization` header, if one was sent.
    pub authorization: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    responses: HashMap<(Method, String), MockResponse>,
    requests: Vec<RecordedRequest>,
}

/// A scripted registry. Clones share their configuration and request log.
#[derive(Debug, Default, Clone)]
pub struct MockRegistry {
    state: Arc<Mutex<State>>,
}

impl MockRegistry {
    /// A registry where every request answers `404`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `method path` with `status` and `body`.
    pub fn respond(&self, method: Method, path: &str, status: StatusCode, body: impl Into<Bytes>) {
        let response = MockResponse {
            status,
            body: body.into(),
        };
        self.state
            .lock()
            .responses
            .insert((method, path.to_owned()), response);
    }

    /// Answer the tag listing of `name` with the JSON document `body`.
    ///
    /// `name` is matched against the request path as sent, so escaped
    /// characters must be written escaped.
    pub fn tags(&self, name: &str, body: impl Into<Bytes>) {
        self.respond(
            Method::GET,
            &format!("/v2/{name}/tags/list"),
            StatusCode::OK,
            body,
        );
    }

    /// Accept deletes of `digest` in repository `name`.
    pub fn allow_delete(&self, name: &str, digest: &str) {
        self.respond(
            Method::DELETE,
            &format!("/v2/{name}/manifests/{digest}"),
            StatusCode::ACCEPTED,
            Bytes::new(),
        );
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().requests.clone()
    }

    fn answer(&self, req: &http::Request<hyperdriver::Body>) -> http::Response<hyperdriver::Body> {
        let path = req.uri().path().to_owned();
        let mut state = self.state.lock();

        state.requests.push(RecordedRequest {
            method: req.method().clone(),
            path: path.clone(),
            authorization: req
                .headers()
                .get(AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned),
        });

        let (status, body) = match state.responses.get(&(req.method().clone(), path)) {
            Some(response) => (response.status, response.body.clone()),
            None => (StatusCode::NOT_FOUND, Bytes::from_static(b"{\"errors\":[]}")),
        };

        let mut response = http::Response::new(hyperdriver::Body::from(body));
        *response.status_mut() = status;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response
    }
}

impl tower::Service<http::Request<hyperdriver::Body>> for MockRegistry {
    type Response = http::Response<hyperdriver::Body>;
    type Error = hyperdriver::client::Error;
    type Future = std::future::Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<hyperdriver::Body>) -> Self::Future {
        std::future::ready(Ok(self.answer(&req)))
    }
}
