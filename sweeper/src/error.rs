use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;

use tracing_error::SpanTrace;

/// Categorizes backend failures independently of the backend that produced them.
///
/// None of these abort a sweep: the affected node or batch contributes nothing
/// and the failure is counted in the run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendErrorKind {
    /// The call could not be completed (network, authentication, timeout,
    /// throttling or a server-side failure).
    Unavailable,

    /// The backend answered, but the answer could not be decoded into
    /// repository paths or digests.
    MalformedResponse,

    /// The backend refused a mutating call, e.g. because a digest was already
    /// deleted or has been tagged since it was discovered.
    Rejected,
}

impl fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendErrorKind::Unavailable => write!(f, "backend unavailable"),
            BackendErrorKind::MalformedResponse => write!(f, "malformed response"),
            BackendErrorKind::Rejected => write!(f, "rejected"),
        }
    }
}

#[derive(Debug)]
struct ErrorTrace {
    backtrace: Backtrace,
    span_trace: SpanTrace,
}

impl ErrorTrace {
    #[track_caller]
    fn capture() -> Self {
        ErrorTrace {
            backtrace: Backtrace::capture(),
            span_trace: SpanTrace::capture(),
        }
    }
}

/// A failed call to a registry backend.
///
/// Carries the semantic [`BackendErrorKind`], the backend name, the repository
/// the call was about (when there is a single one), optional context and the
/// underlying error. A backtrace and a tracing span trace are captured at
/// construction.
#[derive(Debug)]
pub struct BackendError {
    kind: BackendErrorKind,
    backend: &'static str,
    repository: Option<String>,
    context: Option<String>,
    source: Box<dyn StdError + Send + Sync + 'static>,
    traces: Box<ErrorTrace>,
}

impl StdError for BackendError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.source.as_ref())
    }
}

impl BackendError {
    /// Create a backend error with the minimum required information.
    #[track_caller]
    pub fn new<E>(backend: &'static str, kind: BackendErrorKind, error: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        Self {
            kind,
            backend,
            repository: None,
            context: None,
            source: error.into(),
            traces: Box::new(ErrorTrace::capture()),
        }
    }

    /// Shorthand for a [`BackendErrorKind::Unavailable`] error.
    #[track_caller]
    pub fn unavailable<E>(backend: &'static str, error: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        Self::new(backend, BackendErrorKind::Unavailable, error)
    }

    /// Shorthand for a [`BackendErrorKind::MalformedResponse`] error.
    #[track_caller]
    pub fn malformed<E>(backend: &'static str, error: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        Self::new(backend, BackendErrorKind::MalformedResponse, error)
    }

    /// Shorthand for a [`BackendErrorKind::Rejected`] error.
    #[track_caller]
    pub fn rejected<E>(backend: &'static str, error: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        Self::new(backend, BackendErrorKind::Rejected, error)
    }

    /// Returns a boxed closure that creates a backend error from a downstream error,
    /// for use with `.map_err()`.
    pub fn with<E>(
        backend: &'static str,
        kind: BackendErrorKind,
    ) -> Box<dyn FnOnce(E) -> BackendError + Send + Sync>
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        Box::new(move |error: E| BackendError::new(backend, kind, error))
    }

    /// Attach the repository the failed call was about.
    pub fn repository(mut self, repository: impl Into<String>) -> Self {
        self.repository = Some(repository.into());
        self
    }

    /// Attach additional context.
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// The error kind.
    pub fn kind(&self) -> BackendErrorKind {
        self.kind
    }

    /// The name of the backend which produced this error.
    pub fn backend(&self) -> &'static str {
        self.backend
    }

    /// The repository the failed call was about, if any.
    pub fn repository_name(&self) -> Option<&str> {
        self.repository.as_deref()
    }

    /// Additional context, if any.
    pub fn context_message(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// The captured backtrace.
    pub fn backtrace(&self) -> &Backtrace {
        &self.traces.backtrace
    }

    /// The tracing span context at the point this error was created.
    pub fn span_trace(&self) -> &SpanTrace {
        &self.traces.span_trace
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Registry error [{}] from {}", self.kind, self.backend)?;

        if let Some(repository) = &self.repository {
            write!(f, " (repository: {})", repository)?;
        }

        if let Some(context) = &self.context {
            write!(f, " ({})", context)?;
        }

        write!(f, ": {}", self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static_assertions::assert_impl_all!(BackendError: Send, Sync);

    #[test]
    fn display_includes_context() {
        let err = BackendError::unavailable("memory", "connection reset")
            .repository("gcr.io/project")
            .context("list children");

        assert_eq!(err.kind(), BackendErrorKind::Unavailable);
        assert_eq!(err.repository_name(), Some("gcr.io/project"));
        assert_eq!(
            err.to_string(),
            "Registry error [backend unavailable] from memory (repository: gcr.io/project) (list children): connection reset"
        );
    }

    #[test]
    fn with_builds_from_downstream_errors() {
        let err: Result<(), _> = Err(std::io::Error::other("boom"))
            .map_err(BackendError::with("memory", BackendErrorKind::MalformedResponse));
        let err = err.unwrap_err();
        assert_eq!(err.kind(), BackendErrorKind::MalformedResponse);
        assert!(err.source().is_some());
    }
}
