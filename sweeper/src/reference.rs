//! Repository paths, digests and image references.
//!
//! All three are opaque strings as far as the sweeper is concerned. They are
//! validated on construction so that a value which reaches a backend can never
//! change the meaning of the call it is placed in, but they are never
//! normalized: two paths are equal only when their strings are equal.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A caller supplied a repository path or digest which can't be used.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {what} {input:?}: {reason}")]
pub struct InvalidInput {
    what: &'static str,
    input: String,
    reason: &'static str,
}

impl InvalidInput {
    fn new(what: &'static str, input: &str, reason: &'static str) -> Self {
        Self {
            what,
            input: input.to_owned(),
            reason,
        }
    }

    /// The rejected input, verbatim.
    pub fn input(&self) -> &str {
        &self.input
    }

    /// Why the input was rejected.
    pub fn reason(&self) -> &'static str {
        self.reason
    }
}

fn has_forbidden_chars(s: &str) -> bool {
    s.chars().any(|c| c.is_whitespace() || c.is_control())
}

/// Characters which end or escape a URL path.
fn has_url_delimiters(s: &str) -> bool {
    s.contains(['?', '#', '%'])
}

/// A node in the registry namespace, e.g. `gcr.io/project/app`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepositoryPath(String);

impl RepositoryPath {
    /// Validate a repository path.
    pub fn new(path: impl Into<String>) -> Result<Self, InvalidInput> {
        let path = path.into();
        Self::validate(&path)?;
        Ok(RepositoryPath(path))
    }

    fn validate(path: &str) -> Result<(), InvalidInput> {
        let invalid = |reason| Err(InvalidInput::new("repository path", path, reason));

        if path.is_empty() {
            return invalid("empty");
        }
        if has_forbidden_chars(path) {
            return invalid("contains whitespace or control characters");
        }
        if path.contains('@') {
            return invalid("contains '@'");
        }
        if has_url_delimiters(path) {
            return invalid("contains '?', '#' or '%'");
        }
        if path.starts_with('/') || path.ends_with('/') {
            return invalid("leading or trailing '/'");
        }
        for segment in path.split('/') {
            match segment {
                "" => return invalid("empty path segment"),
                "." | ".." => return invalid("relative path segment"),
                _ => {}
            }
        }
        Ok(())
    }

    /// The path one level below this one, named `name`.
    ///
    /// `name` may itself contain `/` when a backend reports deeper paths.
    pub fn child(&self, name: &str) -> Result<Self, InvalidInput> {
        Self::new(format!("{}/{}", self.0, name))
    }

    /// Whether `self` lies strictly below `ancestor`.
    pub fn is_descendant_of(&self, ancestor: &RepositoryPath) -> bool {
        self.0
            .strip_prefix(ancestor.as_str())
            .is_some_and(|rest| rest.starts_with('/'))
    }

    /// Borrow the path as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reference a digest stored in this repository.
    pub fn image(&self, digest: Digest) -> ImageReference {
        ImageReference::new(self.clone(), digest)
    }
}

impl fmt::Display for RepositoryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RepositoryPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for RepositoryPath {
    type Err = InvalidInput;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for RepositoryPath {
    type Error = InvalidInput;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RepositoryPath> for String {
    fn from(value: RepositoryPath) -> Self {
        value.0
    }
}

/// A content digest, meaningful only inside the repository that reported it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest(String);

impl Digest {
    /// Validate a digest.
    pub fn new(digest: impl Into<String>) -> Result<Self, InvalidInput> {
        let digest = digest.into();
        let invalid = |reason| Err(InvalidInput::new("digest", &digest, reason));

        if digest.is_empty() {
            return invalid("empty");
        }
        if has_forbidden_chars(&digest) {
            return invalid("contains whitespace or control characters");
        }
        if digest.contains(|c: char| c == '@' || c == '/') {
            return invalid("contains '@' or '/'");
        }
        if has_url_delimiters(&digest) {
            return invalid("contains '?', '#' or '%'");
        }
        if digest == "." || digest == ".." {
            return invalid("relative path segment");
        }
        Ok(Digest(digest))
    }

    /// Borrow the digest as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Digest {
    type Err = InvalidInput;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Digest {
    type Error = InvalidInput;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Digest> for String {
    fn from(value: Digest) -> Self {
        value.0
    }
}

/// One immutable artifact, `repository@digest`.
///
/// Deletion always goes through digest references so that exactly the
/// untagged artifact which was discovered is targeted.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ImageReference {
    repository: RepositoryPath,
    digest: Digest,
}

impl ImageReference {
    /// Combine a repository and one of its digests.
    pub fn new(repository: RepositoryPath, digest: Digest) -> Self {
        Self { repository, digest }
    }

    /// The repository holding the artifact.
    pub fn repository(&self) -> &RepositoryPath {
        &self.repository
    }

    /// The artifact's digest.
    pub fn digest(&self) -> &Digest {
        &self.digest
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.repository, self.digest)
    }
}

impl FromStr for ImageReference {
    type Err = InvalidInput;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (repository, digest) = s
            .rsplit_once('@')
            .ok_or_else(|| InvalidInput::new("image reference", s, "missing '@digest'"))?;
        Ok(Self::new(repository.parse()?, digest.parse()?))
    }
}

impl Serialize for ImageReference {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ImageReference {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
