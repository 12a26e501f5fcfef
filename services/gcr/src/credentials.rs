//! Registry credentials.
//!
//! Google Container Registry and Artifact Registry accept either a bearer
//! access token, or basic authentication with the user `oauth2accesstoken`
//! and an access token as the password.

use std::env::VarError;
use std::fmt;

use http::header::InvalidHeaderValue;
use http::HeaderValue;
use serde::Deserialize;
use zeroize::Zeroize;

/// A secret credential value.
///
/// The value never appears in `Debug` output and is zeroed when dropped. Use
/// [`Token::revealed`] to get at it.
#[derive(Clone, Deserialize)]
#[serde(from = "String")]
pub struct Token(String);

impl Token {
    /// Read a token from an environment variable.
    pub fn from_env(var: &str) -> Result<Self, VarError> {
        std::env::var(var).map(Token)
    }

    /// Expose the underlying value.
    pub fn revealed(&self) -> &str {
        &self.0
    }
}

impl Drop for Token {
    fn drop(&mut self) {
        self.0.zeroize()
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Token(****)")
    }
}

impl From<String> for Token {
    fn from(value: String) -> Self {
        Token(value)
    }
}

impl From<&str> for Token {
    fn from(value: &str) -> Self {
        Token(value.to_owned())
    }
}

/// How to authenticate against the registry.
#[derive(Debug, Clone, Default)]
pub enum Credentials {
    /// No `Authorization` header.
    #[default]
    Anonymous,

    /// `Authorization: Bearer <token>`
    Bearer(Token),

    /// `Authorization: Basic base64(<username>:<password>)`
    Basic {
        /// Account name, e.g. `oauth2accesstoken` or `_json_key`.
        username: String,
        /// Password or access token.
        password: Token,
    },
}

impl Credentials {
    /// The `Authorization` header value for these credentials, if any.
    pub fn authorization(&self) -> Result<Option<HeaderValue>, InvalidHeaderValue> {
        let mut header = match self {
            Credentials::Anonymous => return Ok(None),
            Credentials::Bearer(token) => {
                HeaderValue::try_from(format!("Bearer {}", token.revealed()))?
            }
            Credentials::Basic { username, password } => {
                basic_auth(username, password.revealed())?
            }
        };
        header.set_sensitive(true);
        Ok(Some(header))
    }
}

fn basic_auth(username: &str, password: &str) -> Result<HeaderValue, InvalidHeaderValue> {
    use base64::prelude::BASE64_STANDARD;
    use base64::write::EncoderWriter;
    use std::io::Write;

    let mut buf = b"Basic ".to_vec();
    {
        let mut encoder = EncoderWriter::new(&mut buf, &BASE64_STANDARD);
        let _ = write!(encoder, "{}:{}", username, password);
    }
    let header = HeaderValue::from_bytes(&buf);
    buf.zeroize();
    header
}
