//! Configuration file for the janitor service.
//!
//! ```toml
//! listen = "0.0.0.0:8080"
//!
//! [registry]
//! url = "https://gcr.io"
//! credentials = { type = "basic", username = "oauth2accesstoken", password-env = "GCR_TOKEN" }
//! timeout-secs = 30
//!
//! [sweep]
//! batch-size = 20
//! pacing-ms = 1000
//! concurrency = 1
//! ```
//!
//! Every key is optional.

use std::net::{Ipv4Addr, SocketAddr};
use std::num::NonZeroUsize;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use gcr::{Credentials, RegistryApi, Token};
use serde::Deserialize;
use sweeper::{SweepOptions, DEFAULT_BATCH_SIZE};
use thiserror::Error;

/// Reasons the configuration could not be loaded or applied.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("reading {path}")]
    Read {
        /// Path to the configuration file.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid configuration.
    #[error("parsing {path}")]
    Parse {
        /// Path to the configuration file.
        path: Utf8PathBuf,
        /// Underlying TOML error.
        #[source]
        source: toml_edit::de::Error,
    },

    /// The registry URL could not be parsed.
    #[error("invalid registry url {url:?}")]
    InvalidUrl {
        /// The configured URL.
        url: String,
        /// Underlying URI error.
        #[source]
        source: http::uri::InvalidUri,
    },

    /// The registry URL is missing a scheme or host.
    #[error("registry url {0:?} must be absolute, e.g. https://gcr.io")]
    RelativeUrl(String),

    /// A secret was configured to come from an unset environment variable.
    #[error("environment variable {var} is not set")]
    MissingEnv {
        /// Name of the variable.
        var: String,
        /// Underlying lookup error.
        #[source]
        source: std::env::VarError,
    },
}

/// Top level of the configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct JanitorConfig {
    /// Address the HTTP trigger listens on.
    pub listen: SocketAddr,

    /// Which registry to sweep, and how to reach it.
    pub registry: RegistryConfig,

    /// How to sweep.
    pub sweep: SweepConfig,
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080)),
            registry: RegistryConfig::default(),
            sweep: SweepConfig::default(),
        }
    }
}

impl JanitorConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Utf8Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;

        toml_edit::de::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    /// Load from `path` if given, otherwise use the defaults.
    pub fn load(path: Option<&Utf8Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }
}

/// The `[registry]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct RegistryConfig {
    /// Base URL of the registry API.
    pub url: String,

    /// How to authenticate.
    pub credentials: CredentialsConfig,

    /// Per-request timeout. Zero disables the timeout.
    pub timeout_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            url: "https://gcr.io".into(),
            credentials: CredentialsConfig::default(),
            timeout_secs: 30,
        }
    }
}

impl RegistryConfig {
    /// Build a registry client from this configuration.
    pub fn client(&self) -> Result<RegistryApi, ConfigError> {
        let base: http::Uri = self.url.parse().map_err(|source| ConfigError::InvalidUrl {
            url: self.url.clone(),
            source,
        })?;
        if base.scheme().is_none() || base.authority().is_none() {
            return Err(ConfigError::RelativeUrl(self.url.clone()));
        }

        let api = RegistryApi::new(base, self.credentials.credentials()?);
        Ok(match self.timeout_secs {
            0 => api,
            secs => api.timeout(Duration::from_secs(secs)),
        })
    }
}

fn oauth2_user() -> String {
    "oauth2accesstoken".into()
}

/// How to authenticate against the registry.
///
/// Secrets are never written in the file; they are read from the named
/// environment variable at startup.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", deny_unknown_fields)]
pub enum CredentialsConfig {
    /// No authentication.
    #[default]
    Anonymous,

    /// A bearer access token.
    Bearer {
        /// Environment variable holding the token.
        #[serde(rename = "token-env")]
        token_env: String,
    },

    /// Basic authentication, by default as `oauth2accesstoken`.
    Basic {
        /// User name.
        #[serde(default = "oauth2_user")]
        username: String,

        /// Environment variable holding the password or access token.
        #[serde(rename = "password-env")]
        password_env: String,
    },
}

impl CredentialsConfig {
    /// Resolve the configured secrets.
    pub fn credentials(&self) -> Result<Credentials, ConfigError> {
        let from_env = |var: &str| {
            Token::from_env(var).map_err(|source| ConfigError::MissingEnv {
                var: var.to_owned(),
                source,
            })
        };

        Ok(match self {
            CredentialsConfig::Anonymous => Credentials::Anonymous,
            CredentialsConfig::Bearer { token_env } => Credentials::Bearer(from_env(token_env)?),
            CredentialsConfig::Basic {
                username,
                password_env,
            } => Credentials::Basic {
                username: username.clone(),
                password: from_env(password_env)?,
            },
        })
    }
}

/// The `[sweep]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct SweepConfig {
    /// References per delete call.
    pub batch_size: NonZeroUsize,

    /// Delay between repository expansions, in milliseconds. Zero disables pacing.
    pub pacing_ms: u64,

    /// Roots swept at the same time.
    pub concurrency: NonZeroUsize,

    /// Only report what would be deleted.
    pub dry_run: bool,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            pacing_ms: 1000,
            concurrency: NonZeroUsize::MIN,
            dry_run: false,
        }
    }
}

impl SweepConfig {
    /// Sweep options for this configuration.
    pub fn options(&self) -> SweepOptions {
        SweepOptions {
            batch_size: self.batch_size,
            pacing: (self.pacing_ms > 0).then(|| Duration::from_millis(self.pacing_ms)),
            concurrency: self.concurrency,
            dry_run: self.dry_run,
        }
    }
}
