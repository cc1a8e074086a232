//! Configuration: host credentials and filesystem tunables.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Scheme of arcfs connection strings.
pub const SCHEME: &str = "arcfs";

const ENV_URL: &str = "ARCFS_URL";
const ENV_TOKEN: &str = "ARCFS_TOKEN";
const ENV_SERVER_URL: &str = "ARCFS_SERVER_URL";

/// Errors building a [`HostConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("connection string must start with {SCHEME}://")]
    Scheme,
    #[error("connection string has no credential (expected {SCHEME}://<token>@<host>)")]
    MissingCredential,
    #[error("host url is empty")]
    MissingHost,
    #[error("environment variable {0} is not set")]
    MissingEnv(&'static str),
}

/// An access token. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token, for building request headers.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Where the repository host lives and how to authenticate against it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    pub credential: Credential,
    /// base URL with scheme and without trailing slash
    pub host_url: String,
}

impl HostConfig {
    pub fn new(credential: impl Into<String>, host_url: impl Into<String>) -> Result<Self, ConfigError> {
        let credential = credential.into();
        if credential.is_empty() {
            return Err(ConfigError::MissingCredential);
        }
        Ok(Self {
            credential: Credential::new(credential),
            host_url: normalize_host_url(&host_url.into())?,
        })
    }

    /// Parse `arcfs://<credential>@<host-url>`.
    ///
    /// The host url may carry its own scheme (`arcfs://tok@http://localhost:8080`);
    /// without one it defaults to https.
    pub fn from_connection_string(s: &str) -> Result<Self, ConfigError> {
        let rest = s
            .strip_prefix(SCHEME)
            .and_then(|r| r.strip_prefix("://"))
            .ok_or(ConfigError::Scheme)?;
        // first '@' ends the token; the host url may carry its own userinfo
        let (credential, host) = rest.split_once('@').ok_or(ConfigError::MissingCredential)?;
        Self::new(credential, host)
    }

    /// Read `ARCFS_URL`, or `ARCFS_TOKEN` plus `ARCFS_SERVER_URL`.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(url) = std::env::var(ENV_URL) {
            return Self::from_connection_string(&url);
        }
        let token = std::env::var(ENV_TOKEN).map_err(|_| ConfigError::MissingEnv(ENV_TOKEN))?;
        let server = std::env::var(ENV_SERVER_URL).map_err(|_| ConfigError::MissingEnv(ENV_SERVER_URL))?;
        Self::new(token, server)
    }

    /// The connection string for this config, with the credential redacted.
    pub fn redacted(&self) -> String {
        format!("{}://{}@{}", SCHEME, self.credential, self.host_url)
    }
}

impl FromStr for HostConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_connection_string(s)
    }
}

fn normalize_host_url(url: &str) -> Result<String, ConfigError> {
    let url = url.trim().trim_end_matches('/');
    if url.is_empty() {
        return Err(ConfigError::MissingHost);
    }
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(url.to_string())
    } else {
        Ok(format!("https://{}", url))
    }
}

/// How the resolver treats a directory name that matches several repositories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AmbiguityPolicy {
    /// refuse with an invalid-path error
    #[default]
    FailClosed,
    /// take the candidate split at the rightmost separator (longest namespace)
    PreferRightmost,
}

/// Filesystem tunables.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use arcfs::ArcFsConfig;
///
/// let config = ArcFsConfig::new()
///     .max_upload_attempts(5)
///     .index_ttl(Duration::from_secs(10));
/// assert_eq!(config.max_branch_attempts, 5);
/// ```
#[derive(Debug, Clone)]
pub struct ArcFsConfig {
    /// branch names tried before giving up
    pub max_branch_attempts: u32,
    /// attempts for one LFS upload
    pub max_upload_attempts: u32,
    /// how long a repository catalog is reused
    pub index_ttl: Duration,
    pub ambiguity: AmbiguityPolicy,
    /// per-request timeout of the HTTP host
    pub request_timeout: Duration,
}

impl Default for ArcFsConfig {
    fn default() -> Self {
        Self {
            max_branch_attempts: 5,
            max_upload_attempts: 3,
            index_ttl: Duration::from_secs(60),
            ambiguity: AmbiguityPolicy::FailClosed,
            request_timeout: Duration::from_secs(60),
        }
    }
}

impl ArcFsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_branch_attempts(mut self, attempts: u32) -> Self {
        self.max_branch_attempts = attempts.max(1);
        self
    }

    pub fn max_upload_attempts(mut self, attempts: u32) -> Self {
        self.max_upload_attempts = attempts.max(1);
        self
    }

    pub fn index_ttl(mut self, ttl: Duration) -> Self {
        self.index_ttl = ttl;
        self
    }

    pub fn ambiguity(mut self, policy: AmbiguityPolicy) -> Self {
        self.ambiguity = policy;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_string() {
        let config: HostConfig = "arcfs://glpat-123@git.example.org".parse().unwrap();
        assert_eq!(config.credential.expose(), "glpat-123");
        assert_eq!(config.host_url, "https://git.example.org");
        assert_eq!(config, HostConfig::new("glpat-123", "git.example.org").unwrap());
    }

    #[test]
    fn test_connection_string_with_host_scheme() {
        let config = HostConfig::from_connection_string("arcfs://tok@http://localhost:8080/").unwrap();
        assert_eq!(config.host_url, "http://localhost:8080");
    }

    #[test]
    fn test_connection_string_errors() {
        assert_eq!(
            HostConfig::from_connection_string("https://tok@host"),
            Err(ConfigError::Scheme)
        );
        assert_eq!(
            HostConfig::from_connection_string("arcfs://host"),
            Err(ConfigError::MissingCredential)
        );
        assert_eq!(
            HostConfig::from_connection_string("arcfs://@host"),
            Err(ConfigError::MissingCredential)
        );
        assert_eq!(
            HostConfig::from_connection_string("arcfs://tok@"),
            Err(ConfigError::MissingHost)
        );
    }

    #[test]
    fn test_credential_is_redacted() {
        let config = HostConfig::new("secret-token", "git.example.org").unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("secret-token"));
        assert_eq!(config.redacted(), "arcfs://***@https://git.example.org");
    }

    #[test]
    fn test_config_defaults_and_builder() {
        let config = ArcFsConfig::default();
        assert_eq!(config.max_branch_attempts, 5);
        assert_eq!(config.max_upload_attempts, 3);
        assert_eq!(config.index_ttl, Duration::from_secs(60));
        assert_eq!(config.ambiguity, AmbiguityPolicy::FailClosed);

        let config = ArcFsConfig::new()
            .max_branch_attempts(0)
            .ambiguity(AmbiguityPolicy::PreferRightmost);
        assert_eq!(config.max_branch_attempts, 1);
        assert_eq!(config.ambiguity, AmbiguityPolicy::PreferRightmost);
    }
}
