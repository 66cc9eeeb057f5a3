//! Configuration for lbcert rotation runs.
//!
//! A [`RotationConfig`] is populated once at the process boundary, from
//! either a TOML file or the environment (never a mix of the two), and then
//! passed by value into the rotation pipeline. Nothing below the boundary reads process state.
//!
//! # Environment
//!
//! Variables carry the `LBCERT_FN_` prefix:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `LBCERT_FN_LB_OCID` | `load_balancer_id` |
//! | `LBCERT_FN_OS_NS` | `namespace` |
//! | `LBCERT_FN_OS_BN` | `bucket` |
//! | `LBCERT_FN_ARCHIVE_PREFIX` | `archive_prefix` |
//! | `LBCERT_FN_DOMAIN` | `domain` |
//! | `LBCERT_FN_POLL_INTERVAL_SECS` | `poll_interval_secs` |
//! | `LBCERT_FN_MAX_POLL_ATTEMPTS` | `max_poll_attempts` |
//! | `LBCERT_FN_DEADLINE_SECS` | `deadline_secs` |
//!
//! # File
//!
//! ```toml
//! load_balancer_id = "ocid1.loadbalancer.oc1..example"
//! namespace = "tenancy-ns"
//! bucket = "certbot"
//! archive_prefix = "letsencrypt"
//! domain = "example.com"
//! poll_interval_secs = 5
//! max_poll_attempts = 60
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace};

/// Prefix for all environment variables read by [`RotationConfig::from_env`]
pub const ENV_PREFIX: &str = "LBCERT_FN_";

/// Suffix of the certificate bundle object name
pub const ARCHIVE_SUFFIX: &str = ".tar.gz";

/// Errors raised while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read environment: {0}")]
    Env(#[from] envy::Error),

    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Everything one rotation run needs to know.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotationConfig {
    /// Identifier of the target load balancer
    #[serde(alias = "lb_ocid")]
    pub load_balancer_id: String,

    /// Object store namespace holding the bundle
    #[serde(alias = "os_ns")]
    pub namespace: String,

    /// Object store bucket holding the bundle
    #[serde(alias = "os_bn")]
    pub bucket: String,

    /// Bundle object name prefix; the object is `{prefix}-{domain}.tar.gz`
    pub archive_prefix: String,

    /// Domain whose live certificate is rotated
    pub domain: String,

    /// Fixed delay between work request polls
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Polls before a pending work request counts as timed out
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,

    /// Overall deadline for the run; unbounded when absent
    #[serde(default)]
    pub deadline_secs: Option<u64>,

    /// Object store REST endpoint
    #[serde(default)]
    pub object_storage_endpoint: Option<String>,

    /// Load balancer control plane REST endpoint
    #[serde(default)]
    pub control_plane_endpoint: Option<String>,

    /// Bearer token presented to both endpoints
    #[serde(default, skip_serializing)]
    pub auth_token: Option<String>,

    /// Read bundles from this directory instead of the object store endpoint
    #[serde(default)]
    pub archive_dir: Option<PathBuf>,
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_max_poll_attempts() -> u32 {
    60
}

impl RotationConfig {
    /// Create a configuration with defaults for everything but the target
    pub fn new(
        load_balancer_id: impl Into<String>,
        namespace: impl Into<String>,
        bucket: impl Into<String>,
        archive_prefix: impl Into<String>,
        domain: impl Into<String>,
    ) -> Self {
        Self {
            load_balancer_id: load_balancer_id.into(),
            namespace: namespace.into(),
            bucket: bucket.into(),
            archive_prefix: archive_prefix.into(),
            domain: domain.into(),
            poll_interval_secs: default_poll_interval_secs(),
            max_poll_attempts: default_max_poll_attempts(),
            deadline_secs: None,
            object_storage_endpoint: None,
            control_plane_endpoint: None,
            auth_token: None,
            archive_dir: None,
        }
    }

    /// Load from `LBCERT_FN_*` process environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_iter(std::env::vars())
    }

    /// Load from an explicit set of environment variables
    pub fn from_env_iter<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: Self = envy::prefixed(ENV_PREFIX).from_iter(vars)?;
        debug!(
            load_balancer = %config.load_balancer_id,
            domain = %config.domain,
            "Loaded configuration from environment"
        );
        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content)?;
        debug!(path = %path.display(), "Loaded configuration file");
        Ok(config)
    }

    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Object name of the certificate bundle: `{archive_prefix}-{domain}.tar.gz`
    pub fn archive_object_name(&self) -> String {
        format!("{}-{}{}", self.archive_prefix, self.domain, ARCHIVE_SUFFIX)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }

    /// Check required fields and value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("load_balancer_id", &self.load_balancer_id),
            ("namespace", &self.namespace),
            ("bucket", &self.bucket),
            ("archive_prefix", &self.archive_prefix),
            ("domain", &self.domain),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{} cannot be empty", field)));
            }
        }

        if self.domain.contains('/') {
            return Err(ConfigError::Invalid(format!(
                "domain '{}' must not contain '/'",
                self.domain
            )));
        }

        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_secs must be at least 1".to_string(),
            ));
        }

        if self.max_poll_attempts == 0 {
            return Err(ConfigError::Invalid(
                "max_poll_attempts must be at least 1".to_string(),
            ));
        }

        if self.deadline_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "deadline_secs must be at least 1 when set".to_string(),
            ));
        }

        for (field, endpoint) in [
            ("object_storage_endpoint", &self.object_storage_endpoint),
            ("control_plane_endpoint", &self.control_plane_endpoint),
        ] {
            if let Some(endpoint) = endpoint {
                url::Url::parse(endpoint).map_err(|e| {
                    ConfigError::Invalid(format!("{} '{}': {}", field, endpoint, e))
                })?;
            }
        }

        trace!(domain = %self.domain, "Configuration validated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn base_env() -> Vec<(String, String)> {
        env(&[
            ("LBCERT_FN_LB_OCID", "ocid1.loadbalancer.oc1..aaa"),
            ("LBCERT_FN_OS_NS", "tenancy"),
            ("LBCERT_FN_OS_BN", "certbot"),
            ("LBCERT_FN_ARCHIVE_PREFIX", "letsencrypt"),
            ("LBCERT_FN_DOMAIN", "example.com"),
        ])
    }

    #[test]
    fn test_from_env_with_defaults() {
        let config = RotationConfig::from_env_iter(base_env()).unwrap();

        assert_eq!(config.load_balancer_id, "ocid1.loadbalancer.oc1..aaa");
        assert_eq!(config.namespace, "tenancy");
        assert_eq!(config.bucket, "certbot");
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.max_poll_attempts, 60);
        assert_eq!(config.deadline(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_env_overrides() {
        let mut vars = base_env();
        vars.extend(env(&[
            ("LBCERT_FN_POLL_INTERVAL_SECS", "2"),
            ("LBCERT_FN_MAX_POLL_ATTEMPTS", "10"),
            ("LBCERT_FN_DEADLINE_SECS", "300"),
            ("UNRELATED", "ignored"),
        ]));
        let config = RotationConfig::from_env_iter(vars).unwrap();

        assert_eq!(config.poll_interval_secs, 2);
        assert_eq!(config.max_poll_attempts, 10);
        assert_eq!(config.deadline(), Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_from_env_missing_required() {
        let vars = env(&[("LBCERT_FN_DOMAIN", "example.com")]);
        assert!(matches!(
            RotationConfig::from_env_iter(vars),
            Err(ConfigError::Env(_))
        ));
    }

    #[test]
    fn test_archive_object_name() {
        let config = RotationConfig::new("lb", "ns", "bucket", "letsencrypt", "example.com");
        assert_eq!(config.archive_object_name(), "letsencrypt-example.com.tar.gz");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = RotationConfig::new("lb", "ns", "bucket", "prefix", "example.com");
        config.domain = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = RotationConfig::new("lb", "ns", "bucket", "prefix", "a/b");
        assert!(config.validate().is_err());
        config.domain = "example.com".to_string();
        config.max_poll_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = RotationConfig::new("lb", "ns", "bucket", "prefix", "example.com");
        config.control_plane_endpoint = Some("not a url".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
load_balancer_id = "lb-1"
namespace = "ns"
bucket = "certs"
archive_prefix = "le"
domain = "example.org"
max_poll_attempts = 3
control_plane_endpoint = "https://lb.example.net/20170115"
"#
        )
        .unwrap();

        let config = RotationConfig::from_file(file.path()).unwrap();
        assert_eq!(config.domain, "example.org");
        assert_eq!(config.max_poll_attempts, 3);
        assert_eq!(config.poll_interval_secs, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_missing() {
        let result = RotationConfig::from_file("/nonexistent/lbcert.toml");
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
