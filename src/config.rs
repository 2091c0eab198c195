//! Configuration types for media-dl

use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

use crate::error::{Error, Result};

/// Remote server connection settings
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Base URL of the media extraction service (default: "http://localhost:8000")
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bearer token sent with every request (None = unauthenticated)
    #[serde(default)]
    pub auth_token: Option<String>,

    /// Timeout for plain request/response calls, in seconds (default: 30)
    ///
    /// The progress push channel is exempt: it stays open until a terminal
    /// event or a transport error.
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            auth_token: None,
            request_timeout: default_request_timeout(),
        }
    }
}

/// Artifact delivery settings
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Directory used for fallback downloads (default: "./downloads")
    ///
    /// Direct-write delivery targets the user-granted capability directory
    /// instead; this directory is only used when that path is unavailable.
    #[serde(default = "default_fallback_dir")]
    pub fallback_dir: PathBuf,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            fallback_dir: default_fallback_dir(),
        }
    }
}

/// Discovery pagination settings
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Items requested per discovery page (default: 30)
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
        }
    }
}

/// Local store settings
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the SQLite store file (default: "./media-dl.db")
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    /// Maximum delivery-history rows kept per device (default: 200)
    ///
    /// Oldest rows are trimmed when the cap is exceeded.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            history_limit: default_history_limit(),
        }
    }
}

/// Top-level configuration for media-dl
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Remote server connection
    #[serde(default)]
    pub server: ServerConfig,

    /// Artifact delivery
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Discovery pagination
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Local persistence
    #[serde(default)]
    pub store: StoreConfig,
}

impl Config {
    /// Check the configuration for values that cannot work at runtime
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.server.base_url).map_err(|e| Error::Config {
            message: format!("invalid base URL: {e}"),
            key: Some("server.base_url".to_string()),
        })?;

        if self.discovery.page_size == 0 {
            return Err(Error::Config {
                message: "page size must be at least 1".to_string(),
                key: Some("discovery.page_size".to_string()),
            });
        }

        Ok(())
    }
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_fallback_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_page_size() -> usize {
    30
}

fn default_store_path() -> PathBuf {
    PathBuf::from("./media-dl.db")
}

fn default_history_limit() -> usize {
    200
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
