//! Client configuration.
//!
//! Loads configuration from environment variables with sensible defaults.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Production host used when `LMS_API_URL` is not set.
pub const FALLBACK_API_URL: &str = "https://api.lms-sekolah.id";

/// Local proxy used in development mode.
pub const DEFAULT_DEV_PROXY_URL: &str = "http://localhost:5173/api";

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default sign-in route.
pub const DEFAULT_SIGN_IN_PATH: &str = "/sign-in";

/// Build mode that decides how the base URL is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Requests go through the local dev proxy.
    Development,
    /// Requests go to the configured API host.
    Production,
}

impl Mode {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Self::Development,
            _ => Self::Production,
        }
    }
}

/// HTTP client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Build mode
    pub mode: Mode,
    /// Base URL used in development (local proxy)
    pub dev_proxy_url: String,
    /// Base URL used in production
    pub api_url: String,
    /// Per-request timeout
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    /// Route the user is sent to when the session cannot be recovered
    pub sign_in_path: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Production,
            dev_proxy_url: DEFAULT_DEV_PROXY_URL.to_string(),
            api_url: FALLBACK_API_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            sign_in_path: DEFAULT_SIGN_IN_PATH.to_string(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `LMS_MODE` | `production` |
    /// | `LMS_DEV_PROXY_URL` | `http://localhost:5173/api` |
    /// | `LMS_API_URL` | `https://api.lms-sekolah.id` |
    /// | `LMS_HTTP_TIMEOUT_SECS` | `10` |
    /// | `LMS_SIGN_IN_PATH` | `/sign-in` |
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            mode: env::var("LMS_MODE").map_or(defaults.mode, |raw| Mode::parse(&raw)),
            dev_proxy_url: env::var("LMS_DEV_PROXY_URL")
                .ok()
                .filter(|url| !url.trim().is_empty())
                .unwrap_or(defaults.dev_proxy_url),
            api_url: env::var("LMS_API_URL")
                .ok()
                .filter(|url| !url.trim().is_empty())
                .unwrap_or(defaults.api_url),
            timeout: env::var("LMS_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map_or(defaults.timeout, Duration::from_secs),
            sign_in_path: env::var("LMS_SIGN_IN_PATH").unwrap_or(defaults.sign_in_path),
        }
    }

    /// Configuration pointing at an explicit base URL (tests, scripts).
    #[must_use]
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            api_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Set the per-request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the sign-in route.
    #[must_use]
    pub fn with_sign_in_path(mut self, path: impl Into<String>) -> Self {
        self.sign_in_path = path.into();
        self
    }

    /// Base URL for the current mode, without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        let url = match self.mode {
            Mode::Development => &self.dev_proxy_url,
            Mode::Production => &self.api_url,
        };
        url.trim_end_matches('/')
    }

    /// Absolute URL for an API path such as `/v1/classes`.
    #[must_use]
    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!("{}/{}", self.base_url(), path.trim_start_matches('/'))
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
