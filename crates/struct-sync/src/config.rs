use crate::error::ConfigError;

pub const ENV_BASE_URL: &str = "STRUCT_SYNC_BASE_URL";
pub const ENV_ROUTE: &str = "STRUCT_SYNC_ROUTE";
pub const ENV_SOCKET_URL: &str = "STRUCT_SYNC_SOCKET_URL";
pub const ENV_TIMEOUT_MS: &str = "STRUCT_SYNC_TIMEOUT_MS";
pub const ENV_REQUEST_ATTEMPTS: &str = "STRUCT_SYNC_REQUEST_ATTEMPTS";

pub const DEFAULT_ROUTE: &str = "/struct";
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
pub const MIN_TIMEOUT_MS: u64 = 250;
pub const DEFAULT_REQUEST_ATTEMPTS: usize = 1;

/// Connection settings for a [`crate::SyncClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub base_url: String,
    pub route: String,
    pub socket_url: Option<String>,
    pub timeout_ms: u64,
    /// Attempts per request. Only connection failures are retried, so a request the store
    /// may have received is never sent twice.
    pub request_attempts: usize,
}

impl SyncConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            route: DEFAULT_ROUTE.to_string(),
            socket_url: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            request_attempts: DEFAULT_REQUEST_ATTEMPTS,
        }
    }

    #[must_use]
    pub fn with_route(mut self, route: impl Into<String>) -> Self {
        self.route = route.into();
        self
    }

    #[must_use]
    pub fn with_socket_url(mut self, socket_url: impl Into<String>) -> Self {
        self.socket_url = Some(socket_url.into());
        self
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let base_url = env_non_empty(ENV_BASE_URL).ok_or(ConfigError::BaseUrlMissing)?;
        let mut config = Self::new(normalize_base_url(&base_url)?);
        if let Some(route) = env_non_empty(ENV_ROUTE) {
            config.route = route;
        }
        config.socket_url = env_non_empty(ENV_SOCKET_URL);
        if let Some(raw) = env_non_empty(ENV_TIMEOUT_MS) {
            config.timeout_ms = parse_number(ENV_TIMEOUT_MS, &raw)?;
        }
        if let Some(raw) = env_non_empty(ENV_REQUEST_ATTEMPTS) {
            config.request_attempts = parse_number(ENV_REQUEST_ATTEMPTS, &raw)?;
        }
        Ok(config.normalized())
    }

    /// Clamps numeric settings to their floors and canonicalises the route to `/segment`.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.timeout_ms = self.timeout_ms.max(MIN_TIMEOUT_MS);
        self.request_attempts = self.request_attempts.max(1);
        self.route = normalize_route(&self.route);
        self
    }
}

pub fn normalize_base_url(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(ConfigError::BaseUrlMissing);
    }
    let Some((scheme, remainder)) = trimmed.split_once("://") else {
        return Err(ConfigError::InvalidBaseUrl {
            raw: raw.to_string(),
        });
    };
    if !matches!(scheme, "http" | "https") || remainder.is_empty() || remainder.starts_with('/')
    {
        return Err(ConfigError::InvalidBaseUrl {
            raw: raw.to_string(),
        });
    }
    Ok(trimmed.to_string())
}

/// `struct`, `/struct/` and ` /struct ` all become `/struct`. An empty route stays empty.
#[must_use]
pub fn normalize_route(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.parse().map_err(|_| ConfigError::InvalidNumber {
        key: key.to_string(),
        raw: raw.to_string(),
    })
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
