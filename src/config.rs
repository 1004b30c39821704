//! Client configuration parsed from environment variables.
//!
//! Also owns server URL resolution: protocol-relative URLs are normalized,
//! a `{workerIndex}` placeholder is filled with a random worker for load
//! distribution, and TLS schemes can be downgraded for legacy peers.

use rand::Rng;

use crate::error::ConfigError;

/// Placeholder replaced by a random worker index in the server URL.
pub const WORKER_INDEX_PLACEHOLDER: &str = "{workerIndex}";

pub const DEFAULT_AUTO_OPEN: bool = true;
pub const DEFAULT_AUTO_SUBSCRIBE: bool = true;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Server URL template, resolved by [`resolve_server_url`] on use.
    pub server_url: String,
    /// Number of server workers behind `{workerIndex}`. `None` means one.
    pub workers_count: Option<usize>,
    /// Call `open()` as soon as the client is constructed.
    pub auto_open: bool,
    /// Replay tracked subscriptions whenever the connection opens.
    pub auto_subscribe_on_reconnect: bool,
    /// Scheme used for protocol-relative (`//host`) URLs: `https` when set.
    pub secure: bool,
    /// Strip TLS from `https`/`wss` URLs for peers that cannot use it.
    pub legacy_downgrade: bool,
}

impl ClientConfig {
    /// Config with defaults for everything but the server URL.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingServerUrl`] if `server_url` is blank.
    pub fn new(server_url: impl Into<String>) -> Result<Self, ConfigError> {
        let server_url = server_url.into();
        if server_url.trim().is_empty() {
            return Err(ConfigError::MissingServerUrl);
        }
        Ok(Self {
            server_url,
            workers_count: None,
            auto_open: DEFAULT_AUTO_OPEN,
            auto_subscribe_on_reconnect: DEFAULT_AUTO_SUBSCRIBE,
            secure: false,
            legacy_downgrade: false,
        })
    }

    /// Build typed client config from environment variables.
    ///
    /// Required:
    /// - `COMET_SERVER_URL`
    ///
    /// Optional:
    /// - `COMET_WORKERS_COUNT`: positive integer
    /// - `COMET_AUTO_OPEN`: default true
    /// - `COMET_AUTO_SUBSCRIBE`: default true
    /// - `COMET_SECURE`: default false
    /// - `COMET_LEGACY_DOWNGRADE`: default false
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingServerUrl`] when `COMET_SERVER_URL` is
    /// unset or blank, and [`ConfigError::InvalidValue`] when an optional
    /// variable does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let server_url = std::env::var("COMET_SERVER_URL").unwrap_or_default();
        let mut config = Self::new(server_url)?;

        config.workers_count = env_parse_opt::<usize>("COMET_WORKERS_COUNT")?;
        config.auto_open = env_bool("COMET_AUTO_OPEN", DEFAULT_AUTO_OPEN)?;
        config.auto_subscribe_on_reconnect = env_bool("COMET_AUTO_SUBSCRIBE", DEFAULT_AUTO_SUBSCRIBE)?;
        config.secure = env_bool("COMET_SECURE", false)?;
        config.legacy_downgrade = env_bool("COMET_LEGACY_DOWNGRADE", false)?;

        Ok(config)
    }

    /// Resolve the configured URL template into a concrete server URL.
    #[must_use]
    pub fn resolve_server_url(&self) -> String {
        resolve_server_url(&self.server_url, self, &mut rand::rng())
    }
}

fn env_parse_opt<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
{
    let Ok(raw) = std::env::var(key) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<T>()
        .map(Some)
        .map_err(|_| ConfigError::InvalidValue { var: key.into(), value: raw })
}

fn env_bool(key: &str, default: bool) -> Result<bool, ConfigError> {
    let Ok(raw) = std::env::var(key) else {
        return Ok(default);
    };
    parse_bool(&raw).ok_or(ConfigError::InvalidValue { var: key.into(), value: raw })
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

// =============================================================================
// URL RESOLUTION
// =============================================================================

/// Resolve a server URL template.
///
/// 1. `//host/path` gains `https:` when `config.secure`, else `http:`.
/// 2. `{workerIndex}` becomes a random index in `0..max(workers_count, 1)`.
/// 3. With `config.legacy_downgrade`, `https`/`wss` become `http`/`ws`.
pub fn resolve_server_url<R: Rng + ?Sized>(template: &str, config: &ClientConfig, rng: &mut R) -> String {
    let mut url = if template.starts_with("//") {
        let scheme = if config.secure { "https" } else { "http" };
        format!("{scheme}:{template}")
    } else {
        template.to_owned()
    };

    if url.contains(WORKER_INDEX_PLACEHOLDER) {
        let workers = config.workers_count.unwrap_or(0).max(1);
        let index = rng.random_range(0..workers);
        url = url.replacen(WORKER_INDEX_PLACEHOLDER, &index.to_string(), 1);
    }

    if config.legacy_downgrade {
        url = downgrade_tls(&url);
    }

    url
}

fn downgrade_tls(url: &str) -> String {
    for (secure, plain) in [("https", "http"), ("wss", "ws")] {
        if let Some(rest) = url.strip_prefix(secure) {
            if rest.starts_with(':') {
                return format!("{plain}{rest}");
            }
        }
    }
    url.to_owned()
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
