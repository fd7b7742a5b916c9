//! Configuration Module
//!
//! Runtime settings for the caches, authorization engine, HTTP population
//! path and telemetry. Every struct has development-friendly defaults and a
//! `from_env()` constructor reading `GUILDKEEP_*` variables.

use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::UserId;

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|s| matches!(s.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
}

// ============================================================================
// API CACHE
// ============================================================================

/// Settings for caches of external API results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiCacheConfig {
    /// Default lease for entries. `None` means entries never expire.
    pub ttl: Option<Duration>,
    /// Maximum number of entries. `None` means unbounded, `Some(0)` rejects
    /// every insert.
    pub max_entries: Option<usize>,
    /// How often expired entries are swept.
    pub sweep_interval: Duration,
}

impl Default for ApiCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Some(Duration::from_secs(300)),
            max_entries: Some(10_000),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl ApiCacheConfig {
    /// Environment variables:
    /// - `GUILDKEEP_API_CACHE_TTL_SECS`: lease in seconds, `<= 0` disables expiry (default: 300)
    /// - `GUILDKEEP_API_CACHE_MAX_ENTRIES`: capacity, negative = unbounded (default: 10000)
    /// - `GUILDKEEP_API_CACHE_SWEEP_SECS`: sweep period (default: 60)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let ttl = match env_parse::<i64>("GUILDKEEP_API_CACHE_TTL_SECS") {
            Some(secs) if secs <= 0 => None,
            Some(secs) => Some(Duration::from_secs(secs as u64)),
            None => defaults.ttl,
        };
        let max_entries = match env_parse::<i64>("GUILDKEEP_API_CACHE_MAX_ENTRIES") {
            Some(n) if n < 0 => None,
            Some(n) => Some(n as usize),
            None => defaults.max_entries,
        };
        let sweep_interval = env_parse::<u64>("GUILDKEEP_API_CACHE_SWEEP_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.sweep_interval);

        Self {
            ttl,
            max_entries,
            sweep_interval,
        }
    }

    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_max_entries(mut self, max_entries: Option<usize>) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Normalized lease: a zero TTL means "no expiration".
    pub fn effective_ttl(&self) -> Option<Duration> {
        self.ttl.filter(|ttl| !ttl.is_zero())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "sweep_interval".to_string(),
                value: "0".to_string(),
                reason: "sweep interval must be positive".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// LIVE DOCUMENT CACHE
// ============================================================================

/// Settings for live mirrors of remote collections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveCacheConfig {
    /// How long callers wait for readiness before reading anyway.
    pub ready_timeout: Duration,
    /// Delay between failed bulk-load attempts.
    pub load_retry_delay: Duration,
    /// Buffer size of the async change notification channel.
    pub event_capacity: usize,
}

impl Default for LiveCacheConfig {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(10),
            load_retry_delay: Duration::from_secs(5),
            event_capacity: 256,
        }
    }
}

impl LiveCacheConfig {
    /// Environment variables:
    /// - `GUILDKEEP_READY_TIMEOUT_MS` (default: 10000)
    /// - `GUILDKEEP_LOAD_RETRY_MS` (default: 5000)
    /// - `GUILDKEEP_EVENT_CAPACITY` (default: 256)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            ready_timeout: env_parse("GUILDKEEP_READY_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.ready_timeout),
            load_retry_delay: env_parse("GUILDKEEP_LOAD_RETRY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.load_retry_delay),
            event_capacity: env_parse("GUILDKEEP_EVENT_CAPACITY").unwrap_or(defaults.event_capacity),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.event_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "event_capacity".to_string(),
                value: "0".to_string(),
                reason: "broadcast capacity must be positive".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// AUTHORIZATION
// ============================================================================

/// Authorization settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Users that pass every permission check (bot operators).
    pub admin_users: HashSet<UserId>,
}

impl AuthConfig {
    /// Environment variables:
    /// - `GUILDKEEP_ADMIN_USERS`: comma-separated user ids
    pub fn from_env() -> Self {
        let mut admin_users = HashSet::new();
        if let Ok(users) = std::env::var("GUILDKEEP_ADMIN_USERS") {
            for user in users.split(',') {
                let trimmed = user.trim();
                if !trimmed.is_empty() {
                    admin_users.insert(UserId::new(trimmed));
                }
            }
        }
        Self { admin_users }
    }

    pub fn with_admin(mut self, user_id: UserId) -> Self {
        self.admin_users.insert(user_id);
        self
    }

    pub fn is_admin(&self, user_id: &UserId) -> bool {
        self.admin_users.contains(user_id)
    }
}

// ============================================================================
// HTTP
// ============================================================================

/// Settings for the HTTP client used to populate API caches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            user_agent: format!("guildkeep/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl HttpConfig {
    /// Environment variables:
    /// - `GUILDKEEP_HTTP_TIMEOUT_SECS` (default: 10)
    /// - `GUILDKEEP_HTTP_USER_AGENT` (default: `guildkeep/<version>`)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            request_timeout: env_parse("GUILDKEEP_HTTP_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            user_agent: std::env::var("GUILDKEEP_HTTP_USER_AGENT").unwrap_or(defaults.user_agent),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "request_timeout".to_string(),
                value: "0".to_string(),
                reason: "request timeout must be positive".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// TELEMETRY
// ============================================================================

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub service_name: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Filter used when neither `GUILDKEEP_LOG` nor `RUST_LOG` is set.
    pub default_filter: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "guildkeep".to_string(),
            json: false,
            default_filter: "guildkeep=debug,info".to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Environment variables:
    /// - `GUILDKEEP_SERVICE_NAME` (default: guildkeep)
    /// - `GUILDKEEP_LOG_JSON`: "true" or "1" for JSON output (default: false)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            service_name: std::env::var("GUILDKEEP_SERVICE_NAME")
                .unwrap_or(defaults.service_name),
            json: env_flag("GUILDKEEP_LOG_JSON").unwrap_or(defaults.json),
            default_filter: defaults.default_filter,
        }
    }
}

// ============================================================================
// AGGREGATE
// ============================================================================

/// Every guildkeep setting in one place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuildkeepConfig {
    pub api_cache: ApiCacheConfig,
    pub live_cache: LiveCacheConfig,
    pub auth: AuthConfig,
    pub http: HttpConfig,
    pub telemetry: TelemetryConfig,
}

impl GuildkeepConfig {
    pub fn from_env() -> Self {
        Self {
            api_cache: ApiCacheConfig::from_env(),
            live_cache: LiveCacheConfig::from_env(),
            auth: AuthConfig::from_env(),
            http: HttpConfig::from_env(),
            telemetry: TelemetryConfig::from_env(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.api_cache.validate()?;
        self.live_cache.validate()?;
        self.http.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(GuildkeepConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_ttl_means_no_expiration() {
        let config = ApiCacheConfig::default().with_ttl(Some(Duration::ZERO));
        assert_eq!(config.effective_ttl(), None);

        let config = ApiCacheConfig::default().with_ttl(Some(Duration::from_secs(5)));
        assert_eq!(config.effective_ttl(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_zero_sweep_interval_rejected() {
        let config = ApiCacheConfig::default().with_sweep_interval(Duration::ZERO);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "sweep_interval"
        ));
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: GuildkeepConfig = serde_json::from_str(
            r#"{"auth":{"admin_users":["owner"]},"http":{"user_agent":"bot/1"}}"#,
        )
        .unwrap();

        assert!(config.auth.is_admin(&UserId::new("owner")));
        assert_eq!(config.http.user_agent, "bot/1");
        assert_eq!(config.http.request_timeout, HttpConfig::default().request_timeout);
        assert_eq!(config.api_cache, ApiCacheConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_auth_admin_lookup() {
        let config = AuthConfig::default().with_admin(UserId::new("owner"));
        assert!(config.is_admin(&UserId::new("owner")));
        assert!(!config.is_admin(&UserId::new("someone")));
    }

    #[test]
    fn test_zero_event_capacity_rejected() {
        let config = LiveCacheConfig {
            event_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
