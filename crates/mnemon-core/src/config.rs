//! Environment-backed Configuration
//!
//! All knobs come from the process environment with sensible defaults.
//! Invalid values are configuration errors (process exit code 1), never
//! silently clamped.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A variable could not be parsed
    #[error("invalid value for {name}: {value}")]
    Invalid { name: String, value: String },
    /// Two variables contradict each other
    #[error("inconsistent configuration: {0}")]
    Inconsistent(String),
}

/// Which embedding provider to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProviderKind {
    /// Local model inference (may fail at init; falls back automatically)
    #[default]
    Primary,
    /// Deterministic hashing projection, always available
    Fallback,
}

/// Per-type TTLs for hard deletion, in hours. Negative means infinite.
#[derive(Debug, Clone, Copy)]
pub struct ForgetTtlHours {
    pub working: i64,
    pub episodic: i64,
    pub semantic: i64,
    pub procedural: i64,
}

impl Default for ForgetTtlHours {
    fn default() -> Self {
        Self {
            working: 72,
            episodic: 720,
            semantic: 2160,
            procedural: 4320,
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database path
    pub db_path: PathBuf,
    /// Port reserved for an HTTP transport (unused by the stdio loop)
    pub port: u16,
    /// Requested embedding provider
    pub embedding_provider: ProviderKind,
    /// Override for the embedding dimension; `None` = provider native
    pub embedding_dimensions: Option<usize>,
    /// Capacity of the embedding LRU cache
    pub embedding_cache_size: usize,
    /// Default search limit when a tool call omits one
    pub search_default_limit: usize,
    /// Hard cap on search limits
    pub search_max_limit: usize,
    /// Hard-delete TTLs per memory type
    pub forget_ttl_hours: ForgetTtlHours,
    /// How long soft-deleted rows are kept for audit before purge
    pub audit_ttl_hours: i64,
    /// Log level filter string (tracing EnvFilter syntax)
    pub log_level: String,
    /// Deployment environment name (development/production/test)
    pub env: String,
    /// Cleanup job interval
    pub cleanup_interval: Duration,
    /// Monitoring job interval
    pub monitor_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/memory.db"),
            port: 3000,
            embedding_provider: ProviderKind::Primary,
            embedding_dimensions: None,
            embedding_cache_size: 1000,
            search_default_limit: 10,
            search_max_limit: 50,
            forget_ttl_hours: ForgetTtlHours::default(),
            audit_ttl_hours: 720,
            log_level: "info".to_string(),
            env: "development".to_string(),
            cleanup_interval: Duration::from_secs(300),
            monitor_interval: Duration::from_secs(60),
        }
    }
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match var(name) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid {
                name: name.to_string(),
                value: raw,
            }),
    }
}

impl Config {
    /// Build a configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(path) = var("DB_PATH") {
            config.db_path = PathBuf::from(path);
        }
        if let Some(port) = parse_var::<u16>("PORT")? {
            config.port = port;
        }

        if let Some(provider) = var("EMBEDDING_PROVIDER") {
            config.embedding_provider = match provider.as_str() {
                "primary" => ProviderKind::Primary,
                "fallback" => ProviderKind::Fallback,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "EMBEDDING_PROVIDER".to_string(),
                        value: provider,
                    });
                }
            };
        }

        if let Some(dims) = parse_var::<usize>("EMBEDDING_DIMENSIONS")? {
            if dims == 0 {
                return Err(ConfigError::Invalid {
                    name: "EMBEDDING_DIMENSIONS".to_string(),
                    value: "0".to_string(),
                });
            }
            config.embedding_dimensions = Some(dims);
        }
        if let Some(cap) = parse_var::<usize>("EMBEDDING_CACHE_SIZE")? {
            if cap == 0 {
                return Err(ConfigError::Invalid {
                    name: "EMBEDDING_CACHE_SIZE".to_string(),
                    value: "0".to_string(),
                });
            }
            config.embedding_cache_size = cap;
        }

        if let Some(limit) = parse_var::<usize>("SEARCH_DEFAULT_LIMIT")? {
            config.search_default_limit = limit;
        }
        if let Some(limit) = parse_var::<usize>("SEARCH_MAX_LIMIT")? {
            config.search_max_limit = limit;
        }
        if config.search_max_limit < config.search_default_limit {
            return Err(ConfigError::Inconsistent(format!(
                "SEARCH_MAX_LIMIT ({}) must be >= SEARCH_DEFAULT_LIMIT ({})",
                config.search_max_limit, config.search_default_limit
            )));
        }

        if let Some(h) = parse_var::<i64>("FORGET_TTL_WORKING")? {
            config.forget_ttl_hours.working = h;
        }
        if let Some(h) = parse_var::<i64>("FORGET_TTL_EPISODIC")? {
            config.forget_ttl_hours.episodic = h;
        }
        if let Some(h) = parse_var::<i64>("FORGET_TTL_SEMANTIC")? {
            config.forget_ttl_hours.semantic = h;
        }
        if let Some(h) = parse_var::<i64>("FORGET_TTL_PROCEDURAL")? {
            config.forget_ttl_hours.procedural = h;
        }
        if let Some(h) = parse_var::<i64>("AUDIT_TTL_HOURS")? {
            config.audit_ttl_hours = h;
        }

        if let Some(level) = var("LOG_LEVEL") {
            config.log_level = level;
        }
        if let Some(env) = var("APP_ENV") {
            config.env = env;
        }

        Ok(config)
    }
}

// ============================================================================
// TESTS
// ============================================================================
