//! Configuration loading and validation.
//!
//! Loads gateway configuration from `./netveil.toml` (or
//! `$NETVEIL_CONFIG_PATH`). Environment variables override file values; file
//! values override defaults.
//!
//! Precedence: env vars > config file > defaults.

use std::fmt::Write as _;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::redaction::surrogate::MIN_SECRET_LEN;
use crate::redaction::{DeterministicKey, RedactError, SaltPolicy, SecretValue};
use crate::store::redis::DEFAULT_NAMESPACE;

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "NETVEIL_CONFIG_PATH";

/// Config file used when [`CONFIG_PATH_ENV`] is unset.
pub const DEFAULT_CONFIG_FILE: &str = "netveil.toml";

/// Startup configuration errors. Any of these stops the process.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Deterministic mode is enabled but no secret is configured.
    #[error("deterministic mode is enabled but no secret is configured")]
    MissingSecret,

    /// The configured secret is too short to key the PRF safely.
    #[error("deterministic secret must be at least {min} bytes, got {len}")]
    SecretTooShort {
        /// Actual length in bytes.
        len: usize,
        /// Required minimum.
        min: usize,
    },

    /// A numeric setting is outside its accepted range.
    #[error("{field} = {value} is outside {min}..={max}")]
    OutOfRange {
        /// Dotted key of the setting.
        field: &'static str,
        /// Configured value.
        value: u64,
        /// Inclusive lower bound.
        min: u64,
        /// Inclusive upper bound.
        max: u64,
    },

    /// Redis backend selected without a URL.
    #[error("mapping.backend = \"redis\" requires mapping.redis_url")]
    MissingRedisUrl,

    /// `server.bind` is not a socket address.
    #[error("invalid bind address {0:?}")]
    InvalidBind(String),

    /// Redis key namespace is empty.
    #[error("mapping.redis_namespace must not be empty")]
    EmptyNamespace,

    /// The secret was rejected by the PRF.
    #[error(transparent)]
    Key(#[from] RedactError),
}

// ── Top-level config ────────────────────────────────────────────

/// Top-level gateway configuration loaded from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener settings.
    pub server: ServerConfig,
    /// Per-request limits.
    pub limits: LimitsConfig,
    /// Mapping store settings.
    pub mapping: MappingConfig,
    /// Deterministic surrogate settings.
    pub deterministic: DeterministicConfig,
    /// Log output settings.
    pub logging: LoggingConfig,
}

impl GatewayConfig {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// If the file does not exist, returns defaults.
    pub fn load() -> Result<Self> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Load using a custom env resolver.
    pub fn load_with(env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let path = Self::config_path_with(&env);
        let mut config = Self::load_from_file(&path)?;
        config.apply_overrides(env);
        Ok(config)
    }

    /// Load from a TOML file only, no env overrides.
    pub fn load_from_file(path: &std::path::Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                Self::from_toml(&contents)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no config file found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "failed to read config file {}: {e}",
                path.display()
            )),
        }
    }

    /// Resolve the config file path using a custom env resolver.
    pub fn config_path_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
        env(CONFIG_PATH_ENV).map_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from)
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function so tests never mutate the process
    /// environment. Unparseable values are logged and ignored.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        // Server.
        if let Some(v) = env("NETVEIL_BIND") {
            self.server.bind = v;
        }

        // Limits.
        override_parsed(&env, "NETVEIL_MAX_PAYLOAD_BYTES", &mut self.limits.max_payload_bytes);
        override_parsed(&env, "NETVEIL_RATE_LIMIT_REQUESTS", &mut self.limits.rate_limit_requests);
        override_parsed(
            &env,
            "NETVEIL_RATE_LIMIT_WINDOW_SECS",
            &mut self.limits.rate_limit_window_secs,
        );
        override_parsed(
            &env,
            "NETVEIL_REQUEST_TIMEOUT_SECS",
            &mut self.limits.request_timeout_secs,
        );

        // Mapping store (URL presence selects the redis backend).
        override_parsed(&env, "NETVEIL_MAPPING_TTL_SECS", &mut self.mapping.ttl_secs);
        override_parsed(
            &env,
            "NETVEIL_CLEANUP_INTERVAL_SECS",
            &mut self.mapping.cleanup_interval_secs,
        );
        if let Some(url) = env("NETVEIL_REDIS_URL") {
            self.mapping.backend = MappingBackend::Redis;
            self.mapping.redis_url = Some(url);
        }
        if let Some(v) = env("NETVEIL_REDIS_NAMESPACE") {
            self.mapping.redis_namespace = v;
        }

        // Deterministic mode.
        if let Some(v) = env("NETVEIL_DETERMINISTIC_SECRET") {
            self.deterministic.secret = Some(SecretValue::new(v));
        }
        override_parsed(&env, "NETVEIL_DETERMINISTIC_ENABLED", &mut self.deterministic.enabled);
        override_parsed(&env, "NETVEIL_SALT_POLICY", &mut self.deterministic.salt);

        // Logging.
        if let Some(v) = env("NETVEIL_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = env("NETVEIL_LOG_DIR") {
            self.logging.directory = Some(PathBuf::from(v));
        }
    }

    /// Parse a TOML string into config.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml_str).context("failed to parse config TOML")?;
        Ok(config)
    }

    /// Check every setting against its bounds.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_addr()?;

        let limits = &self.limits;
        check_range(
            "limits.max_payload_bytes",
            u64::try_from(limits.max_payload_bytes).unwrap_or(u64::MAX),
            MIN_PAYLOAD_BYTES,
            MAX_PAYLOAD_BYTES,
        )?;
        check_range(
            "limits.rate_limit_requests",
            u64::from(limits.rate_limit_requests),
            1,
            u64::from(u32::MAX),
        )?;
        check_range("limits.rate_limit_window_secs", limits.rate_limit_window_secs, 1, u64::MAX)?;
        check_range("limits.request_timeout_secs", limits.request_timeout_secs, 1, u64::MAX)?;

        let mapping = &self.mapping;
        check_range("mapping.ttl_secs", mapping.ttl_secs, MIN_TTL_SECS, u64::MAX)?;
        check_range(
            "mapping.cleanup_interval_secs",
            mapping.cleanup_interval_secs,
            MIN_CLEANUP_INTERVAL_SECS,
            u64::MAX,
        )?;
        if mapping.backend == MappingBackend::Redis {
            if mapping.redis_url.as_deref().is_none_or(str::is_empty) {
                return Err(ConfigError::MissingRedisUrl);
            }
            if mapping.redis_namespace.is_empty() {
                return Err(ConfigError::EmptyNamespace);
            }
        }

        if self.deterministic.enabled {
            let secret = self
                .deterministic
                .secret
                .as_ref()
                .filter(|s| !s.is_empty())
                .ok_or(ConfigError::MissingSecret)?;
            if secret.len() < MIN_SECRET_LEN {
                return Err(ConfigError::SecretTooShort {
                    len: secret.len(),
                    min: MIN_SECRET_LEN,
                });
            }
        }
        Ok(())
    }

    /// Parsed listener address.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBind`] if `server.bind` does not parse.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.server
            .bind
            .parse()
            .map_err(|_| ConfigError::InvalidBind(self.server.bind.clone()))
    }

    /// Keyed PRF for deterministic mode, or `None` when it is disabled.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingSecret`] if enabled without a secret.
    pub fn deterministic_key(&self) -> Result<Option<DeterministicKey>, ConfigError> {
        if !self.deterministic.enabled {
            return Ok(None);
        }
        let secret = self
            .deterministic
            .secret
            .as_ref()
            .ok_or(ConfigError::MissingSecret)?;
        Ok(Some(DeterministicKey::new(secret)?))
    }

    /// Human-readable summary with the secret withheld.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "server.bind = {}", self.server.bind);
        let _ = writeln!(out, "limits.max_payload_bytes = {}", self.limits.max_payload_bytes);
        let _ = writeln!(
            out,
            "limits.rate_limit = {} per {}s",
            self.limits.rate_limit_requests, self.limits.rate_limit_window_secs
        );
        let _ = writeln!(out, "limits.request_timeout_secs = {}", self.limits.request_timeout_secs);
        let _ = writeln!(out, "mapping.backend = {}", self.mapping.backend.as_str());
        let _ = writeln!(out, "mapping.ttl_secs = {}", self.mapping.ttl_secs);
        let _ = writeln!(
            out,
            "mapping.cleanup_interval_secs = {}",
            self.mapping.cleanup_interval_secs
        );
        if self.mapping.backend == MappingBackend::Redis {
            let _ = writeln!(out, "mapping.redis_namespace = {}", self.mapping.redis_namespace);
        }
        let _ = writeln!(out, "deterministic.enabled = {}", self.deterministic.enabled);
        let _ = writeln!(
            out,
            "deterministic.secret = {}",
            if self.deterministic.secret.is_some() {
                "<set>"
            } else {
                "<unset>"
            }
        );
        let _ = writeln!(out, "deterministic.salt = {}", self.deterministic.salt.as_str());
        let _ = write!(out, "logging.level = {}", self.logging.level);
        out
    }
}

/// Smallest accepted `limits.max_payload_bytes`.
pub const MIN_PAYLOAD_BYTES: u64 = 1024;
/// Largest accepted `limits.max_payload_bytes`.
pub const MAX_PAYLOAD_BYTES: u64 = 8_388_608;
/// Smallest accepted `mapping.ttl_secs`.
pub const MIN_TTL_SECS: u64 = 60;
/// Smallest accepted `mapping.cleanup_interval_secs`.
pub const MIN_CLEANUP_INTERVAL_SECS: u64 = 30;

fn check_range(field: &'static str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if (min..=max).contains(&value) {
        return Ok(());
    }
    Err(ConfigError::OutOfRange {
        field,
        value,
        min,
        max,
    })
}

fn override_parsed<T: FromStr>(env: impl Fn(&str) -> Option<String>, var: &str, slot: &mut T) {
    if let Some(v) = env(var) {
        match v.trim().parse() {
            Ok(parsed) => *slot = parsed,
            Err(_) => tracing::warn!(var, value = %v, "ignoring invalid env override"),
        }
    }
}

// ── Sections ────────────────────────────────────────────────────

/// Listener settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to bind.
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_owned(),
        }
    }
}

/// Per-request limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Largest accepted input in bytes.
    pub max_payload_bytes: usize,
    /// Admitted requests per identity per window.
    pub rate_limit_requests: u32,
    /// Rate window length in seconds.
    pub rate_limit_window_secs: u64,
    /// Engine timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: 1_048_576,
            rate_limit_requests: 120,
            rate_limit_window_secs: 60,
            request_timeout_secs: 15,
        }
    }
}

/// Mapping store backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingBackend {
    /// In-process concurrent map.
    #[default]
    Memory,
    /// External Redis server.
    Redis,
}

impl MappingBackend {
    /// Lowercase label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Redis => "redis",
        }
    }
}

/// Mapping store settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MappingConfig {
    /// Which backend to use.
    pub backend: MappingBackend,
    /// Record lifetime in seconds.
    pub ttl_secs: u64,
    /// Interval between eviction sweeps in seconds.
    pub cleanup_interval_secs: u64,
    /// Redis connection URL.
    pub redis_url: Option<String>,
    /// Prefix for Redis keys.
    pub redis_namespace: String,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            backend: MappingBackend::Memory,
            ttl_secs: 86_400,
            cleanup_interval_secs: 300,
            redis_url: None,
            redis_namespace: DEFAULT_NAMESPACE.to_owned(),
        }
    }
}

/// Deterministic surrogate settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeterministicConfig {
    /// Whether deterministic mode is served.
    pub enabled: bool,
    /// Server-held PRF secret.
    pub secret: Option<SecretValue>,
    /// Salt source.
    pub salt: SaltPolicy,
}

impl Default for DeterministicConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            secret: None,
            salt: SaltPolicy::PerRequest,
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Directory for JSON log files; stderr only when unset.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            directory: None,
        }
    }
}
