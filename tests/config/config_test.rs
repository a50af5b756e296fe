//! Coverage for config parsing, env overrides and validation.

use std::collections::HashMap;
use std::path::PathBuf;

use netveil::config::{ConfigError, GatewayConfig, MappingBackend, DEFAULT_CONFIG_FILE};
use netveil::redaction::SaltPolicy;

const SECRET: &str = "0123456789abcdef0123456789abcdef";

fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect();
    move |key| map.get(key).cloned()
}

fn valid() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.apply_overrides(env_from(&[("NETVEIL_DETERMINISTIC_SECRET", SECRET)]));
    config
}

#[test]
fn defaults_match_documented_values() {
    let config = GatewayConfig::default();
    assert_eq!(config.server.bind, "127.0.0.1:8080");
    assert_eq!(config.limits.max_payload_bytes, 1_048_576);
    assert_eq!(config.limits.rate_limit_requests, 120);
    assert_eq!(config.limits.rate_limit_window_secs, 60);
    assert_eq!(config.limits.request_timeout_secs, 15);
    assert_eq!(config.mapping.backend, MappingBackend::Memory);
    assert_eq!(config.mapping.ttl_secs, 86_400);
    assert_eq!(config.mapping.cleanup_interval_secs, 300);
    assert_eq!(config.mapping.redis_namespace, "redact_mappings");
    assert!(config.deterministic.enabled);
    assert!(config.deterministic.secret.is_none());
    assert_eq!(config.deterministic.salt, SaltPolicy::PerRequest);
    assert_eq!(config.logging.level, "info");
}

#[test]
fn parse_full_toml() {
    let config = GatewayConfig::from_toml(
        r#"
[server]
bind = "0.0.0.0:9000"

[limits]
max_payload_bytes = 2048
rate_limit_requests = 5
rate_limit_window_secs = 10
request_timeout_secs = 2

[mapping]
backend = "redis"
ttl_secs = 600
cleanup_interval_secs = 60
redis_url = "redis://localhost:6379/0"
redis_namespace = "tenant_a"

[deterministic]
enabled = true
secret = "0123456789abcdef0123456789abcdef"
salt = "stable"

[logging]
level = "debug"
directory = "/var/log/netveil"
"#,
    )
    .expect("should parse");

    assert_eq!(config.server.bind, "0.0.0.0:9000");
    assert_eq!(config.limits.max_payload_bytes, 2048);
    assert_eq!(config.limits.rate_limit_requests, 5);
    assert_eq!(config.mapping.backend, MappingBackend::Redis);
    assert_eq!(config.mapping.redis_namespace, "tenant_a");
    assert_eq!(config.deterministic.salt, SaltPolicy::Stable);
    assert_eq!(config.logging.directory, Some(PathBuf::from("/var/log/netveil")));
    assert!(config.validate().is_ok());
}

#[test]
fn partial_toml_keeps_other_defaults() {
    let config = GatewayConfig::from_toml("[limits]\nrate_limit_requests = 7\n").expect("parse");
    assert_eq!(config.limits.rate_limit_requests, 7);
    assert_eq!(config.limits.request_timeout_secs, 15);
    assert_eq!(config.mapping.ttl_secs, 86_400);
}

#[test]
fn secret_is_hidden_from_debug_output() {
    let rendered = format!("{:?}", valid());
    assert!(!rendered.contains(SECRET));
    assert!(rendered.contains("__REDACTED__"));
}

#[test]
fn env_overrides_win_over_file_values() {
    let mut config = GatewayConfig::from_toml("[limits]\nrate_limit_requests = 7\n").expect("parse");
    config.apply_overrides(env_from(&[
        ("NETVEIL_RATE_LIMIT_REQUESTS", "9"),
        ("NETVEIL_BIND", "127.0.0.1:9999"),
        ("NETVEIL_SALT_POLICY", "stable"),
        ("NETVEIL_LOG_DIR", "/tmp/netveil-logs"),
    ]));
    assert_eq!(config.limits.rate_limit_requests, 9);
    assert_eq!(config.server.bind, "127.0.0.1:9999");
    assert_eq!(config.deterministic.salt, SaltPolicy::Stable);
    assert_eq!(config.logging.directory, Some(PathBuf::from("/tmp/netveil-logs")));
}

#[test]
fn invalid_numeric_override_is_ignored() {
    let mut config = GatewayConfig::default();
    config.apply_overrides(env_from(&[("NETVEIL_MAX_PAYLOAD_BYTES", "lots")]));
    assert_eq!(config.limits.max_payload_bytes, 1_048_576);
}

#[test]
fn redis_url_override_selects_redis_backend() {
    let mut config = valid();
    config.apply_overrides(env_from(&[("NETVEIL_REDIS_URL", "redis://cache:6379")]));
    assert_eq!(config.mapping.backend, MappingBackend::Redis);
    assert_eq!(config.mapping.redis_url.as_deref(), Some("redis://cache:6379"));
    assert!(config.validate().is_ok());
}

#[test]
fn enabled_deterministic_mode_requires_a_secret() {
    assert!(matches!(
        GatewayConfig::default().validate(),
        Err(ConfigError::MissingSecret)
    ));
}

#[test]
fn short_secret_is_rejected() {
    let mut config = GatewayConfig::default();
    config.apply_overrides(env_from(&[("NETVEIL_DETERMINISTIC_SECRET", "short")]));
    assert!(matches!(
        config.validate(),
        Err(ConfigError::SecretTooShort { len: 5, min: 32 })
    ));
}

#[test]
fn disabled_deterministic_mode_needs_no_secret() {
    let mut config = GatewayConfig::default();
    config.apply_overrides(env_from(&[("NETVEIL_DETERMINISTIC_ENABLED", "false")]));
    assert!(config.validate().is_ok());
    assert!(config.deterministic_key().expect("no key").is_none());
}

#[test]
fn out_of_range_values_are_rejected() {
    let mut config = valid();
    config.limits.max_payload_bytes = 10;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::OutOfRange { field: "limits.max_payload_bytes", .. })
    ));

    let mut config = valid();
    config.mapping.ttl_secs = 59;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::OutOfRange { field: "mapping.ttl_secs", .. })
    ));

    let mut config = valid();
    config.limits.rate_limit_requests = 0;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::OutOfRange { field: "limits.rate_limit_requests", .. })
    ));
}

#[test]
fn redis_backend_requires_url_and_namespace() {
    let mut config = valid();
    config.mapping.backend = MappingBackend::Redis;
    assert!(matches!(config.validate(), Err(ConfigError::MissingRedisUrl)));

    config.mapping.redis_url = Some("redis://localhost".to_owned());
    config.mapping.redis_namespace.clear();
    assert!(matches!(config.validate(), Err(ConfigError::EmptyNamespace)));
}

#[test]
fn bad_bind_address_is_rejected() {
    let mut config = valid();
    config.server.bind = "not-an-address".to_owned();
    assert!(matches!(config.validate(), Err(ConfigError::InvalidBind(_))));
}

#[test]
fn config_path_prefers_env() {
    let path = GatewayConfig::config_path_with(env_from(&[("NETVEIL_CONFIG_PATH", "/etc/netveil.toml")]));
    assert_eq!(path, PathBuf::from("/etc/netveil.toml"));
    assert_eq!(
        GatewayConfig::config_path_with(env_from(&[])),
        PathBuf::from(DEFAULT_CONFIG_FILE)
    );
}

#[test]
fn load_reads_file_and_applies_overrides() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let path = tmp.path().join("netveil.toml");
    std::fs::write(&path, "[mapping]\nttl_secs = 120\n").expect("write config");
    let path_str = path.to_string_lossy().into_owned();

    let config = GatewayConfig::load_with(env_from(&[
        ("NETVEIL_CONFIG_PATH", path_str.as_str()),
        ("NETVEIL_CLEANUP_INTERVAL_SECS", "45"),
    ]))
    .expect("load");
    assert_eq!(config.mapping.ttl_secs, 120);
    assert_eq!(config.mapping.cleanup_interval_secs, 45);
}

#[test]
fn missing_file_yields_defaults() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let path = tmp.path().join("absent.toml");
    let config = GatewayConfig::load_from_file(&path).expect("load");
    assert_eq!(config.limits.rate_limit_requests, 120);
}

#[test]
fn malformed_toml_is_an_error() {
    assert!(GatewayConfig::from_toml("[limits\nbroken").is_err());
}
