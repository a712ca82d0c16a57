//! Configuration loading and validation tests
//!
//! Tests focus on behavior of configuration loading, validation and error
//! handling: what a deployer sees when a file is valid, partial or wrong.

use article_digest::config::{AppConfig, ConfigError};
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "{content}").unwrap();
    temp_file
}

#[test]
fn test_config_loads_successfully_from_valid_toml() {
    let temp_file = write_config(
        r#"
[server]
host = "127.0.0.1"
port = 9090

[store]
redis_url = "redis://localhost:6379"
key_prefix = "digest-test"

[rate_limit]
max_requests = 3
window_secs = 60

[cache]
ttl_secs = 600

[validation]
allowed_domains = ["health.harvard.edu", "cdc.gov"]

[retry]
max_attempts = 4
base_delay_ms = 250
multiplier = 3.0
max_delay_ms = 5000
jitter = false

[llm]
model = "gpt-4o-mini"
temperature = 0.2

[pipeline]
concurrent_agents = false
"#,
    );

    let config = AppConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.server.port, 9090);
    assert_eq!(config.store.redis_url.as_deref(), Some("redis://localhost:6379"));
    assert_eq!(config.store.key_prefix, "digest-test");
    assert_eq!(config.rate_limit.max_requests, 3);
    assert_eq!(config.cache.ttl_secs, 600);
    assert_eq!(
        config.validation.allowed_domains,
        vec!["health.harvard.edu", "cdc.gov"]
    );
    assert_eq!(config.llm.model, "gpt-4o-mini");
    assert!(!config.pipeline.concurrent_agents);

    let policy = config.retry.policy();
    assert_eq!(policy.max_attempts, 4);
    assert_eq!(policy.base_delay, Duration::from_millis(250));
    assert_eq!(policy.max_delay, Duration::from_secs(5));
    assert!(!policy.jitter);
}

#[test]
fn test_partial_config_keeps_defaults() {
    let temp_file = write_config(
        r#"
[rate_limit]
max_requests = 10
"#,
    );

    let config = AppConfig::load_from_file(temp_file.path()).unwrap();
    assert_eq!(config.rate_limit.max_requests, 10);
    assert_eq!(config.rate_limit.window_secs, 60);
    assert!(config.rate_limit.enabled);
    assert_eq!(config.cache.ttl_secs, 3600);
    assert_eq!(config.llm.provider, "openai");
    assert!(config.store.redis_url.is_none());
    assert!(config
        .validation
        .allowed_domains
        .iter()
        .any(|domain| domain == "health.harvard.edu"));
}

#[test]
fn test_missing_file_is_read_error() {
    let result = AppConfig::load_from_file(std::path::Path::new("/nonexistent/article-digest.toml"));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_malformed_toml_is_parse_error() {
    let temp_file = write_config("[rate_limit\nmax_requests = ");
    let result = AppConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_zero_rate_limit_is_rejected() {
    let temp_file = write_config(
        r#"
[rate_limit]
max_requests = 0
"#,
    );
    let result = AppConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
}

#[test]
fn test_unsupported_provider_is_rejected() {
    let temp_file = write_config(
        r#"
[llm]
provider = "carrier-pigeon"
"#,
    );
    let error = AppConfig::load_from_file(temp_file.path()).unwrap_err();
    assert!(error.to_string().contains("carrier-pigeon"));
}

#[test]
fn test_invalid_deny_pattern_is_rejected() {
    let temp_file = write_config(
        r#"
[validation]
deny_patterns = ["(unclosed"]
"#,
    );
    let result = AppConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
}

#[test]
fn test_empty_allow_list_is_rejected() {
    let temp_file = write_config(
        r#"
[validation]
allowed_domains = []
"#,
    );
    let result = AppConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
}

#[test]
fn test_missing_api_key_env_is_reported() {
    let temp_file = write_config(
        r#"
[llm]
api_key_env = "ARTICLE_DIGEST_TEST_KEY_THAT_IS_NEVER_SET"
"#,
    );
    let config = AppConfig::load_from_file(temp_file.path()).unwrap();
    let error = config.llm.api_key().unwrap_err();
    assert!(matches!(error, ConfigError::EnvVarNotFound(ref name)
        if name == "ARTICLE_DIGEST_TEST_KEY_THAT_IS_NEVER_SET"));
}

#[test]
fn test_rendered_config_loads_back() {
    let config = AppConfig::default();
    let rendered = config.to_toml_string().unwrap();
    let temp_file = write_config(&rendered);
    assert_eq!(AppConfig::load_from_file(temp_file.path()).unwrap(), config);
}
