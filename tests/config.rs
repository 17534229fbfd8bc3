use std::fs;
use std::time::Duration;

use assert_matches::assert_matches;
use tempfile::tempdir;

use kerchunk_resolver::config::{
    Config, ConfigLoader, DEFAULT_GS_ENDPOINT, EndpointsEntry, RetryEntry,
};
use kerchunk_resolver::error::ResolverError;

#[test]
fn parse_config_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("kcr.json");
    fs::write(
        &path,
        r#"{
            "schema_version": 1,
            "workers": 6,
            "retry": {"max_retries": 5, "base_delay_ms": 50},
            "timeout_secs": 15,
            "user_agent": "survey-bot/2",
            "use_env_proxy": false,
            "endpoints": {"s3": "https://minio.local/{bucket}/{key}"},
            "cache_capacity": 128
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(Some(path.as_path())).unwrap();
    assert_eq!(resolved.workers, 6);
    assert_eq!(resolved.retry.max_retries, 5);
    assert_eq!(resolved.retry.base_delay, Duration::from_millis(50));
    assert_eq!(resolved.retry.max_delay, Duration::from_secs(5));
    assert_eq!(resolved.http.timeout, Duration::from_secs(15));
    assert_eq!(resolved.http.user_agent, "survey-bot/2");
    assert!(!resolved.http.use_env_proxy);
    assert_eq!(resolved.endpoints.s3, "https://minio.local/{bucket}/{key}");
    assert_eq!(resolved.endpoints.gs, DEFAULT_GS_ENDPOINT);
    assert_eq!(resolved.cache_capacity, 128);
    assert_eq!(resolved.source.as_deref(), Some(path.as_path()));
}

#[test]
fn missing_explicit_file_is_an_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("absent.json");
    assert_matches!(
        ConfigLoader::resolve(Some(path.as_path())),
        Err(ResolverError::ConfigRead(missing)) if missing == path
    );
}

#[test]
fn malformed_file_is_a_parse_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("kcr.json");
    fs::write(&path, "{ workers: 2 ").unwrap();
    assert_matches!(
        ConfigLoader::resolve(Some(path.as_path())),
        Err(ResolverError::ConfigParse(_))
    );
}

#[test]
fn rejects_inconsistent_settings() {
    let retry = Config {
        retry: Some(RetryEntry {
            max_retries: Some(1),
            base_delay_ms: Some(1000),
            max_delay_ms: Some(10),
        }),
        ..Config::default()
    };
    assert_matches!(
        ConfigLoader::resolve_config(retry),
        Err(ResolverError::ConfigParse(_))
    );

    let endpoint = Config {
        endpoints: EndpointsEntry {
            s3: Some("https://minio.local/{bucket}".to_string()),
            gs: None,
        },
        ..Config::default()
    };
    assert_matches!(
        ConfigLoader::resolve_config(endpoint),
        Err(ResolverError::ConfigParse(_))
    );

    let workers = Config {
        workers: Some(0),
        ..Config::default()
    };
    assert_matches!(
        ConfigLoader::resolve_config(workers),
        Err(ResolverError::ConfigParse(_))
    );
}
