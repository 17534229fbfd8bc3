use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::ResolverError;
use crate::fetcher::RetryPolicy;

pub const DEFAULT_CONFIG_FILE: &str = "kcr.json";
pub const DEFAULT_S3_ENDPOINT: &str = "https://{bucket}.s3.amazonaws.com/{key}";
pub const DEFAULT_GS_ENDPOINT: &str = "https://storage.googleapis.com/{bucket}/{key}";
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const MAX_DEFAULT_WORKERS: usize = 16;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub retry: Option<RetryEntry>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub use_env_proxy: Option<bool>,
    #[serde(default)]
    pub endpoints: EndpointsEntry,
    #[serde(default)]
    pub cache_capacity: Option<usize>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RetryEntry {
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub base_delay_ms: Option<u64>,
    #[serde(default)]
    pub max_delay_ms: Option<u64>,
}

/// URL templates for object stores. `{bucket}` and `{key}` are substituted per request.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct EndpointsEntry {
    #[serde(default)]
    pub s3: Option<String>,
    #[serde(default)]
    pub gs: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub s3: String,
    pub gs: String,
}

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub timeout: Duration,
    pub user_agent: String,
    pub use_env_proxy: bool,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub workers: usize,
    pub retry: RetryPolicy,
    pub http: HttpSettings,
    pub endpoints: Endpoints,
    pub cache_capacity: usize,
    /// File the settings came from, if any.
    pub source: Option<PathBuf>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            schema_version: 1,
            workers: default_workers(),
            retry: RetryPolicy::default(),
            http: HttpSettings {
                timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
                user_agent: default_user_agent(),
                use_env_proxy: true,
            },
            endpoints: Endpoints {
                s3: DEFAULT_S3_ENDPOINT.to_string(),
                gs: DEFAULT_GS_ENDPOINT.to_string(),
            },
            cache_capacity: 0,
            source: None,
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load settings from `path`, else `./kcr.json`, else the user config directory.
    ///
    /// Missing implicit files fall back to defaults; a missing explicit file is an error.
    pub fn resolve(path: Option<&Path>) -> Result<ResolvedConfig, ResolverError> {
        let config_path = match path {
            Some(path) => Some(path.to_path_buf()),
            None => Self::discover(),
        };
        let Some(config_path) = config_path else {
            return Ok(ResolvedConfig::default());
        };

        let content = fs::read_to_string(&config_path)
            .map_err(|_| ResolverError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| ResolverError::ConfigParse(err.to_string()))?;

        let mut resolved = Self::resolve_config(config)?;
        resolved.source = Some(config_path);
        Ok(resolved)
    }

    fn discover() -> Option<PathBuf> {
        let local = PathBuf::from(DEFAULT_CONFIG_FILE);
        if local.is_file() {
            return Some(local);
        }
        BaseDirs::new()
            .map(|dirs| dirs.config_dir().join("kcr").join("config.json"))
            .filter(|path| path.is_file())
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, ResolverError> {
        let defaults = ResolvedConfig::default();
        let schema_version = config.schema_version.unwrap_or(1);
        if schema_version != 1 {
            return Err(ResolverError::ConfigParse(format!(
                "unsupported schema_version {schema_version}"
            )));
        }

        let workers = match config.workers {
            Some(0) => {
                return Err(ResolverError::ConfigParse(
                    "workers must be at least 1".to_string(),
                ));
            }
            Some(workers) => workers,
            None => defaults.workers,
        };

        let retry = match config.retry {
            Some(entry) => {
                let base = entry
                    .base_delay_ms
                    .map_or(defaults.retry.base_delay, Duration::from_millis);
                let max = entry
                    .max_delay_ms
                    .map_or(defaults.retry.max_delay, Duration::from_millis);
                if max < base {
                    return Err(ResolverError::ConfigParse(
                        "retry.max_delay_ms must not be below retry.base_delay_ms".to_string(),
                    ));
                }
                RetryPolicy {
                    max_retries: entry.max_retries.unwrap_or(defaults.retry.max_retries),
                    base_delay: base,
                    max_delay: max,
                }
            }
            None => defaults.retry,
        };

        let timeout = match config.timeout_secs {
            Some(0) => {
                return Err(ResolverError::ConfigParse(
                    "timeout_secs must be at least 1".to_string(),
                ));
            }
            Some(secs) => Duration::from_secs(secs),
            None => defaults.http.timeout,
        };

        let endpoints = Endpoints {
            s3: config.endpoints.s3.unwrap_or(defaults.endpoints.s3),
            gs: config.endpoints.gs.unwrap_or(defaults.endpoints.gs),
        };
        for endpoint in [&endpoints.s3, &endpoints.gs] {
            if !endpoint.contains("{key}") {
                return Err(ResolverError::ConfigParse(format!(
                    "endpoint `{endpoint}` must contain a {{key}} placeholder"
                )));
            }
        }

        Ok(ResolvedConfig {
            schema_version,
            workers,
            retry,
            http: HttpSettings {
                timeout,
                user_agent: config.user_agent.unwrap_or(defaults.http.user_agent),
                use_env_proxy: config.use_env_proxy.unwrap_or(true),
            },
            endpoints,
            cache_capacity: config.cache_capacity.unwrap_or(0),
            source: None,
        })
    }
}

pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(4)
        .min(MAX_DEFAULT_WORKERS)
}

pub fn default_user_agent() -> String {
    format!("kcr/{}", env!("CARGO_PKG_VERSION"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let resolved = ConfigLoader::resolve_config(Config::default()).unwrap();
        assert_eq!(resolved.schema_version, 1);
        assert_eq!(resolved.retry, RetryPolicy::default());
        assert_eq!(resolved.http.timeout, Duration::from_secs(60));
        assert_eq!(resolved.endpoints.s3, DEFAULT_S3_ENDPOINT);
        assert_eq!(resolved.cache_capacity, 0);
        assert!(resolved.workers >= 1);
    }

    #[test]
    fn rejects_zero_workers() {
        let config = Config {
            workers: Some(0),
            ..Config::default()
        };
        assert!(ConfigLoader::resolve_config(config).is_err());
    }
}
