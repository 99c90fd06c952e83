use std::path::PathBuf;
use std::str::FromStr;

use analyst_core::error::CoreError;
use analyst_engine::config::EngineConfig;

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for running against a local cluster.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS`.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// How long shutdown waits for in-flight work, in seconds (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// Run against a local cluster: localhost broker, local-disk storage and
    /// an in-process result queue fed over HTTP.
    pub offline: bool,
    /// Externally reachable base URL of this service. Offline workers post
    /// results to `{public_url}/api/v1/regional/results`.
    pub public_url: String,
    pub broker_url: String,
    /// SQS queue workers post results to.
    pub results_queue: String,
    /// Bucket for finished output grids.
    pub results_bucket: String,
    /// Bucket for scenarios shared with the workers.
    pub bundle_bucket: String,
    /// Storage root in offline mode.
    pub local_cache: PathBuf,
    /// JSON snapshot of bundles and projects.
    pub documents_path: Option<PathBuf>,
    pub engine: EngineConfig,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default                    |
    /// |-------------------------|----------------------------|
    /// | `HOST`                  | `0.0.0.0`                  |
    /// | `PORT`                  | `3000`                     |
    /// | `CORS_ORIGINS`          | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS`  | `30`                       |
    /// | `SHUTDOWN_TIMEOUT_SECS` | `30`                       |
    /// | `OFFLINE`               | `false`                    |
    /// | `PUBLIC_URL`            | `http://localhost:3000`    |
    /// | `BROKER_URL`            | `http://localhost:6001`    |
    /// | `RESULTS_QUEUE`         | `analyst-results`          |
    /// | `RESULTS_BUCKET`        | `analyst-results`          |
    /// | `BUNDLE_BUCKET`         | `analyst-bundles`          |
    /// | `LOCAL_CACHE`           | `cache`                    |
    /// | `DOCUMENTS_PATH`        | unset                      |
    ///
    /// Engine tuning variables are read by [`EngineConfig::from_env`].
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let string_or = |key: &str, default: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let cors_origins: Vec<String> = string_or("CORS_ORIGINS", "http://localhost:5173")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        for origin in &cors_origins {
            if axum::http::HeaderValue::from_str(origin).is_err() {
                return Err(CoreError::Validation(format!(
                    "CORS_ORIGINS contains an invalid origin '{origin}'"
                )));
            }
        }

        let offline = match string_or("OFFLINE", "false").to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => true,
            "0" | "false" | "no" => false,
            other => {
                return Err(CoreError::Validation(format!(
                    "OFFLINE has an invalid value '{other}'"
                )))
            }
        };

        Ok(Self {
            host: string_or("HOST", "0.0.0.0"),
            port: parse_or(&lookup, "PORT", 3000)?,
            cors_origins,
            request_timeout_secs: parse_or(&lookup, "REQUEST_TIMEOUT_SECS", 30)?,
            shutdown_timeout_secs: parse_or(&lookup, "SHUTDOWN_TIMEOUT_SECS", 30)?,
            offline,
            public_url: string_or("PUBLIC_URL", "http://localhost:3000")
                .trim_end_matches('/')
                .to_string(),
            broker_url: string_or("BROKER_URL", "http://localhost:6001"),
            results_queue: string_or("RESULTS_QUEUE", "analyst-results"),
            results_bucket: string_or("RESULTS_BUCKET", "analyst-results"),
            bundle_bucket: string_or("BUNDLE_BUCKET", "analyst-bundles"),
            local_cache: PathBuf::from(string_or("LOCAL_CACHE", "cache")),
            documents_path: lookup("DOCUMENTS_PATH")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            engine: EngineConfig::from_lookup(&lookup)?,
        })
    }

    /// Address offline workers post tile results to.
    pub fn local_results_url(&self) -> String {
        format!("{}/api/v1/regional/results", self.public_url)
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T, CoreError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| CoreError::Validation(format!("{key} has an invalid value '{raw}'"))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_target_local_cluster() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();

        assert_eq!(config.port, 3000);
        assert!(!config.offline);
        assert_eq!(config.broker_url, "http://localhost:6001");
        assert_eq!(config.results_queue, "analyst-results");
        assert_eq!(config.bundle_bucket, "analyst-bundles");
        assert!(config.documents_path.is_none());
        assert_eq!(config.engine.submit_workers, 4);
    }

    #[test]
    fn offline_results_url_built_from_public_url() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("OFFLINE", "true"),
            ("PUBLIC_URL", "http://10.0.0.5:3000/"),
        ]))
        .unwrap();

        assert!(config.offline);
        assert_eq!(
            config.local_results_url(),
            "http://10.0.0.5:3000/api/v1/regional/results"
        );
    }

    #[test]
    fn cors_origins_split_on_commas() {
        let config = ServerConfig::from_lookup(lookup(&[(
            "CORS_ORIGINS",
            "http://a.test, http://b.test,",
        )]))
        .unwrap();
        assert_eq!(config.cors_origins, vec!["http://a.test", "http://b.test"]);
    }

    #[test]
    fn invalid_values_rejected() {
        assert!(ServerConfig::from_lookup(lookup(&[("PORT", "http")])).is_err());
        assert!(ServerConfig::from_lookup(lookup(&[("OFFLINE", "maybe")])).is_err());
        assert!(ServerConfig::from_lookup(lookup(&[("SUBMIT_WORKERS", "0")])).is_err());
    }
}
