use std::str::FromStr;
use std::time::Duration;

use analyst_cluster::backoff::BackoffConfig;
use analyst_core::error::CoreError;

/// Tuning for the submitter pool, result listener and retention sweeper.
///
/// Defaults suit a single service instance; override via environment
/// variables with [`EngineConfig::from_env`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of tasks preparing and dispatching submissions.
    pub submit_workers: usize,
    /// Submissions that may wait for a free task before `submit` fails
    /// with backpressure.
    pub submit_queue_capacity: usize,
    /// Messages requested per queue read.
    pub result_batch_size: usize,
    /// How long one queue read waits for messages.
    pub result_wait: Duration,
    /// Attempts at writing a finished output grid before giving up.
    pub finalize_attempts: u32,
    /// How long finished and failed jobs stay pollable.
    pub retention: Duration,
    /// Active jobs without progress for this long are failed. `None`
    /// disables stall detection.
    pub stall_timeout: Option<Duration>,
    /// Period of the retention sweep.
    pub sweep_interval: Duration,
    /// Backoff between failed queue reads and failed output writes.
    pub backoff: BackoffConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            submit_workers: 4,
            submit_queue_capacity: 512,
            result_batch_size: 10,
            result_wait: Duration::from_secs(20),
            finalize_attempts: 3,
            retention: Duration::from_secs(3600),
            stall_timeout: Some(Duration::from_secs(1800)),
            sweep_interval: Duration::from_secs(60),
            backoff: BackoffConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default |
    /// |-------------------------|---------|
    /// | `SUBMIT_WORKERS`        | `4`     |
    /// | `SUBMIT_QUEUE_CAPACITY` | `512`   |
    /// | `RESULT_BATCH_SIZE`     | `10`    |
    /// | `RESULT_WAIT_SECS`      | `20`    |
    /// | `FINALIZE_ATTEMPTS`     | `3`     |
    /// | `JOB_RETENTION_SECS`    | `3600`  |
    /// | `STALL_TIMEOUT_SECS`    | `1800` (`0` disables) |
    /// | `SWEEP_INTERVAL_SECS`   | `60`    |
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let submit_workers: usize = parse_or(&lookup, "SUBMIT_WORKERS", defaults.submit_workers)?;
        let submit_queue_capacity: usize =
            parse_or(&lookup, "SUBMIT_QUEUE_CAPACITY", defaults.submit_queue_capacity)?;
        let result_batch_size: usize =
            parse_or(&lookup, "RESULT_BATCH_SIZE", defaults.result_batch_size)?;
        let result_wait_secs: u64 =
            parse_or(&lookup, "RESULT_WAIT_SECS", defaults.result_wait.as_secs())?;
        let finalize_attempts: u32 =
            parse_or(&lookup, "FINALIZE_ATTEMPTS", defaults.finalize_attempts)?;
        let retention_secs: u64 =
            parse_or(&lookup, "JOB_RETENTION_SECS", defaults.retention.as_secs())?;
        let stall_timeout_secs: u64 = parse_or(&lookup, "STALL_TIMEOUT_SECS", 1800)?;
        let sweep_interval_secs: u64 =
            parse_or(&lookup, "SWEEP_INTERVAL_SECS", defaults.sweep_interval.as_secs())?;

        if submit_workers == 0 {
            return Err(CoreError::Validation(
                "SUBMIT_WORKERS must be at least 1".to_string(),
            ));
        }
        if submit_queue_capacity == 0 {
            return Err(CoreError::Validation(
                "SUBMIT_QUEUE_CAPACITY must be at least 1".to_string(),
            ));
        }
        if !(1..=10).contains(&result_batch_size) {
            return Err(CoreError::Validation(
                "RESULT_BATCH_SIZE must be between 1 and 10".to_string(),
            ));
        }
        if finalize_attempts == 0 {
            return Err(CoreError::Validation(
                "FINALIZE_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        if sweep_interval_secs == 0 {
            return Err(CoreError::Validation(
                "SWEEP_INTERVAL_SECS must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            submit_workers,
            submit_queue_capacity,
            result_batch_size,
            result_wait: Duration::from_secs(result_wait_secs),
            finalize_attempts,
            retention: Duration::from_secs(retention_secs),
            stall_timeout: (stall_timeout_secs > 0).then(|| Duration::from_secs(stall_timeout_secs)),
            sweep_interval: Duration::from_secs(sweep_interval_secs),
            backoff: defaults.backoff,
        })
    }
}

/// Parse `key` if set, otherwise fall back to `default`.
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
    fn defaults_when_nothing_set() {
        let config = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.submit_workers, 4);
        assert_eq!(config.submit_queue_capacity, 512);
        assert_eq!(config.stall_timeout, Some(Duration::from_secs(1800)));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("SUBMIT_WORKERS", "2"),
            ("RESULT_WAIT_SECS", "5"),
            ("JOB_RETENTION_SECS", "60"),
        ]))
        .unwrap();

        assert_eq!(config.submit_workers, 2);
        assert_eq!(config.result_wait, Duration::from_secs(5));
        assert_eq!(config.retention, Duration::from_secs(60));
    }

    #[test]
    fn zero_stall_timeout_disables_detection() {
        let config = EngineConfig::from_lookup(lookup(&[("STALL_TIMEOUT_SECS", "0")])).unwrap();
        assert_eq!(config.stall_timeout, None);
    }

    #[test]
    fn unparsable_value_rejected() {
        assert!(EngineConfig::from_lookup(lookup(&[("SUBMIT_WORKERS", "many")])).is_err());
    }

    #[test]
    fn out_of_range_values_rejected() {
        assert!(EngineConfig::from_lookup(lookup(&[("SUBMIT_WORKERS", "0")])).is_err());
        assert!(EngineConfig::from_lookup(lookup(&[("RESULT_BATCH_SIZE", "50")])).is_err());
        assert!(EngineConfig::from_lookup(lookup(&[("FINALIZE_ATTEMPTS", "0")])).is_err());
    }
}
