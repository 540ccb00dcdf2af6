//! # Client Configuration
//!
//! Environment-based configuration for the cache client.

use std::env;
use std::time::Duration;

/// Cache client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Redis connection URL
    pub url: String,

    /// Deadline for establishing a connection
    pub connect_timeout: Duration,

    /// Deadline for each reply, on top of any server-side blocking wait
    pub response_timeout: Duration,

    /// Log mutating operations through the tracing observer
    pub log_operations: bool,

    /// Distributed lock settings
    pub lock: LockConfig,
}

/// Distributed lock configuration
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Prefix prepended to every lock key
    pub registry_key_prefix: String,

    /// Lock lease; the store drops the lock after this long
    pub expire_after: Duration,

    /// Idle interval between eviction sweeps of unused registry entries
    pub expire_evict_idle: Duration,

    /// Locks not obtained for this long are evicted from the registry
    pub max_lock_lifetime: Duration,

    /// Pause between acquisition attempts while waiting for a lock
    pub retry_interval: Duration,
}

fn env_millis(name: &str, default_ms: u64) -> Duration {
    Duration::from_millis(
        env::var(name)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default_ms),
    )
}

impl ClientConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            url: env::var("KEYWEAVE_REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),

            connect_timeout: env_millis("KEYWEAVE_CONNECT_TIMEOUT_MS", 3_000),

            response_timeout: env_millis("KEYWEAVE_RESPONSE_TIMEOUT_MS", 5_000),

            log_operations: env::var("KEYWEAVE_LOG_OPERATIONS")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),

            lock: LockConfig::from_env(),
        }
    }
}

impl LockConfig {
    /// Load lock configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            registry_key_prefix: env::var("KEYWEAVE_LOCK_PREFIX")
                .unwrap_or_else(|_| "lock".to_string()),
            expire_after: env_millis("KEYWEAVE_LOCK_EXPIRE_AFTER_MS", 60_000),
            expire_evict_idle: env_millis("KEYWEAVE_LOCK_EVICT_IDLE_MS", 3_000),
            max_lock_lifetime: env_millis("KEYWEAVE_LOCK_MAX_LIFETIME_MS", 600_000),
            retry_interval: env_millis("KEYWEAVE_LOCK_RETRY_INTERVAL_MS", 100),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        // Only unset variables are asserted so a developer's environment
        // cannot break the test.
        let config = ClientConfig::from_env();
        if env::var("KEYWEAVE_REDIS_URL").is_err() {
            assert_eq!(config.url, "redis://127.0.0.1:6379");
        }
        if env::var("KEYWEAVE_LOCK_EXPIRE_AFTER_MS").is_err() {
            assert_eq!(config.lock.expire_after, Duration::from_secs(60));
        }
        if env::var("KEYWEAVE_LOCK_RETRY_INTERVAL_MS").is_err() {
            assert_eq!(config.lock.retry_interval, Duration::from_millis(100));
        }
    }

    #[test]
    fn test_unparsable_falls_back() {
        assert_eq!(
            env_millis("KEYWEAVE_TEST_UNSET_VARIABLE_FOR_CONFIG", 250),
            Duration::from_millis(250)
        );
    }
}
