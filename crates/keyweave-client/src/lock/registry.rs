//! Registry handing out one [`DistributedLock`] per lock key

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::task::JoinHandle;

use super::DistributedLock;
use crate::config::LockConfig;
use crate::ops::Dispatcher;

/// Lock handles keyed by unprefixed lock key
pub struct LockRegistry {
    locks: DashMap<String, Arc<DistributedLock>>,
    dispatcher: Dispatcher,
    config: LockConfig,
}

impl LockRegistry {
    pub fn new(dispatcher: Dispatcher, config: LockConfig) -> Self {
        Self {
            locks: DashMap::new(),
            dispatcher,
            config,
        }
    }

    /// Handle for `lock_key`, stored under `<prefix>:<lock_key>`.
    ///
    /// Repeated calls return the same handle until it is evicted.
    pub fn obtain(&self, lock_key: &str) -> Arc<DistributedLock> {
        self.locks
            .entry(lock_key.to_string())
            .or_insert_with(|| {
                Arc::new(DistributedLock::new(
                    self.dispatcher.clone(),
                    format!("{}:{lock_key}", self.config.registry_key_prefix),
                    self.config.expire_after,
                    self.config.retry_interval,
                ))
            })
            .clone()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Drop handles not obtained within `max_lifetime` whose lease is no
    /// longer held. Returns how many were removed.
    pub async fn expire_unused(&self, max_lifetime: Duration) -> usize {
        let now = Utc::now();
        let idle: Vec<(String, Arc<DistributedLock>)> = self
            .locks
            .iter()
            .filter(|entry| {
                entry.value().locked_at().is_none_or(|at| {
                    now.signed_duration_since(at).to_std().unwrap_or_default() >= max_lifetime
                })
            })
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        let mut removed = 0;
        for (lock_key, lock) in idle {
            match lock.processing().await {
                Ok(false) => {
                    if self
                        .locks
                        .remove_if(&lock_key, |_, current| Arc::ptr_eq(current, &lock))
                        .is_some()
                    {
                        tracing::debug!(lock_key = %lock_key, "Evicted unused lock");
                        removed += 1;
                    }
                }
                Ok(true) => {}
                Err(e) => tracing::error!(lock_key = %lock_key, error = %e, "Unused lock check failed"),
            }
        }
        removed
    }

    /// Sweep every `expire_evict_idle`, evicting handles idle for
    /// `max_lock_lifetime`. Stops once the registry is dropped.
    pub fn spawn_eviction(self: &Arc<Self>) -> JoinHandle<()> {
        let registry: Weak<Self> = Arc::downgrade(self);
        let period = self.config.expire_evict_idle;
        let max_lifetime = self.config.max_lock_lifetime;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;

            loop {
                interval.tick().await;
                let Some(registry) = registry.upgrade() else {
                    tracing::debug!("Lock registry dropped, stopping eviction");
                    break;
                };
                let removed = registry.expire_unused(max_lifetime).await;
                if removed > 0 {
                    tracing::info!(removed, remaining = registry.len(), "Evicted unused locks");
                }
            }
        })
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;
    use crate::CacheClient;

    fn config(max_lock_lifetime: Duration) -> LockConfig {
        LockConfig {
            registry_key_prefix: "jobs".to_string(),
            expire_after: Duration::from_secs(30),
            expire_evict_idle: Duration::from_millis(100),
            max_lock_lifetime,
            retry_interval: Duration::from_millis(10),
        }
    }

    fn registry(max_lock_lifetime: Duration) -> LockRegistry {
        let client = CacheClient::in_memory();
        LockRegistry::new(client.dispatcher().clone(), config(max_lock_lifetime))
    }

    #[tokio::test]
    async fn test_same_handle_per_key() {
        let registry = registry(Duration::from_secs(600));
        let a = registry.obtain("nightly");
        let b = registry.obtain("nightly");
        let other = registry.obtain("hourly");

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &other));
        assert_eq!(a.key(), "jobs:nightly");
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_expire_unused_keeps_held_locks() {
        let registry = registry(Duration::ZERO);
        let held = registry.obtain("held");
        let _idle = registry.obtain("idle");
        assert!(held.obtain().await.unwrap());

        assert_eq!(registry.expire_unused(Duration::ZERO).await, 1);
        assert_eq!(registry.len(), 1);
        assert!(Arc::ptr_eq(&registry.obtain("held"), &held));

        assert!(held.release().await.unwrap());
        assert_eq!(registry.expire_unused(Duration::ZERO).await, 1);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_recently_locked_survives() {
        let registry = registry(Duration::from_secs(600));
        let lock = registry.obtain("recent");
        assert!(lock.obtain().await.unwrap());
        assert!(lock.release().await.unwrap());

        assert_eq!(registry.expire_unused(Duration::from_secs(600)).await, 0);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_task() {
        let registry = Arc::new(registry(Duration::ZERO));
        let _ = registry.obtain("stale");
        let task = registry.spawn_eviction();

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(registry.is_empty());

        drop(registry);
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(task.is_finished());
    }
}
