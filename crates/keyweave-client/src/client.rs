//! # Cache Client
//!
//! Entry point handing out the per-structure operation sets over one shared
//! command channel.

use std::sync::Arc;

use futures::stream::BoxStream;

use keyweave_domain::{FromReply, Result, ScanOptions};

use crate::channel::SharedChannel;
use crate::config::{ClientConfig, LockConfig};
use crate::cursor::ScanRequest;
use crate::lock::{DistributedLock, LockRegistry};
use crate::observer::{NoopObserver, OperationObserver, TracingObserver};
use crate::ops::{Dispatcher, HashOps, ListOps, SetOps, SortedSetOps, ValueOps};

/// Typed cache client
#[derive(Clone)]
pub struct CacheClient {
    dispatcher: Dispatcher,
    lock_config: LockConfig,
}

impl CacheClient {
    /// Connect to Redis as described by `config`
    #[cfg(feature = "redis")]
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        let channel = crate::channel::RedisChannel::connect(config).await?;
        Ok(Self::from_config(Arc::new(channel), config))
    }

    /// Process-local client for tests and development
    #[cfg(feature = "memory")]
    pub fn in_memory() -> Self {
        Self::from_config(Arc::new(crate::channel::MemoryChannel::new()), &ClientConfig::from_env())
    }

    /// Client over any command channel, logging per `config.log_operations`
    pub fn from_config(channel: SharedChannel, config: &ClientConfig) -> Self {
        let observer: Arc<dyn OperationObserver> = if config.log_operations {
            Arc::new(TracingObserver)
        } else {
            Arc::new(NoopObserver)
        };
        Self {
            dispatcher: Dispatcher::new(channel, observer),
            lock_config: config.lock.clone(),
        }
    }

    /// Same channel, different observer.
    #[must_use]
    pub fn with_observer(&self, observer: Arc<dyn OperationObserver>) -> Self {
        Self {
            dispatcher: self.dispatcher.with_observer(observer),
            lock_config: self.lock_config.clone(),
        }
    }

    pub const fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    // =========================================================================
    // OPERATION SETS
    // =========================================================================

    pub fn hash(&self) -> HashOps {
        HashOps::new(self.dispatcher.clone())
    }

    pub fn list(&self) -> ListOps {
        ListOps::new(self.dispatcher.clone())
    }

    pub fn set(&self) -> SetOps {
        SetOps::new(self.dispatcher.clone())
    }

    pub fn sorted_set(&self) -> SortedSetOps {
        SortedSetOps::new(self.dispatcher.clone())
    }

    pub fn value(&self) -> ValueOps {
        ValueOps::new(self.dispatcher.clone())
    }

    /// Keyspace enumeration through `SCAN`.
    pub fn scan_keys<T: FromReply + Send + 'static>(&self, options: ScanOptions) -> BoxStream<'static, Result<T>> {
        self.dispatcher.scan(ScanRequest::keys(options))
    }

    // =========================================================================
    // LOCKS
    // =========================================================================

    /// New registry using the configured prefix and lease settings.
    pub fn lock_registry(&self) -> LockRegistry {
        LockRegistry::new(self.dispatcher.clone(), self.lock_config.clone())
    }

    /// Standalone lock on `<prefix>:<lock_key>`.
    pub fn lock(&self, lock_key: &str) -> Arc<DistributedLock> {
        Arc::new(DistributedLock::new(
            self.dispatcher.clone(),
            format!("{}:{lock_key}", self.lock_config.registry_key_prefix),
            self.lock_config.expire_after,
            self.lock_config.retry_interval,
        ))
    }
}

/// Shared client handle
pub type SharedCacheClient = Arc<CacheClient>;

#[cfg(all(test, feature = "memory"))]
mod tests {
    use std::collections::BTreeSet;

    use futures::TryStreamExt;

    use super::*;
    use crate::observer::testing::RecordingObserver;

    #[tokio::test]
    async fn test_operation_sets_share_channel() {
        let client = CacheClient::in_memory();
        client.hash().put("h", "f", "v").await.unwrap();
        client.list().push("l", keyweave_domain::End::Right, "x").await.unwrap();
        client.set().add("s", &["m"]).await.unwrap();
        client.sorted_set().add("z", "m", 1.0).await.unwrap();
        client.value().set("v", "1").await.unwrap();

        let keys: BTreeSet<String> = client
            .scan_keys(ScanOptions::default().count(2))
            .try_collect()
            .await
            .unwrap();
        assert_eq!(keys, BTreeSet::from(["h", "l", "s", "z", "v"].map(String::from)));

        let matching: Vec<String> = client
            .scan_keys(ScanOptions::default().matching("h*"))
            .try_collect()
            .await
            .unwrap();
        assert_eq!(matching, vec!["h"]);

        let classed: BTreeSet<String> = client
            .scan_keys(ScanOptions::default().matching("[hl]*"))
            .try_collect()
            .await
            .unwrap();
        assert_eq!(classed, BTreeSet::from(["h", "l"].map(String::from)));
    }

    #[tokio::test]
    async fn test_with_observer_swaps_logging_only() {
        let client = CacheClient::in_memory();
        let recorder = Arc::new(RecordingObserver::default());
        let observed = client.with_observer(recorder.clone());

        observed.hash().put("h", "f", "v").await.unwrap();
        observed.sorted_set().add("z", "m", 1.0).await.unwrap();
        let _: Option<String> = observed.hash().get("h", "f").await.unwrap();
        client.set().add("s", &["unobserved"]).await.unwrap();

        assert_eq!(recorder.operations(), vec!["hash.put", "zset.add"]);
        assert_eq!(
            client.hash().get::<String>("h", "f").await.unwrap(),
            Some("v".to_string())
        );
    }

    #[tokio::test]
    async fn test_locks_use_prefix() {
        let client = CacheClient::in_memory();
        let lock = client.lock("report");
        assert!(lock.key().ends_with(":report"));
        assert!(lock.obtain().await.unwrap());

        let registry = client.lock_registry();
        let same_key = registry.obtain("report");
        assert_eq!(same_key.key(), lock.key());
        assert!(!same_key.obtain().await.unwrap());
    }
}
