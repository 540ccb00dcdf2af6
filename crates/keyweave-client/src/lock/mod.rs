//! # Distributed Lock
//!
//! A lease-based lock on a single key. The owner writes a random id with
//! `SET NX PX`; only the owner that still holds the id deletes the key on
//! release. The store expires an abandoned lease after `expire_after`.
//!
//! ```text
//! obtain ──► SET key <owner> NX PX <ms> ──► OK  : held, locked_at recorded
//!                                      └─► nil : held by someone else
//! release ─► GET key == <owner> ? UNLINK key (DEL when UNLINK is refused)
//! ```

pub mod registry;

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use tokio::time::Instant;
use uuid::Uuid;

use keyweave_domain::{CacheError, Command, Result};

use crate::ops::{Dispatcher, ValueOps};

pub use registry::LockRegistry;

// =============================================================================
// LOCAL GUARDS
// =============================================================================

/// Clears the local in-flight flag when the obtain/release attempt ends,
/// including on cancellation.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn enter(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Spawns a release if the holder is dropped before it disarms.
struct ReleaseOnDrop(Option<Arc<DistributedLock>>);

impl ReleaseOnDrop {
    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        let Some(lock) = self.0.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(lock_key = %lock.key, "No runtime to release cancelled lock; lease will expire");
            return;
        };
        runtime.spawn(async move {
            match lock.release().await {
                Ok(released) => tracing::info!(lock_key = %lock.key, released, "Lock released after cancellation"),
                Err(e) => tracing::warn!(lock_key = %lock.key, error = %e, "Lock release after cancellation failed"),
            }
        });
    }
}

// =============================================================================
// DISTRIBUTED LOCK
// =============================================================================

/// Lease lock on one key
pub struct DistributedLock {
    key: String,
    owner: String,
    expire_after: Duration,
    retry_interval: Duration,
    dispatcher: Dispatcher,
    values: ValueOps,
    in_flight: AtomicBool,
    /// Epoch millis of the last successful obtain; 0 when never locked
    locked_at: AtomicI64,
    unlink_available: AtomicBool,
}

impl std::fmt::Debug for DistributedLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedLock")
            .field("key", &self.key)
            .field("owner", &self.owner)
            .field("locked_at", &self.locked_at())
            .finish_non_exhaustive()
    }
}

impl DistributedLock {
    pub fn new(dispatcher: Dispatcher, key: impl Into<String>, expire_after: Duration, retry_interval: Duration) -> Self {
        Self {
            key: key.into(),
            owner: Uuid::new_v4().to_string(),
            expire_after,
            retry_interval,
            values: ValueOps::new(dispatcher.clone()),
            dispatcher,
            in_flight: AtomicBool::new(false),
            locked_at: AtomicI64::new(0),
            unlink_available: AtomicBool::new(true),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// When this handle last obtained the lock.
    pub fn locked_at(&self) -> Option<DateTime<Utc>> {
        match self.locked_at.load(Ordering::Acquire) {
            0 => None,
            millis => DateTime::from_timestamp_millis(millis),
        }
    }

    /// One acquisition attempt.
    ///
    /// `Ok(false)` when the store holds another owner's lease or another
    /// attempt on this handle is still in flight.
    pub async fn obtain(&self) -> Result<bool> {
        let Some(_in_flight) = InFlight::enter(&self.in_flight) else {
            return Ok(false);
        };
        let acquired = self
            .values
            .set_if_absent(&self.key, &self.owner, Some(self.expire_after))
            .await?;
        if acquired {
            self.locked_at.store(Utc::now().timestamp_millis(), Ordering::Release);
        }
        Ok(acquired)
    }

    /// Whether the store currently holds this handle's lease.
    pub async fn processing(&self) -> Result<bool> {
        let holder: Option<String> = self.values.get(&self.key).await?;
        Ok(holder.as_deref() == Some(self.owner.as_str()))
    }

    /// Delete the key if this handle still owns it.
    ///
    /// `Ok(false)` when the lease had already expired or been taken over.
    pub async fn release(&self) -> Result<bool> {
        let Some(_in_flight) = InFlight::enter(&self.in_flight) else {
            return Ok(false);
        };
        if !self.processing().await? {
            tracing::warn!(
                lock_key = %self.key,
                "Lock expired before release; data guarded by it may have been modified concurrently"
            );
            return Ok(false);
        }

        if self.unlink_available.load(Ordering::Acquire) {
            match self
                .dispatcher
                .mutate::<u64>("lock.release", &self.key, Command::new("UNLINK").arg(&self.key))
                .await
            {
                Ok(removed) => return Ok(removed > 0),
                Err(CacheError::Server { message, .. }) => {
                    self.unlink_available.store(false, Ordering::Release);
                    tracing::warn!(
                        lock_key = %self.key,
                        error = %message,
                        "UNLINK rejected; falling back to DEL"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        let removed: u64 = self
            .dispatcher
            .mutate("lock.release", &self.key, Command::new("DEL").arg(&self.key))
            .await?;
        Ok(removed > 0)
    }

    /// Attempt once, run `f(acquired)`, then release.
    pub async fn try_lock<F, Fut, T, E>(self: &Arc<Self>, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(bool) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<CacheError>,
    {
        let acquired = self.obtain().await?;
        tracing::info!(lock_key = %self.key, acquired, "Single lock attempt finished");
        self.run_holding(acquired, f).await
    }

    /// Retry every `retry_interval` until acquired or `wait` elapses, run
    /// `f(acquired)`, then release.
    pub async fn lock<F, Fut, T, E>(self: &Arc<Self>, wait: Duration, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(bool) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<CacheError>,
    {
        let acquired = self.obtain_within(wait).await?;
        tracing::info!(lock_key = %self.key, acquired, "Lock wait finished");
        self.run_holding(acquired, f).await
    }

    /// Streaming [`try_lock`](Self::try_lock): the lock is held while the
    /// stream from `f(acquired)` is consumed and released once it ends or
    /// is dropped.
    pub fn try_lock_many<F, S, T, E>(self: &Arc<Self>, f: F) -> BoxStream<'static, std::result::Result<T, E>>
    where
        F: FnOnce(bool) -> S + Send + 'static,
        S: Stream<Item = std::result::Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: From<CacheError> + Send + 'static,
    {
        let lock = Arc::clone(self);
        self.stream_holding(async move { lock.obtain().await }, f)
    }

    /// Streaming [`lock`](Self::lock).
    pub fn lock_many<F, S, T, E>(
        self: &Arc<Self>,
        wait: Duration,
        f: F,
    ) -> BoxStream<'static, std::result::Result<T, E>>
    where
        F: FnOnce(bool) -> S + Send + 'static,
        S: Stream<Item = std::result::Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: From<CacheError> + Send + 'static,
    {
        let lock = Arc::clone(self);
        self.stream_holding(async move { lock.obtain_within(wait).await }, f)
    }

    async fn obtain_within(&self, wait: Duration) -> Result<bool> {
        let deadline = Instant::now() + wait;
        loop {
            if self.obtain().await? {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            tracing::trace!(lock_key = %self.key, "Lock busy, retrying");
            tokio::time::sleep(self.retry_interval.min(deadline - now)).await;
        }
    }

    fn stream_holding<A, F, S, T, E>(self: &Arc<Self>, acquire: A, f: F) -> BoxStream<'static, std::result::Result<T, E>>
    where
        A: Future<Output = Result<bool>> + Send + 'static,
        F: FnOnce(bool) -> S + Send + 'static,
        S: Stream<Item = std::result::Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: From<CacheError> + Send + 'static,
    {
        let lock = Arc::clone(self);
        stream::once(async move {
            let acquired = match acquire.await {
                Ok(acquired) => acquired,
                Err(e) => return stream::iter([Err(E::from(e))]).boxed(),
            };
            tracing::info!(lock_key = %lock.key, acquired, "Stream lock attempt finished");
            if !acquired {
                return f(false).boxed();
            }

            // Dropping the stream before the tail runs spawns the release.
            let guard = ReleaseOnDrop(Some(Arc::clone(&lock)));
            let tail = stream::once(async move {
                guard.disarm();
                match lock.release().await {
                    Ok(released) => {
                        tracing::info!(lock_key = %lock.key, released, "Lock released after stream");
                        None
                    }
                    Err(e) => {
                        tracing::warn!(lock_key = %lock.key, error = %e, "Lock release failed");
                        Some(Err(E::from(e)))
                    }
                }
            })
            .filter_map(future::ready);
            f(true).chain(tail).boxed()
        })
        .flatten()
        .boxed()
    }

    async fn run_holding<F, Fut, T, E>(self: &Arc<Self>, acquired: bool, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(bool) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<CacheError>,
    {
        if !acquired {
            return f(false).await;
        }

        let guard = ReleaseOnDrop(Some(Arc::clone(self)));
        let result = f(true).await;
        guard.disarm();

        match self.release().await {
            Ok(released) => {
                tracing::info!(lock_key = %self.key, released, ok = result.is_ok(), "Lock released");
                result
            }
            Err(e) => {
                tracing::warn!(lock_key = %self.key, error = %e, "Lock release failed");
                // The closure's own failure takes precedence.
                result.and(Err(e.into()))
            }
        }
    }
}
