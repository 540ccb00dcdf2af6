//! # Structure Operation Sets
//!
//! One handle per data type, each a cheap clone over a shared [`Dispatcher`].
//! Every read decodes its reply into the caller's requested type; `Reply`
//! yields the raw reply.

pub mod hash;
pub mod list;
pub mod set;
pub mod sorted_set;
pub mod value;

use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};

use keyweave_domain::{CacheError, Command, FromReply, Result, decode, decode_pairs};

use crate::channel::SharedChannel;
use crate::cursor::{self, ScanRequest};
use crate::observer::{OperationEvent, OperationObserver, Outcome};

pub use hash::HashOps;
pub use list::ListOps;
pub use set::SetOps;
pub use sorted_set::SortedSetOps;
pub use value::ValueOps;

/// Interceptor stage between the operation sets and the command channel.
///
/// Mutations are reported to the observer after the reply arrives; queries
/// pass straight through.
#[derive(Clone)]
pub struct Dispatcher {
    channel: SharedChannel,
    observer: Arc<dyn OperationObserver>,
}

impl Dispatcher {
    pub fn new(channel: SharedChannel, observer: Arc<dyn OperationObserver>) -> Self {
        Self { channel, observer }
    }

    pub const fn channel(&self) -> &SharedChannel {
        &self.channel
    }

    /// Same channel, different observer.
    #[must_use]
    pub fn with_observer(&self, observer: Arc<dyn OperationObserver>) -> Self {
        Self {
            channel: Arc::clone(&self.channel),
            observer,
        }
    }

    /// Run a read-only command.
    pub async fn query<T: FromReply>(&self, command: Command) -> Result<T> {
        let reply = self.channel.execute(command).await?;
        Ok(decode(reply)?)
    }

    /// Run a mutating command and report it as `operation` on `key`.
    pub async fn mutate<T: FromReply>(&self, operation: &str, key: &str, command: Command) -> Result<T> {
        let result = self.channel.execute(command).await;
        let outcome = match &result {
            Ok(reply) => Outcome::Applied(reply.to_string()),
            Err(err) => Outcome::Failed(err.to_string()),
        };
        self.observer.on_operation(&OperationEvent {
            operation,
            key,
            outcome: &outcome,
        });
        Ok(decode(result?)?)
    }

    /// Elements of an aggregate reply, decoded one at a time.
    pub fn stream<T>(&self, command: Command) -> BoxStream<'_, Result<T>>
    where
        T: FromReply + Send + 'static,
    {
        self.channel
            .execute_streaming(command)
            .map(|item| item.and_then(|reply| decode(reply).map_err(CacheError::from)))
            .boxed()
    }

    /// Flat `[a1, b1, a2, b2, ..]` reply as a stream of pairs.
    pub fn stream_pairs<A, B>(&self, command: Command) -> BoxStream<'_, Result<(A, B)>>
    where
        A: FromReply + Send + 'static,
        B: FromReply + Send + 'static,
    {
        stream::once(self.channel.execute(command))
            .map(|item| item.and_then(|reply| decode_pairs::<A, B>(reply).map_err(CacheError::from)))
            .map_ok(|pairs| stream::iter(pairs.into_iter().map(Ok)))
            .try_flatten()
            .boxed()
    }

    /// Cursor enumeration, decoded item by item.
    pub fn scan<T>(&self, request: ScanRequest) -> BoxStream<'static, Result<T>>
    where
        T: FromReply + Send + 'static,
    {
        cursor::scan(Arc::clone(&self.channel), request)
            .map(|item| item.and_then(|reply| decode(reply).map_err(CacheError::from)))
            .boxed()
    }

    /// `DEL key`, reported under `family.delete`.
    pub(crate) async fn delete(&self, family: &str, key: &str) -> Result<bool> {
        let removed: u64 = self
            .mutate(&format!("{family}.delete"), key, Command::new("DEL").arg(key))
            .await?;
        Ok(removed > 0)
    }
}

/// Reject an empty key list before anything is sent.
pub(crate) fn require_keys(keys: &[&str]) -> Result<()> {
    if keys.is_empty() {
        return Err(CacheError::InvalidArgument("at least one key is required".to_string()));
    }
    Ok(())
}

/// Stream yielding only `err`.
pub(crate) fn failed<'a, T: Send + 'a>(err: CacheError) -> BoxStream<'a, Result<T>> {
    stream::iter([Err(err)]).boxed()
}

/// Reject an empty argument collection before anything is sent.
pub(crate) fn require_items<T>(what: &str, items: &[T]) -> Result<()> {
    if items.is_empty() {
        return Err(CacheError::InvalidArgument(format!("at least one {what} is required")));
    }
    Ok(())
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;
    use crate::channel::MemoryChannel;
    use crate::observer::testing::RecordingObserver;
    use keyweave_domain::Reply;

    fn dispatcher() -> (Dispatcher, Arc<RecordingObserver>) {
        let observer = Arc::new(RecordingObserver::default());
        let dispatcher = Dispatcher::new(Arc::new(MemoryChannel::new()), observer.clone());
        (dispatcher, observer)
    }

    #[tokio::test]
    async fn test_mutations_are_observed() {
        let (dispatcher, observer) = dispatcher();
        let added: u64 = dispatcher
            .mutate("set.add", "s", Command::new("SADD").arg("s").arg("a"))
            .await
            .unwrap();
        assert_eq!(added, 1);

        let events = observer.events.lock().unwrap().clone();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, "set.add");
        assert_eq!(events[0].1, "s");
        assert_eq!(events[0].2, Outcome::Applied("integer(1)".to_string()));
    }

    #[tokio::test]
    async fn test_queries_are_not_observed() {
        let (dispatcher, observer) = dispatcher();
        let _: u64 = dispatcher.query(Command::new("SCARD").arg("s")).await.unwrap();
        assert!(observer.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_mutation_is_observed_and_returned() {
        let (dispatcher, observer) = dispatcher();
        let _: Reply = dispatcher
            .mutate("value.set", "k", Command::new("SET").arg("k").arg("v"))
            .await
            .unwrap();
        let err = dispatcher
            .mutate::<u64>("set.add", "k", Command::new("SADD").arg("k").arg("a"))
            .await
            .unwrap_err();

        assert!(matches!(err, CacheError::Server { ref code, .. } if code == "WRONGTYPE"));
        let events = observer.events.lock().unwrap().clone();
        assert!(matches!(events[1].2, Outcome::Failed(_)));
    }

    #[tokio::test]
    async fn test_decode_failure_is_distinct() {
        let (dispatcher, _) = dispatcher();
        let _: Reply = dispatcher
            .mutate("value.set", "k", Command::new("SET").arg("k").arg("abc"))
            .await
            .unwrap();
        let err = dispatcher
            .query::<i64>(Command::new("GET").arg("k"))
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Decode(_)));
    }

    #[test]
    fn test_empty_keys_rejected() {
        assert!(matches!(require_keys(&[]), Err(CacheError::InvalidArgument(_))));
        assert!(require_keys(&["a"]).is_ok());
        assert!(require_items::<u8>("value", &[]).is_err());
    }
}
