//! # Command Channel
//!
//! Boundary to the transport: one encoded command in, exactly one reply or a
//! lazy sequence of reply elements out. Implementations must preserve
//! issuance order on a single logical connection and must surface, never
//! swallow, I/O failures.

#[cfg(feature = "memory")]
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis_channel;

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};

use keyweave_domain::{Command, Reply, Result};

#[cfg(feature = "memory")]
pub use memory::MemoryChannel;
#[cfg(feature = "redis")]
pub use redis_channel::RedisChannel;

/// Transport boundary used by every operation set
#[async_trait]
pub trait CommandChannel: Send + Sync {
    /// Send one command and wait for its reply. A command failing
    /// [`Command::check`] is rejected without being sent.
    async fn execute(&self, command: Command) -> Result<Reply>;

    /// Send one command and yield the elements of its aggregate reply.
    ///
    /// Nothing is sent until the stream is first polled. A `Nil` reply is an
    /// empty sequence.
    fn execute_streaming(&self, command: Command) -> BoxStream<'_, Result<Reply>> {
        stream::once(self.execute(command))
            .map_ok(|reply| stream::iter(reply.into_items().into_iter().map(Ok)))
            .try_flatten()
            .boxed()
    }
}

/// Shared channel handle
pub type SharedChannel = Arc<dyn CommandChannel>;

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_streaming_flattens_array() {
        let channel = MemoryChannel::new();
        channel
            .execute(Command::new("RPUSH").arg("l").args(["a", "b", "c"]))
            .await
            .unwrap();

        let items: Vec<Reply> = channel
            .execute_streaming(Command::new("LRANGE").arg("l").arg(0).arg(-1))
            .try_collect()
            .await
            .unwrap();
        assert_eq!(items, vec![Reply::from("a"), Reply::from("b"), Reply::from("c")]);
    }

    #[tokio::test]
    async fn test_streaming_nil_is_empty() {
        let channel = MemoryChannel::new();
        let items: Vec<Reply> = channel
            .execute_streaming(Command::new("LPOP").arg("missing"))
            .try_collect()
            .await
            .unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn test_streaming_is_lazy() {
        let channel = MemoryChannel::new();
        let pending = channel.execute_streaming(Command::new("RPUSH").arg("l").arg("x"));
        drop(pending);
        let len: Reply = channel.execute(Command::new("LLEN").arg("l")).await.unwrap();
        assert_eq!(len, Reply::Integer(0));
    }
}
