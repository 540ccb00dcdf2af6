//! # Cursor Iterator
//!
//! Incremental enumeration over the `SCAN` family as a lazy [`Stream`].
//!
//! ```text
//!   Start ──► Fetching ──► Emitting ──► Fetching ──► ... ──► Done
//!                 ▲            │
//!                 └────────────┘  page exhausted, cursor still live
//! ```
//!
//! Each element of a static collection is emitted exactly once. Under
//! concurrent mutation the guarantees are those of the scan primitive: an
//! element added or removed mid-scan may be seen zero, one or more times.
//!
//! Dropping the stream drops any in-flight fetch; no further page is
//! requested.
//!
//! [`Stream`]: futures::Stream

use futures::stream::{self, BoxStream, StreamExt};

use keyweave_domain::{Command, DecodeError, Reply, Result, ScanCursor, ScanOptions, decode};

use crate::channel::SharedChannel;

/// How the items of one page are grouped before emission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanShape {
    /// One element per item (`SCAN`, `SSCAN`)
    Single,
    /// Two-element arrays of field/value or member/score (`HSCAN`, `ZSCAN`)
    Pairs,
}

/// One scan enumeration: command, target key and page options
#[derive(Debug, Clone)]
pub struct ScanRequest {
    command: &'static str,
    key: Option<String>,
    options: ScanOptions,
    shape: ScanShape,
}

impl ScanRequest {
    /// Keyspace scan
    pub fn keys(options: ScanOptions) -> Self {
        Self {
            command: "SCAN",
            key: None,
            options,
            shape: ScanShape::Single,
        }
    }

    /// Field/value scan of a hash
    pub fn hash(key: impl Into<String>, options: ScanOptions) -> Self {
        Self::keyed("HSCAN", key, options, ScanShape::Pairs)
    }

    /// Member scan of a set
    pub fn set(key: impl Into<String>, options: ScanOptions) -> Self {
        Self::keyed("SSCAN", key, options, ScanShape::Single)
    }

    /// Member/score scan of a sorted set
    pub fn sorted_set(key: impl Into<String>, options: ScanOptions) -> Self {
        Self::keyed("ZSCAN", key, options, ScanShape::Pairs)
    }

    fn keyed(command: &'static str, key: impl Into<String>, options: ScanOptions, shape: ScanShape) -> Self {
        Self {
            command,
            key: Some(key.into()),
            options,
            shape,
        }
    }

    pub const fn shape(&self) -> ScanShape {
        self.shape
    }

    /// Encode the fetch of the page starting at `cursor`.
    pub fn command_at(&self, cursor: &ScanCursor) -> Command {
        let mut command = Command::new(self.command);
        if let Some(key) = &self.key {
            command = command.arg(key);
        }
        command = command.arg(cursor);
        if let Some(pattern) = &self.options.pattern {
            command = command.arg("MATCH").arg(pattern);
        }
        if let Some(count) = self.options.count {
            command = command.arg("COUNT").arg(count);
        }
        command
    }

    /// Split a `[cursor, items]` page reply.
    fn parse_page(&self, reply: Reply) -> Result<(ScanCursor, Vec<Reply>)> {
        let (cursor, items): (String, Reply) = decode(reply)?;
        let items = match self.shape {
            ScanShape::Single => items.into_items(),
            ScanShape::Pairs => {
                let shape = items.shape();
                items
                    .into_pairs()
                    .ok_or_else(|| DecodeError::new("field/value pairs", shape))?
            }
        };
        Ok((ScanCursor::new(cursor), items))
    }
}

enum ScanState {
    Start,
    Fetching(ScanCursor),
    Emitting {
        items: std::vec::IntoIter<Reply>,
        next: ScanCursor,
    },
    Done,
}

type Progress = (ScanState, SharedChannel, ScanRequest);

/// Run the state machine until it yields an item or finishes.
async fn advance((mut state, channel, request): Progress) -> Result<Option<(Reply, Progress)>> {
    loop {
        state = match state {
            ScanState::Start => ScanState::Fetching(ScanCursor::START),
            ScanState::Fetching(cursor) => {
                let reply = channel.execute(request.command_at(&cursor)).await?;
                let (next, items) = request.parse_page(reply)?;
                tracing::trace!(
                    command = request.command,
                    cursor = next.as_str(),
                    items = items.len(),
                    "Scan page fetched"
                );
                ScanState::Emitting {
                    items: items.into_iter(),
                    next,
                }
            }
            ScanState::Emitting { mut items, next } => match items.next() {
                Some(item) => {
                    return Ok(Some((item, (ScanState::Emitting { items, next }, channel, request))));
                }
                None if next.is_terminal() => ScanState::Done,
                None => ScanState::Fetching(next),
            },
            ScanState::Done => return Ok(None),
        };
    }
}

/// Enumerate every item reachable by `request`.
///
/// Nothing is fetched until the stream is first polled. A failed fetch is
/// yielded as the final element.
pub fn scan(channel: SharedChannel, request: ScanRequest) -> BoxStream<'static, Result<Reply>> {
    stream::try_unfold((ScanState::Start, channel, request), advance).boxed()
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use futures::TryStreamExt;

    use super::*;
    use crate::channel::{CommandChannel, MemoryChannel};

    /// Counts the commands reaching the wrapped channel.
    struct Counting {
        inner: MemoryChannel,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CommandChannel for Counting {
        async fn execute(&self, command: Command) -> Result<Reply> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.execute(command).await
        }
    }

    async fn seeded(members: usize) -> Arc<Counting> {
        let inner = MemoryChannel::new();
        if members > 0 {
            inner
                .execute(Command::new("SADD").arg("s").args((0..members).map(|i| format!("m{i}"))))
                .await
                .unwrap();
        }
        Arc::new(Counting {
            inner,
            calls: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn test_scan_visits_each_member_once() {
        let channel = seeded(57).await;
        let request = ScanRequest::set("s", ScanOptions::default().count(10));

        let items: Vec<String> = scan(channel.clone(), request)
            .map_ok(|r| decode::<String>(r).unwrap())
            .try_collect()
            .await
            .unwrap();

        let unique: HashSet<&String> = items.iter().collect();
        assert_eq!(items.len(), 57);
        assert_eq!(unique.len(), 57);
        assert_eq!(channel.calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_empty_pages_are_skipped() {
        let channel = seeded(30).await;
        // Only one member matches; the pages around it come back empty.
        let request = ScanRequest::set("s", ScanOptions::default().matching("m29").count(5));

        let items: Vec<Reply> = scan(channel.clone(), request).try_collect().await.unwrap();
        assert_eq!(items, vec![Reply::from("m29")]);
        assert_eq!(channel.calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_missing_key_terminates() {
        let channel = seeded(0).await;
        let items: Vec<Reply> = scan(channel.clone(), ScanRequest::hash("nope", ScanOptions::default()))
            .try_collect()
            .await
            .unwrap();
        assert!(items.is_empty());
        assert_eq!(channel.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dropping_stops_fetching() {
        let channel = seeded(40).await;
        let mut stream = scan(channel.clone(), ScanRequest::set("s", ScanOptions::default().count(10)));
        assert_eq!(channel.calls.load(Ordering::SeqCst), 0);

        let first = stream.next().await;
        assert!(matches!(first, Some(Ok(_))));
        drop(stream);

        assert_eq!(channel.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_pairs_are_regrouped() {
        let channel = seeded(0).await;
        channel
            .execute(Command::new("HSET").arg("h").args(["a", "1", "b", "2"]))
            .await
            .unwrap();
        let items: Vec<(String, i64)> = scan(channel.clone(), ScanRequest::hash("h", ScanOptions::default()))
            .map_ok(|r| decode(r).unwrap())
            .try_collect()
            .await
            .unwrap();
        assert_eq!(items, vec![("a".to_string(), 1), ("b".to_string(), 2)]);
    }

    #[test]
    fn test_command_encoding() {
        let request = ScanRequest::sorted_set("lb", ScanOptions::default().matching("a*").count(50));
        let command = request.command_at(&ScanCursor::new("17"));
        assert_eq!(format!("{command:?}"), "ZSCAN lb 17 MATCH a* COUNT 50");
    }
}
