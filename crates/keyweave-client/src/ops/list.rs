//! List operations

use std::time::Duration;

use futures::stream::BoxStream;

use keyweave_domain::{CacheError, Command, End, FromReply, Position, Reply, Result, ToArg, decode};

use super::{Dispatcher, require_items};

const fn push_command(end: End) -> &'static str {
    match end {
        End::Left => "LPUSH",
        End::Right => "RPUSH",
    }
}

/// Operations on list keys
#[derive(Clone)]
pub struct ListOps {
    dispatcher: Dispatcher,
}

impl ListOps {
    pub(crate) const fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    /// Elements between `start` and `end` inclusive; negative indexes count
    /// from the tail.
    pub fn range<T: FromReply + Send + 'static>(&self, key: &str, start: i64, end: i64) -> BoxStream<'_, Result<T>> {
        self.dispatcher
            .stream(Command::new("LRANGE").arg(key).arg(start).arg(end))
    }

    /// Keep only the elements between `start` and `end` inclusive.
    pub async fn trim(&self, key: &str, start: i64, end: i64) -> Result<()> {
        self.dispatcher
            .mutate("list.trim", key, Command::new("LTRIM").arg(key).arg(start).arg(end))
            .await
    }

    pub async fn len(&self, key: &str) -> Result<u64> {
        self.dispatcher.query(Command::new("LLEN").arg(key)).await
    }

    /// Push one value, returning the resulting length.
    pub async fn push(&self, key: &str, end: End, value: impl ToArg) -> Result<u64> {
        self.dispatcher
            .mutate("list.push", key, Command::new(push_command(end)).arg(key).arg(value))
            .await
    }

    /// Push every value in order, returning the resulting length.
    ///
    /// Pushing to the left reverses the order of `values` in the list, as
    /// repeated single pushes would.
    pub async fn push_all<V: ToArg>(&self, key: &str, end: End, values: &[V]) -> Result<u64> {
        require_items("value", values)?;
        self.dispatcher
            .mutate("list.push_all", key, Command::new(push_command(end)).arg(key).args(values))
            .await
    }

    /// Push only when the list already exists; `0` otherwise.
    pub async fn push_if_present(&self, key: &str, end: End, value: impl ToArg) -> Result<u64> {
        let command = match end {
            End::Left => "LPUSHX",
            End::Right => "RPUSHX",
        };
        self.dispatcher
            .mutate("list.push_if_present", key, Command::new(command).arg(key).arg(value))
            .await
    }

    /// Insert next to the first occurrence of `pivot`.
    ///
    /// Returns the resulting length, `-1` when the pivot is absent, or `0`
    /// when the list does not exist.
    pub async fn insert(&self, key: &str, position: Position, pivot: impl ToArg, value: impl ToArg) -> Result<i64> {
        self.dispatcher
            .mutate(
                "list.insert",
                key,
                Command::new("LINSERT")
                    .arg(key)
                    .arg(position.as_str())
                    .arg(pivot)
                    .arg(value),
            )
            .await
    }

    /// Overwrite the element at `index`.
    ///
    /// Fails with [`CacheError::OutOfRange`] beyond the current length or on
    /// a missing key.
    pub async fn set(&self, key: &str, index: i64, value: impl ToArg) -> Result<()> {
        self.dispatcher
            .mutate::<()>("list.set", key, Command::new("LSET").arg(key).arg(index).arg(value))
            .await
            .map_err(|err| {
                if err.is_out_of_range_reply() {
                    CacheError::OutOfRange {
                        key: key.to_string(),
                        index,
                    }
                } else {
                    err
                }
            })
    }

    /// Remove up to `count` occurrences of `value`: from the head when
    /// positive, from the tail when negative, all of them when zero.
    pub async fn remove(&self, key: &str, count: i64, value: impl ToArg) -> Result<u64> {
        self.dispatcher
            .mutate("list.remove", key, Command::new("LREM").arg(key).arg(count).arg(value))
            .await
    }

    /// Element at `index`; [`CacheError::OutOfRange`] beyond the current
    /// length.
    pub async fn index<T: FromReply>(&self, key: &str, index: i64) -> Result<T> {
        let reply: Reply = self
            .dispatcher
            .query(Command::new("LINDEX").arg(key).arg(index))
            .await?;
        if reply.is_nil() {
            return Err(CacheError::OutOfRange {
                key: key.to_string(),
                index,
            });
        }
        Ok(decode(reply)?)
    }

    /// Position of the first occurrence of `value`.
    pub async fn index_of(&self, key: &str, value: impl ToArg) -> Result<Option<u64>> {
        self.dispatcher
            .query(Command::new("LPOS").arg(key).arg(value))
            .await
    }

    /// Position of the last occurrence of `value`.
    pub async fn last_index_of(&self, key: &str, value: impl ToArg) -> Result<Option<u64>> {
        self.dispatcher
            .query(Command::new("LPOS").arg(key).arg(value).arg("RANK").arg(-1))
            .await
    }

    pub async fn pop<T: FromReply>(&self, key: &str, end: End) -> Result<Option<T>> {
        let command = match end {
            End::Left => "LPOP",
            End::Right => "RPOP",
        };
        self.dispatcher
            .mutate("list.pop", key, Command::new(command).arg(key))
            .await
    }

    /// Pop, waiting up to `timeout` for an element. `Ok(None)` once the
    /// wait expires; a zero timeout waits indefinitely.
    pub async fn blocking_pop<T: FromReply>(&self, key: &str, end: End, timeout: Duration) -> Result<Option<T>> {
        let command = match end {
            End::Left => "BLPOP",
            End::Right => "BRPOP",
        };
        let popped: Option<(String, T)> = self
            .dispatcher
            .mutate("list.blocking_pop", key, Command::new(command).arg(key).block_for(timeout))
            .await?;
        Ok(popped.map(|(_, value)| value))
    }

    /// Atomically pop from one end of `source` and push to one end of
    /// `destination`.
    pub async fn move_element<T: FromReply>(
        &self,
        source: &str,
        from: End,
        destination: &str,
        to: End,
    ) -> Result<Option<T>> {
        self.dispatcher
            .mutate(
                "list.move",
                source,
                Command::new("LMOVE")
                    .arg(source)
                    .arg(destination)
                    .arg(from.as_str())
                    .arg(to.as_str()),
            )
            .await
    }

    pub async fn blocking_move<T: FromReply>(
        &self,
        source: &str,
        from: End,
        destination: &str,
        to: End,
        timeout: Duration,
    ) -> Result<Option<T>> {
        self.dispatcher
            .mutate(
                "list.blocking_move",
                source,
                Command::new("BLMOVE")
                    .arg(source)
                    .arg(destination)
                    .arg(from.as_str())
                    .arg(to.as_str())
                    .block_for(timeout),
            )
            .await
    }

    /// Pop the tail of `source` and push it onto the head of `destination`.
    pub async fn pop_and_push<T: FromReply>(&self, source: &str, destination: &str) -> Result<Option<T>> {
        self.move_element(source, End::Right, destination, End::Left).await
    }

    pub async fn blocking_pop_and_push<T: FromReply>(
        &self,
        source: &str,
        destination: &str,
        timeout: Duration,
    ) -> Result<Option<T>> {
        self.blocking_move(source, End::Right, destination, End::Left, timeout)
            .await
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.dispatcher.delete("list", key).await
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use std::time::Duration;

    use futures::TryStreamExt;
    use tokio::time::Instant;

    use super::*;
    use crate::CacheClient;

    async fn collect(list: &ListOps, key: &str) -> Vec<String> {
        list.range(key, 0, -1).try_collect().await.unwrap()
    }

    #[tokio::test]
    async fn test_push_and_pop_both_ends() {
        let list = CacheClient::in_memory().list();
        assert_eq!(list.push("l", End::Right, "b").await.unwrap(), 1);
        assert_eq!(list.push("l", End::Left, "a").await.unwrap(), 2);
        assert_eq!(list.push("l", End::Right, "c").await.unwrap(), 3);
        assert_eq!(collect(&list, "l").await, vec!["a", "b", "c"]);

        assert_eq!(list.pop::<String>("l", End::Left).await.unwrap(), Some("a".into()));
        assert_eq!(list.pop::<String>("l", End::Right).await.unwrap(), Some("c".into()));
        assert_eq!(list.len("l").await.unwrap(), 1);
        assert_eq!(list.pop::<String>("empty", End::Left).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_push_all_matches_variadic_push() {
        let list = CacheClient::in_memory().list();
        assert_eq!(list.push_all("l", End::Right, &["a", "b", "c"]).await.unwrap(), 3);
        assert_eq!(list.push_all("l", End::Left, &["x", "y"]).await.unwrap(), 5);
        assert_eq!(collect(&list, "l").await, vec!["y", "x", "a", "b", "c"]);

        let err = list.push_all::<&str>("l", End::Right, &[]).await.unwrap_err();
        assert!(matches!(err, CacheError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_push_if_present() {
        let list = CacheClient::in_memory().list();
        assert_eq!(list.push_if_present("l", End::Right, "a").await.unwrap(), 0);
        assert_eq!(list.len("l").await.unwrap(), 0);
        list.push("l", End::Right, "a").await.unwrap();
        assert_eq!(list.push_if_present("l", End::Right, "b").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_index_and_set_out_of_range() {
        let list = CacheClient::in_memory().list();
        list.push_all("l", End::Right, &[10, 20, 30]).await.unwrap();

        assert_eq!(list.index::<i64>("l", 1).await.unwrap(), 20);
        assert_eq!(list.index::<i64>("l", -1).await.unwrap(), 30);
        let err = list.index::<i64>("l", 3).await.unwrap_err();
        assert!(matches!(err, CacheError::OutOfRange { index: 3, .. }));

        list.set("l", 0, 11).await.unwrap();
        assert_eq!(list.index::<i64>("l", 0).await.unwrap(), 11);
        let err = list.set("l", 5, 0).await.unwrap_err();
        assert!(matches!(err, CacheError::OutOfRange { index: 5, .. }));
        let err = list.set("missing", 0, 0).await.unwrap_err();
        assert!(matches!(err, CacheError::OutOfRange { .. }));
    }

    #[tokio::test]
    async fn test_insert_remove_and_positions() {
        let list = CacheClient::in_memory().list();
        list.push_all("l", End::Right, &["a", "b", "a", "c", "a"]).await.unwrap();

        assert_eq!(list.index_of("l", "a").await.unwrap(), Some(0));
        assert_eq!(list.last_index_of("l", "a").await.unwrap(), Some(4));
        assert_eq!(list.index_of("l", "zz").await.unwrap(), None);

        assert_eq!(list.insert("l", Position::After, "b", "b2").await.unwrap(), 6);
        assert_eq!(list.insert("l", Position::Before, "nope", "x").await.unwrap(), -1);

        assert_eq!(list.remove("l", -1, "a").await.unwrap(), 1);
        assert_eq!(collect(&list, "l").await, vec!["a", "b", "b2", "a", "c"]);
        assert_eq!(list.remove("l", 0, "a").await.unwrap(), 2);

        list.trim("l", 0, 1).await.unwrap();
        assert_eq!(collect(&list, "l").await, vec!["b", "b2"]);
    }

    #[tokio::test]
    async fn test_move_between_lists() {
        let list = CacheClient::in_memory().list();
        list.push_all("src", End::Right, &["1", "2", "3"]).await.unwrap();

        let moved: Option<String> = list.pop_and_push("src", "dst").await.unwrap();
        assert_eq!(moved.as_deref(), Some("3"));
        let moved: Option<String> = list.move_element("src", End::Left, "dst", End::Right).await.unwrap();
        assert_eq!(moved.as_deref(), Some("1"));

        assert_eq!(collect(&list, "src").await, vec!["2"]);
        assert_eq!(collect(&list, "dst").await, vec!["3", "1"]);
        assert_eq!(list.pop_and_push::<String>("empty", "dst").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocking_pop_times_out_empty() {
        let list = CacheClient::in_memory().list();
        let timeout = Duration::from_secs(2);

        let started = Instant::now();
        let popped: Option<String> = list.blocking_pop("jobs", End::Left, timeout).await.unwrap();
        assert_eq!(popped, None);
        assert!(started.elapsed() <= timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_waits_indefinitely() {
        let list = CacheClient::in_memory().list();
        let waiter = {
            let list = list.clone();
            tokio::spawn(async move { list.blocking_pop::<String>("jobs", End::Left, Duration::ZERO).await })
        };
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert!(!waiter.is_finished());

        tokio_test::assert_ok!(list.push("jobs", End::Right, "late").await);
        let popped = tokio_test::assert_ok!(waiter.await.unwrap());
        assert_eq!(popped, Some("late".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocking_pop_and_push_wakes_on_push() {
        let client = CacheClient::in_memory();
        let list = client.list();
        let waiter = {
            let list = list.clone();
            tokio::spawn(async move {
                list.blocking_pop_and_push::<String>("in", "out", Duration::from_secs(30))
                    .await
            })
        };
        tokio::task::yield_now().await;
        list.push("in", End::Right, "job-1").await.unwrap();

        assert_eq!(waiter.await.unwrap().unwrap(), Some("job-1".to_string()));
        assert_eq!(collect(&list, "out").await, vec!["job-1"]);
    }

    #[tokio::test]
    async fn test_blocking_pop_returns_available_element() {
        let list = CacheClient::in_memory().list();
        list.push("jobs", End::Right, "j").await.unwrap();
        let popped: Option<String> = list
            .blocking_pop("jobs", End::Right, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(popped.as_deref(), Some("j"));
    }
}
