//! Plain value operations
//!
//! String keys holding a single encoded value, counters, byte ranges and
//! bits. Also the building block of [`crate::lock::DistributedLock`].

use std::time::Duration;

use keyweave_domain::{CacheError, Command, FromReply, Result, ToArg};

use super::{Dispatcher, require_items, require_keys};

/// Lease length in whole milliseconds; a zero lease is rejected.
fn ttl_millis(ttl: Duration) -> Result<u64> {
    let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
    if millis == 0 {
        return Err(CacheError::InvalidArgument(format!("ttl {ttl:?} is below one millisecond")));
    }
    Ok(millis)
}

fn with_ttl(command: Command, ttl: Option<Duration>) -> Result<Command> {
    match ttl {
        Some(ttl) => Ok(command.arg("PX").arg(ttl_millis(ttl)?)),
        None => Ok(command),
    }
}

/// Operations on plain value keys
#[derive(Clone)]
pub struct ValueOps {
    dispatcher: Dispatcher,
}

impl ValueOps {
    pub(crate) const fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    // =========================================================================
    // WRITES
    // =========================================================================

    pub async fn set(&self, key: &str, value: impl ToArg) -> Result<()> {
        self.dispatcher
            .mutate("value.set", key, Command::new("SET").arg(key).arg(value))
            .await
    }

    /// Set `value`, letting the store drop it after `ttl`.
    pub async fn set_with_ttl(&self, key: &str, value: impl ToArg, ttl: Duration) -> Result<()> {
        let command = with_ttl(Command::new("SET").arg(key).arg(value), Some(ttl))?;
        self.dispatcher.mutate("value.set_with_ttl", key, command).await
    }

    /// Set only when `key` does not exist; `true` when written.
    pub async fn set_if_absent(&self, key: &str, value: impl ToArg, ttl: Option<Duration>) -> Result<bool> {
        let command = with_ttl(Command::new("SET").arg(key).arg(value).arg("NX"), ttl)?;
        let written: Option<()> = self.dispatcher.mutate("value.set_if_absent", key, command).await?;
        Ok(written.is_some())
    }

    /// Set only when `key` already exists; `true` when written.
    pub async fn set_if_present(&self, key: &str, value: impl ToArg, ttl: Option<Duration>) -> Result<bool> {
        let command = with_ttl(Command::new("SET").arg(key).arg(value).arg("XX"), ttl)?;
        let written: Option<()> = self.dispatcher.mutate("value.set_if_present", key, command).await?;
        Ok(written.is_some())
    }

    /// Set every entry in one command.
    pub async fn multi_set<V: ToArg>(&self, entries: &[(&str, V)]) -> Result<()> {
        require_items("entry", entries)?;
        let command = entries
            .iter()
            .fold(Command::new("MSET"), |command, (key, value)| command.arg(*key).arg(value));
        self.dispatcher.mutate("value.multi_set", entries[0].0, command).await
    }

    /// Set every entry only when none of the keys exist; all or nothing.
    pub async fn multi_set_if_absent<V: ToArg>(&self, entries: &[(&str, V)]) -> Result<bool> {
        require_items("entry", entries)?;
        let command = entries
            .iter()
            .fold(Command::new("MSETNX"), |command, (key, value)| command.arg(*key).arg(value));
        self.dispatcher
            .mutate("value.multi_set_if_absent", entries[0].0, command)
            .await
    }

    // =========================================================================
    // READS
    // =========================================================================

    pub async fn get<T: FromReply>(&self, key: &str) -> Result<Option<T>> {
        self.dispatcher.query(Command::new("GET").arg(key)).await
    }

    pub async fn get_and_delete<T: FromReply>(&self, key: &str) -> Result<Option<T>> {
        self.dispatcher
            .mutate("value.get_and_delete", key, Command::new("GETDEL").arg(key))
            .await
    }

    /// Read the value and reset its lease to `ttl`.
    pub async fn get_and_expire<T: FromReply>(&self, key: &str, ttl: Duration) -> Result<Option<T>> {
        let command = with_ttl(Command::new("GETEX").arg(key), Some(ttl))?;
        self.dispatcher.mutate("value.get_and_expire", key, command).await
    }

    /// Read the value and clear any lease.
    pub async fn get_and_persist<T: FromReply>(&self, key: &str) -> Result<Option<T>> {
        self.dispatcher
            .mutate(
                "value.get_and_persist",
                key,
                Command::new("GETEX").arg(key).arg("PERSIST"),
            )
            .await
    }

    /// Replace the value, returning the previous one.
    pub async fn get_and_set<T: FromReply>(&self, key: &str, value: impl ToArg) -> Result<Option<T>> {
        self.dispatcher
            .mutate("value.get_and_set", key, Command::new("GETSET").arg(key).arg(value))
            .await
    }

    /// One entry per key, in request order.
    pub async fn multi_get<T: FromReply>(&self, keys: &[&str]) -> Result<Vec<Option<T>>> {
        require_keys(keys)?;
        self.dispatcher.query(Command::new("MGET").args(keys)).await
    }

    // =========================================================================
    // COUNTERS
    // =========================================================================

    pub async fn increment(&self, key: &str, delta: i64) -> Result<i64> {
        self.dispatcher
            .mutate("value.increment", key, Command::new("INCRBY").arg(key).arg(delta))
            .await
    }

    pub async fn increment_float(&self, key: &str, delta: f64) -> Result<f64> {
        self.dispatcher
            .mutate(
                "value.increment_float",
                key,
                Command::new("INCRBYFLOAT").arg(key).arg(delta),
            )
            .await
    }

    pub async fn decrement(&self, key: &str, delta: i64) -> Result<i64> {
        self.dispatcher
            .mutate("value.decrement", key, Command::new("DECRBY").arg(key).arg(delta))
            .await
    }

    // =========================================================================
    // BYTES AND BITS
    // =========================================================================

    /// Append to the stored value, returning the new length.
    pub async fn append(&self, key: &str, value: impl ToArg) -> Result<u64> {
        self.dispatcher
            .mutate("value.append", key, Command::new("APPEND").arg(key).arg(value))
            .await
    }

    /// Bytes `start..=end` of the value; negative offsets count from the end.
    pub async fn get_range<T: FromReply>(&self, key: &str, start: i64, end: i64) -> Result<T> {
        self.dispatcher
            .query(Command::new("GETRANGE").arg(key).arg(start).arg(end))
            .await
    }

    /// Overwrite bytes from `offset`, zero-padding as needed.
    pub async fn set_range(&self, key: &str, offset: usize, value: impl ToArg) -> Result<u64> {
        self.dispatcher
            .mutate(
                "value.set_range",
                key,
                Command::new("SETRANGE").arg(key).arg(offset).arg(value),
            )
            .await
    }

    pub async fn len(&self, key: &str) -> Result<u64> {
        self.dispatcher.query(Command::new("STRLEN").arg(key)).await
    }

    /// Set one bit, returning its previous state.
    pub async fn set_bit(&self, key: &str, offset: usize, bit: bool) -> Result<bool> {
        self.dispatcher
            .mutate(
                "value.set_bit",
                key,
                Command::new("SETBIT").arg(key).arg(offset).arg(bit),
            )
            .await
    }

    pub async fn get_bit(&self, key: &str, offset: usize) -> Result<bool> {
        self.dispatcher
            .query(Command::new("GETBIT").arg(key).arg(offset))
            .await
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.dispatcher.delete("value", key).await
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use std::time::Duration;

    use std::collections::HashMap;

    use fake::{Fake, Faker};
    use serde::{Deserialize, Serialize};
    use tokio_test::{assert_err, assert_ok};

    use keyweave_domain::{CacheError, Json};

    use crate::CacheClient;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Session {
        user: String,
        hops: u16,
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let value = CacheClient::in_memory().value();
        let text: String = Faker.fake();
        value.set("k", &text).await.unwrap();
        assert_eq!(value.get::<String>("k").await.unwrap(), Some(text));
        assert_eq!(value.get::<String>("missing").await.unwrap(), None);

        let session = Session {
            user: Faker.fake(),
            hops: Faker.fake(),
        };
        value.set("s", Json(&session)).await.unwrap();
        let stored: Json<Session> = value.get("s").await.unwrap().unwrap();
        assert_eq!(stored.into_inner(), session);
    }

    #[tokio::test]
    async fn test_conditional_sets() {
        let value = CacheClient::in_memory().value();
        assert!(!value.set_if_present("k", "a", None).await.unwrap());
        assert!(value.set_if_absent("k", "a", None).await.unwrap());
        assert!(!value.set_if_absent("k", "b", None).await.unwrap());
        assert!(value.set_if_present("k", "c", None).await.unwrap());
        assert_eq!(value.get::<String>("k").await.unwrap(), Some("c".into()));

        let err = value.set_if_absent("z", "a", Some(Duration::ZERO)).await.unwrap_err();
        assert!(matches!(err, CacheError::InvalidArgument(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let value = CacheClient::in_memory().value();
        value.set_with_ttl("k", "v", Duration::from_secs(1)).await.unwrap();
        value.set("kept", "v").await.unwrap();
        assert_eq!(
            value.get_and_expire::<String>("kept", Duration::from_secs(2)).await.unwrap(),
            Some("v".into())
        );

        tokio::time::advance(Duration::from_millis(1_500)).await;
        assert_eq!(value.get::<String>("k").await.unwrap(), None);
        assert_eq!(value.get_and_persist::<String>("kept").await.unwrap(), Some("v".into()));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(value.get::<String>("kept").await.unwrap(), Some("v".into()));
    }

    #[tokio::test]
    async fn test_get_and_mutate() {
        let value = CacheClient::in_memory().value();
        assert_eq!(value.get_and_set::<String>("k", "a").await.unwrap(), None);
        assert_eq!(value.get_and_set::<String>("k", "b").await.unwrap(), Some("a".into()));
        assert_eq!(value.get_and_delete::<String>("k").await.unwrap(), Some("b".into()));
        assert!(!value.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_multi_key() {
        let value = CacheClient::in_memory().value();
        value.multi_set(&[("a", 1), ("b", 2)]).await.unwrap();
        assert!(!value.multi_set_if_absent(&[("b", 3), ("c", 3)]).await.unwrap());
        assert_eq!(
            value.multi_get::<i64>(&["a", "b", "c"]).await.unwrap(),
            vec![Some(1), Some(2), None]
        );
        assert!(value.multi_set_if_absent(&[("c", 3), ("d", 4)]).await.unwrap());
        assert!(value.multi_set::<i64>(&[]).await.is_err());
    }

    #[tokio::test]
    async fn test_counters() {
        let value = CacheClient::in_memory().value();
        assert_eq!(value.increment("n", 10).await.unwrap(), 10);
        assert_eq!(value.decrement("n", 3).await.unwrap(), 7);
        assert!((value.increment_float("f", 0.5).await.unwrap() - 0.5).abs() < f64::EPSILON);

        value.set("text", "abc").await.unwrap();
        assert!(matches!(
            value.increment("text", 1).await,
            Err(CacheError::Server { .. })
        ));
    }

    #[tokio::test]
    async fn test_ranges_and_bits() {
        let value = CacheClient::in_memory().value();
        assert_eq!(value.append("k", "Hello").await.unwrap(), 5);
        assert_eq!(value.append("k", " World").await.unwrap(), 11);
        assert_eq!(value.get_range::<String>("k", 0, 4).await.unwrap(), "Hello");
        assert_eq!(value.get_range::<String>("k", -5, -1).await.unwrap(), "World");
        assert_eq!(value.set_range("k", 6, "Redis").await.unwrap(), 11);
        assert_eq!(value.get::<String>("k").await.unwrap(), Some("Hello Redis".into()));
        assert_eq!(value.len("k").await.unwrap(), 11);

        assert!(!value.set_bit("bits", 7, true).await.unwrap());
        assert!(value.get_bit("bits", 7).await.unwrap());
        assert!(!value.get_bit("bits", 100).await.unwrap());
        assert_eq!(value.get::<Vec<u8>>("bits").await.unwrap(), Some(vec![1]));
    }

    #[tokio::test]
    async fn test_unserializable_json_is_rejected_before_write() {
        let value = CacheClient::in_memory().value();
        let by_cell: HashMap<(u8, u8), u32> = HashMap::from([((0, 1), 5)]);

        let err = assert_err!(value.set("grid", Json(&by_cell)).await);
        assert!(matches!(err, CacheError::InvalidArgument(ref m) if m.contains("json")));
        assert_eq!(assert_ok!(value.get::<Vec<u8>>("grid").await), None);

        assert_err!(value.multi_set(&[("a", Json(&by_cell))]).await);
        assert_eq!(assert_ok!(value.multi_get::<String>(&["a"]).await), vec![None]);
    }
}
