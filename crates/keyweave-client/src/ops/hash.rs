//! Hash operations

use futures::stream::BoxStream;

use keyweave_domain::{Command, FromReply, Result, ScanOptions, ToArg, decode_pairs};

use super::{Dispatcher, require_items};
use crate::cursor::ScanRequest;

/// Operations on hash keys
#[derive(Clone)]
pub struct HashOps {
    dispatcher: Dispatcher,
}

impl HashOps {
    pub(crate) const fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    /// Remove `fields`, returning how many existed.
    pub async fn delete_fields<F: ToArg>(&self, key: &str, fields: &[F]) -> Result<u64> {
        require_items("field", fields)?;
        self.dispatcher
            .mutate("hash.delete_fields", key, Command::new("HDEL").arg(key).args(fields))
            .await
    }

    pub async fn has_field(&self, key: &str, field: impl ToArg) -> Result<bool> {
        self.dispatcher
            .query(Command::new("HEXISTS").arg(key).arg(field))
            .await
    }

    pub async fn get<T: FromReply>(&self, key: &str, field: impl ToArg) -> Result<Option<T>> {
        self.dispatcher
            .query(Command::new("HGET").arg(key).arg(field))
            .await
    }

    /// One entry per requested field, in request order; `None` marks a
    /// missing field.
    pub async fn multi_get<T: FromReply, F: ToArg>(&self, key: &str, fields: &[F]) -> Result<Vec<Option<T>>> {
        require_items("field", fields)?;
        self.dispatcher
            .query(Command::new("HMGET").arg(key).args(fields))
            .await
    }

    /// Add `delta` to an integer field, creating it at zero.
    ///
    /// Fails with a server error when the field holds non-integer text.
    pub async fn increment(&self, key: &str, field: impl ToArg, delta: i64) -> Result<i64> {
        self.dispatcher
            .mutate("hash.increment", key, Command::new("HINCRBY").arg(key).arg(field).arg(delta))
            .await
    }

    pub async fn increment_float(&self, key: &str, field: impl ToArg, delta: f64) -> Result<f64> {
        self.dispatcher
            .mutate(
                "hash.increment_float",
                key,
                Command::new("HINCRBYFLOAT").arg(key).arg(field).arg(delta),
            )
            .await
    }

    pub async fn random_field<T: FromReply>(&self, key: &str) -> Result<Option<T>> {
        self.dispatcher
            .query(Command::new("HRANDFIELD").arg(key))
            .await
    }

    pub async fn random_entry<K: FromReply, V: FromReply>(&self, key: &str) -> Result<Option<(K, V)>> {
        let mut entries = self.random_entries(key, 1).await?;
        Ok(entries.pop())
    }

    /// Random fields; a positive `count` yields distinct fields, a negative
    /// one allows repeats.
    pub async fn random_fields<T: FromReply>(&self, key: &str, count: i64) -> Result<Vec<T>> {
        self.dispatcher
            .query(Command::new("HRANDFIELD").arg(key).arg(count))
            .await
    }

    pub async fn random_entries<K: FromReply, V: FromReply>(&self, key: &str, count: i64) -> Result<Vec<(K, V)>> {
        let reply = self
            .dispatcher
            .query(Command::new("HRANDFIELD").arg(key).arg(count).arg("WITHVALUES"))
            .await?;
        Ok(decode_pairs(reply)?)
    }

    pub fn fields<T: FromReply + Send + 'static>(&self, key: &str) -> BoxStream<'_, Result<T>> {
        self.dispatcher.stream(Command::new("HKEYS").arg(key))
    }

    pub async fn len(&self, key: &str) -> Result<u64> {
        self.dispatcher.query(Command::new("HLEN").arg(key)).await
    }

    /// Set every field of `entries` in one command.
    pub async fn put_all<F: ToArg, V: ToArg>(&self, key: &str, entries: &[(F, V)]) -> Result<()> {
        require_items("entry", entries)?;
        let command = entries
            .iter()
            .fold(Command::new("HSET").arg(key), |command, (field, value)| command.arg(field).arg(value));
        let _: u64 = self.dispatcher.mutate("hash.put_all", key, command).await?;
        Ok(())
    }

    /// Set one field; `true` when the field was newly created.
    pub async fn put(&self, key: &str, field: impl ToArg, value: impl ToArg) -> Result<bool> {
        self.dispatcher
            .mutate("hash.put", key, Command::new("HSET").arg(key).arg(field).arg(value))
            .await
    }

    pub async fn put_if_absent(&self, key: &str, field: impl ToArg, value: impl ToArg) -> Result<bool> {
        self.dispatcher
            .mutate(
                "hash.put_if_absent",
                key,
                Command::new("HSETNX").arg(key).arg(field).arg(value),
            )
            .await
    }

    pub fn values<T: FromReply + Send + 'static>(&self, key: &str) -> BoxStream<'_, Result<T>> {
        self.dispatcher.stream(Command::new("HVALS").arg(key))
    }

    pub fn entries<K, V>(&self, key: &str) -> BoxStream<'_, Result<(K, V)>>
    where
        K: FromReply + Send + 'static,
        V: FromReply + Send + 'static,
    {
        self.dispatcher.stream_pairs(Command::new("HGETALL").arg(key))
    }

    /// Incremental field/value enumeration.
    pub fn scan<K, V>(&self, key: &str, options: ScanOptions) -> BoxStream<'static, Result<(K, V)>>
    where
        K: FromReply + Send + 'static,
        V: FromReply + Send + 'static,
    {
        self.dispatcher.scan(ScanRequest::hash(key, options))
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.dispatcher.delete("hash", key).await
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use std::collections::HashMap;

    use fake::{Fake, Faker};
    use futures::TryStreamExt;
    use serde::{Deserialize, Serialize};

    use keyweave_domain::{CacheError, Json};

    use crate::CacheClient;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Waypoint {
        name: String,
        altitude: u32,
        tags: Vec<String>,
    }

    #[tokio::test]
    async fn test_field_presence() {
        let hash = CacheClient::in_memory().hash();
        let field: String = Faker.fake();
        assert!(!hash.has_field("h", &field).await.unwrap());
        hash.put("h", &field, "v").await.unwrap();
        assert!(hash.has_field("h", &field).await.unwrap());
    }

    #[tokio::test]
    async fn test_round_trip_value_shapes() {
        let hash = CacheClient::in_memory().hash();
        let text: String = Faker.fake();
        let number: i64 = Faker.fake();
        let waypoint = Waypoint {
            name: Faker.fake(),
            altitude: Faker.fake(),
            tags: vec![Faker.fake(), Faker.fake()],
        };

        hash.put("h", "text", &text).await.unwrap();
        hash.put("h", "number", number).await.unwrap();
        hash.put("h", "float", 2.5).await.unwrap();
        hash.put("h", "json", Json(&waypoint)).await.unwrap();

        assert_eq!(hash.get::<String>("h", "text").await.unwrap(), Some(text));
        assert_eq!(hash.get::<i64>("h", "number").await.unwrap(), Some(number));
        assert_eq!(hash.get::<f64>("h", "float").await.unwrap(), Some(2.5));
        let stored: Option<Json<Waypoint>> = hash.get("h", "json").await.unwrap();
        assert_eq!(stored.map(Json::into_inner), Some(waypoint));
    }

    #[tokio::test]
    async fn test_multi_get_preserves_length() {
        let hash = CacheClient::in_memory().hash();
        hash.put_all("h", &[("a", "1"), ("c", "3")]).await.unwrap();

        let values: Vec<Option<String>> = hash.multi_get("h", &["a", "b", "c", "d"]).await.unwrap();
        assert_eq!(values, vec![Some("1".into()), None, Some("3".into()), None]);

        let missing: Vec<Option<String>> = hash.multi_get("nope", &["x", "y"]).await.unwrap();
        assert_eq!(missing, vec![None, None]);
    }

    #[tokio::test]
    async fn test_increment() {
        let hash = CacheClient::in_memory().hash();
        assert_eq!(hash.increment("h", "n", 5).await.unwrap(), 5);
        assert_eq!(hash.increment("h", "n", -2).await.unwrap(), 3);
        assert!((hash.increment_float("h", "f", 1.5).await.unwrap() - 1.5).abs() < f64::EPSILON);

        hash.put("h", "text", "abc").await.unwrap();
        let err = hash.increment("h", "text", 1).await.unwrap_err();
        assert!(matches!(err, CacheError::Server { .. }));
        assert_eq!(hash.get::<String>("h", "text").await.unwrap(), Some("abc".into()));
    }

    #[tokio::test]
    async fn test_put_if_absent_and_delete_fields() {
        let hash = CacheClient::in_memory().hash();
        assert!(hash.put_if_absent("h", "a", "1").await.unwrap());
        assert!(!hash.put_if_absent("h", "a", "2").await.unwrap());
        assert_eq!(hash.get::<String>("h", "a").await.unwrap(), Some("1".into()));

        assert_eq!(hash.delete_fields("h", &["a", "zz"]).await.unwrap(), 1);
        assert_eq!(hash.len("h").await.unwrap(), 0);
        assert!(matches!(
            hash.delete_fields::<&str>("h", &[]).await,
            Err(CacheError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_listing_and_random_access() {
        let hash = CacheClient::in_memory().hash();
        hash.put_all("h", &[("a", 1), ("b", 2), ("c", 3)]).await.unwrap();

        let fields: Vec<String> = hash.fields("h").try_collect().await.unwrap();
        assert_eq!(fields, vec!["a", "b", "c"]);
        let values: Vec<i64> = hash.values::<i64>("h").try_collect().await.unwrap();
        assert_eq!(values, vec![1, 2, 3]);
        let entries: HashMap<String, i64> = hash.entries("h").try_collect().await.unwrap();
        assert_eq!(entries.get("b"), Some(&2));

        let field: String = hash.random_field("h").await.unwrap().unwrap();
        assert!(entries.contains_key(&field));
        let (field, value): (String, i64) = hash.random_entry("h").await.unwrap().unwrap();
        assert_eq!(entries[&field], value);
        assert_eq!(hash.random_fields::<String>("h", 2).await.unwrap().len(), 2);
        assert_eq!(hash.random_entries::<String, i64>("h", -5).await.unwrap().len(), 5);
        assert_eq!(hash.random_field::<String>("empty").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_scan_and_delete() {
        let hash = CacheClient::in_memory().hash();
        let entries: Vec<(String, i64)> = (0..25).map(|i| (format!("f{i}"), i)).collect();
        hash.put_all("h", &entries).await.unwrap();

        let mut scanned: Vec<(String, i64)> = hash
            .scan("h", keyweave_domain::ScanOptions::default().count(7))
            .try_collect()
            .await
            .unwrap();
        scanned.sort();
        let mut expected = entries.clone();
        expected.sort();
        assert_eq!(scanned, expected);

        assert!(hash.delete("h").await.unwrap());
        assert!(!hash.delete("h").await.unwrap());
    }
}
