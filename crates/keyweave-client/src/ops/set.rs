//! Set operations

use futures::stream::BoxStream;

use keyweave_domain::{Command, FromReply, Result, ScanOptions, ToArg};

use super::{Dispatcher, failed, require_items, require_keys};
use crate::cursor::ScanRequest;

/// Operations on set keys
#[derive(Clone)]
pub struct SetOps {
    dispatcher: Dispatcher,
}

impl SetOps {
    pub(crate) const fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    /// Add `members`, returning how many were not already present.
    pub async fn add<M: ToArg>(&self, key: &str, members: &[M]) -> Result<u64> {
        require_items("member", members)?;
        self.dispatcher
            .mutate("set.add", key, Command::new("SADD").arg(key).args(members))
            .await
    }

    pub async fn remove<M: ToArg>(&self, key: &str, members: &[M]) -> Result<u64> {
        require_items("member", members)?;
        self.dispatcher
            .mutate("set.remove", key, Command::new("SREM").arg(key).args(members))
            .await
    }

    /// Remove and return one random member.
    pub async fn pop<T: FromReply>(&self, key: &str) -> Result<Option<T>> {
        self.dispatcher
            .mutate("set.pop", key, Command::new("SPOP").arg(key))
            .await
    }

    /// Remove and return up to `count` random members.
    pub async fn pop_many<T: FromReply>(&self, key: &str, count: usize) -> Result<Vec<T>> {
        self.dispatcher
            .mutate("set.pop", key, Command::new("SPOP").arg(key).arg(count))
            .await
    }

    /// Move `member` from `source` to `destination`; `false` when `source`
    /// does not hold it.
    pub async fn move_member(&self, source: &str, member: impl ToArg, destination: &str) -> Result<bool> {
        self.dispatcher
            .mutate(
                "set.move",
                source,
                Command::new("SMOVE").arg(source).arg(destination).arg(member),
            )
            .await
    }

    pub async fn len(&self, key: &str) -> Result<u64> {
        self.dispatcher.query(Command::new("SCARD").arg(key)).await
    }

    pub async fn is_member(&self, key: &str, member: impl ToArg) -> Result<bool> {
        self.dispatcher
            .query(Command::new("SISMEMBER").arg(key).arg(member))
            .await
    }

    /// Membership of each of `members`, in request order.
    pub async fn are_members<M: ToArg>(&self, key: &str, members: &[M]) -> Result<Vec<bool>> {
        require_items("member", members)?;
        self.dispatcher
            .query(Command::new("SMISMEMBER").arg(key).args(members))
            .await
    }

    fn combine<T: FromReply + Send + 'static>(&self, command: &'static str, keys: &[&str]) -> BoxStream<'_, Result<T>> {
        match require_keys(keys) {
            Ok(()) => self.dispatcher.stream(Command::new(command).args(keys)),
            Err(err) => failed(err),
        }
    }

    async fn combine_and_store(
        &self,
        operation: &str,
        command: &'static str,
        keys: &[&str],
        destination: &str,
    ) -> Result<u64> {
        require_keys(keys)?;
        self.dispatcher
            .mutate(operation, destination, Command::new(command).arg(destination).args(keys))
            .await
    }

    /// Members present in every set of `keys`.
    pub fn intersect<T: FromReply + Send + 'static>(&self, keys: &[&str]) -> BoxStream<'_, Result<T>> {
        self.combine("SINTER", keys)
    }

    pub fn union<T: FromReply + Send + 'static>(&self, keys: &[&str]) -> BoxStream<'_, Result<T>> {
        self.combine("SUNION", keys)
    }

    /// Members of the first set absent from every other set of `keys`.
    pub fn difference<T: FromReply + Send + 'static>(&self, keys: &[&str]) -> BoxStream<'_, Result<T>> {
        self.combine("SDIFF", keys)
    }

    /// Store the intersection under `destination`, returning its cardinality.
    pub async fn intersect_and_store(&self, keys: &[&str], destination: &str) -> Result<u64> {
        self.combine_and_store("set.intersect_and_store", "SINTERSTORE", keys, destination).await
    }

    pub async fn union_and_store(&self, keys: &[&str], destination: &str) -> Result<u64> {
        self.combine_and_store("set.union_and_store", "SUNIONSTORE", keys, destination).await
    }

    pub async fn difference_and_store(&self, keys: &[&str], destination: &str) -> Result<u64> {
        self.combine_and_store("set.difference_and_store", "SDIFFSTORE", keys, destination).await
    }

    pub fn members<T: FromReply + Send + 'static>(&self, key: &str) -> BoxStream<'_, Result<T>> {
        self.dispatcher.stream(Command::new("SMEMBERS").arg(key))
    }

    pub fn scan<T: FromReply + Send + 'static>(&self, key: &str, options: ScanOptions) -> BoxStream<'static, Result<T>> {
        self.dispatcher.scan(ScanRequest::set(key, options))
    }

    pub async fn random_member<T: FromReply>(&self, key: &str) -> Result<Option<T>> {
        self.dispatcher
            .query(Command::new("SRANDMEMBER").arg(key))
            .await
    }

    /// Up to `count` distinct random members.
    pub async fn distinct_random_members<T: FromReply>(&self, key: &str, count: usize) -> Result<Vec<T>> {
        self.dispatcher
            .query(Command::new("SRANDMEMBER").arg(key).arg(count))
            .await
    }

    /// Exactly `count` random members, possibly repeated.
    pub async fn random_members<T: FromReply>(&self, key: &str, count: usize) -> Result<Vec<T>> {
        let count = i64::try_from(count).unwrap_or(i64::MAX);
        self.dispatcher
            .query(Command::new("SRANDMEMBER").arg(key).arg(-count))
            .await
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.dispatcher.delete("set", key).await
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use std::collections::BTreeSet;

    use futures::TryStreamExt;

    use keyweave_domain::CacheError;

    use crate::CacheClient;

    #[tokio::test]
    async fn test_algebra_scenario() {
        let set = CacheClient::in_memory().set();
        set.add("a", &[1, 2, 3]).await.unwrap();
        set.add("b", &[2, 3, 4]).await.unwrap();

        let common: BTreeSet<i64> = set.intersect::<i64>(&["a", "b"]).try_collect().await.unwrap();
        assert_eq!(common, BTreeSet::from([2, 3]));

        assert_eq!(set.difference_and_store(&["a", "b"], "c").await.unwrap(), 1);
        let stored: BTreeSet<i64> = set.members::<i64>("c").try_collect().await.unwrap();
        assert_eq!(stored, BTreeSet::from([1]));
    }

    #[tokio::test]
    async fn test_union_and_difference_streams() {
        let set = CacheClient::in_memory().set();
        set.add("a", &["x", "y"]).await.unwrap();
        set.add("b", &["y", "z"]).await.unwrap();

        let all: BTreeSet<String> = set.union(&["a", "b"]).try_collect().await.unwrap();
        assert_eq!(all.len(), 3);
        let only_a: Vec<String> = set.difference(&["a", "b"]).try_collect().await.unwrap();
        assert_eq!(only_a, vec!["x"]);
        assert_eq!(set.union_and_store(&["a", "b"], "u").await.unwrap(), 3);
        assert_eq!(set.intersect_and_store(&["a", "b"], "i").await.unwrap(), 1);
        // An empty result removes the destination.
        assert_eq!(set.intersect_and_store(&["a", "missing"], "i").await.unwrap(), 0);
        assert_eq!(set.len("i").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_empty_key_list_rejected() {
        let set = CacheClient::in_memory().set();
        let err = set.intersect::<String>(&[]).try_collect::<Vec<_>>().await.unwrap_err();
        assert!(matches!(err, CacheError::InvalidArgument(_)));
        let err = set.union_and_store(&[], "d").await.unwrap_err();
        assert!(matches!(err, CacheError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_membership() {
        let set = CacheClient::in_memory().set();
        assert_eq!(set.add("s", &["a", "b", "a"]).await.unwrap(), 2);
        assert!(set.is_member("s", "a").await.unwrap());
        assert!(!set.is_member("s", "c").await.unwrap());
        assert_eq!(set.are_members("s", &["a", "c", "b"]).await.unwrap(), vec![true, false, true]);
        assert_eq!(set.remove("s", &["a", "c"]).await.unwrap(), 1);
        assert_eq!(set.len("s").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_pop_and_move() {
        let set = CacheClient::in_memory().set();
        set.add("s", &["a", "b", "c"]).await.unwrap();

        let popped: String = set.pop("s").await.unwrap().unwrap();
        assert!(!set.is_member("s", &popped).await.unwrap());
        let rest: Vec<String> = set.pop_many("s", 5).await.unwrap();
        assert_eq!(rest.len(), 2);
        assert_eq!(set.pop::<String>("s").await.unwrap(), None);

        set.add("src", &["m"]).await.unwrap();
        assert!(set.move_member("src", "m", "dst").await.unwrap());
        assert!(!set.move_member("src", "m", "dst").await.unwrap());
        assert!(set.is_member("dst", "m").await.unwrap());
    }

    #[tokio::test]
    async fn test_random_members_and_scan() {
        let set = CacheClient::in_memory().set();
        let members: Vec<String> = (0..20).map(|i| format!("m{i:02}")).collect();
        set.add("s", &members).await.unwrap();

        let distinct: BTreeSet<String> = set.distinct_random_members("s", 5).await.unwrap().into_iter().collect();
        assert_eq!(distinct.len(), 5);
        assert_eq!(set.random_members::<String>("s", 30).await.unwrap().len(), 30);
        let one: String = set.random_member("s").await.unwrap().unwrap();
        assert!(members.contains(&one));

        let scanned: BTreeSet<String> = set
            .scan("s", keyweave_domain::ScanOptions::default().matching("m1*").count(4))
            .try_collect()
            .await
            .unwrap();
        assert_eq!(scanned.len(), 10);
        assert!(set.delete("s").await.unwrap());
    }
}
