//! Sorted set operations
//!
//! Three addressing modes select ranges: by index (`range*`), by score
//! (`range_by_score*`, a [`ScoreRange`]) and by member order (`range_by_lex*`,
//! a [`LexRange`]). Ranks are 0-based in ascending score order, ties broken
//! by member order.

use std::time::Duration;

use futures::stream::{BoxStream, StreamExt, TryStreamExt};

use keyweave_domain::{
    CacheError, Combine, Command, DecodeError, FromReply, LexRange, Limit, Reply, Result, ScanOptions, ScoreRange, ToArg,
    Tuple, decode, decode_pairs,
};

use super::{Dispatcher, failed, require_items, require_keys};
use crate::cursor::ScanRequest;

/// Decode a `WITHSCORES` reply into tuples.
fn tuples<T: FromReply>(reply: Reply) -> Result<Vec<Tuple<T>>> {
    Ok(decode_pairs::<T, f64>(reply)?
        .into_iter()
        .map(|(member, score)| Tuple::new(member, score))
        .collect())
}

/// Decode a blocking pop reply `[key, member, score]`; `Nil` on timeout.
fn keyed_tuple<T: FromReply>(reply: Reply) -> Result<Option<Tuple<T>>> {
    match reply {
        Reply::Nil => Ok(None),
        Reply::Array(items) if items.len() == 3 => {
            let mut items = items.into_iter().skip(1);
            match (items.next(), items.next()) {
                (Some(member), Some(score)) => Ok(Some(Tuple::new(decode(member)?, decode(score)?))),
                _ => Err(DecodeError::new("key/member/score", "array(3)").into()),
            }
        }
        other => Err(DecodeError::new("key/member/score", other.shape()).into()),
    }
}

fn with_limit(command: Command, limit: Option<Limit>) -> Command {
    match limit {
        Some(limit) => command.arg("LIMIT").arg(limit.offset).arg(limit.count),
        None => command,
    }
}

/// Encode `ZDIFF`/`ZINTER`/`ZUNION` and their `STORE` forms.
fn combine_command(
    name: &'static str,
    destination: Option<&str>,
    keys: &[&str],
    combine: Option<&Combine>,
) -> Result<Command> {
    require_keys(keys)?;
    let mut command = Command::new(name);
    if let Some(destination) = destination {
        command = command.arg(destination);
    }
    command = command.arg(keys.len()).args(keys);

    if let Some(combine) = combine {
        if let Some(weights) = &combine.weights {
            if weights.0.len() != keys.len() {
                return Err(CacheError::InvalidArgument(format!(
                    "{} weights for {} keys",
                    weights.0.len(),
                    keys.len()
                )));
            }
            command = command.arg("WEIGHTS").args(&weights.0);
        }
        command = command.arg("AGGREGATE").arg(combine.aggregate.as_str());
    }
    Ok(command)
}

/// Operations on sorted set keys
#[derive(Clone)]
pub struct SortedSetOps {
    dispatcher: Dispatcher,
}

impl SortedSetOps {
    pub(crate) const fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    // =========================================================================
    // WRITES
    // =========================================================================

    /// Add or rescore one member; `true` when it was newly added.
    pub async fn add(&self, key: &str, member: impl ToArg, score: f64) -> Result<bool> {
        self.dispatcher
            .mutate("zset.add", key, Command::new("ZADD").arg(key).arg(score).arg(member))
            .await
    }

    /// Add or rescore every tuple, returning how many were newly added.
    pub async fn add_all<M: ToArg>(&self, key: &str, tuples: &[Tuple<M>]) -> Result<u64> {
        require_items("tuple", tuples)?;
        let command = tuples
            .iter()
            .fold(Command::new("ZADD").arg(key), |command, t| command.arg(t.score).arg(&t.member));
        self.dispatcher.mutate("zset.add_all", key, command).await
    }

    pub async fn remove<M: ToArg>(&self, key: &str, members: &[M]) -> Result<u64> {
        require_items("member", members)?;
        self.dispatcher
            .mutate("zset.remove", key, Command::new("ZREM").arg(key).args(members))
            .await
    }

    /// Add `delta` to a member's score, creating it at zero.
    pub async fn increment_score(&self, key: &str, member: impl ToArg, delta: f64) -> Result<f64> {
        self.dispatcher
            .mutate(
                "zset.increment_score",
                key,
                Command::new("ZINCRBY").arg(key).arg(delta).arg(member),
            )
            .await
    }

    // =========================================================================
    // RANDOM ACCESS
    // =========================================================================

    pub async fn random_member<T: FromReply>(&self, key: &str) -> Result<Option<T>> {
        self.dispatcher
            .query(Command::new("ZRANDMEMBER").arg(key))
            .await
    }

    pub async fn distinct_random_members<T: FromReply>(&self, key: &str, count: usize) -> Result<Vec<T>> {
        self.dispatcher
            .query(Command::new("ZRANDMEMBER").arg(key).arg(count))
            .await
    }

    /// Exactly `count` random members, possibly repeated.
    pub async fn random_members<T: FromReply>(&self, key: &str, count: usize) -> Result<Vec<T>> {
        let count = i64::try_from(count).unwrap_or(i64::MAX);
        self.dispatcher
            .query(Command::new("ZRANDMEMBER").arg(key).arg(-count))
            .await
    }

    pub async fn random_member_with_score<T: FromReply>(&self, key: &str) -> Result<Option<Tuple<T>>> {
        let mut picked = self.distinct_random_members_with_score(key, 1).await?;
        Ok(picked.pop())
    }

    pub async fn distinct_random_members_with_score<T: FromReply>(
        &self,
        key: &str,
        count: usize,
    ) -> Result<Vec<Tuple<T>>> {
        let reply = self
            .dispatcher
            .query(Command::new("ZRANDMEMBER").arg(key).arg(count).arg("WITHSCORES"))
            .await?;
        tuples(reply)
    }

    pub async fn random_members_with_score<T: FromReply>(&self, key: &str, count: usize) -> Result<Vec<Tuple<T>>> {
        let count = i64::try_from(count).unwrap_or(i64::MAX);
        let reply = self
            .dispatcher
            .query(Command::new("ZRANDMEMBER").arg(key).arg(-count).arg("WITHSCORES"))
            .await?;
        tuples(reply)
    }

    // =========================================================================
    // RANKS AND RANGES
    // =========================================================================

    /// 0-based position in ascending score order.
    pub async fn rank(&self, key: &str, member: impl ToArg) -> Result<Option<u64>> {
        self.dispatcher
            .query(Command::new("ZRANK").arg(key).arg(member))
            .await
    }

    /// 0-based position in descending score order.
    pub async fn reverse_rank(&self, key: &str, member: impl ToArg) -> Result<Option<u64>> {
        self.dispatcher
            .query(Command::new("ZREVRANK").arg(key).arg(member))
            .await
    }

    fn scored<T: FromReply + Send + 'static>(&self, command: Command) -> BoxStream<'_, Result<Tuple<T>>> {
        self.dispatcher
            .stream_pairs::<T, f64>(command.arg("WITHSCORES"))
            .map_ok(|(member, score)| Tuple::new(member, score))
            .boxed()
    }

    pub fn range<T: FromReply + Send + 'static>(&self, key: &str, start: i64, end: i64) -> BoxStream<'_, Result<T>> {
        self.dispatcher
            .stream(Command::new("ZRANGE").arg(key).arg(start).arg(end))
    }

    pub fn range_with_scores<T: FromReply + Send + 'static>(
        &self,
        key: &str,
        start: i64,
        end: i64,
    ) -> BoxStream<'_, Result<Tuple<T>>> {
        self.scored(Command::new("ZRANGE").arg(key).arg(start).arg(end))
    }

    pub fn reverse_range<T: FromReply + Send + 'static>(&self, key: &str, start: i64, end: i64) -> BoxStream<'_, Result<T>> {
        self.dispatcher
            .stream(Command::new("ZREVRANGE").arg(key).arg(start).arg(end))
    }

    pub fn reverse_range_with_scores<T: FromReply + Send + 'static>(
        &self,
        key: &str,
        start: i64,
        end: i64,
    ) -> BoxStream<'_, Result<Tuple<T>>> {
        self.scored(Command::new("ZREVRANGE").arg(key).arg(start).arg(end))
    }

    fn by_score(name: &'static str, key: &str, range: ScoreRange, reverse: bool) -> Command {
        let (first, second) = if reverse {
            (range.max_arg(), range.min_arg())
        } else {
            (range.min_arg(), range.max_arg())
        };
        Command::new(name).arg(key).arg(first).arg(second)
    }

    pub fn range_by_score<T: FromReply + Send + 'static>(
        &self,
        key: &str,
        range: ScoreRange,
        limit: Option<Limit>,
    ) -> BoxStream<'_, Result<T>> {
        let command = Self::by_score("ZRANGEBYSCORE", key, range, false);
        self.dispatcher.stream(with_limit(command, limit))
    }

    pub fn range_by_score_with_scores<T: FromReply + Send + 'static>(
        &self,
        key: &str,
        range: ScoreRange,
        limit: Option<Limit>,
    ) -> BoxStream<'_, Result<Tuple<T>>> {
        let command = Self::by_score("ZRANGEBYSCORE", key, range, false);
        self.scored(with_limit(command, limit))
    }

    pub fn reverse_range_by_score<T: FromReply + Send + 'static>(
        &self,
        key: &str,
        range: ScoreRange,
        limit: Option<Limit>,
    ) -> BoxStream<'_, Result<T>> {
        let command = Self::by_score("ZREVRANGEBYSCORE", key, range, true);
        self.dispatcher.stream(with_limit(command, limit))
    }

    pub fn reverse_range_by_score_with_scores<T: FromReply + Send + 'static>(
        &self,
        key: &str,
        range: ScoreRange,
        limit: Option<Limit>,
    ) -> BoxStream<'_, Result<Tuple<T>>> {
        let command = Self::by_score("ZREVRANGEBYSCORE", key, range, true);
        self.scored(with_limit(command, limit))
    }

    /// Members between `range` bounds in member order; meaningful when all
    /// members share one score.
    pub fn range_by_lex<T: FromReply + Send + 'static>(
        &self,
        key: &str,
        range: &LexRange,
        limit: Option<Limit>,
    ) -> BoxStream<'_, Result<T>> {
        let command = Command::new("ZRANGEBYLEX")
            .arg(key)
            .arg(range.min_arg())
            .arg(range.max_arg());
        self.dispatcher.stream(with_limit(command, limit))
    }

    pub fn reverse_range_by_lex<T: FromReply + Send + 'static>(
        &self,
        key: &str,
        range: &LexRange,
        limit: Option<Limit>,
    ) -> BoxStream<'_, Result<T>> {
        let command = Command::new("ZREVRANGEBYLEX")
            .arg(key)
            .arg(range.max_arg())
            .arg(range.min_arg());
        self.dispatcher.stream(with_limit(command, limit))
    }

    /// Incremental member/score enumeration.
    pub fn scan<T: FromReply + Send + 'static>(
        &self,
        key: &str,
        options: ScanOptions,
    ) -> BoxStream<'static, Result<Tuple<T>>> {
        self.dispatcher.scan(ScanRequest::sorted_set(key, options))
    }

    /// Number of members with a score inside `range`.
    pub async fn count(&self, key: &str, range: ScoreRange) -> Result<u64> {
        self.dispatcher
            .query(Command::new("ZCOUNT").arg(key).arg(range.min_arg()).arg(range.max_arg()))
            .await
    }

    pub async fn lex_count(&self, key: &str, range: &LexRange) -> Result<u64> {
        self.dispatcher
            .query(Command::new("ZLEXCOUNT").arg(key).arg(range.min_arg()).arg(range.max_arg()))
            .await
    }

    // =========================================================================
    // POPS
    // =========================================================================

    async fn pop_edge<T: FromReply>(&self, name: &'static str, key: &str, count: Option<usize>) -> Result<Vec<Tuple<T>>> {
        let mut command = Command::new(name).arg(key);
        if let Some(count) = count {
            command = command.arg(count);
        }
        let operation = if name == "ZPOPMIN" { "zset.pop_min" } else { "zset.pop_max" };
        let reply = self.dispatcher.mutate(operation, key, command).await?;
        tuples(reply)
    }

    async fn blocking_pop_edge<T: FromReply>(
        &self,
        name: &'static str,
        key: &str,
        timeout: Duration,
    ) -> Result<Option<Tuple<T>>> {
        let operation = if name == "BZPOPMIN" {
            "zset.blocking_pop_min"
        } else {
            "zset.blocking_pop_max"
        };
        let reply = self
            .dispatcher
            .mutate(operation, key, Command::new(name).arg(key).block_for(timeout))
            .await?;
        keyed_tuple(reply)
    }

    /// Remove and return the lowest-scored member.
    pub async fn pop_min<T: FromReply>(&self, key: &str) -> Result<Option<Tuple<T>>> {
        Ok(self.pop_edge("ZPOPMIN", key, None).await?.into_iter().next())
    }

    pub async fn pop_min_many<T: FromReply>(&self, key: &str, count: usize) -> Result<Vec<Tuple<T>>> {
        self.pop_edge("ZPOPMIN", key, Some(count)).await
    }

    /// Pop the lowest-scored member, waiting up to `timeout`. `Ok(None)` once
    /// the wait expires; a zero timeout waits indefinitely.
    pub async fn blocking_pop_min<T: FromReply>(&self, key: &str, timeout: Duration) -> Result<Option<Tuple<T>>> {
        self.blocking_pop_edge("BZPOPMIN", key, timeout).await
    }

    /// Remove and return the highest-scored member.
    pub async fn pop_max<T: FromReply>(&self, key: &str) -> Result<Option<Tuple<T>>> {
        Ok(self.pop_edge("ZPOPMAX", key, None).await?.into_iter().next())
    }

    pub async fn pop_max_many<T: FromReply>(&self, key: &str, count: usize) -> Result<Vec<Tuple<T>>> {
        self.pop_edge("ZPOPMAX", key, Some(count)).await
    }

    pub async fn blocking_pop_max<T: FromReply>(&self, key: &str, timeout: Duration) -> Result<Option<Tuple<T>>> {
        self.blocking_pop_edge("BZPOPMAX", key, timeout).await
    }

    // =========================================================================
    // SCORES AND REMOVAL
    // =========================================================================

    pub async fn len(&self, key: &str) -> Result<u64> {
        self.dispatcher.query(Command::new("ZCARD").arg(key)).await
    }

    pub async fn score(&self, key: &str, member: impl ToArg) -> Result<Option<f64>> {
        self.dispatcher
            .query(Command::new("ZSCORE").arg(key).arg(member))
            .await
    }

    /// Score of each of `members`, in request order.
    pub async fn scores<M: ToArg>(&self, key: &str, members: &[M]) -> Result<Vec<Option<f64>>> {
        require_items("member", members)?;
        self.dispatcher
            .query(Command::new("ZMSCORE").arg(key).args(members))
            .await
    }

    /// Remove members ranked `start..=end`.
    pub async fn remove_range(&self, key: &str, start: i64, end: i64) -> Result<u64> {
        self.dispatcher
            .mutate(
                "zset.remove_range",
                key,
                Command::new("ZREMRANGEBYRANK").arg(key).arg(start).arg(end),
            )
            .await
    }

    pub async fn remove_range_by_lex(&self, key: &str, range: &LexRange) -> Result<u64> {
        self.dispatcher
            .mutate(
                "zset.remove_range_by_lex",
                key,
                Command::new("ZREMRANGEBYLEX")
                    .arg(key)
                    .arg(range.min_arg())
                    .arg(range.max_arg()),
            )
            .await
    }

    pub async fn remove_range_by_score(&self, key: &str, range: ScoreRange) -> Result<u64> {
        self.dispatcher
            .mutate(
                "zset.remove_range_by_score",
                key,
                Command::new("ZREMRANGEBYSCORE")
                    .arg(key)
                    .arg(range.min_arg())
                    .arg(range.max_arg()),
            )
            .await
    }

    // =========================================================================
    // MULTI-KEY COMBINATION
    // =========================================================================

    fn combined<T: FromReply + Send + 'static>(
        &self,
        name: &'static str,
        keys: &[&str],
        combine: Option<&Combine>,
    ) -> BoxStream<'_, Result<T>> {
        match combine_command(name, None, keys, combine) {
            Ok(command) => self.dispatcher.stream(command),
            Err(err) => failed(err),
        }
    }

    fn combined_with_scores<T: FromReply + Send + 'static>(
        &self,
        name: &'static str,
        keys: &[&str],
        combine: Option<&Combine>,
    ) -> BoxStream<'_, Result<Tuple<T>>> {
        match combine_command(name, None, keys, combine) {
            Ok(command) => self.scored(command),
            Err(err) => failed(err),
        }
    }

    async fn combine_and_store(
        &self,
        operation: &str,
        name: &'static str,
        keys: &[&str],
        destination: &str,
        combine: Option<&Combine>,
    ) -> Result<u64> {
        let command = combine_command(name, Some(destination), keys, combine)?;
        self.dispatcher.mutate(operation, destination, command).await
    }

    /// Members of the first set absent from every other set of `keys`.
    pub fn difference<T: FromReply + Send + 'static>(&self, keys: &[&str]) -> BoxStream<'_, Result<T>> {
        self.combined("ZDIFF", keys, None)
    }

    pub fn difference_with_scores<T: FromReply + Send + 'static>(&self, keys: &[&str]) -> BoxStream<'_, Result<Tuple<T>>> {
        self.combined_with_scores("ZDIFF", keys, None)
    }

    pub async fn difference_and_store(&self, keys: &[&str], destination: &str) -> Result<u64> {
        self.combine_and_store("zset.difference_and_store", "ZDIFFSTORE", keys, destination, None)
            .await
    }

    /// Members present in every set of `keys`, scores weighted then
    /// aggregated per `combine`.
    pub fn intersect<T: FromReply + Send + 'static>(&self, keys: &[&str], combine: &Combine) -> BoxStream<'_, Result<T>> {
        self.combined("ZINTER", keys, Some(combine))
    }

    pub fn intersect_with_scores<T: FromReply + Send + 'static>(
        &self,
        keys: &[&str],
        combine: &Combine,
    ) -> BoxStream<'_, Result<Tuple<T>>> {
        self.combined_with_scores("ZINTER", keys, Some(combine))
    }

    pub async fn intersect_and_store(&self, keys: &[&str], destination: &str, combine: &Combine) -> Result<u64> {
        self.combine_and_store("zset.intersect_and_store", "ZINTERSTORE", keys, destination, Some(combine))
            .await
    }

    /// Members present in any set of `keys`, scores weighted then aggregated
    /// per `combine`.
    pub fn union<T: FromReply + Send + 'static>(&self, keys: &[&str], combine: &Combine) -> BoxStream<'_, Result<T>> {
        self.combined("ZUNION", keys, Some(combine))
    }

    pub fn union_with_scores<T: FromReply + Send + 'static>(
        &self,
        keys: &[&str],
        combine: &Combine,
    ) -> BoxStream<'_, Result<Tuple<T>>> {
        self.combined_with_scores("ZUNION", keys, Some(combine))
    }

    pub async fn union_and_store(&self, keys: &[&str], destination: &str, combine: &Combine) -> Result<u64> {
        self.combine_and_store("zset.union_and_store", "ZUNIONSTORE", keys, destination, Some(combine))
            .await
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.dispatcher.delete("zset", key).await
    }
}
