//! # In-Memory Channel
//!
//! Command channel that interprets the command vocabulary of the operation
//! sets against a process-local keyspace, with the store's reply shapes and
//! error lines. Intended for tests and local development.
//!
//! Blocking commands wait on a [`Notify`] signalled after every command, so
//! a push from another task wakes a pending `BLPOP` without polling.

mod hashes;
mod keys;
mod lists;
mod sets;
mod store;
mod strings;
mod zsets;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use keyweave_domain::{CacheError, Command, Reply, Result};

use super::CommandChannel;
use store::{Bytes, Store};

/// Process-local command channel
#[derive(Clone, Default)]
pub struct MemoryChannel {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    store: Mutex<Store>,
    written: Notify,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    fn apply(&self, name: &'static str, args: Vec<Bytes>) -> Result<Reply> {
        let mut store = self.inner.store.lock().unwrap_or_else(PoisonError::into_inner);
        let mut args = Args::new(name, args);
        let reply = dispatch(&mut store, &mut args);
        store.prune();
        reply
    }

    async fn apply_blocking(&self, name: &'static str, args: Vec<Bytes>, wait: Duration) -> Result<Reply> {
        // A zero wait blocks until a value arrives.
        let deadline = (!wait.is_zero()).then(|| Instant::now() + wait);

        loop {
            let notified = self.inner.written.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let reply = self.apply(name, args.clone())?;
            if !reply.is_nil() {
                return Ok(reply);
            }

            match deadline {
                Some(at) => {
                    if tokio::time::timeout_at(at, notified).await.is_err() {
                        return Ok(Reply::Nil);
                    }
                }
                None => notified.await,
            }
        }
    }
}

#[async_trait]
impl CommandChannel for MemoryChannel {
    async fn execute(&self, command: Command) -> Result<Reply> {
        command.check()?;
        let name = command.name();
        let wait = command.blocking();
        let mut args = command.into_args();

        let reply = match wait {
            Some(wait) => {
                // The trailing timeout argument is replaced by the local wait.
                args.pop();
                self.apply_blocking(name, args, wait).await
            }
            None => self.apply(name, args),
        };
        self.inner.written.notify_waiters();
        reply
    }
}

fn dispatch(store: &mut Store, args: &mut Args) -> Result<Reply> {
    match args.command {
        // keys
        "DEL" | "UNLINK" => keys::del(store, args),
        "EXISTS" => keys::exists(store, args),
        "PEXPIRE" => keys::pexpire(store, args),
        "SCAN" => keys::scan(store, args),

        // strings
        "GET" => strings::get(store, args),
        "SET" => strings::set(store, args),
        "MSET" => strings::mset(store, args, false),
        "MSETNX" => strings::mset(store, args, true),
        "MGET" => strings::mget(store, args),
        "GETDEL" => strings::getdel(store, args),
        "GETEX" => strings::getex(store, args),
        "GETSET" => strings::getset(store, args),
        "INCRBY" => strings::incrby(store, args, false),
        "DECRBY" => strings::incrby(store, args, true),
        "INCRBYFLOAT" => strings::incrbyfloat(store, args),
        "APPEND" => strings::append(store, args),
        "GETRANGE" => strings::getrange(store, args),
        "SETRANGE" => strings::setrange(store, args),
        "STRLEN" => strings::strlen(store, args),
        "SETBIT" => strings::setbit(store, args),
        "GETBIT" => strings::getbit(store, args),

        // hashes
        "HSET" => hashes::hset(store, args),
        "HSETNX" => hashes::hsetnx(store, args),
        "HGET" => hashes::hget(store, args),
        "HMGET" => hashes::hmget(store, args),
        "HDEL" => hashes::hdel(store, args),
        "HEXISTS" => hashes::hexists(store, args),
        "HINCRBY" => hashes::hincrby(store, args),
        "HINCRBYFLOAT" => hashes::hincrbyfloat(store, args),
        "HRANDFIELD" => hashes::hrandfield(store, args),
        "HKEYS" => hashes::hkeys(store, args),
        "HVALS" => hashes::hvals(store, args),
        "HLEN" => hashes::hlen(store, args),
        "HGETALL" => hashes::hgetall(store, args),
        "HSCAN" => hashes::hscan(store, args),

        // lists
        "LPUSH" => lists::push(store, args, lists::Side::Left, false),
        "RPUSH" => lists::push(store, args, lists::Side::Right, false),
        "LPUSHX" => lists::push(store, args, lists::Side::Left, true),
        "RPUSHX" => lists::push(store, args, lists::Side::Right, true),
        "LPOP" | "BLPOP" => lists::pop(store, args, lists::Side::Left),
        "RPOP" | "BRPOP" => lists::pop(store, args, lists::Side::Right),
        "LINSERT" => lists::linsert(store, args),
        "LSET" => lists::lset(store, args),
        "LREM" => lists::lrem(store, args),
        "LINDEX" => lists::lindex(store, args),
        "LPOS" => lists::lpos(store, args),
        "LRANGE" => lists::lrange(store, args),
        "LTRIM" => lists::ltrim(store, args),
        "LLEN" => lists::llen(store, args),
        "LMOVE" | "BLMOVE" => lists::lmove(store, args),

        // sets
        "SADD" => sets::sadd(store, args),
        "SREM" => sets::srem(store, args),
        "SPOP" => sets::spop(store, args),
        "SMOVE" => sets::smove(store, args),
        "SCARD" => sets::scard(store, args),
        "SISMEMBER" => sets::sismember(store, args),
        "SMISMEMBER" => sets::smismember(store, args),
        "SINTER" | "SUNION" | "SDIFF" => sets::algebra(store, args, false),
        "SINTERSTORE" | "SUNIONSTORE" | "SDIFFSTORE" => sets::algebra(store, args, true),
        "SMEMBERS" => sets::smembers(store, args),
        "SSCAN" => sets::sscan(store, args),
        "SRANDMEMBER" => sets::srandmember(store, args),

        // sorted sets
        "ZADD" => zsets::zadd(store, args),
        "ZREM" => zsets::zrem(store, args),
        "ZINCRBY" => zsets::zincrby(store, args),
        "ZRANDMEMBER" => zsets::zrandmember(store, args),
        "ZRANK" => zsets::zrank(store, args, false),
        "ZREVRANK" => zsets::zrank(store, args, true),
        "ZRANGE" => zsets::zrange(store, args, false),
        "ZREVRANGE" => zsets::zrange(store, args, true),
        "ZRANGEBYSCORE" => zsets::zrangebyscore(store, args, false),
        "ZREVRANGEBYSCORE" => zsets::zrangebyscore(store, args, true),
        "ZRANGEBYLEX" => zsets::zrangebylex(store, args, false),
        "ZREVRANGEBYLEX" => zsets::zrangebylex(store, args, true),
        "ZSCAN" => zsets::zscan(store, args),
        "ZCOUNT" => zsets::zcount(store, args),
        "ZLEXCOUNT" => zsets::zlexcount(store, args),
        "ZPOPMIN" | "BZPOPMIN" => zsets::zpop(store, args, false),
        "ZPOPMAX" | "BZPOPMAX" => zsets::zpop(store, args, true),
        "ZCARD" => zsets::zcard(store, args),
        "ZSCORE" => zsets::zscore(store, args),
        "ZMSCORE" => zsets::zmscore(store, args),
        "ZREMRANGEBYRANK" => zsets::zremrangebyrank(store, args),
        "ZREMRANGEBYLEX" => zsets::zremrangebylex(store, args),
        "ZREMRANGEBYSCORE" => zsets::zremrangebyscore(store, args),
        "ZDIFF" | "ZINTER" | "ZUNION" => zsets::combine(store, args, false),
        "ZDIFFSTORE" | "ZINTERSTORE" | "ZUNIONSTORE" => zsets::combine(store, args, true),

        other => Err(CacheError::server(other, &format!("ERR unknown command '{other}'"))),
    }
}

// =============================================================================
// ARGUMENT PARSING
// =============================================================================

/// Remaining arguments of the command being interpreted
pub(super) struct Args {
    command: &'static str,
    items: VecDeque<Bytes>,
}

impl Args {
    fn new(command: &'static str, items: Vec<Bytes>) -> Self {
        Self {
            command,
            items: items.into(),
        }
    }

    pub(super) const fn command(&self) -> &'static str {
        self.command
    }

    pub(super) fn len(&self) -> usize {
        self.items.len()
    }

    pub(super) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub(super) fn error(&self, line: &str) -> CacheError {
        CacheError::server(self.command, line)
    }

    pub(super) fn arity(&self) -> CacheError {
        self.error(&format!(
            "ERR wrong number of arguments for '{}' command",
            self.command.to_lowercase()
        ))
    }

    pub(super) fn syntax(&self) -> CacheError {
        self.error("ERR syntax error")
    }

    pub(super) fn bytes(&mut self) -> Result<Bytes> {
        self.items.pop_front().ok_or_else(|| self.arity())
    }

    pub(super) fn int(&mut self) -> Result<i64> {
        let raw = self.bytes()?;
        std::str::from_utf8(&raw)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| self.error("ERR value is not an integer or out of range"))
    }

    pub(super) fn float(&mut self) -> Result<f64> {
        let raw = self.bytes()?;
        parse_float(&raw).ok_or_else(|| self.error("ERR value is not a valid float"))
    }

    /// At least one remaining argument, all of them consumed.
    pub(super) fn rest(&mut self) -> Result<Vec<Bytes>> {
        if self.items.is_empty() {
            return Err(self.arity());
        }
        Ok(self.items.drain(..).collect())
    }

    /// Consume the next argument if it equals `flag` (case-insensitive).
    pub(super) fn flag(&mut self, flag: &str) -> bool {
        let matches = self
            .items
            .front()
            .is_some_and(|a| a.eq_ignore_ascii_case(flag.as_bytes()));
        if matches {
            self.items.pop_front();
        }
        matches
    }

    pub(super) fn finish(&self) -> Result<()> {
        if self.items.is_empty() { Ok(()) } else { Err(self.syntax()) }
    }
}

pub(super) fn parse_float(raw: &[u8]) -> Option<f64> {
    let text = std::str::from_utf8(raw).ok()?;
    let value: f64 = match text {
        "+inf" | "inf" => f64::INFINITY,
        "-inf" => f64::NEG_INFINITY,
        other => other.parse().ok()?,
    };
    (!value.is_nan()).then_some(value)
}

pub(super) fn bulk(bytes: Bytes) -> Reply {
    Reply::Bulk(bytes)
}

pub(super) fn bulk_array<I: IntoIterator<Item = Bytes>>(items: I) -> Reply {
    Reply::Array(items.into_iter().map(Reply::Bulk).collect())
}

pub(super) fn count(n: usize) -> Reply {
    Reply::Integer(i64::try_from(n).unwrap_or(i64::MAX))
}

/// Resolve an inclusive `[start, stop]` index window with negative offsets
/// counted from the end. `None` when the window is empty.
pub(super) fn window(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = i64::try_from(len).ok()?;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((usize::try_from(start).ok()?, usize::try_from(stop).ok()?))
}

/// One page of a cursor scan over `items`.
///
/// The cursor is an offset into `items`; `MATCH` filters after paging, so a
/// page may come back empty while the cursor is still live.
pub(super) fn scan_page<T>(
    args: &mut Args,
    items: Vec<T>,
    matches: impl Fn(&[u8], &T) -> bool,
) -> Result<(Reply, Vec<T>)> {
    let cursor = usize::try_from(args.int()?).map_err(|_| args.error("ERR invalid cursor"))?;
    let mut pattern: Option<Bytes> = None;
    let mut page_size = 10usize;
    while !args.is_empty() {
        if args.flag("MATCH") {
            pattern = Some(args.bytes()?);
        } else if args.flag("COUNT") {
            page_size = usize::try_from(args.int()?)
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| args.syntax())?;
        } else {
            return Err(args.syntax());
        }
    }

    let end = cursor.saturating_add(page_size).min(items.len());
    let next = if end >= items.len() { 0 } else { end };
    let page = items
        .into_iter()
        .skip(cursor)
        .take(end.saturating_sub(cursor))
        .filter(|item| pattern.as_deref().is_none_or(|p| matches(p, item)))
        .collect();

    Ok((bulk(next.to_string().into_bytes()), page))
}
