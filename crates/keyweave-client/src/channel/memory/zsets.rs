//! Sorted set commands.

use std::cmp::Ordering;

use keyweave_domain::{Reply, Result, format_float};
use rand::seq::SliceRandom;

use super::hashes::pick;
use super::store::{Bytes, Data, Store, ZSetData, glob_match};
use super::{Args, bulk, count, parse_float, scan_page, window};

type Scored = (Bytes, f64);

fn zset_or_empty(store: &mut Store, args: &Args, key: &[u8]) -> Result<ZSetData> {
    Ok(store.zset(args.command(), key)?.cloned().unwrap_or_default())
}

fn by_score(a: &Scored, b: &Scored) -> Ordering {
    a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0))
}

/// Members in ascending `(score, member)` order.
fn ordered(zset: ZSetData) -> Vec<Scored> {
    let mut items: Vec<Scored> = zset.into_iter().collect();
    items.sort_by(by_score);
    items
}

fn score_reply(score: f64) -> Reply {
    bulk(format_float(score).into_bytes())
}

fn render(items: Vec<Scored>, with_scores: bool) -> Reply {
    let mut out = Vec::with_capacity(items.len() * if with_scores { 2 } else { 1 });
    for (member, score) in items {
        out.push(bulk(member));
        if with_scores {
            out.push(score_reply(score));
        }
    }
    Reply::Array(out)
}

// =============================================================================
// BOUNDS
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct ScoreBound {
    value: f64,
    exclusive: bool,
}

impl ScoreBound {
    fn parse(args: &mut Args) -> Result<Self> {
        let raw = args.bytes()?;
        let (exclusive, digits) = match raw.split_first() {
            Some((b'(', rest)) => (true, rest),
            _ => (false, raw.as_slice()),
        };
        let value = parse_float(digits).ok_or_else(|| args.error("ERR min or max is not a float"))?;
        Ok(Self { value, exclusive })
    }

    fn below(self, score: f64) -> bool {
        if self.exclusive { self.value < score } else { self.value <= score }
    }

    fn above(self, score: f64) -> bool {
        if self.exclusive { score < self.value } else { score <= self.value }
    }
}

#[derive(Debug, Clone)]
enum LexBound {
    Min,
    Max,
    Inclusive(Bytes),
    Exclusive(Bytes),
}

impl LexBound {
    fn parse(args: &mut Args) -> Result<Self> {
        let raw = args.bytes()?;
        match raw.split_first() {
            Some((b'-', [])) => Ok(Self::Min),
            Some((b'+', [])) => Ok(Self::Max),
            Some((b'[', rest)) => Ok(Self::Inclusive(rest.to_vec())),
            Some((b'(', rest)) => Ok(Self::Exclusive(rest.to_vec())),
            _ => Err(args.error("ERR min or max not valid string range item")),
        }
    }

    fn below(&self, member: &[u8]) -> bool {
        match self {
            Self::Min => true,
            Self::Max => false,
            Self::Inclusive(b) => b.as_slice() <= member,
            Self::Exclusive(b) => b.as_slice() < member,
        }
    }

    fn above(&self, member: &[u8]) -> bool {
        match self {
            Self::Min => false,
            Self::Max => true,
            Self::Inclusive(b) => member <= b.as_slice(),
            Self::Exclusive(b) => member < b.as_slice(),
        }
    }
}

/// Trailing `[WITHSCORES] [LIMIT offset count]` options of the range family.
fn range_options(args: &mut Args, allow_scores: bool) -> Result<(bool, Option<(usize, Option<usize>)>)> {
    let mut with_scores = false;
    let mut limit = None;
    while !args.is_empty() {
        if allow_scores && args.flag("WITHSCORES") {
            with_scores = true;
        } else if args.flag("LIMIT") {
            let offset = args.int()?;
            let n = args.int()?;
            // A negative offset yields nothing; a negative count means all.
            let offset = usize::try_from(offset).unwrap_or(usize::MAX);
            limit = Some((offset, usize::try_from(n).ok()));
        } else {
            return Err(args.syntax());
        }
    }
    Ok((with_scores, limit))
}

fn apply_limit(items: Vec<Scored>, limit: Option<(usize, Option<usize>)>) -> Vec<Scored> {
    match limit {
        None => items,
        Some((offset, n)) => items
            .into_iter()
            .skip(offset)
            .take(n.unwrap_or(usize::MAX))
            .collect(),
    }
}

// =============================================================================
// WRITES
// =============================================================================

/// `ZADD key [NX|XX] [GT|LT] [CH] [INCR] score member [score member ...]`
pub(super) fn zadd(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let key = args.bytes()?;
    let (mut nx, mut xx, mut gt, mut lt, mut ch, mut incr) = (false, false, false, false, false, false);
    loop {
        if args.flag("NX") {
            nx = true;
        } else if args.flag("XX") {
            xx = true;
        } else if args.flag("GT") {
            gt = true;
        } else if args.flag("LT") {
            lt = true;
        } else if args.flag("CH") {
            ch = true;
        } else if args.flag("INCR") {
            incr = true;
        } else {
            break;
        }
    }
    if nx && xx {
        return Err(args.error("ERR XX and NX options at the same time are not compatible"));
    }
    if (gt && lt) || (nx && (gt || lt)) {
        return Err(args.error("ERR GT, LT, and/or NX options at the same time are not compatible"));
    }
    if args.is_empty() || args.len() % 2 != 0 {
        return Err(args.syntax());
    }
    let mut pairs = Vec::with_capacity(args.len() / 2);
    while !args.is_empty() {
        let score = args.float()?;
        let member = args.bytes()?;
        pairs.push((member, score));
    }
    if incr && pairs.len() != 1 {
        return Err(args.error("ERR INCR option supports a single increment-element pair"));
    }

    if xx && store.zset(args.command(), &key)?.is_none() {
        return Ok(if incr { Reply::Nil } else { Reply::Integer(0) });
    }
    let zset = store.zset_mut(args.command(), &key)?;
    let (mut added, mut changed) = (0, 0);
    let mut last = None;
    for (member, score) in pairs {
        let existing = zset.get(&member).copied();
        let next = if incr { existing.unwrap_or(0.0) + score } else { score };
        if next.is_nan() {
            return Err(args.error("ERR resulting score is not a number (NaN)"));
        }
        let skip = match existing {
            None => xx,
            Some(old) => nx || (gt && next <= old) || (lt && next >= old),
        };
        if skip {
            continue;
        }
        match existing {
            None => added += 1,
            Some(old) if old.total_cmp(&next).is_ne() => changed += 1,
            Some(_) => {}
        }
        zset.insert(member, next);
        last = Some(next);
    }

    if incr {
        return Ok(last.map_or(Reply::Nil, score_reply));
    }
    Ok(count(if ch { added + changed } else { added }))
}

pub(super) fn zrem(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let key = args.bytes()?;
    let members = args.rest()?;
    if store.zset(args.command(), &key)?.is_none() {
        return Ok(Reply::Integer(0));
    }
    let zset = store.zset_mut(args.command(), &key)?;
    Ok(count(members.iter().filter(|m| zset.remove(*m).is_some()).count()))
}

pub(super) fn zincrby(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let key = args.bytes()?;
    let delta = args.float()?;
    let member = args.bytes()?;
    args.finish()?;
    let zset = store.zset_mut(args.command(), &key)?;
    let next = zset.get(&member).copied().unwrap_or(0.0) + delta;
    if next.is_nan() {
        return Err(args.error("ERR resulting score is not a number (NaN)"));
    }
    zset.insert(member, next);
    Ok(score_reply(next))
}

// =============================================================================
// READS
// =============================================================================

/// `ZRANDMEMBER key [count [WITHSCORES]]`
pub(super) fn zrandmember(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let key = args.bytes()?;
    let items = ordered(zset_or_empty(store, args, &key)?);
    if args.is_empty() {
        return Ok(items
            .choose(&mut rand::thread_rng())
            .map_or(Reply::Nil, |(member, _)| bulk(member.clone())));
    }
    let requested = args.int()?;
    let with_scores = args.flag("WITHSCORES");
    args.finish()?;
    Ok(render(pick(&items, requested), with_scores))
}

pub(super) fn zrank(store: &mut Store, args: &mut Args, rev: bool) -> Result<Reply> {
    let key = args.bytes()?;
    let member = args.bytes()?;
    args.finish()?;
    let items = ordered(zset_or_empty(store, args, &key)?);
    let Some(at) = items.iter().position(|(m, _)| *m == member) else {
        return Ok(Reply::Nil);
    };
    Ok(count(if rev { items.len() - 1 - at } else { at }))
}

/// `ZRANGE key start stop [WITHSCORES]` by index.
pub(super) fn zrange(store: &mut Store, args: &mut Args, rev: bool) -> Result<Reply> {
    let key = args.bytes()?;
    let start = args.int()?;
    let stop = args.int()?;
    let (with_scores, limit) = range_options(args, true)?;
    if limit.is_some() {
        return Err(args.syntax());
    }
    let mut items = ordered(zset_or_empty(store, args, &key)?);
    if rev {
        items.reverse();
    }
    let page = match window(items.len(), start, stop) {
        Some((from, to)) => items.into_iter().skip(from).take(to - from + 1).collect(),
        None => Vec::new(),
    };
    Ok(render(page, with_scores))
}

/// `ZRANGEBYSCORE key min max` or `ZREVRANGEBYSCORE key max min`, with
/// `[WITHSCORES] [LIMIT offset count]`.
pub(super) fn zrangebyscore(store: &mut Store, args: &mut Args, rev: bool) -> Result<Reply> {
    let key = args.bytes()?;
    let (min, max) = if rev {
        let max = ScoreBound::parse(args)?;
        (ScoreBound::parse(args)?, max)
    } else {
        let min = ScoreBound::parse(args)?;
        (min, ScoreBound::parse(args)?)
    };
    let (with_scores, limit) = range_options(args, true)?;

    let mut items: Vec<Scored> = ordered(zset_or_empty(store, args, &key)?)
        .into_iter()
        .filter(|(_, s)| min.below(*s) && max.above(*s))
        .collect();
    if rev {
        items.reverse();
    }
    Ok(render(apply_limit(items, limit), with_scores))
}

/// `ZRANGEBYLEX key min max` or `ZREVRANGEBYLEX key max min`, with
/// `[LIMIT offset count]`.
pub(super) fn zrangebylex(store: &mut Store, args: &mut Args, rev: bool) -> Result<Reply> {
    let key = args.bytes()?;
    let (min, max) = if rev {
        let max = LexBound::parse(args)?;
        (LexBound::parse(args)?, max)
    } else {
        let min = LexBound::parse(args)?;
        (min, LexBound::parse(args)?)
    };
    let (_, limit) = range_options(args, false)?;

    let mut items: Vec<Scored> = ordered(zset_or_empty(store, args, &key)?)
        .into_iter()
        .filter(|(m, _)| min.below(m) && max.above(m))
        .collect();
    if rev {
        items.reverse();
    }
    Ok(render(apply_limit(items, limit), false))
}

pub(super) fn zscan(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let key = args.bytes()?;
    let items = ordered(zset_or_empty(store, args, &key)?);
    let (cursor, page) = scan_page(args, items, |pattern, (member, _)| glob_match(pattern, member))?;
    Ok(Reply::Array(vec![cursor, render(page, true)]))
}

pub(super) fn zcount(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let key = args.bytes()?;
    let min = ScoreBound::parse(args)?;
    let max = ScoreBound::parse(args)?;
    args.finish()?;
    let zset = zset_or_empty(store, args, &key)?;
    Ok(count(zset.values().filter(|s| min.below(**s) && max.above(**s)).count()))
}

pub(super) fn zlexcount(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let key = args.bytes()?;
    let min = LexBound::parse(args)?;
    let max = LexBound::parse(args)?;
    args.finish()?;
    let zset = zset_or_empty(store, args, &key)?;
    Ok(count(zset.keys().filter(|m| min.below(m) && max.above(m)).count()))
}

/// `ZPOPMIN key [count]`, or `BZPOPMIN key [key ...]` with the timeout
/// stripped, replying `[key, member, score]`.
pub(super) fn zpop(store: &mut Store, args: &mut Args, max: bool) -> Result<Reply> {
    if args.command().starts_with('B') {
        for key in args.rest()? {
            let Some((member, score)) = pop_one(store, args, &key, max)? else {
                continue;
            };
            return Ok(Reply::Array(vec![bulk(key), bulk(member), score_reply(score)]));
        }
        return Ok(Reply::Nil);
    }

    let key = args.bytes()?;
    let n = if args.is_empty() {
        1
    } else {
        usize::try_from(args.int()?).map_err(|_| args.error("ERR value is out of range, must be positive"))?
    };
    args.finish()?;

    let mut popped = Vec::new();
    while popped.len() < n {
        match pop_one(store, args, &key, max)? {
            Some(item) => popped.push(item),
            None => break,
        }
    }
    Ok(render(popped, true))
}

fn pop_one(store: &mut Store, args: &Args, key: &[u8], max: bool) -> Result<Option<Scored>> {
    let Some(zset) = store.zset(args.command(), key)? else {
        return Ok(None);
    };
    let edge = zset
        .iter()
        .map(|(m, s)| (m.clone(), *s))
        .reduce(|best, next| {
            let ord = by_score(&next, &best);
            let better = if max { ord.is_gt() } else { ord.is_lt() };
            if better { next } else { best }
        });
    if let Some((member, _)) = &edge {
        store.zset_mut(args.command(), key)?.remove(member);
    }
    Ok(edge)
}

pub(super) fn zcard(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let key = args.bytes()?;
    args.finish()?;
    Ok(count(store.zset(args.command(), &key)?.map_or(0, ZSetData::len)))
}

pub(super) fn zscore(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let key = args.bytes()?;
    let member = args.bytes()?;
    args.finish()?;
    let score = store
        .zset(args.command(), &key)?
        .and_then(|z| z.get(&member).copied());
    Ok(score.map_or(Reply::Nil, score_reply))
}

pub(super) fn zmscore(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let key = args.bytes()?;
    let members = args.rest()?;
    let zset = zset_or_empty(store, args, &key)?;
    Ok(Reply::Array(
        members
            .iter()
            .map(|m| zset.get(m).copied().map_or(Reply::Nil, score_reply))
            .collect(),
    ))
}

// =============================================================================
// REMOVAL BY RANGE
// =============================================================================

fn remove_members(store: &mut Store, args: &Args, key: &[u8], doomed: Vec<Scored>) -> Result<Reply> {
    if doomed.is_empty() {
        return Ok(Reply::Integer(0));
    }
    let zset = store.zset_mut(args.command(), key)?;
    for (member, _) in &doomed {
        zset.remove(member);
    }
    Ok(count(doomed.len()))
}

pub(super) fn zremrangebyrank(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let key = args.bytes()?;
    let start = args.int()?;
    let stop = args.int()?;
    args.finish()?;
    let items = ordered(zset_or_empty(store, args, &key)?);
    let doomed = match window(items.len(), start, stop) {
        Some((from, to)) => items.into_iter().skip(from).take(to - from + 1).collect(),
        None => Vec::new(),
    };
    remove_members(store, args, &key, doomed)
}

pub(super) fn zremrangebylex(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let key = args.bytes()?;
    let min = LexBound::parse(args)?;
    let max = LexBound::parse(args)?;
    args.finish()?;
    let doomed = ordered(zset_or_empty(store, args, &key)?)
        .into_iter()
        .filter(|(m, _)| min.below(m) && max.above(m))
        .collect();
    remove_members(store, args, &key, doomed)
}

pub(super) fn zremrangebyscore(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let key = args.bytes()?;
    let min = ScoreBound::parse(args)?;
    let max = ScoreBound::parse(args)?;
    args.finish()?;
    let doomed = ordered(zset_or_empty(store, args, &key)?)
        .into_iter()
        .filter(|(_, s)| min.below(*s) && max.above(*s))
        .collect();
    remove_members(store, args, &key, doomed)
}

// =============================================================================
// COMBINATION
// =============================================================================

#[derive(Debug, Clone, Copy)]
enum Aggregate {
    Sum,
    Min,
    Max,
}

impl Aggregate {
    fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            // inf + -inf counts as zero.
            Self::Sum => {
                let sum = a + b;
                if sum.is_nan() { 0.0 } else { sum }
            }
            Self::Min => a.min(b),
            Self::Max => a.max(b),
        }
    }
}

/// Scored view of a combination source; plain sets score every member 1.
fn source(store: &mut Store, args: &Args, key: &[u8]) -> Result<ZSetData> {
    match store.data(key) {
        None => Ok(ZSetData::new()),
        Some(Data::ZSet(z)) => Ok(z.clone()),
        Some(Data::Set(s)) => Ok(s.iter().map(|m| (m.clone(), 1.0)).collect()),
        Some(_) => Err(args.error(super::store::WRONGTYPE)),
    }
}

/// `ZDIFF|ZINTER|ZUNION numkeys key [key ...] [WEIGHTS w ...]
/// [AGGREGATE SUM|MIN|MAX] [WITHSCORES]` and the `*STORE destination ...`
/// forms.
pub(super) fn combine(store: &mut Store, args: &mut Args, store_result: bool) -> Result<Reply> {
    let destination = if store_result { Some(args.bytes()?) } else { None };
    let numkeys = usize::try_from(args.int()?)
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| args.error("ERR at least 1 input key is needed for this command"))?;
    if args.len() < numkeys {
        return Err(args.syntax());
    }
    let keys: Vec<Bytes> = (0..numkeys).map(|_| args.bytes()).collect::<Result<_>>()?;

    let diff = args.command().starts_with("ZDIFF");
    let mut weights = vec![1.0; numkeys];
    let mut aggregate = Aggregate::Sum;
    let mut with_scores = false;
    while !args.is_empty() {
        if !diff && args.flag("WEIGHTS") {
            for weight in &mut weights {
                *weight = args.float().map_err(|_| args.error("ERR weight value is not a float"))?;
            }
        } else if !diff && args.flag("AGGREGATE") {
            aggregate = if args.flag("SUM") {
                Aggregate::Sum
            } else if args.flag("MIN") {
                Aggregate::Min
            } else if args.flag("MAX") {
                Aggregate::Max
            } else {
                return Err(args.syntax());
            };
        } else if !store_result && args.flag("WITHSCORES") {
            with_scores = true;
        } else {
            return Err(args.syntax());
        }
    }

    let mut sources = Vec::with_capacity(numkeys);
    for (key, weight) in keys.iter().zip(&weights) {
        let scaled: ZSetData = source(store, args, key)?
            .into_iter()
            .map(|(m, s)| {
                let scaled = s * weight;
                (m, if scaled.is_nan() { 0.0 } else { scaled })
            })
            .collect();
        sources.push(scaled);
    }

    let mut sources = sources.into_iter();
    let first = sources.next().unwrap_or_default();
    let command = args.command().trim_end_matches("STORE");
    let result = sources.fold(first, |acc, next| match command {
        "ZINTER" => acc
            .into_iter()
            .filter_map(|(m, s)| next.get(&m).map(|t| (m, aggregate.apply(s, *t))))
            .collect(),
        "ZUNION" => {
            let mut acc = acc;
            for (m, t) in next {
                acc.entry(m)
                    .and_modify(|s| *s = aggregate.apply(*s, t))
                    .or_insert(t);
            }
            acc
        }
        _ => acc.into_iter().filter(|(m, _)| !next.contains_key(m)).collect(),
    });

    match destination {
        Some(destination) => {
            let len = result.len();
            store.remove(&destination);
            if len > 0 {
                store.insert(&destination, Data::ZSet(result));
            }
            Ok(count(len))
        }
        None => Ok(render(ordered(result), with_scores)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_breaks_ties_by_member() {
        let zset: ZSetData = [(b"b".to_vec(), 1.0), (b"a".to_vec(), 1.0), (b"c".to_vec(), 0.5)]
            .into_iter()
            .collect();
        let members: Vec<Bytes> = ordered(zset).into_iter().map(|(m, _)| m).collect();
        assert_eq!(members, vec![b"c".to_vec(), b"a".to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn test_sum_of_opposite_infinities() {
        assert_eq!(Aggregate::Sum.apply(f64::INFINITY, f64::NEG_INFINITY), 0.0);
        assert_eq!(Aggregate::Max.apply(1.0, 3.0), 3.0);
    }
}
