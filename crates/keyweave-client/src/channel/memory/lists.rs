//! List commands.

use keyweave_domain::{Reply, Result};

use super::store::{ListData, Store};
use super::{Args, bulk, bulk_array, count, window};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Side {
    Left,
    Right,
}

impl Side {
    fn parse(args: &mut Args) -> Result<Self> {
        if args.flag("LEFT") {
            Ok(Self::Left)
        } else if args.flag("RIGHT") {
            Ok(Self::Right)
        } else {
            Err(args.syntax())
        }
    }
}

fn take(list: &mut ListData, side: Side) -> Option<Vec<u8>> {
    match side {
        Side::Left => list.pop_front(),
        Side::Right => list.pop_back(),
    }
}

fn put(list: &mut ListData, side: Side, value: Vec<u8>) {
    match side {
        Side::Left => list.push_front(value),
        Side::Right => list.push_back(value),
    }
}

fn list_len(store: &mut Store, args: &Args, key: &[u8]) -> Result<usize> {
    Ok(store.list(args.command(), key)?.map_or(0, ListData::len))
}

pub(super) fn push(store: &mut Store, args: &mut Args, side: Side, only_if_exists: bool) -> Result<Reply> {
    let key = args.bytes()?;
    let values = args.rest()?;
    if only_if_exists && list_len(store, args, &key)? == 0 {
        return Ok(Reply::Integer(0));
    }
    let list = store.list_mut(args.command(), &key)?;
    for value in values {
        put(list, side, value);
    }
    Ok(count(list.len()))
}

/// `LPOP key [count]`, or the blocking form `BLPOP key [key ...]` with the
/// timeout already stripped.
pub(super) fn pop(store: &mut Store, args: &mut Args, side: Side) -> Result<Reply> {
    if args.command().starts_with('B') {
        for key in args.rest()? {
            if list_len(store, args, &key)? > 0 {
                let list = store.list_mut(args.command(), &key)?;
                if let Some(value) = take(list, side) {
                    return Ok(Reply::Array(vec![bulk(key), bulk(value)]));
                }
            }
        }
        return Ok(Reply::Nil);
    }

    let key = args.bytes()?;
    let many = if args.is_empty() {
        None
    } else {
        Some(usize::try_from(args.int()?).map_err(|_| args.error("ERR value is out of range, must be positive"))?)
    };
    args.finish()?;

    if list_len(store, args, &key)? == 0 {
        return Ok(Reply::Nil);
    }
    let list = store.list_mut(args.command(), &key)?;
    Ok(match many {
        None => take(list, side).map_or(Reply::Nil, bulk),
        Some(n) => bulk_array((0..n).map_while(|_| take(list, side))),
    })
}

/// `LINSERT key BEFORE|AFTER pivot value`
pub(super) fn linsert(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let key = args.bytes()?;
    let after = if args.flag("BEFORE") {
        false
    } else if args.flag("AFTER") {
        true
    } else {
        return Err(args.syntax());
    };
    let pivot = args.bytes()?;
    let value = args.bytes()?;
    args.finish()?;

    if list_len(store, args, &key)? == 0 {
        return Ok(Reply::Integer(0));
    }
    let list = store.list_mut(args.command(), &key)?;
    let Some(at) = list.iter().position(|v| *v == pivot) else {
        return Ok(Reply::Integer(-1));
    };
    list.insert(if after { at + 1 } else { at }, value);
    Ok(count(list.len()))
}

fn resolve(len: usize, index: i64) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let index = if index < 0 { len + index } else { index };
    (0..len).contains(&index).then(|| usize::try_from(index).ok()).flatten()
}

pub(super) fn lset(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let key = args.bytes()?;
    let index = args.int()?;
    let value = args.bytes()?;
    args.finish()?;

    let len = list_len(store, args, &key)?;
    if len == 0 {
        return Err(args.error("ERR no such key"));
    }
    let at = resolve(len, index).ok_or_else(|| args.error("ERR index out of range"))?;
    store.list_mut(args.command(), &key)?[at] = value;
    Ok(Reply::ok())
}

/// `LREM key count value`: a positive count removes from the head, a
/// negative one from the tail, zero removes every occurrence.
pub(super) fn lrem(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let key = args.bytes()?;
    let limit = args.int()?;
    let value = args.bytes()?;
    args.finish()?;

    if list_len(store, args, &key)? == 0 {
        return Ok(Reply::Integer(0));
    }
    let list = store.list_mut(args.command(), &key)?;
    let max = if limit == 0 {
        usize::MAX
    } else {
        usize::try_from(limit.unsigned_abs()).unwrap_or(usize::MAX)
    };

    let mut removed = 0;
    let mut kept: Vec<Vec<u8>> = Vec::with_capacity(list.len());
    let items: Vec<Vec<u8>> = if limit < 0 {
        list.drain(..).rev().collect()
    } else {
        list.drain(..).collect()
    };
    for item in items {
        if removed < max && item == value {
            removed += 1;
        } else {
            kept.push(item);
        }
    }
    if limit < 0 {
        kept.reverse();
    }
    list.extend(kept);
    Ok(count(removed))
}

pub(super) fn lindex(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let key = args.bytes()?;
    let index = args.int()?;
    args.finish()?;
    let value = store.list(args.command(), &key)?.and_then(|list| {
        resolve(list.len(), index).and_then(|at| list.get(at).cloned())
    });
    Ok(value.map_or(Reply::Nil, bulk))
}

/// `LPOS key element [RANK rank] [COUNT n]`
pub(super) fn lpos(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let key = args.bytes()?;
    let element = args.bytes()?;
    let mut rank = 1i64;
    let mut limit: Option<usize> = None;
    while !args.is_empty() {
        if args.flag("RANK") {
            rank = args.int()?;
            if rank == 0 {
                return Err(args.error("ERR RANK can't be zero"));
            }
        } else if args.flag("COUNT") {
            limit = Some(usize::try_from(args.int()?).map_err(|_| args.error("ERR COUNT can't be negative"))?);
        } else {
            return Err(args.syntax());
        }
    }

    let list = store.list(args.command(), &key)?.cloned().unwrap_or_default();
    let indexes: Box<dyn Iterator<Item = usize>> = if rank > 0 {
        Box::new(0..list.len())
    } else {
        Box::new((0..list.len()).rev())
    };
    let skip = usize::try_from(rank.unsigned_abs() - 1).unwrap_or(usize::MAX);
    let mut found = indexes.filter(|&i| list[i] == element).skip(skip);

    Ok(match limit {
        None => found.next().map_or(Reply::Nil, count),
        Some(0) => Reply::Array(found.map(count).collect()),
        Some(n) => Reply::Array(found.take(n).map(count).collect()),
    })
}

pub(super) fn lrange(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let key = args.bytes()?;
    let start = args.int()?;
    let stop = args.int()?;
    args.finish()?;
    let list = store.list(args.command(), &key)?.cloned().unwrap_or_default();
    Ok(match window(list.len(), start, stop) {
        Some((from, to)) => bulk_array(list.into_iter().skip(from).take(to - from + 1)),
        None => Reply::Array(Vec::new()),
    })
}

pub(super) fn ltrim(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let key = args.bytes()?;
    let start = args.int()?;
    let stop = args.int()?;
    args.finish()?;
    let len = list_len(store, args, &key)?;
    if len == 0 {
        return Ok(Reply::ok());
    }
    let list = store.list_mut(args.command(), &key)?;
    match window(len, start, stop) {
        Some((from, to)) => {
            list.truncate(to + 1);
            list.drain(..from);
        }
        None => list.clear(),
    }
    Ok(Reply::ok())
}

pub(super) fn llen(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let key = args.bytes()?;
    args.finish()?;
    Ok(count(list_len(store, args, &key)?))
}

/// `LMOVE source destination LEFT|RIGHT LEFT|RIGHT`, also serving `BLMOVE`
/// with the timeout stripped.
pub(super) fn lmove(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let source = args.bytes()?;
    let destination = args.bytes()?;
    let from = Side::parse(args)?;
    let to = Side::parse(args)?;
    args.finish()?;

    if list_len(store, args, &source)? == 0 {
        return Ok(Reply::Nil);
    }
    // Type-check the destination before mutating the source.
    store.list(args.command(), &destination)?;

    let Some(value) = take(store.list_mut(args.command(), &source)?, from) else {
        return Ok(Reply::Nil);
    };
    put(store.list_mut(args.command(), &destination)?, to, value.clone());
    Ok(bulk(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve() {
        assert_eq!(resolve(3, 0), Some(0));
        assert_eq!(resolve(3, -1), Some(2));
        assert_eq!(resolve(3, 3), None);
        assert_eq!(resolve(3, -4), None);
    }
}
