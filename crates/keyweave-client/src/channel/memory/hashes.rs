//! Hash commands.

use keyweave_domain::{Reply, Result, format_float};
use rand::Rng;
use rand::seq::SliceRandom;

use super::store::{Bytes, HashData, Store, glob_match};
use super::{Args, bulk, bulk_array, count, parse_float, scan_page};

fn hash_or_empty(store: &mut Store, args: &Args, key: &[u8]) -> Result<HashData> {
    Ok(store.hash(args.command(), key)?.cloned().unwrap_or_default())
}

/// `HSET key field value [field value ...]`
pub(super) fn hset(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let key = args.bytes()?;
    let items = args.rest()?;
    if items.len() % 2 != 0 {
        return Err(args.arity());
    }
    let hash = store.hash_mut(args.command(), &key)?;
    let mut added = 0;
    for pair in items.chunks_exact(2) {
        if hash.insert(pair[0].clone(), pair[1].clone()).is_none() {
            added += 1;
        }
    }
    Ok(count(added))
}

pub(super) fn hsetnx(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let key = args.bytes()?;
    let field = args.bytes()?;
    let value = args.bytes()?;
    args.finish()?;
    let hash = store.hash_mut(args.command(), &key)?;
    if hash.contains_key(&field) {
        return Ok(Reply::Integer(0));
    }
    hash.insert(field, value);
    Ok(Reply::Integer(1))
}

pub(super) fn hget(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let key = args.bytes()?;
    let field = args.bytes()?;
    args.finish()?;
    let value = store
        .hash(args.command(), &key)?
        .and_then(|h| h.get(&field).cloned());
    Ok(value.map_or(Reply::Nil, bulk))
}

pub(super) fn hmget(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let key = args.bytes()?;
    let fields = args.rest()?;
    let hash = hash_or_empty(store, args, &key)?;
    Ok(Reply::Array(
        fields
            .iter()
            .map(|f| hash.get(f).cloned().map_or(Reply::Nil, bulk))
            .collect(),
    ))
}

pub(super) fn hdel(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let key = args.bytes()?;
    let fields = args.rest()?;
    if !store.contains(&key) {
        return Ok(Reply::Integer(0));
    }
    let hash = store.hash_mut(args.command(), &key)?;
    Ok(count(fields.iter().filter(|f| hash.remove(*f).is_some()).count()))
}

pub(super) fn hexists(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let key = args.bytes()?;
    let field = args.bytes()?;
    args.finish()?;
    let present = store
        .hash(args.command(), &key)?
        .is_some_and(|h| h.contains_key(&field));
    Ok(Reply::Integer(i64::from(present)))
}

pub(super) fn hincrby(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let key = args.bytes()?;
    let field = args.bytes()?;
    let delta = args.int()?;
    args.finish()?;

    let current = store
        .hash(args.command(), &key)?
        .and_then(|h| h.get(&field).cloned());
    let base = match current {
        Some(raw) => std::str::from_utf8(&raw)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| args.error("ERR hash value is not an integer"))?,
        None => 0,
    };
    let next = base
        .checked_add(delta)
        .ok_or_else(|| args.error("ERR increment or decrement would overflow"))?;
    store
        .hash_mut(args.command(), &key)?
        .insert(field, next.to_string().into_bytes());
    Ok(Reply::Integer(next))
}

pub(super) fn hincrbyfloat(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let key = args.bytes()?;
    let field = args.bytes()?;
    let delta = args.float()?;
    args.finish()?;

    let current = store
        .hash(args.command(), &key)?
        .and_then(|h| h.get(&field).cloned());
    let base = match current {
        Some(raw) => parse_float(&raw).ok_or_else(|| args.error("ERR hash value is not a float"))?,
        None => 0.0,
    };
    let next = base + delta;
    if !next.is_finite() {
        return Err(args.error("ERR increment would produce NaN or Infinity"));
    }
    let text = format_float(next).into_bytes();
    store.hash_mut(args.command(), &key)?.insert(field, text.clone());
    Ok(bulk(text))
}

/// `HRANDFIELD key [count [WITHVALUES]]`
pub(super) fn hrandfield(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let key = args.bytes()?;
    let hash = hash_or_empty(store, args, &key)?;
    let entries: Vec<(Bytes, Bytes)> = hash.into_iter().collect();

    if args.is_empty() {
        return Ok(entries
            .choose(&mut rand::thread_rng())
            .map_or(Reply::Nil, |(field, _)| bulk(field.clone())));
    }

    let requested = args.int()?;
    let with_values = args.flag("WITHVALUES");
    args.finish()?;

    let picked = pick(&entries, requested);
    let mut out = Vec::new();
    for (field, value) in picked {
        out.push(bulk(field));
        if with_values {
            out.push(bulk(value));
        }
    }
    Ok(Reply::Array(out))
}

/// Random selection following the `*RANDMEMBER` count rules: a positive
/// count yields distinct items, a negative one allows repeats.
pub(super) fn pick<T: Clone>(items: &[T], requested: i64) -> Vec<T> {
    if items.is_empty() || requested == 0 {
        return Vec::new();
    }
    let wanted = usize::try_from(requested.unsigned_abs()).unwrap_or(usize::MAX);
    let mut rng = rand::thread_rng();
    if requested < 0 {
        return (0..wanted)
            .map(|_| items[rng.gen_range(0..items.len())].clone())
            .collect();
    }
    items.choose_multiple(&mut rng, wanted).cloned().collect()
}

pub(super) fn hkeys(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let key = args.bytes()?;
    args.finish()?;
    Ok(bulk_array(hash_or_empty(store, args, &key)?.into_keys()))
}

pub(super) fn hvals(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let key = args.bytes()?;
    args.finish()?;
    Ok(bulk_array(hash_or_empty(store, args, &key)?.into_values()))
}

pub(super) fn hlen(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let key = args.bytes()?;
    args.finish()?;
    Ok(count(store.hash(args.command(), &key)?.map_or(0, HashData::len)))
}

pub(super) fn hgetall(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let key = args.bytes()?;
    args.finish()?;
    Ok(bulk_array(
        hash_or_empty(store, args, &key)?
            .into_iter()
            .flat_map(|(f, v)| [f, v]),
    ))
}

pub(super) fn hscan(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let key = args.bytes()?;
    let entries: Vec<(Bytes, Bytes)> = hash_or_empty(store, args, &key)?.into_iter().collect();
    let (cursor, page) = scan_page(args, entries, |pattern, (field, _)| glob_match(pattern, field))?;
    Ok(Reply::Array(vec![
        cursor,
        bulk_array(page.into_iter().flat_map(|(f, v)| [f, v])),
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_distinct() {
        let items = vec![1, 2, 3, 4];
        let mut picked = pick(&items, 3);
        picked.sort_unstable();
        picked.dedup();
        assert_eq!(picked.len(), 3);
        assert_eq!(pick(&items, 10).len(), 4);
    }

    #[test]
    fn test_pick_with_repeats() {
        assert_eq!(pick(&[7], -5), vec![7; 5]);
        assert!(pick::<i32>(&[], -5).is_empty());
    }

    #[test]
    fn test_pick_reaches_every_item() {
        let items = [1, 2, 3];
        let mut drawn = pick(&items, -300);
        assert_eq!(drawn.len(), 300);
        drawn.sort_unstable();
        drawn.dedup();
        assert_eq!(drawn, items);

        let mut first: Vec<i32> = (0..200).filter_map(|_| pick(&items, 1).first().copied()).collect();
        first.sort_unstable();
        first.dedup();
        assert_eq!(first, items);
    }
}
