//! String commands.

use std::time::Duration;

use tokio::time::Instant;

use keyweave_domain::{Reply, Result, format_float};

use super::store::{Bytes, Data, Store};
use super::{Args, bulk, count, parse_float, window};

fn expiry_in(args: &Args, millis: i64) -> Result<Instant> {
    if millis <= 0 {
        return Err(args.error("ERR invalid expire time in 'set' command"));
    }
    Ok(Instant::now() + Duration::from_millis(millis.unsigned_abs()))
}

fn current(store: &mut Store, args: &Args, key: &[u8]) -> Result<Option<Bytes>> {
    Ok(store.string(args.command(), key)?.cloned())
}

pub(super) fn get(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let key = args.bytes()?;
    args.finish()?;
    Ok(current(store, args, &key)?.map_or(Reply::Nil, bulk))
}

/// `SET key value [NX|XX] [PX ms]`
pub(super) fn set(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let key = args.bytes()?;
    let value = args.bytes()?;
    let (mut nx, mut xx, mut px) = (false, false, None);
    while !args.is_empty() {
        if args.flag("NX") {
            nx = true;
        } else if args.flag("XX") {
            xx = true;
        } else if args.flag("PX") {
            let millis = args.int()?;
            px = Some(expiry_in(args, millis)?);
        } else {
            return Err(args.syntax());
        }
    }
    if nx && xx {
        return Err(args.syntax());
    }

    let exists = store.contains(&key);
    if (nx && exists) || (xx && !exists) {
        return Ok(Reply::Nil);
    }
    store.insert(&key, Data::Str(value));
    store.set_expiry(&key, px);
    Ok(Reply::ok())
}

pub(super) fn mset(store: &mut Store, args: &mut Args, only_if_none_exist: bool) -> Result<Reply> {
    let items = args.rest()?;
    if items.len() % 2 != 0 {
        return Err(args.arity());
    }
    let pairs: Vec<(Bytes, Bytes)> = items
        .chunks_exact(2)
        .map(|kv| (kv[0].clone(), kv[1].clone()))
        .collect();

    if only_if_none_exist && pairs.iter().any(|(k, _)| store.contains(k)) {
        return Ok(Reply::Integer(0));
    }
    for (key, value) in pairs {
        store.insert(&key, Data::Str(value));
    }
    Ok(if only_if_none_exist { Reply::Integer(1) } else { Reply::ok() })
}

pub(super) fn mget(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let keys = args.rest()?;
    // Keys holding other types read as nil.
    Ok(Reply::Array(
        keys.iter()
            .map(|k| match store.data(k) {
                Some(Data::Str(v)) => bulk(v.clone()),
                _ => Reply::Nil,
            })
            .collect(),
    ))
}

pub(super) fn getdel(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let key = args.bytes()?;
    args.finish()?;
    let value = current(store, args, &key)?;
    if value.is_some() {
        store.remove(&key);
    }
    Ok(value.map_or(Reply::Nil, bulk))
}

/// `GETEX key [PX ms | PERSIST]`
pub(super) fn getex(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let key = args.bytes()?;
    let value = current(store, args, &key)?;
    if args.flag("PX") {
        let millis = args.int()?;
        let at = expiry_in(args, millis)?;
        store.set_expiry(&key, Some(at));
    } else if args.flag("PERSIST") {
        store.set_expiry(&key, None);
    }
    args.finish()?;
    Ok(value.map_or(Reply::Nil, bulk))
}

pub(super) fn getset(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let key = args.bytes()?;
    let value = args.bytes()?;
    args.finish()?;
    let previous = current(store, args, &key)?;
    store.insert(&key, Data::Str(value));
    Ok(previous.map_or(Reply::Nil, bulk))
}

pub(super) fn incrby(store: &mut Store, args: &mut Args, negate: bool) -> Result<Reply> {
    let key = args.bytes()?;
    let delta = args.int()?;
    args.finish()?;
    let delta = if negate { delta.checked_neg() } else { Some(delta) };

    let base = match current(store, args, &key)? {
        Some(raw) => std::str::from_utf8(&raw)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| args.error("ERR value is not an integer or out of range"))?,
        None => 0,
    };
    let next = delta
        .and_then(|d| base.checked_add(d))
        .ok_or_else(|| args.error("ERR increment or decrement would overflow"))?;
    store.replace_string(&key, next.to_string().into_bytes());
    Ok(Reply::Integer(next))
}

pub(super) fn incrbyfloat(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let key = args.bytes()?;
    let delta = args.float()?;
    args.finish()?;
    let base = match current(store, args, &key)? {
        Some(raw) => parse_float(&raw).ok_or_else(|| args.error("ERR value is not a valid float"))?,
        None => 0.0,
    };
    let next = base + delta;
    if !next.is_finite() {
        return Err(args.error("ERR increment would produce NaN or Infinity"));
    }
    let text = format_float(next).into_bytes();
    store.replace_string(&key, text.clone());
    Ok(bulk(text))
}

pub(super) fn append(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let key = args.bytes()?;
    let suffix = args.bytes()?;
    args.finish()?;
    let value = store.string_mut(args.command(), &key)?;
    value.extend_from_slice(&suffix);
    Ok(count(value.len()))
}

pub(super) fn getrange(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let key = args.bytes()?;
    let start = args.int()?;
    let end = args.int()?;
    args.finish()?;
    let value = current(store, args, &key)?.unwrap_or_default();
    Ok(bulk(match window(value.len(), start, end) {
        Some((from, to)) => value[from..=to].to_vec(),
        None => Vec::new(),
    }))
}

pub(super) fn setrange(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let key = args.bytes()?;
    let offset = usize::try_from(args.int()?).map_err(|_| args.error("ERR offset is out of range"))?;
    let patch = args.bytes()?;
    args.finish()?;
    if patch.is_empty() {
        let len = current(store, args, &key)?.map_or(0, |v| v.len());
        return Ok(count(len));
    }
    let value = store.string_mut(args.command(), &key)?;
    if value.len() < offset + patch.len() {
        value.resize(offset + patch.len(), 0);
    }
    value[offset..offset + patch.len()].copy_from_slice(&patch);
    Ok(count(value.len()))
}

pub(super) fn strlen(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let key = args.bytes()?;
    args.finish()?;
    Ok(count(current(store, args, &key)?.map_or(0, |v| v.len())))
}

pub(super) fn setbit(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let key = args.bytes()?;
    let offset = usize::try_from(args.int()?).map_err(|_| args.error("ERR bit offset is not an integer or out of range"))?;
    let bit = match args.int()? {
        0 => false,
        1 => true,
        _ => return Err(args.error("ERR bit is not an integer or out of range")),
    };
    args.finish()?;

    let value = store.string_mut(args.command(), &key)?;
    let byte = offset / 8;
    let mask = 0x80u8 >> (offset % 8);
    if value.len() <= byte {
        value.resize(byte + 1, 0);
    }
    let previous = value[byte] & mask != 0;
    if bit {
        value[byte] |= mask;
    } else {
        value[byte] &= !mask;
    }
    Ok(Reply::Integer(i64::from(previous)))
}

pub(super) fn getbit(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let key = args.bytes()?;
    let offset = usize::try_from(args.int()?).map_err(|_| args.error("ERR bit offset is not an integer or out of range"))?;
    args.finish()?;
    let value = current(store, args, &key)?.unwrap_or_default();
    let set = value
        .get(offset / 8)
        .is_some_and(|b| b & (0x80u8 >> (offset % 8)) != 0);
    Ok(Reply::Integer(i64::from(set)))
}
