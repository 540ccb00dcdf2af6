//! Set commands.

use keyweave_domain::{Reply, Result};
use rand::seq::SliceRandom;

use super::hashes::pick;
use super::store::{Data, SetData, Store, glob_match};
use super::{Args, bulk, bulk_array, count, scan_page};

fn set_or_empty(store: &mut Store, args: &Args, key: &[u8]) -> Result<SetData> {
    Ok(store.set(args.command(), key)?.cloned().unwrap_or_default())
}

pub(super) fn sadd(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let key = args.bytes()?;
    let members = args.rest()?;
    let set = store.set_mut(args.command(), &key)?;
    Ok(count(members.into_iter().filter(|m| set.insert(m.clone())).count()))
}

pub(super) fn srem(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let key = args.bytes()?;
    let members = args.rest()?;
    if store.set(args.command(), &key)?.is_none() {
        return Ok(Reply::Integer(0));
    }
    let set = store.set_mut(args.command(), &key)?;
    Ok(count(members.iter().filter(|m| set.remove(*m)).count()))
}

/// `SPOP key [count]`
pub(super) fn spop(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let key = args.bytes()?;
    let many = if args.is_empty() {
        None
    } else {
        Some(usize::try_from(args.int()?).map_err(|_| args.error("ERR value is out of range, must be positive"))?)
    };
    args.finish()?;

    let members: Vec<Vec<u8>> = set_or_empty(store, args, &key)?.into_iter().collect();
    if members.is_empty() {
        return Ok(many.map_or(Reply::Nil, |_| Reply::Array(Vec::new())));
    }
    let picked = match many {
        None => members.choose(&mut rand::thread_rng()).cloned().into_iter().collect(),
        Some(n) => pick(&members, i64::try_from(n).unwrap_or(i64::MAX)),
    };
    let set = store.set_mut(args.command(), &key)?;
    for member in &picked {
        set.remove(member);
    }
    Ok(match many {
        None => picked.into_iter().next().map_or(Reply::Nil, bulk),
        Some(_) => bulk_array(picked),
    })
}

pub(super) fn smove(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let source = args.bytes()?;
    let destination = args.bytes()?;
    let member = args.bytes()?;
    args.finish()?;

    let present = store
        .set(args.command(), &source)?
        .is_some_and(|s| s.contains(&member));
    store.set(args.command(), &destination)?;
    if !present {
        return Ok(Reply::Integer(0));
    }
    store.set_mut(args.command(), &source)?.remove(&member);
    store.set_mut(args.command(), &destination)?.insert(member);
    Ok(Reply::Integer(1))
}

pub(super) fn scard(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let key = args.bytes()?;
    args.finish()?;
    Ok(count(store.set(args.command(), &key)?.map_or(0, SetData::len)))
}

pub(super) fn sismember(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let key = args.bytes()?;
    let member = args.bytes()?;
    args.finish()?;
    let present = store
        .set(args.command(), &key)?
        .is_some_and(|s| s.contains(&member));
    Ok(Reply::Integer(i64::from(present)))
}

pub(super) fn smismember(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let key = args.bytes()?;
    let members = args.rest()?;
    let set = set_or_empty(store, args, &key)?;
    Ok(Reply::Array(
        members
            .iter()
            .map(|m| Reply::Integer(i64::from(set.contains(m))))
            .collect(),
    ))
}

/// `SINTER|SUNION|SDIFF key [key ...]` and their `*STORE destination key
/// [key ...]` forms.
pub(super) fn algebra(store: &mut Store, args: &mut Args, store_result: bool) -> Result<Reply> {
    let destination = if store_result { Some(args.bytes()?) } else { None };
    let keys = args.rest()?;

    let mut sources = Vec::with_capacity(keys.len());
    for key in &keys {
        sources.push(set_or_empty(store, args, key)?);
    }
    let mut sources = sources.into_iter();
    let first = sources.next().unwrap_or_default();
    let command = args.command().trim_end_matches("STORE");
    let result: SetData = sources.fold(first, |acc, next| match command {
        "SINTER" => acc.intersection(&next).cloned().collect(),
        "SUNION" => acc.union(&next).cloned().collect(),
        _ => acc.difference(&next).cloned().collect(),
    });

    match destination {
        Some(destination) => {
            let len = result.len();
            store.remove(&destination);
            if len > 0 {
                store.insert(&destination, Data::Set(result));
            }
            Ok(count(len))
        }
        None => Ok(bulk_array(result)),
    }
}

pub(super) fn smembers(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let key = args.bytes()?;
    args.finish()?;
    Ok(bulk_array(set_or_empty(store, args, &key)?))
}

pub(super) fn sscan(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let key = args.bytes()?;
    let members: Vec<Vec<u8>> = set_or_empty(store, args, &key)?.into_iter().collect();
    let (cursor, page) = scan_page(args, members, |pattern, member| glob_match(pattern, member))?;
    Ok(Reply::Array(vec![cursor, bulk_array(page)]))
}

/// `SRANDMEMBER key [count]`
pub(super) fn srandmember(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let key = args.bytes()?;
    let members: Vec<Vec<u8>> = set_or_empty(store, args, &key)?.into_iter().collect();
    if args.is_empty() {
        return Ok(members
            .choose(&mut rand::thread_rng())
            .map_or(Reply::Nil, |member| bulk(member.clone())));
    }
    let requested = args.int()?;
    args.finish()?;
    Ok(bulk_array(pick(&members, requested)))
}
