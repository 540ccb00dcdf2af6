//! Keyspace commands.

use std::time::Duration;

use tokio::time::Instant;

use keyweave_domain::{Reply, Result};

use super::store::{Store, glob_match};
use super::{Args, bulk_array, count, scan_page};

pub(super) fn del(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let keys = args.rest()?;
    Ok(count(keys.iter().filter(|k| store.remove(k).is_some()).count()))
}

pub(super) fn exists(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let keys = args.rest()?;
    Ok(count(keys.iter().filter(|k| store.contains(k)).count()))
}

pub(super) fn pexpire(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let key = args.bytes()?;
    let millis = args.int()?;
    args.finish()?;
    if millis <= 0 {
        return Ok(count(usize::from(store.remove(&key).is_some())));
    }
    let at = Instant::now() + Duration::from_millis(millis.unsigned_abs());
    Ok(count(usize::from(store.set_expiry(&key, Some(at)))))
}

pub(super) fn scan(store: &mut Store, args: &mut Args) -> Result<Reply> {
    let keys = store.keys();
    let (cursor, page) = scan_page(args, keys, |pattern, key| glob_match(pattern, key))?;
    Ok(Reply::Array(vec![cursor, bulk_array(page)]))
}
