//! Keyspace of the in-memory channel.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use tokio::time::Instant;

use keyweave_domain::{CacheError, Result};

pub(super) type Bytes = Vec<u8>;
pub(super) type HashData = BTreeMap<Bytes, Bytes>;
pub(super) type ListData = VecDeque<Bytes>;
pub(super) type SetData = BTreeSet<Bytes>;
pub(super) type ZSetData = BTreeMap<Bytes, f64>;

pub(super) const WRONGTYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";

/// Value stored under a key
#[derive(Debug, Clone)]
pub(super) enum Data {
    Str(Bytes),
    Hash(HashData),
    List(ListData),
    Set(SetData),
    ZSet(ZSetData),
}

impl Data {
    fn is_empty_collection(&self) -> bool {
        match self {
            Self::Str(_) => false,
            Self::Hash(h) => h.is_empty(),
            Self::List(l) => l.is_empty(),
            Self::Set(s) => s.is_empty(),
            Self::ZSet(z) => z.is_empty(),
        }
    }
}

#[derive(Debug)]
struct Entry {
    data: Data,
    expires_at: Option<Instant>,
}

/// Keyspace with lazy expiry
#[derive(Debug, Default)]
pub(super) struct Store {
    entries: HashMap<Bytes, Entry>,
}

macro_rules! typed_access {
    ($get:ident, $get_mut:ident, $variant:ident, $ty:ty) => {
        pub(super) fn $get(&mut self, command: &str, key: &[u8]) -> Result<Option<&$ty>> {
            match self.data(key) {
                None => Ok(None),
                Some(Data::$variant(value)) => Ok(Some(value)),
                Some(_) => Err(CacheError::server(command, WRONGTYPE)),
            }
        }

        /// Mutable access, creating an empty value when the key is absent.
        pub(super) fn $get_mut(&mut self, command: &str, key: &[u8]) -> Result<&mut $ty> {
            self.evict_if_expired(key);
            let entry = self.entries.entry(key.to_vec()).or_insert_with(|| Entry {
                data: Data::$variant(<$ty>::default()),
                expires_at: None,
            });
            match &mut entry.data {
                Data::$variant(value) => Ok(value),
                _ => Err(CacheError::server(command, WRONGTYPE)),
            }
        }
    };
}

impl Store {
    typed_access!(string, string_mut, Str, Bytes);
    typed_access!(hash, hash_mut, Hash, HashData);
    typed_access!(list, list_mut, List, ListData);
    typed_access!(set, set_mut, Set, SetData);
    typed_access!(zset, zset_mut, ZSet, ZSetData);

    fn evict_if_expired(&mut self, key: &[u8]) {
        let expired = self
            .entries
            .get(key)
            .and_then(|e| e.expires_at)
            .is_some_and(|at| at <= Instant::now());
        if expired {
            self.entries.remove(key);
        }
    }

    pub(super) fn data(&mut self, key: &[u8]) -> Option<&Data> {
        self.evict_if_expired(key);
        self.entries.get(key).map(|e| &e.data)
    }

    pub(super) fn contains(&mut self, key: &[u8]) -> bool {
        self.data(key).is_some()
    }

    /// Store `data` under `key`, clearing any expiry.
    pub(super) fn insert(&mut self, key: &[u8], data: Data) {
        self.entries.insert(
            key.to_vec(),
            Entry {
                data,
                expires_at: None,
            },
        );
    }

    /// Replace the value, keeping the existing expiry.
    pub(super) fn replace_string(&mut self, key: &[u8], value: Bytes) {
        self.evict_if_expired(key);
        match self.entries.get_mut(key) {
            Some(entry) => entry.data = Data::Str(value),
            None => self.insert(key, Data::Str(value)),
        }
    }

    pub(super) fn remove(&mut self, key: &[u8]) -> Option<Data> {
        self.evict_if_expired(key);
        self.entries.remove(key).map(|e| e.data)
    }

    pub(super) fn set_expiry(&mut self, key: &[u8], at: Option<Instant>) -> bool {
        self.evict_if_expired(key);
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.expires_at = at;
                true
            }
            None => false,
        }
    }

    /// Drop keys left holding empty collections.
    pub(super) fn prune(&mut self) {
        self.entries.retain(|_, e| !e.data.is_empty_collection());
    }

    /// Live keys in byte order
    pub(super) fn keys(&mut self) -> Vec<Bytes> {
        let now = Instant::now();
        self.entries
            .retain(|_, e| e.expires_at.is_none_or(|at| at > now));
        let mut keys: Vec<Bytes> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }
}

/// Glob match supporting `*`, `?`, `[...]` classes and `\` escapes.
pub(super) fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        let next = match pattern.get(p) {
            Some(b'*') => {
                star = Some((p, t));
                p += 1;
                continue;
            }
            Some(b'?') => Some(p + 1),
            Some(b'[') => {
                let (matched, after) = match_class(pattern, p, text[t]);
                matched.then_some(after)
            }
            Some(b'\\') if pattern.get(p + 1) == Some(&text[t]) => Some(p + 2),
            Some(&c) if c != b'\\' && c == text[t] => Some(p + 1),
            _ => None,
        };
        match (next, star) {
            (Some(next), _) => {
                p = next;
                t += 1;
            }
            (None, Some((sp, st))) => {
                p = sp + 1;
                t = st + 1;
                star = Some((sp, st + 1));
            }
            (None, None) => return false,
        }
    }

    pattern[p..].iter().all(|&c| c == b'*')
}

/// Test `c` against the class opening at `pattern[open]`. Returns the
/// verdict and the index just past the closing `]`; an unterminated class
/// runs to the end of the pattern.
fn match_class(pattern: &[u8], open: usize, c: u8) -> (bool, usize) {
    let mut i = open + 1;
    let negate = pattern.get(i) == Some(&b'^');
    if negate {
        i += 1;
    }

    let mut matched = false;
    while i < pattern.len() && pattern[i] != b']' {
        if pattern[i] == b'\\' && i + 1 < pattern.len() {
            matched |= pattern[i + 1] == c;
            i += 2;
        } else if i + 2 < pattern.len() && pattern[i + 1] == b'-' && pattern[i + 2] != b']' {
            let (lo, hi) = if pattern[i] <= pattern[i + 2] {
                (pattern[i], pattern[i + 2])
            } else {
                (pattern[i + 2], pattern[i])
            };
            matched |= (lo..=hi).contains(&c);
            i += 3;
        } else {
            matched |= pattern[i] == c;
            i += 1;
        }
    }

    (matched != negate, (i + 1).min(pattern.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob() {
        assert!(glob_match(b"user:*", b"user:42"));
        assert!(glob_match(b"*", b""));
        assert!(glob_match(b"a?c", b"abc"));
        assert!(!glob_match(b"a?c", b"ac"));
        assert!(glob_match(b"*:end", b"x:y:end"));
        assert!(glob_match(b"\\*", b"*"));
        assert!(!glob_match(b"\\*", b"a"));
    }

    #[test]
    fn test_glob_classes() {
        assert!(glob_match(b"[hl]*", b"hash"));
        assert!(glob_match(b"[hl]*", b"list"));
        assert!(!glob_match(b"[hl]*", b"set"));
        assert!(glob_match(b"user:[0-9]", b"user:7"));
        assert!(!glob_match(b"user:[0-9]", b"user:x"));
        assert!(glob_match(b"[z-a]", b"q"));
        assert!(glob_match(b"[^abc]x", b"dx"));
        assert!(!glob_match(b"[^abc]x", b"ax"));
        assert!(glob_match(b"[\\]]", b"]"));
        assert!(glob_match(b"a[-]b", b"a-b"));
        assert!(glob_match(b"*[0-9]", b"item:42"));
        assert!(!glob_match(b"[abc", b"d"));
    }

    #[test]
    fn test_wrong_type() {
        let mut store = Store::default();
        store.insert(b"k", Data::Str(b"v".to_vec()));
        assert!(store.hash("HGET", b"k").is_err());
        assert!(store.string("GET", b"k").unwrap().is_some());
    }

    #[test]
    fn test_empty_collection_pruned() {
        let mut store = Store::default();
        store.list_mut("RPUSH", b"l").unwrap().push_back(b"x".to_vec());
        store.list_mut("LPOP", b"l").unwrap().pop_front();
        store.prune();
        assert!(!store.contains(b"l"));
    }
}
