//! # Typed Decoding
//!
//! Converts untyped [`Reply`] values into caller-requested types. Every
//! conversion is strict: a reply that cannot be represented exactly in the
//! target type fails with a [`DecodeError`] naming the expected type and the
//! actual reply shape. Nothing is truncated, rounded or defaulted.

use std::collections::HashMap;
use std::hash::Hash;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::command::ToArg;
use crate::error::{CacheError, DecodeError};
use crate::reply::Reply;

/// Largest integer magnitude an `f64` holds exactly.
const F64_EXACT_INT: i64 = 1 << 53;

/// Types that can be produced from a raw reply.
pub trait FromReply: Sized {
    fn from_reply(reply: Reply) -> Result<Self, DecodeError>;
}

/// Decode a raw reply into `T`.
pub fn decode<T: FromReply>(reply: Reply) -> Result<T, DecodeError> {
    T::from_reply(reply)
}

fn mismatch(expected: &'static str, reply: &Reply) -> DecodeError {
    DecodeError::new(expected, reply.shape())
}

fn text_of(expected: &'static str, reply: &Reply) -> Result<String, DecodeError> {
    match reply {
        Reply::Bulk(bytes) => std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| mismatch(expected, reply)),
        Reply::Status(text) => Ok(text.clone()),
        _ => Err(mismatch(expected, reply)),
    }
}

impl FromReply for Reply {
    fn from_reply(reply: Reply) -> Result<Self, DecodeError> {
        Ok(reply)
    }
}

impl FromReply for () {
    fn from_reply(_reply: Reply) -> Result<Self, DecodeError> {
        Ok(())
    }
}

impl FromReply for String {
    fn from_reply(reply: Reply) -> Result<Self, DecodeError> {
        match reply {
            Reply::Bulk(bytes) => {
                Self::from_utf8(bytes).map_err(|e| DecodeError::new("string", format!("binary({} bytes)", e.as_bytes().len())))
            }
            Reply::Status(text) => Ok(text),
            Reply::Integer(n) => Ok(n.to_string()),
            Reply::Double(d) => Ok(d.to_string()),
            other => Err(mismatch("string", &other)),
        }
    }
}

impl FromReply for Vec<u8> {
    fn from_reply(reply: Reply) -> Result<Self, DecodeError> {
        match reply {
            Reply::Bulk(bytes) => Ok(bytes),
            Reply::Status(text) => Ok(text.into_bytes()),
            other => Err(mismatch("bytes", &other)),
        }
    }
}

impl FromReply for i64 {
    fn from_reply(reply: Reply) -> Result<Self, DecodeError> {
        match &reply {
            Reply::Integer(n) => Ok(*n),
            Reply::Bulk(_) | Reply::Status(_) => text_of("i64", &reply)?
                .parse()
                .map_err(|_| mismatch("i64", &reply)),
            _ => Err(mismatch("i64", &reply)),
        }
    }
}

impl FromReply for u64 {
    fn from_reply(reply: Reply) -> Result<Self, DecodeError> {
        match &reply {
            Reply::Integer(n) => Self::try_from(*n).map_err(|_| mismatch("u64", &reply)),
            Reply::Bulk(_) | Reply::Status(_) => text_of("u64", &reply)?
                .parse()
                .map_err(|_| mismatch("u64", &reply)),
            _ => Err(mismatch("u64", &reply)),
        }
    }
}

impl FromReply for usize {
    fn from_reply(reply: Reply) -> Result<Self, DecodeError> {
        let shape = reply.shape();
        let n = u64::from_reply(reply).map_err(|_| DecodeError::new("usize", shape.clone()))?;
        Self::try_from(n).map_err(|_| DecodeError::new("usize", shape))
    }
}

impl FromReply for f64 {
    #[allow(clippy::cast_precision_loss)]
    fn from_reply(reply: Reply) -> Result<Self, DecodeError> {
        match &reply {
            Reply::Double(d) => Ok(*d),
            Reply::Integer(n) if (-F64_EXACT_INT..=F64_EXACT_INT).contains(n) => Ok(*n as Self),
            Reply::Bulk(_) | Reply::Status(_) => {
                let text = text_of("f64", &reply)?;
                let value: Self = text.parse().map_err(|_| mismatch("f64", &reply))?;
                if value.is_nan() {
                    return Err(mismatch("f64", &reply));
                }
                Ok(value)
            }
            _ => Err(mismatch("f64", &reply)),
        }
    }
}

impl FromReply for bool {
    fn from_reply(reply: Reply) -> Result<Self, DecodeError> {
        match &reply {
            Reply::Boolean(b) => Ok(*b),
            Reply::Integer(0) => Ok(false),
            Reply::Integer(1) => Ok(true),
            Reply::Status(text) if text == "OK" => Ok(true),
            Reply::Bulk(bytes) if bytes.as_slice() == b"0" => Ok(false),
            Reply::Bulk(bytes) if bytes.as_slice() == b"1" => Ok(true),
            _ => Err(mismatch("bool", &reply)),
        }
    }
}

impl<T: FromReply> FromReply for Option<T> {
    fn from_reply(reply: Reply) -> Result<Self, DecodeError> {
        match reply {
            Reply::Nil => Ok(None),
            other => T::from_reply(other).map(Some),
        }
    }
}

impl<T: FromReply> FromReply for Vec<T> {
    fn from_reply(reply: Reply) -> Result<Self, DecodeError> {
        match reply {
            Reply::Nil => Ok(Vec::new()),
            Reply::Array(items) => items.into_iter().map(T::from_reply).collect(),
            other => Err(mismatch("array", &other)),
        }
    }
}

impl<A: FromReply, B: FromReply> FromReply for (A, B) {
    fn from_reply(reply: Reply) -> Result<Self, DecodeError> {
        match reply {
            Reply::Array(items) if items.len() == 2 => {
                let mut iter = items.into_iter();
                match (iter.next(), iter.next()) {
                    (Some(a), Some(b)) => Ok((A::from_reply(a)?, B::from_reply(b)?)),
                    _ => Err(DecodeError::new("pair", "array(2)")),
                }
            }
            other => Err(mismatch("pair", &other)),
        }
    }
}

impl<K, V> FromReply for HashMap<K, V>
where
    K: FromReply + Eq + Hash,
    V: FromReply,
{
    fn from_reply(reply: Reply) -> Result<Self, DecodeError> {
        decode_pairs::<K, V>(reply).map(|pairs| pairs.into_iter().collect())
    }
}

/// Decode a flat `[a1, b1, a2, b2, ..]` (or map) reply into pairs.
pub fn decode_pairs<A: FromReply, B: FromReply>(reply: Reply) -> Result<Vec<(A, B)>, DecodeError> {
    let shape = reply.shape();
    reply
        .into_pairs()
        .ok_or_else(|| DecodeError::new("pairs", shape))?
        .into_iter()
        .map(<(A, B)>::from_reply)
        .collect()
}

// =============================================================================
// JSON VALUES
// =============================================================================

/// JSON-encoded value, written and read through `serde_json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Json<T>(pub T);

impl<T> Json<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T: DeserializeOwned> FromReply for Json<T> {
    fn from_reply(reply: Reply) -> Result<Self, DecodeError> {
        match &reply {
            Reply::Bulk(bytes) => serde_json::from_slice(bytes)
                .map(Json)
                .map_err(|e| DecodeError::new("json", format!("{} ({e})", reply.shape()))),
            _ => Err(mismatch("json", &reply)),
        }
    }
}

impl<T: Serialize> Json<T> {
    /// JSON text of the wrapped value.
    pub fn encode(&self) -> Result<Vec<u8>, CacheError> {
        serde_json::to_vec(&self.0).map_err(|e| CacheError::InvalidArgument(format!("json: {e}")))
    }
}

impl<T: Serialize> ToArg for Json<T> {
    /// Empty when the value cannot be serialized; commands use
    /// [`ToArg::try_to_arg`] and refuse to send in that case.
    fn to_arg(&self) -> Vec<u8> {
        self.encode().unwrap_or_default()
    }

    fn try_to_arg(&self) -> Result<Vec<u8>, CacheError> {
        self.encode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        level: u32,
    }

    #[test]
    fn test_numeric_text_decodes() {
        assert_eq!(decode::<i64>(Reply::from("42")).unwrap(), 42);
        assert_eq!(decode::<u64>(Reply::Integer(7)).unwrap(), 7);
        assert!((decode::<f64>(Reply::from("2.5")).unwrap() - 2.5).abs() < f64::EPSILON);
        assert!(decode::<f64>(Reply::from("-inf")).unwrap().is_infinite());
    }

    #[test]
    fn test_non_numeric_text_fails() {
        let err = decode::<i64>(Reply::from("abc")).unwrap_err();
        assert_eq!(err.expected, "i64");
        assert_eq!(err.actual, "bulk(\"abc\")");
        assert!(decode::<f64>(Reply::from("nan")).is_err());
    }

    #[test]
    fn test_no_lossy_coercion() {
        assert!(decode::<u64>(Reply::Integer(-1)).is_err());
        assert!(decode::<i64>(Reply::from("1.5")).is_err());
        assert!(decode::<f64>(Reply::Integer(i64::MAX)).is_err());
        assert!(decode::<bool>(Reply::Integer(2)).is_err());
        assert!(decode::<String>(Reply::Bulk(vec![0xff, 0xfe])).is_err());
    }

    #[test]
    fn test_nil_requires_option() {
        assert!(decode::<String>(Reply::Nil).is_err());
        assert_eq!(decode::<Option<String>>(Reply::Nil).unwrap(), None);
        assert_eq!(decode::<Vec<Option<i64>>>(Reply::from(vec![Some(1), None])).unwrap(), vec![Some(1), None]);
    }

    #[test]
    fn test_hash_map_from_flat_array() {
        let reply = Reply::from(vec!["a", "1", "b", "2"]);
        let map: HashMap<String, i64> = decode(reply).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map["b"], 2);
    }

    #[test]
    fn test_json_round_trip() {
        let profile = Profile { name: "alice".into(), level: 3 };
        let reply = Reply::Bulk(Json(&profile).to_arg());
        let Json(back): Json<Profile> = decode(reply).unwrap();
        assert_eq!(back, profile);
    }

    #[test]
    fn test_generated_text_round_trip() {
        use fake::{Fake, Faker};

        for _ in 0..32 {
            let text: String = Faker.fake();
            assert_eq!(decode::<String>(Reply::Bulk(text.to_arg())).unwrap(), text);
            let n: i64 = Faker.fake();
            assert_eq!(decode::<i64>(Reply::Bulk(n.to_arg())).unwrap(), n);
        }
    }

    #[test]
    fn test_json_encode_failure_is_an_error() {
        let by_pair: HashMap<(i32, i32), i32> = HashMap::from([((1, 2), 3)]);
        let err = Json(&by_pair).encode().unwrap_err();
        assert!(matches!(err, CacheError::InvalidArgument(ref m) if m.starts_with("json: ")));
        assert!(Json(&by_pair).try_to_arg().is_err());

        let cmd = crate::Command::new("SET").arg("k").arg(Json(&by_pair));
        assert!(cmd.check().is_err());
        assert_eq!(cmd.arg_slice().len(), 1);
    }

    #[test]
    fn test_json_shape_mismatch() {
        let err = decode::<Json<Profile>>(Reply::from("{\"name\":1}")).unwrap_err();
        assert_eq!(err.expected, "json");
    }
}
