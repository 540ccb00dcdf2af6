//! Untyped reply model shared by every command channel.

use std::fmt;

/// Raw reply as produced by a command channel, before typed decoding.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Nil,
    Integer(i64),
    Bulk(Vec<u8>),
    Status(String),
    Double(f64),
    Boolean(bool),
    Array(Vec<Reply>),
    Map(Vec<(Reply, Reply)>),
}

impl Reply {
    pub fn bulk(value: impl Into<Vec<u8>>) -> Self {
        Self::Bulk(value.into())
    }

    pub fn ok() -> Self {
        Self::Status("OK".to_string())
    }

    #[must_use]
    pub const fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    /// Elements of an aggregate reply. `Nil` has none, a scalar is its own
    /// single element, and maps are flattened key-then-value.
    #[must_use]
    pub fn into_items(self) -> Vec<Self> {
        match self {
            Self::Nil => Vec::new(),
            Self::Array(items) => items,
            Self::Map(entries) => entries
                .into_iter()
                .flat_map(|(k, v)| [k, v])
                .collect(),
            scalar => vec![scalar],
        }
    }

    /// Regroup a flat `[a1, b1, a2, b2, ..]` reply into two-element arrays.
    /// Already nested arrays of pairs and maps pass through.
    ///
    /// Returns `None` when a flat array has an odd number of elements.
    #[must_use]
    pub fn into_pairs(self) -> Option<Vec<Self>> {
        match self {
            Self::Map(entries) => Some(
                entries
                    .into_iter()
                    .map(|(k, v)| Self::Array(vec![k, v]))
                    .collect(),
            ),
            Self::Array(items) if items.iter().all(|item| matches!(item, Self::Array(pair) if pair.len() == 2)) => {
                Some(items)
            }
            other => {
                let items = other.into_items();
                if items.len() % 2 != 0 {
                    return None;
                }
                let mut pairs = Vec::with_capacity(items.len() / 2);
                let mut iter = items.into_iter();
                while let (Some(a), Some(b)) = (iter.next(), iter.next()) {
                    pairs.push(Self::Array(vec![a, b]));
                }
                Some(pairs)
            }
        }
    }

    /// Short description of the reply shape used in decode failures and
    /// observer summaries.
    #[must_use]
    pub fn shape(&self) -> String {
        match self {
            Self::Nil => "nil".to_string(),
            Self::Integer(n) => format!("integer({n})"),
            Self::Bulk(bytes) => match std::str::from_utf8(bytes) {
                Ok(text) if text.len() <= 32 => format!("bulk({text:?})"),
                Ok(_) => format!("bulk({} bytes)", bytes.len()),
                Err(_) => format!("binary({} bytes)", bytes.len()),
            },
            Self::Status(text) => format!("status({text})"),
            Self::Double(d) => format!("double({d})"),
            Self::Boolean(b) => format!("boolean({b})"),
            Self::Array(items) => format!("array({})", items.len()),
            Self::Map(entries) => format!("map({})", entries.len()),
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.shape())
    }
}

impl From<&str> for Reply {
    fn from(value: &str) -> Self {
        Self::Bulk(value.as_bytes().to_vec())
    }
}

impl From<String> for Reply {
    fn from(value: String) -> Self {
        Self::Bulk(value.into_bytes())
    }
}

impl From<i64> for Reply {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for Reply {
    fn from(value: bool) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl<T: Into<Self>> From<Option<T>> for Reply {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Nil, Into::into)
    }
}

impl<T: Into<Self>> From<Vec<T>> for Reply {
    fn from(value: Vec<T>) -> Self {
        Self::Array(value.into_iter().map(Into::into).collect())
    }
}
