//! # keyweave - Domain Model
//!
//! Value objects, the untyped reply model, command encoding, typed decoding
//! and the error taxonomy shared by every layer of the cache client.

#![forbid(unsafe_code)]
#![allow(clippy::module_name_repetitions)]

pub mod command;
pub mod decode;
pub mod error;
pub mod reply;

pub use command::{Command, ToArg, format_float};
pub use decode::{FromReply, Json, decode, decode_pairs};
pub use error::{CacheError, DecodeError, Result, TransportError, TransportErrorKind};
pub use reply::Reply;

use serde::{Deserialize, Serialize};

// =============================================================================
// SCAN
// =============================================================================

/// Opaque server-issued scan position.
///
/// [`ScanCursor::START`] both begins an enumeration and, when returned by
/// the server, marks it complete.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScanCursor(String);

impl ScanCursor {
    pub const START_TOKEN: &'static str = "0";
    pub const START: Self = Self(String::new());

    pub fn new(token: impl Into<String>) -> Self {
        let token = token.into();
        if token == Self::START_TOKEN {
            Self::START
        } else {
            Self(token)
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        if self.0.is_empty() { Self::START_TOKEN } else { &self.0 }
    }
}

impl Default for ScanCursor {
    fn default() -> Self {
        Self::START
    }
}

impl ToArg for ScanCursor {
    fn to_arg(&self) -> Vec<u8> {
        self.as_str().as_bytes().to_vec()
    }
}

/// Page size hint and match pattern for scan operations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanOptions {
    pub pattern: Option<String>,
    pub count: Option<usize>,
}

impl ScanOptions {
    #[must_use]
    pub fn matching(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    #[must_use]
    pub const fn count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }
}

// =============================================================================
// SORTED SET VALUE OBJECTS
// =============================================================================

/// Member of a sorted set with its score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tuple<T> {
    pub member: T,
    pub score: f64,
}

impl<T> Tuple<T> {
    pub const fn new(member: T, score: f64) -> Self {
        Self { member, score }
    }
}

impl<T: FromReply> FromReply for Tuple<T> {
    fn from_reply(reply: Reply) -> std::result::Result<Self, DecodeError> {
        let (member, score) = <(T, f64)>::from_reply(reply)?;
        Ok(Self { member, score })
    }
}

/// One end of a score interval
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScoreBound {
    Inclusive(f64),
    Exclusive(f64),
    Unbounded,
}

impl ScoreBound {
    fn encode(self, unbounded: &str) -> String {
        match self {
            Self::Inclusive(v) => format_float(v),
            Self::Exclusive(v) => format!("({}", format_float(v)),
            Self::Unbounded => unbounded.to_string(),
        }
    }
}

/// Score interval used by range-by-score addressing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreRange {
    pub min: ScoreBound,
    pub max: ScoreBound,
}

impl ScoreRange {
    /// Closed interval `[min, max]`
    pub const fn closed(min: f64, max: f64) -> Self {
        Self {
            min: ScoreBound::Inclusive(min),
            max: ScoreBound::Inclusive(max),
        }
    }

    pub const fn unbounded() -> Self {
        Self {
            min: ScoreBound::Unbounded,
            max: ScoreBound::Unbounded,
        }
    }

    pub fn min_arg(&self) -> String {
        self.min.encode("-inf")
    }

    pub fn max_arg(&self) -> String {
        self.max.encode("+inf")
    }
}

/// One end of a lexicographic interval
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LexBound {
    Inclusive(String),
    Exclusive(String),
    Unbounded,
}

impl LexBound {
    fn encode(&self, unbounded: &str) -> String {
        match self {
            Self::Inclusive(v) => format!("[{v}"),
            Self::Exclusive(v) => format!("({v}"),
            Self::Unbounded => unbounded.to_string(),
        }
    }
}

/// Lexicographic interval used by range-by-lex addressing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexRange {
    pub min: LexBound,
    pub max: LexBound,
}

impl LexRange {
    pub fn closed(min: impl Into<String>, max: impl Into<String>) -> Self {
        Self {
            min: LexBound::Inclusive(min.into()),
            max: LexBound::Inclusive(max.into()),
        }
    }

    pub const fn unbounded() -> Self {
        Self {
            min: LexBound::Unbounded,
            max: LexBound::Unbounded,
        }
    }

    pub fn min_arg(&self) -> String {
        self.min.encode("-")
    }

    pub fn max_arg(&self) -> String {
        self.max.encode("+")
    }
}

/// Offset/count window applied to score and lex ranges
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limit {
    pub offset: usize,
    pub count: usize,
}

impl Limit {
    pub const fn new(offset: usize, count: usize) -> Self {
        Self { offset, count }
    }
}

/// Score combination policy for multi-key union/intersect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Aggregate {
    #[default]
    Sum,
    Min,
    Max,
}

impl Aggregate {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sum => "SUM",
            Self::Min => "MIN",
            Self::Max => "MAX",
        }
    }
}

/// Per-source score multipliers, one per input key
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Weights(pub Vec<f64>);

impl Weights {
    /// Same weight for every one of `n` sources
    pub fn uniform(weight: f64, n: usize) -> Self {
        Self(vec![weight; n])
    }
}

/// `AGGREGATE` + `WEIGHTS` combinator
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Combine {
    pub aggregate: Aggregate,
    pub weights: Option<Weights>,
}

impl Combine {
    pub const fn aggregate(aggregate: Aggregate) -> Self {
        Self {
            aggregate,
            weights: None,
        }
    }

    #[must_use]
    pub fn weights(mut self, weights: Weights) -> Self {
        self.weights = Some(weights);
        self
    }
}

// =============================================================================
// LIST VALUE OBJECTS
// =============================================================================

/// List end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum End {
    Left,
    Right,
}

impl End {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Left => "LEFT",
            Self::Right => "RIGHT",
        }
    }
}

/// Insert position relative to a pivot element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Position {
    Before,
    After,
}

impl Position {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Before => "BEFORE",
            Self::After => "AFTER",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_sentinel() {
        assert!(ScanCursor::new("0").is_terminal());
        assert!(ScanCursor::default().is_terminal());
        let next = ScanCursor::new("17");
        assert!(!next.is_terminal());
        assert_eq!(next.as_str(), "17");
        assert_eq!(ScanCursor::START.to_arg(), b"0".to_vec());
    }

    #[test]
    fn test_score_range_args() {
        let range = ScoreRange {
            min: ScoreBound::Exclusive(1.5),
            max: ScoreBound::Unbounded,
        };
        assert_eq!(range.min_arg(), "(1.5");
        assert_eq!(range.max_arg(), "+inf");
        assert_eq!(ScoreRange::closed(0.0, 10.0).max_arg(), "10");
    }

    #[test]
    fn test_lex_range_args() {
        let range = LexRange::closed("a", "c");
        assert_eq!(range.min_arg(), "[a");
        assert_eq!(LexRange::unbounded().max_arg(), "+");
    }

    #[test]
    fn test_tuple_decode() {
        let tuple: Tuple<String> = decode(Reply::from(vec!["alice", "10"])).unwrap();
        assert_eq!(tuple, Tuple::new("alice".to_string(), 10.0));
    }
}
