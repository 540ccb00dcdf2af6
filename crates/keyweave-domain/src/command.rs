//! Command construction and argument encoding.

use std::fmt;
use std::time::Duration;

use crate::error::CacheError;

/// Values that can be sent as a command argument.
///
/// The store is value-agnostic: arguments are opaque byte strings, numbers
/// are sent in their decimal text form.
pub trait ToArg {
    fn to_arg(&self) -> Vec<u8>;

    /// Encoding used when building a [`Command`]. Types whose encoding can
    /// fail override this so the failure reaches the caller.
    fn try_to_arg(&self) -> Result<Vec<u8>, CacheError> {
        Ok(self.to_arg())
    }
}

impl<T: ToArg + ?Sized> ToArg for &T {
    fn to_arg(&self) -> Vec<u8> {
        (**self).to_arg()
    }

    fn try_to_arg(&self) -> Result<Vec<u8>, CacheError> {
        (**self).try_to_arg()
    }
}

impl ToArg for str {
    fn to_arg(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
}

impl ToArg for String {
    fn to_arg(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
}

impl ToArg for [u8] {
    fn to_arg(&self) -> Vec<u8> {
        self.to_vec()
    }
}

impl ToArg for Vec<u8> {
    fn to_arg(&self) -> Vec<u8> {
        self.clone()
    }
}

macro_rules! int_to_arg {
    ($($ty:ty),*) => {
        $(
            impl ToArg for $ty {
                fn to_arg(&self) -> Vec<u8> {
                    self.to_string().into_bytes()
                }
            }
        )*
    };
}

int_to_arg!(i32, i64, u32, u64, usize, isize);

impl ToArg for f64 {
    fn to_arg(&self) -> Vec<u8> {
        format_float(*self).into_bytes()
    }
}

impl ToArg for bool {
    fn to_arg(&self) -> Vec<u8> {
        if *self { b"1".to_vec() } else { b"0".to_vec() }
    }
}

/// Format a float the way the store prints scores: integral values without
/// a fractional part, infinities as `inf` / `-inf`.
#[must_use]
pub fn format_float(value: f64) -> String {
    if value.is_infinite() {
        if value > 0.0 { "inf".to_string() } else { "-inf".to_string() }
    } else if value.fract() == 0.0 && value.abs() < 1e17 {
        format!("{value:.0}")
    } else {
        value.to_string()
    }
}

/// A single command: name plus ordered arguments (keys included).
#[derive(Clone, PartialEq, Eq)]
pub struct Command {
    name: &'static str,
    args: Vec<Vec<u8>>,
    blocking: Option<Duration>,
    // First argument that failed to encode.
    invalid: Option<String>,
}

impl Command {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            args: Vec::new(),
            blocking: None,
            invalid: None,
        }
    }

    fn push(&mut self, arg: &impl ToArg) {
        match arg.try_to_arg() {
            Ok(bytes) => self.args.push(bytes),
            Err(err) => {
                let reason = match err {
                    CacheError::InvalidArgument(reason) => reason,
                    other => other.to_string(),
                };
                self.invalid.get_or_insert(reason);
            }
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl ToArg) -> Self {
        self.push(&arg);
        self
    }

    #[must_use]
    pub fn args<I>(mut self, args: I) -> Self
    where
        I: IntoIterator,
        I::Item: ToArg,
    {
        for arg in args {
            self.push(&arg);
        }
        self
    }

    /// Append a server-side wait timeout (seconds, fractional) and mark the
    /// command as blocking for `timeout`.
    #[must_use]
    pub fn block_for(mut self, timeout: Duration) -> Self {
        self.args.push(format_float(timeout.as_secs_f64()).into_bytes());
        self.blocking = Some(timeout);
        self
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }

    pub fn arg_slice(&self) -> &[Vec<u8>] {
        &self.args
    }

    pub fn into_args(self) -> Vec<Vec<u8>> {
        self.args
    }

    /// Server-side wait of a blocking command, if any.
    pub const fn blocking(&self) -> Option<Duration> {
        self.blocking
    }

    /// Fails when an argument could not be encoded. Such a command must
    /// not be sent.
    pub fn check(&self) -> Result<(), CacheError> {
        match &self.invalid {
            Some(reason) => Err(CacheError::InvalidArgument(format!("{}: {reason}", self.name))),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for arg in &self.args {
            write!(f, " {}", String::from_utf8_lossy(arg))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_format() {
        assert_eq!(format_float(10.0), "10");
        assert_eq!(format_float(2.5), "2.5");
        assert_eq!(format_float(f64::NEG_INFINITY), "-inf");
    }

    #[test]
    fn test_command_builder() {
        let cmd = Command::new("BLPOP")
            .arg("queue")
            .block_for(Duration::from_millis(1500));
        assert_eq!(cmd.name(), "BLPOP");
        assert_eq!(cmd.arg_slice(), &[b"queue".to_vec(), b"1.5".to_vec()]);
        assert_eq!(cmd.blocking(), Some(Duration::from_millis(1500)));
        assert_eq!(format!("{cmd:?}"), "BLPOP queue 1.5");
        assert!(cmd.check().is_ok());
    }

    struct Unencodable;

    impl ToArg for Unencodable {
        fn to_arg(&self) -> Vec<u8> {
            Vec::new()
        }

        fn try_to_arg(&self) -> Result<Vec<u8>, CacheError> {
            Err(CacheError::InvalidArgument("cannot encode".to_string()))
        }
    }

    #[test]
    fn test_unencodable_argument_fails_check() {
        let cmd = Command::new("SET").arg("k").args([Unencodable, Unencodable]);
        assert_eq!(cmd.arg_slice(), &[b"k".to_vec()]);
        let err = cmd.check().unwrap_err();
        assert!(matches!(err, CacheError::InvalidArgument(ref m) if m.starts_with("SET: ")));
    }
}
