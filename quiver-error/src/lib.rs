//! Error types and helper macros shared by every Quiver crate.
//!
//! The taxonomy is deliberately small: wire-level corruption is
//! [`InvalidSerde`][QuiverError::InvalidSerde], caller mistakes are
//! [`InvalidArgument`][QuiverError::InvalidArgument], missing registry
//! entries are [`KeyError`][QuiverError::KeyError].

#![allow(clippy::panic)]

use std::borrow::Cow;
use std::fmt::{Display, Formatter};
use std::{env, fmt, io};

/// A string that is cheap to construct from both literals and `format!` output.
#[derive(Debug)]
pub struct ErrString(Cow<'static, str>);

impl<T> From<T> for ErrString
where
    T: Into<Cow<'static, str>>,
{
    fn from(msg: T) -> Self {
        if env::var("QUIVER_PANIC_ON_ERR").as_deref().unwrap_or("") == "1" {
            panic!("{}", msg.into())
        } else {
            Self(msg.into())
        }
    }
}

impl AsRef<str> for ErrString {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for ErrString {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum QuiverError {
    /// The caller asked for something the API cannot honor.
    #[error("invalid argument: {0}")]
    InvalidArgument(ErrString),
    /// The bytes on the wire do not form a valid Quiver message.
    #[error("invalid serialized form: {0}")]
    InvalidSerde(ErrString),
    /// A lookup into a registry (dictionary ids, field paths) missed.
    #[error("key error: {0}")]
    KeyError(ErrString),
    #[error("not implemented: {0}")]
    NotImplemented(ErrString),
    #[error(transparent)]
    IOError(#[from] io::Error),
}

pub type QuiverResult<T> = Result<T, QuiverError>;

impl QuiverError {
    /// Whether this error is the wire-corruption or bad-argument flavor.
    pub fn is_invalid(&self) -> bool {
        matches!(self, Self::InvalidArgument(_) | Self::InvalidSerde(_))
    }

    pub fn is_key_error(&self) -> bool {
        matches!(self, Self::KeyError(_))
    }

    pub fn is_not_implemented(&self) -> bool {
        matches!(self, Self::NotImplemented(_))
    }
}

#[cfg(feature = "arrow-format")]
impl From<arrow_format::ipc::planus::Error> for QuiverError {
    fn from(err: arrow_format::ipc::planus::Error) -> Self {
        QuiverError::InvalidSerde(err.to_string().into())
    }
}

impl From<QuiverError> for io::Error {
    fn from(err: QuiverError) -> Self {
        match err {
            QuiverError::IOError(io) => io,
            other => io::Error::other(other),
        }
    }
}

/// Construct a [`QuiverError`], `format!`-style.
///
/// `quiver_err!("...")` defaults to `InvalidArgument`; prefix with a variant
/// name to pick another: `quiver_err!(KeyError: "no dictionary {}", id)`.
#[macro_export]
macro_rules! quiver_err {
    ($variant:ident: $fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::QuiverError::$variant(format!($fmt $(, $arg)*).into())
    };
    ($fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::QuiverError::InvalidArgument(format!($fmt $(, $arg)*).into())
    };
}

/// Return early with a [`QuiverError`].
#[macro_export]
macro_rules! quiver_bail {
    ($variant:ident: $fmt:literal $(, $arg:expr)* $(,)?) => {
        return Err($crate::quiver_err!($variant: $fmt $(, $arg)*))
    };
    ($fmt:literal $(, $arg:expr)* $(,)?) => {
        return Err($crate::quiver_err!($fmt $(, $arg)*))
    };
}

/// Panic with a [`QuiverError`]-formatted message. Reserved for unreachable
/// states; library code propagates errors instead.
#[macro_export]
macro_rules! quiver_panic {
    ($fmt:literal $(, $arg:expr)* $(,)?) => {
        panic!("{}", format!($fmt $(, $arg)*))
    };
    ($err:expr) => {{
        let err: $crate::QuiverError = $err;
        panic!("{}", err)
    }};
}

/// Unwrap with a static message, panicking through a single choke point so
/// the strict `unwrap_used`/`expect_used` lints stay meaningful elsewhere.
pub trait QuiverExpect {
    type Output;

    fn quiver_expect(self, msg: &str) -> Self::Output;
}

impl<T> QuiverExpect for Option<T> {
    type Output = T;

    #[inline(always)]
    fn quiver_expect(self, msg: &str) -> T {
        match self {
            Some(v) => v,
            None => quiver_panic!("expected Some: {}", msg),
        }
    }
}

impl<T, E: Display> QuiverExpect for Result<T, E> {
    type Output = T;

    #[inline(always)]
    fn quiver_expect(self, msg: &str) -> T {
        match self {
            Ok(v) => v,
            Err(e) => quiver_panic!("expected Ok ({}): {}", msg, e),
        }
    }
}

pub trait QuiverUnwrap {
    type Output;

    fn quiver_unwrap(self) -> Self::Output;
}

impl<T, E: Display> QuiverUnwrap for Result<T, E> {
    type Output = T;

    #[inline(always)]
    fn quiver_unwrap(self) -> T {
        self.quiver_expect("unwrap")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn err_macro_variants() {
        let e = quiver_err!(KeyError: "no dictionary {}", 42);
        assert!(e.is_key_error());
        assert_eq!(e.to_string(), "key error: no dictionary 42");

        let e = quiver_err!("bad alignment {}", 3);
        assert!(e.is_invalid());
    }

    #[test]
    fn bail_propagates() {
        fn inner() -> QuiverResult<()> {
            quiver_bail!(NotImplemented: "unifying nested dictionaries")
        }
        let err = inner().unwrap_err();
        assert!(err.is_not_implemented());
    }

    #[test]
    fn io_round_trip() {
        let e = QuiverError::from(io::Error::new(io::ErrorKind::UnexpectedEof, "eof"));
        let io: io::Error = e.into();
        assert_eq!(io.kind(), io::ErrorKind::UnexpectedEof);
    }
}
