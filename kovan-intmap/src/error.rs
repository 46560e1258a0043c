use core::fmt;

/// Errors returned by [`IntMap`](crate::IntMap) operations.
///
/// Both variants are argument errors: they are raised before the map is
/// touched and retrying with the same input always fails again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Keys must be strictly positive
    InvalidKey(i64),
    /// Values must lie in `1..=MAX_VALUE`
    InvalidValue(i64),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidKey(key) => write!(f, "Key must be positive: {}", key),
            Error::InvalidValue(value) => write!(f, "Invalid value: {}", value),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Result alias for map operations.
pub type Result<T> = core::result::Result<T, Error>;
