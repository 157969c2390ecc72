//! Error types and handling for the windrow library

use thiserror::Error;

/// Result type alias for windrow operations
pub type Result<T> = std::result::Result<T, WindrowError>;

/// Main error type for the windrow library
///
/// Every variant is fail-fast: the offending call surfaces the error to its
/// caller and no local recovery is attempted. Upstream exhaustion is not an
/// error; it is reported as `Ok(false)` from `set_entry` and `load_entry`.
#[derive(Error, Debug)]
pub enum WindrowError {
    /// Invalid or inconsistent configuration
    #[error("Invalid configuration: {message}")]
    Config {
        /// Error message describing the configuration issue
        message: String,
    },

    /// Access outside the stored window of a cache, or a purge that cannot
    /// advance past the requested entry
    #[error("Range error: {message}")]
    Range {
        /// Error message describing the out-of-range access
        message: String,
    },

    /// A stateful computed column observed a decreasing entry index
    #[error("Non-monotonic access: {message}")]
    NonMonotonic {
        /// Error message naming the offending column and entries
        message: String,
    },

    /// The resample grid extends before the first source sample
    #[error("Resample domain error: {message}")]
    ResampleDomain {
        /// Error message describing the domain violation
        message: String,
    },
}

impl WindrowError {
    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new range error
    pub fn range(message: impl Into<String>) -> Self {
        Self::Range {
            message: message.into(),
        }
    }

    /// Create a new monotonicity error
    pub fn non_monotonic(message: impl Into<String>) -> Self {
        Self::NonMonotonic {
            message: message.into(),
        }
    }

    /// Create a new resample domain error
    pub fn resample_domain(message: impl Into<String>) -> Self {
        Self::ResampleDomain {
            message: message.into(),
        }
    }

    /// Check if this error was raised while wiring up columns, slots or grids
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. })
    }

    /// Check if this error was raised by an out-of-window access
    pub fn is_range(&self) -> bool {
        matches!(self, Self::Range { .. })
    }
}

/// Convenience macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::error::WindrowError::config(format!($($arg)*))
    };
}

/// Convenience macro for creating range errors
#[macro_export]
macro_rules! range_error {
    ($($arg:tt)*) => {
        $crate::error::WindrowError::range(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = WindrowError::config("test message");
        assert!(matches!(err, WindrowError::Config { .. }));
        assert!(err.is_config());
        assert!(!err.is_range());
    }

    #[test]
    fn test_error_classification() {
        let range = WindrowError::range("entry 12 outside [3, 9)");
        assert!(range.is_range());
        assert!(!range.is_config());

        let mono = WindrowError::non_monotonic("entry 4 after entry 7");
        assert!(!mono.is_range());
        assert!(!mono.is_config());
    }

    #[test]
    fn test_error_macros() {
        let err = config_error!("expected {} readers, got {}", 4, 2);
        assert!(matches!(err, WindrowError::Config { .. }));

        let err = range_error!("entry {} outside stored range", 42);
        assert!(matches!(err, WindrowError::Range { .. }));
        assert_eq!(err.to_string(), "Range error: entry 42 outside stored range");
    }
}
