//! Error types for rate control setup
//!
//! Only construction can fail. Once an engine exists, every per-picture call
//! is infallible: overflow saturates and cold models fall back to heuristics.

use thiserror::Error;

/// Errors raised while validating a rate control configuration
///
/// # Examples
///
/// ```rust
/// use vepu_rc_core::{RateControlConfig, RateControlError};
///
/// let config = RateControlConfig::builder().width(0).build();
/// match config.check(51) {
///     Err(RateControlError::InvalidResolution { width, height }) => {
///         assert_eq!((width, height), (0, 1080));
///     }
///     other => panic!("unexpected: {other:?}"),
/// }
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RateControlError {
    /// Picture dimensions are zero or beyond what the hardware supports
    #[error("Invalid resolution {width}x{height}")]
    InvalidResolution {
        /// Picture width in pixels
        width: u32,
        /// Picture height in pixels
        height: u32,
    },

    /// Frame rate numerator or denominator is zero
    #[error("Invalid frame rate {num}/{den}")]
    InvalidFrameRate {
        /// Frame rate numerator (ticks per second)
        num: u32,
        /// Frame rate denominator (ticks per picture)
        den: u32,
    },

    /// QP bounds are inverted or exceed the codec's range
    #[error("Invalid QP range {min}..={max} (codec maximum {ceiling})")]
    InvalidQpRange {
        /// Requested minimum QP
        min: i32,
        /// Requested maximum QP
        max: i32,
        /// Largest QP the codec supports
        ceiling: i32,
    },

    /// Any other rejected setting
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for rate control setup
pub type Result<T> = std::result::Result<T, RateControlError>;

impl RateControlError {
    /// Create an invalid config error
    pub(crate) fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RateControlError::InvalidFrameRate { num: 30, den: 0 };
        assert_eq!(err.to_string(), "Invalid frame rate 30/0");

        let err = RateControlError::InvalidQpRange {
            min: 40,
            max: 20,
            ceiling: 51,
        };
        assert_eq!(err.to_string(), "Invalid QP range 40..=20 (codec maximum 51)");
    }

    #[test]
    fn test_error_helpers() {
        let err = RateControlError::invalid_config("gop_len must be at least 1");
        assert!(matches!(err, RateControlError::InvalidConfig(_)));
        assert_eq!(err.to_string(), "Invalid configuration: gop_len must be at least 1");
    }
}
