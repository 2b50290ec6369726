//! H.264 Rate Control Configuration
//!
//! Wraps the shared [`RateControlConfig`] with the macroblock-level options
//! only the H.264 encoder has.
//!
//! # Examples
//!
//! ```rust
//! use vepu_rc_core::RateControlConfig;
//! use vepu_rc_h264::H264Config;
//!
//! let config = H264Config::builder()
//!     .rc(RateControlConfig::builder().resolution(1280, 720).bitrate(2_000_000).build())
//!     .mb_rc(true)
//!     .mad_qp_delta(-2)
//!     .build();
//! assert!(config.validate().is_ok());
//! ```

use vepu_rc_core::RateControlConfig;

/// Allowed range of the MAD QP adjustment
pub const MAD_QP_DELTA_RANGE: std::ops::RangeInclusive<i32> = -8..=7;

/// Configuration for [`H264RateControl`](crate::H264RateControl)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct H264Config {
    /// Picture-level settings (default: [`RateControlConfig::default()`])
    pub rc: RateControlConfig,

    /// Emit checkpoint tables for in-picture QP steering (default: true)
    pub mb_rc: bool,

    /// QP offset for macroblocks whose MAD is under the threshold (default: 0)
    ///
    /// Zero disables the MAD threshold controller.
    pub mad_qp_delta: i32,

    /// Limit model-predicted QP changes to ±2 per picture, ±4 on large jumps
    /// (default: false)
    pub limit_qp_delta: bool,
}

impl Default for H264Config {
    fn default() -> Self {
        Self {
            rc: RateControlConfig::default(),
            mb_rc: true,
            mad_qp_delta: 0,
            limit_qp_delta: false,
        }
    }
}

impl H264Config {
    /// Create a new configuration builder
    #[must_use]
    pub fn builder() -> H264ConfigBuilder {
        H264ConfigBuilder::default()
    }

    /// Validate configuration and return any issues
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut issues = match self.rc.validate() {
            Ok(()) => Vec::new(),
            Err(issues) => issues,
        };

        if !MAD_QP_DELTA_RANGE.contains(&self.mad_qp_delta) {
            issues.push(format!(
                "mad_qp_delta must be within {}..={}",
                MAD_QP_DELTA_RANGE.start(),
                MAD_QP_DELTA_RANGE.end()
            ));
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(issues)
        }
    }
}

/// Builder for [`H264Config`]
#[derive(Debug, Clone, Default)]
pub struct H264ConfigBuilder {
    rc: Option<RateControlConfig>,
    mb_rc: Option<bool>,
    mad_qp_delta: Option<i32>,
    limit_qp_delta: Option<bool>,
}

impl H264ConfigBuilder {
    /// Set picture-level settings
    #[must_use]
    pub fn rc(mut self, rc: RateControlConfig) -> Self {
        self.rc = Some(rc);
        self
    }

    /// Enable or disable checkpoint tables
    #[must_use]
    pub fn mb_rc(mut self, enable: bool) -> Self {
        self.mb_rc = Some(enable);
        self
    }

    /// Set the MAD QP adjustment
    #[must_use]
    pub fn mad_qp_delta(mut self, delta: i32) -> Self {
        self.mad_qp_delta = Some(delta);
        self
    }

    /// Enable or disable picture QP delta limiting
    #[must_use]
    pub fn limit_qp_delta(mut self, enable: bool) -> Self {
        self.limit_qp_delta = Some(enable);
        self
    }

    /// Build the configuration
    #[must_use]
    pub fn build(self) -> H264Config {
        let defaults = H264Config::default();

        H264Config {
            rc: self.rc.unwrap_or(defaults.rc),
            mb_rc: self.mb_rc.unwrap_or(defaults.mb_rc),
            mad_qp_delta: self.mad_qp_delta.unwrap_or(defaults.mad_qp_delta),
            limit_qp_delta: self.limit_qp_delta.unwrap_or(defaults.limit_qp_delta),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = H264Config::default();
        assert!(config.mb_rc);
        assert_eq!(config.mad_qp_delta, 0);
        assert!(!config.limit_qp_delta);
        assert_eq!(config.rc.intra_qp_delta, -3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = H264Config::builder()
            .mb_rc(false)
            .mad_qp_delta(3)
            .limit_qp_delta(true)
            .build();
        assert!(!config.mb_rc);
        assert_eq!(config.mad_qp_delta, 3);
        assert!(config.limit_qp_delta);
    }

    #[test]
    fn test_validate_mad_range() {
        let config = H264Config {
            mad_qp_delta: 8,
            ..Default::default()
        };
        assert_eq!(config.validate().unwrap_err().len(), 1);

        let config = H264Config {
            mad_qp_delta: -9,
            rc: RateControlConfig {
                gop_len: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(config.validate().unwrap_err().len(), 2);
    }
}
