//! Rate Control Configuration
//!
//! Static encoder settings with a builder, plus the runtime parameter mailbox
//! used to change bitrate, frame rate or GOP structure while encoding.
//!
//! # Examples
//!
//! ```rust
//! use vepu_rc_core::{ParamMailbox, RateControlConfig, RuntimeParams};
//!
//! // Using builder pattern
//! let config = RateControlConfig::builder()
//!     .resolution(1280, 720)
//!     .bitrate(2_000_000)
//!     .frame_rate(30_000, 1001)
//!     .gop_len(60)
//!     .build();
//! assert!(config.validate().is_ok());
//!
//! // Using struct literal with defaults
//! let config = RateControlConfig {
//!     gop_len: 30,
//!     ..Default::default()
//! };
//! assert_eq!(config.bitrate, 1_000_000);
//!
//! // Runtime updates from another thread
//! let mailbox = ParamMailbox::new();
//! let remote = mailbox.clone();
//! std::thread::spawn(move || remote.post(RuntimeParams::default().bitrate(500_000)))
//!     .join()
//!     .unwrap();
//! assert_eq!(mailbox.take().and_then(|p| p.bitrate), Some(500_000));
//! ```

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{RateControlError, Result};

/// Largest supported picture dimension in pixels
pub const MAX_DIMENSION: u32 = 8192;

/// Rate control settings for one encoder instance
///
/// Use [`RateControlConfig::builder()`] for ergonomic construction or struct
/// literal syntax with [`Default::default()`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateControlConfig {
    /// Picture width in pixels (default: 1920)
    pub width: u32,

    /// Picture height in pixels (default: 1080)
    pub height: u32,

    /// Target bitrate in bits per second (default: 1 000 000)
    ///
    /// Clamped to half the uncompressed 4:2:0 rate when the engine starts.
    pub bitrate: u32,

    /// Frame rate numerator, ticks per second (default: 30)
    pub fps_num: u32,

    /// Frame rate denominator, ticks per picture (default: 1)
    pub fps_den: u32,

    /// Pictures per GOP including the intra picture (default: 150)
    pub gop_len: u32,

    /// Lowest QP the controller may choose (default: 10)
    pub qp_min: i32,

    /// Highest QP the controller may choose (default: 51)
    pub qp_max: i32,

    /// Starting QP (default: None, derived from the initial-QP table)
    pub initial_qp: Option<i32>,

    /// Offset added to the QP of intra pictures (default: -3)
    pub intra_qp_delta: i32,

    /// QP used for every intra picture, overriding `intra_qp_delta` (default: None)
    pub fixed_intra_qp: Option<i32>,

    /// Adapt QP per picture (default: true)
    ///
    /// When disabled every picture uses the starting QP.
    pub picture_rc: bool,

    /// Allow skipping pictures when the buffer runs over (default: false)
    pub picture_skip: bool,
}

impl Default for RateControlConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            bitrate: 1_000_000,
            fps_num: 30,
            fps_den: 1,
            gop_len: 150,
            qp_min: 10,
            qp_max: 51,
            initial_qp: None,
            intra_qp_delta: -3,
            fixed_intra_qp: None,
            picture_rc: true,
            picture_skip: false,
        }
    }
}

impl RateControlConfig {
    /// Create a new configuration builder
    ///
    /// # Examples
    ///
    /// ```rust
    /// use vepu_rc_core::RateControlConfig;
    ///
    /// let config = RateControlConfig::builder()
    ///     .bitrate(4_000_000)
    ///     .qp_range(20, 45)
    ///     .build();
    /// assert_eq!(config.qp_min, 20);
    /// ```
    #[must_use]
    pub fn builder() -> RateControlConfigBuilder {
        RateControlConfigBuilder::default()
    }

    /// Macroblocks (16x16) per picture
    #[must_use]
    pub fn mb_per_pic(&self) -> u32 {
        self.mb_width() * self.mb_rows()
    }

    /// Macroblock columns
    #[must_use]
    pub fn mb_width(&self) -> u32 {
        self.width.div_ceil(16)
    }

    /// Macroblock rows
    #[must_use]
    pub fn mb_rows(&self) -> u32 {
        self.height.div_ceil(16)
    }

    /// Validate configuration and return any issues
    ///
    /// Returns `Ok(())` if configuration is valid, or a list of issues.
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut issues = Vec::new();

        if self.width == 0 || self.height == 0 {
            issues.push("width and height must be non-zero".to_string());
        }

        if self.width > MAX_DIMENSION || self.height > MAX_DIMENSION {
            issues.push(format!("width and height must not exceed {MAX_DIMENSION}"));
        }

        if self.fps_num == 0 || self.fps_den == 0 {
            issues.push("frame rate numerator and denominator must be non-zero".to_string());
        }

        if self.fps_num > i32::MAX as u32 || self.fps_den > i32::MAX as u32 {
            issues.push("frame rate terms must fit in 31 bits".to_string());
        }

        if self.bitrate == 0 {
            issues.push("bitrate must be non-zero".to_string());
        }

        if self.gop_len == 0 {
            issues.push("gop_len must be at least 1".to_string());
        }

        if self.qp_min < 0 || self.qp_min > self.qp_max {
            issues.push("qp_min must be in 0..=qp_max".to_string());
        }

        if let Some(qp) = self.initial_qp {
            if qp < self.qp_min || qp > self.qp_max {
                issues.push("initial_qp must lie within qp_min..=qp_max".to_string());
            }
        }

        if let Some(qp) = self.fixed_intra_qp {
            if qp < self.qp_min || qp > self.qp_max {
                issues.push("fixed_intra_qp must lie within qp_min..=qp_max".to_string());
            }
        }

        if i64::from(self.intra_qp_delta).abs() > i64::from(self.qp_max.max(0)) {
            issues.push("intra_qp_delta must lie within -qp_max..=qp_max".to_string());
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(issues)
        }
    }

    /// Validate against a codec whose largest QP is `qp_ceiling`
    ///
    /// Resolution, frame rate and QP range problems map to their own error
    /// variants; anything else is reported as
    /// [`RateControlError::InvalidConfig`].
    pub fn check(&self, qp_ceiling: i32) -> Result<()> {
        if self.width == 0
            || self.height == 0
            || self.width > MAX_DIMENSION
            || self.height > MAX_DIMENSION
        {
            return Err(RateControlError::InvalidResolution {
                width: self.width,
                height: self.height,
            });
        }

        if self.fps_num == 0 || self.fps_den == 0 {
            return Err(RateControlError::InvalidFrameRate {
                num: self.fps_num,
                den: self.fps_den,
            });
        }

        if self.qp_min < 0 || self.qp_min > self.qp_max || self.qp_max > qp_ceiling {
            return Err(RateControlError::InvalidQpRange {
                min: self.qp_min,
                max: self.qp_max,
                ceiling: qp_ceiling,
            });
        }

        self.validate()
            .map_err(|issues| RateControlError::invalid_config(issues.join("; ")))
    }
}

/// Builder for [`RateControlConfig`]
///
/// Provides a fluent interface for constructing configuration.
#[derive(Debug, Clone, Default)]
pub struct RateControlConfigBuilder {
    width: Option<u32>,
    height: Option<u32>,
    bitrate: Option<u32>,
    fps_num: Option<u32>,
    fps_den: Option<u32>,
    gop_len: Option<u32>,
    qp_min: Option<i32>,
    qp_max: Option<i32>,
    initial_qp: Option<i32>,
    intra_qp_delta: Option<i32>,
    fixed_intra_qp: Option<i32>,
    picture_rc: Option<bool>,
    picture_skip: Option<bool>,
}

impl RateControlConfigBuilder {
    /// Set picture width in pixels
    #[must_use]
    pub fn width(mut self, width: u32) -> Self {
        self.width = Some(width);
        self
    }

    /// Set picture height in pixels
    #[must_use]
    pub fn height(mut self, height: u32) -> Self {
        self.height = Some(height);
        self
    }

    /// Set picture width and height
    #[must_use]
    pub fn resolution(self, width: u32, height: u32) -> Self {
        self.width(width).height(height)
    }

    /// Set target bitrate in bits per second
    #[must_use]
    pub fn bitrate(mut self, bps: u32) -> Self {
        self.bitrate = Some(bps);
        self
    }

    /// Set frame rate as `num / den` pictures per second
    #[must_use]
    pub fn frame_rate(mut self, num: u32, den: u32) -> Self {
        self.fps_num = Some(num);
        self.fps_den = Some(den);
        self
    }

    /// Set GOP length (intra period)
    #[must_use]
    pub fn gop_len(mut self, len: u32) -> Self {
        self.gop_len = Some(len);
        self
    }

    /// Set QP bounds
    #[must_use]
    pub fn qp_range(mut self, min: i32, max: i32) -> Self {
        self.qp_min = Some(min);
        self.qp_max = Some(max);
        self
    }

    /// Set starting QP
    #[must_use]
    pub fn initial_qp(mut self, qp: i32) -> Self {
        self.initial_qp = Some(qp);
        self
    }

    /// Set intra QP offset
    #[must_use]
    pub fn intra_qp_delta(mut self, delta: i32) -> Self {
        self.intra_qp_delta = Some(delta);
        self
    }

    /// Set a fixed QP for intra pictures
    #[must_use]
    pub fn fixed_intra_qp(mut self, qp: i32) -> Self {
        self.fixed_intra_qp = Some(qp);
        self
    }

    /// Enable or disable picture-level rate control
    #[must_use]
    pub fn picture_rc(mut self, enable: bool) -> Self {
        self.picture_rc = Some(enable);
        self
    }

    /// Enable or disable picture skipping
    #[must_use]
    pub fn picture_skip(mut self, enable: bool) -> Self {
        self.picture_skip = Some(enable);
        self
    }

    /// Build the configuration
    #[must_use]
    pub fn build(self) -> RateControlConfig {
        self.build_over(RateControlConfig::default())
    }

    /// Build on top of codec-specific defaults
    #[must_use]
    pub fn build_over(self, defaults: RateControlConfig) -> RateControlConfig {
        RateControlConfig {
            width: self.width.unwrap_or(defaults.width),
            height: self.height.unwrap_or(defaults.height),
            bitrate: self.bitrate.unwrap_or(defaults.bitrate),
            fps_num: self.fps_num.unwrap_or(defaults.fps_num),
            fps_den: self.fps_den.unwrap_or(defaults.fps_den),
            gop_len: self.gop_len.unwrap_or(defaults.gop_len),
            qp_min: self.qp_min.unwrap_or(defaults.qp_min),
            qp_max: self.qp_max.unwrap_or(defaults.qp_max),
            initial_qp: self.initial_qp.or(defaults.initial_qp),
            intra_qp_delta: self.intra_qp_delta.unwrap_or(defaults.intra_qp_delta),
            fixed_intra_qp: self.fixed_intra_qp.or(defaults.fixed_intra_qp),
            picture_rc: self.picture_rc.unwrap_or(defaults.picture_rc),
            picture_skip: self.picture_skip.unwrap_or(defaults.picture_skip),
        }
    }
}

/// Parameter changes requested while encoding
///
/// Every field is optional; unset fields leave the current value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeParams {
    /// New target bitrate (bps)
    pub bitrate: Option<u32>,

    /// New frame rate as `(num, den)`
    pub frame_rate: Option<(u32, u32)>,

    /// New GOP length
    pub intra_period: Option<u32>,

    /// New starting QP
    pub initial_qp: Option<i32>,

    /// New minimum QP
    pub min_qp: Option<i32>,

    /// Code the next picture as intra and start a new GOP
    pub keyframe_request: bool,

    /// Enable or disable picture skipping
    pub frame_skip: Option<bool>,
}

impl RuntimeParams {
    /// Request a new bitrate
    #[must_use]
    pub fn bitrate(mut self, bps: u32) -> Self {
        self.bitrate = Some(bps);
        self
    }

    /// Request a new frame rate
    #[must_use]
    pub fn frame_rate(mut self, num: u32, den: u32) -> Self {
        self.frame_rate = Some((num, den));
        self
    }

    /// Request a new GOP length
    #[must_use]
    pub fn intra_period(mut self, len: u32) -> Self {
        self.intra_period = Some(len);
        self
    }

    /// Request a new starting QP
    #[must_use]
    pub fn initial_qp(mut self, qp: i32) -> Self {
        self.initial_qp = Some(qp);
        self
    }

    /// Request a new minimum QP
    #[must_use]
    pub fn min_qp(mut self, qp: i32) -> Self {
        self.min_qp = Some(qp);
        self
    }

    /// Force the next picture to be intra
    #[must_use]
    pub fn keyframe(mut self) -> Self {
        self.keyframe_request = true;
        self
    }

    /// Toggle picture skipping
    #[must_use]
    pub fn frame_skip(mut self, enable: bool) -> Self {
        self.frame_skip = Some(enable);
        self
    }

    /// Fold a later update over this one
    ///
    /// Set fields of `later` win; a keyframe request survives either way.
    pub fn merge(&mut self, later: Self) {
        self.bitrate = later.bitrate.or(self.bitrate);
        self.frame_rate = later.frame_rate.or(self.frame_rate);
        self.intra_period = later.intra_period.or(self.intra_period);
        self.initial_qp = later.initial_qp.or(self.initial_qp);
        self.min_qp = later.min_qp.or(self.min_qp);
        self.keyframe_request |= later.keyframe_request;
        self.frame_skip = later.frame_skip.or(self.frame_skip);
    }

    /// True when no field is set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Thread-safe slot for pending [`RuntimeParams`]
///
/// Clones share the slot. Posts between two pictures merge; the engine takes
/// the merged update at the start of the next picture.
#[derive(Debug, Clone, Default)]
pub struct ParamMailbox {
    slot: Arc<Mutex<Option<RuntimeParams>>>,
}

impl ParamMailbox {
    /// Create an empty mailbox
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an update, merging with anything not yet taken
    pub fn post(&self, params: RuntimeParams) {
        let mut slot = self.slot.lock();
        match slot.as_mut() {
            Some(pending) => pending.merge(params),
            None => *slot = Some(params),
        }
    }

    /// Take the pending update, leaving the mailbox empty
    #[must_use]
    pub fn take(&self) -> Option<RuntimeParams> {
        self.slot.lock().take()
    }

    /// True when an update is waiting
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.slot.lock().is_some()
    }
}
