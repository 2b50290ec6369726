//! VP8 Rate Controller
//!
//! [`Vp8RateControl`] runs the shared picture-level engine with the VP8
//! quantizer tables. Compared to H.264 the profile:
//!
//! - normalizes model samples per macroblock and bounds the fitted slope
//! - limits every model-predicted change to ±4 quantizer indices
//! - subtracts the filtered prediction error from the steady-state request
//! - restarts the model when the bitrate or frame rate changes
//!
//! # Usage
//!
//! ```rust
//! use vepu_rc_core::{PictureRequest, RateControlConfig};
//! use vepu_rc_vp8::{default_config, Vp8RateControl};
//!
//! let config = RateControlConfig::builder()
//!     .resolution(1280, 720)
//!     .bitrate(1_000_000)
//!     .build_over(default_config());
//! let mut rc = Vp8RateControl::new(config)?;
//!
//! let params = rc.before_picture(PictureRequest::default());
//! assert!(params.key_frame);
//! assert_eq!(params.qp, 120);
//! rc.after_picture(6_000);
//! # Ok::<(), vepu_rc_core::RateControlError>(())
//! ```

use tracing::debug;
use vepu_rc_core::{
    GopPhase, ParamMailbox, PictureRequest, RateControlConfig, RateControlEngine,
    RateControlStats, Result, RuntimeParams,
};

use crate::profile::VP8_PROFILE;

/// Encoder settings for one picture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vp8PictureParams {
    /// Quantizer index
    pub qp: i32,

    /// Code as a key frame
    pub key_frame: bool,

    /// False when the picture should be dropped
    pub coded: bool,

    /// Position within the GOP
    pub phase: GopPhase,

    /// Bits this picture is expected to spend
    pub target_bits: i32,
}

/// VP8 rate controller for one encoder instance
#[derive(Debug)]
pub struct Vp8RateControl {
    engine: RateControlEngine,
}

impl Vp8RateControl {
    /// Create a controller, rejecting invalid settings
    ///
    /// Start from [`default_config`](crate::default_config) to get the VP8
    /// quantizer range.
    pub fn new(config: RateControlConfig) -> Result<Self> {
        let engine = RateControlEngine::new(config, VP8_PROFILE)?;
        Ok(Self { engine })
    }

    /// Decide quantizer and frame type for the next picture
    pub fn before_picture(&mut self, request: PictureRequest) -> Vp8PictureParams {
        let decision = self.engine.before_picture(request);
        if decision.intra {
            debug!(
                "VP8 key frame at qp {} (initial {})",
                decision.qp,
                self.engine.initial_qp()
            );
        }

        Vp8PictureParams {
            qp: decision.qp,
            key_frame: decision.intra,
            coded: decision.coded,
            phase: decision.phase,
            target_bits: decision.picture_target,
        }
    }

    /// Feed back the coded size of the picture decided last
    ///
    /// Returns `false` when there was no pending decision.
    pub fn after_picture(&mut self, coded_bytes: u32) -> bool {
        self.engine.after_picture(coded_bytes)
    }

    /// Queue runtime parameter changes for the next picture
    pub fn post_params(&self, params: RuntimeParams) {
        self.engine.mailbox().post(params);
    }

    /// Handle for posting runtime updates from other threads
    #[must_use]
    pub fn mailbox(&self) -> ParamMailbox {
        self.engine.mailbox()
    }

    /// Return to the freshly constructed state
    pub fn reset(&mut self) {
        self.engine.reset();
    }

    /// Statistics
    #[must_use]
    pub fn stats(&self) -> &RateControlStats {
        self.engine.stats()
    }

    /// Underlying picture-level engine
    #[must_use]
    pub fn engine(&self) -> &RateControlEngine {
        &self.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{default_config, AC_QUANTS, QP_MAX};

    fn hd_config() -> RateControlConfig {
        RateControlConfig::builder()
            .resolution(1280, 720)
            .bitrate(1_000_000)
            .frame_rate(30, 1)
            .gop_len(150)
            .build_over(default_config())
    }

    /// Encoder whose output is inversely proportional to the AC quantizer
    fn simulated_bytes(qp: i32) -> u32 {
        let q = AC_QUANTS[qp.clamp(0, QP_MAX) as usize] as u32;
        1_200_000 / q
    }

    #[test]
    fn test_first_picture_uses_table() {
        let mut rc = Vp8RateControl::new(hd_config()).unwrap();
        assert_eq!(rc.engine().initial_qp(), 120);

        let params = rc.before_picture(PictureRequest::default());
        assert!(params.key_frame);
        assert!(params.coded);
        assert_eq!(params.phase, GopPhase::Start);
        assert_eq!(params.qp, 120);
    }

    #[test]
    fn test_qp_above_ceiling_rejected() {
        let config = RateControlConfig::builder()
            .qp_range(0, 128)
            .build_over(default_config());
        assert!(Vp8RateControl::new(config).is_err());
    }

    #[test]
    fn test_model_steps_bounded() {
        let mut rc = Vp8RateControl::new(hd_config()).unwrap();
        let mut previous = 0;
        for i in 0..60 {
            let params = rc.before_picture(PictureRequest::default());
            assert!(params.target_bits >= 0);
            if params.phase == GopPhase::Steady {
                assert!((params.qp - previous).abs() <= 4, "picture {i}");
            }
            previous = params.qp;
            rc.after_picture(simulated_bytes(params.qp));
        }
    }

    #[test]
    fn test_converges_toward_budget() {
        let mut rc = Vp8RateControl::new(hd_config()).unwrap();
        let mut qps = Vec::new();
        for _ in 0..120 {
            let params = rc.before_picture(PictureRequest::default());
            qps.push(params.qp);
            rc.after_picture(simulated_bytes(params.qp));
        }

        // the 4166 byte budget needs an AC quantizer past the top of the table
        let tail = &qps[100..];
        assert!(tail.iter().all(|&qp| qp >= 100), "{tail:?}");
    }

    #[test]
    fn test_rate_change_resets_model() {
        let mut rc = Vp8RateControl::new(hd_config()).unwrap();
        for _ in 0..6 {
            let params = rc.before_picture(PictureRequest::default());
            rc.after_picture(simulated_bytes(params.qp));
        }
        assert!(!rc.engine().model().is_empty());

        rc.post_params(RuntimeParams::default().bitrate(4_000_000));
        let params = rc.before_picture(PictureRequest::default());
        assert!(rc.engine().model().is_empty());
        assert_eq!(rc.engine().initial_qp(), 60);
        assert_eq!(rc.engine().virtual_buffer().bit_per_pic(), 133_333);
        assert!(!params.key_frame);
    }

    #[test]
    fn test_keyframe_request() {
        let mut rc = Vp8RateControl::new(hd_config()).unwrap();
        for _ in 0..3 {
            let params = rc.before_picture(PictureRequest::default());
            rc.after_picture(simulated_bytes(params.qp));
        }
        rc.mailbox().post(RuntimeParams::default().keyframe());
        let params = rc.before_picture(PictureRequest::default());
        assert!(params.key_frame);
        assert_eq!(params.phase, GopPhase::Start);
    }

    #[test]
    fn test_reset() {
        let mut rc = Vp8RateControl::new(hd_config()).unwrap();
        for _ in 0..5 {
            let params = rc.before_picture(PictureRequest::default());
            rc.after_picture(simulated_bytes(params.qp));
        }
        rc.reset();
        assert_eq!(rc.stats().pictures, 0);
        assert!(rc.engine().model().is_empty());
        assert_eq!(rc.before_picture(PictureRequest::default()).qp, 120);
    }
}
