//! H.264 Rate Controller
//!
//! [`H264RateControl`] drives the shared picture-level engine with the H.264
//! tables and adds the two macroblock-level controls the hardware offers:
//!
//! - **Checkpoints**: per-picture word targets and a QP-change ladder the
//!   encoder consults while it walks the macroblocks (inter pictures only).
//! - **MAD threshold**: the residual threshold under which macroblocks get
//!   `mad_qp_delta` added to their QP.
//!
//! # Usage
//!
//! ```rust
//! use vepu_rc_core::{PictureRequest, RateControlConfig};
//! use vepu_rc_h264::{H264Config, H264Feedback, H264RateControl};
//!
//! let config = H264Config::builder()
//!     .rc(RateControlConfig::builder().resolution(1280, 720).bitrate(1_000_000).build())
//!     .build();
//! let mut rc = H264RateControl::new(config)?;
//!
//! let params = rc.before_picture(PictureRequest::default());
//! assert!(params.intra);
//! assert_eq!(params.qp, 38);
//!
//! // encode, then report what the hardware produced
//! rc.after_picture(&H264Feedback::from_bytes(9_000));
//! # Ok::<(), vepu_rc_core::RateControlError>(())
//! ```

use tracing::{debug, trace};
use vepu_rc_core::arith::{div_round_wide, saturate_i32};
use vepu_rc_core::{
    GopPhase, ParamMailbox, PictureRequest, RateControlEngine, RateControlError,
    RateControlStats, Result, RuntimeParams,
};

use crate::checkpoint::{CheckpointModel, CheckpointTable, MAX_CHECKPOINTS};
use crate::config::{H264Config, MAD_QP_DELTA_RANGE};
use crate::mad::MadController;
use crate::profile::{H264_PROFILE, LIMITED_QP_DELTA};

/// Hardware statistics of one encoded picture
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct H264Feedback {
    /// Size of the coded picture in bytes
    pub coded_bytes: u32,

    /// Macroblocks whose MAD was under the threshold
    pub mad_count: u32,

    /// Sum of the QPs of all macroblocks (zero when not reported)
    pub qp_sum: u64,

    /// Nonzero coefficients in the picture
    pub rlc_count: u32,

    /// Cumulative nonzero coefficients at each checkpoint
    pub checkpoint_counts: [u32; MAX_CHECKPOINTS],
}

impl H264Feedback {
    /// Feedback carrying only the coded size
    #[must_use]
    pub fn from_bytes(coded_bytes: u32) -> Self {
        Self {
            coded_bytes,
            ..Default::default()
        }
    }
}

/// Encoder settings for one picture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct H264PictureParams {
    /// Picture QP
    pub qp: i32,

    /// Lower QP bound for macroblock adjustments
    pub qp_min: i32,

    /// Upper QP bound for macroblock adjustments
    pub qp_max: i32,

    /// Code as an IDR picture
    pub intra: bool,

    /// False when the picture should be skipped
    pub coded: bool,

    /// Position within the GOP
    pub phase: GopPhase,

    /// Checkpoint tables, when macroblock rate control applies
    pub checkpoints: Option<CheckpointTable>,

    /// MAD threshold in units of 256 (zero when disabled)
    pub mad_threshold_div256: u8,

    /// QP adjustment for macroblocks under the MAD threshold
    pub mad_qp_delta: i32,

    /// Bits this picture is expected to spend
    pub target_bits: i32,
}

/// Picture facts needed again in `after_picture`
#[derive(Debug, Clone, Copy)]
struct PendingPicture {
    intra: bool,
    coded: bool,
}

/// H.264 rate controller for one encoder instance
#[derive(Debug)]
pub struct H264RateControl {
    engine: RateControlEngine,
    checkpoints: CheckpointModel,
    mad: MadController,
    mb_rc: bool,
    mad_qp_delta: i32,
    pending: Option<PendingPicture>,
}

impl H264RateControl {
    /// Create a controller, rejecting invalid settings
    pub fn new(config: H264Config) -> Result<Self> {
        if !MAD_QP_DELTA_RANGE.contains(&config.mad_qp_delta) {
            return Err(RateControlError::InvalidConfig(format!(
                "mad_qp_delta {} outside {}..={}",
                config.mad_qp_delta,
                MAD_QP_DELTA_RANGE.start(),
                MAD_QP_DELTA_RANGE.end()
            )));
        }

        let mut profile = H264_PROFILE;
        if config.limit_qp_delta {
            profile.delta_limit = Some(LIMITED_QP_DELTA);
        }

        let mb_per_pic = config.rc.mb_per_pic();
        let mb_rows = config.rc.mb_rows();
        let engine = RateControlEngine::new(config.rc, profile)?;

        debug!(
            "H.264 macroblock control: checkpoints {}, MAD delta {}",
            if config.mb_rc { "on" } else { "off" },
            config.mad_qp_delta
        );

        Ok(Self {
            engine,
            checkpoints: CheckpointModel::new(mb_per_pic, mb_rows),
            mad: MadController::new(mb_per_pic),
            mb_rc: config.mb_rc,
            mad_qp_delta: config.mad_qp_delta,
            pending: None,
        })
    }

    /// Decide QP and steering tables for the next picture
    pub fn before_picture(&mut self, request: PictureRequest) -> H264PictureParams {
        let decision = self.engine.before_picture(request);

        let checkpoints = if self.mb_rc
            && self.engine.config().picture_rc
            && decision.coded
            && !decision.intra
        {
            self.checkpoints.plan(
                decision.picture_target,
                decision.bit_per_pic,
                decision.frame_in_gop == 1,
            )
        } else {
            None
        };

        let mad_threshold_div256 = if self.mad_enabled() {
            if decision.phase == GopPhase::Start {
                self.mad.reset();
            }
            self.mad.threshold_div256()
        } else {
            0
        };

        self.pending = Some(PendingPicture {
            intra: decision.intra,
            coded: decision.coded,
        });

        H264PictureParams {
            qp: decision.qp,
            qp_min: decision.qp_min,
            qp_max: decision.qp_max,
            intra: decision.intra,
            coded: decision.coded,
            phase: decision.phase,
            checkpoints,
            mad_threshold_div256,
            mad_qp_delta: self.mad_qp_delta,
            target_bits: decision.picture_target,
        }
    }

    /// Feed back the statistics of the picture decided last
    ///
    /// Returns `false` when there was no pending decision.
    pub fn after_picture(&mut self, feedback: &H264Feedback) -> bool {
        if !self.engine.after_picture(feedback.coded_bytes) {
            return false;
        }
        let Some(picture) = self.pending.take() else {
            return true;
        };

        if feedback.qp_sum > 0 {
            let average = div_round_wide(
                i64::try_from(feedback.qp_sum).unwrap_or(i64::MAX),
                i64::from(self.engine.mb_per_pic()).max(1),
            );
            self.engine.record_average_mb_qp(saturate_i32(average));
        }

        if !picture.coded {
            return true;
        }

        if !picture.intra {
            let bits = saturate_i32(i64::from(feedback.coded_bytes) * 8);
            self.checkpoints
                .update(bits, feedback.rlc_count, &feedback.checkpoint_counts);
        }

        if self.mad_enabled() {
            let threshold = self.mad.update(feedback.mad_count);
            trace!("Next MAD threshold {}", threshold);
        }

        true
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
        let config = self.engine.config();
        self.checkpoints = CheckpointModel::new(config.mb_per_pic(), config.mb_rows());
        self.mad.reset();
        self.pending = None;
    }

    fn mad_enabled(&self) -> bool {
        self.mad_qp_delta != 0
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

    /// Checkpoint model state
    #[must_use]
    pub fn checkpoint_model(&self) -> &CheckpointModel {
        &self.checkpoints
    }

    /// MAD threshold controller state
    #[must_use]
    pub fn mad(&self) -> &MadController {
        &self.mad
    }
}
