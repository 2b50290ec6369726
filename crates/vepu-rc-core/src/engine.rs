//! Picture QP Controller
//!
//! [`RateControlEngine`] is the per-instance state machine called twice per
//! picture: [`before_picture`](RateControlEngine::before_picture) picks the
//! QP, [`after_picture`](RateControlEngine::after_picture) feeds the coded
//! size back into the models.
//!
//! # Overview
//!
//! Within a GOP the controller moves through three phases:
//!
//! - **Start** (first picture): intra. QP is the mean QP of the previous
//!   GOP's inter pictures, or the initial-QP table estimate on a cold start.
//!   GOPs of one or two pictures take it from the model once it is warm.
//! - **Early** (next `early_frames` pictures): fixed QP steps in the
//!   direction of the buffer deficit while the model gathers samples.
//! - **Steady**: the deficit is spread over the next few pictures and the
//!   regression model picks the QP expected to hit the resulting request.
//!
//! Every result is clamped into `[qp_min, qp_max]`.
//!
//! # Usage
//!
//! ```rust
//! use vepu_rc_core::{CodecProfile, PictureRequest, RateControlConfig, RateControlEngine};
//! # use vepu_rc_core::profile::{BudgetSpread, InitialQpTable, SampleScale};
//! # const STEPS: [i32; 52] = [
//! #     3, 3, 3, 4, 4, 5, 5, 6, 7, 7, 8, 9, 10, 11, 13, 14, 16, 18, 20, 23, 25, 28, 32, 36,
//! #     40, 45, 51, 57, 64, 72, 80, 90, 101, 114, 128, 144, 160, 180, 203, 228, 256, 288,
//! #     320, 360, 405, 456, 513, 577, 640, 720, 810, 896,
//! # ];
//! # const PROFILE: CodecProfile = CodecProfile {
//! #     name: "doc",
//! #     quant_steps: &STEPS,
//! #     initial_qp: InitialQpTable { thresholds: &[i32::MAX], qps: &[30], high_rate_qp: 30 },
//! #     model_capacity: 15,
//! #     slope_limits: None,
//! #     degenerate_fit: vepu_rc_core::DegenerateFit::Clear,
//! #     delta_limit: None,
//! #     early_frames: 2,
//! #     early_step: 3,
//! #     large_step: 5,
//! #     spread: BudgetSpread::AtMost(3),
//! #     sample_scale: SampleScale::BitsPerPicture,
//! #     error_feedback: false,
//! #     reset_on_rate_change: false,
//! # };
//!
//! let config = RateControlConfig::builder().resolution(640, 480).build();
//! let mut rc = RateControlEngine::new(config, PROFILE)?;
//!
//! for _ in 0..10 {
//!     let decision = rc.before_picture(PictureRequest::default());
//!     // program decision.qp into the encoder, run it, read back the size
//!     let coded_bytes = 4_000;
//!     rc.after_picture(coded_bytes);
//!     assert!((10..=51).contains(&decision.qp));
//! }
//! # Ok::<(), vepu_rc_core::RateControlError>(())
//! ```

use tracing::{debug, info, trace, warn};

use crate::arith::{div_round, div_round_wide, mul_div, saturate_i32};
use crate::config::{ParamMailbox, RateControlConfig, RuntimeParams};
use crate::error::Result;
use crate::model::{LinearModel, ModelParams};
use crate::profile::{CodecProfile, SampleScale};
use crate::stats::RateControlStats;
use crate::vbuffer::{max_bitrate, VirtualBuffer, COUNTER_LIMIT};

/// Position of a picture within its GOP
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GopPhase {
    /// First picture, coded intra
    Start,

    /// Pictures handled by the fixed-step heuristic
    Early,

    /// Pictures handled by the regression model
    Steady,
}

impl GopPhase {
    /// Phase of picture `frame_in_gop` given the profile's early window
    #[must_use]
    pub fn from_index(frame_in_gop: u32, early_frames: u32) -> Self {
        match frame_in_gop {
            0 => Self::Start,
            n if n <= early_frames => Self::Early,
            _ => Self::Steady,
        }
    }
}

/// Per-picture input to [`RateControlEngine::before_picture`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PictureRequest {
    /// Code this picture as intra and start a new GOP
    pub force_intra: bool,

    /// Stream time since the previous picture in frame-rate ticks
    ///
    /// `None` means one frame period (zero for the very first picture).
    pub time_increment: Option<u32>,
}

impl PictureRequest {
    /// Request an intra picture
    #[must_use]
    pub fn intra() -> Self {
        Self {
            force_intra: true,
            time_increment: None,
        }
    }

    /// Set an explicit time increment
    #[must_use]
    pub fn with_time_increment(mut self, ticks: u32) -> Self {
        self.time_increment = Some(ticks);
        self
    }
}

/// Controller output for one picture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PictureDecision {
    /// QP to program for the picture
    pub qp: i32,

    /// Lowest QP the encoder may use inside the picture
    pub qp_min: i32,

    /// Highest QP the encoder may use inside the picture
    pub qp_max: i32,

    /// Picture is coded intra
    pub intra: bool,

    /// Picture is coded (false when the skip policy drops it)
    pub coded: bool,

    /// GOP phase the QP was derived in
    pub phase: GopPhase,

    /// Index of the picture within its GOP
    pub frame_in_gop: u32,

    /// Virtual buffer surplus (`virtual - real` bits) before this picture
    pub buffer_target: i32,

    /// Bits this picture is expected to spend, never negative
    pub picture_target: i32,

    /// Average bits per picture at the current rate
    pub bit_per_pic: i32,
}

/// PI(D) filter over the picture size prediction error
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RcErrorFilter {
    proportional: i32,
    integral: i64,
    derivative: i32,
}

impl RcErrorFilter {
    /// Feed one prediction error (actual minus target bits)
    pub fn update(&mut self, error: i32) {
        self.derivative = saturate_i32(i64::from(error) - i64::from(self.proportional));
        self.integral = self.integral.saturating_add(i64::from(error));
        self.proportional = error;
    }

    /// Weighted correction `(4·P + 6·I) / 100`
    #[must_use]
    pub fn average(&self) -> i32 {
        let weighted = (4 * i64::from(self.proportional)).saturating_add(self.integral.saturating_mul(6));
        saturate_i32(div_round_wide(weighted, 100))
    }

    /// Change between the last two errors
    #[must_use]
    pub fn derivative(&self) -> i32 {
        self.derivative
    }

    /// Clear all terms
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Running QP sum over the inter pictures of the current GOP
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct GopAccumulator {
    qp_sum: i64,
    inter_pictures: u32,
}

impl GopAccumulator {
    fn add(&mut self, qp: i32) {
        self.qp_sum += i64::from(qp);
        self.inter_pictures += 1;
    }

    /// Mean QP of the finished GOP, leaving the accumulator empty
    fn take_average(&mut self) -> Option<i32> {
        let acc = std::mem::take(self);
        (acc.inter_pictures > 0)
            .then(|| saturate_i32(div_round_wide(acc.qp_sum, i64::from(acc.inter_pictures))))
    }
}

/// State carried from `before_picture` to the matching `after_picture`
#[derive(Debug, Clone, Copy)]
struct PendingPicture {
    base_qp: i32,
    intra: bool,
    coded: bool,
    picture_target: i32,
}

/// Generic picture-level rate controller
#[derive(Debug)]
pub struct RateControlEngine {
    /// Active configuration (runtime updates are folded in)
    config: RateControlConfig,

    /// Codec constants
    profile: CodecProfile,

    /// Leaky-bucket accounting
    vb: VirtualBuffer,

    /// Quant step to picture bits regression
    model: LinearModel,

    /// Prediction error filter
    rc_error: RcErrorFilter,

    /// QP average of the current GOP
    gop: GopAccumulator,

    /// Pending runtime updates
    mailbox: ParamMailbox,

    /// Statistics
    stats: RateControlStats,

    /// Macroblocks per picture
    mb_per_pic: u32,

    /// Configured or table-derived starting QP
    initial_qp: i32,

    /// Base QP (before intra adjustment) of the last picture
    previous_qp: i32,

    /// Last picture was intra
    prev_intra: bool,

    /// Index of the next picture within its GOP
    frame_in_gop: u32,

    /// No picture has been started yet
    first_picture: bool,

    /// Next picture must start a GOP
    keyframe_pending: bool,

    /// Decision awaiting feedback
    pending: Option<PendingPicture>,
}

impl RateControlEngine {
    /// Create a controller for `config` using the constants in `profile`
    pub fn new(config: RateControlConfig, profile: CodecProfile) -> Result<Self> {
        config.check(profile.qp_ceiling())?;

        let mb_per_pic = config.mb_per_pic();
        let bitrate = effective_bitrate(&config, mb_per_pic);
        let vb = VirtualBuffer::new(bitrate, config.fps_num, config.fps_den, config.gop_len);

        let mut params = ModelParams::picture_level(profile.model_capacity);
        params.slope_limits = profile.slope_limits;
        params.degenerate = profile.degenerate_fit;

        let mut engine = Self {
            config,
            profile,
            vb,
            model: LinearModel::new(params),
            rc_error: RcErrorFilter::default(),
            gop: GopAccumulator::default(),
            mailbox: ParamMailbox::new(),
            stats: RateControlStats::default(),
            mb_per_pic,
            initial_qp: 0,
            previous_qp: 0,
            prev_intra: false,
            frame_in_gop: 0,
            first_picture: true,
            keyframe_pending: false,
            pending: None,
        };
        engine.initial_qp = engine.derive_initial_qp();
        engine.previous_qp = engine.initial_qp;

        info!(
            "{} rate control: {}x{} ({} MBs), {} bps at {}/{} fps, GOP {}, QP {}..={}, initial QP {}",
            engine.profile.name,
            engine.config.width,
            engine.config.height,
            mb_per_pic,
            engine.vb.bit_rate(),
            engine.config.fps_num,
            engine.config.fps_den,
            engine.config.gop_len,
            engine.config.qp_min,
            engine.config.qp_max,
            engine.initial_qp
        );

        Ok(engine)
    }

    /// Decide QP and coding type for the next picture
    pub fn before_picture(&mut self, request: PictureRequest) -> PictureDecision {
        if let Some(params) = self.mailbox.take() {
            self.apply_params(params);
        }

        if self.pending.take().is_some() {
            warn!("before_picture called twice without after_picture, previous decision dropped");
        }

        let forced = std::mem::take(&mut self.keyframe_pending) | request.force_intra;
        if forced && self.frame_in_gop != 0 {
            debug!("Intra picture requested, starting new GOP");
            self.frame_in_gop = 0;
        }

        let time_increment = match request.time_increment {
            Some(ticks) => ticks,
            None if self.first_picture => 0,
            None => self.config.fps_den,
        };
        let buffer_target = self
            .vb
            .update(i32::try_from(time_increment).unwrap_or(i32::MAX));
        if buffer_target.abs() >= COUNTER_LIMIT {
            self.stats.saturated_targets += 1;
            debug!("Virtual buffer target saturated at {}", buffer_target);
        }
        self.stats.last_target_bits = buffer_target;

        let intra = self.frame_in_gop == 0;
        let phase = GopPhase::from_index(self.frame_in_gop, self.profile.early_frames);
        self.vb.advance_gop(intra, self.config.gop_len);
        if intra {
            self.stats.gop_bits = 0;
        }

        let bit_per_pic = self.vb.bit_per_pic();
        let spread = self.profile.spread.divisor(self.vb.gop_rem());
        let raw_target = i64::from(bit_per_pic) + i64::from(div_round(buffer_target, spread));
        let picture_target = saturate_i32(raw_target.max(0));
        // steady-state request; a negative value forces the large QP step
        let request = if self.profile.error_feedback {
            saturate_i32(i64::from(picture_target) - i64::from(self.rc_error.average()))
        } else {
            saturate_i32(raw_target)
        };

        let coded = if self.config.picture_skip && !intra {
            self.vb.pic_skip(self.config.picture_rc)
        } else {
            true
        };

        let base_qp = if self.config.picture_rc {
            self.phase_qp(phase, buffer_target, picture_target, request)
        } else {
            self.initial_qp
        }
        .clamp(self.config.qp_min, self.config.qp_max);

        let qp = if intra {
            match self.config.fixed_intra_qp {
                Some(qp) => qp,
                None if !self.prev_intra => base_qp.saturating_add(self.config.intra_qp_delta),
                None => base_qp,
            }
            .clamp(self.config.qp_min, self.config.qp_max)
        } else {
            base_qp
        };

        debug!(
            "{} picture {} ({:?}, {}): qp={} base={} buffer={} target={} request={}{}",
            self.profile.name,
            self.frame_in_gop,
            phase,
            if intra { "intra" } else { "inter" },
            qp,
            base_qp,
            buffer_target,
            picture_target,
            request,
            if coded { "" } else { " skipped" }
        );

        self.pending = Some(PendingPicture {
            base_qp,
            intra,
            coded,
            picture_target,
        });
        self.first_picture = false;

        PictureDecision {
            qp,
            qp_min: self.config.qp_min,
            qp_max: self.config.qp_max,
            intra,
            coded,
            phase,
            frame_in_gop: self.frame_in_gop,
            buffer_target,
            picture_target,
            bit_per_pic,
        }
    }

    fn phase_qp(
        &mut self,
        phase: GopPhase,
        buffer_target: i32,
        picture_target: i32,
        request: i32,
    ) -> i32 {
        match phase {
            GopPhase::Start => {
                let average = self.gop.take_average();
                if self.config.gop_len <= 2 && self.model.is_warm() {
                    // short GOPs: intra pictures follow the model like inter ones
                    self.model_qp(picture_target)
                } else {
                    average.unwrap_or(self.initial_qp)
                }
            }
            GopPhase::Early => {
                if buffer_target > 0 {
                    self.previous_qp - self.profile.early_step
                } else {
                    self.previous_qp + self.profile.early_step
                }
            }
            GopPhase::Steady => {
                if request < 0 {
                    self.previous_qp + self.profile.large_step
                } else {
                    if !self.model.is_warm() {
                        self.stats.model_fallbacks += 1;
                        trace!("Model cold, keeping QP {}", self.previous_qp);
                    }
                    self.model_qp(request)
                }
            }
        }
    }

    fn model_qp(&self, bits: i32) -> i32 {
        self.model.predict_qp(
            self.profile.quant_steps,
            self.normalize(bits),
            self.previous_qp,
            self.profile.delta_limit,
        )
    }

    fn normalize(&self, bits: i32) -> i32 {
        match self.profile.sample_scale {
            SampleScale::BitsPerPicture => mul_div(bits, 256, self.vb.bit_per_pic()),
            SampleScale::Macroblocks => {
                mul_div(bits, 256, i32::try_from(self.mb_per_pic).unwrap_or(i32::MAX))
            }
        }
    }

    /// Feed back the coded size of the picture decided last
    ///
    /// Returns `false` (and changes nothing) when there is no pending
    /// decision.
    pub fn after_picture(&mut self, coded_bytes: u32) -> bool {
        let Some(picture) = self.pending.take() else {
            warn!("after_picture without a pending before_picture, feedback ignored");
            return false;
        };

        let bits = saturate_i32(i64::from(coded_bytes) * 8);
        self.vb.add_real_bits(bits);

        self.stats.pictures += 1;
        self.stats.total_bits += u64::from(coded_bytes) * 8;
        self.stats.gop_bits += u64::from(coded_bytes) * 8;
        if picture.intra {
            self.stats.intra_pictures += 1;
        }
        if !picture.coded {
            self.stats.skipped_pictures += 1;
        }

        let gop_len = self.config.gop_len;
        if picture.coded && (!picture.intra || gop_len == 1) {
            let qs = self.profile.quant_step(picture.base_qp);
            let sample = self.normalize(bits);
            self.model.insert(qs, sample);
            self.model.refit();
            trace!("Model sample qs={} bits={} normalized={}", qs, bits, sample);

            if self.profile.error_feedback {
                if self.vb.gop_rem() == gop_len as i32 - 1 {
                    self.rc_error.reset();
                } else {
                    // measured against the uncorrected, non-negative target
                    let target = i64::from(picture.picture_target);
                    let error = (i64::from(bits) - target).min(2 * target);
                    self.rc_error.update(saturate_i32(error));
                }
            }

            if !picture.intra {
                self.gop.add(picture.base_qp);
            }
        }

        self.previous_qp = picture.base_qp;
        self.prev_intra = picture.intra;
        self.frame_in_gop += 1;
        if self.frame_in_gop >= gop_len {
            self.frame_in_gop = 0;
        }

        true
    }

    /// Apply runtime parameter changes immediately
    ///
    /// Invalid fields are logged and ignored; the rest still apply.
    pub fn apply_params(&mut self, params: RuntimeParams) {
        let mut rate_changed = false;

        if let Some(bps) = params.bitrate {
            if bps == 0 {
                warn!("Ignoring zero bitrate update");
            } else if bps != self.config.bitrate {
                self.config.bitrate = bps;
                rate_changed = true;
            }
        }

        if let Some((num, den)) = params.frame_rate {
            if num == 0 || den == 0 || num > i32::MAX as u32 || den > i32::MAX as u32 {
                warn!("Ignoring invalid frame rate update {}/{}", num, den);
            } else if (num, den) != (self.config.fps_num, self.config.fps_den) {
                self.config.fps_num = num;
                self.config.fps_den = den;
                rate_changed = true;
            }
        }

        if let Some(len) = params.intra_period {
            if len == 0 {
                warn!("Ignoring zero intra period update");
            } else if len != self.config.gop_len {
                info!("GOP length {} -> {}", self.config.gop_len, len);
                self.config.gop_len = len;
                if self.frame_in_gop >= len {
                    self.frame_in_gop = 0;
                }
            }
        }

        if let Some(qp) = params.min_qp {
            if (0..=self.config.qp_max).contains(&qp) {
                self.config.qp_min = qp;
            } else {
                warn!("Ignoring minimum QP {} outside 0..={}", qp, self.config.qp_max);
            }
        }

        if let Some(qp) = params.initial_qp {
            if (self.config.qp_min..=self.config.qp_max).contains(&qp) {
                self.config.initial_qp = Some(qp);
            } else {
                warn!(
                    "Ignoring initial QP {} outside {}..={}",
                    qp, self.config.qp_min, self.config.qp_max
                );
            }
        }

        if let Some(enable) = params.frame_skip {
            self.config.picture_skip = enable;
            if !enable {
                self.vb.reset_skip();
            }
        }

        if params.keyframe_request {
            self.keyframe_pending = true;
        }

        if rate_changed {
            let bitrate = effective_bitrate(&self.config, self.mb_per_pic);
            self.vb
                .set_rate(bitrate, self.config.fps_num, self.config.fps_den);
            info!(
                "{} rate changed: {} bps at {}/{} fps ({} bits per picture)",
                self.profile.name,
                bitrate,
                self.config.fps_num,
                self.config.fps_den,
                self.vb.bit_per_pic()
            );
        }

        self.initial_qp = self.derive_initial_qp();

        if rate_changed && self.profile.reset_on_rate_change {
            self.model.reset();
            self.gop = GopAccumulator::default();
            self.rc_error.reset();
            self.previous_qp = self.initial_qp;
            debug!("Rate model reset, restarting from QP {}", self.initial_qp);
        }
    }

    fn derive_initial_qp(&self) -> i32 {
        self.config
            .initial_qp
            .unwrap_or_else(|| {
                self.profile
                    .initial_qp
                    .lookup(self.vb.bit_per_pic(), self.mb_per_pic * 256)
            })
            .clamp(self.config.qp_min, self.config.qp_max)
    }

    /// Record the mean macroblock QP reported by the encoder
    pub fn record_average_mb_qp(&mut self, qp: i32) {
        self.stats.average_mb_qp = Some(qp);
    }

    /// Return to the freshly constructed state, keeping the active configuration
    pub fn reset(&mut self) {
        let bitrate = effective_bitrate(&self.config, self.mb_per_pic);
        self.vb = VirtualBuffer::new(
            bitrate,
            self.config.fps_num,
            self.config.fps_den,
            self.config.gop_len,
        );
        self.model.reset();
        self.rc_error.reset();
        self.gop = GopAccumulator::default();
        self.stats = RateControlStats::default();
        self.initial_qp = self.derive_initial_qp();
        self.previous_qp = self.initial_qp;
        self.prev_intra = false;
        self.frame_in_gop = 0;
        self.first_picture = true;
        self.keyframe_pending = false;
        self.pending = None;
    }

    /// Handle for posting runtime updates from other threads
    #[must_use]
    pub fn mailbox(&self) -> ParamMailbox {
        self.mailbox.clone()
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &RateControlConfig {
        &self.config
    }

    /// Codec constants
    #[must_use]
    pub fn profile(&self) -> &CodecProfile {
        &self.profile
    }

    /// Statistics
    #[must_use]
    pub fn stats(&self) -> &RateControlStats {
        &self.stats
    }

    /// Virtual buffer state
    #[must_use]
    pub fn virtual_buffer(&self) -> &VirtualBuffer {
        &self.vb
    }

    /// Picture-level regression model
    #[must_use]
    pub fn model(&self) -> &LinearModel {
        &self.model
    }

    /// Prediction error filter
    #[must_use]
    pub fn rc_error(&self) -> &RcErrorFilter {
        &self.rc_error
    }

    /// Starting QP in effect
    #[must_use]
    pub fn initial_qp(&self) -> i32 {
        self.initial_qp
    }

    /// Base QP of the last completed picture
    #[must_use]
    pub fn previous_qp(&self) -> i32 {
        self.previous_qp
    }

    /// Index within the GOP of the next picture
    #[must_use]
    pub fn frame_in_gop(&self) -> u32 {
        self.frame_in_gop
    }

    /// Macroblocks per picture
    #[must_use]
    pub fn mb_per_pic(&self) -> u32 {
        self.mb_per_pic
    }

    /// True between `before_picture` and `after_picture`
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }
}

/// Configured bitrate limited to what the picture size can use
fn effective_bitrate(config: &RateControlConfig, mb_per_pic: u32) -> i32 {
    let cap = max_bitrate(mb_per_pic, config.fps_num, config.fps_den);
    let requested = i32::try_from(config.bitrate).unwrap_or(i32::MAX);
    if requested > cap {
        info!("Bitrate {} bps clamped to {} bps", requested, cap);
        cap
    } else {
        requested
    }
}
