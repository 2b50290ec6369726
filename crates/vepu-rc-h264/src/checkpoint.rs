//! Macroblock checkpoint model
//!
//! The H.264 hardware can re-evaluate its output at up to ten checkpoints
//! (evenly spaced macroblock positions) within a picture. At each checkpoint
//! it compares the words written so far with a target and nudges the QP by
//! looking the error up in a seven-level ladder.
//!
//! The targets come from the picture's bit budget converted to a nonzero
//! coefficient budget through the measured bits per nonzero coefficient:
//!
//! - **Linear**: the budget is spread evenly over the picture. Used on the
//!   first inter picture of a GOP and whenever no previous count exists.
//! - **Adaptive**: the previous picture's per-checkpoint counts are rescaled
//!   to the new budget, preserving where in the picture the bits went.
//!
//! All intermediates use 64-bit integers; targets are clamped to
//! `[1, 65535]` and ladder breakpoints to the `i16` range.

use tracing::trace;
use vepu_rc_core::arith::{div_round_wide, saturate_i32};

/// Maximum number of checkpoints per picture
pub const MAX_CHECKPOINTS: usize = 10;

/// Number of ladder levels
pub const CONTROL_LEVELS: usize = 7;

/// QP change applied at each ladder level
pub const QP_CHANGE: [i32; CONTROL_LEVELS] = [-3, -2, -1, 0, 1, 2, 3];

/// Ladder breakpoints as multiples of the base word error
const WORD_ERROR_STEPS: [i64; CONTROL_LEVELS] = [-3, -2, -1, 1, 2, 3, 4];

/// Hardware limit of a checkpoint word target
const MAX_WORD_TARGET: i64 = 65_535;

/// How the checkpoint targets were derived
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointStrategy {
    /// Budget spread evenly across the picture
    Linear,

    /// Previous picture's distribution rescaled to the new budget
    Adaptive,
}

/// Checkpoint tables for one picture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointTable {
    /// Active checkpoints (`min(mb_rows, 10)`)
    pub count: usize,

    /// Macroblocks between consecutive checkpoints
    pub distance: u32,

    /// Cumulative word target per checkpoint; entries past `count` are zero
    pub targets: [u32; MAX_CHECKPOINTS],

    /// Word error breakpoints of the QP ladder (divided by 4)
    pub word_error: [i16; CONTROL_LEVELS],

    /// QP change per ladder level
    pub qp_change: [i32; CONTROL_LEVELS],

    /// Derivation used for `targets`
    pub strategy: CheckpointStrategy,
}

impl CheckpointTable {
    /// Targets of the active checkpoints
    #[must_use]
    pub fn active_targets(&self) -> &[u32] {
        &self.targets[..self.count]
    }
}

/// Per-instance checkpoint state
#[derive(Debug, Clone)]
pub struct CheckpointModel {
    mb_per_pic: u32,
    count: usize,
    distance: u32,

    /// Bits per nonzero coefficient, ×256
    bits_per_nz_coeff: i64,

    /// Nonzero coefficients of the previous inter picture
    prev_nz_count: i64,

    /// Per-checkpoint nonzero counts of the previous inter picture
    prev_counts: [u32; MAX_CHECKPOINTS],
}

impl CheckpointModel {
    /// Create the model for a picture of `mb_per_pic` macroblocks in `mb_rows` rows
    #[must_use]
    pub fn new(mb_per_pic: u32, mb_rows: u32) -> Self {
        let count = (mb_rows as usize).min(MAX_CHECKPOINTS);
        Self {
            mb_per_pic,
            count,
            distance: mb_per_pic / (count as u32 + 1),
            bits_per_nz_coeff: 0,
            prev_nz_count: 0,
            prev_counts: [0; MAX_CHECKPOINTS],
        }
    }

    /// Build the tables for an inter picture expected to spend `picture_target` bits
    ///
    /// Returns `None` until a bits-per-coefficient measurement exists.
    #[must_use]
    pub fn plan(
        &self,
        picture_target: i32,
        bit_per_pic: i32,
        first_inter_of_gop: bool,
    ) -> Option<CheckpointTable> {
        let bpnzc = self.bits_per_nz_coeff;
        if bpnzc <= 0 || self.count == 0 {
            return None;
        }

        let mb = i64::from(self.mb_per_pic).max(1);
        let nz_target = div_round_wide(i64::from(picture_target) * 256, bpnzc)
            .clamp(0, mb * 384)
            .min(i64::from(i32::MAX / 1024));

        let strategy = if first_inter_of_gop || self.prev_nz_count == 0 {
            CheckpointStrategy::Linear
        } else {
            CheckpointStrategy::Adaptive
        };

        let mut targets = [0u32; MAX_CHECKPOINTS];
        let word_step = match strategy {
            CheckpointStrategy::Linear => {
                let scale = div_round_wide(nz_target * 256, mb);
                let distance = i64::from(self.distance);
                for (i, target) in targets.iter_mut().take(self.count).enumerate() {
                    let position = distance * (i as i64 + 1) + 1;
                    *target = word_target(scale * position / 256);
                }
                div_round_wide(i64::from(bit_per_pic) * 256, bpnzc)
            }
            CheckpointStrategy::Adaptive => {
                let scale = div_round_wide(nz_target * 256, self.prev_nz_count);
                for (target, &prev) in targets.iter_mut().zip(&self.prev_counts).take(self.count) {
                    *target = word_target(i64::from(prev) * scale / 256);
                }
                div_round_wide(i64::from(bit_per_pic) * 256, bpnzc * 3)
            }
        };

        let mut word_error = [0i16; CONTROL_LEVELS];
        for (error, step) in word_error.iter_mut().zip(WORD_ERROR_STEPS) {
            let value = (step * word_step / 4).clamp(i64::from(i16::MIN), i64::from(i16::MAX));
            *error = value as i16;
        }

        trace!(
            "Checkpoints ({:?}): nz target {} over {} checkpoints, ladder step {}",
            strategy,
            nz_target,
            self.count,
            word_step
        );

        Some(CheckpointTable {
            count: self.count,
            distance: self.distance,
            targets,
            word_error,
            qp_change: QP_CHANGE,
            strategy,
        })
    }

    /// Feed back the statistics of a coded inter picture
    ///
    /// `rlc_count` is the picture's nonzero coefficient count; a zero count
    /// keeps the previous bits-per-coefficient estimate.
    pub fn update(&mut self, bits: i32, rlc_count: u32, checkpoint_counts: &[u32; MAX_CHECKPOINTS]) {
        if rlc_count > 0 {
            self.bits_per_nz_coeff = div_round_wide(i64::from(bits) * 256, i64::from(rlc_count));
        }
        self.prev_nz_count = i64::from(rlc_count);
        self.prev_counts = *checkpoint_counts;
    }

    /// Active checkpoint count
    #[must_use]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Macroblocks between checkpoints
    #[must_use]
    pub fn distance(&self) -> u32 {
        self.distance
    }

    /// Bits per nonzero coefficient ×256 (zero before the first measurement)
    #[must_use]
    pub fn bits_per_nz_coeff(&self) -> i32 {
        saturate_i32(self.bits_per_nz_coeff)
    }
}

/// Nonzero-coefficient count to hardware word target
fn word_target(coefficients: i64) -> u32 {
    (coefficients / 32 + 1).clamp(1, MAX_WORD_TARGET) as u32
}
