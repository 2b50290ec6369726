//! Per-codec controller profile
//!
//! The H.264 and VP8 controllers share one state machine and differ only in
//! constants: the QP to quant-step table, the initial-QP breakpoints, model
//! history size, QP step sizes and a handful of behavioral switches. A
//! [`CodecProfile`] carries all of them so that [`RateControlEngine`]
//! stays codec-agnostic.
//!
//! [`RateControlEngine`]: crate::engine::RateControlEngine

use crate::arith::mul_div;
use crate::model::{DegenerateFit, DeltaLimit};

/// Above this many bits per picture the initial QP is the table's high-rate QP
const HIGH_RATE_BITS: i32 = 1_000_000;

/// Breakpoint table mapping a normalized picture budget to a starting QP
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitialQpTable {
    /// Ascending normalized-bit breakpoints, last entry `i32::MAX`
    pub thresholds: &'static [i32],

    /// QP chosen for the first breakpoint at or above the normalized budget
    pub qps: &'static [i32],

    /// QP for budgets above one million bits per picture
    pub high_rate_qp: i32,
}

impl InitialQpTable {
    /// Starting QP for `bits_per_pic` bits spread over `pels` luma samples
    #[must_use]
    pub fn lookup(&self, bits_per_pic: i32, pels: u32) -> i32 {
        if bits_per_pic > HIGH_RATE_BITS {
            return self.high_rate_qp;
        }

        let pels = i64::from(pels >> 8);
        let mut bits = i64::from(bits_per_pic.max(0) >> 5);
        bits *= pels + 250;
        bits /= 350 + 3 * pels / 4;
        let bits = mul_div(
            i32::try_from(bits).unwrap_or(i32::MAX),
            8000,
            i32::try_from(pels << 6).unwrap_or(i32::MAX),
        );

        self.thresholds
            .iter()
            .zip(self.qps)
            .find(|&(&threshold, _)| threshold >= bits)
            .or_else(|| self.thresholds.iter().zip(self.qps).last())
            .map_or(self.high_rate_qp, |(_, &qp)| qp)
    }
}

/// Normalization applied to picture bits before they enter the model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleScale {
    /// `bits · 256 / bit_per_pic`
    BitsPerPicture,

    /// `bits · 256 / mb_per_pic`
    Macroblocks,
}

/// How the buffer deficit is spread over the remaining GOP pictures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetSpread {
    /// Divide by `min(n, gop_rem)`
    AtMost(i32),

    /// Divide by `max(n, gop_rem)`
    AtLeast(i32),
}

impl BudgetSpread {
    /// Divisor for the given number of pictures left in the GOP
    #[must_use]
    pub fn divisor(self, gop_rem: i32) -> i32 {
        match self {
            Self::AtMost(n) => n.min(gop_rem).max(1),
            Self::AtLeast(n) => n.max(gop_rem).max(1),
        }
    }
}

/// Constants and switches that specialize the engine for one codec
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecProfile {
    /// Codec name used in log output
    pub name: &'static str,

    /// QP to quant-step table; its length bounds the QP range
    pub quant_steps: &'static [i32],

    /// Initial QP breakpoints
    pub initial_qp: InitialQpTable,

    /// Picture-level regression history length
    pub model_capacity: usize,

    /// Bounds on the regression slope
    pub slope_limits: Option<(i64, i64)>,

    /// Regression refit when every sample shares one quant step
    pub degenerate_fit: DegenerateFit,

    /// Per-picture QP change limit applied to model predictions
    pub delta_limit: Option<DeltaLimit>,

    /// Number of pictures after the GOP start handled by fixed steps
    pub early_frames: u32,

    /// QP step of the early-GOP heuristic
    pub early_step: i32,

    /// QP increase when the steady-state request is negative
    pub large_step: i32,

    /// Deficit spreading rule
    pub spread: BudgetSpread,

    /// Model sample normalization
    pub sample_scale: SampleScale,

    /// Subtract the filtered prediction error from the request
    pub error_feedback: bool,

    /// Discard model and GOP history when bitrate or frame rate changes
    pub reset_on_rate_change: bool,
}

impl CodecProfile {
    /// Largest QP the codec can express
    #[must_use]
    pub fn qp_ceiling(&self) -> i32 {
        (self.quant_steps.len() as i32 - 1).max(0)
    }

    /// Quant step of `qp`, clamped into the table
    #[must_use]
    pub fn quant_step(&self, qp: i32) -> i32 {
        let idx = qp.clamp(0, self.qp_ceiling()) as usize;
        self.quant_steps.get(idx).copied().unwrap_or(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THRESHOLDS: [i32; 9] = [27, 44, 72, 119, 192, 314, 453, 653, i32::MAX];
    const QPS: [i32; 9] = [49, 45, 41, 37, 33, 29, 25, 21, 17];

    fn table() -> InitialQpTable {
        InitialQpTable {
            thresholds: &THRESHOLDS,
            qps: &QPS,
            high_rate_qp: 17,
        }
    }

    #[test]
    fn test_lookup_720p_1mbps() {
        // 3600 macroblocks, 33333 bits per picture -> normalized 45
        assert_eq!(table().lookup(33_333, 3600 * 256), 41);
    }

    #[test]
    fn test_lookup_extremes() {
        assert_eq!(table().lookup(1_000_001, 3600 * 256), 17);
        assert_eq!(table().lookup(0, 3600 * 256), 49);
        assert_eq!(table().lookup(900_000, 99 * 256), 17);
        assert_eq!(table().lookup(33_333, 0), 17);
    }

    #[test]
    fn test_lookup_is_monotonic() {
        let mut last = i32::MAX;
        for bits in (0..1_000_000).step_by(5_000) {
            let qp = table().lookup(bits, 1620 * 256);
            assert!(qp <= last);
            last = qp;
        }
    }

    #[test]
    fn test_budget_spread() {
        assert_eq!(BudgetSpread::AtMost(3).divisor(150), 3);
        assert_eq!(BudgetSpread::AtMost(3).divisor(2), 2);
        assert_eq!(BudgetSpread::AtMost(3).divisor(0), 1);
        assert_eq!(BudgetSpread::AtLeast(3).divisor(150), 150);
        assert_eq!(BudgetSpread::AtLeast(3).divisor(1), 3);
    }
}
