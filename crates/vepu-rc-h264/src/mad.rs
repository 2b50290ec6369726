//! MAD threshold controller
//!
//! The hardware counts macroblocks whose mean absolute difference falls under
//! a programmable threshold and lowers their QP by `mad_qp_delta`. This
//! controller steers the threshold so that about 30% of the macroblocks of a
//! picture land under it.
//!
//! A three-sample linear fit of threshold against count predicts the
//! threshold for the target count. While the fit is cold (fewer than two
//! distinct counts) the threshold is nudged up or down by a quarter or one
//! 256 step, whichever is larger. Every update is bounded to
//! `[previous / 2, max(2 · previous, 1024)]` and the result is a multiple of
//! 256 within `[0, 63 · 256]`.

use tracing::trace;
use vepu_rc_core::arith::saturate_i32;
use vepu_rc_core::model::{CurveForm, DegenerateFit, DuplicatePolicy, LinearModel, ModelParams};

/// Threshold granularity
pub const MAD_STEP: i32 = 256;

/// Threshold after a reset
pub const INITIAL_MAD_THRESHOLD: i32 = 6 * MAD_STEP;

/// Largest threshold the hardware accepts
pub const MAX_MAD_THRESHOLD: i32 = 63 * MAD_STEP;

/// Share of macroblocks, in percent, aimed to fall under the threshold
pub const TARGET_PERCENT: u32 = 30;

const MAD_MODEL: ModelParams = ModelParams {
    capacity: 3,
    form: CurveForm::Linear { slope_scale: 32 },
    duplicates: DuplicatePolicy::Append,
    slope_limits: Some((0, 1024 * 32)),
    degenerate: DegenerateFit::Clear,
};

/// Adaptive MAD threshold
#[derive(Debug, Clone)]
pub struct MadController {
    threshold: i32,
    target_count: i32,
    model: LinearModel,
}

impl MadController {
    /// Create a controller for pictures of `mb_per_pic` macroblocks
    #[must_use]
    pub fn new(mb_per_pic: u32) -> Self {
        let target = u64::from(mb_per_pic) * u64::from(TARGET_PERCENT) / 100;
        Self {
            threshold: INITIAL_MAD_THRESHOLD,
            target_count: i32::try_from(target).unwrap_or(i32::MAX),
            model: LinearModel::new(MAD_MODEL),
        }
    }

    /// Current threshold
    #[must_use]
    pub fn threshold(&self) -> i32 {
        self.threshold
    }

    /// Current threshold in hardware units
    #[must_use]
    pub fn threshold_div256(&self) -> u8 {
        (self.threshold / MAD_STEP) as u8
    }

    /// Macroblock count the controller aims for
    #[must_use]
    pub fn target_count(&self) -> i32 {
        self.target_count
    }

    /// Fitted model
    #[must_use]
    pub fn model(&self) -> &LinearModel {
        &self.model
    }

    /// Feed back the under-threshold count of a coded picture
    ///
    /// Returns the threshold for the next picture.
    pub fn update(&mut self, mad_count: u32) -> i32 {
        let previous = self.threshold;
        let count = i32::try_from(mad_count).unwrap_or(i32::MAX);
        let target = self.target_count;

        self.model.insert(count, previous);
        self.model.refit();

        let mut next = if self.model.a1() != 0 {
            saturate_i32(self.model.evaluate(target))
        } else if count < target {
            (previous.saturating_mul(5) / 4).max(previous.saturating_add(MAD_STEP))
        } else {
            (previous.saturating_mul(3) / 4).min(previous.saturating_sub(MAD_STEP))
        };

        if count < target / 2 {
            next = next.max(previous.saturating_add(MAD_STEP));
        }
        if count == 0 {
            next = next.max(previous.saturating_add(4 * MAD_STEP));
        }

        let ceiling = previous.saturating_mul(2).max(1024);
        next = next.clamp(previous / 2, ceiling);
        next = ((next.saturating_add(MAD_STEP / 2)) / MAD_STEP * MAD_STEP).clamp(0, MAX_MAD_THRESHOLD);

        trace!(
            "MAD: count {} (target {}), threshold {} -> {}",
            count,
            target,
            previous,
            next
        );

        self.threshold = next;
        next
    }

    /// Return to the initial threshold and forget the fit
    pub fn reset(&mut self) {
        self.threshold = INITIAL_MAD_THRESHOLD;
        self.model.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let mad = MadController::new(3600);
        assert_eq!(mad.threshold(), 1536);
        assert_eq!(mad.threshold_div256(), 6);
        assert_eq!(mad.target_count(), 1080);
    }

    #[test]
    fn test_zero_count_raises_threshold() {
        let mut mad = MadController::new(3600);
        let mut previous = mad.threshold();
        let mut seen = Vec::new();
        for _ in 0..3 {
            let next = mad.update(0);
            assert!(next >= previous + 1024);
            previous = next;
            seen.push(next);
        }
        assert_eq!(seen, vec![2560, 3584, 4608]);
    }

    #[test]
    fn test_cold_decrease_when_over_target() {
        let mut mad = MadController::new(3600);
        // 1536 * 3 / 4 = 1152, rounded to 1280
        assert_eq!(mad.update(3000), 1280);
    }

    #[test]
    fn test_warm_fit_aims_at_target() {
        let mut mad = MadController::new(3600);
        mad.update(600);
        mad.update(1500);
        assert_ne!(mad.model().a1(), 0);
        let threshold = mad.threshold();
        assert_eq!(threshold % MAD_STEP, 0);
        assert!(threshold > 0);
    }

    #[test]
    fn test_bounds_hold_for_any_count() {
        let mut mad = MadController::new(8160);
        for count in [0, 8160, 1, 4000, 2448, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 8160, 100] {
            let previous = mad.threshold();
            let next = mad.update(count);
            assert!(next >= previous / 2 - MAD_STEP / 2);
            assert!(next <= previous.saturating_mul(2).max(1024) + MAD_STEP / 2);
            assert_eq!(next % MAD_STEP, 0);
            assert!((0..=MAX_MAD_THRESHOLD).contains(&next));
        }
    }

    #[test]
    fn test_reset() {
        let mut mad = MadController::new(3600);
        mad.update(0);
        mad.update(0);
        mad.reset();
        assert_eq!(mad.threshold(), INITIAL_MAD_THRESHOLD);
        assert!(mad.model().is_empty());
    }
}
