//! Rate / quantization regression model
//!
//! A [`LinearModel`] keeps a short history of observations in a
//! [`BoundedRing`] and refits two coefficients by ordinary least squares after
//! every insertion. Two curve forms are supported:
//!
//! - [`CurveForm::InverseQuadratic`]: samples are `(quant_step, bits)` and the
//!   model is `bits · qs² = a1 · qs + a2`, so `bits ≈ a1/qs + a2/qs²`. Used by
//!   the picture-level controllers of both codecs.
//! - [`CurveForm::Linear`]: samples are `(x, y)` and the model is
//!   `y = a1 · x / scale + a2`. Used by the H.264 MAD threshold controller.
//!
//! All sums run on saturating 64-bit integers; nothing in here can panic.
//!
//! # Usage
//!
//! ```rust
//! use vepu_rc_core::model::{DeltaLimit, LinearModel, ModelParams};
//!
//! let steps: Vec<i32> = (1..=52).map(|qp| qp * 4).collect();
//! let mut model = LinearModel::new(ModelParams::picture_level(15));
//!
//! for qp in [20usize, 24, 28] {
//!     let qs = steps[qp];
//!     model.insert(qs, 400_000 / qs);
//!     model.refit();
//! }
//!
//! let qp = model.predict_qp(&steps, 400_000 / steps[24], 20, Some(DeltaLimit::new(4, 4, 10)));
//! assert_eq!(qp, 24);
//! ```

use tracing::trace;

use crate::arith::{div_round_wide, mul_div_wide};
use crate::ring::BoundedRing;

/// QP increase applied when the bit request is non-positive and no delta
/// limit is configured
pub const FAST_INCREASE_QP: i32 = 10;

/// Shape of the fitted curve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurveForm {
    /// `y · x² = a1 · x + a2`
    InverseQuadratic,

    /// `y = a1 · x / slope_scale + a2`
    Linear {
        /// Fixed-point scale of the slope coefficient
        slope_scale: i64,
    },
}

/// What happens when a sample arrives at an `x` already in the history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// Replace the stored `y` with the mean of old and new
    Average,

    /// Store the sample as a new entry, displacing the oldest
    Append,
}

/// What a refit does when every sample shares one `x`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegenerateFit {
    /// Zero both coefficients
    Clear,

    /// Keep two thirds of the previous slope and refit the intercept
    ShrinkSlope,
}

/// Construction parameters of a [`LinearModel`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelParams {
    /// History length
    pub capacity: usize,

    /// Fitted curve
    pub form: CurveForm,

    /// Duplicate-x handling
    pub duplicates: DuplicatePolicy,

    /// Inclusive bounds applied to `a1` after every fit
    pub slope_limits: Option<(i64, i64)>,

    /// Handling of a fit with no spread in `x`
    pub degenerate: DegenerateFit,
}

impl ModelParams {
    /// Picture-level `(quant_step, bits)` model with duplicate averaging
    #[must_use]
    pub const fn picture_level(capacity: usize) -> Self {
        Self {
            capacity,
            form: CurveForm::InverseQuadratic,
            duplicates: DuplicatePolicy::Average,
            slope_limits: None,
            degenerate: DegenerateFit::Clear,
        }
    }

    /// Restrict `a1` to `[min, max]`
    #[must_use]
    pub const fn with_slope_limits(mut self, min: i64, max: i64) -> Self {
        self.slope_limits = Some((min, max));
        self
    }
}

/// Bounds on how far a prediction may move from the previous QP
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeltaLimit {
    /// Normal per-picture QP change limit
    pub max_delta: i32,

    /// Limit used when the unconstrained change exceeds `fast_threshold`
    pub fast_max_delta: i32,

    /// Unconstrained change above which `fast_max_delta` applies
    pub fast_threshold: i32,
}

impl DeltaLimit {
    /// Create a delta limit
    #[must_use]
    pub const fn new(max_delta: i32, fast_max_delta: i32, fast_threshold: i32) -> Self {
        Self {
            max_delta,
            fast_max_delta,
            fast_threshold,
        }
    }

    /// Clamp `qp` so that it stays within the allowed distance of `previous`
    #[must_use]
    pub fn apply(&self, previous: i32, qp: i32) -> i32 {
        let raw = qp - previous;
        let limit = if raw.abs() > self.fast_threshold {
            self.fast_max_delta
        } else {
            self.max_delta
        };
        previous + raw.clamp(-limit, limit)
    }
}

/// One observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    /// Independent variable (quant step or threshold)
    pub x: i32,

    /// Dependent variable (normalized bits or count)
    pub y: i32,
}

/// Bounded-history two-coefficient regression
#[derive(Debug, Clone)]
pub struct LinearModel {
    params: ModelParams,
    samples: BoundedRing<Sample>,
    a1: i64,
    a2: i64,
}

impl LinearModel {
    /// Create an empty model with zero coefficients
    #[must_use]
    pub fn new(params: ModelParams) -> Self {
        Self {
            params,
            samples: BoundedRing::new(params.capacity),
            a1: 0,
            a2: 0,
        }
    }

    /// Record an observation according to the duplicate policy
    pub fn insert(&mut self, x: i32, y: i32) {
        if self.params.duplicates == DuplicatePolicy::Average {
            if let Some(existing) = self.samples.find_mut(|s| s.x == x) {
                existing.y = ((i64::from(existing.y) + i64::from(y)) / 2) as i32;
                return;
            }
        }
        self.samples.push(Sample { x, y });
    }

    /// Recompute the coefficients over the current history
    ///
    /// Fewer than two samples leave the previous coefficients in force. A
    /// degenerate design (all `x` equal) follows [`ModelParams::degenerate`]:
    /// either both coefficients are zeroed, or the slope shrinks to two
    /// thirds of its previous value and the intercept is refitted around it.
    pub fn refit(&mut self) {
        let n = self.samples.len() as i64;
        if n < 2 {
            return;
        }

        let (mut sx, mut sy, mut sxx, mut sxy) = (0i64, 0i64, 0i64, 0i64);
        for (x, y) in self.fit_points() {
            sx = sx.saturating_add(x);
            sy = sy.saturating_add(y);
            sxx = sxx.saturating_add(x.saturating_mul(x));
            sxy = sxy.saturating_add(x.saturating_mul(y));
        }

        let denom = n.saturating_mul(sxx).saturating_sub(sx.saturating_mul(sx));
        let numer = n.saturating_mul(sxy).saturating_sub(sx.saturating_mul(sy));
        let slope = match (denom, self.params.degenerate) {
            (0, DegenerateFit::Clear) => {
                self.a1 = 0;
                self.a2 = 0;
                trace!("Degenerate fit over {} samples, coefficients cleared", n);
                return;
            }
            (0, DegenerateFit::ShrinkSlope) => {
                trace!("Degenerate fit over {} samples, shrinking slope {}", n, self.a1);
                self.a1.saturating_mul(2) / 3
            }
            _ => match self.params.form {
                CurveForm::InverseQuadratic => mul_div_wide(numer, 1, denom),
                CurveForm::Linear { slope_scale } => mul_div_wide(numer, slope_scale, denom),
            },
        };

        let a1 = self.clamp_slope(slope);
        let a2 = match self.params.form {
            CurveForm::InverseQuadratic => div_round_wide(sy.saturating_sub(a1.saturating_mul(sx)), n),
            CurveForm::Linear { slope_scale } => div_round_wide(sy, n)
                .saturating_sub(mul_div_wide(a1, sx, n.saturating_mul(slope_scale))),
        };

        self.a1 = a1;
        self.a2 = a2;
        trace!("Refit over {} samples: a1={} a2={}", n, a1, a2);
    }

    fn fit_points(&self) -> impl Iterator<Item = (i64, i64)> + '_ {
        let form = self.params.form;
        self.samples.iter().map(move |s| {
            let x = i64::from(s.x);
            let y = i64::from(s.y);
            match form {
                CurveForm::InverseQuadratic => (x, y.saturating_mul(x).saturating_mul(x)),
                CurveForm::Linear { .. } => (x, y),
            }
        })
    }

    fn clamp_slope(&self, a1: i64) -> i64 {
        match self.params.slope_limits {
            Some((min, max)) => a1.clamp(min, max),
            None => a1,
        }
    }

    /// Evaluate the fitted curve at `x`
    #[must_use]
    pub fn evaluate(&self, x: i32) -> i64 {
        let x = i64::from(x);
        match self.params.form {
            CurveForm::InverseQuadratic => {
                div_round_wide(self.a1, x).saturating_add(div_round_wide(self.a2, x.saturating_mul(x)))
            }
            CurveForm::Linear { slope_scale } => {
                mul_div_wide(self.a1, x, slope_scale).saturating_add(self.a2)
            }
        }
    }

    /// Predict the QP whose quant step best yields `target`
    ///
    /// `steps` maps QP to quant step; its last index is the largest QP the
    /// walk may reach. The search starts at `previous` and stops at the first
    /// local minimum of `|estimate - target|`. With a [`DeltaLimit`] the
    /// result is kept within `max_delta` (or `fast_max_delta`) of `previous`.
    #[must_use]
    pub fn predict_qp(
        &self,
        steps: &[i32],
        target: i32,
        previous: i32,
        limit: Option<DeltaLimit>,
    ) -> i32 {
        let Some(last) = steps.len().checked_sub(1) else {
            return previous;
        };
        let qp_ceiling = last as i32;

        if !self.is_warm() {
            return previous;
        }

        if target <= 0 {
            let step = limit.map_or(FAST_INCREASE_QP, |l| l.max_delta);
            return (previous + step).clamp(0, qp_ceiling);
        }

        let target = i64::from(target);
        let mut qp = previous.clamp(0, qp_ceiling);
        let mut best_qp = qp;
        let mut best = i64::MAX;

        loop {
            let residual = self.evaluate(steps[qp as usize]).saturating_sub(target);
            if residual.saturating_abs() >= best {
                break;
            }
            best = residual.saturating_abs();
            best_qp = qp;

            if residual <= 0 {
                // estimate under target: a finer quantizer spends more bits
                if qp == 0 {
                    break;
                }
                qp -= 1;
            } else {
                if qp == qp_ceiling {
                    break;
                }
                qp += 1;
            }
        }

        let qp = match limit {
            Some(limit) => limit.apply(previous, best_qp),
            None => best_qp,
        };
        qp.clamp(0, qp_ceiling)
    }

    /// True once a fit has produced a non-zero coefficient
    #[must_use]
    pub fn is_warm(&self) -> bool {
        self.a1 != 0 || self.a2 != 0
    }

    /// Slope coefficient
    #[must_use]
    pub fn a1(&self) -> i64 {
        self.a1
    }

    /// Intercept coefficient
    #[must_use]
    pub fn a2(&self) -> i64 {
        self.a2
    }

    /// Number of samples in the history
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True when the history is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// History in insertion order
    pub fn samples(&self) -> impl Iterator<Item = &Sample> + '_ {
        self.samples.iter()
    }

    /// Construction parameters
    #[must_use]
    pub fn params(&self) -> &ModelParams {
        &self.params
    }

    /// Forget the history and zero both coefficients
    pub fn reset(&mut self) {
        self.samples.clear();
        self.a1 = 0;
        self.a2 = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn steps() -> Vec<i32> {
        (0..52).map(|qp| 3 + qp * 4).collect()
    }

    fn mad_params() -> ModelParams {
        ModelParams {
            capacity: 3,
            form: CurveForm::Linear { slope_scale: 32 },
            duplicates: DuplicatePolicy::Append,
            slope_limits: Some((0, 1024 * 32)),
            degenerate: DegenerateFit::Clear,
        }
    }

    #[test]
    fn test_duplicate_x_is_averaged() {
        let mut model = LinearModel::new(ModelParams::picture_level(15));
        model.insert(40, 1000);
        model.insert(40, 3001);
        assert_eq!(model.len(), 1);
        assert_eq!(model.samples().next(), Some(&Sample { x: 40, y: 2000 }));

        model.insert(44, 10);
        model.insert(40, 0);
        assert_eq!(model.len(), 2);
        assert_eq!(model.samples().next(), Some(&Sample { x: 40, y: 1000 }));
    }

    #[test]
    fn test_append_policy_keeps_duplicates() {
        let mut model = LinearModel::new(mad_params());
        for _ in 0..5 {
            model.insert(1536, 0);
        }
        assert_eq!(model.len(), 3);
    }

    #[test]
    fn test_single_sample_keeps_coefficients() {
        let mut model = LinearModel::new(ModelParams::picture_level(15));
        model.insert(40, 1000);
        model.refit();
        assert!(!model.is_warm());
        assert_eq!((model.a1(), model.a2()), (0, 0));
    }

    #[test]
    fn test_degenerate_fit_clears() {
        let mut model = LinearModel::new(mad_params());
        model.insert(1536, 10);
        model.insert(2000, 30);
        model.refit();
        assert!(model.is_warm());

        model.insert(512, 1);
        model.insert(512, 2);
        model.insert(512, 3);
        model.refit();
        assert!(!model.is_warm());
    }

    #[test]
    fn test_degenerate_fit_shrinks_slope() {
        let mut model = LinearModel::new(ModelParams {
            capacity: 3,
            duplicates: DuplicatePolicy::Append,
            degenerate: DegenerateFit::ShrinkSlope,
            ..ModelParams::picture_level(3)
        });
        model.insert(40, 20_000);
        model.insert(80, 10_000);
        model.refit();
        assert_eq!((model.a1(), model.a2()), (800_000, 0));

        // the ring now only holds samples at qs 60
        for _ in 0..3 {
            model.insert(60, 12_000);
        }
        model.refit();
        assert_eq!(model.a1(), 533_333);
        assert_eq!(model.a2(), 12_000 * 3600 - 533_333 * 60);
        assert!(model.is_warm());

        model.refit();
        assert_eq!(model.a1(), 355_555);
    }

    #[test]
    fn test_inverse_quadratic_recovers_curve() {
        // bits = 800000 / qs exactly: a1 = 800000, a2 = 0
        let mut model = LinearModel::new(ModelParams::picture_level(15));
        for qs in [40, 80, 100, 160] {
            model.insert(qs, 800_000 / qs);
            model.refit();
        }
        assert_eq!(model.a1(), 800_000);
        assert_eq!(model.a2(), 0);
        assert_eq!(model.evaluate(200), 4000);
    }

    #[test]
    fn test_linear_fit_with_scale() {
        // y = 2x + 100 with slope scale 32 -> a1 = 64
        let mut model = LinearModel::new(mad_params());
        for x in [10, 20, 30] {
            model.insert(x, 2 * x + 100);
        }
        model.refit();
        assert_eq!(model.a1(), 64);
        assert_eq!(model.a2(), 100);
        assert_eq!(model.evaluate(50), 200);
    }

    #[test]
    fn test_slope_limits() {
        let mut model = LinearModel::new(mad_params());
        // negative slope is clamped to zero
        model.insert(10, 100);
        model.insert(20, 50);
        model.refit();
        assert_eq!(model.a1(), 0);
        assert_eq!(model.a2(), 75);
    }

    #[test]
    fn test_cold_model_returns_previous() {
        let model = LinearModel::new(ModelParams::picture_level(15));
        assert_eq!(model.predict_qp(&steps(), 5000, 30, None), 30);
        assert_eq!(model.predict_qp(&steps(), -5, 30, None), 30);
    }

    #[test]
    fn test_non_positive_target_raises_qp() {
        let mut model = LinearModel::new(ModelParams::picture_level(15));
        model.insert(50, 1000);
        model.insert(70, 700);
        model.refit();

        assert_eq!(model.predict_qp(&steps(), 0, 30, None), 40);
        assert_eq!(model.predict_qp(&steps(), -1, 48, None), 51);
        assert_eq!(model.predict_qp(&steps(), -1, 30, Some(DeltaLimit::new(4, 4, 10))), 34);
    }

    #[test]
    fn test_prediction_walks_to_local_minimum() {
        let steps = steps();
        let mut model = LinearModel::new(ModelParams::picture_level(15));
        for qp in [10usize, 20, 30] {
            model.insert(steps[qp], 1_000_000 / steps[qp]);
            model.refit();
        }

        let target = 1_000_000 / steps[25];
        assert_eq!(model.predict_qp(&steps, target, 10, None), 25);
        assert_eq!(model.predict_qp(&steps, target, 40, None), 25);
    }

    #[test]
    fn test_prediction_respects_delta_limit() {
        let steps = steps();
        let mut model = LinearModel::new(ModelParams::picture_level(15));
        for qp in [10usize, 20, 30] {
            model.insert(steps[qp], 1_000_000 / steps[qp]);
            model.refit();
        }

        let limit = DeltaLimit::new(2, 4, 10);
        let target = 1_000_000 / steps[25];
        // raw delta 15 > threshold: fast limit
        assert_eq!(model.predict_qp(&steps, target, 10, Some(limit)), 14);
        // raw delta 5 <= threshold: normal limit
        assert_eq!(model.predict_qp(&steps, target, 30, Some(limit)), 28);

        for previous in 0..52 {
            for target in [1, 50, 500, 5_000, 50_000, 500_000] {
                let qp = model.predict_qp(&steps, target, previous, Some(limit));
                assert!((qp - previous).abs() <= 4, "prev={previous} target={target} qp={qp}");
                assert!((0..=51).contains(&qp));
            }
        }
    }

    #[test]
    fn test_delta_limit_apply() {
        let limit = DeltaLimit::new(2, 4, 10);
        assert_eq!(limit.apply(20, 21), 21);
        assert_eq!(limit.apply(20, 25), 22);
        assert_eq!(limit.apply(20, 31), 24);
        assert_eq!(limit.apply(20, 8), 16);
    }

    #[test]
    fn test_reset() {
        let mut model = LinearModel::new(ModelParams::picture_level(15));
        model.insert(50, 1000);
        model.insert(70, 700);
        model.refit();
        model.reset();
        assert!(model.is_empty());
        assert!(!model.is_warm());
    }
}
