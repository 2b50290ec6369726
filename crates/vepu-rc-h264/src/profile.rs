//! H.264 constant tables and controller profile

use vepu_rc_core::{
    BudgetSpread, CodecProfile, DegenerateFit, DeltaLimit, InitialQpTable, SampleScale,
};

/// Largest H.264 QP
pub const QP_MAX: i32 = 51;

/// Quantizer step size per QP (scaled so that QP 24 maps to 40)
pub const Q_STEP: [i32; 52] = [
    3, 3, 3, 4, 4, 5, 5, 6, 7, 7, 8, 9, 10, 11, 13, 14, 16, 18, 20, 23, 25, 28, 32, 36, 40, 45,
    51, 57, 64, 72, 80, 90, 101, 114, 128, 144, 160, 180, 203, 228, 256, 288, 320, 360, 405,
    456, 513, 577, 640, 720, 810, 896,
];

const INITIAL_THRESHOLDS: [i32; 9] = [27, 44, 72, 119, 192, 314, 453, 653, i32::MAX];
const INITIAL_QPS: [i32; 9] = [49, 45, 41, 37, 33, 29, 25, 21, 17];

/// Starting QP breakpoints
pub const INITIAL_QP: InitialQpTable = InitialQpTable {
    thresholds: &INITIAL_THRESHOLDS,
    qps: &INITIAL_QPS,
    high_rate_qp: 17,
};

/// Per-picture QP change limit used when delta limiting is enabled
pub const LIMITED_QP_DELTA: DeltaLimit = DeltaLimit::new(2, 4, 10);

/// H.264 controller constants
///
/// Model predictions are not delta limited here; see
/// [`H264Config::limit_qp_delta`](crate::H264Config::limit_qp_delta).
pub const H264_PROFILE: CodecProfile = CodecProfile {
    name: "H.264",
    quant_steps: &Q_STEP,
    initial_qp: INITIAL_QP,
    model_capacity: 15,
    slope_limits: None,
    degenerate_fit: DegenerateFit::Clear,
    delta_limit: None,
    early_frames: 2,
    early_step: 3,
    large_step: 5,
    spread: BudgetSpread::AtMost(3),
    sample_scale: SampleScale::BitsPerPicture,
    error_feedback: false,
    reset_on_rate_change: false,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_q_step_is_monotonic() {
        assert!(Q_STEP.windows(2).all(|w| w[0] <= w[1]));
        // step roughly doubles every 6 QPs
        for qp in 12..46 {
            let ratio = Q_STEP[qp + 6] as f64 / Q_STEP[qp] as f64;
            assert!((1.8..=2.3).contains(&ratio), "qp {qp}");
        }
    }

    #[test]
    fn test_profile_bounds() {
        assert_eq!(H264_PROFILE.qp_ceiling(), QP_MAX);
        assert_eq!(H264_PROFILE.quant_step(24), 40);
        assert_eq!(H264_PROFILE.quant_step(99), 896);
    }

    #[test]
    fn test_initial_qp_table() {
        // CIF at 384 kbps
        assert_eq!(INITIAL_QP.lookup(12_800, 396 * 256), 33);
        // 1080p at 8 Mbps
        assert_eq!(INITIAL_QP.lookup(266_666, 8160 * 256), 33);
        assert_eq!(INITIAL_QP.lookup(2_000_000, 8160 * 256), 17);
    }
}
