//! VP8 constant tables and controller profile

use vepu_rc_core::{
    BudgetSpread, CodecProfile, DegenerateFit, DeltaLimit, InitialQpTable, RateControlConfig,
    SampleScale,
};

/// Largest VP8 quantizer index
pub const QP_MAX: i32 = 127;

/// AC quantizer per quantizer index
pub const AC_QUANTS: [i32; 128] = [
    4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27, 28,
    29, 30, 31, 32, 33, 34, 35, 36, 37, 38, 39, 40, 41, 42, 43, 44, 45, 46, 47, 48, 49, 50, 51,
    52, 53, 54, 55, 56, 57, 58, 60, 62, 64, 66, 68, 70, 72, 74, 76, 78, 80, 82, 84, 86, 88, 90,
    92, 94, 96, 98, 100, 102, 104, 106, 108, 110, 112, 114, 116, 119, 122, 125, 128, 131, 134,
    137, 140, 143, 146, 149, 152, 155, 158, 161, 164, 167, 170, 173, 177, 181, 185, 189, 193, 197,
    201, 205, 209, 213, 217, 221, 225, 229, 234, 239, 245, 249, 254, 259, 264, 269, 274, 279,
    284,
];

const INITIAL_THRESHOLDS: [i32; 12] = [47, 57, 73, 93, 122, 155, 214, 294, 373, 506, 781, i32::MAX];
const INITIAL_QPS: [i32; 12] = [120, 110, 100, 90, 80, 70, 60, 50, 40, 30, 20, 10];

/// Starting quantizer breakpoints
pub const INITIAL_QP: InitialQpTable = InitialQpTable {
    thresholds: &INITIAL_THRESHOLDS,
    qps: &INITIAL_QPS,
    high_rate_qp: 10,
};

/// VP8 controller constants
pub const VP8_PROFILE: CodecProfile = CodecProfile {
    name: "VP8",
    quant_steps: &AC_QUANTS,
    initial_qp: INITIAL_QP,
    model_capacity: 10,
    slope_limits: Some((-262_144, 262_143)),
    degenerate_fit: DegenerateFit::ShrinkSlope,
    delta_limit: Some(DeltaLimit::new(4, 4, QP_MAX)),
    early_frames: 1,
    early_step: 0,
    large_step: 4,
    spread: BudgetSpread::AtLeast(3),
    sample_scale: SampleScale::Macroblocks,
    error_feedback: true,
    reset_on_rate_change: true,
};

/// Picture-level defaults for VP8: full quantizer range, no intra offset
///
/// Use as the base of a builder with
/// [`build_over`](vepu_rc_core::RateControlConfigBuilder::build_over).
#[must_use]
pub fn default_config() -> RateControlConfig {
    RateControlConfig {
        qp_min: 0,
        qp_max: QP_MAX,
        intra_qp_delta: 0,
        ..RateControlConfig::default()
    }
}
