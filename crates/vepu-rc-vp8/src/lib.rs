//! # vepu-rc-vp8
//!
//! VP8 picture rate control for Hantro-style hardware encoders.
//!
//! This crate is part of the [vepu-rc](https://github.com/vepu-rc/vepu-rc)
//! workspace. It runs the shared engine from `vepu-rc-core` over the VP8
//! AC quantizer table (indices 0..=127).
//!
//! # Features
//!
//! - **Quantizer Selection**: Virtual buffer plus 10-sample regression
//! - **Error Feedback**: Filtered prediction error trims the next request
//! - **Bounded Steps**: Model-predicted quantizer moves at most ±4 per picture
//! - **Rate Changes**: New bitrate or frame rate restarts the model
//!
//! # Quick Start
//!
//! ```rust
//! use vepu_rc_core::{PictureRequest, RateControlConfig};
//! use vepu_rc_vp8::{default_config, Vp8RateControl};
//!
//! let config = RateControlConfig::builder()
//!     .resolution(640, 480)
//!     .bitrate(800_000)
//!     .gop_len(120)
//!     .build_over(default_config());
//! let mut rc = Vp8RateControl::new(config)?;
//!
//! for _ in 0..30 {
//!     let params = rc.before_picture(PictureRequest::default());
//!     if params.coded {
//!         // program params.qp, encode, read back the size
//!     }
//!     rc.after_picture(3_000);
//! }
//! assert_eq!(rc.stats().pictures, 30);
//! # Ok::<(), vepu_rc_core::RateControlError>(())
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

// =============================================================================
// MODULES
// =============================================================================

pub mod encoder;
pub mod profile;

// =============================================================================
// RE-EXPORTS
// =============================================================================

pub use encoder::{Vp8PictureParams, Vp8RateControl};
pub use profile::{default_config, AC_QUANTS, QP_MAX, VP8_PROFILE};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_default_controller() {
        let rc = Vp8RateControl::new(default_config()).unwrap();
        assert_eq!(rc.engine().profile().name, "VP8");
        assert_eq!(rc.engine().config().qp_max, QP_MAX);
    }
}
