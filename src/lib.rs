//! # vepu-rc
//!
//! Picture-level bitrate and QP control for Hantro-style hardware video
//! encoders.
//!
//! This crate provides a unified interface to the vepu-rc libraries:
//!
//! - **[`engine`]** - Codec-agnostic virtual buffer, regression model and GOP state machine
//! - **[`h264`]** - H.264 tables plus checkpoint and MAD threshold control
//! - **[`vp8`]** - VP8 quantizer tables and controller
//!
//! # Features
//!
//! Both codecs are enabled by default. You can selectively enable only what you need:
//!
//! ```toml
//! # Everything (default)
//! vepu-rc = "0.1"
//!
//! # H.264 only
//! vepu-rc = { version = "0.1", default-features = false, features = ["h264"] }
//! ```
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `h264` | Yes | H.264 picture and macroblock rate control |
//! | `vp8` | Yes | VP8 picture rate control |
//! | `full` | No | All codec adapters |
//!
//! # Quick Start
//!
//! ```rust
//! # #[cfg(feature = "h264")]
//! # fn main() -> Result<(), vepu_rc::engine::RateControlError> {
//! use vepu_rc::prelude::*;
//!
//! let config = H264Config::builder()
//!     .rc(RateControlConfig::builder()
//!         .resolution(1920, 1080)
//!         .bitrate(4_000_000)
//!         .frame_rate(30, 1)
//!         .build())
//!     .build();
//! let mut rc = H264RateControl::new(config)?;
//!
//! // The encode loop: decide, encode, report
//! let params = rc.before_picture(PictureRequest::default());
//! assert!(params.intra);
//! rc.after_picture(&H264Feedback::from_bytes(40_000));
//!
//! // Another thread may retune the stream at any time
//! rc.mailbox().post(RuntimeParams::default().bitrate(2_000_000));
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "h264"))]
//! # fn main() {}
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           vepu-rc                            │
//! ├─────────────────────────┬────────────────────────────────────┤
//! │      vepu-rc-h264       │            vepu-rc-vp8             │
//! │                         │                                    │
//! │  H264RateControl        │  Vp8RateControl                    │
//! │  CheckpointModel        │  VP8_PROFILE                       │
//! │  MadController          │                                    │
//! ├─────────────────────────┴────────────────────────────────────┤
//! │                         vepu-rc-core                         │
//! │  RateControlEngine  VirtualBuffer  LinearModel  BoundedRing  │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                │
//!                                ▼
//!                 QP / tables for the encoder registers
//! ```
//!
//! # Related Crates
//!
//! You can also use the individual crates directly:
//!
//! - [`vepu-rc-core`](https://crates.io/crates/vepu-rc-core) - Shared engine only
//! - [`vepu-rc-h264`](https://crates.io/crates/vepu-rc-h264) - H.264 only
//! - [`vepu-rc-vp8`](https://crates.io/crates/vepu-rc-vp8) - VP8 only

#![cfg_attr(docsrs, feature(doc_cfg))]

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// =============================================================================
// RE-EXPORTS
// =============================================================================

/// Codec-agnostic rate control building blocks.
///
/// - Saturating fixed-point arithmetic
/// - Leaky-bucket virtual buffer
/// - Bounded-history regression model
/// - The picture QP state machine and runtime parameter mailbox
///
/// See [`vepu_rc_core`] documentation for details.
pub use vepu_rc_core as engine;

/// H.264 rate control.
///
/// See [`vepu_rc_h264`] documentation for details.
#[cfg(feature = "h264")]
#[cfg_attr(docsrs, doc(cfg(feature = "h264")))]
pub use vepu_rc_h264 as h264;

/// VP8 rate control.
///
/// See [`vepu_rc_vp8`] documentation for details.
#[cfg(feature = "vp8")]
#[cfg_attr(docsrs, doc(cfg(feature = "vp8")))]
pub use vepu_rc_vp8 as vp8;

// =============================================================================
// PRELUDE - Common types for convenience
// =============================================================================

/// Prelude module with commonly used types.
///
/// ```rust
/// use vepu_rc::prelude::*;
/// ```
pub mod prelude {
    pub use vepu_rc_core::{
        ParamMailbox, PictureRequest, RateControlConfig, RateControlError, RateControlStats,
        RuntimeParams,
    };

    #[cfg(feature = "h264")]
    pub use vepu_rc_h264::{H264Config, H264Feedback, H264PictureParams, H264RateControl};

    #[cfg(feature = "vp8")]
    pub use vepu_rc_vp8::{Vp8PictureParams, Vp8RateControl};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_engine_reexport() {
        let config = engine::RateControlConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    #[cfg(feature = "h264")]
    fn test_h264_reexport() {
        let rc = h264::H264RateControl::new(h264::H264Config::default()).unwrap();
        assert_eq!(rc.engine().config().qp_max, h264::QP_MAX);
    }

    #[test]
    #[cfg(feature = "vp8")]
    fn test_vp8_reexport() {
        let rc = vp8::Vp8RateControl::new(vp8::default_config()).unwrap();
        assert_eq!(rc.engine().config().qp_max, vp8::QP_MAX);
    }

    #[test]
    #[cfg(all(feature = "h264", feature = "vp8"))]
    fn test_codecs_share_one_mailbox_type() {
        use prelude::*;

        let h264 = H264RateControl::new(H264Config::default()).unwrap();
        let vp8 = Vp8RateControl::new(vepu_rc_vp8::default_config()).unwrap();
        let boxes: [ParamMailbox; 2] = [h264.mailbox(), vp8.mailbox()];
        for mailbox in &boxes {
            mailbox.post(RuntimeParams::default().keyframe());
            assert!(mailbox.has_pending());
        }
    }
}
