//! # vepu-rc-core
//!
//! Codec-agnostic picture-level rate control for hardware video encoders.
//!
//! This crate is part of the [vepu-rc](https://github.com/vepu-rc/vepu-rc)
//! workspace. The codec crates `vepu-rc-h264` and `vepu-rc-vp8` supply the
//! constant tables and macroblock-level feedback; everything they share
//! lives here.
//!
//! # Features
//!
//! - **Saturating Fixed-Point Math**: `a · b / c` helpers that never overflow
//! - **Virtual Buffer**: Leaky-bucket accounting of allowed vs. produced bits
//! - **Online Regression**: Bounded-history QP ↔ bits model, refit per picture
//! - **GOP State Machine**: Start / early / steady phases with intra handling
//! - **Picture Skipping**: Optional skip policy when the buffer overruns
//! - **Runtime Updates**: Thread-safe mailbox for bitrate, frame rate and GOP changes
//!
//! # Quick Start
//!
//! A [`RateControlEngine`] is built from a [`RateControlConfig`] and a
//! [`CodecProfile`]. Each picture calls
//! [`before_picture`](RateControlEngine::before_picture) to get a QP, then
//! [`after_picture`](RateControlEngine::after_picture) with the coded size.
//!
//! ```rust,ignore
//! use vepu_rc_core::{PictureRequest, RateControlConfig, RateControlEngine};
//! use vepu_rc_h264::H264_PROFILE;
//!
//! let config = RateControlConfig::builder()
//!     .resolution(1280, 720)
//!     .bitrate(2_000_000)
//!     .build();
//! let mut rc = RateControlEngine::new(config, H264_PROFILE)?;
//!
//! let decision = rc.before_picture(PictureRequest::default());
//! // ... encode with decision.qp ...
//! rc.after_picture(coded_bytes);
//! ```
//!
//! # Error Handling
//!
//! Only construction returns errors ([`RateControlError`]). The per-picture
//! path never fails: arithmetic saturates, zero denominators have defined
//! results and a cold model falls back to heuristics. Those events are
//! reported through `tracing` and counted in [`RateControlStats`].
//!
//! # Concurrency
//!
//! An engine is owned by one encoder instance and called from one thread.
//! Only the [`ParamMailbox`] is meant to be shared.

#![cfg_attr(docsrs, feature(doc_cfg))]

// =============================================================================
// CORE MODULES
// =============================================================================

pub mod arith;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod profile;
pub mod ring;
pub mod stats;
pub mod vbuffer;

// =============================================================================
// RE-EXPORTS
// =============================================================================

// Controller (primary entry point)
pub use engine::{GopPhase, PictureDecision, PictureRequest, RateControlEngine, RcErrorFilter};

// Configuration
pub use config::{ParamMailbox, RateControlConfig, RateControlConfigBuilder, RuntimeParams};

// Errors
pub use error::{RateControlError, Result};

// Models
pub use model::{
    CurveForm, DegenerateFit, DeltaLimit, DuplicatePolicy, LinearModel, ModelParams,
};
pub use profile::{BudgetSpread, CodecProfile, InitialQpTable, SampleScale};
pub use ring::BoundedRing;
pub use stats::RateControlStats;
pub use vbuffer::VirtualBuffer;

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
    fn test_reexports() {
        let config = RateControlConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(arith::mul_div(6, 7, 2), 21);
    }
}
