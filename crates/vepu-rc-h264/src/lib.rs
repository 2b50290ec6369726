//! # vepu-rc-h264
//!
//! H.264 rate control for Hantro-style hardware encoders.
//!
//! This crate is part of the [vepu-rc](https://github.com/vepu-rc/vepu-rc)
//! workspace. It plugs the H.264 quantizer tables into the shared engine from
//! `vepu-rc-core` and adds the macroblock-level controls only the H.264
//! hardware has.
//!
//! # Features
//!
//! - **Picture QP**: Virtual buffer plus 15-sample regression over QP 0..=51
//! - **Checkpoints**: Up to ten in-picture word targets with a seven-level
//!   QP-change ladder, linear or shaped after the previous picture
//! - **MAD Threshold**: Self-tuning residual threshold for low-detail
//!   macroblock QP offsets
//! - **Delta Limiting**: Optional ±2 / ±4 bound on model-predicted QP steps
//!
//! # Quick Start
//!
//! ```rust
//! use vepu_rc_core::{PictureRequest, RateControlConfig};
//! use vepu_rc_h264::{H264Config, H264Feedback, H264RateControl};
//!
//! let config = H264Config::builder()
//!     .rc(RateControlConfig::builder()
//!         .resolution(1280, 720)
//!         .bitrate(2_000_000)
//!         .frame_rate(30, 1)
//!         .gop_len(60)
//!         .build())
//!     .mad_qp_delta(-2)
//!     .build();
//!
//! let mut rc = H264RateControl::new(config)?;
//!
//! for _ in 0..30 {
//!     let params = rc.before_picture(PictureRequest::default());
//!     // program params.qp, params.checkpoints and the MAD fields, run the encoder
//!     let feedback = H264Feedback { coded_bytes: 8_000, mad_count: 1_000, ..Default::default() };
//!     rc.after_picture(&feedback);
//! }
//! assert_eq!(rc.stats().pictures, 30);
//! # Ok::<(), vepu_rc_core::RateControlError>(())
//! ```
//!
//! # Hardware Units
//!
//! Checkpoint targets and word errors are in the hardware's units (32
//! coefficients per word, errors divided by four). The MAD threshold is
//! reported divided by 256, the register granularity.

#![cfg_attr(docsrs, feature(doc_cfg))]

// =============================================================================
// MODULES
// =============================================================================

pub mod checkpoint;
pub mod config;
pub mod encoder;
pub mod mad;
pub mod profile;

// =============================================================================
// RE-EXPORTS
// =============================================================================

// Controller (primary entry point)
pub use encoder::{H264Feedback, H264PictureParams, H264RateControl};

// Configuration
pub use config::{H264Config, H264ConfigBuilder};

// Macroblock controls
pub use checkpoint::{CheckpointModel, CheckpointStrategy, CheckpointTable};
pub use mad::MadController;

// Constants
pub use profile::{H264_PROFILE, QP_MAX, Q_STEP};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
