//! VP8 Rate Control Simulation
//!
//! Runs the controller against a synthetic encoder with a scene cut halfway
//! through, showing the forced key frame and how the quantizer recovers.
//!
//! # Running
//!
//! ```bash
//! cargo run -p vepu-rc-vp8 --example simulate
//! ```

use vepu_rc_core::{PictureRequest, RateControlConfig, RuntimeParams};
use vepu_rc_vp8::{default_config, Vp8RateControl, AC_QUANTS, QP_MAX};

fn synthetic_bytes(qp: i32, key_frame: bool, complexity: u32) -> u32 {
    let q = AC_QUANTS[qp.clamp(0, QP_MAX) as usize] as u32;
    let bytes = complexity / q;
    if key_frame {
        bytes * 5
    } else {
        bytes
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("vepu-rc-vp8 Simulation");
    println!("======================");

    let config = RateControlConfig::builder()
        .resolution(640, 360)
        .bitrate(600_000)
        .frame_rate(30, 1)
        .gop_len(300)
        .build_over(default_config());

    let mut rc = Vp8RateControl::new(config)?;
    let mailbox = rc.mailbox();
    let mut complexity = 200_000;

    for picture in 0..240u32 {
        if picture == 120 {
            println!("\n-- scene cut --\n");
            complexity = 450_000;
            mailbox.post(RuntimeParams::default().keyframe());
        }

        let params = rc.before_picture(PictureRequest::default());
        let bytes = if params.coded {
            synthetic_bytes(params.qp, params.key_frame, complexity)
        } else {
            0
        };
        rc.after_picture(bytes);

        if picture % 10 == 0 || params.key_frame {
            println!(
                "#{:3} {} q={:3} bytes={:6} target={}",
                picture,
                if params.key_frame { "K" } else { "P" },
                params.qp,
                bytes,
                params.target_bits
            );
        }
    }

    let stats = rc.stats();
    println!("\nPictures:         {}", stats.pictures);
    println!("Key frames:       {}", stats.intra_pictures);
    println!(
        "Average bitrate:  {:.0} bps",
        stats.average_bits_per_picture() * 30.0
    );
    println!("Prediction error: {}", rc.engine().rc_error().average());

    Ok(())
}
