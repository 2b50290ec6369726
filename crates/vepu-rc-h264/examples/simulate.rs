//! H.264 Rate Control Simulation
//!
//! Drives the controller with a synthetic encoder whose output size follows
//! the usual `bits ∝ 1 / quant_step` relation, then prints how the QP and
//! the running bitrate settle.
//!
//! # Running
//!
//! ```bash
//! cargo run -p vepu-rc-h264 --example simulate
//! ```

use vepu_rc_core::{PictureRequest, RateControlConfig, RuntimeParams};
use vepu_rc_h264::{H264Config, H264Feedback, H264RateControl, Q_STEP};

/// Bits a 720p picture of moderate complexity produces at quant step 40
const COMPLEXITY: u64 = 80_000;

fn synthetic_picture(qp: i32, intra: bool, mb: u32) -> H264Feedback {
    let qs = Q_STEP[qp.clamp(0, 51) as usize] as u64;
    let mut bits = COMPLEXITY * 40 / qs.max(1);
    if intra {
        bits *= 4;
    }
    let coded_bytes = (bits / 8) as u32;
    let rlc_count = (bits / 5) as u32;

    let mut checkpoint_counts = [0u32; 10];
    for (i, count) in checkpoint_counts.iter_mut().enumerate() {
        *count = rlc_count / 11 * (i as u32 + 1);
    }

    H264Feedback {
        coded_bytes,
        mad_count: mb / 4,
        qp_sum: u64::from(mb) * qp as u64,
        rlc_count,
        checkpoint_counts,
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("vepu-rc-h264 Simulation");
    println!("=======================");

    let config = H264Config::builder()
        .rc(RateControlConfig::builder()
            .resolution(1280, 720)
            .bitrate(1_500_000)
            .frame_rate(30, 1)
            .gop_len(60)
            .build())
        .mad_qp_delta(-2)
        .build();

    if let Err(issues) = config.validate() {
        for issue in issues {
            eprintln!("config: {issue}");
        }
        return Ok(());
    }

    let mut rc = H264RateControl::new(config)?;
    let mailbox = rc.mailbox();
    let mb = rc.engine().mb_per_pic();

    for picture in 0..180u32 {
        if picture == 90 {
            println!("\n-- bitrate drops to 800 kbps --\n");
            mailbox.post(RuntimeParams::default().bitrate(800_000));
        }

        let params = rc.before_picture(PictureRequest::default());
        let feedback = synthetic_picture(params.qp, params.intra, mb);
        rc.after_picture(&feedback);

        if picture % 10 == 0 {
            println!(
                "#{:3} {} qp={:2} bytes={:6} checkpoints={} mad={}",
                picture,
                if params.intra { "I" } else { "P" },
                params.qp,
                feedback.coded_bytes,
                params.checkpoints.as_ref().map_or(0, |t| t.count),
                params.mad_threshold_div256
            );
        }
    }

    let stats = rc.stats();
    println!("\nPictures:         {}", stats.pictures);
    println!("Intra pictures:   {}", stats.intra_pictures);
    println!(
        "Average bitrate:  {:.0} bps",
        stats.average_bits_per_picture() * 30.0
    );
    println!("Model fallbacks:  {}", stats.model_fallbacks);

    Ok(())
}
