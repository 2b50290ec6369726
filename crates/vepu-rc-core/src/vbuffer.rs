//! Virtual buffer (leaky bucket) accounting
//!
//! Tracks the bits the stream was allowed to spend ("virtual") against the
//! bits it actually produced ("real"). Each picture advances the virtual
//! count by `bit_rate · time_increment / time_scale`; the difference between
//! the two counts is the biased bit target handed to the QP controller.
//!
//! Counters roll over once per second of stream time so they never grow
//! without bound, and both are kept within ±[`COUNTER_LIMIT`].
//!
//! The buffer also owns the GOP countdown and the picture-skip bookkeeping.

use tracing::trace;

use crate::arith::{mul_div, saturate_i32};

/// Saturation bound of the bit counters and of the returned target
pub const COUNTER_LIMIT: i32 = 0x1FFF_FFFF;

/// Upper bound on the configured bitrate: half of raw 4:2:0 (12 bpp) video
#[must_use]
pub fn max_bitrate(mb_per_pic: u32, fps_num: u32, fps_den: u32) -> i32 {
    if fps_den == 0 {
        return i32::MAX;
    }
    let raw = u64::from(mb_per_pic) * 256 * 6 * u64::from(fps_num) / u64::from(fps_den);
    i32::try_from(raw).unwrap_or(i32::MAX)
}

/// Leaky-bucket state for one encoder instance
#[derive(Debug, Clone)]
pub struct VirtualBuffer {
    /// Target bitrate in bits per second
    bit_rate: i32,

    /// Average bit budget of one picture
    bit_per_pic: i32,

    /// Stream time within the current second, in ticks
    pic_time_inc: i32,

    /// Ticks per second (frame-rate numerator)
    time_scale: i32,

    /// Bits allowed so far
    virtual_bit_cnt: i32,

    /// Bits produced so far
    real_bit_cnt: i32,

    /// Pictures left in the current GOP, counting this one
    gop_rem: i32,

    /// Number of pictures to skip in a row
    skip_frame_target: i32,

    /// Pictures skipped in the current run
    skipped_frames: i32,
}

impl VirtualBuffer {
    /// Create a buffer for `bit_rate` bps at `fps_num / fps_den` pictures per second
    #[must_use]
    pub fn new(bit_rate: i32, fps_num: u32, fps_den: u32, gop_len: u32) -> Self {
        let mut buffer = Self {
            bit_rate: 0,
            bit_per_pic: 0,
            pic_time_inc: 0,
            time_scale: 1,
            virtual_bit_cnt: 0,
            real_bit_cnt: 0,
            gop_rem: gop_len as i32,
            skip_frame_target: 0,
            skipped_frames: 0,
        };
        buffer.set_rate(bit_rate, fps_num, fps_den);
        buffer
    }

    /// Change bitrate and frame rate, keeping the accumulated counters
    pub fn set_rate(&mut self, bit_rate: i32, fps_num: u32, fps_den: u32) {
        self.bit_rate = bit_rate.max(0);
        self.time_scale = i32::try_from(fps_num).unwrap_or(i32::MAX).max(1);
        let den = i32::try_from(fps_den).unwrap_or(i32::MAX);
        self.bit_per_pic = mul_div(self.bit_rate, den, self.time_scale);
        self.pic_time_inc %= self.time_scale;
    }

    /// Advance stream time by `time_increment` ticks and return the biased
    /// bit target (`virtual - real`, saturated to ±[`COUNTER_LIMIT`])
    pub fn update(&mut self, time_increment: i32) -> i32 {
        self.real_bit_cnt = self.real_bit_cnt.clamp(-COUNTER_LIMIT, COUNTER_LIMIT);

        let time_increment = time_increment.max(0);
        self.pic_time_inc = self.pic_time_inc.saturating_add(time_increment);
        self.virtual_bit_cnt = self
            .virtual_bit_cnt
            .saturating_add(mul_div(self.bit_rate, time_increment, self.time_scale));

        let target = saturate_i32(i64::from(self.virtual_bit_cnt) - i64::from(self.real_bit_cnt))
            .clamp(-COUNTER_LIMIT, COUNTER_LIMIT);

        // one bitRate worth of bits leaves both counters per elapsed second
        if self.pic_time_inc >= self.time_scale {
            let seconds = i64::from(self.pic_time_inc / self.time_scale);
            self.pic_time_inc %= self.time_scale;
            let drained = i64::from(self.bit_rate) * seconds;
            self.virtual_bit_cnt = saturate_i32(i64::from(self.virtual_bit_cnt) - drained);
            self.real_bit_cnt = saturate_i32(i64::from(self.real_bit_cnt) - drained);
        }

        let drift = i64::from(mul_div(self.bit_rate, self.pic_time_inc, self.time_scale))
            - i64::from(self.virtual_bit_cnt);
        self.virtual_bit_cnt = saturate_i32(i64::from(self.virtual_bit_cnt) + drift);

        trace!(
            "Virtual buffer: target={} virtual={} real={} drift={} time={}/{}",
            target,
            self.virtual_bit_cnt,
            self.real_bit_cnt,
            drift,
            self.pic_time_inc,
            self.time_scale
        );

        target
    }

    /// Account for bits produced by the last picture
    pub fn add_real_bits(&mut self, bits: i32) {
        self.real_bit_cnt = self.real_bit_cnt.saturating_add(bits);
    }

    /// Step the GOP countdown for a picture about to be coded
    pub fn advance_gop(&mut self, intra: bool, gop_len: u32) {
        if intra || self.gop_rem <= 1 {
            self.gop_rem = gop_len as i32;
        } else {
            self.gop_rem -= 1;
        }
    }

    /// Decide whether the next picture is coded under the skip policy
    ///
    /// The skip target grows while the buffer is short by more than a third
    /// of a picture (only up to one while picture RC is active) and shrinks
    /// while it is ahead by the same margin.
    pub fn pic_skip(&mut self, picture_rc: bool) -> bool {
        let available = i64::from(self.virtual_bit_cnt) - i64::from(self.real_bit_cnt);
        let margin = i64::from(self.bit_per_pic / 3);

        if available < -margin && (!picture_rc || self.skip_frame_target == 0) {
            self.skip_frame_target += 1;
        } else if available > margin && self.skip_frame_target > 0 {
            self.skip_frame_target -= 1;
        }

        if self.skipped_frames < self.skip_frame_target {
            self.skipped_frames += 1;
            false
        } else {
            self.skipped_frames = 0;
            true
        }
    }

    /// Clear the skip policy state
    pub fn reset_skip(&mut self) {
        self.skip_frame_target = 0;
        self.skipped_frames = 0;
    }

    /// Target bitrate (bps)
    #[must_use]
    pub fn bit_rate(&self) -> i32 {
        self.bit_rate
    }

    /// Average bits per picture
    #[must_use]
    pub fn bit_per_pic(&self) -> i32 {
        self.bit_per_pic
    }

    /// Ticks elapsed within the current second
    #[must_use]
    pub fn pic_time_inc(&self) -> i32 {
        self.pic_time_inc
    }

    /// Ticks per second
    #[must_use]
    pub fn time_scale(&self) -> i32 {
        self.time_scale
    }

    /// Bits allowed so far
    #[must_use]
    pub fn virtual_bit_cnt(&self) -> i32 {
        self.virtual_bit_cnt
    }

    /// Bits produced so far
    #[must_use]
    pub fn real_bit_cnt(&self) -> i32 {
        self.real_bit_cnt
    }

    /// Pictures left in the current GOP
    #[must_use]
    pub fn gop_rem(&self) -> i32 {
        self.gop_rem
    }

    /// Current skip run length target
    #[must_use]
    pub fn skip_frame_target(&self) -> i32 {
        self.skip_frame_target
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_per_pic() {
        let vb = VirtualBuffer::new(1_000_000, 30, 1, 150);
        assert_eq!(vb.bit_per_pic(), 33_333);
        assert_eq!(vb.time_scale(), 30);

        let vb = VirtualBuffer::new(1_000_000, 30_000, 1001, 150);
        assert_eq!(vb.bit_per_pic(), 33_366);
    }

    #[test]
    fn test_first_update_targets_zero() {
        let mut vb = VirtualBuffer::new(1_000_000, 30, 1, 150);
        assert_eq!(vb.update(0), 0);
        assert_eq!(vb.pic_time_inc(), 0);
    }

    #[test]
    fn test_target_tracks_spending() {
        let mut vb = VirtualBuffer::new(1_000_000, 30, 1, 150);
        vb.update(0);
        vb.add_real_bits(20_000);
        // one picture of budget arrives, 20000 already spent
        assert_eq!(vb.update(1), 33_333 - 20_000);

        vb.add_real_bits(50_000);
        assert_eq!(vb.update(1), 66_666 - 70_000);
    }

    #[test]
    fn test_rollover_keeps_time_in_range() {
        let mut vb = VirtualBuffer::new(1_000_000, 30, 1, 150);
        for _ in 0..95 {
            vb.add_real_bits(33_333);
            vb.update(1);
            assert!((0..vb.time_scale()).contains(&vb.pic_time_inc()));
        }
        assert_eq!(vb.pic_time_inc(), 95 % 30);
        // balanced spending keeps both counters small after rollover
        assert!(vb.virtual_bit_cnt().abs() < 1_000_000);
        assert!(vb.real_bit_cnt().abs() < 1_000_000);
    }

    #[test]
    fn test_large_increment_rolls_over_in_one_step() {
        let mut vb = VirtualBuffer::new(2_000_000, 25, 1, 50);
        vb.update(1_000_007);
        assert_eq!(vb.pic_time_inc(), 1_000_007 % 25);
        assert_eq!(vb.virtual_bit_cnt(), mul_div(2_000_000, 7, 25));
    }

    #[test]
    fn test_time_invariant_holds_across_rates() {
        for &(rate, num, den) in &[(64_000, 15, 1), (1_000_000, 30_000, 1001), (20_000_000, 60, 1)] {
            let mut vb = VirtualBuffer::new(rate, num, den, 30);
            for inc in [0, 1, 7, 1001, 29_999, 30_001] {
                vb.update(inc);
                assert!(vb.pic_time_inc() >= 0);
                assert!(vb.pic_time_inc() < vb.time_scale());
            }
        }
    }

    #[test]
    fn test_runaway_real_count_saturates() {
        let mut vb = VirtualBuffer::new(1_000_000, 30, 1, 150);
        vb.update(0);
        for _ in 0..10 {
            vb.add_real_bits(i32::MAX);
        }
        let target = vb.update(1);
        assert_eq!(vb.real_bit_cnt(), COUNTER_LIMIT);
        assert_eq!(target, 33_333 - COUNTER_LIMIT);
    }

    #[test]
    fn test_gop_countdown() {
        let mut vb = VirtualBuffer::new(1_000_000, 30, 1, 3);
        vb.advance_gop(true, 3);
        assert_eq!(vb.gop_rem(), 3);
        vb.advance_gop(false, 3);
        assert_eq!(vb.gop_rem(), 2);
        vb.advance_gop(false, 3);
        assert_eq!(vb.gop_rem(), 1);
        vb.advance_gop(false, 3);
        assert_eq!(vb.gop_rem(), 3);
    }

    #[test]
    fn test_pic_skip_under_pressure() {
        let mut vb = VirtualBuffer::new(300_000, 30, 1, 30);
        vb.update(0);
        vb.add_real_bits(100_000);
        vb.update(1);

        // far over budget: one skip allowed while picture RC is on
        assert!(!vb.pic_skip(true));
        assert_eq!(vb.skip_frame_target(), 1);
        assert!(vb.pic_skip(true));
        assert!(!vb.pic_skip(true));
        assert_eq!(vb.skip_frame_target(), 1);

        // without picture RC the run keeps growing
        vb.reset_skip();
        assert!(!vb.pic_skip(false));
        assert!(!vb.pic_skip(false));
        assert_eq!(vb.skip_frame_target(), 2);
    }

    #[test]
    fn test_pic_skip_recovers() {
        let mut vb = VirtualBuffer::new(300_000, 30, 1, 30);
        vb.update(0);
        vb.add_real_bits(100_000);
        vb.update(1);
        assert!(!vb.pic_skip(true));

        vb.add_real_bits(-200_000);
        assert!(vb.pic_skip(true));
        assert_eq!(vb.skip_frame_target(), 0);
    }

    #[test]
    fn test_max_bitrate() {
        assert_eq!(max_bitrate(3600, 30, 1), 165_888_000);
        assert_eq!(max_bitrate(99, 30_000, 1001), 4_557_362);
        assert_eq!(max_bitrate(1, 1, 0), i32::MAX);
    }
}
