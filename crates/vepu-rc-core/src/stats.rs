//! Rate control statistics

/// Counters accumulated by a [`RateControlEngine`](crate::RateControlEngine)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateControlStats {
    /// Pictures completed (coded or skipped)
    pub pictures: u64,

    /// Intra pictures completed
    pub intra_pictures: u64,

    /// Pictures the skip policy dropped
    pub skipped_pictures: u64,

    /// Bits produced over the whole stream
    pub total_bits: u64,

    /// Bits produced since the current GOP started
    pub gop_bits: u64,

    /// Steady-state pictures where the regression model was still cold
    pub model_fallbacks: u64,

    /// Pictures whose bit target hit the counter saturation bound
    pub saturated_targets: u64,

    /// Biased bit target of the latest picture
    pub last_target_bits: i32,

    /// Mean macroblock QP of the latest picture, when the encoder reports it
    pub average_mb_qp: Option<i32>,
}

impl RateControlStats {
    /// Average bits spent per completed picture
    #[must_use]
    pub fn average_bits_per_picture(&self) -> f64 {
        if self.pictures == 0 {
            return 0.0;
        }

        self.total_bits as f64 / self.pictures as f64
    }

    /// Fraction of pictures skipped
    #[must_use]
    pub fn skip_rate(&self) -> f64 {
        if self.pictures == 0 {
            return 0.0;
        }

        self.skipped_pictures as f64 / self.pictures as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_stats() {
        let stats = RateControlStats::default();
        assert_eq!(stats.average_bits_per_picture(), 0.0);
        assert_eq!(stats.skip_rate(), 0.0);
    }

    #[test]
    fn test_derived_rates() {
        let stats = RateControlStats {
            pictures: 4,
            skipped_pictures: 1,
            total_bits: 100_000,
            ..Default::default()
        };
        assert_eq!(stats.average_bits_per_picture(), 25_000.0);
        assert_eq!(stats.skip_rate(), 0.25);
    }
}
