//! Overflow-Safe Scaled Arithmetic
//!
//! Every rate computation in the controller is some form of `a * b / c` on
//! register-width integers (bit counts, time ticks, macroblock counts). The
//! helpers here never overflow and never panic: quotients that do not fit the
//! output width saturate, and zero denominators map to a fixed value that is
//! documented per function.
//!
//! # Example
//!
//! ```rust
//! use vepu_rc_core::arith::{div_round, mul_div};
//!
//! // bits per picture at 1 Mbps, 30000/1001 fps
//! assert_eq!(mul_div(1_000_000, 1001, 30000), 33366);
//!
//! // irreducible overflow saturates with the right sign
//! assert_eq!(mul_div(i32::MAX, -4, 2), -i32::MAX);
//!
//! // rounded division, half away from zero
//! assert_eq!(div_round(7, 2), 4);
//! assert_eq!(div_round(-7, 2), -4);
//! ```

/// `a * b / c`, truncated toward zero and saturated to `±i32::MAX`.
///
/// The product is formed in 64 bits, so no operand is pre-shifted and no
/// precision is traded away to avoid overflow. The result is exact whenever
/// the true quotient fits in `i32`; only quotients that cannot be represented
/// saturate.
///
/// - `a == 0` or `b == 0` gives `0`, whatever `c` is.
/// - `c == 0` gives `±i32::MAX` carrying the sign of `a * b`.
/// - Otherwise the exact quotient when it fits in `i32`, `±i32::MAX` when it
///   does not.
#[must_use]
pub fn mul_div(a: i32, b: i32, c: i32) -> i32 {
    if a == 0 || b == 0 {
        return 0;
    }

    // |a * b| <= 2^62, so neither the product nor the division can overflow
    let num = i64::from(a) * i64::from(b);
    if c == 0 {
        return saturated_i32(num.is_negative());
    }

    let quotient = num / i64::from(c);
    i32::try_from(quotient).unwrap_or_else(|_| saturated_i32(quotient.is_negative()))
}

/// 64-bit counterpart of [`mul_div`] used by the regression fits.
///
/// Same contract with `i64` bounds: exact when the quotient fits, otherwise
/// `±i64::MAX`; `c == 0` gives `±i64::MAX` with the sign of `a * b`.
#[must_use]
pub fn mul_div_wide(a: i64, b: i64, c: i64) -> i64 {
    if a == 0 || b == 0 {
        return 0;
    }

    let num = i128::from(a) * i128::from(b);
    if c == 0 {
        return saturated_i64(num.is_negative());
    }

    let quotient = num / i128::from(c);
    i64::try_from(quotient).unwrap_or_else(|_| saturated_i64(quotient.is_negative()))
}

/// Division rounded half away from zero.
///
/// `b == 0` returns `a` unchanged. Results outside `i32` saturate.
#[must_use]
pub fn div_round(a: i32, b: i32) -> i32 {
    let rounded = div_round_wide(i64::from(a), i64::from(b));
    i32::try_from(rounded).unwrap_or_else(|_| saturated_i32(rounded.is_negative()))
}

/// 64-bit counterpart of [`div_round`]; `b == 0` returns `a`.
#[must_use]
pub fn div_round_wide(a: i64, b: i64) -> i64 {
    if b == 0 {
        return a;
    }

    let (a, b) = (i128::from(a), i128::from(b));
    let sign = if a < 0 { -1 } else { 1 };
    let rounded = (a + sign * b / 2) / b;
    i64::try_from(rounded).unwrap_or_else(|_| saturated_i64(rounded.is_negative()))
}

/// Clamp a wide intermediate back to the `i32` register range.
#[must_use]
pub fn saturate_i32(value: i64) -> i32 {
    value.clamp(-i64::from(i32::MAX), i64::from(i32::MAX)) as i32
}

const fn saturated_i32(negative: bool) -> i32 {
    if negative {
        -i32::MAX
    } else {
        i32::MAX
    }
}

const fn saturated_i64(negative: bool) -> i64 {
    if negative {
        -i64::MAX
    } else {
        i64::MAX
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EDGE_VALUES: [i32; 17] = [
        0,
        1,
        -1,
        2,
        -3,
        7,
        255,
        -256,
        30_000,
        1_000_000,
        -1_000_000,
        0x1FFF_FFFF,
        -0x1FFF_FFFF,
        i32::MAX,
        -i32::MAX,
        i32::MIN,
        46_341,
    ];

    fn reference(a: i32, b: i32, c: i32) -> i32 {
        if a == 0 || b == 0 {
            return 0;
        }
        let num = i128::from(a) * i128::from(b);
        if c == 0 {
            return if num < 0 { -i32::MAX } else { i32::MAX };
        }
        let q = num / i128::from(c);
        if q > i128::from(i32::MAX) {
            i32::MAX
        } else if q < -i128::from(i32::MAX) {
            -i32::MAX
        } else {
            q as i32
        }
    }

    #[test]
    fn test_mul_div_exact_when_product_fits() {
        assert_eq!(mul_div(1_000_000, 1, 30), 33_333);
        assert_eq!(mul_div(-1_000_000, 1, 30), -33_333);
        assert_eq!(mul_div(100, 256, 3600), 7);
    }

    #[test]
    fn test_mul_div_exact_when_only_quotient_fits() {
        // product overflows i32 but the quotient does not
        assert_eq!(mul_div(60_000_000, 1001, 30_000), 2_002_000);
        assert_eq!(mul_div(i32::MAX, 1000, 1000), i32::MAX);
        assert_eq!(mul_div(-i32::MAX, 3, 4), -1_610_612_735);
    }

    #[test]
    fn test_mul_div_saturates_with_sign() {
        assert_eq!(mul_div(i32::MAX, 2, 1), i32::MAX);
        assert_eq!(mul_div(i32::MAX, -2, 1), -i32::MAX);
        assert_eq!(mul_div(-i32::MAX, -2, 1), i32::MAX);
        assert_eq!(mul_div(i32::MAX, 2, -1), -i32::MAX);
        assert_eq!(mul_div(i32::MIN, -1, 1), i32::MAX);
    }

    #[test]
    fn test_mul_div_zero_denominator() {
        assert_eq!(mul_div(5, 3, 0), i32::MAX);
        assert_eq!(mul_div(-5, 3, 0), -i32::MAX);
        assert_eq!(mul_div(-5, -3, 0), i32::MAX);
        assert_eq!(mul_div(0, 3, 0), 0);
    }

    #[test]
    fn test_mul_div_matches_reference_grid() {
        for &a in &EDGE_VALUES {
            for &b in &EDGE_VALUES {
                for &c in &EDGE_VALUES {
                    assert_eq!(mul_div(a, b, c), reference(a, b, c), "a={a} b={b} c={c}");
                }
            }
        }
    }

    #[test]
    fn test_mul_div_wide() {
        assert_eq!(mul_div_wide(i64::MAX, 4, 4), i64::MAX);
        assert_eq!(mul_div_wide(i64::MAX, 4, 1), i64::MAX);
        assert_eq!(mul_div_wide(i64::MAX, -4, 1), -i64::MAX);
        assert_eq!(mul_div_wide(7, 9, 0), i64::MAX);
        assert_eq!(mul_div_wide(3_000_000_000, 3_000_000_000, 1_000_000), 9_000_000_000_000);
    }

    #[test]
    fn test_div_round() {
        assert_eq!(div_round(7, 2), 4);
        assert_eq!(div_round(6, 4), 2);
        assert_eq!(div_round(5, 4), 1);
        assert_eq!(div_round(-7, 2), -4);
        assert_eq!(div_round(-5, 4), -1);
        assert_eq!(div_round(0, 9), 0);
        assert_eq!(div_round(42, 0), 42);
        assert_eq!(div_round(i32::MAX, 1), i32::MAX);
    }

    #[test]
    fn test_div_round_wide() {
        assert_eq!(div_round_wide(1_000_000_000_001, 2), 500_000_000_001);
        assert_eq!(div_round_wide(-3, 2), -2);
        assert_eq!(div_round_wide(13, 0), 13);
    }

    #[test]
    fn test_saturate_i32() {
        assert_eq!(saturate_i32(1 << 40), i32::MAX);
        assert_eq!(saturate_i32(-(1 << 40)), -i32::MAX);
        assert_eq!(saturate_i32(-12), -12);
    }
}
