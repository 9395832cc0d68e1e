//! Conversion of raw bit-rate samples into display values.
//!
//! A speed is shown as `"{mbps}.{fraction}"`, where both halves are plain
//! integers. The fraction is not a true decimal: remainders above 99 are cut
//! down to a fixed digit count by slicing their decimal string, while small
//! remainders pass through untouched. Legacy clients render exactly this, so
//! the asymmetry is kept bit-for-bit.

use std::fmt;

use crate::error::SpeedTestError;

const BITS_PER_MBIT: i64 = 1_000_000;

/// A human-readable speed: whole megabits plus a truncated fractional part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DisplayPair {
    pub mbps: i64,
    pub fraction: i64,
}

impl DisplayPair {
    pub const ZERO: Self = Self { mbps: 0, fraction: 0 };

    pub const fn new(mbps: i64, fraction: i64) -> Self {
        Self { mbps, fraction }
    }
}

impl fmt::Display for DisplayPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.mbps, self.fraction)
    }
}

/// Converts a raw bits-per-second measurement into a [`DisplayPair`].
///
/// The remainder below one megabit is truncated to the first `precision`
/// decimal digits when it exceeds 99, and passed through verbatim otherwise.
/// Truncation works on the decimal string, so it is lossy and never rounds;
/// a remainder with fewer digits than `precision` is returned whole.
pub fn speed_with_precision(
    raw_bits_per_sec: i64,
    precision: usize,
) -> Result<DisplayPair, SpeedTestError> {
    if precision == 0 {
        return Err(SpeedTestError::InvalidArgument(
            "precision must be at least 1".into(),
        ));
    }
    if raw_bits_per_sec < 0 {
        return Err(SpeedTestError::InvalidArgument(format!(
            "negative bit rate: {raw_bits_per_sec}"
        )));
    }

    let mbps = raw_bits_per_sec / BITS_PER_MBIT;
    let remainder = raw_bits_per_sec % BITS_PER_MBIT;

    let fraction = if remainder > 99 {
        let digits = remainder.to_string();
        let cut = &digits[..precision.min(digits.len())];
        cut.parse::<i64>()
            .map_err(|err| SpeedTestError::InvalidArgument(err.to_string()))?
    } else {
        remainder
    };

    Ok(DisplayPair::new(mbps, fraction))
}

/// Parses one raw sample as recorded by the measurement backend.
///
/// Samples arrive as text lines; anything non-numeric or negative is rejected
/// so that callers can skip it without aborting the test.
pub fn parse_raw_sample(text: &str) -> Result<u64, SpeedTestError> {
    let value: i64 = text
        .trim()
        .parse()
        .map_err(|_| SpeedTestError::InvalidArgument(format!("not a bit rate: {text:?}")))?;
    u64::try_from(value)
        .map_err(|_| SpeedTestError::InvalidArgument(format!("negative bit rate: {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_rate_is_zero_pair() {
        for precision in 1..=6 {
            assert_eq!(
                speed_with_precision(0, precision).unwrap(),
                DisplayPair::ZERO
            );
        }
    }

    #[test]
    fn exact_megabit_has_no_fraction() {
        assert_eq!(
            speed_with_precision(1_000_000, 2).unwrap(),
            DisplayPair::new(1, 0)
        );
    }

    #[test]
    fn small_remainder_passes_through_unchanged() {
        // 99 and below bypass truncation entirely, whatever the precision.
        for precision in 1..=5 {
            assert_eq!(
                speed_with_precision(120_000_099, precision).unwrap(),
                DisplayPair::new(120, 99)
            );
            assert_eq!(
                speed_with_precision(7_000_003, precision).unwrap(),
                DisplayPair::new(7, 3)
            );
        }
    }

    #[test]
    fn large_remainder_is_string_truncated() {
        // remainder 456789 -> "45" with precision 2, "4567" with precision 4.
        assert_eq!(
            speed_with_precision(120_456_789, 2).unwrap(),
            DisplayPair::new(120, 45)
        );
        assert_eq!(
            speed_with_precision(120_456_789, 4).unwrap(),
            DisplayPair::new(120, 4567)
        );
    }

    #[test]
    fn truncation_never_rounds() {
        // remainder 999999 truncates to 99, not 100.
        assert_eq!(
            speed_with_precision(1_999_999, 2).unwrap(),
            DisplayPair::new(1, 99)
        );
    }

    #[test]
    fn precision_longer_than_remainder_is_a_noop() {
        // remainder 456 has three digits; precision 5 keeps it whole.
        assert_eq!(
            speed_with_precision(9_000_456, 5).unwrap(),
            DisplayPair::new(9, 456)
        );
    }

    #[test]
    fn negative_rate_is_rejected() {
        assert!(matches!(
            speed_with_precision(-1, 2),
            Err(SpeedTestError::InvalidArgument(_))
        ));
    }

    #[test]
    fn zero_precision_is_rejected() {
        assert!(matches!(
            speed_with_precision(1_234_567, 0),
            Err(SpeedTestError::InvalidArgument(_))
        ));
    }

    #[test]
    fn parse_accepts_plain_integers() {
        assert_eq!(parse_raw_sample("123456").unwrap(), 123_456);
        assert_eq!(parse_raw_sample(" 42\n").unwrap(), 42);
    }

    #[test]
    fn parse_rejects_garbage_and_negatives() {
        assert!(parse_raw_sample("12.5").is_err());
        assert!(parse_raw_sample("fast").is_err());
        assert!(parse_raw_sample("-7").is_err());
        assert!(parse_raw_sample("").is_err());
    }

    #[test]
    fn display_renders_magnitude_dot_fraction() {
        assert_eq!(DisplayPair::new(120, 45).to_string(), "120.45");
        assert_eq!(DisplayPair::ZERO.to_string(), "0.0");
    }
}
