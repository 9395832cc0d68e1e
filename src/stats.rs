//! Per-phase sample storage and reduction.
//!
//! Each throughput phase appends raw bits-per-second samples to its own
//! sequence. A sequence is frozen when the phase ends; averaging is only
//! defined over a frozen, non-empty sequence.
//!
//! The average uses a two-stage integer reduction that differs from the
//! instantaneous-display truncation in [`crate::convert`]: samples are scaled
//! to kilobits before summing, and an oversized fraction is cut by dividing by
//! ten rather than by slicing its decimal string. The two policies disagree on
//! some inputs; both are preserved as-is for compatibility with recorded
//! results.

use crate::convert::{parse_raw_sample, DisplayPair};
use crate::error::SpeedTestError;

/// Which throughput phase a sample belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Download,
    Upload,
}

#[derive(Debug, Default)]
struct SampleSequence {
    samples: Vec<u64>,
    frozen: bool,
}

impl SampleSequence {
    fn ingest(&mut self, raw: u64) -> Result<(), SpeedTestError> {
        if self.frozen {
            return Err(SpeedTestError::InvalidState("sequence is frozen".into()));
        }
        self.samples.push(raw);
        Ok(())
    }

    fn average(&self) -> Result<DisplayPair, SpeedTestError> {
        if !self.frozen {
            return Err(SpeedTestError::InvalidState(
                "sequence is still being appended to".into(),
            ));
        }
        if self.samples.is_empty() {
            return Err(SpeedTestError::EmptySequence);
        }
        let kbps_sum: u64 = self.samples.iter().map(|s| s / 1000).sum();
        let mean_kbps = kbps_sum / self.samples.len() as u64;

        let mbps = mean_kbps / 1000;
        let mut fraction = mean_kbps % 1000;
        if fraction > 99 {
            fraction /= 10;
        }
        Ok(DisplayPair::new(mbps as i64, fraction as i64))
    }
}

/// Sample sequences for both throughput directions.
#[derive(Debug, Default)]
pub struct SpeedStatistics {
    download: SampleSequence,
    upload: SampleSequence,
}

impl SpeedStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds statistics from a combined recorded run: the first half of
    /// the lines is the download phase, the rest the upload phase. Lines that
    /// do not parse as a bit rate are skipped. Both sequences come back
    /// frozen, ready for averaging.
    pub fn from_recorded<S: AsRef<str>>(lines: &[S]) -> Self {
        let (download_lines, upload_lines) = split_initial_batch(lines);
        let mut stats = Self::new();
        for (direction, half) in [
            (Direction::Download, download_lines),
            (Direction::Upload, upload_lines),
        ] {
            for line in half {
                match parse_raw_sample(line) {
                    Ok(raw) => {
                        // Sequences are not frozen yet, ingest cannot fail.
                        let _ = stats.ingest(direction, raw);
                    }
                    Err(err) => log::warn!("skipping recorded sample: {err}"),
                }
            }
            stats.freeze(direction);
        }
        stats
    }

    fn sequence(&self, direction: Direction) -> &SampleSequence {
        match direction {
            Direction::Download => &self.download,
            Direction::Upload => &self.upload,
        }
    }

    fn sequence_mut(&mut self, direction: Direction) -> &mut SampleSequence {
        match direction {
            Direction::Download => &mut self.download,
            Direction::Upload => &mut self.upload,
        }
    }

    /// Appends a sample to the phase's sequence. Fails once the sequence has
    /// been frozen.
    pub fn ingest(&mut self, direction: Direction, raw: u64) -> Result<(), SpeedTestError> {
        self.sequence_mut(direction).ingest(raw)
    }

    /// Marks a phase's sequence immutable. Idempotent.
    pub fn freeze(&mut self, direction: Direction) {
        self.sequence_mut(direction).frozen = true;
    }

    pub fn is_frozen(&self, direction: Direction) -> bool {
        self.sequence(direction).frozen
    }

    pub fn samples(&self, direction: Direction) -> &[u64] {
        &self.sequence(direction).samples
    }

    /// Mean of the phase's samples through the two-stage kilobit reduction.
    /// Only defined once the sequence is frozen and non-empty.
    pub fn average(&self, direction: Direction) -> Result<DisplayPair, SpeedTestError> {
        self.sequence(direction).average()
    }

    /// Drops all samples and unfreezes both sequences for a fresh run.
    pub fn reset(&mut self) {
        self.download = SampleSequence::default();
        self.upload = SampleSequence::default();
    }
}

/// Splits one combined recorded sequence at its index midpoint: the first
/// `N/2` entries (floor) form the download half, the remainder the upload
/// half.
pub fn split_initial_batch<S: AsRef<str>>(lines: &[S]) -> (Vec<&str>, Vec<&str>) {
    let mid = lines.len() / 2;
    let first = lines[..mid].iter().map(|s| s.as_ref()).collect();
    let second = lines[mid..].iter().map(|s| s.as_ref()).collect();
    (first, second)
}
