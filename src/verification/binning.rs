use serde::{Deserialize, Serialize};

use crate::common::error::{VerifyError, VerifyResult};
use crate::common::types::{check_probability, round_to_hundredths};

/// Offset subtracted before dividing by the bin width, so a probability that
/// sits exactly on an edge falls into the lower bin.
const EDGE_OFFSET: f64 = 0.001;

/// Probabilities strictly above this (and below 1.0) always land in the last
/// regular bin, however narrow the bins are.
const NEAR_CERTAIN: f64 = 0.9;

/// Upper bound on the bin count; every cell allocates `bins + 1` slots.
pub const MAX_BINS: usize = 1000;

impl TryFrom<usize> for BinSpec {
    type Error = VerifyError;

    fn try_from(bins: usize) -> VerifyResult<Self> {
        BinSpec::new(bins)
    }
}

impl From<BinSpec> for usize {
    fn from(spec: BinSpec) -> usize {
        spec.bins
    }
}

/// Binning configuration: `bins` regular bins of equal `width` over `[0, 1)`,
/// plus one dedicated bin (index `bins`) for probability exactly 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct BinSpec {
    bins: usize,
    width: f64,
}

impl BinSpec {
    pub fn new(bins: usize) -> VerifyResult<Self> {
        if bins == 0 || bins > MAX_BINS {
            return Err(VerifyError::InvalidConfig(format!(
                "bin count must be between 1 and {}, got {}",
                MAX_BINS, bins
            )));
        }
        Ok(BinSpec {
            bins,
            width: 1.0 / bins as f64,
        })
    }

    /// Number of regular bins. The table has `bins + 1` slots.
    pub fn bins(&self) -> usize {
        self.bins
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    /// Total number of slots including the top bin.
    pub fn slots(&self) -> usize {
        self.bins + 1
    }

    /// Map a probability to its bin.
    ///
    /// - `1.0` goes to the dedicated top bin `bins`.
    /// - `(0.9, 1.0)` goes to `bins - 1`.
    /// - anything else goes to `trunc((p - 0.001) / width)`, clamped to
    ///   `[0, bins - 1]`; values below 0.001 therefore land in bin 0.
    pub fn bin_index(&self, probability: f64) -> VerifyResult<usize> {
        check_probability(probability)?;

        if probability == 1.0 {
            return Ok(self.bins);
        }
        if probability > NEAR_CERTAIN {
            return Ok(self.bins - 1);
        }

        let raw = ((probability - EDGE_OFFSET) / self.width).trunc();
        let index = if raw <= 0.0 { 0 } else { raw as usize };
        Ok(index.min(self.bins - 1))
    }

    /// Reference point of a bin for reliability diagrams: the centre of a
    /// regular bin rounded to two decimals (ties to even), and 1.0 for the
    /// top bin.
    pub fn midpoint(&self, bin: usize) -> f64 {
        if bin >= self.bins {
            return 1.0;
        }
        round_to_hundredths((bin as f64 + 0.5) * self.width)
    }
}
