use serde::{Deserialize, Serialize};

use super::error::{VerifyError, VerifyResult};

/// Categorical labels identifying one group, e.g. `["north sea", "trap"]`.
/// Compares element-wise, which gives a deterministic group ordering.
pub type GroupKey = Vec<String>;

/// A single forecast/outcome pair as supplied by the ingestion step.
///
/// Construction validates the probability (and, for numeric outcomes, the
/// outcome code), so a `ForecastSample` is always valid input for the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastSample {
    probability: f64,
    outcome: bool,
    group_key: GroupKey,
    period: i64,
}

impl ForecastSample {
    pub fn new(
        probability: f64,
        outcome: bool,
        group_key: GroupKey,
        period: i64,
    ) -> VerifyResult<Self> {
        check_probability(probability)?;
        Ok(ForecastSample {
            probability,
            outcome,
            group_key,
            period,
        })
    }

    /// Build a sample from a numeric outcome, which must be exactly 0 or 1.
    pub fn from_numeric_outcome(
        probability: f64,
        outcome: f64,
        group_key: GroupKey,
        period: i64,
    ) -> VerifyResult<Self> {
        let outcome = if outcome == 1.0 {
            true
        } else if outcome == 0.0 {
            false
        } else {
            return Err(VerifyError::InvalidOutcome(outcome.to_string()));
        };
        Self::new(probability, outcome, group_key, period)
    }

    pub fn probability(&self) -> f64 {
        self.probability
    }

    pub fn outcome(&self) -> bool {
        self.outcome
    }

    pub fn group_key(&self) -> &[String] {
        &self.group_key
    }

    pub fn period(&self) -> i64 {
        self.period
    }

    /// The outcome as 0.0 / 1.0 for arithmetic.
    pub fn outcome_value(&self) -> f64 {
        if self.outcome {
            1.0
        } else {
            0.0
        }
    }

    pub fn pair(&self) -> (f64, bool) {
        (self.probability, self.outcome)
    }
}

/// Reject probabilities outside `[0, 1]`, including NaN.
pub fn check_probability(probability: f64) -> VerifyResult<()> {
    if (0.0..=1.0).contains(&probability) {
        Ok(())
    } else {
        Err(VerifyError::InvalidProbability(probability))
    }
}

/// Round to two decimals on the exact binary value, ties to even.
///
/// `x * 100` alone can land on `.5` when `x` is only near a tie, so the tie
/// is decided by the sign of `x * 200 - (2k + 1)`, which `mul_add` computes
/// with a single rounding.
pub fn round_to_hundredths(x: f64) -> f64 {
    let floor = (x * 100.0).floor();
    let diff = x.mul_add(200.0, -(2.0 * floor + 1.0));
    let cents = if diff > 0.0 || (diff == 0.0 && floor % 2.0 != 0.0) {
        floor + 1.0
    } else {
        floor
    };
    cents / 100.0
}

/// A half-open range of period keys, `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeriodRange {
    pub start: i64,
    pub end: i64,
}

impl PeriodRange {
    pub fn contains(&self, period: i64) -> bool {
        period >= self.start && period < self.end
    }

    /// Inclusive label used in trend reports, e.g. `1990-1995` for `[1990, 1996)`.
    pub fn label(&self) -> String {
        format!("{}-{}", self.start, self.end - 1)
    }
}

/// Split ordered cut points into consecutive periods.
/// The final boundary closes the last period and is never a period itself.
pub fn periods_from_boundaries(boundaries: &[i64]) -> VerifyResult<Vec<PeriodRange>> {
    if boundaries.len() < 2 {
        return Err(VerifyError::InvalidConfig(format!(
            "need at least 2 period boundaries, got {}",
            boundaries.len()
        )));
    }
    if let Some(w) = boundaries.windows(2).find(|w| w[0] >= w[1]) {
        return Err(VerifyError::InvalidConfig(format!(
            "period boundaries must be strictly increasing ({} then {})",
            w[0], w[1]
        )));
    }
    Ok(boundaries
        .windows(2)
        .map(|w| PeriodRange {
            start: w[0],
            end: w[1],
        })
        .collect())
}
