use serde::{Deserialize, Serialize};

use super::aggregation::BinAggregate;
use super::binning::BinSpec;
use crate::common::error::{VerifyError, VerifyResult};

/// One row of a reliability diagram.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BinRow {
    pub bin: usize,
    pub midpoint: f64,
    pub avg_probability: f64,
    pub success_rate: f64,
    pub count: u64,
}

/// Verification measures for one sample set (one group × period cell).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeMetricsResult {
    pub samples: usize,
    pub brier: f64,
    /// Miscalibration: weighted squared gap between mean forecast and
    /// observed frequency per bin. Lower is better.
    pub reliability: f64,
    /// Discrimination: weighted squared gap between each bin's observed
    /// frequency and the overall base rate. Higher is better.
    pub resolution: f64,
    pub skill: f64,
    pub bias: f64,
    pub sharpness: f64,
    /// Mean observed outcome.
    pub base_rate: f64,
    /// Population variance of the outcomes, `base_rate * (1 - base_rate)`.
    pub uncertainty: f64,
    /// Every bin, including empty ones, in index order.
    pub bin_table: Vec<BinRow>,
}

impl AttributeMetricsResult {
    /// Rows for bins that received at least one forecast.
    pub fn non_empty_bins(&self) -> impl Iterator<Item = &BinRow> {
        self.bin_table.iter().filter(|row| row.count > 0)
    }
}

/// Brier decomposition and companion scores.
pub struct AttributeMetrics;

impl AttributeMetrics {
    /// Derive the metrics for one cell from its bin aggregates and the raw
    /// `(probability, outcome)` pairs those aggregates were built from.
    ///
    /// Brier, bias and sharpness come from the raw pairs, so they do not
    /// depend on the bin configuration. Reliability and resolution come from
    /// the non-empty bins.
    ///
    /// Skill is `(resolution - reliability) / var(outcomes)` with the sample
    /// variance (n - 1 denominator); when that variance is not positive
    /// (identical outcomes, or fewer than two samples) skill is 0.
    ///
    /// An empty cell yields all-zero metrics.
    ///
    /// # Errors
    /// Returns [`VerifyError::Inconsistent`] when the aggregates do not
    /// account for exactly the given pairs.
    pub fn compute(
        aggregates: &[BinAggregate],
        spec: &BinSpec,
        pairs: &[(f64, bool)],
    ) -> VerifyResult<AttributeMetricsResult> {
        check_consistency(aggregates, spec, pairs)?;

        let bin_table: Vec<BinRow> = aggregates
            .iter()
            .enumerate()
            .map(|(bin, agg)| BinRow {
                bin,
                midpoint: spec.midpoint(bin),
                avg_probability: agg.avg_probability(),
                success_rate: agg.success_rate(),
                count: agg.count,
            })
            .collect();

        let n = pairs.len();
        if n == 0 {
            return Ok(AttributeMetricsResult {
                samples: 0,
                brier: 0.0,
                reliability: 0.0,
                resolution: 0.0,
                skill: 0.0,
                bias: 0.0,
                sharpness: 0.0,
                base_rate: 0.0,
                uncertainty: 0.0,
                bin_table,
            });
        }
        let n_f = n as f64;

        let outcome = |o: bool| if o { 1.0 } else { 0.0 };

        let base_rate = pairs.iter().map(|&(_, o)| outcome(o)).sum::<f64>() / n_f;
        let brier = pairs
            .iter()
            .map(|&(p, o)| (p - outcome(o)).powi(2))
            .sum::<f64>()
            / n_f;
        let bias = pairs.iter().map(|&(p, o)| p - outcome(o)).sum::<f64>() / n_f;

        let reliability = bin_table
            .iter()
            .filter(|row| row.count > 0)
            .map(|row| row.count as f64 * (row.avg_probability - row.success_rate).powi(2))
            .sum::<f64>()
            / n_f;
        let resolution = bin_table
            .iter()
            .filter(|row| row.count > 0)
            .map(|row| row.count as f64 * (row.success_rate - base_rate).powi(2))
            .sum::<f64>()
            / n_f;

        let squared_dev = pairs
            .iter()
            .map(|&(_, o)| (outcome(o) - base_rate).powi(2))
            .sum::<f64>();
        let uncertainty = squared_dev / n_f;
        let sample_variance = if n > 1 {
            squared_dev / (n_f - 1.0)
        } else {
            0.0
        };
        let skill = if sample_variance > 0.0 {
            (resolution - reliability) / sample_variance
        } else {
            0.0
        };

        let mean_probability = pairs.iter().map(|&(p, _)| p).sum::<f64>() / n_f;
        let sharpness = (pairs
            .iter()
            .map(|&(p, _)| (p - mean_probability).powi(2))
            .sum::<f64>()
            / n_f)
            .sqrt();

        Ok(AttributeMetricsResult {
            samples: n,
            brier,
            reliability,
            resolution,
            skill,
            bias,
            sharpness,
            base_rate,
            uncertainty,
            bin_table,
        })
    }
}

fn check_consistency(
    aggregates: &[BinAggregate],
    spec: &BinSpec,
    pairs: &[(f64, bool)],
) -> VerifyResult<()> {
    if aggregates.len() != spec.slots() {
        return Err(VerifyError::Inconsistent(format!(
            "expected {} bins, got {}",
            spec.slots(),
            aggregates.len()
        )));
    }
    if let Some((bin, agg)) = aggregates
        .iter()
        .enumerate()
        .find(|(_, agg)| agg.success_count > agg.count)
    {
        return Err(VerifyError::Inconsistent(format!(
            "bin {} has {} successes out of {} forecasts",
            bin, agg.success_count, agg.count
        )));
    }
    let total: u64 = aggregates.iter().map(|agg| agg.count).sum();
    if total != pairs.len() as u64 {
        return Err(VerifyError::Inconsistent(format!(
            "bins hold {} forecasts but the cell has {} samples",
            total,
            pairs.len()
        )));
    }
    Ok(())
}
