use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::debug;

use super::aggregation::aggregate;
use super::binning::BinSpec;
use super::interval::{binomial_interval, ConfidenceInterval};
use super::metrics::{AttributeMetrics, AttributeMetricsResult};
use crate::common::error::{VerifyError, VerifyResult};
use crate::common::types::{periods_from_boundaries, ForecastSample, GroupKey, PeriodRange};

/// Confidence level used for reliability bands when none is given.
pub const DEFAULT_CONFIDENCE_LEVEL: f64 = 0.8;

/// Name of the key part added when a run covers several features.
pub const FEATURE_DIMENSION: &str = "feature";

/// Explicit configuration for one verification run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationConfig {
    /// Names of the group key parts, e.g. `["region", "feature"]`.
    pub group_dimensions: Vec<String>,
    /// Groups to evaluate. Empty means every distinct key found in the samples.
    pub groups: Vec<GroupKey>,
    /// Forecast features evaluated side by side, e.g. `["reservoir", "trap"]`.
    /// When non-empty every sample key ends with its feature name, and each
    /// group is evaluated once per feature.
    #[serde(default)]
    pub features: Vec<String>,
    /// Ordered cut points; period `p` is `[b[p], b[p + 1])`.
    pub period_boundaries: Vec<i64>,
    pub bins: BinSpec,
    pub confidence_level: f64,
}

impl VerificationConfig {
    pub fn new(
        group_dimensions: Vec<String>,
        period_boundaries: Vec<i64>,
        bins: BinSpec,
    ) -> Self {
        VerificationConfig {
            group_dimensions,
            groups: Vec::new(),
            features: Vec::new(),
            period_boundaries,
            bins,
            confidence_level: DEFAULT_CONFIDENCE_LEVEL,
        }
    }

    pub fn with_groups(mut self, groups: Vec<GroupKey>) -> Self {
        self.groups = groups;
        self
    }

    pub fn with_confidence_level(mut self, confidence_level: f64) -> Self {
        self.confidence_level = confidence_level;
        self
    }

    pub fn with_features(mut self, features: Vec<String>) -> Self {
        self.features = features;
        self
    }

    /// Names of every sample key part: the group dimensions, then `feature`
    /// when features are configured.
    pub fn key_dimensions(&self) -> Vec<String> {
        let mut dims = self.group_dimensions.clone();
        if !self.features.is_empty() {
            dims.push(FEATURE_DIMENSION.to_string());
        }
        dims
    }

    /// Explicit groups expanded by feature, in configuration order.
    fn expanded_groups(&self) -> Vec<GroupKey> {
        if self.features.is_empty() {
            return self.groups.clone();
        }
        self.groups
            .iter()
            .flat_map(|group| {
                self.features.iter().map(move |feature| {
                    let mut key = group.clone();
                    key.push(feature.clone());
                    key
                })
            })
            .collect()
    }

    pub fn validate(&self) -> VerifyResult<()> {
        periods_from_boundaries(&self.period_boundaries)?;
        if !(self.confidence_level > 0.0 && self.confidence_level < 1.0) {
            return Err(VerifyError::InvalidConfig(format!(
                "confidence_level must be between 0.0 and 1.0 (exclusive), got {}",
                self.confidence_level
            )));
        }
        let expected = self.group_dimensions.len();
        if let Some(group) = self.groups.iter().find(|g| g.len() != expected) {
            return Err(VerifyError::GroupArity {
                expected,
                found: group.len(),
            });
        }
        if let Some(group) = first_duplicate(&self.groups) {
            return Err(VerifyError::InvalidConfig(format!(
                "group {:?} is listed more than once",
                group
            )));
        }
        if let Some(feature) = first_duplicate(&self.features) {
            return Err(VerifyError::InvalidConfig(format!(
                "feature '{}' is listed more than once",
                feature
            )));
        }
        if self.features.iter().any(|f| f.is_empty()) {
            return Err(VerifyError::InvalidConfig(
                "feature names cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn first_duplicate<T: Ord>(items: &[T]) -> Option<&T> {
    let mut seen = BTreeSet::new();
    items.iter().find(|item| !seen.insert(*item))
}

/// Confidence band around the reliability diagonal for one non-empty bin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BinInterval {
    pub bin: usize,
    pub interval: ConfidenceInterval,
}

/// Result for one group × period cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellVerification {
    pub group: GroupKey,
    pub period: PeriodRange,
    pub metrics: AttributeMetricsResult,
    pub intervals: Vec<BinInterval>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub period: PeriodRange,
    pub label: String,
    pub metrics: AttributeMetricsResult,
}

/// Metrics of one group across periods, in boundary order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationSeries {
    pub group: GroupKey,
    pub points: Vec<SeriesPoint>,
}

impl VerificationSeries {
    fn push(&mut self, period: PeriodRange, metrics: AttributeMetricsResult) {
        self.points.push(SeriesPoint {
            period,
            label: period.label(),
            metrics,
        });
    }

    pub fn brier(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.metrics.brier).collect()
    }

    pub fn skill(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.metrics.skill).collect()
    }

    pub fn bias(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.metrics.bias).collect()
    }

    pub fn labels(&self) -> Vec<&str> {
        self.points.iter().map(|p| p.label.as_str()).collect()
    }
}

/// Every cell of a run plus the per-group series.
///
/// The maps serialize as plain lists of their values; each value carries its
/// own group and period, so the keys are rebuilt on deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub periods: Vec<PeriodRange>,
    #[serde(serialize_with = "values_as_seq", deserialize_with = "cells_from_seq")]
    pub cells: BTreeMap<(GroupKey, PeriodRange), CellVerification>,
    #[serde(serialize_with = "values_as_seq", deserialize_with = "series_from_seq")]
    pub series: BTreeMap<GroupKey, VerificationSeries>,
}

fn values_as_seq<K, V, S>(map: &BTreeMap<K, V>, serializer: S) -> Result<S::Ok, S::Error>
where
    V: Serialize,
    S: Serializer,
{
    serializer.collect_seq(map.values())
}

fn cells_from_seq<'de, D>(
    deserializer: D,
) -> Result<BTreeMap<(GroupKey, PeriodRange), CellVerification>, D::Error>
where
    D: Deserializer<'de>,
{
    let cells = Vec::<CellVerification>::deserialize(deserializer)?;
    Ok(cells
        .into_iter()
        .map(|cell| ((cell.group.clone(), cell.period), cell))
        .collect())
}

fn series_from_seq<'de, D>(
    deserializer: D,
) -> Result<BTreeMap<GroupKey, VerificationSeries>, D::Error>
where
    D: Deserializer<'de>,
{
    let series = Vec::<VerificationSeries>::deserialize(deserializer)?;
    Ok(series.into_iter().map(|s| (s.group.clone(), s)).collect())
}

impl VerificationReport {
    pub fn cell(&self, group: &[String], period: PeriodRange) -> Option<&CellVerification> {
        self.cells.get(&(group.to_vec(), period))
    }
}

/// Evaluates every group × period cell of a sample set.
pub struct GroupedVerificationRunner {
    config: VerificationConfig,
}

impl GroupedVerificationRunner {
    pub fn new(config: VerificationConfig) -> VerifyResult<Self> {
        config.validate()?;
        Ok(GroupedVerificationRunner { config })
    }

    pub fn config(&self) -> &VerificationConfig {
        &self.config
    }

    /// Compute one result per (group, period) cell and the per-group series.
    ///
    /// Cells with no samples get the degenerate all-zero metrics so that
    /// sparse data never aborts the other cells.
    pub fn run(&self, samples: &[ForecastSample]) -> VerifyResult<VerificationReport> {
        let periods = periods_from_boundaries(&self.config.period_boundaries)?;
        let expected = self.config.key_dimensions().len();

        // Partition once by group; BTreeMap keeps group order deterministic.
        let mut by_group: BTreeMap<&[String], Vec<&ForecastSample>> = BTreeMap::new();
        for sample in samples {
            if sample.group_key().len() != expected {
                return Err(VerifyError::GroupArity {
                    expected,
                    found: sample.group_key().len(),
                });
            }
            by_group.entry(sample.group_key()).or_default().push(sample);
        }

        let features = &self.config.features;
        let groups: Vec<GroupKey> = if self.config.groups.is_empty() {
            by_group
                .keys()
                .filter(|k| features.is_empty() || k.last().is_some_and(|f| features.contains(f)))
                .map(|k| k.to_vec())
                .collect()
        } else {
            self.config.expanded_groups()
        };

        let unused: BTreeSet<&[String]> = by_group
            .keys()
            .copied()
            .filter(|k| !groups.iter().any(|g| g.as_slice() == *k))
            .collect();
        if !unused.is_empty() {
            debug!(groups = ?unused, "samples outside the configured groups are ignored");
        }

        let mut cells = BTreeMap::new();
        let mut series = BTreeMap::new();

        for group in &groups {
            let members = by_group
                .get(group.as_slice())
                .map(Vec::as_slice)
                .unwrap_or(&[]);

            let outside = members
                .iter()
                .filter(|s| !periods.iter().any(|p| p.contains(s.period())))
                .count();
            if outside > 0 {
                debug!(group = ?group, outside, "samples outside every period are ignored");
            }

            let mut group_series = VerificationSeries {
                group: group.clone(),
                points: Vec::with_capacity(periods.len()),
            };

            for &period in &periods {
                let cell_samples: Vec<&ForecastSample> = members
                    .iter()
                    .copied()
                    .filter(|s| period.contains(s.period()))
                    .collect();

                let cell = self.verify_cell(group, period, &cell_samples)?;
                group_series.push(period, cell.metrics.clone());
                cells.insert((group.clone(), period), cell);
            }

            series.insert(group.clone(), group_series);
        }

        Ok(VerificationReport {
            periods,
            cells,
            series,
        })
    }

    fn verify_cell(
        &self,
        group: &[String],
        period: PeriodRange,
        samples: &[&ForecastSample],
    ) -> VerifyResult<CellVerification> {
        let spec = &self.config.bins;
        let aggregates = aggregate(samples.iter().copied(), spec)?;
        let pairs: Vec<(f64, bool)> = samples.iter().map(|s| s.pair()).collect();
        let metrics = AttributeMetrics::compute(&aggregates, spec, &pairs)?;

        // Bands are centred on the bin midpoint: the observed frequency a
        // perfectly reliable forecast in that bin would produce.
        let intervals = metrics
            .non_empty_bins()
            .map(|row| {
                binomial_interval(row.midpoint, row.count, self.config.confidence_level)
                    .map(|interval| BinInterval {
                        bin: row.bin,
                        interval,
                    })
            })
            .collect::<VerifyResult<Vec<_>>>()?;

        if samples.is_empty() {
            debug!(group = ?group, period = %period.label(), "empty cell");
        }

        Ok(CellVerification {
            group: group.to_vec(),
            period,
            metrics,
            intervals,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(p: f64, o: bool, group: &[&str], year: i64) -> ForecastSample {
        ForecastSample::new(p, o, group.iter().map(|s| s.to_string()).collect(), year).unwrap()
    }

    fn regions() -> Vec<String> {
        vec!["region".to_string()]
    }

    fn mixed_samples(group: &[&str], year: i64) -> Vec<ForecastSample> {
        let probs = [0.1, 0.1, 0.1, 0.1, 0.1, 0.9, 0.9, 0.9, 0.9, 0.9];
        let outcomes = [false, false, false, false, true, true, true, true, true, false];
        probs
            .iter()
            .zip(outcomes.iter())
            .map(|(&p, &o)| sample(p, o, group, year))
            .collect()
    }

    #[test]
    fn test_run_over_groups_and_periods() {
        let mut samples = mixed_samples(&["north sea"], 1992);
        samples.extend(mixed_samples(&["barents sea"], 2005));
        samples.push(sample(0.3, true, &["barents sea"], 1999));

        let config = VerificationConfig::new(regions(), vec![1990, 1996, 2002, 2011], BinSpec::new(10).unwrap());
        let report = GroupedVerificationRunner::new(config).unwrap().run(&samples).unwrap();

        assert_eq!(report.periods.len(), 3);
        assert_eq!(report.cells.len(), 6);
        assert_eq!(report.series.len(), 2);

        let north = report
            .cell(&["north sea".to_string()], PeriodRange { start: 1990, end: 1996 })
            .unwrap();
        assert_eq!(north.metrics.samples, 10);
        assert!((north.metrics.brier - 0.17).abs() < 1e-12);
        assert_eq!(north.intervals.len(), 2);
        assert_eq!(north.intervals[0].bin, 0);
        assert_eq!(north.intervals[1].bin, 8);

        let barents = &report.series[&vec!["barents sea".to_string()]];
        assert_eq!(barents.labels(), vec!["1990-1995", "1996-2001", "2002-2010"]);
        let counts: Vec<usize> = barents.points.iter().map(|p| p.metrics.samples).collect();
        assert_eq!(counts, vec![0, 1, 10]);
        assert_eq!(barents.skill()[0], 0.0);
    }

    #[test]
    fn test_explicit_groups_include_missing_ones() {
        let samples = mixed_samples(&["north sea"], 2000);
        let config = VerificationConfig::new(regions(), vec![1990, 2022], BinSpec::new(5).unwrap())
            .with_groups(vec![
                vec!["north sea".to_string()],
                vec!["norwegian sea".to_string()],
            ]);
        let report = GroupedVerificationRunner::new(config).unwrap().run(&samples).unwrap();

        let empty = &report.series[&vec!["norwegian sea".to_string()]];
        assert_eq!(empty.points.len(), 1);
        let m = &empty.points[0].metrics;
        assert_eq!(m.samples, 0);
        assert_eq!(m.skill, 0.0);
        assert_eq!(m.brier, 0.0);
        assert!(report.cells.values().all(|c| c.metrics.bin_table.len() == 6));
    }

    #[test]
    fn test_final_boundary_is_exclusive() {
        let samples = vec![
            sample(0.4, true, &["a"], 2000),
            sample(0.4, false, &["a"], 2010),
        ];
        let config = VerificationConfig::new(regions(), vec![2000, 2010], BinSpec::new(10).unwrap());
        let report = GroupedVerificationRunner::new(config).unwrap().run(&samples).unwrap();
        let cell = report
            .cell(&["a".to_string()], PeriodRange { start: 2000, end: 2010 })
            .unwrap();
        assert_eq!(cell.metrics.samples, 1);
    }

    #[test]
    fn test_brier_independent_of_bin_count() {
        let samples = mixed_samples(&["a"], 2000);
        let run = |bins| {
            let config = VerificationConfig::new(regions(), vec![2000, 2001], BinSpec::new(bins).unwrap());
            GroupedVerificationRunner::new(config).unwrap().run(&samples).unwrap()
        };
        let period = PeriodRange { start: 2000, end: 2001 };
        let key = vec!["a".to_string()];
        let ten = run(10).cell(&key, period).unwrap().metrics.brier;
        let five = run(5).cell(&key, period).unwrap().metrics.brier;
        assert_eq!(ten, five);
    }

    #[test]
    fn test_group_arity_mismatch() {
        let samples = vec![sample(0.5, true, &["a", "trap"], 2000)];
        let config = VerificationConfig::new(regions(), vec![2000, 2001], BinSpec::new(10).unwrap());
        let err = GroupedVerificationRunner::new(config).unwrap().run(&samples).unwrap_err();
        assert!(matches!(err, VerifyError::GroupArity { expected: 1, found: 2 }));
    }

    #[test]
    fn test_config_validation() {
        let bins = BinSpec::new(10).unwrap();
        assert!(GroupedVerificationRunner::new(VerificationConfig::new(regions(), vec![2000], bins)).is_err());
        assert!(GroupedVerificationRunner::new(
            VerificationConfig::new(regions(), vec![2000, 2001], bins).with_confidence_level(1.2)
        )
        .is_err());
        assert!(GroupedVerificationRunner::new(
            VerificationConfig::new(regions(), vec![2000, 2001], bins)
                .with_groups(vec![vec!["a".to_string(), "b".to_string()]])
        )
        .is_err());
    }

    #[test]
    fn test_two_dimensional_groups() {
        let dims = vec!["region".to_string(), "feature".to_string()];
        let mut samples = mixed_samples(&["north sea", "trap"], 2000);
        samples.extend(mixed_samples(&["north sea", "source"], 2000));
        let config = VerificationConfig::new(dims, vec![2000, 2001], BinSpec::new(5).unwrap());
        let report = GroupedVerificationRunner::new(config).unwrap().run(&samples).unwrap();
        let keys: Vec<&GroupKey> = report.series.keys().collect();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0], &vec!["north sea".to_string(), "source".to_string()]);
    }

    #[test]
    fn test_duplicate_groups_rejected() {
        let config = VerificationConfig::new(regions(), vec![2000, 2001], BinSpec::new(10).unwrap())
            .with_groups(vec![vec!["a".to_string()], vec!["b".to_string()], vec!["a".to_string()]]);
        assert!(matches!(
            GroupedVerificationRunner::new(config),
            Err(VerifyError::InvalidConfig(_))
        ));

        let config = VerificationConfig::new(regions(), vec![2000, 2001], BinSpec::new(10).unwrap())
            .with_features(vec!["trap".to_string(), "trap".to_string()]);
        assert!(matches!(
            GroupedVerificationRunner::new(config),
            Err(VerifyError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_report_serializes() {
        let mut samples = mixed_samples(&["a"], 2000);
        samples.push(sample(0.7, true, &["b"], 2001));
        let config = VerificationConfig::new(regions(), vec![2000, 2001, 2002], BinSpec::new(10).unwrap());
        let report = GroupedVerificationRunner::new(config).unwrap().run(&samples).unwrap();

        let text = serde_json::to_string(&report).unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["cells"].as_array().unwrap().len(), 4);
        assert_eq!(json["cells"][0]["group"][0], "a");
        assert_eq!(json["cells"][0]["period"]["start"], 2000);
        assert_eq!(json["series"][0]["points"][0]["label"], "2000-2000");
        assert_eq!(json["series"][0]["points"][0]["metrics"]["samples"], 10);

        let restored: VerificationReport = serde_json::from_str(&text).unwrap();
        assert_eq!(restored.cells.len(), 4);
        let cell = restored
            .cell(&["b".to_string()], PeriodRange { start: 2001, end: 2002 })
            .unwrap();
        assert_eq!(cell.metrics.samples, 1);
        assert_eq!(restored.series[&vec!["a".to_string()]].points.len(), 2);
    }

    #[test]
    fn test_features_evaluated_side_by_side() {
        let features = vec!["reservoir".to_string(), "trap".to_string()];
        let mut samples = mixed_samples(&["north sea", "trap"], 2000);
        samples.push(sample(0.6, true, &["north sea", "reservoir"], 2000));
        samples.push(sample(0.6, false, &["north sea", "reservoir"], 2000));
        // Not in the feature list.
        samples.push(sample(0.3, true, &["north sea", "source"], 2000));

        let config = VerificationConfig::new(regions(), vec![2000, 2001], BinSpec::new(10).unwrap())
            .with_features(features.clone());
        assert_eq!(config.key_dimensions(), vec!["region".to_string(), "feature".to_string()]);
        let report = GroupedVerificationRunner::new(config.clone()).unwrap().run(&samples).unwrap();

        let keys: Vec<&GroupKey> = report.series.keys().collect();
        assert_eq!(
            keys,
            vec![
                &vec!["north sea".to_string(), "reservoir".to_string()],
                &vec!["north sea".to_string(), "trap".to_string()],
            ]
        );
        let period = PeriodRange { start: 2000, end: 2001 };
        let trap = report
            .cell(&["north sea".to_string(), "trap".to_string()], period)
            .unwrap();
        assert!((trap.metrics.brier - 0.17).abs() < 1e-12);
        let reservoir = report
            .cell(&["north sea".to_string(), "reservoir".to_string()], period)
            .unwrap();
        assert_eq!(reservoir.metrics.samples, 2);

        // Explicit groups are expanded by every feature, including empty ones.
        let config = config.with_groups(vec![vec!["north sea".to_string()], vec!["barents sea".to_string()]]);
        let report = GroupedVerificationRunner::new(config).unwrap().run(&samples).unwrap();
        assert_eq!(report.series.len(), 4);
        let empty = report
            .cell(&["barents sea".to_string(), "trap".to_string()], period)
            .unwrap();
        assert_eq!(empty.metrics.samples, 0);
    }

    #[test]
    fn test_features_require_feature_key_part() {
        let samples = mixed_samples(&["north sea"], 2000);
        let config = VerificationConfig::new(regions(), vec![2000, 2001], BinSpec::new(10).unwrap())
            .with_features(vec!["trap".to_string()]);
        let err = GroupedVerificationRunner::new(config).unwrap().run(&samples).unwrap_err();
        assert!(matches!(err, VerifyError::GroupArity { expected: 2, found: 1 }));
    }
}
