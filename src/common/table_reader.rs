use std::collections::BTreeMap;

use duckdb::Connection;
use tracing::{debug, warn};

use super::error::{VerifyError, VerifyResult};
use super::ingest::{normalize_optional, resolve_implied};
use super::types::{ForecastSample, GroupKey};

/// What to do with a row whose probability or outcome fails validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidRowPolicy {
    /// Abort the read with the validation error.
    Error,
    /// Drop the row and keep going.
    Skip,
}

impl InvalidRowPolicy {
    pub fn parse(s: &str) -> VerifyResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(InvalidRowPolicy::Error),
            "skip" => Ok(InvalidRowPolicy::Skip),
            other => Err(VerifyError::InvalidConfig(format!(
                "Invalid on_invalid '{}'. Valid values: error, skip",
                other
            ))),
        }
    }
}

/// Probability and outcome columns of one forecast feature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureColumns {
    pub name: String,
    pub probability_col: String,
    pub outcome_col: String,
}

/// Column mapping for reading forecast samples from a table.
pub struct SampleSource<'a> {
    pub table_name: &'a str,
    pub period_col: &'a str,
    pub group_cols: &'a [String],
    /// One probability/outcome pair per feature; each table row yields one
    /// sample per feature.
    pub features: &'a [FeatureColumns],
    /// Append the feature name to every sample's group key.
    pub tag_features: bool,
    /// Outcome column whose confirmed success fills in a missing outcome.
    pub implied_by: Option<&'a str>,
}

/// One sample as read, before validation.
#[derive(Debug, Clone, Default)]
pub struct RawSampleRow {
    pub key: Vec<Option<String>>,
    pub period: Option<i64>,
    pub probability: Option<f64>,
    pub outcome: Option<String>,
    pub implied: Option<String>,
}

/// Build the sample query. Every column is cast so the row reader sees fixed
/// types: group labels and outcome codes as VARCHAR, the period as BIGINT and
/// probabilities as DOUBLE. Feature columns follow the period as
/// probability/outcome pairs.
pub fn sample_query(source: &SampleSource) -> String {
    let mut select: Vec<String> = source
        .group_cols
        .iter()
        .map(|c| format!("CAST(\"{}\" AS VARCHAR)", escape_identifier(c)))
        .collect();
    select.push(format!("CAST(\"{}\" AS BIGINT)", escape_identifier(source.period_col)));
    for feature in source.features {
        select.push(format!(
            "CAST(\"{}\" AS DOUBLE)",
            escape_identifier(&feature.probability_col)
        ));
        select.push(format!(
            "CAST(\"{}\" AS VARCHAR)",
            escape_identifier(&feature.outcome_col)
        ));
    }
    if let Some(implied) = source.implied_by {
        select.push(format!("CAST(\"{}\" AS VARCHAR)", escape_identifier(implied)));
    }

    format!(
        "SELECT {} FROM \"{}\"",
        select.join(", "),
        escape_identifier(source.table_name)
    )
}

/// Read and validate forecast samples. See [`collect_samples`] for the row
/// rules.
pub fn read_samples(
    con: &Connection,
    source: &SampleSource,
    policy: InvalidRowPolicy,
) -> VerifyResult<Vec<ForecastSample>> {
    let sql = sample_query(source);
    let num_group_cols = source.group_cols.len();
    let implied_col = num_group_cols + 1 + 2 * source.features.len();

    let mut stmt = con.prepare(&sql)?;
    let raw_rows = stmt
        .query_map([], |row| {
            let mut key = Vec::with_capacity(num_group_cols + 1);
            for g in 0..num_group_cols {
                key.push(row.get::<_, Option<String>>(g)?);
            }
            let period: Option<i64> = row.get(num_group_cols)?;
            let implied = match source.implied_by {
                Some(_) => row.get::<_, Option<String>>(implied_col)?,
                None => None,
            };

            let mut samples = Vec::with_capacity(source.features.len());
            for (f, feature) in source.features.iter().enumerate() {
                let col = num_group_cols + 1 + 2 * f;
                let mut key = key.clone();
                if source.tag_features {
                    key.push(Some(feature.name.clone()));
                }
                samples.push(RawSampleRow {
                    key,
                    period,
                    probability: row.get(col)?,
                    outcome: row.get(col + 1)?,
                    implied: implied.clone(),
                });
            }
            Ok(samples)
        })?
        .collect::<Result<Vec<_>, _>>()?;

    collect_samples(raw_rows.into_iter().flatten(), source.table_name, policy)
}

/// Validate one raw sample.
///
/// `Ok(None)` means the row is incomplete: a NULL group label, period or
/// probability, or an outcome that is NULL even after the `implied_by`
/// fallback (see [`resolve_implied`]).
pub fn convert_row(raw: RawSampleRow) -> VerifyResult<Option<ForecastSample>> {
    let key: Option<GroupKey> = raw.key.into_iter().collect();
    let (Some(key), Some(period), Some(probability)) = (key, raw.period, raw.probability) else {
        return Ok(None);
    };

    let outcome = normalize_optional(raw.outcome.as_deref())?;
    let implied = normalize_optional(raw.implied.as_deref())?;
    match resolve_implied(outcome, implied) {
        Some(outcome) => ForecastSample::new(probability, outcome, key, period).map(Some),
        None => Ok(None),
    }
}

/// Validate raw samples under `policy`.
///
/// Incomplete rows are skipped. Invalid probabilities and outcome codes
/// abort under [`InvalidRowPolicy::Error`] and are dropped with a warning
/// under [`InvalidRowPolicy::Skip`]. Ending up with no samples is an error.
pub fn collect_samples<I>(
    rows: I,
    table_name: &str,
    policy: InvalidRowPolicy,
) -> VerifyResult<Vec<ForecastSample>>
where
    I: IntoIterator<Item = RawSampleRow>,
{
    let mut samples = Vec::new();
    let mut null_rows = 0usize;
    let mut skipped = 0usize;

    for raw in rows {
        match (convert_row(raw), policy) {
            (Ok(Some(sample)), _) => samples.push(sample),
            (Ok(None), _) => null_rows += 1,
            (Err(e), InvalidRowPolicy::Error) => return Err(e),
            (Err(e), InvalidRowPolicy::Skip) => {
                warn!(table = table_name, error = %e, "skipping invalid row");
                skipped += 1;
            }
        }
    }

    if null_rows > 0 {
        debug!(table = table_name, rows = null_rows, "rows with NULL values skipped");
    }
    if samples.is_empty() {
        return Err(VerifyError::Source(format!(
            "No valid forecasts found in table '{}' ({} incomplete and {} invalid rows skipped)",
            table_name, null_rows, skipped
        )));
    }

    Ok(samples)
}

/// Read component outcome columns grouped by `group_cols`.
///
/// Each returned row holds one entry per component column, with NULL kept as
/// `None` after the `implied_by` fallback. Groups are ordered by key.
pub fn read_component_outcomes(
    con: &Connection,
    table_name: &str,
    group_cols: &[String],
    outcome_cols: &[String],
    implied_by: Option<&str>,
) -> VerifyResult<BTreeMap<GroupKey, Vec<Vec<Option<bool>>>>> {
    let mut select: Vec<String> = group_cols
        .iter()
        .chain(outcome_cols.iter())
        .map(|c| format!("CAST(\"{}\" AS VARCHAR)", escape_identifier(c)))
        .collect();
    if let Some(implied) = implied_by {
        select.push(format!("CAST(\"{}\" AS VARCHAR)", escape_identifier(implied)));
    }
    let sql = format!(
        "SELECT {} FROM \"{}\"",
        select.join(", "),
        escape_identifier(table_name)
    );

    let width = select.len();
    let mut stmt = con.prepare(&sql)?;
    let raw_rows = stmt
        .query_map([], |row| {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                values.push(row.get::<_, Option<String>>(i)?);
            }
            Ok(values)
        })?
        .collect::<Result<Vec<_>, _>>()?;

    group_component_rows(
        raw_rows,
        group_cols.len(),
        outcome_cols.len(),
        implied_by.is_some(),
        table_name,
    )
}

/// Group raw component rows by their leading key columns.
///
/// Each row is `group labels, component outcomes, [implied outcome]`. Rows
/// with a NULL group label are skipped; an unrecognised outcome code is an
/// error.
pub fn group_component_rows(
    raw_rows: Vec<Vec<Option<String>>>,
    num_group_cols: usize,
    num_outcomes: usize,
    has_implied: bool,
    table_name: &str,
) -> VerifyResult<BTreeMap<GroupKey, Vec<Vec<Option<bool>>>>> {
    let width = num_group_cols + num_outcomes + usize::from(has_implied);
    let mut groups: BTreeMap<GroupKey, Vec<Vec<Option<bool>>>> = BTreeMap::new();

    for values in raw_rows {
        if values.len() != width {
            return Err(VerifyError::Inconsistent(format!(
                "row has {} columns, expected {}",
                values.len(),
                width
            )));
        }
        let key: Option<GroupKey> = values[..num_group_cols].iter().cloned().collect();
        let Some(key) = key else {
            continue;
        };
        let implied = if has_implied {
            normalize_optional(values[width - 1].as_deref())?
        } else {
            None
        };
        let outcomes = values[num_group_cols..num_group_cols + num_outcomes]
            .iter()
            .map(|v| normalize_optional(v.as_deref()).map(|o| resolve_implied(o, implied)))
            .collect::<VerifyResult<Vec<_>>>()?;
        groups.entry(key).or_default().push(outcomes);
    }

    if groups.is_empty() {
        return Err(VerifyError::Source(format!(
            "No valid data found in table '{}'",
            table_name
        )));
    }

    Ok(groups)
}

/// Escape a SQL identifier by doubling any internal double quotes.
fn escape_identifier(name: &str) -> String {
    name.replace('"', "\"\"")
}
