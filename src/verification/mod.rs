//! Forecast verification: binning, per-bin aggregation, Brier decomposition,
//! binomial reliability bands, and the grouped runner that ties them together.
//!
//! The engine modules have no DuckDB dependency; the table functions at the
//! bottom of this file read a table and hand the samples to
//! [`runner::GroupedVerificationRunner`].

pub mod aggregation;
pub mod binning;
pub mod interval;
pub mod metrics;
pub mod params;
pub mod runner;

use duckdb::{
    core::{DataChunkHandle, LogicalTypeHandle, LogicalTypeId},
    vtab::{BindInfo, InitInfo, TableFunctionInfo, VTab},
    Result,
};
use std::cell::UnsafeCell;
use std::error::Error;
use tracing::debug;

use crate::common::grouping::{write_group_columns, GroupBinRow, GroupMetricsRow, RowBuffer};
use crate::common::table_reader;
use crate::common::types::ForecastSample;
use crate::ConnHandle;
use params::VerificationParams;
use runner::{GroupedVerificationRunner, VerificationConfig, VerificationReport};

/// Bind data for verify_forecasts() and reliability_table().
#[repr(C)]
pub struct VerificationBindData {
    params: VerificationParams,
}

// Safety: VerificationBindData is read-only after creation and contains only owned data.
unsafe impl Send for VerificationBindData {}
unsafe impl Sync for VerificationBindData {}

/// Init data holding the pre-computed rows and the emission cursor.
///
/// Uses UnsafeCell for interior mutability because the VTab func() receives
/// &self but we need to track position across multiple calls. The DuckDB VTab
/// contract guarantees single-threaded access per query execution.
#[repr(C)]
pub struct VerificationInitData<T> {
    state: UnsafeCell<RowBuffer<T>>,
}

// Safety: DuckDB guarantees single-threaded access per query.
unsafe impl<T> Send for VerificationInitData<T> {}
unsafe impl<T> Sync for VerificationInitData<T> {}

impl<T> VerificationInitData<T> {
    fn new() -> Self {
        VerificationInitData {
            state: UnsafeCell::new(RowBuffer::new()),
        }
    }
}

/// Named parameters accepted by both verification table functions.
fn verification_named_parameters() -> Vec<(String, LogicalTypeHandle)> {
    let varchar = || LogicalTypeHandle::from(LogicalTypeId::Varchar);
    vec![
        ("probability".to_string(), varchar()),
        ("outcome".to_string(), varchar()),
        (
            "probabilities".to_string(),
            LogicalTypeHandle::list(&LogicalTypeHandle::from(LogicalTypeId::Varchar)),
        ),
        (
            "outcomes".to_string(),
            LogicalTypeHandle::list(&LogicalTypeHandle::from(LogicalTypeId::Varchar)),
        ),
        (
            "features".to_string(),
            LogicalTypeHandle::list(&LogicalTypeHandle::from(LogicalTypeId::Varchar)),
        ),
        ("period".to_string(), varchar()),
        (
            "group_by".to_string(),
            LogicalTypeHandle::list(&LogicalTypeHandle::from(LogicalTypeId::Varchar)),
        ),
        (
            "periods".to_string(),
            LogicalTypeHandle::list(&LogicalTypeHandle::from(LogicalTypeId::Bigint)),
        ),
        (
            "bins".to_string(),
            LogicalTypeHandle::from(LogicalTypeId::Integer),
        ),
        (
            "confidence_level".to_string(),
            LogicalTypeHandle::from(LogicalTypeId::Double),
        ),
        ("implied_by".to_string(), varchar()),
        ("on_invalid".to_string(), varchar()),
    ]
}

/// Read the source table and run verification over every group × period cell.
fn compute_report(
    con: &ConnHandle,
    params: &VerificationParams,
) -> Result<VerificationReport, Box<dyn Error>> {
    let samples = con.with(|c| table_reader::read_samples(c, &params.source(), params.on_invalid))?;

    let boundaries = if params.periods.is_empty() {
        default_boundaries(&samples)
    } else {
        params.periods.clone()
    };
    debug!(
        table = %params.table_name,
        samples = samples.len(),
        periods = boundaries.len() - 1,
        "running forecast verification"
    );

    let config = VerificationConfig::new(params.group_by.clone(), boundaries, params.bins)
        .with_features(params.feature_names())
        .with_confidence_level(params.confidence_level);
    let report = GroupedVerificationRunner::new(config)?.run(&samples)?;
    Ok(report)
}

/// One period covering every sample: `[min, max + 1)`.
fn default_boundaries(samples: &[ForecastSample]) -> Vec<i64> {
    let min = samples.iter().map(|s| s.period()).min().unwrap_or(0);
    let max = samples.iter().map(|s| s.period()).max().unwrap_or(0);
    vec![min, max + 1]
}

/// `verify_forecasts(table, ...)`: one row of metrics per group × period.
pub struct VerifyVTab;

impl VTab for VerifyVTab {
    type InitData = VerificationInitData<GroupMetricsRow>;
    type BindData = VerificationBindData;

    fn bind(bind: &BindInfo) -> Result<Self::BindData, Box<dyn Error>> {
        let params = VerificationParams::from_bind_info(bind)?;

        for col_name in &params.key_columns() {
            bind.add_result_column(col_name, LogicalTypeHandle::from(LogicalTypeId::Varchar));
        }
        bind.add_result_column("period_start", LogicalTypeHandle::from(LogicalTypeId::Bigint));
        bind.add_result_column("period_end", LogicalTypeHandle::from(LogicalTypeId::Bigint));
        bind.add_result_column("samples", LogicalTypeHandle::from(LogicalTypeId::Bigint));
        for name in [
            "brier",
            "reliability",
            "resolution",
            "skill",
            "bias",
            "sharpness",
            "base_rate",
        ] {
            bind.add_result_column(name, LogicalTypeHandle::from(LogicalTypeId::Double));
        }

        Ok(VerificationBindData { params })
    }

    fn init(_: &InitInfo) -> Result<Self::InitData, Box<dyn Error>> {
        Ok(VerificationInitData::new())
    }

    fn func(
        func: &TableFunctionInfo<Self>,
        output: &mut DataChunkHandle,
    ) -> Result<(), Box<dyn Error>> {
        let init_data = func.get_init_data();
        let params = &func.get_bind_data().params;

        // Safety: DuckDB VTab contract guarantees single-threaded func() calls
        let state = unsafe { &mut *init_data.state.get() };

        if !state.computed {
            state.computed = true;
            let report = compute_report(ConnHandle::from_function(func)?, params)?;
            state.rows = report
                .cells
                .into_values()
                .map(|cell| GroupMetricsRow {
                    group_values: cell.group,
                    period_start: cell.period.start,
                    period_end: cell.period.end,
                    samples: cell.metrics.samples as i64,
                    brier: cell.metrics.brier,
                    reliability: cell.metrics.reliability,
                    resolution: cell.metrics.resolution,
                    skill: cell.metrics.skill,
                    bias: cell.metrics.bias,
                    sharpness: cell.metrics.sharpness,
                    base_rate: cell.metrics.base_rate,
                })
                .collect();
        }

        let chunk_size = unsafe { libduckdb_sys::duckdb_vector_size() } as usize;
        let rows = state.next_chunk(chunk_size);
        if rows.is_empty() {
            output.set_len(0);
            return Ok(());
        }

        let num_group_cols = params.key_columns().len();
        write_group_columns(
            output,
            num_group_cols,
            rows.iter().map(|r| r.group_values.as_slice()),
        )?;

        let bigint_columns: [fn(&GroupMetricsRow) -> i64; 3] =
            [|r| r.period_start, |r| r.period_end, |r| r.samples];
        for (offset, get) in bigint_columns.iter().enumerate() {
            let mut vector = output.flat_vector(num_group_cols + offset);
            let slice = vector.as_mut_slice::<i64>();
            for (row_offset, row) in rows.iter().enumerate() {
                slice[row_offset] = get(row);
            }
        }

        let double_columns: [fn(&GroupMetricsRow) -> f64; 7] = [
            |r| r.brier,
            |r| r.reliability,
            |r| r.resolution,
            |r| r.skill,
            |r| r.bias,
            |r| r.sharpness,
            |r| r.base_rate,
        ];
        for (offset, get) in double_columns.iter().enumerate() {
            let mut vector = output.flat_vector(num_group_cols + 3 + offset);
            let slice = vector.as_mut_slice::<f64>();
            for (row_offset, row) in rows.iter().enumerate() {
                slice[row_offset] = get(row);
            }
        }

        output.set_len(rows.len());
        Ok(())
    }

    fn parameters() -> Option<Vec<LogicalTypeHandle>> {
        Some(vec![LogicalTypeHandle::from(LogicalTypeId::Varchar)])
    }

    fn named_parameters() -> Option<Vec<(String, LogicalTypeHandle)>> {
        Some(verification_named_parameters())
    }
}

/// `reliability_table(table, ...)`: the reliability diagram of every
/// group × period cell, one row per non-empty bin with its confidence band.
pub struct ReliabilityVTab;

impl VTab for ReliabilityVTab {
    type InitData = VerificationInitData<GroupBinRow>;
    type BindData = VerificationBindData;

    fn bind(bind: &BindInfo) -> Result<Self::BindData, Box<dyn Error>> {
        let params = VerificationParams::from_bind_info(bind)?;

        for col_name in &params.key_columns() {
            bind.add_result_column(col_name, LogicalTypeHandle::from(LogicalTypeId::Varchar));
        }
        bind.add_result_column("period_start", LogicalTypeHandle::from(LogicalTypeId::Bigint));
        bind.add_result_column("period_end", LogicalTypeHandle::from(LogicalTypeId::Bigint));
        bind.add_result_column("bin", LogicalTypeHandle::from(LogicalTypeId::Bigint));
        bind.add_result_column("midpoint", LogicalTypeHandle::from(LogicalTypeId::Double));
        bind.add_result_column("avg_probability", LogicalTypeHandle::from(LogicalTypeId::Double));
        bind.add_result_column("success_rate", LogicalTypeHandle::from(LogicalTypeId::Double));
        bind.add_result_column("count", LogicalTypeHandle::from(LogicalTypeId::Bigint));
        bind.add_result_column("lower_bound", LogicalTypeHandle::from(LogicalTypeId::Double));
        bind.add_result_column("upper_bound", LogicalTypeHandle::from(LogicalTypeId::Double));

        Ok(VerificationBindData { params })
    }

    fn init(_: &InitInfo) -> Result<Self::InitData, Box<dyn Error>> {
        Ok(VerificationInitData::new())
    }

    fn func(
        func: &TableFunctionInfo<Self>,
        output: &mut DataChunkHandle,
    ) -> Result<(), Box<dyn Error>> {
        let init_data = func.get_init_data();
        let params = &func.get_bind_data().params;

        // Safety: DuckDB VTab contract guarantees single-threaded func() calls
        let state = unsafe { &mut *init_data.state.get() };

        if !state.computed {
            state.computed = true;
            let report = compute_report(ConnHandle::from_function(func)?, params)?;
            state.rows = bin_rows(&report);
        }

        let chunk_size = unsafe { libduckdb_sys::duckdb_vector_size() } as usize;
        let rows = state.next_chunk(chunk_size);
        if rows.is_empty() {
            output.set_len(0);
            return Ok(());
        }

        let num_group_cols = params.key_columns().len();
        write_group_columns(
            output,
            num_group_cols,
            rows.iter().map(|r| r.group_values.as_slice()),
        )?;

        // Column layout after the group columns:
        // period_start, period_end, bin, midpoint, avg_probability,
        // success_rate, count, lower_bound, upper_bound
        let bigint_columns: [(usize, fn(&GroupBinRow) -> i64); 4] = [
            (0, |r| r.period_start),
            (1, |r| r.period_end),
            (2, |r| r.bin),
            (6, |r| r.count),
        ];
        for (offset, get) in bigint_columns {
            let mut vector = output.flat_vector(num_group_cols + offset);
            let slice = vector.as_mut_slice::<i64>();
            for (row_offset, row) in rows.iter().enumerate() {
                slice[row_offset] = get(row);
            }
        }

        let double_columns: [(usize, fn(&GroupBinRow) -> f64); 5] = [
            (3, |r| r.midpoint),
            (4, |r| r.avg_probability),
            (5, |r| r.success_rate),
            (7, |r| r.lower_bound),
            (8, |r| r.upper_bound),
        ];
        for (offset, get) in double_columns {
            let mut vector = output.flat_vector(num_group_cols + offset);
            let slice = vector.as_mut_slice::<f64>();
            for (row_offset, row) in rows.iter().enumerate() {
                slice[row_offset] = get(row);
            }
        }

        output.set_len(rows.len());
        Ok(())
    }

    fn parameters() -> Option<Vec<LogicalTypeHandle>> {
        Some(vec![LogicalTypeHandle::from(LogicalTypeId::Varchar)])
    }

    fn named_parameters() -> Option<Vec<(String, LogicalTypeHandle)>> {
        Some(verification_named_parameters())
    }
}

/// Flatten a report into reliability diagram rows (non-empty bins only).
pub fn bin_rows(report: &VerificationReport) -> Vec<GroupBinRow> {
    let mut rows = Vec::new();
    for cell in report.cells.values() {
        for band in &cell.intervals {
            let bin = &cell.metrics.bin_table[band.bin];
            rows.push(GroupBinRow {
                group_values: cell.group.clone(),
                period_start: cell.period.start,
                period_end: cell.period.end,
                bin: bin.bin as i64,
                midpoint: bin.midpoint,
                avg_probability: bin.avg_probability,
                success_rate: bin.success_rate,
                count: bin.count as i64,
                lower_bound: band.interval.lower,
                upper_bound: band.interval.upper,
            });
        }
    }
    rows
}
