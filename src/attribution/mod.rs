//! Post-outcome failure attribution: which component factor accounts for
//! the failures observed in each group.

pub mod params;
pub mod shares;

use duckdb::{
    core::{DataChunkHandle, Inserter, LogicalTypeHandle, LogicalTypeId},
    vtab::{BindInfo, InitInfo, TableFunctionInfo, VTab},
    Result,
};
use std::cell::UnsafeCell;
use std::error::Error;

use crate::common::grouping::{write_group_columns, GroupAttributionRow, RowBuffer};
use crate::common::table_reader;
use crate::ConnHandle;
use params::AttributionParams;
use shares::attribute_failures;

#[repr(C)]
pub struct AttributionBindData {
    params: AttributionParams,
}

// Safety: AttributionBindData is read-only after creation and contains only owned data.
unsafe impl Send for AttributionBindData {}
unsafe impl Sync for AttributionBindData {}

/// See `verification::VerificationInitData` for the UnsafeCell rationale.
#[repr(C)]
pub struct AttributionInitData {
    state: UnsafeCell<RowBuffer<GroupAttributionRow>>,
}

// Safety: DuckDB guarantees single-threaded access per query.
unsafe impl Send for AttributionInitData {}
unsafe impl Sync for AttributionInitData {}

/// `failure_attribution(table, outcomes := [...], group_by := [...])`
pub struct AttributionVTab;

impl VTab for AttributionVTab {
    type InitData = AttributionInitData;
    type BindData = AttributionBindData;

    fn bind(bind: &BindInfo) -> Result<Self::BindData, Box<dyn Error>> {
        let params = AttributionParams::from_bind_info(bind)?;

        for col_name in &params.group_by {
            bind.add_result_column(col_name, LogicalTypeHandle::from(LogicalTypeId::Varchar));
        }
        bind.add_result_column("component", LogicalTypeHandle::from(LogicalTypeId::Varchar));
        bind.add_result_column("observed", LogicalTypeHandle::from(LogicalTypeId::Bigint));
        bind.add_result_column("success_rate", LogicalTypeHandle::from(LogicalTypeId::Double));
        bind.add_result_column("failure_share", LogicalTypeHandle::from(LogicalTypeId::Double));

        Ok(AttributionBindData { params })
    }

    fn init(_: &InitInfo) -> Result<Self::InitData, Box<dyn Error>> {
        Ok(AttributionInitData {
            state: UnsafeCell::new(RowBuffer::new()),
        })
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

            let groups = ConnHandle::from_function(func)?.with(|c| {
                table_reader::read_component_outcomes(
                    c,
                    &params.table_name,
                    &params.group_by,
                    &params.outcomes,
                    params.implied_by.as_deref(),
                )
            })?;

            state.rows = attribute_failures(&groups, &params.outcomes)?
                .into_iter()
                .map(|a| GroupAttributionRow {
                    group_values: a.group,
                    component: a.component,
                    observed: a.observed as i64,
                    success_rate: a.success_rate,
                    failure_share: a.failure_share,
                })
                .collect();
        }

        let chunk_size = unsafe { libduckdb_sys::duckdb_vector_size() } as usize;
        let rows = state.next_chunk(chunk_size);
        if rows.is_empty() {
            output.set_len(0);
            return Ok(());
        }

        let num_group_cols = params.group_by.len();
        write_group_columns(
            output,
            num_group_cols,
            rows.iter().map(|r| r.group_values.as_slice()),
        )?;

        let component_vector = output.flat_vector(num_group_cols);
        for (row_offset, row) in rows.iter().enumerate() {
            component_vector.insert(row_offset, row.component.as_str());
        }

        let mut observed_vector = output.flat_vector(num_group_cols + 1);
        let observed_slice = observed_vector.as_mut_slice::<i64>();
        for (row_offset, row) in rows.iter().enumerate() {
            observed_slice[row_offset] = row.observed;
        }

        let mut rate_vector = output.flat_vector(num_group_cols + 2);
        let rate_slice = rate_vector.as_mut_slice::<f64>();
        for (row_offset, row) in rows.iter().enumerate() {
            rate_slice[row_offset] = row.success_rate;
        }

        let mut share_vector = output.flat_vector(num_group_cols + 3);
        let share_slice = share_vector.as_mut_slice::<f64>();
        for (row_offset, row) in rows.iter().enumerate() {
            share_slice[row_offset] = row.failure_share;
        }

        output.set_len(rows.len());
        Ok(())
    }

    fn parameters() -> Option<Vec<LogicalTypeHandle>> {
        Some(vec![LogicalTypeHandle::from(LogicalTypeId::Varchar)])
    }

    fn named_parameters() -> Option<Vec<(String, LogicalTypeHandle)>> {
        Some(vec![
            (
                "outcomes".to_string(),
                LogicalTypeHandle::list(&LogicalTypeHandle::from(LogicalTypeId::Varchar)),
            ),
            (
                "group_by".to_string(),
                LogicalTypeHandle::list(&LogicalTypeHandle::from(LogicalTypeId::Varchar)),
            ),
            (
                "implied_by".to_string(),
                LogicalTypeHandle::from(LogicalTypeId::Varchar),
            ),
        ])
    }
}
