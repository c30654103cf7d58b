use duckdb::vtab::BindInfo;
use libduckdb_sys as ffi;
use std::ffi::CStr;

/// Helper to extract a named string parameter from VTab bind info.
pub fn get_string_param(bind: &BindInfo, name: &str) -> Option<String> {
    bind.get_named_parameter(name).map(|v| v.to_string())
}

/// Named string parameter with a default, rejecting an explicit empty value.
pub fn get_column_param(
    bind: &BindInfo,
    name: &str,
    default: &str,
) -> Result<String, Box<dyn std::error::Error>> {
    let value = get_string_param(bind, name).unwrap_or_else(|| default.to_string());
    if value.is_empty() {
        return Err(format!("{} column name cannot be empty", name).into());
    }
    Ok(value)
}

/// Named LIST(VARCHAR) parameter, or an empty list when absent.
pub fn get_list_param(
    bind: &BindInfo,
    name: &str,
) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    match bind.get_named_parameter(name) {
        Some(v) => extract_list_strings(&v, name),
        None => Ok(Vec::new()),
    }
}

/// Named LIST(BIGINT) parameter, or an empty list when absent.
pub fn get_int_list_param(
    bind: &BindInfo,
    name: &str,
) -> Result<Vec<i64>, Box<dyn std::error::Error>> {
    get_list_param(bind, name)?
        .iter()
        .map(|s| {
            s.trim().parse::<i64>().map_err(|_| -> Box<dyn std::error::Error> {
                format!("{} must contain integers, got '{}'", name, s).into()
            })
        })
        .collect()
}

/// Extract a Vec<String> from a DuckDB LIST Value using the raw C API.
///
/// The duckdb crate's `Value` only exposes `to_int64()` and `Display`. For LIST
/// parameters we need `duckdb_get_list_size` and `duckdb_get_list_child` from
/// libduckdb_sys. Non-VARCHAR children (e.g. BIGINT period boundaries) come
/// back in their string representation.
///
/// # Safety assumption (version-pinned)
/// This relies on `duckdb::vtab::Value` being `repr(C)` with a single field
/// `ptr: duckdb_value` (verified for duckdb crate =1.4.4). The crate version
/// is pinned in Cargo.toml with `=1.4.4`, so this layout is stable. When
/// upgrading duckdb-rs, verify the Value layout or replace with a safe API.
pub fn extract_list_strings(
    value: &duckdb::vtab::Value,
    name: &str,
) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    // Value is repr(C) with layout: struct Value { ptr: duckdb_value }
    let raw_ptr: ffi::duckdb_value = unsafe {
        let ptr_ref: *const duckdb::vtab::Value = value;
        *(ptr_ref as *const ffi::duckdb_value)
    };

    let size = unsafe { ffi::duckdb_get_list_size(raw_ptr) } as usize;
    let mut result = Vec::with_capacity(size);

    for i in 0..size {
        let child_ptr = unsafe { ffi::duckdb_get_list_child(raw_ptr, i as u64) };
        if child_ptr.is_null() {
            return Err(format!("{} list element at index {} is null", name, i).into());
        }

        let varchar = unsafe { ffi::duckdb_get_varchar(child_ptr) };
        if varchar.is_null() {
            unsafe { ffi::duckdb_destroy_value(&mut { child_ptr }) };
            return Err(format!(
                "{} list element at index {} could not be read as string",
                name, i
            )
            .into());
        }

        let s = unsafe { CStr::from_ptr(varchar).to_string_lossy().to_string() };
        unsafe {
            ffi::duckdb_free(varchar as *mut std::ffi::c_void);
            ffi::duckdb_destroy_value(&mut { child_ptr });
        }

        if s.is_empty() {
            return Err(format!("{} entries cannot be empty", name).into());
        }
        result.push(s);
    }

    Ok(result)
}
