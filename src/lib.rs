pub mod attribution;
pub mod common;
pub mod verification;

use duckdb::{
    duckdb_entrypoint_c_api,
    vtab::{TableFunctionInfo, VTab},
    Connection, Result,
};
use std::error::Error;
use std::sync::{Arc, Mutex};

use attribution::AttributionVTab;
use common::error::VerifyResult;
use verification::{ReliabilityVTab, VerifyVTab};

/// Connection used by the table functions to read their source tables.
///
/// Registered as extra info on every table function so `func()` can query
/// the table named in the SQL call.
#[derive(Clone)]
pub struct ConnHandle(Arc<Mutex<Connection>>);

// Safety: the inner Connection is only touched while the mutex is held.
unsafe impl Send for ConnHandle {}
unsafe impl Sync for ConnHandle {}

impl ConnHandle {
    pub fn new(con: Connection) -> Self {
        ConnHandle(Arc::new(Mutex::new(con)))
    }

    /// Run `f` with exclusive access to the connection.
    pub fn with<T>(
        &self,
        f: impl FnOnce(&Connection) -> VerifyResult<T>,
    ) -> Result<T, Box<dyn Error>> {
        let con = self
            .0
            .lock()
            .map_err(|_| "Internal error: connection lock poisoned")?;
        Ok(f(&con)?)
    }

    /// The handle stored as extra info on a table function.
    pub fn from_function<V: VTab>(
        func: &TableFunctionInfo<V>,
    ) -> Result<&ConnHandle, Box<dyn Error>> {
        let conn_handle_ptr = func.get_extra_info::<ConnHandle>();
        if conn_handle_ptr.is_null() {
            return Err("Internal error: connection handle not available".into());
        }
        // Safety: the handle was registered with the function and lives as
        // long as the database.
        Ok(unsafe { &*conn_handle_ptr })
    }
}

#[duckdb_entrypoint_c_api()]
pub unsafe fn quackverify_init(con: Connection) -> Result<(), Box<dyn Error>> {
    let handle = ConnHandle::new(con.try_clone()?);

    con.register_table_function_with_extra_info::<VerifyVTab, _>("verify_forecasts", &handle)?;
    con.register_table_function_with_extra_info::<ReliabilityVTab, _>(
        "reliability_table",
        &handle,
    )?;
    con.register_table_function_with_extra_info::<AttributionVTab, _>(
        "failure_attribution",
        &handle,
    )?;

    tracing::debug!("registered forecast verification table functions");
    Ok(())
}
