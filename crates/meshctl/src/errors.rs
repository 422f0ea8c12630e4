//! Exit status for meshctl

use mesh_common::MaintenanceRun;

/// Normal exit, including an operator cancel
pub const EXIT_SUCCESS: i32 = 0;

/// Save failure or any unhandled error
pub const EXIT_GENERAL_ERROR: i32 = 1;

/// A one-shot procedure finished with failed steps
pub const EXIT_PARTIAL_FAILURE: i32 = 2;

pub fn exit_code_for(run: &MaintenanceRun) -> i32 {
    if run.succeeded() {
        EXIT_SUCCESS
    } else {
        EXIT_PARTIAL_FAILURE
    }
}
