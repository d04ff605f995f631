use fail::fail_point;

use crate::error::EtlResult;

/// Fires right before the shared statement queue is executed as one transaction.
pub const FINALIZE__BEFORE_TRANSACTION: &str = "finalize.before_transaction";

/// Fires right before the temporary table of a stream is dropped during cleanup.
pub const CLEANUP__BEFORE_DROP_TMP_TABLE: &str = "cleanup.before_drop_tmp_table";

/// Evaluates the named failpoint and turns a `return` action into an [`crate::error::EtlError`].
///
/// Without the `failpoints` feature this always returns `Ok(())`.
pub fn etl_fail_point(name: &str) -> EtlResult<()> {
    fail_point!(name, |parameter| {
        let detail = match parameter {
            Some(parameter) => format!("The failpoint '{name}' returned an error: {parameter}"),
            None => format!("The failpoint '{name}' returned an error"),
        };

        crate::bail!(
            crate::error::ErrorKind::FailpointTriggered,
            "An error occurred in a fail point",
            detail = detail
        );
    });

    Ok(())
}
