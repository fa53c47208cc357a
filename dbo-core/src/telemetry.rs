//! Per-operation telemetry.

use std::fmt;
use std::time::Instant;

use tracing::{debug, error, trace};

use crate::error::{DboError, DboResult};

/// Timing and context for one record operation.
pub(crate) struct OpSpan<'a> {
    op: &'static str,
    table: &'static str,
    detail: &'a (dyn fmt::Debug + Sync),
    show_log: bool,
    start: Instant,
}

impl<'a> OpSpan<'a> {
    pub(crate) fn start(
        op: &'static str,
        table: &'static str,
        detail: &'a (dyn fmt::Debug + Sync),
        show_log: bool,
    ) -> Self {
        trace!(op, table, detail = ?detail, "begin");
        Self {
            op,
            table,
            detail,
            show_log,
            start: Instant::now(),
        }
    }

    /// Log the outcome of the operation and hand the result back.
    pub(crate) fn finish<T>(self, result: DboResult<T>) -> DboResult<T> {
        let duration_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        match &result {
            Ok(_) => {
                if self.show_log {
                    debug!(
                        op = self.op,
                        table = self.table,
                        detail = ?self.detail,
                        duration_ms,
                        "{} success",
                        self.op
                    );
                }
            }
            Err(DboError::DuplicateRecord) => error!(
                op = self.op,
                table = self.table,
                detail = ?self.detail,
                duration_ms,
                "{} duplicate record",
                self.op
            ),
            Err(e) => error!(
                op = self.op,
                table = self.table,
                detail = ?self.detail,
                duration_ms,
                error = %e,
                "{} failed",
                self.op
            ),
        }
        result
    }
}
