//! Transaction executor.
//!
//! A unit of work runs on its own task against a [`TxContext`] while the
//! executor waits for either the task or the deadline:
//!
//! ```text
//! Idle -> Started -> Running -> Committed | RolledBack -> Closed
//! ```
//!
//! - the deadline is fixed when the transaction starts (`transaction_timeout`,
//!   or earlier if the caller passes its own deadline)
//! - a panic inside the unit of work is caught on its task and reported as
//!   [`DboError::TransactionPanic`]
//! - if the deadline fires first the outcome is [`DboError::DeadlineExceeded`]
//!   and whatever the unit of work returns later is discarded
//! - any failure rolls back; success commits, and a failed commit is the result
//! - if the executor future is dropped before finishing, the transaction is
//!   rolled back in the background

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, warn};

use crate::dbo::Dbo;
use crate::error::{DboError, DboResult};
use crate::provider::get_dbo;
use crate::tx::TxContext;

/// How long a timed-out executor waits for the transaction to become free
/// before leaving the rollback to the transaction's drop.
const ROLLBACK_GRACE: Duration = Duration::from_secs(1);

impl Dbo {
    /// Run `work` in a transaction bounded by the configured timeout.
    ///
    /// ```ignore
    /// dbo.run_in_transaction(|tx| async move {
    ///     tx.delete_where::<TestTable>(&Filter::new().and("id <= ?", 20)).await?;
    ///     tx.insert_batch(&mut items, 1000).await
    /// })
    /// .await?;
    /// ```
    pub async fn run_in_transaction<F, Fut>(&self, work: F) -> DboResult<()>
    where
        F: FnOnce(TxContext) -> Fut + Send + 'static,
        Fut: Future<Output = DboResult<()>> + Send + 'static,
    {
        self.transaction_result(work).await
    }

    /// Like [`Dbo::run_in_transaction`], handing the unit of work's value back
    /// on commit.
    pub async fn transaction_result<T, F, Fut>(&self, work: F) -> DboResult<T>
    where
        T: Send + 'static,
        F: FnOnce(TxContext) -> Fut + Send + 'static,
        Fut: Future<Output = DboResult<T>> + Send + 'static,
    {
        self.transaction_until(None, work).await
    }

    /// Run `work` with a deadline no later than `parent_deadline`.
    ///
    /// This is how a caller with its own time budget bounds the transaction.
    pub async fn transaction_until<T, F, Fut>(
        &self,
        parent_deadline: Option<Instant>,
        work: F,
    ) -> DboResult<T>
    where
        T: Send + 'static,
        F: FnOnce(TxContext) -> Fut + Send + 'static,
        Fut: Future<Output = DboResult<T>> + Send + 'static,
    {
        let own_deadline = Instant::now() + self.transaction_timeout();
        let deadline = match parent_deadline {
            Some(parent) => parent.min(own_deadline),
            None => own_deadline,
        };
        debug!(timeout_ms = self.transaction_timeout().as_millis() as u64, "begin transaction");

        if Instant::now() >= deadline {
            return Err(DboError::DeadlineExceeded);
        }
        let tx = timeout_at(deadline, self.pool().begin())
            .await
            .map_err(|_| DboError::DeadlineExceeded)??;
        let ctx = TxContext::new(tx, Some(deadline), self.show_log());
        let tx_id = ctx.id();
        let guard = AbandonGuard::new(ctx.clone());

        let task = tokio::spawn(run_guarded(ctx.clone(), work));

        let (outcome, timed_out) = match timeout_at(deadline, task).await {
            Ok(Ok(result)) => {
                debug!(tx_id, "transaction fn done");
                (result, false)
            }
            // run_guarded catches panics, so this is a cancelled runtime task
            Ok(Err(join_error)) => (Err(DboError::TransactionPanic(join_error.to_string())), false),
            Err(_) => {
                error!(tx_id, "transaction context deadline exceeded");
                (Err(DboError::DeadlineExceeded), true)
            }
        };

        let result = match outcome {
            Ok(value) => match ctx.commit().await {
                Ok(()) => Ok(value),
                Err(e) => {
                    error!(tx_id, error = %e, "commit transaction failed");
                    // a commit error may leave the transaction open
                    if let Err(rollback) = ctx.rollback_unless_committed().await {
                        warn!(tx_id, error = %rollback, "rollback after failed commit failed");
                    }
                    Err(e)
                }
            },
            Err(cause) => Err(rollback(&ctx, cause, timed_out).await),
        };
        guard.disarm();
        result
    }
}

/// Rolls the transaction back if the executor future is dropped mid-flight.
///
/// The unit of work keeps its own handle to the transaction, so dropping the
/// executor alone would leave it open until the work finishes.
struct AbandonGuard {
    ctx: Option<TxContext>,
}

impl AbandonGuard {
    fn new(ctx: TxContext) -> Self {
        Self { ctx: Some(ctx) }
    }

    fn disarm(mut self) {
        self.ctx = None;
    }
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        let Some(ctx) = self.ctx.take() else {
            return;
        };
        let tx_id = ctx.id();
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(tx_id, "transaction abandoned outside a runtime; rollback left to its drop");
            return;
        };

        warn!(tx_id, "transaction abandoned; rolling back");
        // statements hold the lock no later than the deadline
        let grace = ctx.remaining().unwrap_or_default() + ROLLBACK_GRACE;
        handle.spawn(async move {
            match ctx.rollback_within(grace).await {
                Some(Ok(())) => debug!(tx_id, "abandoned transaction rolled back"),
                Some(Err(e)) => error!(tx_id, error = %e, "rollback abandoned transaction failed"),
                None => warn!(tx_id, "abandoned transaction still in use; rollback left to its drop"),
            }
        });
    }
}

/// Roll back after a failure, keeping `cause` as the reported error.
async fn rollback(ctx: &TxContext, cause: DboError, timed_out: bool) -> DboError {
    let tx_id = ctx.id();
    let result = if timed_out {
        // the unit of work may still hold the transaction
        match ctx.rollback_within(ROLLBACK_GRACE).await {
            Some(result) => result,
            None => {
                warn!(tx_id, "transaction still in use; rollback left to its drop");
                return cause;
            }
        }
    } else {
        ctx.rollback_unless_committed().await
    };

    match result {
        Ok(()) => {
            debug!(tx_id, outer_error = %cause, "rollback transaction done");
            cause
        }
        Err(rollback) => {
            error!(tx_id, error = %rollback, outer_error = %cause, "rollback transaction failed");
            DboError::RollbackFailed {
                cause: Box::new(cause),
                rollback,
            }
        }
    }
}

/// Body of the spawned task: run the unit of work, turning a panic into an error.
async fn run_guarded<T, F, Fut>(ctx: TxContext, work: F) -> DboResult<T>
where
    F: FnOnce(TxContext) -> Fut,
    Fut: Future<Output = DboResult<T>>,
{
    let tx_id = ctx.id();
    match AssertUnwindSafe(async move { work(ctx).await })
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(tx_id, recover_error = %message, "with transaction panic");
            Err(DboError::TransactionPanic(message))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

/// [`Dbo::run_in_transaction`] on the default instance.
pub async fn run_in_transaction<F, Fut>(work: F) -> DboResult<()>
where
    F: FnOnce(TxContext) -> Fut + Send + 'static,
    Fut: Future<Output = DboResult<()>> + Send + 'static,
{
    get_dbo().await?.run_in_transaction(work).await
}

/// [`Dbo::transaction_result`] on the default instance.
pub async fn transaction_result<T, F, Fut>(work: F) -> DboResult<T>
where
    T: Send + 'static,
    F: FnOnce(TxContext) -> Fut + Send + 'static,
    Fut: Future<Output = DboResult<T>> + Send + 'static,
{
    get_dbo().await?.transaction_result(work).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads() {
        let payload: Box<dyn Any + Send> = Box::new("static str");
        assert_eq!(panic_message(payload.as_ref()), "static str");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");

        let payload: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic payload");
    }
}
