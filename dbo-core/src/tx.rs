//! Scoped transaction context handed to a unit of work.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sqlx::QueryBuilder;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::{timeout_at, Instant};
use tracing::debug;

use crate::backend::{Db, DbRow, DbTransaction};
use crate::error::{DboError, DboResult};

static NEXT_TX_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle of the transaction behind a [`TxContext`].
pub(crate) enum TxState {
    Active(DbTransaction),
    Committed,
    RolledBack,
}

impl TxState {
    fn active_mut(&mut self) -> DboResult<&mut DbTransaction> {
        match self {
            TxState::Active(tx) => Ok(tx),
            TxState::Committed | TxState::RolledBack => Err(DboError::TransactionClosed),
        }
    }

    #[cfg(test)]
    fn name(&self) -> &'static str {
        match self {
            TxState::Active(_) => "active",
            TxState::Committed => "committed",
            TxState::RolledBack => "rolled_back",
        }
    }
}

struct TxInner {
    id: u64,
    deadline: Option<Instant>,
    show_log: bool,
    state: Mutex<TxState>,
}

/// A live transaction, optionally bound to a deadline.
///
/// Every statement issued through the context runs on the same transaction.
/// Once the deadline (if any) passes, statements fail with
/// [`DboError::DeadlineExceeded`]; once the executor has committed or rolled
/// back, they fail with [`DboError::TransactionClosed`].
#[derive(Clone)]
pub struct TxContext {
    inner: Arc<TxInner>,
}

impl fmt::Debug for TxContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxContext")
            .field("id", &self.inner.id)
            .field("remaining", &self.remaining())
            .finish()
    }
}

impl TxContext {
    pub(crate) fn new(tx: DbTransaction, deadline: Option<Instant>, show_log: bool) -> Self {
        Self {
            inner: Arc::new(TxInner {
                id: NEXT_TX_ID.fetch_add(1, Ordering::Relaxed),
                deadline,
                show_log,
                state: Mutex::new(TxState::Active(tx)),
            }),
        }
    }

    /// Identifier used in log lines.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Time left before the deadline, zero once it has passed. `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.inner
            .deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.inner
            .deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
    }

    pub(crate) fn show_log(&self) -> bool {
        self.inner.show_log
    }

    /// Run `fut` to completion, or until the deadline when there is one.
    async fn bounded<F: Future>(&self, fut: F) -> DboResult<F::Output> {
        match self.inner.deadline {
            Some(deadline) => timeout_at(deadline, fut)
                .await
                .map_err(|_| DboError::DeadlineExceeded),
            None => Ok(fut.await),
        }
    }

    async fn lock_active(&self) -> DboResult<MutexGuard<'_, TxState>> {
        if self.is_expired() {
            return Err(DboError::DeadlineExceeded);
        }
        self.bounded(self.inner.state.lock()).await
    }

    pub(crate) async fn execute(&self, builder: &mut QueryBuilder<'_, Db>) -> DboResult<u64> {
        let mut state = self.lock_active().await?;
        let tx = state.active_mut()?;
        let result = self.bounded(builder.build().execute(&mut **tx)).await??;
        Ok(result.rows_affected())
    }

    pub(crate) async fn fetch_all(
        &self,
        builder: &mut QueryBuilder<'_, Db>,
    ) -> DboResult<Vec<DbRow>> {
        let mut state = self.lock_active().await?;
        let tx = state.active_mut()?;
        let rows = self.bounded(builder.build().fetch_all(&mut **tx)).await??;
        Ok(rows)
    }

    pub(crate) async fn fetch_optional(
        &self,
        builder: &mut QueryBuilder<'_, Db>,
    ) -> DboResult<Option<DbRow>> {
        let mut state = self.lock_active().await?;
        let tx = state.active_mut()?;
        let row = self.bounded(builder.build().fetch_optional(&mut **tx)).await??;
        Ok(row)
    }

    /// Commit, bounded by the deadline if there is one.
    pub(crate) async fn commit(&self) -> DboResult<()> {
        let mut state = self.lock_active().await?;
        let tx = match std::mem::replace(&mut *state, TxState::RolledBack) {
            TxState::Active(tx) => tx,
            TxState::Committed => {
                *state = TxState::Committed;
                return Err(DboError::TransactionClosed);
            }
            TxState::RolledBack => return Err(DboError::TransactionClosed),
        };

        // a commit that does not finish is dropped, and sqlx rolls back on drop
        self.bounded(tx.commit()).await??;
        *state = TxState::Committed;
        debug!(tx_id = self.inner.id, "commit transaction success");
        Ok(())
    }

    /// Roll back unless the transaction already committed.
    ///
    /// A committed or already rolled back transaction is left alone and the
    /// call succeeds.
    pub(crate) async fn rollback_unless_committed(&self) -> Result<(), sqlx::Error> {
        let mut state = self.inner.state.lock().await;
        Self::rollback_locked(self.inner.id, &mut state).await
    }

    /// As [`Self::rollback_unless_committed`], giving up when the state lock
    /// is not free within `grace`. `None` means the rollback was not attempted.
    pub(crate) async fn rollback_within(&self, grace: Duration) -> Option<Result<(), sqlx::Error>> {
        let mut state = tokio::time::timeout(grace, self.inner.state.lock()).await.ok()?;
        tokio::time::timeout(grace, Self::rollback_locked(self.inner.id, &mut state))
            .await
            .ok()
    }

    async fn rollback_locked(id: u64, state: &mut TxState) -> Result<(), sqlx::Error> {
        match std::mem::replace(state, TxState::RolledBack) {
            TxState::Active(tx) => {
                tx.rollback().await?;
                debug!(tx_id = id, "rollback transaction success");
                Ok(())
            }
            TxState::Committed => {
                *state = TxState::Committed;
                Ok(())
            }
            TxState::RolledBack => Ok(()),
        }
    }

    #[cfg(test)]
    pub(crate) async fn state_name(&self) -> &'static str {
        self.inner.state.lock().await.name()
    }
}
