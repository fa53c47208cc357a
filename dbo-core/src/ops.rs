//! Generic record operations.
//!
//! Each verb is written once against a [`Session`] and exposed twice: on
//! [`Dbo`] (statements go to the pool) and on [`TxContext`] (statements go to
//! the live transaction, so every step of a unit of work shares one handle).
//!
//! Error policy:
//! - unique violations on writes become `DuplicateRecord`
//! - a missing row on point lookup becomes `RecordNotFound`
//! - everything else is returned as the store reported it

use sqlx::{QueryBuilder, Row};

use crate::backend::{Db, DbPool, DbRow};
use crate::condition::{push_order_by, push_pager, push_where, Conditions};
use crate::dbo::Dbo;
use crate::error::{DboError, DboResult};
use crate::record::Record;
use crate::telemetry::OpSpan;
use crate::tx::TxContext;
use crate::value::Value;

/// Where statements are sent.
#[derive(Clone, Copy)]
pub(crate) enum Session<'a> {
    Pool(&'a DbPool),
    Tx(&'a TxContext),
}

impl Session<'_> {
    async fn execute(&self, builder: &mut QueryBuilder<'_, Db>) -> DboResult<u64> {
        match self {
            Session::Pool(pool) => Ok(builder.build().execute(*pool).await?.rows_affected()),
            Session::Tx(tx) => tx.execute(builder).await,
        }
    }

    async fn fetch_all(&self, builder: &mut QueryBuilder<'_, Db>) -> DboResult<Vec<DbRow>> {
        match self {
            Session::Pool(pool) => Ok(builder.build().fetch_all(*pool).await?),
            Session::Tx(tx) => tx.fetch_all(builder).await,
        }
    }

    async fn fetch_optional(
        &self,
        builder: &mut QueryBuilder<'_, Db>,
    ) -> DboResult<Option<DbRow>> {
        match self {
            Session::Pool(pool) => Ok(builder.build().fetch_optional(*pool).await?),
            Session::Tx(tx) => tx.fetch_optional(builder).await,
        }
    }
}

/// Re-classify a store error raised by a write.
fn write_error(err: DboError) -> DboError {
    match err {
        DboError::Store(e) => DboError::from_write(e),
        other => other,
    }
}

fn decode<R: Record>(row: &DbRow) -> DboResult<R> {
    R::from_row(row).map_err(DboError::Store)
}

/// `INSERT INTO table (cols) VALUES (..), (..)` for records that agree on
/// whether they carry an identity.
fn insert_statement<'r, R: Record>(
    records: impl IntoIterator<Item = &'r R>,
    with_id: bool,
    returning: bool,
) -> DboResult<QueryBuilder<'static, Db>> {
    if !with_id && R::columns().is_empty() {
        return Err(DboError::invalid_argument(format!(
            "{} has no columns to insert",
            R::TABLE
        )));
    }

    let mut builder = QueryBuilder::<Db>::new(format!("INSERT INTO {} (", R::TABLE));
    {
        let mut columns = builder.separated(", ");
        if with_id {
            columns.push(R::ID_COLUMN);
        }
        for column in R::columns() {
            columns.push(*column);
        }
    }
    builder.push(") ");

    builder.push_values(records, |mut row, record| {
        if with_id {
            // runs never mix records with and without identity
            if let Some(id) = record.id() {
                let id: Value = id.into();
                id.bind_separated(&mut row);
            }
        }
        for value in record.values() {
            value.bind_separated(&mut row);
        }
    });
    if returning {
        builder.push(" RETURNING *");
    }
    Ok(builder)
}

/// Full-row upsert keyed on the identity column.
///
/// A record without identity is a plain insert.
fn upsert_statement<R: Record>(record: &R) -> DboResult<QueryBuilder<'static, Db>> {
    let mut builder = insert_statement(std::iter::once(record), record.id().is_some(), false)?;
    if record.id().is_none() {
        return Ok(builder);
    }

    builder.push(format!(" ON CONFLICT ({}) DO ", R::ID_COLUMN));
    if R::columns().is_empty() {
        builder.push("NOTHING");
    } else {
        builder.push("UPDATE SET ");
        let mut sets = builder.separated(", ");
        for column in R::columns() {
            sets.push(format!("{0} = excluded.{0}", column));
        }
    }
    Ok(builder)
}

/// `SELECT ... FROM table WHERE ...`, leaving ordering and paging to the caller.
fn select_statement<R: Record>(
    projection: &str,
    condition: &dyn Conditions,
) -> DboResult<QueryBuilder<'static, Db>> {
    let mut builder = QueryBuilder::<Db>::new(format!("SELECT {} FROM {}", projection, R::TABLE));
    let (clauses, params) = condition.conditions();
    push_where(&mut builder, clauses, params)?;
    Ok(builder)
}

pub(crate) async fn insert<R: Record>(
    session: Session<'_>,
    show_log: bool,
    record: &mut R,
) -> DboResult<()> {
    let span = OpSpan::start("insert", R::TABLE, &*record, show_log);
    let result: DboResult<R> = async {
        let mut builder = insert_statement(std::iter::once(&*record), record.id().is_some(), true)?;
        let row = session
            .fetch_optional(&mut builder)
            .await
            .map_err(write_error)?
            .ok_or(DboError::Store(sqlx::Error::RowNotFound))?;
        decode::<R>(&row)
    }
    .await;

    *record = span.finish(result)?;
    Ok(())
}

/// Insert `records` in chunks of `batch_size`.
///
/// Within a chunk, consecutive records that agree on carrying an identity
/// share one statement. Stored rows are read back into `records`: matched on
/// identity when the records carry one, otherwise by position, which relies
/// on the store returning rows in VALUES order (SQLite and PostgreSQL do for
/// a single multi-row INSERT, though SQLite does not document it).
pub(crate) async fn insert_batch<R: Record>(
    session: Session<'_>,
    show_log: bool,
    records: &mut [R],
    batch_size: usize,
) -> DboResult<()> {
    if batch_size == 0 {
        return Err(DboError::invalid_argument("batch size must be positive"));
    }
    let detail = format!("{} record(s), batch size {}", records.len(), batch_size);
    let span = OpSpan::start("insert_batch", R::TABLE, &detail, show_log);

    let result: DboResult<()> = async {
        for chunk in records.chunks_mut(batch_size) {
            let mut start = 0;
            while start < chunk.len() {
                let with_id = chunk[start].id().is_some();
                let end = chunk[start..]
                    .iter()
                    .position(|r| r.id().is_some() != with_id)
                    .map_or(chunk.len(), |offset| start + offset);
                insert_run(session, &mut chunk[start..end], with_id).await?;
                start = end;
            }
        }
        Ok(())
    }
    .await;

    span.finish(result)
}

async fn insert_run<R: Record>(
    session: Session<'_>,
    run: &mut [R],
    with_id: bool,
) -> DboResult<()> {
    let mut builder = insert_statement(run.iter(), with_id, true)?;
    let rows = session.fetch_all(&mut builder).await.map_err(write_error)?;
    if rows.len() != run.len() {
        return Err(DboError::Store(sqlx::Error::Protocol(format!(
            "inserted {} row(s) but {} came back",
            run.len(),
            rows.len()
        ))));
    }
    let mut stored = rows.iter().map(decode::<R>).collect::<DboResult<Vec<R>>>()?;

    if !with_id {
        for (record, row) in run.iter_mut().zip(stored) {
            *record = row;
        }
        return Ok(());
    }

    for record in run.iter_mut() {
        let id = record.id().map(Into::<Value>::into);
        let pos = stored
            .iter()
            .position(|row| row.id().map(Into::<Value>::into) == id)
            .ok_or_else(|| {
                DboError::Store(sqlx::Error::Protocol(format!(
                    "no returned row for {} {:?}",
                    R::TABLE,
                    id
                )))
            })?;
        *record = stored.swap_remove(pos);
    }
    Ok(())
}

pub(crate) async fn update<R: Record>(
    session: Session<'_>,
    show_log: bool,
    record: &R,
) -> DboResult<u64> {
    let span = OpSpan::start("update", R::TABLE, record, show_log);
    let result: DboResult<u64> = async {
        let mut builder = upsert_statement(record)?;
        session.execute(&mut builder).await.map_err(write_error)
    }
    .await;
    span.finish(result)
}

pub(crate) async fn save<R: Record>(
    session: Session<'_>,
    show_log: bool,
    record: &R,
) -> DboResult<()> {
    let span = OpSpan::start("save", R::TABLE, record, show_log);
    let result: DboResult<()> = async {
        let mut builder = upsert_statement(record)?;
        session.execute(&mut builder).await.map(|_| ())
    }
    .await;
    span.finish(result)
}

pub(crate) async fn get<R: Record>(
    session: Session<'_>,
    show_log: bool,
    id: R::Id,
) -> DboResult<R> {
    let span = OpSpan::start("get", R::TABLE, &id, show_log);
    let result: DboResult<R> = async {
        let mut builder = QueryBuilder::<Db>::new(format!(
            "SELECT * FROM {} WHERE {} = ",
            R::TABLE,
            R::ID_COLUMN
        ));
        let id: Value = id.clone().into();
        id.bind_to(&mut builder);
        builder.push(" LIMIT 1");

        match session.fetch_optional(&mut builder).await {
            Ok(Some(row)) => decode::<R>(&row),
            Ok(None) => Err(DboError::RecordNotFound),
            Err(DboError::Store(e)) => Err(DboError::from_read(e)),
            Err(e) => Err(e),
        }
    }
    .await;
    span.finish(result)
}

/// Filters, then ordering, then the paging window.
pub(crate) async fn query<R: Record>(
    session: Session<'_>,
    show_log: bool,
    condition: &dyn Conditions,
) -> DboResult<Vec<R>> {
    let span = OpSpan::start("query", R::TABLE, &condition, show_log);
    let result: DboResult<Vec<R>> = async {
        let mut builder = select_statement::<R>("*", condition)?;
        push_order_by(&mut builder, condition.order_by().as_deref());
        push_pager(&mut builder, condition.pager())?;

        let rows = session.fetch_all(&mut builder).await?;
        rows.iter().map(decode::<R>).collect()
    }
    .await;
    span.finish(result)
}

/// Rows matching the condition's filters; ordering and paging are ignored.
pub(crate) async fn count<R: Record>(
    session: Session<'_>,
    show_log: bool,
    condition: &dyn Conditions,
) -> DboResult<i64> {
    let span = OpSpan::start("count", R::TABLE, &condition, show_log);
    let result: DboResult<i64> = async {
        let mut builder = select_statement::<R>("COUNT(*)", condition)?;
        let row = session
            .fetch_optional(&mut builder)
            .await?
            .ok_or(DboError::Store(sqlx::Error::RowNotFound))?;
        Ok(row.try_get::<i64, _>(0)?)
    }
    .await;
    span.finish(result)
}

/// Total matching rows and the requested page, from one condition value.
pub(crate) async fn page<R: Record>(
    session: Session<'_>,
    show_log: bool,
    condition: &dyn Conditions,
) -> DboResult<(i64, Vec<R>)> {
    let total = count::<R>(session, show_log, condition).await?;
    let items = query::<R>(session, show_log, condition).await?;
    Ok((total, items))
}

/// Delete rows matching the condition's filters. An empty filter is refused.
pub(crate) async fn delete_where<R: Record>(
    session: Session<'_>,
    show_log: bool,
    condition: &dyn Conditions,
) -> DboResult<u64> {
    let span = OpSpan::start("delete", R::TABLE, &condition, show_log);
    let result: DboResult<u64> = async {
        let mut builder = QueryBuilder::<Db>::new(format!("DELETE FROM {}", R::TABLE));
        let (clauses, params) = condition.conditions();
        if !push_where(&mut builder, clauses, params)? {
            return Err(DboError::invalid_argument(
                "delete without a filter would empty the table",
            ));
        }
        session.execute(&mut builder).await
    }
    .await;
    span.finish(result)
}

macro_rules! record_operations {
    () => {
        /// Insert one record and read back generated columns.
        pub async fn insert<R: Record>(&self, record: &mut R) -> DboResult<()> {
            insert(self.session(), self.show_log(), record).await
        }

        /// Insert records in chunks of `batch_size`.
        pub async fn insert_batch<R: Record>(
            &self,
            records: &mut [R],
            batch_size: usize,
        ) -> DboResult<()> {
            self.insert_batch_inner(records, batch_size).await
        }

        /// Write every column of `record`, inserting it when no row has its identity.
        pub async fn update<R: Record>(&self, record: &R) -> DboResult<u64> {
            update(self.session(), self.show_log(), record).await
        }

        pub async fn save<R: Record>(&self, record: &R) -> DboResult<()> {
            save(self.session(), self.show_log(), record).await
        }

        /// Point lookup by identity.
        pub async fn get<R: Record>(&self, id: R::Id) -> DboResult<R> {
            get(self.session(), self.show_log(), id).await
        }

        pub async fn query<R: Record>(&self, condition: &dyn Conditions) -> DboResult<Vec<R>> {
            query(self.session(), self.show_log(), condition).await
        }

        pub async fn count<R: Record>(&self, condition: &dyn Conditions) -> DboResult<i64> {
            count::<R>(self.session(), self.show_log(), condition).await
        }

        /// `(total, page)` where `total` counts every row matching the filters.
        pub async fn page<R: Record>(&self, condition: &dyn Conditions) -> DboResult<(i64, Vec<R>)> {
            page(self.session(), self.show_log(), condition).await
        }

        pub async fn delete_where<R: Record>(&self, condition: &dyn Conditions) -> DboResult<u64> {
            delete_where::<R>(self.session(), self.show_log(), condition).await
        }
    };
}

impl Dbo {
    record_operations!();

    fn session(&self) -> Session<'_> {
        Session::Pool(self.pool())
    }

    pub(crate) fn show_log(&self) -> bool {
        self.config().show_log
    }

    /// Batch inserts through the pool are all-or-nothing.
    async fn insert_batch_inner<R: Record>(
        &self,
        records: &mut [R],
        batch_size: usize,
    ) -> DboResult<()> {
        let tx = self.pool().begin().await?;
        // unbounded, like single-row writes through the pool
        let ctx = TxContext::new(tx, None, self.show_log());
        match insert_batch(Session::Tx(&ctx), self.show_log(), records, batch_size).await {
            Ok(()) => ctx.commit().await,
            Err(e) => {
                if let Err(rollback) = ctx.rollback_unless_committed().await {
                    return Err(DboError::RollbackFailed {
                        cause: Box::new(e),
                        rollback,
                    });
                }
                Err(e)
            }
        }
    }
}

impl TxContext {
    record_operations!();

    fn session(&self) -> Session<'_> {
        Session::Tx(self)
    }

    async fn insert_batch_inner<R: Record>(
        &self,
        records: &mut [R],
        batch_size: usize,
    ) -> DboResult<()> {
        insert_batch(Session::Tx(self), self.show_log(), records, batch_size).await
    }
}
