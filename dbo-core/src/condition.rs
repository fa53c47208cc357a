//! Query conditions: filters, ordering and the pagination window.
//!
//! Callers describe *what* they want through [`Conditions`]; the record
//! operations turn that into SQL with every parameter bound positionally.
//! Clause text uses `?` as the placeholder regardless of backend.

use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::QueryBuilder;

use crate::backend::Db;
use crate::error::{DboError, DboResult};
use crate::value::Value;

/// Placeholder marker inside clause text
const PLACEHOLDER: char = '?';

/// Pagination window (1-indexed page).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pager {
    pub page: i64,
    pub page_size: i64,
}

impl Pager {
    /// No limit: every matching row is returned.
    pub const DISABLED: Pager = Pager {
        page: 0,
        page_size: -1,
    };

    pub fn new(page: i64, page_size: i64) -> Self {
        Self { page, page_size }
    }

    /// Paging applies only when both page and page size are positive.
    pub fn enabled(&self) -> bool {
        self.page > 0 && self.page_size > 0
    }

    /// `(offset, limit)` for this window, `None` when the offset does not fit in an `i64`.
    pub fn offset(&self) -> Option<(i64, i64)> {
        let offset = self.page.checked_sub(1)?.checked_mul(self.page_size)?;
        Some((offset, self.page_size))
    }
}

impl Default for Pager {
    fn default() -> Self {
        Self::DISABLED
    }
}

/// What a query should match, how to order it, and which window to return.
pub trait Conditions: fmt::Debug + Send + Sync {
    /// WHERE clauses (joined with AND) and their parameters, in placeholder order.
    fn conditions(&self) -> (Vec<String>, Vec<Value>);

    /// ORDER BY expression, if any.
    fn order_by(&self) -> Option<String> {
        None
    }

    fn pager(&self) -> Option<Pager> {
        None
    }
}

/// Matches every row.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoConditions;

impl Conditions for NoConditions {
    fn conditions(&self) -> (Vec<String>, Vec<Value>) {
        (Vec::new(), Vec::new())
    }
}

/// General purpose condition builder.
///
/// ```ignore
/// let filter = Filter::new()
///     .and("name = ?", "A")
///     .and("id > ?", 10)
///     .order_by("id desc")
///     .page(1, 20);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Filter {
    clauses: Vec<String>,
    params: Vec<Value>,
    order_by: Option<String>,
    pager: Option<Pager>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a clause with one placeholder.
    pub fn and(mut self, clause: impl Into<String>, param: impl Into<Value>) -> Self {
        self.clauses.push(clause.into());
        self.params.push(param.into());
        self
    }

    /// Add a clause with any number of placeholders.
    pub fn and_all<I, V>(mut self, clause: impl Into<String>, params: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.clauses.push(clause.into());
        self.params.extend(params.into_iter().map(Into::into));
        self
    }

    /// Add a clause that takes no parameters (`deleted_at IS NULL`).
    pub fn and_raw(mut self, clause: impl Into<String>) -> Self {
        self.clauses.push(clause.into());
        self
    }

    pub fn order_by(mut self, order_by: impl Into<String>) -> Self {
        self.order_by = Some(order_by.into());
        self
    }

    pub fn page(mut self, page: i64, page_size: i64) -> Self {
        self.pager = Some(Pager::new(page, page_size));
        self
    }

    pub fn with_pager(mut self, pager: Pager) -> Self {
        self.pager = Some(pager);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }
}

impl Conditions for Filter {
    fn conditions(&self) -> (Vec<String>, Vec<Value>) {
        (self.clauses.clone(), self.params.clone())
    }

    fn order_by(&self) -> Option<String> {
        self.order_by.clone()
    }

    fn pager(&self) -> Option<Pager> {
        self.pager
    }
}

/// Append ` WHERE (c1) AND (c2) ...` to `builder`, binding every parameter.
///
/// Returns whether anything was appended. Fails without touching the builder
/// when placeholders and parameters do not line up.
pub(crate) fn push_where(
    builder: &mut QueryBuilder<'_, Db>,
    clauses: Vec<String>,
    params: Vec<Value>,
) -> DboResult<bool> {
    let clauses: Vec<String> = clauses
        .into_iter()
        .filter(|c| !c.trim().is_empty())
        .collect();

    let placeholders: usize = clauses
        .iter()
        .map(|c| c.matches(PLACEHOLDER).count())
        .sum();
    if placeholders != params.len() {
        return Err(DboError::condition(format!(
            "{} placeholder(s) but {} parameter(s)",
            placeholders,
            params.len()
        )));
    }

    if clauses.is_empty() {
        return Ok(false);
    }

    let mut params = params.into_iter();
    builder.push(" WHERE ");
    for (i, clause) in clauses.iter().enumerate() {
        if i > 0 {
            builder.push(" AND ");
        }
        builder.push("(");
        let mut segments = clause.split(PLACEHOLDER).peekable();
        while let Some(segment) = segments.next() {
            builder.push(segment);
            if segments.peek().is_some() {
                // counts were checked above
                if let Some(param) = params.next() {
                    param.bind_to(builder);
                }
            }
        }
        builder.push(")");
    }

    Ok(true)
}

/// Append ` ORDER BY ...` when the condition asks for ordering.
pub(crate) fn push_order_by(builder: &mut QueryBuilder<'_, Db>, order_by: Option<&str>) {
    if let Some(order_by) = order_by.map(str::trim).filter(|o| !o.is_empty()) {
        builder.push(" ORDER BY ");
        builder.push(order_by);
    }
}

/// Append ` LIMIT ? OFFSET ?` when the pager is enabled.
pub(crate) fn push_pager(
    builder: &mut QueryBuilder<'_, Db>,
    pager: Option<Pager>,
) -> DboResult<()> {
    if let Some(pager) = pager.filter(Pager::enabled) {
        let (offset, limit) = pager.offset().ok_or_else(|| {
            DboError::condition(format!(
                "page {} of size {} is out of range",
                pager.page, pager.page_size
            ))
        })?;
        builder.push(" LIMIT ");
        builder.push_bind(limit);
        builder.push(" OFFSET ");
        builder.push_bind(offset);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn offset_calculation() {
        assert_eq!(Pager::new(1, 10).offset(), Some((0, 10)));
        assert_eq!(Pager::new(2, 10).offset(), Some((10, 10)));
        assert_eq!(Pager::new(3, 25).offset(), Some((50, 25)));
    }

    #[test]
    fn huge_page_is_rejected_instead_of_overflowing() {
        assert_eq!(Pager::new(i64::MAX, 2).offset(), None);
        assert_eq!(Pager::new(i64::MAX / 2, 4).offset(), None);

        let mut builder = QueryBuilder::<Db>::new("SELECT * FROM class");
        let err = push_pager(&mut builder, Some(Pager::new(i64::MAX / 2, 4))).unwrap_err();
        assert!(matches!(err, DboError::Condition(_)));
        assert_eq!(builder.sql(), "SELECT * FROM class");
    }

    #[test]
    fn disabled_pager() {
        assert!(!Pager::DISABLED.enabled());
        assert!(!Pager::new(0, 10).enabled());
        assert!(!Pager::new(1, 0).enabled());
        assert!(Pager::new(1, 1).enabled());
        assert_eq!(Pager::default(), Pager::DISABLED);
    }

    #[test]
    fn where_clauses_are_parenthesized_and_joined() {
        let mut builder = QueryBuilder::<Db>::new("SELECT * FROM class");
        let filter = Filter::new()
            .and("name = ? OR name = ?", "x")
            .and_raw("deleted_at IS NULL");
        let (clauses, mut params) = filter.conditions();
        params.push(Value::from("y"));

        assert!(push_where(&mut builder, clauses, params).unwrap());
        let sql = builder.sql();
        assert!(sql.starts_with("SELECT * FROM class WHERE ("));
        assert!(sql.contains(") AND (deleted_at IS NULL)"));
        assert!(!sql.contains("'x'"));
    }

    #[test]
    fn mismatched_parameters_are_rejected() {
        let mut builder = QueryBuilder::<Db>::new("SELECT * FROM class");
        let err = push_where(
            &mut builder,
            vec!["id = ?".into(), "name = ?".into()],
            vec![Value::Int(1)],
        )
        .unwrap_err();

        assert!(matches!(err, DboError::Condition(_)));
        assert_eq!(builder.sql(), "SELECT * FROM class");
    }

    #[test]
    fn empty_condition_adds_nothing() {
        let mut builder = QueryBuilder::<Db>::new("SELECT COUNT(*) FROM class");
        let (clauses, params) = NoConditions.conditions();
        assert!(!push_where(&mut builder, clauses, params).unwrap());
        push_order_by(&mut builder, Some("  "));
        push_pager(&mut builder, Some(Pager::DISABLED)).unwrap();
        assert_eq!(builder.sql(), "SELECT COUNT(*) FROM class");
    }

    #[test]
    fn ordering_precedes_pagination() {
        let mut builder = QueryBuilder::<Db>::new("SELECT * FROM class");
        push_order_by(&mut builder, Some("id desc"));
        push_pager(&mut builder, Some(Pager::new(2, 5))).unwrap();
        let sql = builder.sql();
        let order = sql.find("ORDER BY").unwrap();
        let limit = sql.find("LIMIT").unwrap();
        assert!(order < limit);
    }

    proptest! {
        #[test]
        fn offset_is_page_minus_one_times_size(page in 1i64..10_000, size in 1i64..1_000) {
            let pager = Pager::new(page, size);
            prop_assert!(pager.enabled());
            prop_assert_eq!(pager.offset(), Some(((page - 1) * size, size)));
        }

        #[test]
        fn placeholder_accounting(n in 0usize..8, extra in 1usize..3) {
            let clauses: Vec<String> = (0..n).map(|i| format!("c{} = ?", i)).collect();
            let params: Vec<Value> = (0..n as i64).map(Value::Int).collect();

            let mut ok = QueryBuilder::<Db>::new("SELECT 1");
            prop_assert_eq!(push_where(&mut ok, clauses.clone(), params.clone()).unwrap(), n > 0);

            let mut too_many = params;
            too_many.extend((0..extra as i64).map(Value::Int));
            let mut bad = QueryBuilder::<Db>::new("SELECT 1");
            prop_assert!(push_where(&mut bad, clauses, too_many).is_err());
        }
    }
}
