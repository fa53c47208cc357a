//! Record mapping contract.

use std::fmt;

use sqlx::FromRow;

use crate::backend::DbRow;
use crate::value::Value;

/// A row type the generic operations can read and write.
///
/// The operations only need the table name, the identity column and the
/// values of the remaining columns; reading rows back goes through
/// [`sqlx::FromRow`], usually derived.
///
/// ```ignore
/// #[derive(Debug, Clone, sqlx::FromRow)]
/// struct Class {
///     id: i64,
///     name: String,
/// }
///
/// impl Record for Class {
///     const TABLE: &'static str = "class";
///     type Id = i64;
///
///     fn id(&self) -> Option<i64> {
///         (self.id > 0).then_some(self.id)
///     }
///
///     fn columns() -> &'static [&'static str] {
///         &["name"]
///     }
///
///     fn values(&self) -> Vec<Value> {
///         vec![self.name.clone().into()]
///     }
/// }
/// ```
pub trait Record: for<'r> FromRow<'r, DbRow> + fmt::Debug + Send + Sync + Unpin + 'static {
    const TABLE: &'static str;
    const ID_COLUMN: &'static str = "id";

    type Id: Into<Value> + Clone + fmt::Debug + Send + Sync;

    /// Identity of this record, `None` when the store should generate it.
    fn id(&self) -> Option<Self::Id>;

    /// Non-identity columns, in the order of [`Record::values`].
    fn columns() -> &'static [&'static str];

    fn values(&self) -> Vec<Value>;
}
