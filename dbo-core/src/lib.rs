//! dbo-core: generic record access over sqlx.
//!
//! - [`Dbo`]: pool + settings, with CRUD, query, count and page operations
//!   for any [`Record`]
//! - [`TxContext`]: the same operations inside one transaction
//! - [`Dbo::run_in_transaction`]: runs a unit of work under a deadline,
//!   recovering panics and committing or rolling back
//! - [`get_dbo`] / [`replace_global`]: a process-wide default instance

pub mod backend;
pub mod condition;
pub mod config;
pub mod dbo;
pub mod error;
mod ops;
pub mod provider;
pub mod record;
mod telemetry;
pub mod trans;
pub mod tx;
pub mod value;

pub use backend::{Db, DbPool, DbRow, DbType};
pub use condition::{Conditions, Filter, NoConditions, Pager};
pub use config::{
    with_connection_string, with_db_name, with_max_idle_conns, with_max_open_conns,
    with_show_log, with_show_sql, with_transaction_timeout, DboConfig, DboOption,
    DEFAULT_TRANSACTION_TIMEOUT,
};
pub use dbo::Dbo;
pub use error::{DboError, DboResult};
pub use provider::{get_dbo, must_get_dbo, replace_global, reset_global};
pub use record::Record;
pub use trans::{run_in_transaction, transaction_result};
pub use tx::TxContext;
pub use value::{NullKind, Value};
