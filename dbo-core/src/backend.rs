//! Active database backend.
//!
//! The crate is compiled against exactly one sqlx driver. SQLite is the
//! default; the `postgres` feature switches every alias below to PostgreSQL.

use std::fmt;

#[cfg(feature = "postgres")]
mod active {
    pub type Db = sqlx::Postgres;
    pub type DbConnectOptions = sqlx::postgres::PgConnectOptions;
    pub(crate) const CURRENT: super::DbType = super::DbType::Postgres;
}

#[cfg(not(feature = "postgres"))]
mod active {
    pub type Db = sqlx::Sqlite;
    pub type DbConnectOptions = sqlx::sqlite::SqliteConnectOptions;
    pub(crate) const CURRENT: super::DbType = super::DbType::Sqlite;
}

pub use active::{Db, DbConnectOptions};

pub type DbPool = sqlx::Pool<Db>;
pub type DbPoolOptions = sqlx::pool::PoolOptions<Db>;
pub type DbRow = <Db as sqlx::Database>::Row;
pub type DbTransaction = sqlx::Transaction<'static, Db>;

/// Backend kinds a build can target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbType {
    Sqlite,
    Postgres,
}

impl DbType {
    /// The backend this build talks to.
    pub fn current() -> Self {
        active::CURRENT
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DbType::Sqlite => "sqlite",
            DbType::Postgres => "postgres",
        }
    }

    /// Driver name as sqlx reports it.
    pub fn driver_name(&self) -> &'static str {
        match self {
            DbType::Sqlite => <sqlx::Sqlite as sqlx::Database>::NAME,
            DbType::Postgres => <sqlx::Postgres as sqlx::Database>::NAME,
        }
    }

    /// Whether `url` carries a scheme this backend accepts.
    pub fn accepts(&self, url: &str) -> bool {
        match self {
            DbType::Sqlite => url.starts_with("sqlite:"),
            DbType::Postgres => url.starts_with("postgres://") || url.starts_with("postgresql://"),
        }
    }
}

impl fmt::Display for DbType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
