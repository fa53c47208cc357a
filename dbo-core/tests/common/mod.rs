//! Shared fixtures: a `class` table in a throwaway SQLite file.

#![allow(dead_code)]

use std::time::Duration;

use dbo_core::{
    with_connection_string, with_max_open_conns, with_show_log, with_transaction_timeout, Dbo,
    DboConfig, Record, Value,
};
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Class {
    pub id: i64,
    pub name: String,
}

impl Class {
    pub fn new(name: &str) -> Self {
        Self {
            id: 0,
            name: name.to_owned(),
        }
    }
}

impl Record for Class {
    const TABLE: &'static str = "class";
    type Id = i64;

    fn id(&self) -> Option<i64> {
        (self.id > 0).then_some(self.id)
    }

    fn columns() -> &'static [&'static str] {
        &["name"]
    }

    fn values(&self) -> Vec<Value> {
        vec![Value::from(&self.name)]
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS class (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
);
"#;

/// A fresh database; keep the `TempDir` alive for as long as the `Dbo`.
pub async fn setup() -> (TempDir, Dbo) {
    setup_with_timeout(Duration::from_secs(3)).await
}

pub async fn setup_with_timeout(timeout: Duration) -> (TempDir, Dbo) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("dbo_core=debug")
        .with_test_writer()
        .try_init();

    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!(
        "sqlite://{}?mode=rwc",
        dir.path().join("dbo-test.db").display()
    );
    let config = DboConfig::default().apply([
        with_connection_string(url),
        with_max_open_conns(4),
        with_show_log(true),
        with_transaction_timeout(timeout),
    ]);
    let dbo = Dbo::connect(config).await.expect("connect");
    sqlx::raw_sql(SCHEMA)
        .execute(dbo.pool())
        .await
        .expect("schema");
    (dir, dbo)
}

/// Insert classes named `prefix-0`, `prefix-1`, ...
pub async fn seed(dbo: &Dbo, prefix: &str, n: usize) -> Vec<Class> {
    let mut classes: Vec<Class> = (0..n)
        .map(|i| Class::new(&format!("{}-{}", prefix, i)))
        .collect();
    dbo.insert_batch(&mut classes, 100).await.expect("seed");
    classes
}

pub async fn total_rows(dbo: &Dbo) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM class")
        .fetch_one(dbo.pool())
        .await
        .expect("count")
}
