//! dbo CLI - exercise dbo-core against a live database
//!
//! - `demo`: in one transaction, clear and re-insert a batch of `test_table` rows
//! - `ping`: connect and ping
//! - `count`: rows currently in `test_table`

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dbo_core::{
    replace_global, run_in_transaction, with_connection_string, with_show_log, with_show_sql,
    Dbo, DboConfig, DboOption, DboResult, DbType, Filter, NoConditions, Record, TxContext, Value,
};
use serde::Serialize;
use tracing::{error, info, warn};

mod tracing_setup;

use tracing_setup::TracingConfig;

#[derive(Parser, Debug)]
#[command(
    name = "dbo",
    author,
    version,
    about = "Generic record access and timeout-bounded transactions over sqlx"
)]
struct Cli {
    /// Database URL (overrides the environment and --config)
    #[arg(long, global = true, env = "DBO_DATABASE_URL")]
    database_url: Option<String>,

    /// TOML settings file (default: DBO_* environment variables)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Debug logging, including every SQL statement
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replace a batch of test_table rows inside one transaction
    Demo(DemoArgs),
    /// Check that the database answers
    Ping,
    /// Count rows in test_table
    Count(CountArgs),
}

#[derive(Parser, Debug)]
struct DemoArgs {
    /// Number of rows to write
    #[arg(long, default_value_t = 20, value_parser = clap::value_parser!(u32).range(1..))]
    batch: u32,

    /// Rows per INSERT statement
    #[arg(long, default_value_t = 1000, value_parser = clap::value_parser!(u32).range(1..))]
    batch_size: u32,
}

#[derive(Parser, Debug)]
struct CountArgs {
    /// Print JSON instead of a bare number
    #[arg(long)]
    json: bool,
}

const TEST_TABLE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS test_table (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL
);
"#;

#[derive(Debug, Clone, sqlx::FromRow)]
struct TestTable {
    id: String,
    name: String,
}

impl Record for TestTable {
    const TABLE: &'static str = "test_table";
    type Id = String;

    fn id(&self) -> Option<String> {
        Some(self.id.clone())
    }

    fn columns() -> &'static [&'static str] {
        &["name"]
    }

    fn values(&self) -> Vec<Value> {
        vec![Value::from(&self.name)]
    }
}

#[derive(Serialize)]
struct CountReport {
    table: &'static str,
    backend: &'static str,
    count: i64,
}

fn load_config(cli: &Cli) -> Result<DboConfig> {
    let config = match &cli.config {
        Some(path) => DboConfig::load(path)?,
        None => DboConfig::from_env()?,
    };

    let mut options: Vec<DboOption> = Vec::new();
    if let Some(url) = &cli.database_url {
        options.push(with_connection_string(url.clone()));
    }
    if cli.debug {
        options.push(with_show_log(true));
        options.push(with_show_sql(true));
    }
    Ok(config.apply(options))
}

fn demo_ids(batch: usize) -> Vec<String> {
    (0..batch).map(|index| index.to_string()).collect()
}

async fn delete_batch(tx: &TxContext, batch: usize) -> DboResult<u64> {
    let placeholders = vec!["?"; batch].join(", ");
    let filter = Filter::new().and_all(format!("id IN ({})", placeholders), demo_ids(batch));
    tx.delete_where::<TestTable>(&filter).await.inspect_err(|e| {
        error!(error = %e, "delete failed");
    })
}

async fn insert_batch(tx: &TxContext, batch: usize, batch_size: usize) -> DboResult<()> {
    let mut items: Vec<TestTable> = demo_ids(batch)
        .into_iter()
        .enumerate()
        .map(|(index, id)| TestTable {
            id,
            name: format!("TAB-{:04}", index),
        })
        .collect();
    tx.insert_batch(&mut items, batch_size).await.inspect_err(|e| {
        error!(error = %e, "insert failed");
    })
}

async fn run_demo(dbo: &Dbo, args: DemoArgs) -> Result<()> {
    sqlx::raw_sql(TEST_TABLE_SCHEMA)
        .execute(dbo.pool())
        .await
        .context("Failed to create test_table")?;
    replace_global(dbo.clone()).await;

    let batch = args.batch as usize;
    let batch_size = args.batch_size as usize;
    let work = run_in_transaction(move |tx: TxContext| async move {
        let removed = delete_batch(&tx, batch).await?;
        insert_batch(&tx, batch, batch_size).await?;
        info!(tx_id = tx.id(), removed, inserted = batch, "demo batch written");
        Ok(())
    });

    tokio::select! {
        result = work => result.context("Demo transaction failed")?,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, transaction abandoned");
            bail!("interrupted");
        }
    }

    let total = dbo.count::<TestTable>(&NoConditions).await?;
    println!("wrote {} row(s); test_table now holds {}", batch, total);
    Ok(())
}

async fn run_count(dbo: &Dbo, args: CountArgs) -> Result<()> {
    let count = dbo
        .count::<TestTable>(&NoConditions)
        .await
        .context("Failed to count test_table (run `dbo demo` first?)")?;

    if args.json {
        let report = CountReport {
            table: TestTable::TABLE,
            backend: DbType::current().as_str(),
            count,
        };
        println!("{}", serde_json::to_string(&report)?);
    } else {
        println!("{}", count);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_setup::init(&TracingConfig { debug: cli.debug }).ok();

    let config = load_config(&cli)?;
    let dbo = Dbo::connect(config)
        .await
        .context("Failed to connect to database")?;

    let result = match cli.command {
        Commands::Demo(args) => run_demo(&dbo, args).await,
        Commands::Ping => {
            println!("ok ({})", DbType::current());
            Ok(())
        }
        Commands::Count(args) => run_count(&dbo, args).await,
    };

    dbo.close().await;
    result
}
