//! The database handle: a connection pool plus the settings it was built with.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use sqlx::{ConnectOptions, Connection};
use tracing::{debug, error, info};

use crate::backend::{DbConnectOptions, DbPool, DbPoolOptions, DbType};
use crate::config::{DboConfig, DboOption};
use crate::error::{DboError, DboResult};

/// Database operator.
///
/// Cloning is cheap: the pool is reference counted and all clones share it.
#[derive(Clone)]
pub struct Dbo {
    pool: DbPool,
    config: Arc<DboConfig>,
}

impl std::fmt::Debug for Dbo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dbo")
            .field("backend", &DbType::current())
            .field("pool_size", &self.pool.size())
            .field("config", &self.config)
            .finish()
    }
}

impl Dbo {
    /// Build a pool from `config` and check that the database answers.
    pub async fn connect(config: DboConfig) -> DboResult<Self> {
        config.validate()?;

        let mut options = DbConnectOptions::from_str(&config.connection_string).map_err(|e| {
            error!(backend = %DbType::current(), error = %e, "parse connection string failed");
            DboError::ConnectionUnavailable(e)
        })?;
        options = if config.show_sql {
            options.log_statements(log::LevelFilter::Debug)
        } else {
            options.disable_statement_logging()
        };

        let mut pool_options = DbPoolOptions::new();
        if config.max_open_conns > 0 {
            pool_options = pool_options.max_connections(config.max_open_conns);
        }
        if config.max_idle_conns > 0 {
            let idle = match config.max_open_conns {
                0 => config.max_idle_conns,
                max => config.max_idle_conns.min(max),
            };
            pool_options = pool_options.min_connections(idle);
        }

        let pool = pool_options.connect_with(options).await.map_err(|e| {
            error!(backend = %DbType::current(), error = %e, "open database connection failed");
            DboError::ConnectionUnavailable(e)
        })?;

        let dbo = Self::from_pool(pool, config);
        dbo.ping().await?;

        info!(
            backend = %DbType::current(),
            max_open_conns = dbo.config.max_open_conns,
            max_idle_conns = dbo.config.max_idle_conns,
            transaction_timeout_ms = dbo.config.transaction_timeout.as_millis() as u64,
            "database connected"
        );
        Ok(dbo)
    }

    /// Environment configuration with `options` applied on top.
    pub async fn from_env(options: impl IntoIterator<Item = DboOption>) -> DboResult<Self> {
        let config = DboConfig::from_env()?.apply(options);
        Self::connect(config).await
    }

    /// Wrap an existing pool. No liveness check is made.
    pub fn from_pool(pool: DbPool, config: DboConfig) -> Self {
        Self {
            pool,
            config: Arc::new(config),
        }
    }

    /// Acquire a connection and ping it.
    pub async fn ping(&self) -> DboResult<()> {
        let mut conn = self.pool.acquire().await.map_err(|e| {
            error!(error = %e, "acquire connection failed");
            DboError::ConnectionUnavailable(e)
        })?;
        conn.ping().await.map_err(|e| {
            error!(error = %e, "ping database failed");
            DboError::ConnectionUnavailable(e)
        })?;
        debug!("ping database success");
        Ok(())
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn config(&self) -> &DboConfig {
        &self.config
    }

    pub fn transaction_timeout(&self) -> Duration {
        self.config.transaction_timeout
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
