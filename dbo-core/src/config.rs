//! Connection and transaction settings.
//!
//! Settings come from three places, later ones winning: built-in defaults,
//! the environment (`DBO_*`, with `.env` support) or a TOML file, and finally
//! functional options passed by the caller.

use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::DbType;
use crate::error::{DboError, DboResult};

/// Default transaction lifetime
pub const DEFAULT_TRANSACTION_TIMEOUT: Duration = Duration::from_secs(3);

/// Database name that [`with_db_name`] replaces
pub const DEFAULT_DATABASE: &str = "dbo";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DboConfig {
    pub connection_string: String,
    /// Upper bound of open connections, 0 keeps the driver default
    pub max_open_conns: u32,
    /// Idle connections kept warm, 0 keeps the driver default
    pub max_idle_conns: u32,
    /// Emit success telemetry for every record operation
    pub show_log: bool,
    /// Log every SQL statement through sqlx
    pub show_sql: bool,
    #[serde(rename = "transaction_timeout_ms", with = "millis")]
    pub transaction_timeout: Duration,
}

impl Default for DboConfig {
    fn default() -> Self {
        let connection_string = match DbType::current() {
            DbType::Sqlite => format!("sqlite://{}.db?mode=rwc", DEFAULT_DATABASE),
            DbType::Postgres => format!("postgres://localhost/{}", DEFAULT_DATABASE),
        };
        Self {
            connection_string,
            max_open_conns: 0,
            max_idle_conns: 0,
            show_log: false,
            show_sql: false,
            transaction_timeout: DEFAULT_TRANSACTION_TIMEOUT,
        }
    }
}

/// A functional option applied on top of a base configuration
pub type DboOption = Box<dyn FnOnce(&mut DboConfig) + Send>;

impl DboConfig {
    /// Defaults overridden by `DBO_*` environment variables.
    ///
    /// `.env` in the working directory is loaded first when present.
    /// `DATABASE_URL` is used when `DBO_DATABASE_URL` is unset.
    pub fn from_env() -> DboResult<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> DboResult<Self> {
        let mut config = Self::default();

        if let Some(url) = lookup("DBO_DATABASE_URL").or_else(|| lookup("DATABASE_URL")) {
            config.connection_string = url;
        }
        if let Some(v) = lookup("DBO_MAX_OPEN_CONNS") {
            config.max_open_conns = parse_var("DBO_MAX_OPEN_CONNS", &v)?;
        }
        if let Some(v) = lookup("DBO_MAX_IDLE_CONNS") {
            config.max_idle_conns = parse_var("DBO_MAX_IDLE_CONNS", &v)?;
        }
        if let Some(v) = lookup("DBO_SHOW_LOG") {
            config.show_log = parse_flag("DBO_SHOW_LOG", &v)?;
        }
        if let Some(v) = lookup("DBO_SHOW_SQL") {
            config.show_sql = parse_flag("DBO_SHOW_SQL", &v)?;
        }
        if let Some(v) = lookup("DBO_TRANSACTION_TIMEOUT_MS") {
            let ms: u64 = parse_var("DBO_TRANSACTION_TIMEOUT_MS", &v)?;
            config.transaction_timeout = Duration::from_millis(ms);
        }

        Ok(config)
    }

    /// Load from a TOML file. Missing keys keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> DboResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            DboError::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        toml::from_str(&content)
            .map_err(|e| DboError::config(format!("invalid TOML in {}: {}", path.display(), e)))
    }

    /// Apply options in order.
    pub fn apply(mut self, options: impl IntoIterator<Item = DboOption>) -> Self {
        for option in options {
            option(&mut self);
        }
        self
    }

    /// Reject settings no pool could be built from.
    pub fn validate(&self) -> DboResult<()> {
        let backend = DbType::current();
        if !backend.accepts(&self.connection_string) {
            return Err(DboError::config(format!(
                "connection string is not a {} URL",
                backend.driver_name()
            )));
        }
        if self.transaction_timeout.is_zero() {
            return Err(DboError::config("transaction timeout must be positive"));
        }
        Ok(())
    }
}

pub fn with_connection_string(connection_string: impl Into<String>) -> DboOption {
    let connection_string = connection_string.into();
    Box::new(move |c| c.connection_string = connection_string)
}

/// Swap the database name (the final path segment) of the connection string.
pub fn with_db_name(db_name: impl Into<String>) -> DboOption {
    let db_name = db_name.into();
    Box::new(move |c| c.connection_string = replace_db_name(&c.connection_string, &db_name))
}

pub fn with_max_open_conns(max_open_conns: u32) -> DboOption {
    Box::new(move |c| c.max_open_conns = max_open_conns)
}

pub fn with_max_idle_conns(max_idle_conns: u32) -> DboOption {
    Box::new(move |c| c.max_idle_conns = max_idle_conns)
}

pub fn with_show_log(show_log: bool) -> DboOption {
    Box::new(move |c| c.show_log = show_log)
}

pub fn with_show_sql(show_sql: bool) -> DboOption {
    Box::new(move |c| c.show_sql = show_sql)
}

pub fn with_transaction_timeout(timeout: Duration) -> DboOption {
    Box::new(move |c| c.transaction_timeout = timeout)
}

fn replace_db_name(url: &str, db_name: &str) -> String {
    let (base, query) = match url.split_once('?') {
        Some((base, query)) => (base, Some(query)),
        None => (url, None),
    };

    let base = match base.rfind('/') {
        Some(idx) => {
            let current = &base[idx + 1..];
            // keep a file extension such as `.db`
            let suffix = current
                .strip_prefix(DEFAULT_DATABASE)
                .filter(|rest| rest.starts_with('.'))
                .unwrap_or("");
            format!("{}{}{}", &base[..=idx], db_name, suffix)
        }
        None => base.replace(DEFAULT_DATABASE, db_name),
    };

    match query {
        Some(query) => format!("{}?{}", base, query),
        None => base,
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> DboResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| DboError::config(format!("{} has invalid value '{}'", key, value)))
}

fn parse_flag(key: &str, value: &str) -> DboResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(DboError::config(format!(
            "{} has invalid value '{}'",
            key, value
        ))),
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = DboConfig::default();
        assert_eq!(config.transaction_timeout, Duration::from_secs(3));
        assert!(!config.show_sql);
        config.validate().unwrap();
    }

    #[test]
    fn env_overrides() {
        let config = DboConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "ignored"),
            ("DBO_DATABASE_URL", "sqlite::memory:"),
            ("DBO_MAX_OPEN_CONNS", "8"),
            ("DBO_SHOW_SQL", "true"),
            ("DBO_TRANSACTION_TIMEOUT_MS", "250"),
        ]))
        .unwrap();

        assert_eq!(config.connection_string, "sqlite::memory:");
        assert_eq!(config.max_open_conns, 8);
        assert!(config.show_sql);
        assert_eq!(config.transaction_timeout, Duration::from_millis(250));
    }

    #[test]
    fn env_rejects_garbage() {
        let err = DboConfig::from_lookup(lookup(&[("DBO_MAX_IDLE_CONNS", "many")])).unwrap_err();
        assert!(matches!(err, DboError::Config(_)));
    }

    #[test]
    fn options_apply_in_order() {
        let config = DboConfig::default().apply([
            with_connection_string("postgres://db.internal:5432/dbo?sslmode=disable"),
            with_db_name("reports"),
            with_max_idle_conns(2),
            with_transaction_timeout(Duration::from_secs(10)),
            with_show_log(true),
        ]);

        assert_eq!(
            config.connection_string,
            "postgres://db.internal:5432/reports?sslmode=disable"
        );
        assert_eq!(config.max_idle_conns, 2);
        assert_eq!(config.transaction_timeout, Duration::from_secs(10));
        assert!(config.show_log);
    }

    #[test]
    fn db_name_keeps_sqlite_extension() {
        assert_eq!(
            replace_db_name("sqlite://data/dbo.db?mode=rwc", "other"),
            "sqlite://data/other.db?mode=rwc"
        );
    }

    #[test]
    fn toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dbo.toml");
        fs::write(
            &path,
            "connection_string = \"sqlite::memory:\"\ntransaction_timeout_ms = 1500\nshow_log = true\n",
        )
        .unwrap();

        let config = DboConfig::load(&path).unwrap();
        assert_eq!(config.connection_string, "sqlite::memory:");
        assert_eq!(config.transaction_timeout, Duration::from_millis(1500));
        assert!(config.show_log);
        assert_eq!(config.max_open_conns, 0);
    }

    #[test]
    fn zero_timeout_is_invalid() {
        let config = DboConfig::default().apply([with_transaction_timeout(Duration::ZERO)]);
        assert!(config.validate().is_err());
    }
}
