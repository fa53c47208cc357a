//! Process-wide default [`Dbo`].
//!
//! Code that can take a `Dbo` explicitly should. The registry exists for
//! top-level convenience and for swapping the instance in tests.

use once_cell::sync::Lazy;
use tokio::sync::Mutex;

use crate::config::DboConfig;
use crate::dbo::Dbo;
use crate::error::DboResult;

static GLOBAL_DBO: Lazy<Mutex<Option<Dbo>>> = Lazy::new(|| Mutex::new(None));

/// The default instance, built from the environment on first use.
///
/// Initialisation and reads share one lock, so concurrent first calls build
/// the pool once.
pub async fn get_dbo() -> DboResult<Dbo> {
    let mut global = GLOBAL_DBO.lock().await;
    if let Some(dbo) = global.as_ref() {
        return Ok(dbo.clone());
    }

    let dbo = Dbo::connect(DboConfig::from_env()?).await?;
    *global = Some(dbo.clone());
    Ok(dbo)
}

/// Like [`get_dbo`] but aborts on failure. Bootstrap call sites only.
pub async fn must_get_dbo() -> Dbo {
    match get_dbo().await {
        Ok(dbo) => dbo,
        Err(e) => {
            tracing::error!(error = %e, "get database handle failed");
            panic!("get database handle failed: {e}");
        }
    }
}

/// Swap the default instance, returning the previous one.
pub async fn replace_global(dbo: Dbo) -> Option<Dbo> {
    GLOBAL_DBO.lock().await.replace(dbo)
}

/// Drop the default instance; the next [`get_dbo`] builds a fresh one.
pub async fn reset_global() -> Option<Dbo> {
    GLOBAL_DBO.lock().await.take()
}
