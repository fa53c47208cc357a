//! The process-wide default instance.
//!
//! Kept to a single test: the registry is global and a pool is tied to the
//! runtime that created it.

#![cfg(not(feature = "postgres"))]

mod common;

use common::{setup, total_rows, Class};
use dbo_core::{
    get_dbo, must_get_dbo, replace_global, reset_global, run_in_transaction, transaction_result,
    TxContext,
};

#[tokio::test]
async fn default_instance_lifecycle() {
    let (_dir, dbo) = setup().await;
    reset_global().await;

    assert!(replace_global(dbo.clone()).await.is_none());
    let global = get_dbo().await.unwrap();
    assert_eq!(
        global.config().connection_string,
        dbo.config().connection_string
    );
    assert_eq!(
        must_get_dbo().await.config().connection_string,
        dbo.config().connection_string
    );

    run_in_transaction(|tx: TxContext| async move {
        tx.insert(&mut Class::new("global")).await
    })
    .await
    .unwrap();
    assert_eq!(total_rows(&dbo).await, 1);

    let count = transaction_result(|tx: TxContext| async move {
        tx.count::<Class>(&dbo_core::NoConditions).await
    })
    .await
    .unwrap();
    assert_eq!(count, 1);

    // a lazily built instance comes from the environment
    let (other_dir, _) = setup().await;
    let url = format!(
        "sqlite://{}?mode=rwc",
        other_dir.path().join("from-env.db").display()
    );
    std::env::set_var("DBO_DATABASE_URL", &url);

    let previous = reset_global().await.expect("instance was registered");
    assert_eq!(previous.config().connection_string, dbo.config().connection_string);
    let built = get_dbo().await.unwrap();
    assert_eq!(built.config().connection_string, url);

    std::env::remove_var("DBO_DATABASE_URL");
    reset_global().await;
}
