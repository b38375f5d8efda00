#![cfg(feature = "persistent")]

mod common;

use std::sync::Arc;

use serde_json::json;
use worldmirror::store::persistent::LogOpener;
use worldmirror::{PropertyType, Query};

use common::{build, messaging_ledger, TABLE};

#[tokio::test]
async fn records_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let opener = Arc::new(LogOpener::new(dir.path()).with_sync_on_write(false));

    let key = {
        let mirror = build(messaging_ledger(7), opener.clone()).await.unwrap();
        let applied = mirror
            .apply("sendOffchainMessage", &json!({"message": "durable"}), &mirror.context())
            .await
            .unwrap();
        mirror.close().unwrap();
        applied.key
    };

    let mirror = build(messaging_ledger(7), opener).await.unwrap();
    let table = mirror.table(TABLE).unwrap();
    assert_eq!(table.count().unwrap(), 1);
    let record = table.get(&key).unwrap().unwrap();
    assert_eq!(record.get("message").and_then(|v| v.as_str()), Some("durable"));
    assert_eq!(table.query(&Query::new()).unwrap()[0].key, key);
}

#[tokio::test]
async fn changed_schemas_refuse_existing_topic() {
    let dir = tempfile::tempdir().unwrap();
    let opener = Arc::new(LogOpener::new(dir.path()).with_sync_on_write(false));

    let mirror = build(messaging_ledger(7), opener.clone()).await.unwrap();
    mirror.close().unwrap();

    let mut config = common::config();
    config
        .type_overrides
        .insert("uint256".to_string(), PropertyType::Float);
    let err = worldmirror::MirrorBuilder::new(config, common::source(), messaging_ledger(7))
        .identity(common::identity())
        .opener(opener)
        .build(common::world_address())
        .await
        .unwrap_err();
    assert!(err.is_storage());
    assert!(err.to_string().contains("different schema set"));
}
