//! PostgreSQL存储集成测试
//!
//! 需要设置 `TASKHUB_TEST_DATABASE_URL`，未设置时测试直接跳过。

use std::time::Duration;

use serde_json::json;
use taskhub_core::config::DatabaseConfig;
use taskhub_domain::{
    BacklogStore, ClaimOutcome, DedupLog, RecordOutcome, StagePolicy, TaskHubError, TaskStatus,
};
use taskhub_infrastructure::DatabaseManager;

async fn setup() -> Option<DatabaseManager> {
    let url = std::env::var("TASKHUB_TEST_DATABASE_URL").ok()?;
    let config = DatabaseConfig {
        url,
        ..DatabaseConfig::default()
    };
    let manager = DatabaseManager::new(&config).await.unwrap();
    manager.migrate().await.unwrap();
    Some(manager)
}

fn unique_code(prefix: &str) -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("{prefix}_{}_{nanos}", std::process::id())
}

async fn insert_task(manager: &DatabaseManager, code: &str) -> i64 {
    sqlx::query_scalar(
        "INSERT INTO task_record (task_code, service, method, params) \
         VALUES ($1, 'stock', 'allocate', $2) RETURNING id",
    )
    .bind(code)
    .bind(json!({"sku": "A-1"}))
    .fetch_one(manager.pool())
    .await
    .unwrap()
}

#[tokio::test]
async fn test_stage_claim_and_complete() {
    let Some(manager) = setup().await else {
        return;
    };
    let store = manager.backlog_store();
    let code = unique_code("stage");

    sqlx::query(
        "INSERT INTO task_group (process_name, task_code, level, max_process_num) \
         VALUES ($1, $1, 5, 3)",
    )
    .bind(&code)
    .execute(manager.pool())
    .await
    .unwrap();

    let first = insert_task(&manager, &code).await;
    let second = insert_task(&manager, &code).await;

    let queue = store.get_queue_by_code(&code).await.unwrap().unwrap();
    assert_eq!(queue.max_process_num, 3);
    assert_eq!(store.count_pending(&code).await.unwrap(), 2);

    let staged = store
        .stage_pending(&code, 1, &StagePolicy::pending_only())
        .await
        .unwrap();
    assert_eq!(staged, vec![first]);
    assert_eq!(store.count_pending(&code).await.unwrap(), 1);

    assert_eq!(store.claim(first).await.unwrap(), ClaimOutcome::Claimed);
    assert_eq!(
        store.claim(first).await.unwrap(),
        ClaimOutcome::NotClaimable(TaskStatus::Running)
    );
    assert_eq!(
        store.claim(second).await.unwrap(),
        ClaimOutcome::NotClaimable(TaskStatus::Pending)
    );

    assert_eq!(
        store.mark_done(first, 1).await.unwrap(),
        RecordOutcome::Recorded
    );
    // 重复写入不再覆盖
    assert_eq!(
        store.mark_failed(first, 1, "迟到的结果").await.unwrap(),
        RecordOutcome::OwnershipLost
    );
    let record = store.get_task(first).await.unwrap().unwrap();
    assert_eq!(record.status, TaskStatus::Done);
    assert!(record.complete_time.is_some());
    assert_eq!(record.handler_key(), "stock.allocate");
}

#[tokio::test]
async fn test_failed_rows_wait_for_backoff() {
    let Some(manager) = setup().await else {
        return;
    };
    let store = manager.backlog_store();
    let code = unique_code("retry");
    let id = insert_task(&manager, &code).await;

    let policy = StagePolicy {
        requeue_failed: true,
        max_retries: 3,
        base_delay: Duration::from_secs(3600),
    };
    store.stage_pending(&code, 10, &policy).await.unwrap();
    store.claim(id).await.unwrap();
    store.mark_failed(id, 1, "库存不足, 重试次数1").await.unwrap();

    assert!(store.stage_pending(&code, 10, &policy).await.unwrap().is_empty());

    sqlx::query("UPDATE task_record SET update_time = NOW() - INTERVAL '2 hours' WHERE id = $1")
        .bind(id)
        .execute(manager.pool())
        .await
        .unwrap();
    assert_eq!(store.stage_pending(&code, 10, &policy).await.unwrap(), vec![id]);
}

#[tokio::test]
async fn test_dedup_log_reuses_row() {
    let Some(manager) = setup().await else {
        return;
    };
    let log = manager.dedup_log();
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let hash = format!("{nanos:064x}");

    let created = log.create(&hash, 7).await.unwrap();
    let again = log.create(&hash, 7).await.unwrap();
    assert_eq!(created.id, again.id);

    log.mark_failed(created.id, 1, "超时").await.unwrap();
    let found = log.find_by_hash(&hash).await.unwrap().unwrap();
    assert_eq!(found.try_num, 1);
    assert_eq!(found.status, TaskStatus::Failed);

    assert!(matches!(
        log.mark_done(-1, 1).await,
        Err(TaskHubError::DedupEntryNotFound { id: -1 })
    ));
}
