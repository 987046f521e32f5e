use lifecycle_core::models::{CrawlJob, ProductData};
use lifecycle_db::{Database, DatabaseConfig, ProductRepository};

use crate::integration::common::{insert_product, setup_test_db, start_postgres};

fn data(status: Option<&str>, replacement: Option<&str>) -> ProductData {
    ProductData {
        description: "SIMATIC S7-1500 CPU".into(),
        status: status.map(Into::into),
        replacement_code: replacement.map(Into::into),
        raw_html: "<html>cpu</html>".into(),
    }
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn lists_one_target_per_code() {
    let (pool, _container) = setup_test_db().await;
    let repo = ProductRepository::new(pool.clone());

    let first = insert_product(&pool, "PROD-002", None).await;
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    insert_product(&pool, "PROD-002", None).await;
    insert_product(&pool, "PROD-001", None).await;

    let targets = repo.list_targets().await.unwrap();
    let codes: Vec<_> = targets.iter().map(|t| t.code.as_str()).collect();
    assert_eq!(codes, vec!["PROD-001", "PROD-002"]);
    assert_eq!(targets[1].id, first);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn save_reports_change_and_updates_every_row_for_code() {
    let (pool, _container) = setup_test_db().await;
    let repo = ProductRepository::new(pool.clone());

    let id = insert_product(&pool, "PROD-002", Some("Active Product")).await;
    insert_product(&pool, "PROD-002", Some("Active Product")).await;
    let job = CrawlJob::new(id, "PROD-002", "https://example.com/pd/PROD-002");

    let change = repo
        .save_observation(&job, &data(Some("Prod. Discont."), Some("PROD-003")))
        .await
        .unwrap()
        .expect("status changed");
    assert_eq!(change.old_status.as_deref(), Some("Active Product"));
    assert_eq!(change.new_status, "Prod. Discont.");

    let rows: Vec<(Option<String>, Option<String>)> = sqlx::query_as(
        "SELECT lifecycle_status, replacement_code FROM products WHERE code = 'PROD-002'",
    )
    .fetch_all(&pool)
    .await
    .unwrap();
    assert_eq!(rows.len(), 2);
    for (status, replacement) in rows {
        assert_eq!(status.as_deref(), Some("Prod. Discont."));
        assert_eq!(replacement.as_deref(), Some("PROD-003"));
    }
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn unchanged_or_missing_status_reports_nothing() {
    let (pool, _container) = setup_test_db().await;
    let repo = ProductRepository::new(pool.clone());

    let id = insert_product(&pool, "PROD-001", Some("Active Product")).await;
    let job = CrawlJob::new(id, "PROD-001", "https://example.com/pd/PROD-001");

    assert!(
        repo.save_observation(&job, &data(Some("Active Product"), None))
            .await
            .unwrap()
            .is_none()
    );
    assert!(
        repo.save_observation(&job, &data(None, None))
            .await
            .unwrap()
            .is_none()
    );

    // A blank observation must not wipe the stored status.
    let (status,): (Option<String>,) =
        sqlx::query_as("SELECT lifecycle_status FROM products WHERE id = $1")
            .bind(id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(status.as_deref(), Some("Active Product"));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn first_status_counts_as_change() {
    let (pool, _container) = setup_test_db().await;
    let repo = ProductRepository::new(pool.clone());

    let id = insert_product(&pool, "PROD-004", None).await;
    let job = CrawlJob::new(id, "PROD-004", "https://example.com/pd/PROD-004");

    let change = repo
        .save_observation(&job, &data(Some("Active Product"), None))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(change.old_status, None);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn history_is_newest_first_and_limited() {
    let (pool, _container) = setup_test_db().await;
    let repo = ProductRepository::new(pool.clone());

    let id = insert_product(&pool, "PROD-005", None).await;
    let job = CrawlJob::new(id, "PROD-005", "https://example.com/pd/PROD-005");

    for status in ["Active Product", "Phase Out Announce", "Prod. Cancellation"] {
        repo.save_observation(&job, &data(Some(status), None))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    let history = repo.snapshot_history("PROD-005", 2).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].status.as_deref(), Some("Prod. Cancellation"));
    assert_eq!(history[1].status.as_deref(), Some("Phase Out Announce"));
    assert_eq!(history[0].product_code, "PROD-005");
    assert_eq!(history[0].content_hash.len(), 64);

    assert!(repo.snapshot_history("UNKNOWN", 10).await.unwrap().is_empty());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn ensure_target_registers_once() {
    let (pool, _container) = setup_test_db().await;
    let repo = ProductRepository::new(pool);

    let created = repo
        .ensure_target("PROD-006", "https://example.com/pd/PROD-006")
        .await
        .unwrap();
    let again = repo
        .ensure_target("PROD-006", "https://example.com/other")
        .await
        .unwrap();

    assert_eq!(created, again);
    assert_eq!(repo.list_targets().await.unwrap().len(), 1);
    repo.health_check().await.unwrap();
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn open_migrates_a_fresh_database() {
    let (url, _container) = start_postgres().await;
    let config = DatabaseConfig {
        url,
        max_connections: 2,
    };

    let mut attempts = 0;
    let db = loop {
        match Database::open(&config).await {
            Ok(db) => break db,
            Err(_) if attempts < 30 => {
                attempts += 1;
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
            Err(e) => panic!("database never became ready: {e}"),
        }
    };
    let repo = db.product_repo();
    assert!(repo.list_targets().await.unwrap().is_empty());
    repo.ensure_target("PROD-007", "https://example.com/pd/PROD-007")
        .await
        .unwrap();

    // Reopening finds every migration already applied.
    let reopened = Database::open(&config).await.unwrap();
    assert_eq!(reopened.product_repo().list_targets().await.unwrap().len(), 1);
}
