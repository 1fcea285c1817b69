//! The file-backed quota ledger under concurrent access. The flock around
//! each read-modify-write is what keeps parallel runs from double-spending.

use std::sync::Arc;

use zhipin_pilot::quota::{FileQuotaStore, QuotaStore};

fn temp_store(limit: u32) -> FileQuotaStore {
    let dir = std::env::temp_dir().join(format!("zhipin-quota-it-{}", uuid::Uuid::new_v4()));
    FileQuotaStore::new(dir, limit)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_consumes_are_all_counted() {
    let store = Arc::new(temp_store(100));

    let mut tasks = Vec::new();
    for _ in 0..20 {
        let store = Arc::clone(&store);
        tasks.push(tokio::spawn(async move {
            store.consume("shared-user").await.unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(store.used_today("shared-user").await.unwrap(), 20);
}

#[tokio::test]
async fn check_flips_exactly_at_the_limit() {
    let store = temp_store(3);
    for i in 0..3 {
        assert!(
            store.check("edge").await.unwrap(),
            "check must pass before consume #{}",
            i + 1
        );
        store.consume("edge").await.unwrap();
    }
    assert!(!store.check("edge").await.unwrap());
}

#[tokio::test]
async fn seeding_a_restarted_controller_from_the_ledger() {
    use zhipin_pilot::config::PilotConfig;
    use zhipin_pilot::RateController;

    let store = temp_store(10);
    for _ in 0..10 {
        store.consume("restart-user").await.unwrap();
    }

    // A fresh process seeds its daily count from the ledger and is capped
    // immediately instead of getting a brand-new budget.
    let mut cfg = PilotConfig::default();
    cfg.max_daily_deliveries = 10;
    let mut rc = RateController::from_config(&cfg);
    rc.seed_daily_count(store.used_today("restart-user").await.unwrap());
    assert!(rc.can_deliver(1.0).is_err());
}
