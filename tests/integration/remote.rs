//! Remote-store backend over a fake store

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use vigil::clock::fixed_clock;
use vigil::store::StoreError;
use vigil::{CheckRequest, HealthCheckConfig, HealthChecker, HealthError, Verdict};

use crate::{fake_redis_checker, split_redis_checker, FakeStore, FAKE_ADDR};

#[tokio::test]
async fn test_registers_local_host() {
    let store = Arc::new(FakeStore::default());
    let _checker = fake_redis_checker(store.clone(), CancellationToken::new()).await;

    let config = HealthCheckConfig::default();
    assert!(store.members(&config.servers_key).contains(&config.local_host));
}

#[tokio::test]
async fn test_report_stores_current_format() {
    let store = Arc::new(FakeStore::default());
    let checker = fake_redis_checker(store.clone(), CancellationToken::new()).await;

    checker.report("A", "10.0.0.1", 100, 1).await.unwrap();
    assert_eq!(store.raw("vigil:hb:A").as_deref(), Some("100:10.0.0.1|1"));

    checker.report("A", "10.0.0.1", 105, 2).await.unwrap();
    let result = checker.query("A").await.unwrap();
    assert!(result.exists);
    assert_eq!(result.last_heartbeat_time_sec, 105);
    assert_eq!(result.report_count, 2);
}

#[tokio::test]
async fn test_heartbeat_expiry() {
    let store = Arc::new(FakeStore::default());
    let checker = fake_redis_checker(store, CancellationToken::new()).await;
    checker.report("A", "10.0.0.1", 100, 1).await.unwrap();

    let resp = checker
        .check(&CheckRequest::new("A", 5, true).at(104))
        .await
        .unwrap();
    assert!(resp.healthy);
    assert_eq!(resp.verdict(), Verdict::Unchanged);

    let resp = checker
        .check(&CheckRequest::new("A", 5, true).at(106))
        .await
        .unwrap();
    assert_eq!(resp.verdict(), Verdict::Unhealthy);
}

#[tokio::test]
async fn test_suspend_withholds_verdict() {
    let store = Arc::new(FakeStore::default());
    let checker = fake_redis_checker(store, CancellationToken::new())
        .await
        .with_clock(fixed_clock(200));
    checker.report("B", "10.0.0.1", 150, 1).await.unwrap();
    checker.suspend();

    let resp = checker
        .check(&CheckRequest::new("B", 10, true).at(201))
        .await
        .unwrap();
    assert_eq!(resp.verdict(), Verdict::Unchanged);
    assert_eq!(checker.suspend_time_sec(), 200);
}

#[tokio::test]
async fn test_time_reversal_never_downgrades() {
    let store = Arc::new(FakeStore::default());
    let checker = fake_redis_checker(store, CancellationToken::new()).await;
    checker.report("A", "10.0.0.1", 500, 1).await.unwrap();

    for believed in [true, false] {
        let resp = checker
            .check(&CheckRequest::new("A", 5, believed).at(400))
            .await
            .unwrap();
        assert_eq!(resp.verdict(), Verdict::Unchanged);
    }
}

#[tokio::test]
async fn test_malformed_record_fails_check_and_batch() {
    let store = Arc::new(FakeStore::default());
    let checker = fake_redis_checker(store.clone(), CancellationToken::new()).await;
    checker.report("good", "10.0.0.1", 100, 1).await.unwrap();
    store.put_raw("vigil:hb:bad", "not-a-timestamp:host|1");

    let err = checker
        .check(&CheckRequest::new("bad", 5, true).at(101))
        .await
        .unwrap_err();
    assert!(matches!(err, HealthError::Record { ref instance_id, .. } if instance_id == "bad"));

    let ids = vec!["good".to_string(), "bad".to_string()];
    assert!(checker.batch_query(&ids).await.is_err());

    let ids = vec!["good".to_string(), "missing".to_string()];
    let results = checker.batch_query(&ids).await.unwrap();
    assert!(results[0].exists);
    assert!(!results[1].exists);
}

#[tokio::test]
async fn test_delete_removes_record() {
    let store = Arc::new(FakeStore::default());
    let checker = fake_redis_checker(store.clone(), CancellationToken::new()).await;
    checker.report("A", "10.0.0.1", 100, 1).await.unwrap();
    checker.delete("A").await.unwrap();

    assert!(store.raw("vigil:hb:A").is_none());
    assert!(!checker.query("A").await.unwrap().exists);
}

#[tokio::test(start_paused = true)]
async fn test_dead_store_fails_without_round_trip() {
    let store = Arc::new(FakeStore::default());
    let checker = fake_redis_checker(store.clone(), CancellationToken::new()).await;
    store.set_ping_fails(true);

    tokio::time::sleep(Duration::from_secs(3)).await;
    let liveness = checker.store_liveness().unwrap();
    assert!(liveness.is_dead());

    let before = store.executes();
    let err = checker.report("A", "10.0.0.1", 100, 1).await.unwrap_err();
    assert!(matches!(err, HealthError::Store(StoreError::Dead { .. })));
    assert!(err.to_string().contains(FAKE_ADDR));

    let err = checker
        .check(&CheckRequest::new("A", 5, true).at(100))
        .await
        .unwrap_err();
    assert!(err.to_string().contains(FAKE_ADDR));
    assert_eq!(store.executes(), before);
}

#[tokio::test(start_paused = true)]
async fn test_dead_write_store_withholds_verdict() {
    let write_store = Arc::new(FakeStore::default());
    let read_store = Arc::new(FakeStore::default());
    read_store.put_raw("vigil:hb:A", "100:10.0.0.1|1");
    let checker =
        split_redis_checker(write_store.clone(), read_store, CancellationToken::new()).await;

    write_store.set_ping_fails(true);
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(checker.store_liveness().unwrap().is_dead());

    // heartbeats cannot land, so the stale record must not be judged
    let err = checker.report("A", "10.0.0.1", 200, 2).await.unwrap_err();
    assert!(matches!(err, HealthError::Store(StoreError::Dead { .. })));

    for believed in [true, false] {
        let resp = checker
            .check(&CheckRequest::new("A", 5, believed).at(200))
            .await
            .unwrap();
        assert_eq!(resp.verdict(), Verdict::Unchanged);
        assert_eq!(resp.last_heartbeat_time_sec, 100);
    }
}

#[tokio::test(start_paused = true)]
async fn test_recover_window_withholds_verdict() {
    let store = Arc::new(FakeStore::default());
    let checker = fake_redis_checker(store.clone(), CancellationToken::new()).await;
    checker.report("A", "10.0.0.1", 100, 1).await.unwrap();

    store.set_ping_fails(true);
    tokio::time::sleep(Duration::from_secs(3)).await;
    store.set_ping_fails(false);
    tokio::time::sleep(Duration::from_secs(2)).await;

    let liveness = checker.store_liveness().unwrap();
    assert!(!liveness.is_dead());
    let recovered_at = liveness.recover_time_sec();
    assert!(recovered_at > 0);

    // heartbeat is long stale, but the store only just came back
    let resp = checker
        .check(&CheckRequest::new("A", 30, true).at(recovered_at + 1))
        .await
        .unwrap();
    assert_eq!(resp.verdict(), Verdict::Unchanged);

    let resp = checker
        .check(&CheckRequest::new("A", 30, true).at(recovered_at + 30))
        .await
        .unwrap();
    assert_eq!(resp.verdict(), Verdict::Unhealthy);
}

#[tokio::test]
async fn test_shutdown_surfaces_as_error() {
    let store = Arc::new(FakeStore::default());
    let shutdown = CancellationToken::new();
    let checker = fake_redis_checker(store, shutdown.clone()).await;
    shutdown.cancel();

    let err = checker.query("A").await.unwrap_err();
    assert!(matches!(err, HealthError::Store(StoreError::Shutdown)));
}
