//! Memory backend through the public checker contract

use std::sync::Arc;

use vigil::clock::fixed_clock;
use vigil::{
    new_health_checker, CheckRequest, HealthCheckConfig, HealthChecker, MemoryHealthChecker,
    Verdict,
};

#[tokio::test]
async fn test_default_config_builds_memory_checker() {
    let checker = new_health_checker(&HealthCheckConfig::default(), Default::default())
        .await
        .unwrap();
    assert_eq!(checker.name(), "memory");
    assert!(checker.store_liveness().is_none());
}

#[tokio::test]
async fn test_sweep_reports_only_transitions() {
    let checker: Arc<dyn HealthChecker> = Arc::new(MemoryHealthChecker::new());
    checker.report("A", "10.0.0.1", 100, 1).await.unwrap();

    // believed healthy and still fresh
    let resp = checker
        .check(&CheckRequest::new("A", 5, true).at(104))
        .await
        .unwrap();
    assert_eq!(resp.verdict(), Verdict::Unchanged);
    assert!(resp.healthy);

    // expiry boundary is inclusive
    let resp = checker
        .check(&CheckRequest::new("A", 5, true).at(105))
        .await
        .unwrap();
    assert_eq!(resp.verdict(), Verdict::Unhealthy);

    // caller persisted the change; the next sweep is a no-op
    let resp = checker
        .check(&CheckRequest::new("A", 5, false).at(106))
        .await
        .unwrap();
    assert_eq!(resp.verdict(), Verdict::Unchanged);
    assert!(!resp.healthy);

    // a fresh heartbeat brings it back
    checker.report("A", "10.0.0.1", 107, 2).await.unwrap();
    let resp = checker
        .check(&CheckRequest::new("A", 5, false).at(108))
        .await
        .unwrap();
    assert_eq!(resp.verdict(), Verdict::Healthy);
}

#[tokio::test]
async fn test_repeated_check_is_idempotent() {
    let checker = MemoryHealthChecker::new();
    checker.report("A", "10.0.0.1", 100, 1).await.unwrap();

    let request = CheckRequest::new("A", 5, true).at(103);
    let first = checker.check(&request).await.unwrap();
    let second = checker.check(&request).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(second.verdict(), Verdict::Unchanged);
}

#[tokio::test]
async fn test_suspend_covers_whole_expiry_cycle() {
    let checker = MemoryHealthChecker::new().with_clock(fixed_clock(200));
    checker.report("B", "10.0.0.1", 150, 1).await.unwrap();
    checker.suspend();

    for now in 200..210 {
        let resp = checker
            .check(&CheckRequest::new("B", 10, true).at(now))
            .await
            .unwrap();
        assert_eq!(resp.verdict(), Verdict::Unchanged, "now={now}");
    }

    let resp = checker
        .check(&CheckRequest::new("B", 10, true).at(210))
        .await
        .unwrap();
    assert_eq!(resp.verdict(), Verdict::Unhealthy);
}

#[tokio::test]
async fn test_concurrent_reports() {
    let checker = Arc::new(MemoryHealthChecker::new());
    let mut handles = Vec::new();
    for i in 0..16i64 {
        let checker = checker.clone();
        handles.push(tokio::spawn(async move {
            let id = format!("instance-{}", i % 4);
            checker.report(&id, "10.0.0.1", 1000 + i, i).await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(checker.len(), 4);

    let ids: Vec<String> = (0..4).map(|i| format!("instance-{i}")).collect();
    let results = checker.batch_query(&ids).await.unwrap();
    assert!(results.iter().all(|r| r.exists));
}
