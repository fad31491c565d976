//! Tests against a live Redis-compatible store

use tokio_util::sync::CancellationToken;
use vigil::record::LivenessRecord;
use vigil::store::TaskPool;
use vigil::{
    BackendKind, CheckRequest, HealthCheckConfig, HealthChecker, RedisHealthChecker, Verdict,
};

use crate::{live_store_config, skip_if_not_enabled};

#[tokio::test]
async fn test_pool_round_trip() {
    skip_if_not_enabled!();

    let pool = TaskPool::connect(live_store_config(), CancellationToken::new())
        .await
        .unwrap();
    let key = "vigil:test:pool_round_trip";
    let record = LivenessRecord::new("10.0.0.1", 100, 3);

    assert!(pool.set(key, &record).await.is_ok());
    let resp = pool.get(key).await;
    assert!(resp.exists);
    assert_eq!(LivenessRecord::deserialize(&resp.value, resp.compatible).unwrap(), record);

    let resp = pool.delete(key).await;
    assert!(resp.exists);
    assert!(!pool.get(key).await.exists);
}

#[tokio::test]
async fn test_checker_against_live_store() {
    skip_if_not_enabled!();

    let store = live_store_config();
    let mut options = toml::Table::new();
    options.insert("address".into(), store.address.clone().into());
    if !store.password.is_empty() {
        options.insert("password".into(), store.password.clone().into());
    }
    let config = HealthCheckConfig {
        backend: BackendKind::Redis,
        key_prefix: "vigil:test:hb:".into(),
        options,
        ..HealthCheckConfig::default()
    };

    let checker = RedisHealthChecker::connect(&config, CancellationToken::new())
        .await
        .unwrap();
    checker.report("live-A", "10.0.0.1", 100, 1).await.unwrap();
    let resp = checker
        .check(&CheckRequest::new("live-A", 5, true).at(106))
        .await
        .unwrap();
    assert_eq!(resp.verdict(), Verdict::Unhealthy);
    checker.delete("live-A").await.unwrap();
}
