//! Integration test entry point
//!
//! The memory and remote-store backends run against an in-process fake
//! store. The live tests need a real Redis-compatible server.
//!
//! Run with: VIGIL_RUN_INTEGRATION_TESTS=1 cargo test --test integration
//!
//! Environment variables:
//! - VIGIL_RUN_INTEGRATION_TESTS: Set to "1" to enable live store tests
//! - VIGIL_TEST_REDIS_ADDR: Store address (default: 127.0.0.1:6379)
//! - VIGIL_TEST_REDIS_PASS: Store password (default: empty)

mod live;
mod memory;
mod remote;

use std::collections::{HashMap, HashSet};
use std::env;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use vigil::store::{Command, Reply, StoreError, TaskPool, Transport};
use vigil::{HealthCheckConfig, RedisHealthChecker, StoreConfig};

pub const FAKE_ADDR: &str = "10.20.30.40:6379";

/// Check if live store tests should run
pub fn should_run_integration_tests() -> bool {
    env::var("VIGIL_RUN_INTEGRATION_TESTS")
        .map(|v| v == "1")
        .unwrap_or(false)
}

/// Skip test if live store tests are not enabled
#[macro_export]
macro_rules! skip_if_not_enabled {
    () => {
        if !crate::should_run_integration_tests() {
            eprintln!("Skipping integration test (set VIGIL_RUN_INTEGRATION_TESTS=1 to run)");
            return;
        }
    };
}

/// Store options for the live tests
pub fn live_store_config() -> StoreConfig {
    StoreConfig {
        password: env::var("VIGIL_TEST_REDIS_PASS").unwrap_or_default(),
        ..StoreConfig::with_address(
            env::var("VIGIL_TEST_REDIS_ADDR").unwrap_or_else(|_| "127.0.0.1:6379".to_string()),
        )
    }
}

/// In-process store speaking the command set the pool issues
#[derive(Default)]
pub struct FakeStore {
    pub executes: AtomicUsize,
    pub ping_fails: AtomicBool,
    pub strings: Mutex<HashMap<String, String>>,
    pub sets: Mutex<HashMap<String, HashSet<String>>>,
}

impl FakeStore {
    pub fn executes(&self) -> usize {
        self.executes.load(Ordering::SeqCst)
    }

    pub fn set_ping_fails(&self, fails: bool) {
        self.ping_fails.store(fails, Ordering::SeqCst);
    }

    /// Write a raw value, bypassing the codec
    pub fn put_raw(&self, key: &str, value: &str) {
        self.strings.lock().insert(key.to_string(), value.to_string());
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.strings.lock().get(key).cloned()
    }

    pub fn members(&self, key: &str) -> HashSet<String> {
        self.sets.lock().get(key).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl Transport for FakeStore {
    async fn execute(&self, commands: &[Command]) -> Result<Vec<Reply>, StoreError> {
        self.executes.fetch_add(1, Ordering::SeqCst);
        let mut strings = self.strings.lock();
        let mut sets = self.sets.lock();
        Ok(commands
            .iter()
            .map(|command| match command {
                Command::Get { key } => Reply::Bulk(strings.get(key).cloned()),
                Command::Set { key, value } => {
                    strings.insert(key.clone(), value.clone());
                    Reply::Status("OK".into())
                }
                Command::Del { key } => Reply::Integer(strings.remove(key).is_some() as i64),
                Command::SAdd { key, members } => {
                    let set = sets.entry(key.clone()).or_default();
                    let added = members.iter().filter(|m| set.insert((*m).clone())).count();
                    Reply::Integer(added as i64)
                }
                Command::SRem { key, members } => {
                    let set = sets.entry(key.clone()).or_default();
                    let removed = members.iter().filter(|m| set.remove(*m)).count();
                    Reply::Integer(removed as i64)
                }
                Command::Ping | Command::Auth { .. } => Reply::Status("OK".into()),
            })
            .collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        if self.ping_fails.load(Ordering::SeqCst) {
            Err(StoreError::Io("probe refused".into()))
        } else {
            Ok(())
        }
    }

    fn address(&self) -> &str {
        FAKE_ADDR
    }
}

/// Pool options that flush every task immediately
pub fn fake_store_config() -> StoreConfig {
    StoreConfig {
        concurrency: 4,
        min_batch_count: 1,
        wait_time_ms: 10,
        ..StoreConfig::with_address(FAKE_ADDR)
    }
}

/// Remote-store checker whose pools share one fake store
pub async fn fake_redis_checker(
    store: Arc<FakeStore>,
    shutdown: CancellationToken,
) -> RedisHealthChecker {
    split_redis_checker(store.clone(), store, shutdown).await
}

/// Remote-store checker with its write and read pools on separate fake stores
pub async fn split_redis_checker(
    write_store: Arc<FakeStore>,
    read_store: Arc<FakeStore>,
    shutdown: CancellationToken,
) -> RedisHealthChecker {
    let config = HealthCheckConfig::default();
    let write_pool =
        TaskPool::with_transport(fake_store_config(), write_store, shutdown.clone()).unwrap();
    let read_pool = TaskPool::with_transport(fake_store_config(), read_store, shutdown).unwrap();
    RedisHealthChecker::with_pools(write_pool, read_pool, &config)
        .await
        .unwrap()
}
