use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::metrics::metrics;
use crate::record::LivenessRecord;

use super::liveness::{run_prober, StoreLiveness};
use super::retry::with_retries;
use super::task::{Resp, Task, TaskKind};
use super::transport::{RedisTransport, Transport};
use super::StoreError;

/// Queue depth of each partition
const PARTITION_QUEUE_CAPACITY: usize = 1024;

/// Pause between write attempts
const WRITE_RETRY_BACKOFF: Duration = Duration::from_millis(10);

/// Write round-trips slower than this are logged
const SLOW_OP_THRESHOLD: Duration = Duration::from_secs(1);

/// Batched, pipelined client for one remote store
///
/// Operations are spread round-robin over `concurrency` partitions. Each
/// partition has one worker that flushes its queue as a single pipelined
/// round-trip once `min_batch_count` tasks are queued or `wait_time` has
/// passed. Ordering holds only within a partition.
pub struct TaskPool {
    config: StoreConfig,
    transport: Arc<dyn Transport>,
    partitions: Vec<mpsc::Sender<Task>>,
    next: AtomicUsize,
    liveness: Arc<StoreLiveness>,
    shutdown: CancellationToken,
}

impl TaskPool {
    /// Connect to the store described by `config`
    ///
    /// The pool stops when `shutdown` is cancelled or the pool is dropped.
    pub async fn connect(
        config: StoreConfig,
        shutdown: CancellationToken,
    ) -> Result<Self, StoreError> {
        config
            .validate()
            .map_err(|e| StoreError::Config(e.to_string()))?;
        let transport = RedisTransport::new(config.clone())?;
        transport.warm_up().await;
        Self::with_transport(config, Arc::new(transport), shutdown)
    }

    /// Build a pool over an existing transport
    ///
    /// Must be called from within a Tokio runtime.
    pub fn with_transport(
        config: StoreConfig,
        transport: Arc<dyn Transport>,
        shutdown: CancellationToken,
    ) -> Result<Self, StoreError> {
        config
            .validate()
            .map_err(|e| StoreError::Config(e.to_string()))?;

        let shutdown = shutdown.child_token();
        let liveness = Arc::new(StoreLiveness::new());

        let mut partitions = Vec::with_capacity(config.concurrency);
        for index in 0..config.concurrency {
            let (tx, rx) = mpsc::channel(PARTITION_QUEUE_CAPACITY);
            partitions.push(tx);
            let worker = PartitionWorker {
                index,
                transport: transport.clone(),
                min_batch_count: config.min_batch_count,
                wait_time: config.wait_time(),
                compatible: config.compatible,
                shutdown: shutdown.clone(),
            };
            tokio::spawn(worker.run(rx));
        }

        tokio::spawn(run_prober(
            transport.clone(),
            liveness.clone(),
            shutdown.clone(),
        ));

        info!(
            addr = %config.address,
            concurrency = config.concurrency,
            min_batch_count = config.min_batch_count,
            wait_time_ms = config.wait_time_ms,
            "Task pool started"
        );

        Ok(Self {
            config,
            transport,
            partitions,
            next: AtomicUsize::new(0),
            liveness,
            shutdown,
        })
    }

    /// Read a key; `exists` is false when the key is absent
    pub async fn get(&self, key: &str) -> Resp {
        self.submit(TaskKind::Get, key.to_string(), String::new(), Vec::new())
            .await
    }

    /// Store a serialized liveness record under `key`
    pub async fn set(&self, key: &str, record: &LivenessRecord) -> Resp {
        let value = record.serialize(self.config.compatible);
        self.write(TaskKind::Set, key, value, Vec::new()).await
    }

    pub async fn delete(&self, key: &str) -> Resp {
        self.write(TaskKind::Delete, key, String::new(), Vec::new())
            .await
    }

    pub async fn sadd(&self, key: &str, members: &[String]) -> Resp {
        self.write(TaskKind::SetAdd, key, String::new(), members.to_vec())
            .await
    }

    pub async fn srem(&self, key: &str, members: &[String]) -> Resp {
        self.write(TaskKind::SetRemove, key, String::new(), members.to_vec())
            .await
    }

    /// Shared liveness state, updated by this pool's prober
    pub fn liveness(&self) -> Arc<StoreLiveness> {
        self.liveness.clone()
    }

    pub fn is_dead(&self) -> bool {
        self.liveness.is_dead()
    }

    pub fn recover_time_sec(&self) -> i64 {
        self.liveness.recover_time_sec()
    }

    pub fn address(&self) -> &str {
        self.transport.address()
    }

    /// Stop the workers and the prober of this pool only
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    async fn write(&self, kind: TaskKind, key: &str, value: String, members: Vec<String>) -> Resp {
        let pool = self;
        with_retries(self.config.max_retry + 1, WRITE_RETRY_BACKOFF, move || {
            pool.submit(kind, key.to_string(), value.clone(), members.clone())
        })
        .await
    }

    /// Queue one task and wait for its reply or for shutdown
    async fn submit(&self, kind: TaskKind, key: String, value: String, members: Vec<String>) -> Resp {
        // The prober stops on shutdown, so the dead flag is stale after it
        if self.shutdown.is_cancelled() {
            return Resp::error(StoreError::Shutdown);
        }
        if self.liveness.is_dead() {
            return Resp::error(StoreError::Dead {
                addr: self.address().to_string(),
            });
        }

        let started = Instant::now();
        let (task, reply) = Task::new(kind, key, value, members);
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.partitions.len();

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Resp::error(StoreError::Shutdown),
            sent = self.partitions[index].send(task) => {
                if sent.is_err() {
                    return Resp::error(StoreError::Shutdown);
                }
            }
        }

        let resp = tokio::select! {
            biased;
            resp = reply => resp.unwrap_or_else(|_| Resp::error(StoreError::Shutdown)),
            _ = self.shutdown.cancelled() => Resp::error(StoreError::Shutdown),
        };

        let elapsed = started.elapsed();
        if kind.is_write() && elapsed > SLOW_OP_THRESHOLD {
            warn!(
                addr = %self.address(),
                kind = kind.as_str(),
                partition = index,
                elapsed_ms = elapsed.as_millis() as u64,
                "Slow store operation"
            );
            metrics().record_slow_op(kind.as_str());
        }
        resp
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Worker owning one partition queue
struct PartitionWorker {
    index: usize,
    transport: Arc<dyn Transport>,
    min_batch_count: usize,
    wait_time: Duration,
    compatible: bool,
    shutdown: CancellationToken,
}

impl PartitionWorker {
    async fn run(self, mut rx: mpsc::Receiver<Task>) {
        let mut batch: Vec<Task> = Vec::with_capacity(self.min_batch_count);
        let mut ticker =
            tokio::time::interval_at(tokio::time::Instant::now() + self.wait_time, self.wait_time);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                task = rx.recv() => {
                    let Some(task) = task else { break };
                    batch.push(task);
                    if batch.len() >= self.min_batch_count {
                        self.flush(&mut batch).await;
                        ticker.reset();
                    }
                }
                _ = ticker.tick() => {
                    if !batch.is_empty() {
                        self.flush(&mut batch).await;
                    }
                }
            }
        }

        // Abandon whatever was queued but never flushed
        rx.close();
        let mut abandoned = batch.len();
        for task in batch.drain(..) {
            task.fail(StoreError::Shutdown);
        }
        while let Ok(task) = rx.try_recv() {
            task.fail(StoreError::Shutdown);
            abandoned += 1;
        }
        debug!(
            addr = %self.transport.address(),
            partition = self.index,
            abandoned,
            "Partition worker stopped"
        );
    }

    /// Send the batch as one pipeline and hand each reply to its task
    async fn flush(&self, batch: &mut Vec<Task>) {
        let tasks: Vec<Task> = std::mem::take(batch);
        let commands: Vec<_> = tasks.iter().map(Task::command).collect();
        metrics().observe_batch_size(self.transport.address(), tasks.len());

        match self.transport.execute(&commands).await {
            Ok(replies) if replies.len() == tasks.len() => {
                for (task, reply) in tasks.into_iter().zip(replies) {
                    task.resolve(reply, self.compatible);
                }
            }
            Ok(replies) => {
                warn!(
                    addr = %self.transport.address(),
                    partition = self.index,
                    expected = tasks.len(),
                    received = replies.len(),
                    "Reply count does not match batch size"
                );
                let err = StoreError::Protocol(format!(
                    "expected {} replies, got {}",
                    tasks.len(),
                    replies.len()
                ));
                for task in tasks {
                    task.fail(err.clone());
                }
            }
            Err(e) => {
                debug!(
                    addr = %self.transport.address(),
                    partition = self.index,
                    batch = tasks.len(),
                    error = %e,
                    "Pipeline failed"
                );
                for task in tasks {
                    task.fail(e.clone());
                }
            }
        }
    }
}
