use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use redis_protocol::resp2::types::BytesFrame;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

use crate::config::StoreConfig;

use super::connection::RedisConnection;
use super::StoreError;

/// A single store command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Get { key: String },
    Set { key: String, value: String },
    Del { key: String },
    SAdd { key: String, members: Vec<String> },
    SRem { key: String, members: Vec<String> },
    Ping,
    Auth { username: String, password: String },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Get { .. } => "GET",
            Command::Set { .. } => "SET",
            Command::Del { .. } => "DEL",
            Command::SAdd { .. } => "SADD",
            Command::SRem { .. } => "SREM",
            Command::Ping => "PING",
            Command::Auth { .. } => "AUTH",
        }
    }

    /// Encode as a RESP2 array of bulk strings
    pub fn to_frame(&self) -> BytesFrame {
        let mut parts = vec![BytesFrame::BulkString(Bytes::from_static(
            self.name().as_bytes(),
        ))];
        match self {
            Command::Get { key } | Command::Del { key } => parts.push(bulk(key)),
            Command::Set { key, value } => {
                parts.push(bulk(key));
                parts.push(bulk(value));
            }
            Command::SAdd { key, members } | Command::SRem { key, members } => {
                parts.push(bulk(key));
                parts.extend(members.iter().map(|m| bulk(m)));
            }
            Command::Ping => {}
            Command::Auth { username, password } => {
                if !username.is_empty() {
                    parts.push(bulk(username));
                }
                parts.push(bulk(password));
            }
        }
        BytesFrame::Array(parts)
    }
}

fn bulk(s: &str) -> BytesFrame {
    BytesFrame::BulkString(Bytes::copy_from_slice(s.as_bytes()))
}

/// A decoded reply to one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Simple string (`+OK`, `+PONG`)
    Status(String),
    /// Bulk string, `None` for a nil reply
    Bulk(Option<String>),
    Integer(i64),
    /// Error reply (`-ERR ...`)
    Error(String),
    /// Any frame shape this client never asks for
    Unexpected(String),
}

impl Reply {
    pub fn from_frame(frame: BytesFrame) -> Self {
        match frame {
            BytesFrame::SimpleString(b) => Reply::Status(String::from_utf8_lossy(&b).into_owned()),
            BytesFrame::BulkString(b) => {
                Reply::Bulk(Some(String::from_utf8_lossy(&b).into_owned()))
            }
            BytesFrame::Null => Reply::Bulk(None),
            BytesFrame::Integer(i) => Reply::Integer(i),
            BytesFrame::Error(msg) => Reply::Error(String::from(&*msg)),
            other => Reply::Unexpected(format!("{:?}", other)),
        }
    }
}

/// Executes pipelined command batches against a store
///
/// The task pool only talks to the store through this trait, so tests can
/// substitute an in-memory implementation.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send all commands in one round-trip; replies come back in order
    async fn execute(&self, commands: &[Command]) -> Result<Vec<Reply>, StoreError>;

    /// Lightweight reachability probe
    async fn ping(&self) -> Result<(), StoreError> {
        match self.execute(&[Command::Ping]).await?.pop() {
            Some(Reply::Status(_)) => Ok(()),
            Some(Reply::Error(msg)) => Err(StoreError::Reply(msg)),
            other => Err(StoreError::Protocol(format!(
                "unexpected PING reply: {:?}",
                other
            ))),
        }
    }

    /// Store address, used in errors and logs
    fn address(&self) -> &str;
}

/// Redis transport backed by a bounded set of pipelined connections
///
/// Connections are borrowed for one batch and returned afterwards. At most
/// `pool_size` connections are in use at once.
pub struct RedisTransport {
    config: StoreConfig,
    tls: Option<TlsConnector>,
    idle: Mutex<VecDeque<RedisConnection>>,
    permits: Arc<Semaphore>,
}

impl RedisTransport {
    pub fn new(config: StoreConfig) -> Result<Self, StoreError> {
        let tls = if config.tls {
            Some(tls_connector()?)
        } else {
            None
        };
        let permits = Arc::new(Semaphore::new(config.pool_size));
        Ok(Self {
            config,
            tls,
            idle: Mutex::new(VecDeque::new()),
            permits,
        })
    }

    /// Open `min_idle_conns` connections up front
    ///
    /// Failures are logged only; the prober decides whether the store is dead.
    pub async fn warm_up(&self) {
        let target = self.config.min_idle_conns.min(self.config.pool_size);
        let mut opened = 0;
        for _ in 0..target {
            match RedisConnection::connect(&self.config, self.tls.as_ref()).await {
                Ok(conn) => {
                    self.idle.lock().push_back(conn);
                    opened += 1;
                }
                Err(e) => {
                    warn!(addr = %self.config.address, error = %e, "Failed to open idle connection");
                    break;
                }
            }
        }
        info!(addr = %self.config.address, opened, target, "Store connections warmed up");
    }

    async fn acquire(&self) -> Result<(OwnedSemaphorePermit, RedisConnection), StoreError> {
        let permit = match timeout(
            self.config.pool_timeout(),
            self.permits.clone().acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(StoreError::Shutdown),
            Err(_) => {
                return Err(StoreError::PoolTimeout {
                    addr: self.config.address.clone(),
                    waited: self.config.pool_timeout(),
                })
            }
        };

        loop {
            let Some(conn) = self.idle.lock().pop_front() else {
                break;
            };
            if conn.is_expired(self.config.max_conn_age()) {
                debug!("Connection expired, discarding");
                continue;
            }
            if conn.is_idle_too_long(self.config.idle_timeout()) {
                debug!("Connection idle too long, discarding");
                continue;
            }
            return Ok((permit, conn));
        }

        debug!(addr = %self.config.address, "Opening new store connection");
        let conn = RedisConnection::connect(&self.config, self.tls.as_ref()).await?;
        Ok((permit, conn))
    }

    fn release(&self, conn: RedisConnection) {
        if !conn.is_usable() {
            debug!("Connection not usable, discarding");
            return;
        }
        if conn.is_expired(self.config.max_conn_age()) {
            debug!("Connection expired, discarding");
            return;
        }
        let mut idle = self.idle.lock();
        if idle.len() >= self.config.pool_size {
            return;
        }
        idle.push_back(conn);
    }
}

#[async_trait]
impl Transport for RedisTransport {
    async fn execute(&self, commands: &[Command]) -> Result<Vec<Reply>, StoreError> {
        let (_permit, mut conn) = self.acquire().await?;
        let result = conn
            .pipeline(
                commands,
                self.config.write_timeout(),
                self.config.read_timeout(),
            )
            .await;
        self.release(conn);
        result
    }

    fn address(&self) -> &str {
        &self.config.address
    }
}

/// TLS client config using the Mozilla root store
fn tls_connector() -> Result<TlsConnector, StoreError> {
    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = rustls::ClientConfig::builder_with_provider(
        rustls::crypto::ring::default_provider().into(),
    )
    .with_safe_default_protocol_versions()
    .map_err(|e| StoreError::Tls(format!("protocol version error: {e}")))?
    .with_root_certificates(root_store)
    .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(config)))
}
