use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use redis_protocol::codec::Resp2;
use redis_protocol::resp2::types::BytesFrame;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tokio_util::codec::Framed;
use tracing::{debug, error};

use crate::config::StoreConfig;

use super::transport::{Command, Reply};
use super::StoreError;

/// Byte stream a connection runs over (plain TCP or TLS)
trait Io: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Io for T {}

/// A single pipelined RESP2 connection to the store
pub struct RedisConnection {
    framed: Framed<Box<dyn Io>, Resp2>,
    addr: String,
    created_at: Instant,
    last_used_at: Instant,
    broken: bool,
}

impl RedisConnection {
    /// Connect, optionally over TLS, and authenticate when a password is set
    pub async fn connect(
        config: &StoreConfig,
        tls: Option<&TlsConnector>,
    ) -> Result<Self, StoreError> {
        let addr = config.address.clone();
        debug!(addr = %addr, tls = tls.is_some(), "Connecting to store");

        let stream = match timeout(config.connect_timeout(), TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(StoreError::Connect {
                    addr,
                    reason: e.to_string(),
                })
            }
            Err(_) => return Err(StoreError::Timeout { addr, op: "connect" }),
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!(addr = %addr, error = %e, "Failed to set TCP_NODELAY");
        }

        let io: Box<dyn Io> = match tls {
            Some(connector) => {
                let server_name = ServerName::try_from(config.host().to_string())
                    .map_err(|e| StoreError::Tls(format!("invalid server name: {e}")))?;
                match timeout(config.connect_timeout(), connector.connect(server_name, stream)).await
                {
                    Ok(Ok(tls_stream)) => Box::new(tls_stream),
                    Ok(Err(e)) => {
                        return Err(StoreError::Connect {
                            addr,
                            reason: format!("TLS handshake: {e}"),
                        })
                    }
                    Err(_) => {
                        return Err(StoreError::Timeout {
                            addr,
                            op: "tls handshake",
                        })
                    }
                }
            }
            None => Box::new(stream),
        };

        let now = Instant::now();
        let mut conn = Self {
            framed: Framed::new(io, Resp2::default()),
            addr,
            created_at: now,
            last_used_at: now,
            broken: false,
        };

        if !config.password.is_empty() {
            conn.authenticate(config).await?;
        }

        Ok(conn)
    }

    async fn authenticate(&mut self, config: &StoreConfig) -> Result<(), StoreError> {
        let auth = Command::Auth {
            username: config.username.clone(),
            password: config.password.clone(),
        };
        let replies = self
            .pipeline(&[auth], config.write_timeout(), config.read_timeout())
            .await?;
        match replies.into_iter().next() {
            Some(Reply::Status(_)) => {
                debug!(addr = %self.addr, "Store authentication successful");
                Ok(())
            }
            Some(Reply::Error(msg)) => {
                error!(addr = %self.addr, error = %msg, "Store authentication failed");
                self.broken = true;
                Err(StoreError::Auth(msg))
            }
            other => {
                self.broken = true;
                Err(StoreError::Protocol(format!("unexpected AUTH reply: {:?}", other)))
            }
        }
    }

    /// Write every command, then read one reply per command, in order
    ///
    /// Any transport failure marks the connection broken so the pool drops it.
    pub async fn pipeline(
        &mut self,
        commands: &[Command],
        write_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Vec<Reply>, StoreError> {
        let result = self.exchange(commands, write_timeout, read_timeout).await;
        match result {
            Ok(_) => self.last_used_at = Instant::now(),
            Err(_) => self.broken = true,
        }
        result
    }

    async fn exchange(
        &mut self,
        commands: &[Command],
        write_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Vec<Reply>, StoreError> {
        let framed = &mut self.framed;
        let write = async {
            for command in commands {
                if let Err(e) = framed.feed(command.to_frame()).await {
                    return Err(e);
                }
            }
            SinkExt::<BytesFrame>::flush(framed).await
        };
        match timeout(write_timeout, write).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(StoreError::Io(e.to_string())),
            Err(_) => {
                return Err(StoreError::Timeout {
                    addr: self.addr.clone(),
                    op: "write",
                })
            }
        }

        let mut replies = Vec::with_capacity(commands.len());
        for _ in commands {
            let frame = match timeout(read_timeout, self.framed.next()).await {
                Ok(Some(Ok(frame))) => frame,
                Ok(Some(Err(e))) => return Err(StoreError::Protocol(e.to_string())),
                Ok(None) => return Err(StoreError::Disconnected(self.addr.clone())),
                Err(_) => {
                    return Err(StoreError::Timeout {
                        addr: self.addr.clone(),
                        op: "read",
                    })
                }
            };
            replies.push(Reply::from_frame(frame));
        }
        Ok(replies)
    }

    /// Check if connection has exceeded max age
    pub fn is_expired(&self, max_age: Duration) -> bool {
        self.created_at.elapsed() > max_age
    }

    /// Check if connection has been idle too long
    pub fn is_idle_too_long(&self, max_idle: Duration) -> bool {
        self.last_used_at.elapsed() > max_idle
    }

    /// Check if connection is usable
    pub fn is_usable(&self) -> bool {
        !self.broken
    }
}
