use tokio::sync::oneshot;
use tracing::error;

use crate::metrics::metrics;

use super::transport::{Command, Reply};
use super::StoreError;

/// Point operation kinds accepted by the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Get,
    Set,
    Delete,
    SetAdd,
    SetRemove,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Get => "get",
            TaskKind::Set => "set",
            TaskKind::Delete => "delete",
            TaskKind::SetAdd => "sadd",
            TaskKind::SetRemove => "srem",
        }
    }

    /// Writes go through the retry wrapper
    pub fn is_write(&self) -> bool {
        !matches!(self, TaskKind::Get)
    }
}

/// Uniform result of a pool operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resp {
    /// Value returned by a GET
    pub value: String,
    pub err: Option<StoreError>,
    /// False when a GET found no key
    pub exists: bool,
    /// Value is in the legacy record format
    pub compatible: bool,
    /// Error is transient and worth resubmitting
    pub retryable: bool,
}

impl Resp {
    pub(crate) fn ok(compatible: bool) -> Self {
        Self {
            compatible,
            ..Self::default()
        }
    }

    pub(crate) fn error(err: StoreError) -> Self {
        Self {
            retryable: err.is_retryable(),
            err: Some(err),
            ..Self::default()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.err.is_none()
    }

    /// Convert into a `Result`, keeping the response on success
    pub fn into_result(self) -> Result<Resp, StoreError> {
        match self.err {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}

/// One queued operation with its single-use reply slot
pub(crate) struct Task {
    pub(crate) kind: TaskKind,
    key: String,
    value: String,
    members: Vec<String>,
    reply: oneshot::Sender<Resp>,
}

impl Task {
    pub(crate) fn new(
        kind: TaskKind,
        key: String,
        value: String,
        members: Vec<String>,
    ) -> (Self, oneshot::Receiver<Resp>) {
        let (reply, rx) = oneshot::channel();
        (
            Self {
                kind,
                key,
                value,
                members,
                reply,
            },
            rx,
        )
    }

    pub(crate) fn command(&self) -> Command {
        let key = self.key.clone();
        match self.kind {
            TaskKind::Get => Command::Get { key },
            TaskKind::Set => Command::Set {
                key,
                value: self.value.clone(),
            },
            TaskKind::Delete => Command::Del { key },
            TaskKind::SetAdd => Command::SAdd {
                key,
                members: self.members.clone(),
            },
            TaskKind::SetRemove => Command::SRem {
                key,
                members: self.members.clone(),
            },
        }
    }

    /// Deliver the store's reply to the waiting caller
    pub(crate) fn resolve(self, reply: Reply, compatible: bool) {
        let resp = match into_resp(self.kind, reply, compatible) {
            Ok(resp) => resp,
            Err(reply) => {
                error!(
                    kind = self.kind.as_str(),
                    key = %self.key,
                    reply = ?reply,
                    "Store reply does not match command"
                );
                Resp::error(StoreError::Protocol(format!(
                    "unexpected reply to {}: {:?}",
                    self.kind.as_str(),
                    reply
                )))
            }
        };
        self.deliver(resp);
    }

    /// Deliver an error to the waiting caller
    pub(crate) fn fail(self, err: StoreError) {
        self.deliver(Resp::error(err));
    }

    fn deliver(self, resp: Resp) {
        metrics().record_store_command(self.kind.as_str(), resp.is_ok());
        // The caller may have stopped waiting after a shutdown
        let _ = self.reply.send(resp);
    }
}

/// Map a reply onto the response shape of its command kind
///
/// Returns the reply back when its shape is impossible for the command.
fn into_resp(kind: TaskKind, reply: Reply, compatible: bool) -> Result<Resp, Reply> {
    match (kind, reply) {
        (_, Reply::Error(msg)) => Ok(Resp::error(StoreError::Reply(msg))),
        (TaskKind::Get, Reply::Bulk(Some(value))) => Ok(Resp {
            value,
            exists: true,
            ..Resp::ok(compatible)
        }),
        (TaskKind::Get, Reply::Bulk(None)) => Ok(Resp::ok(compatible)),
        (TaskKind::Set, Reply::Status(_)) => Ok(Resp::ok(compatible)),
        (TaskKind::Delete, Reply::Integer(n)) => Ok(Resp {
            exists: n > 0,
            ..Resp::ok(compatible)
        }),
        (TaskKind::SetAdd | TaskKind::SetRemove, Reply::Integer(_)) => Ok(Resp::ok(compatible)),
        (_, other) => Err(other),
    }
}
