//! Liveness record and its string codec
//!
//! A record is the last heartbeat seen for one instance. It is stored as a
//! compact string so the remote store can hold it under a plain string key:
//!
//! - current format: `<timestamp_sec>:<host>|<count>`
//! - legacy format:  `1:<timestamp_sec>:<host>|<count>`
//!
//! The `|<count>` suffix is optional on decode. Hosts may contain `:`
//! (IPv6 literals), so the timestamp is split at the first `:` and the
//! count at the last `|`.

use std::fmt;

/// Version marker that prefixes legacy-format records
const LEGACY_MARKER: &str = "1";

/// Last known heartbeat for one instance
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LivenessRecord {
    /// Host of the registry node that accepted the heartbeat
    pub origin_host: String,
    /// Heartbeat timestamp (unix seconds)
    pub last_report_time_sec: i64,
    /// Heartbeat counter reported by the caller
    pub report_count: i64,
}

impl LivenessRecord {
    pub fn new(origin_host: impl Into<String>, last_report_time_sec: i64, report_count: i64) -> Self {
        Self {
            origin_host: origin_host.into(),
            last_report_time_sec,
            report_count,
        }
    }

    /// Encode the record, optionally in the legacy format
    pub fn serialize(&self, legacy: bool) -> String {
        if legacy {
            format!(
                "{}:{}:{}|{}",
                LEGACY_MARKER, self.last_report_time_sec, self.origin_host, self.report_count
            )
        } else {
            format!(
                "{}:{}|{}",
                self.last_report_time_sec, self.origin_host, self.report_count
            )
        }
    }

    /// Decode a record previously produced by [`serialize`](Self::serialize)
    /// with the same `legacy` flag
    pub fn deserialize(value: &str, legacy: bool) -> Result<Self, RecordError> {
        let body = if legacy {
            match value.split_once(':') {
                Some((LEGACY_MARKER, rest)) => rest,
                _ => return Err(RecordError::MissingMarker(value.to_string())),
            }
        } else {
            value
        };

        let (timestamp, rest) = body
            .split_once(':')
            .ok_or_else(|| RecordError::MissingSeparator(value.to_string()))?;

        let last_report_time_sec = timestamp
            .parse::<i64>()
            .map_err(|_| RecordError::InvalidTimestamp(timestamp.to_string()))?;

        let (origin_host, report_count) = match rest.rsplit_once('|') {
            Some((host, count)) => {
                let count = count
                    .parse::<i64>()
                    .map_err(|_| RecordError::InvalidCount(count.to_string()))?;
                (host, count)
            }
            None => (rest, 0),
        };

        Ok(Self {
            origin_host: origin_host.to_string(),
            last_report_time_sec,
            report_count,
        })
    }
}

impl fmt::Display for LivenessRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize(false))
    }
}

/// Errors decoding a stored record
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("Record has no timestamp separator: {0:?}")]
    MissingSeparator(String),

    #[error("Legacy record lacks version marker: {0:?}")]
    MissingMarker(String),

    #[error("Invalid record timestamp: {0:?}")]
    InvalidTimestamp(String),

    #[error("Invalid record count: {0:?}")]
    InvalidCount(String),
}
