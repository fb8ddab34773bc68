use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use ddc_types::{BucketId, NamespaceId, RefId};

use crate::error::LogError;

const BUCKET_FORMAT: &str = "%Y%m%dT%H%M%S";

/// A log partition: the UTC start of a fixed-length time window, rendered as
/// `YYYYMMDDTHHMMSS`. Lexicographic order is time order.
///
/// Not to be confused with a ref's [`BucketId`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct LogBucket(String);

impl LogBucket {
    /// The partition containing `at` for windows of `partition_secs`.
    pub fn containing(at: DateTime<Utc>, partition_secs: u64) -> Self {
        let secs = partition_secs.max(1) as i64;
        let start = at.timestamp().div_euclid(secs) * secs;
        let start = Utc.timestamp_opt(start, 0).single().unwrap_or(at);
        Self(start.format(BUCKET_FORMAT).to_string())
    }

    /// Parse and validate a bucket name.
    pub fn parse(s: &str) -> Result<Self, LogError> {
        NaiveDateTime::parse_from_str(s, BUCKET_FORMAT)
            .map_err(|e| LogError::InvalidBucket(format!("{s}: {e}")))?;
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Start of the window.
    pub fn start(&self) -> Option<DateTime<Utc>> {
        NaiveDateTime::parse_from_str(&self.0, BUCKET_FORMAT)
            .ok()
            .map(|naive| naive.and_utc())
    }
}

impl fmt::Display for LogBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for LogBucket {
    type Err = LogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl<'de> Deserialize<'de> for LogBucket {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Position in a namespace's log: the last event a reader has seen.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogCursor {
    pub bucket: LogBucket,
    pub event_id: Uuid,
}

impl LogCursor {
    pub fn new(bucket: LogBucket, event_id: Uuid) -> Self {
        Self { bucket, event_id }
    }
}

impl fmt::Display for LogCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.event_id)
    }
}

/// The ref mutation an event records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogOp {
    /// A PUT that finalized immediately.
    Put,
    /// An explicit FINALIZE.
    Finalize,
    Delete,
}

impl fmt::Display for LogOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Put => "Put",
            Self::Finalize => "Finalize",
            Self::Delete => "Delete",
        };
        write!(f, "{s}")
    }
}

/// One committed ref mutation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationLogEvent {
    pub namespace: NamespaceId,
    /// Log partition holding the event.
    pub bucket: LogBucket,
    pub event_id: Uuid,
    pub op: LogOp,
    pub timestamp: DateTime<Utc>,
    pub ref_bucket: BucketId,
    pub ref_key: RefId,
}

impl ReplicationLogEvent {
    /// The cursor pointing at this event.
    pub fn cursor(&self) -> LogCursor {
        LogCursor::new(self.bucket.clone(), self.event_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn bucket_is_window_start() {
        let bucket = LogBucket::containing(at("2024-03-05T10:47:12Z"), 3600);
        assert_eq!(bucket.as_str(), "20240305T100000");
        assert_eq!(bucket.start(), Some(at("2024-03-05T10:00:00Z")));
    }

    #[test]
    fn same_window_same_bucket() {
        let a = LogBucket::containing(at("2024-03-05T10:00:01Z"), 600);
        let b = LogBucket::containing(at("2024-03-05T10:09:59Z"), 600);
        let c = LogBucket::containing(at("2024-03-05T10:10:00Z"), 600);
        assert_eq!(a, b);
        assert!(b < c);
    }

    #[test]
    fn parse_validates() {
        assert!(LogBucket::parse("20240305T100000").is_ok());
        assert!(LogBucket::parse("2024-03-05").is_err());
        assert!(LogBucket::parse("../etc").is_err());
    }

    #[test]
    fn lexicographic_is_chronological() {
        let early = LogBucket::containing(at("2023-12-31T23:59:59Z"), 60);
        let late = LogBucket::containing(at("2024-01-01T00:00:00Z"), 60);
        assert!(early < late);
        assert!(early.as_str() < late.as_str());
    }

    #[test]
    fn event_json_is_camel_case() {
        let event = ReplicationLogEvent {
            namespace: NamespaceId::new("ns").unwrap(),
            bucket: LogBucket::parse("20240101T000000").unwrap(),
            event_id: Uuid::nil(),
            op: LogOp::Finalize,
            timestamp: at("2024-01-01T00:00:05Z"),
            ref_bucket: BucketId::new("b").unwrap(),
            ref_key: RefId::new("k").unwrap(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["eventId"], Uuid::nil().to_string());
        assert_eq!(json["refBucket"], "b");
        assert_eq!(json["op"], "Finalize");
        assert_eq!(event.cursor().to_string(), format!("20240101T000000/{}", Uuid::nil()));
    }
}
