//! Job records and their wire encoding.
//!
//! Records travel as flat UTF-8 JSON objects with no schema versioning.
//! Known fields are typed; everything else (crawl parameters, settings,
//! caller bookkeeping like `_job`) passes through opaquely via a flattened
//! map. An absent or empty payload means "no record" on both sides of the
//! wire, never a `null` literal.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// A pending job as stored in the record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Externally supplied unique job id; the dedup/removal key.
    pub id: String,

    /// Name of the unit of work to run (spider name).
    pub name: String,

    /// Owning project, stamped by the facade at enqueue time.
    #[serde(rename = "_project", default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,

    /// Times this job has been requeued after a failure.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub retry_count: u32,

    /// Free-form caller parameters, passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn is_zero(count: &u32) -> bool {
    *count == 0
}

impl Record {
    /// Creates a record with no extra parameters.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            project: None,
            retry_count: 0,
            extra: Map::new(),
        }
    }

    /// Sets the owning project.
    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    /// Sets the free-form parameter map.
    pub fn with_extra(mut self, extra: Map<String, Value>) -> Self {
        self.extra = extra;
        self
    }

    /// Whether the record carries nothing worth storing.
    pub fn is_empty(&self) -> bool {
        self.id.is_empty() && self.name.is_empty() && self.extra.is_empty()
    }
}

/// Encodes a record for storage.
///
/// Returns `Ok(None)` for an empty record: emptiness is represented as key
/// absence, so there is nothing to write.
pub fn encode(record: &Record) -> Result<Option<String>, serde_json::Error> {
    if record.is_empty() {
        return Ok(None);
    }
    serde_json::to_string(record).map(Some)
}

/// Decodes a stored payload.
///
/// Empty input decodes to `None` ("no record"), and so does a payload that
/// fails to parse: stale or corrupt entries are dropped, not raised.
pub fn decode(payload: &str) -> Option<Record> {
    if payload.is_empty() {
        return None;
    }
    match serde_json::from_str(payload) {
        Ok(record) => Some(record),
        Err(e) => {
            debug!(error = %e, "dropping undecodable queue record");
            None
        }
    }
}

/// A popped record normalized for the scheduler consumer.
///
/// The poller renames `name` to `_spider` and resolves the owning project:
/// outside unified mode the queue it came from is authoritative, inside
/// unified mode the record's own `_project` is (many projects share the
/// physical queue, so the queue name says nothing).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleMessage {
    /// Spider to run.
    #[serde(rename = "_spider")]
    pub spider: String,

    /// Owning project.
    #[serde(rename = "_project", default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,

    /// Job id.
    pub id: String,

    /// Retry count carried over from the record.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub retry_count: u32,

    /// Remaining record fields, passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ScheduleMessage {
    /// Normalizes a popped record.
    ///
    /// `queue_project` is the logical queue the record was popped from.
    pub fn from_record(record: Record, queue_project: &str, unified: bool) -> Self {
        let project = if unified {
            record.project
        } else {
            Some(queue_project.to_string())
        };
        Self {
            spider: record.name,
            project,
            id: record.id,
            retry_count: record.retry_count,
            extra: record.extra,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let record = Record::new("job-1", "search")
            .with_project("news")
            .with_extra(params(&[("_job", json!("job-1")), ("depth", json!(3))]));

        let payload = encode(&record)
            .expect("encoding should work")
            .expect("non-empty record should produce a payload");
        let parsed = decode(&payload).expect("payload should decode");

        assert_eq!(parsed, record);
    }

    #[test]
    fn test_wire_field_names() {
        let record = Record::new("job-1", "search").with_project("news");
        let payload = encode(&record).expect("encoding should work").expect("payload");
        let value: Value = serde_json::from_str(&payload).expect("valid json");

        assert_eq!(value["id"], json!("job-1"));
        assert_eq!(value["name"], json!("search"));
        assert_eq!(value["_project"], json!("news"));
        // retry_count of zero is omitted from the wire
        assert!(value.get("retry_count").is_none());
    }

    #[test]
    fn test_empty_record_encodes_to_nothing() {
        let record = Record::new("", "");
        assert!(record.is_empty());
        assert_eq!(encode(&record).expect("encoding should work"), None);
    }

    #[test]
    fn test_decode_empty_and_garbage() {
        assert_eq!(decode(""), None);
        assert_eq!(decode("not json"), None);
        assert_eq!(decode("[1, 2]"), None);
    }

    #[test]
    fn test_decode_tolerates_minimal_payload() {
        let parsed = decode(r#"{"id":"j","name":"s"}"#).expect("should decode");
        assert_eq!(parsed.retry_count, 0);
        assert_eq!(parsed.project, None);
        assert!(parsed.extra.is_empty());
    }

    #[test]
    fn test_message_injects_project_outside_unified_mode() {
        let record = Record::new("job-1", "search").with_project("stale");
        let msg = ScheduleMessage::from_record(record, "news", false);

        assert_eq!(msg.spider, "search");
        // The queue the record came from wins over whatever was stored.
        assert_eq!(msg.project.as_deref(), Some("news"));
    }

    #[test]
    fn test_message_keeps_record_project_in_unified_mode() {
        let record = Record::new("job-1", "search").with_project("news");
        let msg = ScheduleMessage::from_record(record, "default", true);

        assert_eq!(msg.project.as_deref(), Some("news"));
    }

    #[test]
    fn test_message_wire_format() {
        let record = Record::new("job-1", "search")
            .with_extra(params(&[("_job", json!("job-1"))]));
        let msg = ScheduleMessage::from_record(record, "news", false);
        let value = serde_json::to_value(&msg).expect("serializable");

        assert_eq!(value["_spider"], json!("search"));
        assert_eq!(value["_project"], json!("news"));
        assert_eq!(value["_job"], json!("job-1"));
        assert!(value.get("name").is_none());
    }
}
