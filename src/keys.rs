//! Key namespace builder for queue storage.
//!
//! Every queue identity `(table, queue_name)` maps to exactly two flat Redis
//! keys: a scored set of ready job ids and a record store holding one
//! serialized payload per id. All keys are derived here so the layout lives
//! in one place:
//!
//! - Ready-set key: `{table}:queue_set:{queue}`
//! - Record key: `{table}:queue_data:{queue}:{job_id}`
//!
//! In unified mode every queue name collapses to [`UNIFIED_QUEUE`], pooling
//! all projects into a single physical queue while records keep their true
//! `_project` origin in the payload.

/// Key segment separator.
const SEP: char = ':';

/// Key segment marking the scored ready-set of a queue.
const SET_KIND: &str = "queue_set";

/// Key segment marking the record store of a queue.
const DATA_KIND: &str = "queue_data";

/// Queue name all identities collapse to under unified mode.
pub const UNIFIED_QUEUE: &str = "default";

/// Deterministic key builder for one table.
///
/// Pure and cheap to clone; two distinct `(table, queue)` pairs never
/// collide in non-unified mode, and all identities for one table collapse
/// to a single pair in unified mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    table: String,
    unified: bool,
}

impl KeySpace {
    /// Creates a key space for `table`.
    pub fn new(table: impl Into<String>, unified: bool) -> Self {
        Self {
            table: table.into(),
            unified,
        }
    }

    /// Returns the table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Returns whether unified-mode coercion is active.
    pub fn unified(&self) -> bool {
        self.unified
    }

    /// The queue name keys are actually generated for.
    fn effective<'a>(&self, queue: &'a str) -> &'a str {
        if self.unified {
            UNIFIED_QUEUE
        } else {
            queue
        }
    }

    /// Key of the scored ready-set for `queue`.
    pub fn set_key(&self, queue: &str) -> String {
        format!("{}{SEP}{SET_KIND}{SEP}{}", self.table, self.effective(queue))
    }

    /// Key of the stored record for one job id.
    pub fn data_key(&self, queue: &str, job_id: &str) -> String {
        format!(
            "{}{SEP}{DATA_KIND}{SEP}{}{SEP}{job_id}",
            self.table,
            self.effective(queue)
        )
    }

    /// Record-store prefix for `queue`, used for prefix scans and for the
    /// pop script's server-side key concatenation.
    pub fn data_prefix(&self, queue: &str) -> String {
        format!(
            "{}{SEP}{DATA_KIND}{SEP}{}",
            self.table,
            self.effective(queue)
        )
    }

    /// Prefix shared by every ready-set key under this table.
    pub fn set_prefix(&self) -> String {
        format!("{}{SEP}{SET_KIND}{SEP}", self.table)
    }

    /// Extracts the queue name from a full ready-set key, if it belongs to
    /// this table.
    pub fn queue_from_set_key<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(&self.set_prefix())
    }
}
