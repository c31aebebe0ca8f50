//! Per-project queue facade.
//!
//! Binds one [`QueueStore`] to one project and exposes job-oriented
//! operations: the facade builds the record (stamping `_project` and
//! pulling the job id out of the caller's `_job` parameter) and delegates
//! everything else straight to the store under `queue = project`.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::warn;

use crate::record::Record;
use crate::store::QueueStore;

/// Job-oriented view of one project's queue.
#[derive(Clone)]
pub struct ProjectQueue {
    store: Arc<dyn QueueStore>,
    project: String,
}

impl ProjectQueue {
    /// Binds `store` to `project`.
    pub fn new(store: Arc<dyn QueueStore>, project: impl Into<String>) -> Self {
        Self {
            store,
            project: project.into(),
        }
    }

    /// The project this facade is bound to.
    pub fn project(&self) -> &str {
        &self.project
    }

    /// Schedules `spider` with the given crawl parameters.
    ///
    /// The job id comes from the caller-supplied `_job` parameter; a job
    /// without one cannot be deduplicated or cancelled later, so the
    /// request is rejected up front. All parameters, `_job` included, ride
    /// along in the record untouched.
    ///
    /// Returns whether the job was stored.
    pub async fn add(&self, spider: &str, priority: f64, params: Map<String, Value>) -> bool {
        let Some(job_id) = params.get("_job").and_then(Value::as_str).map(str::to_string) else {
            warn!(project = %self.project, spider, "rejecting schedule request without a _job id");
            return false;
        };

        let record = Record::new(job_id.clone(), spider)
            .with_project(self.project.clone())
            .with_extra(params);

        self.store.put(&self.project, &job_id, &record, priority).await
    }

    /// Pops the highest-priority pending job, if any.
    pub async fn pop(&self) -> Option<Record> {
        self.store.pop(&self.project, true).await
    }

    /// Number of pending jobs.
    pub async fn count(&self) -> u64 {
        self.store.count(&self.project).await
    }

    /// Snapshot of up to `limit` pending jobs, highest priority first.
    /// `limit < 0` means all.
    pub async fn list(&self, limit: i64) -> Vec<Record> {
        self.store.list(&self.project, true, limit).await
    }

    /// Cancels a pending job. Returns whether it was actually pending.
    pub async fn cancel(&self, job_id: &str) -> bool {
        self.store.remove(&self.project, job_id).await
    }

    /// Drops every pending job for this project.
    pub async fn clear(&self) {
        self.store.clear(&self.project).await
    }
}
