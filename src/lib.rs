//! crawlq: Redis-backed priority job queues for distributed crawler
//! scheduling.
//!
//! Producers enqueue prioritized spider jobs under per-project queues (or
//! one pooled unified queue); a fan-in [`poller::QueuePoller`] drains
//! whichever queues have ready work onto a single output stream for a
//! scheduler/worker pool to consume.

pub mod cli;
pub mod config;
pub mod keys;
pub mod poller;
pub mod project;
pub mod record;
pub mod store;

// Re-export the types most callers need
pub use config::QueueConfig;
pub use poller::{PollerHandle, QueuePoller};
pub use project::ProjectQueue;
pub use record::{Record, ScheduleMessage};
pub use store::{MemoryStore, QueueStore, RedisStore, StoreError};
