//! CLI command definitions for crawlq.
//!
//! Every subcommand maps directly onto a facade or store operation and
//! prints its result as JSON on stdout.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde_json::{json, Map, Value};
use tokio::sync::broadcast;
use tracing::info;
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::poller::{PollerConfig, QueuePoller, StoreProjects};
use crate::project::ProjectQueue;
use crate::store::{QueueStore, RedisStore};

/// Redis-backed priority job queues for distributed crawler scheduling.
#[derive(Parser)]
#[command(name = "crawlq")]
#[command(about = "Inspect and drive Redis-backed crawler job queues")]
#[command(version)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    #[command(flatten)]
    pub connection: ConnectionArgs,
}

/// Redis connection and key routing settings.
#[derive(clap::Args)]
pub struct ConnectionArgs {
    /// Redis host.
    #[arg(long, global = true, default_value = "127.0.0.1", env = "CRAWLQ_REDIS_HOST")]
    pub host: String,

    /// Redis port.
    #[arg(long, global = true, default_value = "6379", env = "CRAWLQ_REDIS_PORT")]
    pub port: u16,

    /// Redis logical database.
    #[arg(long, global = true, default_value = "0", env = "CRAWLQ_REDIS_DB")]
    pub db: i64,

    /// Redis password.
    #[arg(long, global = true, env = "CRAWLQ_REDIS_PASSWORD")]
    pub password: Option<String>,

    /// Key namespace prefix shared by every queue.
    #[arg(long, global = true, default_value = "default", env = "CRAWLQ_QUEUE_PREFIX")]
    pub table: String,

    /// Pool every project into one shared physical queue.
    #[arg(long, global = true, env = "CRAWLQ_UNIFIED_QUEUE")]
    pub unified: bool,
}

impl ConnectionArgs {
    fn to_config(&self) -> QueueConfig {
        let mut config = QueueConfig::default()
            .with_host(&self.host)
            .with_port(self.port)
            .with_db(self.db)
            .with_table(&self.table)
            .with_unified(self.unified);
        if let Some(password) = &self.password {
            config = config.with_password(password);
        }
        config
    }
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Schedule a spider run on a project's queue.
    #[command(alias = "enqueue")]
    Schedule(ScheduleArgs),

    /// Pop the highest-priority pending job from a project's queue.
    Pop {
        /// Project whose queue to pop from.
        project: String,
    },

    /// List pending jobs for a project, highest priority first.
    List {
        /// Project whose queue to list.
        project: String,

        /// Maximum number of jobs to show; negative means all.
        #[arg(long, default_value = "-1", allow_hyphen_values = true)]
        limit: i64,
    },

    /// Count pending jobs for a project.
    Count {
        /// Project whose queue to count.
        project: String,
    },

    /// Cancel a pending job.
    Cancel {
        /// Project whose queue holds the job.
        project: String,

        /// Job id to cancel.
        job: String,
    },

    /// Drop every pending job for a project.
    Clear {
        /// Project whose queue to clear.
        project: String,
    },

    /// List every queue that currently has pending work.
    Queues,

    /// Run a fan-in poller, printing scheduled jobs as JSON lines.
    Poll(PollArgs),
}

/// Arguments for `crawlq schedule`.
#[derive(Parser)]
pub struct ScheduleArgs {
    /// Project to schedule under.
    pub project: String,

    /// Spider to run.
    pub spider: String,

    /// Job priority; higher pops first.
    #[arg(short, long, default_value = "0.0", allow_hyphen_values = true)]
    pub priority: f64,

    /// Job id; generated when omitted.
    #[arg(long)]
    pub job: Option<String>,

    /// Extra crawl parameter as key=value; repeatable.
    #[arg(short = 'a', long = "arg", value_parser = parse_key_val)]
    pub args: Vec<(String, String)>,
}

/// Arguments for `crawlq poll`.
#[derive(Parser)]
pub struct PollArgs {
    /// Seconds between poll passes.
    #[arg(long, default_value = "5")]
    pub interval: u64,

    /// Stop after printing this many jobs; runs until Ctrl-C when omitted.
    #[arg(short = 'n', long)]
    pub max_jobs: Option<u64>,
}

/// Parses a `key=value` CLI argument.
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{s}'"))
}

/// Parses command-line arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Executes the parsed CLI command.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let config = cli.connection.to_config();
    let store: Arc<dyn QueueStore> = Arc::new(
        RedisStore::connect(&config)
            .await
            .with_context(|| format!("connecting to {}", config.redis_url()))?,
    );

    match cli.command {
        Commands::Schedule(args) => {
            let job_id = args
                .job
                .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

            let mut params = Map::new();
            params.insert("_job".to_string(), Value::String(job_id.clone()));
            for (key, value) in args.args {
                params.insert(key, Value::String(value));
            }

            let queue = ProjectQueue::new(store, &args.project);
            let scheduled = queue.add(&args.spider, args.priority, params).await;
            print_json(&json!({
                "status": if scheduled { "ok" } else { "error" },
                "project": args.project,
                "spider": args.spider,
                "jobid": job_id,
            }))?;
        }
        Commands::Pop { project } => {
            let queue = ProjectQueue::new(store, &project);
            match queue.pop().await {
                Some(record) => print_json(&record)?,
                None => print_json(&json!({ "status": "empty", "project": project }))?,
            }
        }
        Commands::List { project, limit } => {
            let queue = ProjectQueue::new(store, &project);
            print_json(&queue.list(limit).await)?;
        }
        Commands::Count { project } => {
            let queue = ProjectQueue::new(store, &project);
            print_json(&json!({ "project": project, "pending": queue.count().await }))?;
        }
        Commands::Cancel { project, job } => {
            let queue = ProjectQueue::new(store, &project);
            let cancelled = queue.cancel(&job).await;
            print_json(&json!({
                "status": if cancelled { "ok" } else { "not_found" },
                "project": project,
                "jobid": job,
            }))?;
        }
        Commands::Clear { project } => {
            let queue = ProjectQueue::new(store, &project);
            queue.clear().await;
            print_json(&json!({ "status": "ok", "project": project }))?;
        }
        Commands::Queues => {
            let mut queues: Vec<String> = store.queues().await.into_iter().collect();
            queues.sort();
            print_json(&queues)?;
        }
        Commands::Poll(args) => {
            run_poller(store, args).await?;
        }
    }

    Ok(())
}

/// Drives a poller and prints each delivered job as a JSON line.
async fn run_poller(store: Arc<dyn QueueStore>, args: PollArgs) -> anyhow::Result<()> {
    let registry = Arc::new(StoreProjects::new(Arc::clone(&store)));
    let poller_config = PollerConfig::default()
        .with_poll_interval(std::time::Duration::from_secs(args.interval.max(1)));
    let poller = QueuePoller::new(store, registry, poller_config).await;
    let handle = poller.handle();

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let poller_task = tokio::spawn(poller.run(shutdown_rx));

    let mut delivered: u64 = 0;
    loop {
        if let Some(max) = args.max_jobs {
            if delivered >= max {
                break;
            }
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, shutting down poller");
                break;
            }
            message = handle.next() => {
                match message {
                    Some(message) => {
                        print_json(&message)?;
                        delivered += 1;
                    }
                    None => break,
                }
            }
        }
    }

    // Ignore send error - the poller may have already stopped
    let _ = shutdown_tx.send(());
    poller_task.await.context("poller task panicked")?;
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_val() {
        assert_eq!(
            parse_key_val("depth=3"),
            Ok(("depth".to_string(), "3".to_string()))
        );
        assert_eq!(
            parse_key_val("sign=a=b"),
            Ok(("sign".to_string(), "a=b".to_string()))
        );
        assert!(parse_key_val("no-separator").is_err());
    }

    #[test]
    fn test_connection_args_to_config() {
        let cli = Cli::parse_from([
            "crawlq", "count", "news", "--host", "cache.internal", "--port", "6380",
            "--db", "2", "--table", "crawl", "--unified",
        ]);
        let config = cli.connection.to_config();

        assert_eq!(config.host, "cache.internal");
        assert_eq!(config.port, 6380);
        assert_eq!(config.db, 2);
        assert_eq!(config.table, "crawl");
        assert!(config.unified);
    }

    #[test]
    fn test_schedule_args_parse() {
        let cli = Cli::parse_from([
            "crawlq", "schedule", "news", "search", "--priority", "2.5",
            "--job", "job-1", "-a", "depth=3", "-a", "region=eu",
        ]);

        let Commands::Schedule(args) = cli.command else {
            panic!("expected schedule subcommand");
        };
        assert_eq!(args.project, "news");
        assert_eq!(args.spider, "search");
        assert!((args.priority - 2.5).abs() < f64::EPSILON);
        assert_eq!(args.job.as_deref(), Some("job-1"));
        assert_eq!(args.args.len(), 2);
    }
}
