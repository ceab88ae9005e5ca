use crate::tasks::{DEFAULT_DEAD_CAPACITY, RetryPolicy, WorkerConfig};
use clap::{Arg, ArgMatches, Command};
use std::time::Duration;

pub const ARG_WORKER_CONCURRENCY: &str = "worker-concurrency";
pub const ARG_WORKER_SHUTDOWN_TIMEOUT: &str = "worker-shutdown-timeout-seconds";
pub const ARG_TASK_MAX_RETRIES: &str = "task-max-retries";
pub const ARG_TASK_LEASE: &str = "task-lease-seconds";
pub const ARG_TASK_HANDLER_TIMEOUT: &str = "task-handler-timeout-seconds";
pub const ARG_TASK_BACKOFF_BASE: &str = "task-backoff-base-seconds";
pub const ARG_TASK_BACKOFF_MAX: &str = "task-backoff-max-seconds";
pub const ARG_QUEUE_NAME: &str = "queue-name";
pub const ARG_QUEUE_DEAD_CAPACITY: &str = "queue-dead-capacity";

fn seconds_arg(id: &'static str, env: &'static str, default: &'static str, help: &'static str) -> Arg {
    Arg::new(id)
        .long(id)
        .help(help)
        .env(env)
        .default_value(default)
        .value_parser(clap::value_parser!(u64))
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_WORKER_CONCURRENCY)
                .long(ARG_WORKER_CONCURRENCY)
                .help("Number of concurrent task workers")
                .env("WORKER_CONCURRENCY")
                .default_value("10")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new(ARG_TASK_MAX_RETRIES)
                .long(ARG_TASK_MAX_RETRIES)
                .help("Handler failures before a task is dead-lettered")
                .env("TASK_MAX_RETRIES")
                .default_value("5")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(seconds_arg(
            ARG_WORKER_SHUTDOWN_TIMEOUT,
            "WORKER_SHUTDOWN_TIMEOUT_SECONDS",
            "8",
            "Grace period for in-flight tasks on shutdown",
        ))
        .arg(seconds_arg(
            ARG_TASK_LEASE,
            "TASK_LEASE_SECONDS",
            "60",
            "How long a claimed task stays invisible to other workers",
        ))
        .arg(seconds_arg(
            ARG_TASK_HANDLER_TIMEOUT,
            "TASK_HANDLER_TIMEOUT_SECONDS",
            "30",
            "Upper bound for a single handler execution",
        ))
        .arg(seconds_arg(
            ARG_TASK_BACKOFF_BASE,
            "TASK_BACKOFF_BASE_SECONDS",
            "5",
            "Base delay for retry backoff",
        ))
        .arg(seconds_arg(
            ARG_TASK_BACKOFF_MAX,
            "TASK_BACKOFF_MAX_SECONDS",
            "300",
            "Max delay for retry backoff",
        ))
        .arg(
            Arg::new(ARG_QUEUE_NAME)
                .long(ARG_QUEUE_NAME)
                .help("Queue name, used as the key prefix in Redis")
                .env("QUEUE_NAME")
                .default_value("default"),
        )
        .arg(
            Arg::new(ARG_QUEUE_DEAD_CAPACITY)
                .long(ARG_QUEUE_DEAD_CAPACITY)
                .help("Dead letters kept before the oldest are evicted")
                .env("QUEUE_DEAD_CAPACITY")
                .default_value("10000")
                .value_parser(clap::value_parser!(usize)),
        )
}

#[derive(Debug)]
pub struct Options {
    pub queue_name: String,
    pub dead_capacity: usize,
    pub worker: WorkerConfig,
    pub retry: RetryPolicy,
}

impl Options {
    #[must_use]
    pub fn parse(matches: &ArgMatches) -> Self {
        let seconds = |id: &str, default: u64| {
            Duration::from_secs(matches.get_one::<u64>(id).copied().unwrap_or(default))
        };

        let worker = WorkerConfig::new()
            .with_concurrency(
                matches
                    .get_one::<usize>(ARG_WORKER_CONCURRENCY)
                    .copied()
                    .unwrap_or(10),
            )
            .with_lease(seconds(ARG_TASK_LEASE, 60))
            .with_handler_timeout(seconds(ARG_TASK_HANDLER_TIMEOUT, 30))
            .with_shutdown_timeout(seconds(ARG_WORKER_SHUTDOWN_TIMEOUT, 8))
            .normalize();

        let retry = RetryPolicy::new()
            .with_max_retries(
                matches
                    .get_one::<u32>(ARG_TASK_MAX_RETRIES)
                    .copied()
                    .unwrap_or(5),
            )
            .with_backoff_base(seconds(ARG_TASK_BACKOFF_BASE, 5))
            .with_backoff_max(seconds(ARG_TASK_BACKOFF_MAX, 300))
            .normalize();

        Self {
            queue_name: matches
                .get_one::<String>(ARG_QUEUE_NAME)
                .cloned()
                .unwrap_or_else(|| "default".to_string()),
            dead_capacity: matches
                .get_one::<usize>(ARG_QUEUE_DEAD_CAPACITY)
                .copied()
                .unwrap_or(DEFAULT_DEAD_CAPACITY),
            worker,
            retry,
        }
    }
}
