pub mod app;
pub mod database;
pub mod logging;
pub mod mail;
pub mod redis;
pub mod worker;

use clap::{
    ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("adly")
        .about("Accounts and transactional email")
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles);

    let command = app::with_args(command);
    let command = database::with_args(command);
    let command = redis::with_args(command);
    let command = mail::with_args(command);
    let command = worker::with_args(command);
    logging::with_args(command)
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::time::Duration;

    // Required settings plus cleared optional ones so the host environment
    // cannot leak into the assertions.
    fn base_env() -> Vec<(&'static str, Option<&'static str>)> {
        let mut vars = vec![
            ("APP_NAME", Some("Adly")),
            ("APP_KEY", Some("secret-key")),
            ("APP_HOST", Some("development")),
            ("API_HOST", Some("http://localhost:6060")),
            ("DB_HOST", Some("localhost")),
            ("DB_USERNAME", Some("adly")),
            ("DB_PASSWORD", Some("p@ss word")),
            ("DB_NAME", Some("adly")),
            ("REDIS_HOST", Some("localhost")),
            ("MAIL_HOST", Some("localhost")),
            ("MAIL_FROM", Some("no-reply@adly.dev")),
        ];
        for name in [
            "PORT",
            "MONITORING_PORT",
            "ASYNQMON_SERVICE",
            "SHUTDOWN_TIMEOUT_SECONDS",
            "DB_PORT",
            "REDIS_PORT",
            "REDIS_USER",
            "REDIS_PASS",
            "REDIS_SCHEME",
            "MAIL_PORT",
            "MAIL_TOKEN",
            "MAIL_API_URL",
            "MAIL_TIMEOUT_SECONDS",
            "MAIL_TEMPLATES_DIR",
            "WORKER_CONCURRENCY",
            "WORKER_SHUTDOWN_TIMEOUT_SECONDS",
            "TASK_MAX_RETRIES",
            "TASK_LEASE_SECONDS",
            "TASK_HANDLER_TIMEOUT_SECONDS",
            "TASK_BACKOFF_BASE_SECONDS",
            "TASK_BACKOFF_MAX_SECONDS",
            "QUEUE_NAME",
            "QUEUE_DEAD_CAPACITY",
            "LOG_LEVEL",
        ] {
            vars.push((name, None));
        }
        vars
    }

    #[test]
    fn test_new() {
        let command = new();

        assert_eq!(command.get_name(), "adly");
        assert_eq!(
            command.get_about().map(ToString::to_string),
            Some("Accounts and transactional email".to_string())
        );
        assert_eq!(
            command.get_version().map(ToString::to_string),
            Some(env!("CARGO_PKG_VERSION").to_string())
        );
    }

    #[test]
    fn test_defaults_from_env() {
        temp_env::with_vars(base_env(), || {
            let matches = new().get_matches_from(vec!["adly"]);

            let app = app::Options::parse(&matches).unwrap();
            assert_eq!(app.name, "Adly");
            assert_eq!(app.key.expose_secret(), "secret-key");
            assert!(!app.production());
            assert_eq!(app.port, 6060);
            assert!(!app.monitoring);
            assert_eq!(app.monitoring_port, 6660);
            assert_eq!(app.shutdown_timeout, Duration::from_secs(10));

            let database = database::Options::parse(&matches).unwrap();
            assert_eq!(database.port, 5432);
            let dsn = database.dsn().unwrap();
            assert_eq!(dsn.username(), "adly");
            assert_eq!(dsn.password(), Some("p%40ss%20word"));
            assert_eq!(dsn.path(), "/adly");

            let redis = redis::Options::parse(&matches).unwrap();
            assert_eq!(redis.url().unwrap().as_str(), "redis://localhost:6379/0");

            let mail = mail::Options::parse(&matches).unwrap();
            assert_eq!(mail.port, 1025);
            assert!(mail.token.is_none());
            assert_eq!(mail.timeout, Duration::from_secs(10));
            assert_eq!(mail.templates_dir, "templates/email");

            let worker = worker::Options::parse(&matches);
            assert_eq!(worker.queue_name, "default");
            assert_eq!(worker.dead_capacity, 10_000);
            assert_eq!(worker.worker.concurrency(), 10);
            assert_eq!(worker.retry.max_retries(), 5);
        });
    }

    #[test]
    fn test_production_and_overrides() {
        temp_env::with_vars(base_env(), || {
            temp_env::with_vars(
                [
                    ("APP_HOST", Some("production")),
                    ("ASYNQMON_SERVICE", Some("true")),
                    ("PORT", Some("8080")),
                    ("REDIS_SCHEME", Some("tls")),
                    ("REDIS_PASS", Some("hunter2")),
                    ("WORKER_CONCURRENCY", Some("3")),
                    ("TASK_MAX_RETRIES", Some("2")),
                    ("QUEUE_DEAD_CAPACITY", Some("500")),
                ],
                || {
                    let matches = new().get_matches_from(vec!["adly"]);
                    let app = app::Options::parse(&matches).unwrap();
                    assert!(app.production());
                    assert!(app.monitoring);
                    assert_eq!(app.port, 8080);

                    let redis = redis::Options::parse(&matches).unwrap();
                    assert_eq!(
                        redis.url().unwrap().as_str(),
                        "rediss://:hunter2@localhost:6379/0"
                    );

                    let worker = worker::Options::parse(&matches);
                    assert_eq!(worker.worker.concurrency(), 3);
                    assert_eq!(worker.retry.max_retries(), 2);
                    assert_eq!(worker.dead_capacity, 500);
                },
            );
        });
    }

    #[test]
    fn test_monitoring_flag_without_value() {
        temp_env::with_vars(base_env(), || {
            temp_env::with_var("ASYNQMON_SERVICE", None::<&str>, || {
                let matches = new().get_matches_from(vec!["adly", "--monitoring"]);
                let app = app::Options::parse(&matches).unwrap();
                assert!(app.monitoring);
            });
        });
    }

    #[test]
    fn test_missing_required_fails() {
        temp_env::with_vars(
            [
                ("APP_KEY", None::<&str>),
                ("APP_NAME", None),
                ("APP_HOST", None),
                ("API_HOST", None),
            ],
            || {
                let result = new().try_get_matches_from(vec!["adly"]);
                assert_eq!(
                    result.map_err(|e| e.kind()).err(),
                    Some(clap::error::ErrorKind::MissingRequiredArgument)
                );
            },
        );
    }

    #[test]
    fn test_check_log_level_env() {
        let levels = ["error", "warn", "info", "debug", "trace"];
        for (index, &level) in levels.iter().enumerate() {
            temp_env::with_vars(base_env(), || {
                temp_env::with_var("LOG_LEVEL", Some(level), || {
                    let matches = new().get_matches_from(vec!["adly"]);
                    assert_eq!(
                        matches.get_one::<u8>(logging::ARG_VERBOSITY).copied(),
                        u8::try_from(index).ok()
                    );
                });
            });
        }
    }

    #[test]
    fn test_check_log_level_verbosity() {
        for index in 0..5usize {
            temp_env::with_vars(base_env(), || {
                temp_env::with_var("LOG_LEVEL", None::<&str>, || {
                    let mut args = vec!["adly".to_string()];
                    if index > 0 {
                        args.push(format!("-{}", "v".repeat(index)));
                    }

                    let matches = new().get_matches_from(args);
                    assert_eq!(
                        matches.get_one::<u8>(logging::ARG_VERBOSITY).copied(),
                        u8::try_from(index).ok()
                    );
                });
            });
        }
    }
}
