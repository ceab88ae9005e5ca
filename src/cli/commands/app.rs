use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use secrecy::SecretString;
use std::time::Duration;

pub const ARG_APP_NAME: &str = "app-name";
pub const ARG_APP_KEY: &str = "app-key";
pub const ARG_APP_HOST: &str = "app-host";
pub const ARG_API_HOST: &str = "api-host";
pub const ARG_PORT: &str = "port";
pub const ARG_MONITORING: &str = "monitoring";
pub const ARG_MONITORING_PORT: &str = "monitoring-port";
pub const ARG_SHUTDOWN_TIMEOUT: &str = "shutdown-timeout-seconds";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_APP_NAME)
                .long(ARG_APP_NAME)
                .help("Application name, used as the mail sender display name")
                .env("APP_NAME")
                .required(true),
        )
        .arg(
            Arg::new(ARG_APP_KEY)
                .long(ARG_APP_KEY)
                .help("Secret used to sign access tokens")
                .env("APP_KEY")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_APP_HOST)
                .long(ARG_APP_HOST)
                .help("Deployment environment; `production` enables the mail API and error masking")
                .env("APP_HOST")
                .required(true),
        )
        .arg(
            Arg::new(ARG_API_HOST)
                .long(ARG_API_HOST)
                .help("Public base URL of the API, used in email links")
                .env("API_HOST")
                .required(true),
        )
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long(ARG_PORT)
                .help("Port to listen on")
                .env("PORT")
                .default_value("6060")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_MONITORING)
                .long(ARG_MONITORING)
                .help("Serve the queue monitoring endpoint")
                .env("ASYNQMON_SERVICE")
                .action(ArgAction::Set)
                .num_args(0..=1)
                .default_value("false")
                .default_missing_value("true")
                .value_parser(clap::value_parser!(bool)),
        )
        .arg(
            Arg::new(ARG_MONITORING_PORT)
                .long(ARG_MONITORING_PORT)
                .help("Port for the monitoring endpoint")
                .env("MONITORING_PORT")
                .default_value("6660")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_SHUTDOWN_TIMEOUT)
                .long(ARG_SHUTDOWN_TIMEOUT)
                .help("Seconds to wait for units to stop before aborting")
                .env("SHUTDOWN_TIMEOUT_SECONDS")
                .default_value("10")
                .value_parser(clap::value_parser!(u64)),
        )
}

#[derive(Debug)]
pub struct Options {
    pub name: String,
    pub key: SecretString,
    pub environment: String,
    pub api_host: String,
    pub port: u16,
    pub monitoring: bool,
    pub monitoring_port: u16,
    pub shutdown_timeout: Duration,
}

impl Options {
    /// # Errors
    /// Returns an error if a required argument is missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let required = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .with_context(|| format!("missing required argument: --{id}"))
        };

        Ok(Self {
            name: required(ARG_APP_NAME)?,
            key: SecretString::from(required(ARG_APP_KEY)?),
            environment: required(ARG_APP_HOST)?,
            api_host: required(ARG_API_HOST)?,
            port: matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(6060),
            monitoring: matches.get_one::<bool>(ARG_MONITORING).copied().unwrap_or(false),
            monitoring_port: matches
                .get_one::<u16>(ARG_MONITORING_PORT)
                .copied()
                .unwrap_or(6660),
            shutdown_timeout: Duration::from_secs(
                matches.get_one::<u64>(ARG_SHUTDOWN_TIMEOUT).copied().unwrap_or(10),
            ),
        })
    }

    #[must_use]
    pub fn production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}
