use crate::mail::{DEFAULT_API_URL, MailSettings};
use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;
use std::time::Duration;

pub const ARG_MAIL_HOST: &str = "mail-host";
pub const ARG_MAIL_PORT: &str = "mail-port";
pub const ARG_MAIL_FROM: &str = "mail-from";
pub const ARG_MAIL_TOKEN: &str = "mail-token";
pub const ARG_MAIL_API_URL: &str = "mail-api-url";
pub const ARG_MAIL_TIMEOUT: &str = "mail-timeout-seconds";
pub const ARG_MAIL_TEMPLATES_DIR: &str = "mail-templates-dir";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_MAIL_HOST)
                .long(ARG_MAIL_HOST)
                .help("SMTP relay host")
                .env("MAIL_HOST")
                .required(true),
        )
        .arg(
            Arg::new(ARG_MAIL_PORT)
                .long(ARG_MAIL_PORT)
                .help("SMTP relay port")
                .env("MAIL_PORT")
                .default_value("1025")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_MAIL_FROM)
                .long(ARG_MAIL_FROM)
                .help("Sender address")
                .env("MAIL_FROM")
                .required(true),
        )
        .arg(
            Arg::new(ARG_MAIL_TOKEN)
                .long(ARG_MAIL_TOKEN)
                .help("Email API server token, required in production")
                .env("MAIL_TOKEN")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_MAIL_API_URL)
                .long(ARG_MAIL_API_URL)
                .help("Email API endpoint")
                .env("MAIL_API_URL")
                .default_value(DEFAULT_API_URL),
        )
        .arg(
            Arg::new(ARG_MAIL_TIMEOUT)
                .long(ARG_MAIL_TIMEOUT)
                .help("Timeout for a single delivery attempt in seconds")
                .env("MAIL_TIMEOUT_SECONDS")
                .default_value("10")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_MAIL_TEMPLATES_DIR)
                .long(ARG_MAIL_TEMPLATES_DIR)
                .help("Directory holding <name>.html email templates")
                .env("MAIL_TEMPLATES_DIR")
                .default_value("templates/email"),
        )
}

#[derive(Debug)]
pub struct Options {
    pub host: String,
    pub port: u16,
    pub from: String,
    pub token: Option<SecretString>,
    pub api_url: String,
    pub timeout: Duration,
    pub templates_dir: String,
}

impl Options {
    /// # Errors
    /// Returns an error if a required argument is missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        Ok(Self {
            host: matches
                .get_one::<String>(ARG_MAIL_HOST)
                .cloned()
                .context("missing required argument: --mail-host")?,
            port: matches.get_one::<u16>(ARG_MAIL_PORT).copied().unwrap_or(1025),
            from: matches
                .get_one::<String>(ARG_MAIL_FROM)
                .cloned()
                .context("missing required argument: --mail-from")?,
            token: matches
                .get_one::<String>(ARG_MAIL_TOKEN)
                .cloned()
                .map(SecretString::from),
            api_url: matches
                .get_one::<String>(ARG_MAIL_API_URL)
                .cloned()
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            timeout: Duration::from_secs(
                matches.get_one::<u64>(ARG_MAIL_TIMEOUT).copied().unwrap_or(10),
            ),
            templates_dir: matches
                .get_one::<String>(ARG_MAIL_TEMPLATES_DIR)
                .cloned()
                .unwrap_or_else(|| "templates/email".to_string()),
        })
    }

    #[must_use]
    pub fn settings(&self, app_name: &str) -> MailSettings {
        MailSettings {
            app_name: app_name.to_string(),
            relay_host: self.host.clone(),
            relay_port: self.port,
            from: self.from.clone(),
            api_token: self.token.clone(),
            api_url: self.api_url.clone(),
            timeout: self.timeout,
        }
    }
}
