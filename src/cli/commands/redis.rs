use crate::kv;
use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use secrecy::{ExposeSecret, SecretString};
use url::Url;

pub const ARG_REDIS_HOST: &str = "redis-host";
pub const ARG_REDIS_PORT: &str = "redis-port";
pub const ARG_REDIS_USER: &str = "redis-user";
pub const ARG_REDIS_PASS: &str = "redis-pass";
pub const ARG_REDIS_SCHEME: &str = "redis-scheme";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_REDIS_HOST)
                .long(ARG_REDIS_HOST)
                .help("Redis host")
                .env("REDIS_HOST")
                .required(true),
        )
        .arg(
            Arg::new(ARG_REDIS_PORT)
                .long(ARG_REDIS_PORT)
                .help("Redis port")
                .env("REDIS_PORT")
                .default_value("6379")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_REDIS_USER)
                .long(ARG_REDIS_USER)
                .help("Redis ACL user")
                .env("REDIS_USER"),
        )
        .arg(
            Arg::new(ARG_REDIS_PASS)
                .long(ARG_REDIS_PASS)
                .help("Redis password")
                .env("REDIS_PASS")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_REDIS_SCHEME)
                .long(ARG_REDIS_SCHEME)
                .help("`tls` connects with rediss://")
                .env("REDIS_SCHEME")
                .default_value("plain"),
        )
}

#[derive(Debug)]
pub struct Options {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub pass: Option<SecretString>,
    pub scheme: String,
}

impl Options {
    /// # Errors
    /// Returns an error if the host is missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        Ok(Self {
            host: matches
                .get_one::<String>(ARG_REDIS_HOST)
                .cloned()
                .context("missing required argument: --redis-host")?,
            port: matches.get_one::<u16>(ARG_REDIS_PORT).copied().unwrap_or(6379),
            user: matches.get_one::<String>(ARG_REDIS_USER).cloned(),
            pass: matches
                .get_one::<String>(ARG_REDIS_PASS)
                .cloned()
                .map(SecretString::from),
            scheme: matches
                .get_one::<String>(ARG_REDIS_SCHEME)
                .cloned()
                .unwrap_or_else(|| "plain".to_string()),
        })
    }

    /// # Errors
    /// Returns an error if the URL cannot be assembled.
    pub fn url(&self) -> Result<Url> {
        kv::connection_url(
            &self.host,
            self.port,
            self.user.as_deref(),
            self.pass.as_ref().map(ExposeSecret::expose_secret),
            &self.scheme,
        )
    }
}
