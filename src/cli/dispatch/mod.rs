//! Map parsed CLI arguments to the action the binary runs.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{app, database, mail, redis, worker};
use anyhow::Result;

/// # Errors
/// Returns an error if required arguments are missing.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    Ok(Action::Server(Args {
        app: app::Options::parse(matches)?,
        database: database::Options::parse(matches)?,
        redis: redis::Options::parse(matches)?,
        mail: mail::Options::parse(matches)?,
        worker: worker::Options::parse(matches),
    }))
}
