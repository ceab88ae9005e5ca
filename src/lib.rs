//! # Adly (accounts and transactional email)
//!
//! `adly` is a user-authentication backend: registration, email verification
//! through one-time tokens, login, password reset and an authenticated profile
//! lookup.
//!
//! ## Moving parts
//!
//! - **HTTP API** (`api`): thin axum handlers calling into `service`.
//! - **Ephemeral tokens** (`tokens`): single-use verification and reset tokens,
//!   sessions and cooldown gates stored in the key-value store (`kv`).
//! - **Task queue and workers** (`tasks`): email work is enqueued as envelopes
//!   in the key-value store and executed by a worker pool with leases, retries
//!   and a dead-letter list.
//! - **Mail pipeline** (`mail`): template rendering and delivery either through
//!   a local SMTP relay or a transactional-email HTTP API.
//! - **Supervisor** (`supervisor`): runs the API server, the optional
//!   monitoring server and the worker pool, and drives a bounded shutdown.
//!
//! Delivery is at-least-once: a worker that dies mid-send leaves its lease to
//! expire and another worker picks the task up again.

pub mod api;
pub mod cli;
mod encoding;
pub mod kv;
pub mod mail;
pub mod monitoring;
pub mod service;
pub mod store;
pub mod supervisor;
pub mod tasks;
pub mod tokens;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
