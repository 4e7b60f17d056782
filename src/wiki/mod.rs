//! High-level wiki API.
//!
//! [`Wiki`] is what a request handler talks to: it resolves, reads and
//! browses pages, and submits edits through the optimistic write-or-merge
//! flow. Configuration comes from [`WikiConfig`]; committed edits are
//! reported to [`CommitHook`]s.

mod api;
mod config;
mod hooks;

pub use api::{Wiki, WikiError, WikiResult};
pub use config::{ConfigError, WikiConfig};
pub use hooks::{CommitEvent, CommitHook, LogHook};
