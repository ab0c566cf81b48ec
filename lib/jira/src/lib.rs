//! Jira application hosted by keyhost.
//!
//! Exposes a small set of Jira REST v2 operations. Everything except
//! `serverInfo` runs with the integration's credential as a bearer token.

pub mod client;
pub mod operations;

pub use client::JiraClient;
pub use operations::{APPLICATION_NAME, application};
