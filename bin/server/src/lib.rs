//! keyhost single-application server.
//!
//! Hosts one application bound to one integration, resolves the
//! integration's credential on demand, and exposes the application's
//! operations over HTTP.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod routes;
pub mod server;

pub use dispatch::{DispatchRequest, DispatchState};
pub use error::{DispatchError, ServerError};
pub use server::{SingleAppServer, shutdown_signal};
