//! Hosted application model for keyhost.
//!
//! This crate provides:
//!
//! - **Operations**: named handlers that declare whether they need a credential
//! - **Hosted application**: one integration plus an ordered set of operations
//! - **Errors**: operation failures and startup configuration errors

pub mod application;
pub mod error;
pub mod operation;

pub use application::{HostedApplication, HostedApplicationBuilder};
pub use error::{ConfigurationError, OperationError};
pub use operation::{
    FnHandler, Operation, OperationContext, OperationHandler, OperationInfo, decode_arguments,
    handler_fn,
};
