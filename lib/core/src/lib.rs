//! Core types and utilities for keyhost.
//!
//! This crate provides the foundational types and error handling shared by
//! the credential layer, the hosted application and the server.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{ParseIdError, RequestId};
