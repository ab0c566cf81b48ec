//! Lifecycle of a single dispatch.
//!
//! ```text
//! Received -> CredentialCheck -> Authorized -> Executing -> Completed | Failed
//!                             \-> Unauthorized -> Rejected
//! ```
//!
//! A request can also end in `Cancelled` any time before it reaches
//! `Executing`. Once a handler starts it runs to completion.

use keyhost_core::RequestId;
use serde_json::Value as JsonValue;
use std::fmt;
use tracing::debug;

/// State of one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    /// The request arrived.
    Received,
    /// The operation was found; its credential requirement is being checked.
    CredentialCheck,
    /// The operation may run.
    Authorized,
    /// The credential could not be obtained.
    Unauthorized,
    /// The handler is running.
    Executing,
    /// The handler returned a result.
    Completed,
    /// The handler returned an error.
    Failed,
    /// The request was refused without running the handler.
    Rejected,
    /// The caller went away before the handler started.
    Cancelled,
}

impl DispatchState {
    /// Returns the state name used in logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::CredentialCheck => "credential_check",
            Self::Authorized => "authorized",
            Self::Unauthorized => "unauthorized",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        }
    }

    /// Returns true if the dispatch is over.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Rejected | Self::Cancelled
        )
    }

    /// Returns true if `next` may follow this state.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use DispatchState::*;

        matches!(
            (self, next),
            (Received, CredentialCheck)
                | (Received, Rejected)
                | (CredentialCheck, Authorized)
                | (CredentialCheck, Unauthorized)
                | (Authorized, Executing)
                | (Unauthorized, Rejected)
                | (Executing, Completed)
                | (Executing, Failed)
                | (Received | CredentialCheck | Authorized, Cancelled)
        )
    }
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request to run one operation.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    /// Identifier used to correlate logs and responses.
    pub request_id: RequestId,
    /// Name of the operation to run.
    pub operation: String,
    /// JSON arguments passed to the handler.
    pub arguments: JsonValue,
}

impl DispatchRequest {
    /// Creates a request with a fresh ID.
    #[must_use]
    pub fn new(operation: impl Into<String>, arguments: JsonValue) -> Self {
        Self {
            request_id: RequestId::new(),
            operation: operation.into(),
            arguments,
        }
    }
}

/// Records the path a dispatch takes through its states.
#[derive(Debug)]
pub(crate) struct DispatchTrace {
    request_id: RequestId,
    path: Vec<DispatchState>,
}

impl DispatchTrace {
    pub(crate) fn new(request_id: RequestId) -> Self {
        Self {
            request_id,
            path: vec![DispatchState::Received],
        }
    }

    pub(crate) fn state(&self) -> DispatchState {
        // `path` starts non-empty and only grows.
        self.path
            .last()
            .copied()
            .unwrap_or(DispatchState::Received)
    }

    pub(crate) fn advance(&mut self, next: DispatchState) {
        let current = self.state();
        debug_assert!(
            current.can_transition_to(next),
            "illegal dispatch transition {current} -> {next}"
        );
        debug!(request_id = %self.request_id, from = %current, to = %next, "dispatch transition");
        self.path.push(next);
    }

    #[cfg(test)]
    pub(crate) fn path(&self) -> &[DispatchState] {
        &self.path
    }
}
