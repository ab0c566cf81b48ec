//! Operations and the handler trait they run through.
//!
//! An application is a list of operations. Each carries a name, whether it
//! needs the integration's credential, and the handler that does the work.

use crate::error::OperationError;
use async_trait::async_trait;
use keyhost_core::RequestId;
use keyhost_integration::{Credential, Integration};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Information about an available operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationInfo {
    /// Operation name.
    pub name: String,
    /// Description of what the operation does.
    pub description: String,
    /// Whether the operation needs the integration's credential.
    pub requires_credential: bool,
}

/// What a handler receives besides its arguments.
#[derive(Debug, Clone)]
pub struct OperationContext {
    request_id: RequestId,
    integration: Integration,
    credential: Option<Credential>,
}

impl OperationContext {
    /// Creates a context. `credential` is set only for operations that
    /// passed the credential check.
    #[must_use]
    pub fn new(
        request_id: RequestId,
        integration: Integration,
        credential: Option<Credential>,
    ) -> Self {
        Self {
            request_id,
            integration,
            credential,
        }
    }

    /// Returns the dispatch this invocation belongs to.
    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Returns the application's integration.
    #[must_use]
    pub fn integration(&self) -> &Integration {
        &self.integration
    }

    /// Returns the validated credential.
    ///
    /// # Errors
    ///
    /// Returns an error if the operation was declared without a credential
    /// requirement, in which case no credential was resolved for it.
    pub fn credential(&self) -> Result<&Credential, OperationError> {
        self.credential.as_ref().ok_or_else(|| {
            OperationError::failed("operation was not declared as requiring a credential")
        })
    }
}

/// The logic behind an operation.
#[async_trait]
pub trait OperationHandler: Send + Sync {
    /// Runs the operation.
    ///
    /// # Errors
    ///
    /// Returns the operation's own failure.
    async fn call(
        &self,
        context: OperationContext,
        arguments: JsonValue,
    ) -> Result<JsonValue, OperationError>;
}

/// Adapts an async closure into an `OperationHandler`.
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> OperationHandler for FnHandler<F>
where
    F: Fn(OperationContext, JsonValue) -> Fut + Send + Sync,
    Fut: Future<Output = Result<JsonValue, OperationError>> + Send + 'static,
{
    async fn call(
        &self,
        context: OperationContext,
        arguments: JsonValue,
    ) -> Result<JsonValue, OperationError> {
        (self.0)(context, arguments).await
    }
}

/// Wraps an async closure as a shareable handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn OperationHandler>
where
    F: Fn(OperationContext, JsonValue) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<JsonValue, OperationError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Decodes JSON arguments into a typed struct.
///
/// `null` is treated as an empty object so operations without required
/// arguments can be called with no body.
///
/// # Errors
///
/// Returns `InvalidArguments` if the arguments do not match `T`.
pub fn decode_arguments<T: DeserializeOwned>(arguments: JsonValue) -> Result<T, OperationError> {
    let arguments = if arguments.is_null() {
        JsonValue::Object(Default::default())
    } else {
        arguments
    };
    serde_json::from_value(arguments).map_err(|e| OperationError::invalid_arguments(e.to_string()))
}

/// A named operation bound to its handler.
#[derive(Clone)]
pub struct Operation {
    info: OperationInfo,
    handler: Arc<dyn OperationHandler>,
}

impl Operation {
    /// Creates an operation that requires the integration's credential.
    #[must_use]
    pub fn authenticated(name: impl Into<String>, handler: Arc<dyn OperationHandler>) -> Self {
        Self::new(name, true, handler)
    }

    /// Creates an operation that runs without a credential.
    #[must_use]
    pub fn public(name: impl Into<String>, handler: Arc<dyn OperationHandler>) -> Self {
        Self::new(name, false, handler)
    }

    fn new(
        name: impl Into<String>,
        requires_credential: bool,
        handler: Arc<dyn OperationHandler>,
    ) -> Self {
        Self {
            info: OperationInfo {
                name: name.into(),
                description: String::new(),
                requires_credential,
            },
            handler,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.info.description = description.into();
        self
    }

    /// Returns the operation name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Returns whether the operation needs the credential.
    #[must_use]
    pub fn requires_credential(&self) -> bool {
        self.info.requires_credential
    }

    /// Returns the operation's public description.
    #[must_use]
    pub fn info(&self) -> &OperationInfo {
        &self.info
    }

    /// Returns the handler.
    #[must_use]
    pub fn handler(&self) -> &Arc<dyn OperationHandler> {
        &self.handler
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}
