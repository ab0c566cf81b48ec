//! The single-application server.
//!
//! Holds at most one [`HostedApplication`], dispatches operations to it,
//! and serves the HTTP surface until told to shut down.

use crate::dispatch::{DispatchRequest, DispatchState, DispatchTrace};
use crate::error::{DispatchError, ServerError};
use crate::routes;
use keyhost_application::{ConfigurationError, HostedApplication, OperationContext, OperationError};
use serde_json::Value as JsonValue;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{info, instrument, warn};

/// Counts dispatches that are still running.
#[derive(Debug, Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    fn enter(self: &Arc<Self>) -> InFlightGuard {
        self.count.fetch_add(1, Ordering::SeqCst);
        InFlightGuard(Arc::clone(self))
    }

    fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// Serves exactly one hosted application.
#[derive(Debug)]
pub struct SingleAppServer {
    bind_address: SocketAddr,
    application: OnceLock<Arc<HostedApplication>>,
    in_flight: Arc<InFlight>,
}

impl SingleAppServer {
    /// Creates a server that will listen on `bind_address`.
    #[must_use]
    pub fn new(bind_address: SocketAddr) -> Self {
        Self {
            bind_address,
            application: OnceLock::new(),
            in_flight: Arc::new(InFlight::default()),
        }
    }

    /// Returns the address the server listens on.
    #[must_use]
    pub fn bind_address(&self) -> SocketAddr {
        self.bind_address
    }

    /// Registers the application this server hosts.
    ///
    /// # Errors
    ///
    /// Returns `ApplicationAlreadyRegistered` if an application is already
    /// registered. The first registration stays in place.
    pub fn register_application(
        &self,
        application: HostedApplication,
    ) -> keyhost_core::Result<(), ConfigurationError> {
        let name = application.name().to_string();
        let service = application.integration().service_name().to_string();

        if let Err(rejected) = self.application.set(Arc::new(application)) {
            let existing = self
                .application
                .get()
                .map(|app| app.name().to_string())
                .unwrap_or_default();
            warn!(existing = %existing, rejected = %rejected.name(), "second application registration refused");
            return Err(ConfigurationError::ApplicationAlreadyRegistered {
                existing,
                rejected: name,
            }
            .into());
        }

        info!(application = %name, service = %service, "application registered");
        Ok(())
    }

    /// Returns the registered application, if any.
    #[must_use]
    pub fn application(&self) -> Option<&Arc<HostedApplication>> {
        self.application.get()
    }

    /// Dispatches an operation with no cancellation.
    ///
    /// # Errors
    ///
    /// See [`dispatch_request`](Self::dispatch_request).
    pub async fn dispatch(
        &self,
        operation: &str,
        arguments: JsonValue,
    ) -> Result<JsonValue, DispatchError> {
        self.dispatch_until(operation, arguments, std::future::pending())
            .await
    }

    /// Dispatches an operation, giving up if `cancelled` completes before
    /// the handler starts.
    ///
    /// # Errors
    ///
    /// See [`dispatch_request`](Self::dispatch_request).
    pub async fn dispatch_until(
        &self,
        operation: &str,
        arguments: JsonValue,
        cancelled: impl Future<Output = ()> + Send,
    ) -> Result<JsonValue, DispatchError> {
        self.dispatch_request(DispatchRequest::new(operation, arguments), cancelled)
            .await
    }

    /// Runs one dispatch through its lifecycle.
    ///
    /// Operations declared as requiring a credential get it from the
    /// application's integration before the handler runs. Other operations
    /// never touch the credential store.
    ///
    /// Once the handler starts it runs to completion in its own task, even
    /// if this future is dropped.
    ///
    /// # Errors
    ///
    /// - `NoApplication` if nothing is registered
    /// - `UnknownOperation` if the operation is not declared
    /// - `AuthenticationRequired` or `CredentialBackend` if the credential
    ///   could not be obtained; the handler is not invoked
    /// - `Cancelled` if `cancelled` fired before the handler started
    /// - `Operation` with the handler's own error
    #[instrument(
        skip_all,
        fields(request_id = %request.request_id, operation = %request.operation)
    )]
    pub async fn dispatch_request(
        &self,
        request: DispatchRequest,
        cancelled: impl Future<Output = ()> + Send,
    ) -> Result<JsonValue, DispatchError> {
        let DispatchRequest {
            request_id,
            operation,
            arguments,
        } = request;
        let mut trace = DispatchTrace::new(request_id);

        let Some(app) = self.application.get().cloned() else {
            trace.advance(DispatchState::Rejected);
            return Err(DispatchError::NoApplication);
        };
        let Some(op) = app.operation(&operation) else {
            trace.advance(DispatchState::Rejected);
            warn!("unknown operation");
            return Err(DispatchError::UnknownOperation { operation });
        };

        let guard = self.in_flight.enter();
        trace.advance(DispatchState::CredentialCheck);

        let integration = app.integration();
        let authorize = async {
            if op.requires_credential() {
                integration.get_credential().await.map(Some)
            } else {
                Ok(None)
            }
        };

        tokio::pin!(cancelled);
        let authorized = tokio::select! {
            biased;
            () = &mut cancelled => None,
            result = authorize => Some(result),
        };

        let credential = match authorized {
            None => {
                trace.advance(DispatchState::Cancelled);
                info!("dispatch cancelled before execution");
                return Err(DispatchError::Cancelled);
            }
            Some(Err(e)) => {
                trace.advance(DispatchState::Unauthorized);
                trace.advance(DispatchState::Rejected);
                warn!(error = %e, "credential unavailable, operation not invoked");
                return Err(e.into());
            }
            Some(Ok(credential)) => credential,
        };

        trace.advance(DispatchState::Authorized);
        trace.advance(DispatchState::Executing);

        let granted = credential.clone();
        let context = OperationContext::new(request_id, integration.clone(), credential);
        let handler = Arc::clone(op.handler());
        let task = tokio::spawn(async move {
            let _guard = guard;
            handler.call(context, arguments).await
        });

        let result = match task.await {
            Ok(result) => result,
            Err(e) => Err(OperationError::failed(format!("operation task failed: {e}"))),
        };

        match result {
            Ok(value) => {
                trace.advance(DispatchState::Completed);
                info!("operation completed");
                Ok(value)
            }
            Err(e) => {
                trace.advance(DispatchState::Failed);
                if matches!(e, OperationError::CredentialRejected { .. }) {
                    match &granted {
                        Some(rejected) => {
                            integration.invalidate_rejected(rejected);
                        }
                        None => integration.invalidate(),
                    }
                }
                warn!(error = %e, "operation failed");
                Err(e.into())
            }
        }
    }

    /// Binds the configured address and serves until `shutdown` completes.
    ///
    /// # Errors
    ///
    /// Returns an error if no application is registered, the address cannot
    /// be bound, or the server fails while running.
    pub async fn run(
        self: Arc<Self>,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> keyhost_core::Result<(), ServerError> {
        if self.application.get().is_none() {
            return Err(ServerError::from(ConfigurationError::NoApplication).into());
        }

        let listener =
            TcpListener::bind(self.bind_address)
                .await
                .map_err(|e| ServerError::Bind {
                    address: self.bind_address.to_string(),
                    reason: e.to_string(),
                })?;

        self.serve(listener, shutdown).await
    }

    /// Serves on an already-bound listener until `shutdown` completes, then
    /// waits for running operations to finish.
    ///
    /// # Errors
    ///
    /// Returns an error if no application is registered or the server fails
    /// while running.
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> keyhost_core::Result<(), ServerError> {
        let Some(app) = self.application.get() else {
            return Err(ServerError::from(ConfigurationError::NoApplication).into());
        };

        let address = listener
            .local_addr()
            .map_err(|e| ServerError::Serve {
                reason: e.to_string(),
            })?;
        info!(
            application = %app.name(),
            service = %app.integration().service_name(),
            "listening on http://{}",
            address
        );

        let router = routes::router(Arc::clone(&self));
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| ServerError::Serve {
                reason: e.to_string(),
            })?;

        let running = self.in_flight.count();
        if running > 0 {
            info!(running, "waiting for in-flight operations");
        }
        self.in_flight.wait_idle().await;
        info!("server stopped");
        Ok(())
    }
}

/// Completes on Ctrl-C, or SIGTERM on Unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received");
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use keyhost_application::{Operation, handler_fn};
    use keyhost_integration::{CredentialStore, Integration, MemoryCredentialStore, StoreError};
    use secrecy::SecretString;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::{Semaphore, oneshot};

    /// Memory store that counts resolves and can hold them until released.
    pub(crate) struct CountingStore {
        inner: MemoryCredentialStore,
        calls: AtomicUsize,
        gate: Option<Semaphore>,
    }

    impl CountingStore {
        pub(crate) fn new(inner: MemoryCredentialStore) -> Self {
            Self {
                inner,
                calls: AtomicUsize::new(0),
                gate: None,
            }
        }

        fn gated(inner: MemoryCredentialStore) -> Self {
            Self {
                gate: Some(Semaphore::new(0)),
                ..Self::new(inner)
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn release(&self) {
            if let Some(gate) = &self.gate {
                gate.add_permits(1);
            }
        }
    }

    #[async_trait]
    impl CredentialStore for CountingStore {
        fn kind(&self) -> &'static str {
            "counting"
        }

        async fn resolve(&self, name: &str) -> Result<Option<SecretString>, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.acquire().await.expect("gate closed").forget();
            }
            self.inner.resolve(name).await
        }
    }

    /// A "jira" application whose handlers count their invocations.
    pub(crate) struct Fixture {
        pub(crate) server: Arc<SingleAppServer>,
        pub(crate) store: Arc<CountingStore>,
        pub(crate) invocations: Arc<AtomicUsize>,
    }

    fn test_address() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 0))
    }

    fn fixture_with(store: CountingStore) -> Fixture {
        let store = Arc::new(store);
        let invocations = Arc::new(AtomicUsize::new(0));
        let integration = Integration::new("jira", store.clone());

        let created = invocations.clone();
        let create_issue = handler_fn(move |context, arguments| {
            let created = created.clone();
            async move {
                created.fetch_add(1, Ordering::SeqCst);
                let token = context.credential()?.expose().to_string();
                Ok(json!({ "key": "OPS-1", "summary": arguments["summary"], "token": token }))
            }
        });

        let pinged = invocations.clone();
        let ping = handler_fn(move |_, _| {
            let pinged = pinged.clone();
            async move {
                pinged.fetch_add(1, Ordering::SeqCst);
                Ok(json!("pong"))
            }
        });

        let rejected = handler_fn(|_, _| async {
            Err(OperationError::credential_rejected("token revoked"))
        });

        let app = HostedApplication::builder("jira", integration)
            .operation(Operation::authenticated("createIssue", create_issue))
            .operation(Operation::public("ping", ping).with_description("Liveness check"))
            .operation(Operation::authenticated("revoked", rejected))
            .build()
            .unwrap();

        let server = Arc::new(SingleAppServer::new(test_address()));
        server.register_application(app).unwrap();

        Fixture {
            server,
            store,
            invocations,
        }
    }

    pub(crate) fn fixture(store: MemoryCredentialStore) -> Fixture {
        fixture_with(CountingStore::new(store))
    }

    pub(crate) fn jira_secret() -> MemoryCredentialStore {
        MemoryCredentialStore::new().with_secret("jira", "secret-abc")
    }

    #[tokio::test]
    async fn missing_credential_rejects_without_invoking_handler() {
        let f = fixture(MemoryCredentialStore::new());

        let err = f
            .server
            .dispatch("createIssue", json!({ "summary": "Disk full" }))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            DispatchError::AuthenticationRequired {
                service: "jira".to_string()
            }
        );
        assert_eq!(f.invocations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn authenticated_operation_receives_credential() {
        let f = fixture(jira_secret());

        let result = f
            .server
            .dispatch("createIssue", json!({ "summary": "Disk full" }))
            .await
            .unwrap();

        assert_eq!(result["token"], "secret-abc");
        assert_eq!(result["summary"], "Disk full");
        assert_eq!(f.invocations.load(Ordering::SeqCst), 1);
        assert_eq!(f.store.calls(), 1);

        f.server
            .dispatch("createIssue", json!({ "summary": "Again" }))
            .await
            .unwrap();
        assert_eq!(f.store.calls(), 1);
    }

    #[tokio::test]
    async fn public_operation_never_consults_store() {
        let f = fixture(MemoryCredentialStore::new());

        let result = f.server.dispatch("ping", JsonValue::Null).await.unwrap();

        assert_eq!(result, json!("pong"));
        assert_eq!(f.store.calls(), 0);
    }

    #[tokio::test]
    async fn unknown_operation() {
        let f = fixture(jira_secret());

        let err = f
            .server
            .dispatch("deleteEverything", JsonValue::Null)
            .await
            .unwrap_err();

        assert_eq!(
            err,
            DispatchError::UnknownOperation {
                operation: "deleteEverything".to_string()
            }
        );
        assert_eq!(f.store.calls(), 0);
    }

    #[tokio::test]
    async fn dispatch_without_application() {
        let server = SingleAppServer::new(test_address());
        let err = server.dispatch("ping", JsonValue::Null).await.unwrap_err();
        assert_eq!(err, DispatchError::NoApplication);
    }

    #[tokio::test]
    async fn second_registration_is_refused() {
        let f = fixture(jira_secret());
        let other = HostedApplication::builder(
            "github",
            Integration::new("github", Arc::new(MemoryCredentialStore::new())),
        )
        .build()
        .unwrap();

        assert!(f.server.register_application(other).is_err());
        let app = f.server.application().unwrap();
        assert_eq!(app.name(), "jira");
    }

    #[tokio::test]
    async fn run_without_application_fails_before_binding() {
        let server = Arc::new(SingleAppServer::new(test_address()));
        let result = server.run(std::future::pending()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn credential_rejected_invalidates_cache() {
        let f = fixture(jira_secret());

        f.server
            .dispatch("createIssue", json!({ "summary": "Disk full" }))
            .await
            .unwrap();
        assert!(f.server.application().unwrap().integration().cached().is_some());

        let err = f
            .server
            .dispatch("revoked", JsonValue::Null)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "credential_rejected");
        assert!(f.server.application().unwrap().integration().cached().is_none());

        f.server
            .dispatch("createIssue", json!({ "summary": "Disk full" }))
            .await
            .unwrap();
        assert_eq!(f.store.calls(), 2);
    }

    #[tokio::test]
    async fn late_rejection_keeps_newer_credential() {
        let memory = Arc::new(jira_secret());
        let integration = Integration::new("jira", memory.clone());

        // Rotates the secret and caches the new one before reporting the
        // old one as rejected.
        let rotating = memory.clone();
        let rotate_then_reject = handler_fn(move |context, _| {
            let rotating = rotating.clone();
            async move {
                rotating.insert("jira", "rotated");
                context.integration().invalidate();
                context
                    .integration()
                    .get_credential()
                    .await
                    .map_err(|e| OperationError::failed(e.to_string()))?;
                Err(OperationError::credential_rejected("token revoked"))
            }
        });

        let app = HostedApplication::builder("jira", integration.clone())
            .operation(Operation::authenticated("rotateThenReject", rotate_then_reject))
            .build()
            .unwrap();
        let server = SingleAppServer::new(test_address());
        server.register_application(app).unwrap();

        let err = server
            .dispatch("rotateThenReject", JsonValue::Null)
            .await
            .unwrap_err();

        assert_eq!(err.code(), "credential_rejected");
        assert_eq!(integration.cached().unwrap().expose(), "rotated");
    }

    #[tokio::test]
    async fn cancelled_during_resolution_still_populates_cache() {
        let f = fixture_with(CountingStore::gated(jira_secret()));
        let (cancel, cancelled) = oneshot::channel::<()>();

        let server = f.server.clone();
        let dispatch = tokio::spawn(async move {
            server
                .dispatch_until("createIssue", json!({ "summary": "x" }), async move {
                    let _ = cancelled.await;
                })
                .await
        });

        while f.store.calls() == 0 {
            tokio::task::yield_now().await;
        }
        cancel.send(()).unwrap();

        let err = dispatch.await.unwrap().unwrap_err();
        assert_eq!(err, DispatchError::Cancelled);
        assert_eq!(f.invocations.load(Ordering::SeqCst), 0);

        f.store.release();
        let integration = f.server.application().unwrap().integration().clone();
        let credential = integration.get_credential().await.unwrap();
        assert_eq!(credential.expose(), "secret-abc");
        assert_eq!(f.store.calls(), 1);
    }

    #[tokio::test]
    async fn already_cancelled_request_never_executes() {
        let f = fixture(jira_secret());

        let err = f
            .server
            .dispatch_until("ping", JsonValue::Null, async {})
            .await
            .unwrap_err();

        assert_eq!(err, DispatchError::Cancelled);
        assert_eq!(f.invocations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn serve_stops_on_shutdown() {
        let f = fixture(jira_secret());
        let listener = TcpListener::bind(test_address()).await.unwrap();
        let (stop, stopped) = oneshot::channel::<()>();

        let handle = tokio::spawn(f.server.clone().serve(listener, async move {
            let _ = stopped.await;
        }));
        stop.send(()).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn in_flight_drains_to_idle() {
        let in_flight = Arc::new(InFlight::default());
        let guard = in_flight.enter();
        assert_eq!(in_flight.count(), 1);

        let waiter = {
            let in_flight = in_flight.clone();
            tokio::spawn(async move { in_flight.wait_idle().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(in_flight.count(), 0);
    }
}
