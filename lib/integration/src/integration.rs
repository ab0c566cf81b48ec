//! Binding of a service name to a credential store.
//!
//! An `Integration` resolves its credential lazily, caches it until told
//! otherwise, and never caches an absence or a failure.
//!
//! Cold-start resolution is single-flight: the first caller spawns one
//! resolution task and every concurrent caller waits on its result. The
//! task is detached from the callers, so a caller that gives up (request
//! cancelled, timeout) does not cancel the resolution; the result still
//! lands in the cache for the next caller.

use crate::credential::{Credential, CredentialStore};
use crate::error::AuthError;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

type Outcome = Option<Result<Credential, AuthError>>;

/// What the cache slot currently holds.
enum Slot {
    Empty,
    Resolving(watch::Receiver<Outcome>),
    Cached(Credential),
}

struct CacheState {
    slot: Slot,
    /// Bumped whenever a resolution starts or the cache is invalidated.
    /// A resolution only writes the cache if the generation it started
    /// under is still current.
    generation: u64,
}

struct Inner {
    service: String,
    store: Arc<dyn CredentialStore>,
    state: Mutex<CacheState>,
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[instrument(skip(self), fields(service = %self.service, store = self.store.kind()))]
    async fn resolve(&self) -> Result<Credential, AuthError> {
        match self.store.resolve(&self.service).await {
            Ok(Some(secret)) => {
                info!("credential resolved");
                Ok(Credential::new(self.service.clone(), secret))
            }
            Ok(None) => {
                warn!("credential not found in store");
                Err(AuthError::MissingCredential {
                    service: self.service.clone(),
                })
            }
            Err(e) => {
                error!(error = %e, "credential store failed");
                Err(AuthError::BackendFailure {
                    service: self.service.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn resolve_and_publish(self: Arc<Self>, generation: u64, tx: watch::Sender<Outcome>) {
        let outcome = self.resolve().await;

        {
            let mut state = self.lock_state();
            if state.generation == generation {
                state.slot = match &outcome {
                    Ok(credential) => Slot::Cached(credential.clone()),
                    Err(_) => Slot::Empty,
                };
            } else {
                debug!(service = %self.service, "cache invalidated during resolution, not caching result");
            }
        }

        tx.send_replace(Some(outcome));
    }

    /// Clears a resolution slot whose task went away without publishing.
    fn abandon(&self, generation: u64) {
        let mut state = self.lock_state();
        if state.generation == generation && matches!(state.slot, Slot::Resolving(_)) {
            state.slot = Slot::Empty;
        }
    }
}

/// A service name bound to the store its credential lives in.
///
/// Cloning produces another handle to the same integration and cache.
#[derive(Clone)]
pub struct Integration {
    inner: Arc<Inner>,
}

impl Integration {
    /// Binds a service name to a credential store.
    ///
    /// The store is shared; the cache is owned by this integration.
    #[must_use]
    pub fn new(service: impl Into<String>, store: Arc<dyn CredentialStore>) -> Self {
        Self {
            inner: Arc::new(Inner {
                service: service.into(),
                store,
                state: Mutex::new(CacheState {
                    slot: Slot::Empty,
                    generation: 0,
                }),
            }),
        }
    }

    /// Returns the service name this integration resolves.
    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.inner.service
    }

    /// Returns the kind of store this integration is bound to.
    #[must_use]
    pub fn store_kind(&self) -> &'static str {
        self.inner.store.kind()
    }

    /// Returns the cached credential without resolving.
    #[must_use]
    pub fn cached(&self) -> Option<Credential> {
        match &self.inner.lock_state().slot {
            Slot::Cached(credential) => Some(credential.clone()),
            Slot::Empty | Slot::Resolving(_) => None,
        }
    }

    /// Returns the credential, resolving it from the store if not cached.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `MissingCredential` if the store has no secret for the
    /// service and `BackendFailure` if the store failed. Neither is cached.
    pub async fn get_credential(&self) -> Result<Credential, AuthError> {
        let (mut rx, generation) = {
            let mut state = self.inner.lock_state();
            match &state.slot {
                Slot::Cached(credential) => {
                    debug!(service = %self.inner.service, "credential cache hit");
                    return Ok(credential.clone());
                }
                Slot::Resolving(rx) => {
                    debug!(service = %self.inner.service, "joining in-flight resolution");
                    (rx.clone(), state.generation)
                }
                Slot::Empty => {
                    debug!(service = %self.inner.service, "credential cache miss");
                    state.generation += 1;
                    let generation = state.generation;
                    let (tx, rx) = watch::channel(None);
                    state.slot = Slot::Resolving(rx.clone());
                    tokio::spawn(Arc::clone(&self.inner).resolve_and_publish(generation, tx));
                    (rx, generation)
                }
            }
        };

        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(outcome) => (*outcome).clone(),
            Err(_) => None,
        };

        match outcome {
            Some(result) => result,
            None => {
                self.inner.abandon(generation);
                Err(AuthError::BackendFailure {
                    service: self.inner.service.clone(),
                    reason: "credential resolution ended without a result".to_string(),
                })
            }
        }
    }

    /// Drops the cached credential so the next call re-resolves.
    ///
    /// A resolution already in flight still answers its waiters but does
    /// not populate the cache.
    pub fn invalidate(&self) {
        let mut state = self.inner.lock_state();
        state.generation += 1;
        state.slot = Slot::Empty;
        debug!(service = %self.inner.service, "credential cache invalidated");
    }

    /// Drops the cached credential only if it is still `rejected`.
    ///
    /// A rejection reported after the cache moved on to a newer credential
    /// leaves that credential in place. Returns true if the cache was
    /// cleared.
    pub fn invalidate_rejected(&self, rejected: &Credential) -> bool {
        let mut state = self.inner.lock_state();
        let current = matches!(&state.slot, Slot::Cached(cached) if cached.is_same(rejected));
        if !current {
            debug!(service = %self.inner.service, "rejected credential already replaced");
            return false;
        }
        state.generation += 1;
        state.slot = Slot::Empty;
        debug!(service = %self.inner.service, "rejected credential dropped from cache");
        true
    }
}

impl fmt::Debug for Integration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Integration")
            .field("service", &self.inner.service)
            .field("store", &self.inner.store.kind())
            .field("cached", &self.cached().is_some())
            .finish()
    }
}
