//! Directory of live tenant sessions.
//!
//! At most one [`SessionHandle`] exists per tenant. Mutations for a tenant go
//! through the map's entry API, which locks only that key's shard, so tenants
//! never wait on each other. A handle whose supervisor failed stays
//! registered (finished, with `fatal` set) until a later start replaces it
//! or a stop clears it.

use std::{
    ops::Deref,
    sync::{Arc, OnceLock},
    time::Duration,
};

use {
    dashmap::{DashMap, mapref::entry::Entry},
    serde::Serialize,
    tokio::sync::{OwnedRwLockReadGuard, RwLock, watch},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use {
    wabridge_config::ReconnectConfig,
    wabridge_messaging::{ClientFactory, MessagingClient, SubscribedEvents, TenantId, TenantRecord},
};

use crate::{
    credential_cache::CredentialCache,
    supervisor::{Outcome, Supervisor},
    webhook::WebhookDispatcher,
};

#[cfg(feature = "metrics")]
use wabridge_metrics::{counter, gauge, session as session_metrics};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("already connected")]
    AlreadyConnected,

    #[error("no session")]
    NoSession,

    #[error("not connected")]
    NotConnected,

    #[error("not logged in")]
    NotLoggedIn,

    #[error("timed out waiting for connection")]
    ConnectTimeout,

    #[error("session failed: {0}")]
    ConnectFailed(String),

    #[error(transparent)]
    Client(#[from] wabridge_messaging::Error),
}

/// Connectivity of one tenant session, driven only by its supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectivityState {
    Disconnected,
    Connecting,
    AwaitingPairing,
    Connected,
    LoggedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: ConnectivityState,
    /// Why the supervisor gave up, if it did.
    pub fatal: Option<String>,
    /// The supervisor task has returned.
    pub finished: bool,
}

/// How a stop request wants the session to end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    Disconnect,
    Logout,
}

/// Everything a supervisor needs besides its handle.
pub struct SessionContext {
    pub cache: Arc<CredentialCache>,
    pub factory: Arc<dyn ClientFactory>,
    pub dispatcher: Arc<WebhookDispatcher>,
    pub reconnect: ReconnectConfig,
}

type ClientSlot = Arc<RwLock<Option<Arc<dyn MessagingClient>>>>;

/// A live tenant session: the client, the stop signal and the observable
/// status.
pub struct SessionHandle {
    tenant_id: TenantId,
    subscriptions: SubscribedEvents,
    client: ClientSlot,
    cancel: CancellationToken,
    stop_mode: OnceLock<StopMode>,
    status: watch::Sender<SessionStatus>,
}

/// Shared access to a session's client.
///
/// Teardown takes the client out under a write lock, so it waits for every
/// outstanding lease to drop before disconnecting.
pub struct ClientLease {
    client: Arc<dyn MessagingClient>,
    _guard: OwnedRwLockReadGuard<Option<Arc<dyn MessagingClient>>>,
}

impl Deref for ClientLease {
    type Target = dyn MessagingClient;

    fn deref(&self) -> &Self::Target {
        self.client.as_ref()
    }
}

impl SessionHandle {
    fn new(
        tenant_id: TenantId,
        subscriptions: SubscribedEvents,
        client: Arc<dyn MessagingClient>,
    ) -> Self {
        let (status, _) = watch::channel(SessionStatus {
            state: ConnectivityState::Disconnected,
            fatal: None,
            finished: false,
        });
        Self {
            tenant_id,
            subscriptions,
            client: Arc::new(RwLock::new(Some(client))),
            cancel: CancellationToken::new(),
            stop_mode: OnceLock::new(),
            status,
        }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    /// The effective subscription set this session was started with.
    pub fn subscriptions(&self) -> &SubscribedEvents {
        &self.subscriptions
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn state(&self) -> ConnectivityState {
        self.status.borrow().state
    }

    pub fn is_finished(&self) -> bool {
        self.status.borrow().finished
    }

    /// Borrow the client for a send or query.
    pub async fn lease(&self) -> Result<ClientLease, SessionError> {
        let guard = Arc::clone(&self.client).read_owned().await;
        let client = guard.as_ref().map(Arc::clone).ok_or(SessionError::NotConnected)?;
        Ok(ClientLease {
            client,
            _guard: guard,
        })
    }

    /// Ask the supervisor to stop. Never blocks; the first mode wins.
    pub fn request_stop(&self, mode: StopMode) {
        let _ = self.stop_mode.set(mode);
        self.cancel.cancel();
    }

    /// Wait until the session can be used: a pairing code is out or the
    /// client is connected. Fails early if the supervisor gives up.
    pub async fn wait_ready(&self, timeout: Duration) -> Result<ConnectivityState, SessionError> {
        let mut rx = self.status.subscribe();
        let wait = rx.wait_for(|s| {
            s.finished
                || matches!(
                    s.state,
                    ConnectivityState::AwaitingPairing | ConnectivityState::Connected
                )
        });
        match tokio::time::timeout(timeout, wait).await {
            Ok(Ok(status)) if !status.finished => Ok(status.state),
            Ok(Ok(status)) => Err(SessionError::ConnectFailed(
                status.fatal.clone().unwrap_or_else(|| "session ended".into()),
            )),
            Ok(Err(_)) => Err(SessionError::ConnectFailed("session ended".into())),
            Err(_) => Err(SessionError::ConnectTimeout),
        }
    }

    /// Wait up to `timeout` for the supervisor task to return.
    pub async fn wait_finished(&self, timeout: Duration) -> bool {
        let mut rx = self.status.subscribe();
        matches!(
            tokio::time::timeout(timeout, rx.wait_for(|s| s.finished)).await,
            Ok(Ok(_))
        )
    }

    pub(crate) fn client_slot(&self) -> &ClientSlot {
        &self.client
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn stop_mode(&self) -> Option<StopMode> {
        self.stop_mode.get().copied()
    }

    pub(crate) fn set_state(&self, state: ConnectivityState) {
        self.status.send_if_modified(|s| {
            if s.state == state {
                return false;
            }
            debug!(tenant_id = self.tenant_id, from = ?s.state, to = ?state, "session state change");
            s.state = state;
            true
        });
    }

    fn finish(&self, state: ConnectivityState, fatal: Option<String>) {
        self.status.send_modify(|s| {
            s.state = state;
            s.fatal = fatal;
            s.finished = true;
        });
    }
}

pub struct SessionRegistry {
    sessions: DashMap<TenantId, Arc<SessionHandle>>,
    context: Arc<SessionContext>,
}

impl SessionRegistry {
    pub fn new(context: SessionContext) -> Arc<Self> {
        Arc::new(Self {
            sessions: DashMap::new(),
            context: Arc::new(context),
        })
    }

    /// Register a session for `record` and launch its supervisor.
    ///
    /// Fails with [`SessionError::AlreadyConnected`] while a live handle
    /// exists. A finished (failed) handle is replaced.
    pub fn start(
        self: &Arc<Self>,
        record: &TenantRecord,
        subscriptions: SubscribedEvents,
    ) -> Result<Arc<SessionHandle>, SessionError> {
        let entry = self.sessions.entry(record.id);
        if let Entry::Occupied(existing) = &entry
            && !existing.get().is_finished()
        {
            return Err(SessionError::AlreadyConnected);
        }

        let client = self.context.factory.create(record)?;
        let handle = Arc::new(SessionHandle::new(record.id, subscriptions, client));
        entry.insert(Arc::clone(&handle));

        info!(tenant_id = record.id, events = %handle.subscriptions, "session started");
        #[cfg(feature = "metrics")]
        {
            counter!(session_metrics::STARTED_TOTAL).increment(1);
            gauge!(session_metrics::ACTIVE).increment(1.0);
        }

        let supervisor = Supervisor::new(
            Arc::clone(&handle),
            record.clone(),
            Arc::clone(&self.context),
        );
        let registry = Arc::clone(self);
        let task_handle = Arc::clone(&handle);
        tokio::spawn(async move {
            let outcome = supervisor.run().await;
            registry.finish(&task_handle, outcome);
        });

        Ok(handle)
    }

    pub fn get(&self, tenant_id: TenantId) -> Result<Arc<SessionHandle>, SessionError> {
        self.sessions
            .get(&tenant_id)
            .map(|h| Arc::clone(h.value()))
            .ok_or(SessionError::NoSession)
    }

    /// Stop a tenant's session and wait (bounded) for teardown.
    ///
    /// With `logout` the device is unlinked first, on the caller's task; a
    /// failed logout leaves the session running.
    pub async fn stop(
        &self,
        tenant_id: TenantId,
        logout: bool,
        wait: Duration,
    ) -> Result<(), SessionError> {
        let handle = self.get(tenant_id)?;
        if handle.is_finished() {
            self.remove(&handle);
            return Err(SessionError::NotConnected);
        }

        if logout {
            let client = handle.lease().await?;
            if !client.is_connected() {
                return Err(SessionError::NotConnected);
            }
            if !client.is_logged_in() {
                return Err(SessionError::NotLoggedIn);
            }
            client.logout().await?;
            drop(client);
            handle.request_stop(StopMode::Logout);
        } else {
            handle.request_stop(StopMode::Disconnect);
        }

        if !handle.wait_finished(wait).await {
            warn!(tenant_id, "session did not stop in time");
        }
        Ok(())
    }

    /// Number of registered sessions, finished ones included.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Stop every session and wait (bounded) for all of them.
    pub async fn shutdown(&self, wait: Duration) {
        let handles: Vec<_> = self
            .sessions
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();
        if handles.is_empty() {
            return;
        }
        info!(count = handles.len(), "stopping all sessions");
        for handle in &handles {
            handle.request_stop(StopMode::Disconnect);
        }
        futures::future::join_all(handles.iter().map(|h| h.wait_finished(wait))).await;
    }

    fn finish(&self, handle: &Arc<SessionHandle>, outcome: Outcome) {
        let tenant_id = handle.tenant_id;
        match outcome {
            Outcome::Stopped => {
                self.remove(handle);
                handle.finish(ConnectivityState::Disconnected, None);
                info!(tenant_id, "session stopped");
            },
            Outcome::LoggedOut => {
                self.remove(handle);
                handle.finish(ConnectivityState::LoggedOut, None);
                info!(tenant_id, "session logged out");
            },
            Outcome::Failed(reason) => {
                #[cfg(feature = "metrics")]
                counter!(session_metrics::FAILURES_TOTAL).increment(1);
                handle.finish(ConnectivityState::Disconnected, Some(reason));
            },
        }
        #[cfg(feature = "metrics")]
        gauge!(session_metrics::ACTIVE).decrement(1.0);
    }

    /// Remove `handle` if it is still the registered one.
    fn remove(&self, handle: &Arc<SessionHandle>) {
        self.sessions
            .remove_if(&handle.tenant_id, |_, current| Arc::ptr_eq(current, handle));
    }
}
