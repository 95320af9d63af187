//! The per-tenant session task.
//!
//! A supervisor owns the lifecycle side of its tenant's client: it connects,
//! follows pairing, reconnects with bounded backoff after transient drops
//! and tears the client down when told to stop or when the device is
//! logged out. Request handlers only ever borrow the client for sends.

use std::sync::Arc;

use {
    tokio::sync::mpsc,
    tracing::{debug, error, info, warn},
};

use wabridge_messaging::{MessagingClient, NetworkEvent, TenantRecord};

use crate::{
    credential_cache::RecordField,
    event_router::EventRouter,
    registry::{ConnectivityState, SessionContext, SessionHandle, StopMode},
};

#[cfg(feature = "metrics")]
use wabridge_metrics::{counter, session as session_metrics};

/// How a supervisor run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// Clean stop; identity and subscriptions are kept.
    Stopped,
    /// Device unlinked; pairing state was cleared.
    LoggedOut,
    Failed(String),
}

pub(crate) struct Supervisor {
    handle: Arc<SessionHandle>,
    record: TenantRecord,
    context: Arc<SessionContext>,
}

impl Supervisor {
    pub(crate) fn new(
        handle: Arc<SessionHandle>,
        record: TenantRecord,
        context: Arc<SessionContext>,
    ) -> Self {
        Self {
            handle,
            record,
            context,
        }
    }

    pub(crate) async fn run(self) -> Outcome {
        let tenant_id = self.record.id;
        let Some(client) = self.handle.client_slot().read().await.clone() else {
            return Outcome::Failed("client released before start".into());
        };

        let (tx, mut events) = mpsc::unbounded_channel();
        client.subscribe(tx);

        let mut router = None;
        let cancel = self.handle.cancel_token().clone();
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => match self.handle.stop_mode() {
                Some(StopMode::Logout) => Outcome::LoggedOut,
                _ => Outcome::Stopped,
            },
            outcome = self.drive(client.as_ref(), &mut events, &mut router) => outcome,
        };
        drop(client);

        self.teardown(&outcome, router).await;
        if let Outcome::Failed(reason) = &outcome {
            error!(tenant_id, %reason, "session failed");
        }
        outcome
    }

    async fn drive(
        &self,
        client: &dyn MessagingClient,
        events: &mut mpsc::UnboundedReceiver<NetworkEvent>,
        router: &mut Option<EventRouter>,
    ) -> Outcome {
        let tenant_id = self.record.id;
        self.handle.set_state(ConnectivityState::Connecting);
        if let Err(e) = client.connect().await {
            return Outcome::Failed(format!("connect failed: {e}"));
        }

        let mut attempt = 0;
        while let Some(event) = events.recv().await {
            match event {
                NetworkEvent::PairingCode { code } => {
                    info!(tenant_id, "pairing code issued");
                    self.persist(RecordField::PairingCode(code)).await;
                    self.handle.set_state(ConnectivityState::AwaitingPairing);
                },
                NetworkEvent::PairSuccess { identity } => {
                    info!(tenant_id, %identity, "device paired");
                    self.persist(RecordField::Paired(identity)).await;
                },
                NetworkEvent::PairingTimeout => {
                    self.persist(RecordField::PairingCode(String::new())).await;
                    return Outcome::Failed("pairing timed out".into());
                },
                NetworkEvent::Connected => {
                    attempt = 0;
                    if router.is_none() {
                        let subscriptions = self.handle.subscriptions().clone();
                        self.persist(RecordField::Events(subscriptions.joined()))
                            .await;
                        *router = Some(EventRouter::spawn(
                            tenant_id,
                            self.record.token.clone(),
                            subscriptions,
                            Arc::clone(&self.context.cache),
                            Arc::clone(&self.context.dispatcher),
                        ));
                    }
                    self.handle.set_state(ConnectivityState::Connected);
                },
                NetworkEvent::Disconnected { reason } => {
                    self.handle.set_state(ConnectivityState::Disconnected);
                    if let Err(fatal) = self.reconnect(client, &mut attempt, &reason).await {
                        return Outcome::Failed(fatal);
                    }
                },
                NetworkEvent::LoggedOut { reason } => {
                    warn!(tenant_id, %reason, "device logged out by the network");
                    return Outcome::LoggedOut;
                },
                traffic => match router {
                    Some(router) => router.route(traffic),
                    None => debug!(
                        tenant_id,
                        event = traffic.label(),
                        "event before connection, dropped"
                    ),
                },
            }
        }
        Outcome::Failed("client event stream closed".into())
    }

    /// Retry `connect` with bounded backoff. `attempt` counts consecutive
    /// failures and is reset by the caller once `Connected` arrives.
    async fn reconnect(
        &self,
        client: &dyn MessagingClient,
        attempt: &mut u32,
        reason: &str,
    ) -> Result<(), String> {
        let tenant_id = self.record.id;
        let policy = &self.context.reconnect;
        loop {
            *attempt += 1;
            if *attempt > policy.max_attempts {
                return Err(format!(
                    "gave up after {} reconnect attempts: {reason}",
                    policy.max_attempts
                ));
            }

            let delay = policy.backoff(*attempt);
            warn!(
                tenant_id,
                attempt = *attempt,
                delay_ms = delay.as_millis() as u64,
                %reason,
                "connection lost, reconnecting"
            );
            #[cfg(feature = "metrics")]
            counter!(session_metrics::RECONNECTS_TOTAL).increment(1);

            tokio::time::sleep(delay).await;
            self.handle.set_state(ConnectivityState::Connecting);
            match client.connect().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(tenant_id, attempt = *attempt, error = %e, "reconnect attempt failed");
                    self.handle.set_state(ConnectivityState::Disconnected);
                },
            }
        }
    }

    async fn teardown(&self, outcome: &Outcome, router: Option<EventRouter>) {
        let tenant_id = self.record.id;
        if let Some(router) = router {
            // Already queued events still drain in the background.
            drop(router.close());
        }

        // Waits for in-flight sends holding a lease.
        let client = self.handle.client_slot().write().await.take();
        if let Some(client) = client
            && let Err(e) = client.disconnect().await
        {
            warn!(tenant_id, error = %e, "disconnect failed during teardown");
        }

        if *outcome == Outcome::LoggedOut {
            self.persist(RecordField::ClearPairing).await;
        }
    }

    async fn persist(&self, field: RecordField) {
        if let Err(e) = self
            .context
            .cache
            .invalidate(&self.record.token, field)
            .await
        {
            error!(tenant_id = self.record.id, error = %e, "failed to persist session update");
        }
    }
}
