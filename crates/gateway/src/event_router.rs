//! Per-tenant classification, filtering and ordered forwarding of network
//! traffic to the tenant's webhook.
//!
//! Each connected session owns one router task fed through an unbounded
//! queue. Events are delivered one at a time in arrival order, so a slow
//! webhook delays later events of the same tenant but never those of another.

use std::sync::Arc;

use {
    serde_json::Value,
    tokio::{sync::mpsc, task::JoinHandle},
    tracing::{debug, warn},
};

use wabridge_messaging::{EventKind, NetworkEvent, SubscribedEvents, TenantId};

use crate::{credential_cache::CredentialCache, webhook::WebhookDispatcher};

#[cfg(feature = "metrics")]
use wabridge_metrics::{counter, events as event_metrics, labels};

/// Map a raw event to its routable kind. Lifecycle events have none.
pub fn classify(event: &NetworkEvent) -> Option<EventKind> {
    match event {
        NetworkEvent::Message(_) => Some(EventKind::Message),
        NetworkEvent::Receipt(_) => Some(EventKind::ReadReceipt),
        NetworkEvent::Presence(_) => Some(EventKind::Presence),
        NetworkEvent::HistorySync(_) => Some(EventKind::HistorySync),
        NetworkEvent::ChatPresence(_) => Some(EventKind::ChatPresence),
        NetworkEvent::PairingCode { .. }
        | NetworkEvent::PairSuccess { .. }
        | NetworkEvent::PairingTimeout
        | NetworkEvent::Connected
        | NetworkEvent::Disconnected { .. }
        | NetworkEvent::LoggedOut { .. } => None,
    }
}

fn payload(event: &NetworkEvent) -> serde_json::Result<Value> {
    match event {
        NetworkEvent::Message(e) => serde_json::to_value(e),
        NetworkEvent::Receipt(e) => serde_json::to_value(e),
        NetworkEvent::Presence(e) => serde_json::to_value(e),
        NetworkEvent::HistorySync(e) => serde_json::to_value(e),
        NetworkEvent::ChatPresence(e) => serde_json::to_value(e),
        _ => Ok(Value::Null),
    }
}

/// Handle to a running router task.
pub struct EventRouter {
    tx: mpsc::UnboundedSender<NetworkEvent>,
    task: JoinHandle<()>,
}

struct RouterTask {
    tenant_id: TenantId,
    token: String,
    subscriptions: SubscribedEvents,
    cache: Arc<CredentialCache>,
    dispatcher: Arc<WebhookDispatcher>,
}

impl EventRouter {
    pub fn spawn(
        tenant_id: TenantId,
        token: String,
        subscriptions: SubscribedEvents,
        cache: Arc<CredentialCache>,
        dispatcher: Arc<WebhookDispatcher>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = RouterTask {
            tenant_id,
            token,
            subscriptions,
            cache,
            dispatcher,
        };
        let task = tokio::spawn(task.run(rx));
        Self { tx, task }
    }

    /// Queue an event for routing. Never blocks.
    pub fn route(&self, event: NetworkEvent) {
        if self.tx.send(event).is_err() {
            debug!("event router already stopped, event dropped");
        }
    }

    /// Stop accepting events. Already queued events are still delivered by
    /// the returned task.
    pub fn close(self) -> JoinHandle<()> {
        drop(self.tx);
        self.task
    }
}

impl RouterTask {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<NetworkEvent>) {
        while let Some(event) = rx.recv().await {
            self.forward(event).await;
        }
        debug!(tenant_id = self.tenant_id, "event router stopped");
    }

    async fn forward(&self, event: NetworkEvent) {
        let Some(kind) = classify(&event) else {
            return;
        };

        #[cfg(feature = "metrics")]
        counter!(event_metrics::RECEIVED_TOTAL, labels::KIND => kind.as_str()).increment(1);

        if !self.subscriptions.accepts(kind) {
            debug!(tenant_id = self.tenant_id, %kind, "event not subscribed, dropped");
            #[cfg(feature = "metrics")]
            counter!(event_metrics::FILTERED_TOTAL, labels::KIND => kind.as_str()).increment(1);
            return;
        }

        let payload = match payload(&event) {
            Ok(v) => v,
            Err(e) => {
                warn!(tenant_id = self.tenant_id, %kind, error = %e, "failed to serialize event");
                return;
            },
        };

        // Resolved per event so webhook changes apply to live sessions.
        let url = match self.cache.resolve(&self.token).await {
            Ok(Some(record)) => record.webhook,
            Ok(None) => {
                warn!(tenant_id = self.tenant_id, "tenant vanished, event dropped");
                return;
            },
            Err(e) => {
                warn!(tenant_id = self.tenant_id, error = %e, "failed to resolve webhook, event dropped");
                return;
            },
        };

        if let Err(e) = self.dispatcher.deliver(&url, kind, &payload).await {
            warn!(
                tenant_id = self.tenant_id,
                %kind,
                error = %e,
                "webhook delivery failed, event dropped"
            );
        }
    }
}
