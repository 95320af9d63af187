use std::sync::Arc;

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    tokio::sync::mpsc,
};

use crate::{Jid, NetworkEvent, Result, TenantRecord};

/// Where a client pushes the events it observes. Unbounded so the network
/// reader never blocks on a slow session task.
pub type EventSink = mpsc::UnboundedSender<NetworkEvent>;

/// Reference to the message being replied to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotedMessage {
    pub stanza_id: String,
    pub participant: String,
}

/// A text message to send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingText {
    pub to: Jid,
    pub body: String,
    /// Caller-chosen message id; the client generates one when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quoted: Option<QuotedMessage>,
}

/// What the network acknowledged for a sent message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReceipt {
    pub id: String,
    /// Server timestamp, seconds since the epoch.
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatPresenceState {
    Composing,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatPresenceMedia {
    #[default]
    Text,
    Audio,
}

/// Result of asking the network whether a phone number has an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCheck {
    pub query: String,
    pub is_in_whatsapp: bool,
    #[serde(default)]
    pub jid: String,
    #[serde(default)]
    pub verified_name: String,
}

/// One tenant's connection to the messaging network.
///
/// Implementations are shared between the session supervisor and request
/// handlers, so every method takes `&self`.
#[async_trait]
pub trait MessagingClient: Send + Sync {
    /// Register the sink that receives this client's events. Replaces any
    /// previously registered sink.
    fn subscribe(&self, sink: EventSink);

    /// Open the connection. Returns once the transport is up; pairing and
    /// authentication progress arrive as events.
    async fn connect(&self) -> Result<()>;

    /// Close the connection, keeping device credentials.
    async fn disconnect(&self) -> Result<()>;

    /// Unlink the device on the network side and discard credentials.
    async fn logout(&self) -> Result<()>;

    fn is_connected(&self) -> bool;

    fn is_logged_in(&self) -> bool;

    async fn send_text(&self, message: OutgoingText) -> Result<SendReceipt>;

    async fn send_reaction(&self, chat: &Jid, message_id: &str, emoji: &str)
    -> Result<SendReceipt>;

    async fn mark_read(&self, chat: &Jid, sender: Option<&Jid>, ids: &[String]) -> Result<()>;

    async fn send_chat_presence(
        &self,
        chat: &Jid,
        state: ChatPresenceState,
        media: ChatPresenceMedia,
    ) -> Result<()>;

    async fn check_users(&self, phones: &[String]) -> Result<Vec<UserCheck>>;
}

/// Builds clients bound to a tenant's stored device identity.
pub trait ClientFactory: Send + Sync {
    fn create(&self, tenant: &TenantRecord) -> Result<Arc<dyn MessagingClient>>;
}
