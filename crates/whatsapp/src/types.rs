//! JSON frames exchanged with the sidecar.

use {
    serde::{Deserialize, Serialize},
    wabridge_messaging::{
        ChatPresenceEvent, ChatPresenceMedia, ChatPresenceState, HistorySyncEvent, MessageEvent,
        PresenceEvent, QuotedMessage, ReceiptEvent,
    },
};

/// Frames we send to the sidecar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayMessage {
    /// Start (or resume) the device session stored under `auth_dir`.
    Login {
        account_id: String,
        auth_dir: String,
    },
    /// Close the socket for an account, keeping its credentials.
    Disconnect { account_id: String },
    /// Unlink the device and delete its credentials.
    Logout {
        request_id: String,
        account_id: String,
    },
    SendText {
        request_id: String,
        account_id: String,
        to: String,
        body: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        quoted: Option<QuotedMessage>,
    },
    React {
        request_id: String,
        account_id: String,
        chat: String,
        message_id: String,
        emoji: String,
    },
    MarkRead {
        request_id: String,
        account_id: String,
        chat: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender: Option<String>,
        ids: Vec<String>,
    },
    ChatPresence {
        request_id: String,
        account_id: String,
        chat: String,
        state: ChatPresenceState,
        media: ChatPresenceMedia,
    },
    CheckUsers {
        request_id: String,
        account_id: String,
        phones: Vec<String>,
    },
}

/// Frames the sidecar sends us.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SidecarMessage {
    Qr {
        account_id: String,
        qr: String,
    },
    PairSuccess {
        account_id: String,
        jid: String,
    },
    Connected {
        account_id: String,
        #[serde(default)]
        jid: Option<String>,
    },
    Disconnected {
        account_id: String,
        #[serde(default)]
        reason: String,
    },
    LoggedOut {
        account_id: String,
        #[serde(default)]
        reason: String,
    },
    PairingTimeout {
        account_id: String,
    },
    Message {
        account_id: String,
        #[serde(flatten)]
        message: MessageEvent,
    },
    Receipt {
        account_id: String,
        #[serde(flatten)]
        receipt: ReceiptEvent,
    },
    Presence {
        account_id: String,
        #[serde(flatten)]
        presence: PresenceEvent,
    },
    HistorySync {
        account_id: String,
        #[serde(flatten)]
        sync: HistorySyncEvent,
    },
    ChatPresenceUpdate {
        account_id: String,
        #[serde(flatten)]
        presence: ChatPresenceEvent,
    },
    /// Answer to a request carrying `request_id`.
    Result {
        request_id: String,
        success: bool,
        #[serde(default)]
        data: serde_json::Value,
        #[serde(default)]
        error: Option<String>,
    },
    Error {
        #[serde(default)]
        account_id: Option<String>,
        error: String,
    },
}

impl SidecarMessage {
    /// The account a frame belongs to, if any.
    pub fn account_id(&self) -> Option<&str> {
        match self {
            Self::Qr { account_id, .. }
            | Self::PairSuccess { account_id, .. }
            | Self::Connected { account_id, .. }
            | Self::Disconnected { account_id, .. }
            | Self::LoggedOut { account_id, .. }
            | Self::PairingTimeout { account_id }
            | Self::Message { account_id, .. }
            | Self::Receipt { account_id, .. }
            | Self::Presence { account_id, .. }
            | Self::HistorySync { account_id, .. }
            | Self::ChatPresenceUpdate { account_id, .. } => Some(account_id),
            Self::Error { account_id, .. } => account_id.as_deref(),
            Self::Result { .. } => None,
        }
    }
}
