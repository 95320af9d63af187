//! Raw network events and the subscription vocabulary used to filter them.

use std::{fmt, str::FromStr};

use {
    serde::{Deserialize, Serialize},
    tracing::warn,
};

// ── Event kinds ─────────────────────────────────────────────────────────────

/// Classification of inbound network events that can be routed to a webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Message,
    ReadReceipt,
    Presence,
    HistorySync,
    ChatPresence,
    /// Wildcard: matches every other kind.
    All,
}

impl EventKind {
    pub const VARIANTS: [EventKind; 6] = [
        EventKind::Message,
        EventKind::ReadReceipt,
        EventKind::Presence,
        EventKind::HistorySync,
        EventKind::ChatPresence,
        EventKind::All,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Message => "Message",
            Self::ReadReceipt => "ReadReceipt",
            Self::Presence => "Presence",
            Self::HistorySync => "HistorySync",
            Self::ChatPresence => "ChatPresence",
            Self::All => "All",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    /// Names are matched exactly; `"message"` is not `Message`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::VARIANTS
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

// ── Subscriptions ───────────────────────────────────────────────────────────

/// The set of event kinds a tenant wants delivered, in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscribedEvents(Vec<EventKind>);

impl SubscribedEvents {
    pub fn all() -> Self {
        Self(vec![EventKind::All])
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Build the effective set from a connect request.
    ///
    /// An empty request means `All`. Otherwise unrecognized names are dropped
    /// with a warning and duplicates collapse; a request made only of unknown
    /// names therefore yields an empty set, not `All`.
    pub fn from_request<S: AsRef<str>>(requested: &[S]) -> Self {
        if requested.is_empty() {
            return Self::all();
        }
        let mut kinds = Vec::new();
        for name in requested {
            let name = name.as_ref();
            match name.parse::<EventKind>() {
                Ok(kind) => {
                    if !kinds.contains(&kind) {
                        kinds.push(kind);
                    }
                },
                Err(_) => warn!(event_type = name, "message type discarded"),
            }
        }
        Self(kinds)
    }

    /// Parse the comma-joined form kept in the tenant store.
    pub fn parse_stored(stored: &str) -> Self {
        let mut kinds = Vec::new();
        for kind in stored
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .filter_map(|s| s.parse::<EventKind>().ok())
        {
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
        Self(kinds)
    }

    /// Whether an event of `kind` passes this tenant's filter.
    pub fn accepts(&self, kind: EventKind) -> bool {
        self.0.contains(&kind) || self.0.contains(&EventKind::All)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn kinds(&self) -> &[EventKind] {
        &self.0
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.0.iter().map(|k| k.as_str()).collect()
    }

    /// Comma-joined form, as persisted and reported by `/connect`.
    pub fn joined(&self) -> String {
        self.names().join(",")
    }
}

impl fmt::Display for SubscribedEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.joined())
    }
}

// ── Raw events ──────────────────────────────────────────────────────────────

/// An inbound chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEvent {
    pub id: String,
    pub chat: String,
    pub sender: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_name: Option<String>,
    #[serde(default)]
    pub is_group: bool,
    #[serde(default)]
    pub from_me: bool,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quoted_id: Option<String>,
}

/// Delivery/read receipt for messages we sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptEvent {
    pub chat: String,
    pub sender: String,
    pub message_ids: Vec<String>,
    /// `read`, `delivered`, `played`, ...
    pub receipt_type: String,
    pub timestamp: i64,
}

/// Online/offline status of a contact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEvent {
    pub from: String,
    pub unavailable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<i64>,
}

/// A batch of past conversations pushed after pairing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySyncEvent {
    pub sync_type: String,
    #[serde(default)]
    pub chunk_order: u32,
    #[serde(default)]
    pub progress: u32,
    #[serde(default)]
    pub conversations: serde_json::Value,
}

/// Typing / recording indicator inside a chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPresenceEvent {
    pub chat: String,
    pub sender: String,
    /// `composing` or `paused`.
    pub state: String,
    #[serde(default)]
    pub media: String,
}

/// Everything a [`crate::MessagingClient`] can report.
///
/// The first group drives the session lifecycle; the second is traffic that
/// may be forwarded to the tenant's webhook.
#[derive(Debug, Clone, PartialEq)]
pub enum NetworkEvent {
    /// A fresh pairing code is available for scanning.
    PairingCode { code: String },
    /// The account scanned the code; `identity` is our own JID.
    PairSuccess { identity: String },
    /// The pairing window closed without a scan.
    PairingTimeout,
    /// Authenticated and ready.
    Connected,
    /// The connection dropped; the device session is still valid.
    Disconnected { reason: String },
    /// The device was unlinked; a new pairing is required.
    LoggedOut { reason: String },

    Message(MessageEvent),
    Receipt(ReceiptEvent),
    Presence(PresenceEvent),
    HistorySync(HistorySyncEvent),
    ChatPresence(ChatPresenceEvent),
}

impl NetworkEvent {
    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::PairingCode { .. } => "pairing_code",
            Self::PairSuccess { .. } => "pair_success",
            Self::PairingTimeout => "pairing_timeout",
            Self::Connected => "connected",
            Self::Disconnected { .. } => "disconnected",
            Self::LoggedOut { .. } => "logged_out",
            Self::Message(_) => "message",
            Self::Receipt(_) => "receipt",
            Self::Presence(_) => "presence",
            Self::HistorySync(_) => "history_sync",
            Self::ChatPresence(_) => "chat_presence",
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[test]
    fn empty_request_means_all() {
        let subs = SubscribedEvents::from_request::<&str>(&[]);
        assert_eq!(subs, SubscribedEvents::all());
        assert_eq!(subs.joined(), "All");
    }

    #[test]
    fn unknown_only_request_is_empty_not_all() {
        let subs = SubscribedEvents::from_request(&["Bogus"]);
        assert!(subs.is_empty());
        assert_eq!(subs.joined(), "");
        assert!(!subs.accepts(EventKind::Message));
    }

    #[test]
    fn unknown_entries_dropped_known_kept() {
        let subs = SubscribedEvents::from_request(&["Bogus", "Presence", "Message", "Presence"]);
        assert_eq!(subs.kinds(), &[EventKind::Presence, EventKind::Message]);
        assert_eq!(subs.joined(), "Presence,Message");
    }

    #[test]
    fn names_are_case_sensitive() {
        let subs = SubscribedEvents::from_request(&["message"]);
        assert!(subs.is_empty());
    }

    #[rstest]
    #[case(&["Presence"], EventKind::Presence, true)]
    #[case(&["All"], EventKind::Presence, true)]
    #[case(&["Message"], EventKind::Presence, false)]
    #[case(&["Message", "ReadReceipt"], EventKind::ReadReceipt, true)]
    #[case(&["HistorySync"], EventKind::ChatPresence, false)]
    fn filter_accepts(#[case] requested: &[&str], #[case] kind: EventKind, #[case] expected: bool) {
        let subs = SubscribedEvents::from_request(requested);
        assert_eq!(subs.accepts(kind), expected);
    }

    #[test]
    fn stored_form_roundtrips() {
        let subs = SubscribedEvents::parse_stored("Message, ChatPresence,,Nope");
        assert_eq!(subs.kinds(), &[EventKind::Message, EventKind::ChatPresence]);
        assert!(SubscribedEvents::parse_stored("").is_empty());
    }

    #[test]
    fn message_payload_serializes_camel_case() {
        let msg = MessageEvent {
            id: "ABC".into(),
            chat: "1@s.whatsapp.net".into(),
            sender: "1@s.whatsapp.net".into(),
            push_name: Some("Ana".into()),
            is_group: false,
            from_me: false,
            timestamp: 1_700_000_000,
            body: Some("hi".into()),
            media_type: None,
            quoted_id: None,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["pushName"], "Ana");
        assert_eq!(json["body"], "hi");
        assert!(json.get("mediaType").is_none());
    }
}
