//! Messaging client seam for wabridge.
//!
//! The gateway never speaks the messaging network's wire protocol itself.
//! Each tenant gets one [`MessagingClient`] built by a [`ClientFactory`]; the
//! client reports progress and inbound traffic as [`NetworkEvent`]s pushed
//! into an [`EventSink`].

pub mod address;
pub mod client;
pub mod error;
pub mod event;
pub mod store;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use {
    address::Jid,
    client::{
        ChatPresenceMedia, ChatPresenceState, ClientFactory, EventSink, MessagingClient,
        OutgoingText, QuotedMessage, SendReceipt, UserCheck,
    },
    error::{Error, Result},
    event::{
        ChatPresenceEvent, EventKind, HistorySyncEvent, MessageEvent, NetworkEvent,
        PresenceEvent, ReceiptEvent, SubscribedEvents,
    },
    store::{TenantId, TenantRecord, TenantStore},
};
