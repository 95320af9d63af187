//! WhatsApp Web client for wabridge.
//!
//! The WhatsApp Web protocol itself is spoken by a Node.js sidecar. Each
//! tenant's [`SidecarClient`] opens its own WebSocket to the sidecar, asks it
//! to log the tenant's device in, and turns the sidecar's JSON frames into
//! [`wabridge_messaging::NetworkEvent`]s.

pub mod client;
pub mod process;
pub mod types;

pub use {
    client::{DEFAULT_SIDECAR_URL, SidecarClient, SidecarClientFactory, SidecarSettings},
    process::{SidecarCommand, SidecarProcess},
    types::{GatewayMessage, SidecarMessage},
};
