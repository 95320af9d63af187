//! Gateway: multi-tenant HTTP front end for WhatsApp sessions.
//!
//! Lifecycle:
//! 1. Load + validate config
//! 2. Open the tenant database, run migrations
//! 3. Optionally spawn the WhatsApp sidecar
//! 4. Serve the REST API until shutdown, then stop every session
//!
//! Each tenant owns at most one live session, tracked by the
//! [`registry::SessionRegistry`] and driven by a supervisor task that turns
//! network events into webhook deliveries.

pub mod admin_routes;
pub mod auth_middleware;
pub mod chat_routes;
pub mod credential_cache;
pub mod error;
pub mod event_router;
#[cfg(feature = "metrics")]
pub mod metrics_middleware;
#[cfg(feature = "prometheus")]
pub mod metrics_routes;
pub mod payload;
pub mod registry;
pub mod server;
pub mod session_routes;
pub mod state;
mod supervisor;
pub mod tenant_store;
pub mod webhook;

pub use {
    credential_cache::{CredentialCache, RecordField},
    error::{ApiError, ApiResult},
    registry::{ConnectivityState, SessionError, SessionHandle, SessionRegistry},
    server::{AppState, build_gateway_app, open_database, start_gateway},
    state::GatewayState,
    tenant_store::{SqliteTenantStore, run_migrations},
    webhook::WebhookDispatcher,
};
