use std::sync::Arc;

#[cfg(feature = "metrics")]
use wabridge_metrics::MetricsHandle;

use {
    wabridge_config::{SessionsConfig, WabridgeConfig},
    wabridge_messaging::{ClientFactory, TenantStore},
};

use crate::{
    credential_cache::CredentialCache,
    registry::{SessionContext, SessionRegistry},
    webhook::WebhookDispatcher,
};

/// Shared gateway runtime state.
pub struct GatewayState {
    /// Server version string.
    pub version: String,
    /// Token → tenant cache, write-through to the store.
    pub cache: Arc<CredentialCache>,
    /// Live tenant sessions.
    pub registry: Arc<SessionRegistry>,
    /// Connect wait and stop timeout.
    pub sessions: SessionsConfig,
    /// Metrics handle for Prometheus export (None if metrics disabled).
    #[cfg(feature = "metrics")]
    pub metrics_handle: Option<MetricsHandle>,
}

impl GatewayState {
    /// Wire the session core from config, a store and a client factory.
    pub fn from_config(
        config: &WabridgeConfig,
        store: Arc<dyn TenantStore>,
        factory: Arc<dyn ClientFactory>,
    ) -> anyhow::Result<Self> {
        let cache = Arc::new(CredentialCache::new(store));
        let dispatcher = Arc::new(WebhookDispatcher::new(&config.webhook)?);
        let registry = SessionRegistry::new(SessionContext {
            cache: Arc::clone(&cache),
            factory,
            dispatcher,
            reconnect: config.sessions.reconnect.clone(),
        });
        Ok(Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            cache,
            registry,
            sessions: config.sessions.clone(),
            #[cfg(feature = "metrics")]
            metrics_handle: None,
        })
    }

    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, handle: MetricsHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }

    pub fn store(&self) -> &Arc<dyn TenantStore> {
        self.cache.store()
    }
}
