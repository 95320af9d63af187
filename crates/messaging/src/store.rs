use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
};

pub type TenantId = i64;

/// Persisted configuration and device identity for one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TenantRecord {
    pub id: TenantId,
    pub name: String,
    pub token: String,
    /// Empty when no webhook is configured.
    pub webhook: String,
    /// Comma-joined [`crate::SubscribedEvents`].
    pub events: String,
    /// Our own JID once paired; empty otherwise.
    pub network_identity: String,
    /// Last pairing code shown to the tenant; empty once paired or logged out.
    pub pairing_code: String,
}

impl TenantRecord {
    pub fn is_paired(&self) -> bool {
        !self.network_identity.is_empty()
    }
}

/// Persistence for tenant records.
#[async_trait]
pub trait TenantStore: Send + Sync {
    async fn find_by_token(&self, token: &str) -> anyhow::Result<Option<TenantRecord>>;
    async fn get(&self, id: TenantId) -> anyhow::Result<Option<TenantRecord>>;
    /// Create a tenant. Fails when the token is already taken.
    async fn create(&self, name: &str, token: &str) -> anyhow::Result<TenantRecord>;
    async fn list(&self) -> anyhow::Result<Vec<TenantRecord>>;
    async fn set_webhook(&self, id: TenantId, webhook: &str) -> anyhow::Result<()>;
    async fn set_events(&self, id: TenantId, events: &str) -> anyhow::Result<()>;
    async fn set_pairing_code(&self, id: TenantId, code: &str) -> anyhow::Result<()>;
    async fn set_network_identity(&self, id: TenantId, identity: &str) -> anyhow::Result<()>;
    /// Record a finished pairing: store the identity and drop the pairing
    /// code in one write.
    async fn set_paired(&self, id: TenantId, identity: &str) -> anyhow::Result<()>;
    /// Forget everything tied to the current device link: events, identity
    /// and pairing code.
    async fn clear_pairing(&self, id: TenantId) -> anyhow::Result<()>;
}
