//! Write-through token → tenant cache.
//!
//! Entries never expire. Every mutation of a tenant record goes through
//! [`CredentialCache::invalidate`], which writes the store first and only
//! then overwrites the cached snapshot, so the cache never holds a value the
//! store rejected.

use std::sync::Arc;

use {
    anyhow::{Context, Result},
    dashmap::DashMap,
    tokio::sync::Mutex,
    tracing::debug,
};

use wabridge_messaging::{TenantRecord, TenantStore};

/// A single field change on a tenant record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordField {
    Webhook(String),
    Events(String),
    PairingCode(String),
    /// Pairing finished: store the identity and drop the pairing code.
    Paired(String),
    /// Device unlinked: drop events, identity and pairing code.
    ClearPairing,
}

impl RecordField {
    fn apply(&self, record: &mut TenantRecord) {
        match self {
            Self::Webhook(url) => record.webhook.clone_from(url),
            Self::Events(events) => record.events.clone_from(events),
            Self::PairingCode(code) => record.pairing_code.clone_from(code),
            Self::Paired(identity) => {
                record.network_identity.clone_from(identity);
                record.pairing_code.clear();
            },
            Self::ClearPairing => {
                record.events.clear();
                record.network_identity.clear();
                record.pairing_code.clear();
            },
        }
    }

    async fn persist(&self, store: &dyn TenantStore, record: &TenantRecord) -> Result<()> {
        let id = record.id;
        match self {
            Self::Webhook(url) => store.set_webhook(id, url).await,
            Self::Events(events) => store.set_events(id, events).await,
            Self::PairingCode(code) => store.set_pairing_code(id, code).await,
            Self::Paired(identity) => store.set_paired(id, identity).await,
            Self::ClearPairing => store.clear_pairing(id).await,
        }
    }
}

pub struct CredentialCache {
    store: Arc<dyn TenantStore>,
    entries: DashMap<String, TenantRecord>,
    /// Serializes read-modify-write cycles per token.
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl CredentialCache {
    pub fn new(store: Arc<dyn TenantStore>) -> Self {
        Self {
            store,
            entries: DashMap::new(),
            locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn TenantStore> {
        &self.store
    }

    /// Cached snapshot for `token`, if any.
    pub fn lookup(&self, token: &str) -> Option<TenantRecord> {
        self.entries.get(token).map(|e| e.value().clone())
    }

    /// Overwrite the cached snapshot for `token`.
    pub fn put(&self, token: &str, record: TenantRecord) {
        self.entries.insert(token.to_string(), record);
    }

    /// Cache lookup with store fallback. `None` means the token is unknown.
    ///
    /// A record loaded on a miss only fills an empty slot: an `invalidate`
    /// that finished while the store read was in flight keeps its snapshot.
    pub async fn resolve(&self, token: &str) -> Result<Option<TenantRecord>> {
        if let Some(record) = self.lookup(token) {
            return Ok(Some(record));
        }
        let Some(record) = self.store.find_by_token(token).await? else {
            return Ok(None);
        };
        debug!(tenant_id = record.id, "credential cache miss, loaded from store");
        let cached = self
            .entries
            .entry(token.to_string())
            .or_insert(record)
            .value()
            .clone();
        Ok(Some(cached))
    }

    /// Apply `field` to the tenant behind `token`: store first, then cache.
    ///
    /// Returns the updated snapshot.
    pub async fn invalidate(&self, token: &str, field: RecordField) -> Result<TenantRecord> {
        let lock = self.lock_for(token);
        let _guard = lock.lock().await;

        let mut record = self
            .resolve(token)
            .await?
            .context("tenant not found for token")?;
        field.persist(self.store.as_ref(), &record).await?;
        field.apply(&mut record);
        self.put(token, record.clone());
        Ok(record)
    }

    fn lock_for(&self, token: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(token.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
