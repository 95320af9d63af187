//! Offline tenant management against the gateway database.

use {anyhow::Result, clap::Subcommand};

use {
    wabridge_config::WabridgeConfig,
    wabridge_gateway::{SqliteTenantStore, open_database},
    wabridge_messaging::{TenantRecord, TenantStore},
};

#[derive(Subcommand)]
pub enum UsersAction {
    /// Create a tenant. Names starting with `super-` may create tenants over
    /// the API.
    Add {
        #[arg(long)]
        name: String,
        /// Token the tenant presents in the `token` header.
        #[arg(long)]
        token: String,
    },
    /// List tenants.
    List {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
}

pub async fn handle_users(action: &UsersAction, config: &WabridgeConfig) -> Result<()> {
    let pool = open_database(&config.database_path()).await?;
    let store = SqliteTenantStore::new(pool.clone());
    let result = match action {
        UsersAction::Add { name, token } => add(&store, name, token)
            .await
            .map(|r| println!("Created tenant '{}' (id {})", r.name, r.id)),
        UsersAction::List { json } => list(&store, *json).await,
    };
    pool.close().await;
    result
}

async fn add(store: &dyn TenantStore, name: &str, token: &str) -> Result<TenantRecord> {
    if name.is_empty() {
        anyhow::bail!("name must not be empty");
    }
    if token.is_empty() {
        anyhow::bail!("token must not be empty");
    }
    if store.find_by_token(token).await?.is_some() {
        anyhow::bail!("a tenant with this token already exists");
    }
    store.create(name, token).await
}

async fn list(store: &dyn TenantStore, json: bool) -> Result<()> {
    let tenants = store.list().await?;
    if json {
        let rows: Vec<_> = tenants
            .iter()
            .map(|t| {
                serde_json::json!({
                    "id": t.id,
                    "name": t.name,
                    "webhook": t.webhook,
                    "events": t.events,
                    "paired": t.is_paired(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    if tenants.is_empty() {
        println!("No tenants.");
        return Ok(());
    }
    for t in &tenants {
        let paired = if t.is_paired() {
            t.network_identity.as_str()
        } else {
            "not paired"
        };
        let webhook = if t.webhook.is_empty() {
            "-"
        } else {
            t.webhook.as_str()
        };
        println!("  {:>4}  {:<20} {:<32} {}", t.id, t.name, webhook, paired);
    }
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> SqliteTenantStore {
        let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
        SqliteTenantStore::init(&pool).await.unwrap();
        SqliteTenantStore::new(pool)
    }

    #[tokio::test]
    async fn add_rejects_duplicate_tokens() {
        let store = store().await;
        let first = add(&store, "super-ops", "t1").await.unwrap();
        assert_eq!(first.name, "super-ops");

        let err = add(&store, "other", "t1").await.unwrap_err();
        assert!(err.to_string().contains("already exists"));
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn add_requires_name_and_token() {
        let store = store().await;
        assert!(add(&store, "", "t").await.is_err());
        assert!(add(&store, "n", "").await.is_err());
    }
}
