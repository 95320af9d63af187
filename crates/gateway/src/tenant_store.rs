use {
    anyhow::{Result, bail},
    async_trait::async_trait,
    sqlx::SqlitePool,
};

use wabridge_messaging::{TenantId, TenantRecord, TenantStore};

/// Run database migrations for the gateway.
///
/// Creates the `tenants` table. Call once at startup before building the
/// store.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}

#[derive(sqlx::FromRow)]
struct TenantRow {
    id: i64,
    name: String,
    token: String,
    webhook: String,
    events: String,
    network_identity: String,
    pairing_code: String,
}

impl From<TenantRow> for TenantRecord {
    fn from(r: TenantRow) -> Self {
        Self {
            id: r.id,
            name: r.name,
            token: r.token,
            webhook: r.webhook,
            events: r.events,
            network_identity: r.network_identity,
            pairing_code: r.pairing_code,
        }
    }
}

const SELECT_TENANT: &str =
    "SELECT id, name, token, webhook, events, network_identity, pairing_code FROM tenants";

fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// SQLite-backed tenant store.
pub struct SqliteTenantStore {
    pool: SqlitePool,
}

impl SqliteTenantStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the tenants table without going through migrations.
    ///
    /// Used by tests that run against in-memory databases.
    #[doc(hidden)]
    pub async fn init(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS tenants (
                id               INTEGER PRIMARY KEY AUTOINCREMENT,
                name             TEXT    NOT NULL,
                token            TEXT    NOT NULL UNIQUE,
                webhook          TEXT    NOT NULL DEFAULT '',
                events           TEXT    NOT NULL DEFAULT '',
                network_identity TEXT    NOT NULL DEFAULT '',
                pairing_code     TEXT    NOT NULL DEFAULT '',
                created_at       INTEGER NOT NULL,
                updated_at       INTEGER NOT NULL
            )"#,
        )
        .execute(pool)
        .await?;
        Ok(())
    }

    async fn update_column(&self, id: TenantId, column: &str, value: &str) -> Result<()> {
        // Column names come from a fixed set in this module, never from input.
        let sql = format!("UPDATE tenants SET {column} = ?, updated_at = ? WHERE id = ?");
        let result = sqlx::query(&sql)
            .bind(value)
            .bind(now_secs())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            bail!("tenant {id} not found");
        }
        Ok(())
    }
}

#[async_trait]
impl TenantStore for SqliteTenantStore {
    async fn find_by_token(&self, token: &str) -> Result<Option<TenantRecord>> {
        let row = sqlx::query_as::<_, TenantRow>(&format!("{SELECT_TENANT} WHERE token = ?"))
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    async fn get(&self, id: TenantId) -> Result<Option<TenantRecord>> {
        let row = sqlx::query_as::<_, TenantRow>(&format!("{SELECT_TENANT} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    async fn create(&self, name: &str, token: &str) -> Result<TenantRecord> {
        let now = now_secs();
        let result = sqlx::query(
            "INSERT INTO tenants (name, token, created_at, updated_at) VALUES (?, ?, ?, ?)",
        )
        .bind(name)
        .bind(token)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(TenantRecord {
            id: result.last_insert_rowid(),
            name: name.to_string(),
            token: token.to_string(),
            ..Default::default()
        })
    }

    async fn list(&self) -> Result<Vec<TenantRecord>> {
        let rows = sqlx::query_as::<_, TenantRow>(&format!("{SELECT_TENANT} ORDER BY id"))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn set_webhook(&self, id: TenantId, webhook: &str) -> Result<()> {
        self.update_column(id, "webhook", webhook).await
    }

    async fn set_events(&self, id: TenantId, events: &str) -> Result<()> {
        self.update_column(id, "events", events).await
    }

    async fn set_pairing_code(&self, id: TenantId, code: &str) -> Result<()> {
        self.update_column(id, "pairing_code", code).await
    }

    async fn set_network_identity(&self, id: TenantId, identity: &str) -> Result<()> {
        self.update_column(id, "network_identity", identity).await
    }

    async fn set_paired(&self, id: TenantId, identity: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE tenants SET network_identity = ?, pairing_code = '', updated_at = ? \
             WHERE id = ?",
        )
        .bind(identity)
        .bind(now_secs())
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            bail!("tenant {id} not found");
        }
        Ok(())
    }

    async fn clear_pairing(&self, id: TenantId) -> Result<()> {
        let result = sqlx::query(
            "UPDATE tenants SET events = '', network_identity = '', pairing_code = '', \
             updated_at = ? WHERE id = ?",
        )
        .bind(now_secs())
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            bail!("tenant {id} not found");
        }
        Ok(())
    }
}
