use {anyhow::Result, clap::Subcommand};

use wabridge_config::WabridgeConfig;

#[derive(Subcommand)]
pub enum DbAction {
    /// Create the database if needed and run pending migrations.
    Migrate,
    /// Delete the database file (tenants and their pairing state).
    Reset,
}

pub async fn handle_db(action: &DbAction, config: &WabridgeConfig) -> Result<()> {
    match action {
        DbAction::Migrate => migrate(config).await,
        DbAction::Reset => reset(config),
    }
}

async fn migrate(config: &WabridgeConfig) -> Result<()> {
    let path = config.database_path();
    let pool = wabridge_gateway::open_database(&path).await?;
    pool.close().await;
    println!("Migrations applied to {}", path.display());
    Ok(())
}

fn reset(config: &WabridgeConfig) -> Result<()> {
    let db = config.database_path();
    let mut deleted = false;

    // SQLite may leave WAL and SHM files next to the database.
    for suffix in ["", "-wal", "-shm"] {
        let path = if suffix.is_empty() {
            db.clone()
        } else {
            let mut name = db.clone().into_os_string();
            name.push(suffix);
            name.into()
        };
        if path.exists() {
            std::fs::remove_file(&path)?;
            println!("Deleted: {}", path.display());
            deleted = true;
        }
    }

    if deleted {
        println!("Database deleted. Run `wabridge db migrate` to recreate it.");
    } else {
        println!("No database file found.");
    }
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, tempfile::TempDir};

    fn config_in(dir: &TempDir) -> WabridgeConfig {
        WabridgeConfig {
            data_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn migrate_creates_tenants_table() {
        let temp = TempDir::new().unwrap();
        let config = config_in(&temp);

        migrate(&config).await.unwrap();
        let pool = wabridge_gateway::open_database(&config.database_path())
            .await
            .unwrap();
        let _: (i64,) = sqlx::query_as("SELECT count(*) FROM tenants")
            .fetch_one(&pool)
            .await
            .unwrap();
        pool.close().await;
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let temp = TempDir::new().unwrap();
        let config = config_in(&temp);

        migrate(&config).await.unwrap();
        migrate(&config).await.unwrap();
    }

    #[tokio::test]
    async fn reset_removes_database() {
        let temp = TempDir::new().unwrap();
        let config = config_in(&temp);

        migrate(&config).await.unwrap();
        assert!(config.database_path().exists());
        reset(&config).unwrap();
        assert!(!config.database_path().exists());
    }
}
