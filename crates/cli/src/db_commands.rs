use std::{path::Path, str::FromStr};

use {
    anyhow::Context,
    clap::Subcommand,
    plinth_config::PlinthConfig,
    sqlx::{
        SqlitePool,
        sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    },
};

#[derive(Subcommand)]
pub enum DbAction {
    /// Create the registry database if needed and run pending migrations.
    Migrate,
}

pub async fn handle_db(action: DbAction) -> anyhow::Result<()> {
    match action {
        DbAction::Migrate => run_migrations().await,
    }
}

/// Open the registry pool described by `config`, creating the database file
/// (and the data directory) when missing. Migrations are not run.
pub async fn open_pool(config: &PlinthConfig, data_dir: &Path) -> anyhow::Result<SqlitePool> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("creating data directory {}", data_dir.display()))?;
    let url = config.database_url(data_dir);
    let options = SqliteConnectOptions::from_str(&url)
        .with_context(|| format!("invalid database url {url}"))?
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
        .with_context(|| format!("connecting to {url}"))?;
    Ok(pool)
}

/// Open the registry pool and bring its schema up to date.
pub async fn open_migrated_pool(
    config: &PlinthConfig,
    data_dir: &Path,
) -> anyhow::Result<SqlitePool> {
    let pool = open_pool(config, data_dir).await?;
    plinth_bundles::run_migrations(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("bundle migrations failed: {e}"))?;
    Ok(pool)
}

async fn run_migrations() -> anyhow::Result<()> {
    let config = plinth_config::discover_and_load();
    let data_dir = plinth_config::data_dir();

    println!("Running migrations for {}...", config.database_url(&data_dir));
    let pool = open_migrated_pool(&config, &data_dir).await?;
    pool.close().await;

    println!("All migrations complete.");
    Ok(())
}
