use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::config::AppConfig;

/// Open the PostgreSQL pool described by `config` and bring the schema up to date.
///
/// Fails when `DATABASE_URL` is unset; callers on the in-memory backend never get here.
pub async fn connect(config: &AppConfig) -> anyhow::Result<PgPool> {
    let database_url = config
        .database_url
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is required for the postgres store"))?;

    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await?;

    tracing::info!(
        max_connections = config.db_max_connections,
        "Connected to PostgreSQL"
    );

    migrate(&pool).await?;
    Ok(pool)
}

/// Apply the embedded migrations under `migrations/`.
pub async fn migrate(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    tracing::info!("Database migrations applied");
    Ok(())
}
