use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use crate::config::AppConfig;

pub type DbPool = SqlitePool;

/// Application state holding the database connection pool and configuration
pub struct AppState {
  pub db: DbPool,
  pub config: AppConfig,
}

impl AppState {
  /// Connect, migrate and bundle the pool with its configuration
  pub async fn initialize(config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
    let db = initialize_db(&config).await?;
    Ok(Self { db, config })
  }
}

/// Initialize the database connection pool and run migrations
pub async fn initialize_db(config: &AppConfig) -> Result<DbPool, Box<dyn std::error::Error>> {
  tracing::info!(url = %config.database_url, "Initializing database");

  let options = SqliteConnectOptions::from_str(&config.database_url)?
    .create_if_missing(true)
    .foreign_keys(true);

  let pool = SqlitePoolOptions::new()
    .max_connections(config.max_connections)
    .connect_with(options)
    .await?;

  sqlx::migrate!("./migrations").run(&pool).await?;

  tracing::info!("Database initialized successfully");

  Ok(pool)
}
