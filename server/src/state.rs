use std::path::PathBuf;
use std::sync::Arc;

use color_eyre::eyre::WrapErr;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::engine::LifecycleEngine;
use crate::mailer::spawn_mailer;
use crate::store::{PgStore, UserStore};

/// Process configuration, read once at startup and passed in explicitly.
/// Business logic never reads the environment on its own.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL embedded in verification links, e.g. `http://localhost`.
    pub base_url: String,
    pub port: u16,
    /// HMAC secret for session JWTs.
    pub jwt_secret: String,
    /// Directory published avatars are written to and served from.
    pub avatar_dir: PathBuf,
    /// Directory uploads land in before processing.
    pub tmp_upload_dir: PathBuf,
    pub database_url: String,
    pub smtp_host: String,
    pub smtp_username: String,
    pub smtp_password: String,
    pub email_sender: String,
}

impl Config {
    pub fn from_env() -> color_eyre::Result<Self> {
        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .wrap_err("PORT must be a valid port number")?;

        Ok(Self {
            base_url: std::env::var("BASE_URL")
                .unwrap_or_else(|_| "http://localhost".to_string()),
            port,
            jwt_secret: std::env::var("SECRET_KEY").wrap_err("SECRET_KEY must be set")?,
            avatar_dir: std::env::var("AVATAR_DIR")
                .unwrap_or_else(|_| "public/avatars".to_string())
                .into(),
            tmp_upload_dir: std::env::var("TMP_UPLOAD_DIR")
                .unwrap_or_else(|_| "tmp".to_string())
                .into(),
            database_url: std::env::var("DATABASE_URL").wrap_err("DATABASE_URL must be set")?,
            smtp_host: std::env::var("SMTP_HOST").wrap_err("SMTP_HOST must be set")?,
            smtp_username: std::env::var("SMTP_USERNAME").unwrap_or_default(),
            smtp_password: std::env::var("SMTP_PASSWORD").unwrap_or_default(),
            email_sender: std::env::var("EMAIL_SENDER_ADDRESS")
                .wrap_err("EMAIL_SENDER_ADDRESS must be set")?,
        })
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn UserStore>,
    pub engine: LifecycleEngine,
    pub config: Arc<Config>,
}

impl AppState {
    /// Build production state: Postgres store, SMTP mailer task, engine.
    /// Returns the state plus the mailer worker's join handle.
    pub async fn from_env() -> color_eyre::Result<(
        Self,
        tokio::task::JoinHandle<color_eyre::Result<()>>,
    )> {
        let config = Arc::new(Config::from_env()?);
        let pool = setup_db_pool(&config).await?;
        let store: Arc<dyn UserStore> = Arc::new(PgStore::new(pool));

        let (mailer, mailer_task) = spawn_mailer(&config)?;
        let engine = LifecycleEngine::new(Arc::clone(&store), mailer, Arc::clone(&config));

        Ok((
            Self {
                store,
                engine,
                config,
            },
            mailer_task,
        ))
    }
}

#[tracing::instrument(skip(config), err)]
pub async fn setup_db_pool(config: &Config) -> color_eyre::Result<PgPool> {
    const MIGRATION_LOCK_ID: i64 = 0x0AC_C0_07;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;

    sqlx::query("SELECT pg_advisory_lock($1)")
        .bind(MIGRATION_LOCK_ID)
        .execute(&pool)
        .await?;

    sqlx::migrate!("../migrations").run(&pool).await?;

    sqlx::query("SELECT pg_advisory_unlock($1)")
        .bind(MIGRATION_LOCK_ID)
        .execute(&pool)
        .await?;

    tracing::info!("Database pool ready, migrations applied");
    Ok(pool)
}
