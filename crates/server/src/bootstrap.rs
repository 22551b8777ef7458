use mitsumori_agent::AgentError;
use mitsumori_core::config::{AppConfig, ConfigError, LoadOptions};
use mitsumori_db::{connect_with_settings, migrations, DbPool};
use thiserror::Error;
use tracing::info;

use crate::app::{AppState, Repositories};
use crate::directory::DirectoryError;
use crate::money_forward::MoneyForwardError;
use crate::print::{EstimatePrinter, PrintError};

pub const TEMPLATE_DIR: &str = "templates/estimates";

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub state: AppState,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("estimate templates could not be loaded: {0}")]
    Print(#[from] PrintError),
    #[error("money forward client could not be created: {0}")]
    MoneyForward(#[from] MoneyForwardError),
    #[error("directory client could not be created: {0}")]
    Directory(#[from] DirectoryError),
    #[error("assistant could not be created: {0}")]
    Assistant(#[from] AgentError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let printer = EstimatePrinter::load_or_embedded(TEMPLATE_DIR)?;
    let state = AppState::new(&config, Repositories::sql(&db_pool), printer)?;
    info!(
        event_name = "system.bootstrap.integrations",
        correlation_id = "bootstrap",
        money_forward = config.money_forward.enabled,
        assistant = state.assistant.is_some(),
        directory = state.directory.is_some(),
        pdf = state.printer.can_render_pdf(),
        "integrations configured"
    );

    Ok(Application { config, db_pool, state })
}
