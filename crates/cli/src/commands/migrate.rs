use mitsumori_core::config::LoadOptions;
use mitsumori_db::migrations;
use tracing::info;

use crate::commands::{with_database, CommandResult, EXIT_MIGRATION};

pub fn run(options: &LoadOptions) -> CommandResult {
    let result = with_database("migrate", options, |config, pool| async move {
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), EXIT_MIGRATION))?;
        info!(
            event_name = "cli.migrate.applied",
            correlation_id = "cli",
            database_url = %config.database.url,
            "pending migrations applied"
        );
        Ok(migrations::MIGRATOR
            .iter()
            .filter(|migration| !migration.migration_type.is_down_migration())
            .count())
    });

    match result {
        Ok(known) => CommandResult::success(
            "migrate",
            format!("applied pending migrations ({known} known)"),
        ),
        Err(failure) => failure,
    }
}
