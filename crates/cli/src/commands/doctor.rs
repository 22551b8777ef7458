use std::collections::HashSet;

use mitsumori_core::config::{AppConfig, LoadOptions};
use mitsumori_db::{connect_with_settings, migrations::MIGRATOR, DbPool};
use secrecy::ExposeSecret;
use serde::Serialize;

use crate::commands::{CommandResult, EXIT_CONFIG, EXIT_DB_CONNECTIVITY, EXIT_MIGRATION};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    command: &'static str,
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }

    fn skipped(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Skipped, details: details.into() }
    }
}

/// Skipped checks cover disabled integrations and do not fail the report.
pub fn run(options: &LoadOptions, json_output: bool) -> CommandResult {
    let report = build_report(options);
    let exit_code = exit_code(&report);

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"command\":\"doctor\",\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report(options: &LoadOptions) -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(options.clone()) {
        Ok(config) => {
            checks.push(DoctorCheck::pass("config_validation", "configuration loaded and validated"));
            checks.push(check_money_forward(&config));
            checks.push(check_llm(&config));
            checks.push(check_directory(&config));
            checks.extend(check_database(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck::fail("config_validation", error.to_string()));
            for name in ["database_connectivity", "schema_migrations"] {
                checks.push(DoctorCheck::skipped(
                    name,
                    "skipped because configuration did not load",
                ));
            }
        }
    }

    let failed = checks.iter().any(|check| check.status == CheckStatus::Fail);
    let overall_status = if failed { CheckStatus::Fail } else { CheckStatus::Pass };
    let summary = if failed {
        "doctor: one or more readiness checks failed".to_string()
    } else {
        "doctor: all readiness checks passed".to_string()
    };

    DoctorReport { command: "doctor", overall_status, summary, checks }
}

fn exit_code(report: &DoctorReport) -> u8 {
    let failed = |name: &str| {
        report.checks.iter().any(|check| check.name == name && check.status == CheckStatus::Fail)
    };

    if failed("config_validation") {
        EXIT_CONFIG
    } else if failed("database_connectivity") {
        EXIT_DB_CONNECTIVITY
    } else if report.overall_status == CheckStatus::Fail {
        EXIT_MIGRATION
    } else {
        0
    }
}

fn check_money_forward(config: &AppConfig) -> DoctorCheck {
    let money_forward = &config.money_forward;
    if !money_forward.enabled {
        return DoctorCheck::skipped("money_forward_readiness", "integration disabled");
    }
    DoctorCheck::pass(
        "money_forward_readiness",
        format!(
            "client `{}` redirects to `{}`, api `{}`",
            money_forward.client_id.as_deref().unwrap_or_default(),
            money_forward.redirect_uri.as_deref().unwrap_or_default(),
            money_forward.api_base_url
        ),
    )
}

fn check_llm(config: &AppConfig) -> DoctorCheck {
    if !config.llm.enabled {
        return DoctorCheck::skipped("llm_readiness", "assistant disabled");
    }
    let has_key = config
        .llm
        .api_key
        .as_ref()
        .is_some_and(|key| !key.expose_secret().trim().is_empty());
    if has_key {
        DoctorCheck::pass("llm_readiness", format!("model `{}`", config.llm.model))
    } else {
        DoctorCheck::fail("llm_readiness", "llm.api_key is empty")
    }
}

fn check_directory(config: &AppConfig) -> DoctorCheck {
    match config.directory.base_url.as_deref() {
        Some(base_url) => DoctorCheck::pass("directory_proxy", format!("proxying `{base_url}`")),
        None => DoctorCheck::skipped("directory_proxy", "directory.base_url not set"),
    }
}

fn check_database(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return vec![DoctorCheck::fail(
                "database_connectivity",
                format!("failed to initialize async runtime: {error}"),
            )];
        }
    };

    runtime.block_on(async {
        let pool = match connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        {
            Ok(pool) => pool,
            Err(error) => {
                return vec![
                    DoctorCheck::fail(
                        "database_connectivity",
                        format!("failed to connect to database: {error}"),
                    ),
                    DoctorCheck::skipped("schema_migrations", "skipped without a connection"),
                ];
            }
        };

        let migrations = check_migrations(&pool).await;
        pool.close().await;
        vec![
            DoctorCheck::pass(
                "database_connectivity",
                format!("connected using `{}`", config.database.url),
            ),
            migrations,
        ]
    })
}

async fn check_migrations(pool: &DbPool) -> DoctorCheck {
    let has_table: Result<i64, sqlx::Error> = sqlx::query_scalar(
        "SELECT COUNT(1) FROM sqlite_master WHERE type = 'table' AND name = '_sqlx_migrations'",
    )
    .fetch_one(pool)
    .await;

    let applied = match has_table {
        Ok(0) => HashSet::new(),
        Ok(_) => {
            match sqlx::query_scalar::<_, i64>(
                "SELECT version FROM _sqlx_migrations WHERE success = 1",
            )
            .fetch_all(pool)
            .await
            {
                Ok(versions) => versions.into_iter().collect::<HashSet<_>>(),
                Err(error) => {
                    return DoctorCheck::fail("schema_migrations", error.to_string());
                }
            }
        }
        Err(error) => return DoctorCheck::fail("schema_migrations", error.to_string()),
    };

    let pending = MIGRATOR
        .iter()
        .filter(|migration| !migration.migration_type.is_down_migration())
        .filter(|migration| !applied.contains(&migration.version))
        .count();
    if pending == 0 {
        DoctorCheck::pass("schema_migrations", format!("{} migrations applied", applied.len()))
    } else {
        DoctorCheck::fail(
            "schema_migrations",
            format!("{pending} pending migrations, run `mitsumori migrate`"),
        )
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use mitsumori_core::config::AppConfig;

    use super::{
        check_directory, check_llm, check_money_forward, exit_code, render_human, CheckStatus,
        DoctorCheck, DoctorReport,
    };
    use crate::commands::{EXIT_CONFIG, EXIT_DB_CONNECTIVITY};

    fn report(checks: Vec<DoctorCheck>) -> DoctorReport {
        let failed = checks.iter().any(|check| check.status == CheckStatus::Fail);
        DoctorReport {
            command: "doctor",
            overall_status: if failed { CheckStatus::Fail } else { CheckStatus::Pass },
            summary: "summary".to_string(),
            checks,
        }
    }

    #[test]
    fn disabled_integrations_are_skipped() {
        let config = AppConfig::default();
        assert_eq!(check_money_forward(&config).status, CheckStatus::Skipped);
        assert_eq!(check_llm(&config).status, CheckStatus::Skipped);
        assert_eq!(check_directory(&config).status, CheckStatus::Skipped);
    }

    #[test]
    fn enabled_money_forward_reports_redirect_target() {
        let mut config = AppConfig::default();
        config.money_forward.enabled = true;
        config.money_forward.client_id = Some("client-1".to_string());
        config.money_forward.redirect_uri = Some("https://erp.example.test/callback".to_string());

        let check = check_money_forward(&config);
        assert_eq!(check.status, CheckStatus::Pass);
        assert!(check.details.contains("client-1"));
        assert!(check.details.contains("https://erp.example.test/callback"));
    }

    #[test]
    fn exit_code_follows_first_failed_class() {
        let config_failed = report(vec![DoctorCheck::fail("config_validation", "bad")]);
        assert_eq!(exit_code(&config_failed), EXIT_CONFIG);

        let db_failed = report(vec![
            DoctorCheck::pass("config_validation", "ok"),
            DoctorCheck::fail("database_connectivity", "refused"),
        ]);
        assert_eq!(exit_code(&db_failed), EXIT_DB_CONNECTIVITY);

        let skipped_only = report(vec![DoctorCheck::skipped("llm_readiness", "disabled")]);
        assert_eq!(exit_code(&skipped_only), 0);
    }

    #[test]
    fn human_output_marks_each_check() {
        let rendered = render_human(&report(vec![
            DoctorCheck::pass("config_validation", "loaded"),
            DoctorCheck::skipped("directory_proxy", "not set"),
        ]));
        assert!(rendered.contains("- [ok] config_validation: loaded"));
        assert!(rendered.contains("- [skip] directory_proxy: not set"));
    }
}
