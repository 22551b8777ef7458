use std::env;
use std::fs;
use std::sync::{Mutex, OnceLock};

use mitsumori_cli::commands::{config, doctor, migrate, seed};
use mitsumori_core::config::LoadOptions;
use serde_json::Value;

const MEMORY_DB: (&str, &str) = ("MITSUMORI_DATABASE_URL", "sqlite::memory:");

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&[MEMORY_DB], || {
        let result = migrate::run(&LoadOptions::default());
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
        assert!(payload["error_class"].is_null());
    });
}

#[test]
fn migrate_returns_config_failure_for_invalid_override() {
    with_env(&[MEMORY_DB, ("MITSUMORI_SERVER_PORT", "not-a-port")], || {
        let result = migrate::run(&LoadOptions::default());
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn migrate_reports_unreachable_database() {
    let unreachable = [
        ("MITSUMORI_DATABASE_URL", "sqlite:///nonexistent-dir/mitsumori.db?mode=ro"),
        ("MITSUMORI_DATABASE_TIMEOUT_SECS", "2"),
    ];
    with_env(&unreachable, || {
        let result = migrate::run(&LoadOptions::default());
        assert_eq!(result.exit_code, 4, "expected db connectivity failure code");
        assert_eq!(parse_payload(&result.output)["error_class"], "db_connectivity");
    });
}

#[test]
fn seed_lists_demo_estimates() {
    with_env(&[MEMORY_DB], || {
        let result = seed::run(&LoadOptions::default(), false);
        assert_eq!(result.exit_code, 0, "expected seed success: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "seed");
        assert_eq!(payload["status"], "ok");

        let message = payload["message"].as_str().unwrap_or_default();
        assert!(message.contains("  - EST-DEMO-ACME-250401-001 (draft, id 9001)"));
        assert!(message.contains("  - EST-DEMO-ACME-250402-001 (pending, id 9002)"));
        assert!(message.contains("  - EST-DEMO-BETA-250403-001 (sent, id 9003)"));
    });
}

#[test]
fn seed_is_repeatable_against_the_same_database() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("seed.db").display());

    with_env(&[("MITSUMORI_DATABASE_URL", url.as_str())], || {
        let first = seed::run(&LoadOptions::default(), false);
        assert_eq!(first.exit_code, 0, "first seed: {}", first.output);

        let second = seed::run(&LoadOptions::default(), false);
        assert_eq!(second.exit_code, 0, "second seed: {}", second.output);
        assert_eq!(parse_payload(&first.output)["message"], parse_payload(&second.output)["message"]);

        let cleaned = seed::run(&LoadOptions::default(), true);
        assert_eq!(cleaned.exit_code, 0);
        assert_eq!(parse_payload(&cleaned.output)["message"], "demo dataset removed");
    });
}

#[test]
fn doctor_flags_pending_migrations_until_migrate_runs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("doctor.db").display());

    with_env(&[("MITSUMORI_DATABASE_URL", url.as_str())], || {
        let before = doctor::run(&LoadOptions::default(), true);
        assert_eq!(before.exit_code, 5, "fresh database has pending migrations");
        let report = parse_payload(&before.output);
        assert_eq!(report["overall_status"], "fail");
        assert_eq!(check_status(&report, "database_connectivity"), "pass");
        assert_eq!(check_status(&report, "schema_migrations"), "fail");
        assert_eq!(check_status(&report, "money_forward_readiness"), "skipped");

        assert_eq!(migrate::run(&LoadOptions::default()).exit_code, 0);

        let after = doctor::run(&LoadOptions::default(), true);
        assert_eq!(after.exit_code, 0, "doctor after migrate: {}", after.output);
        assert_eq!(parse_payload(&after.output)["overall_status"], "pass");
    });
}

#[test]
fn doctor_reports_config_failure() {
    with_env(&[MEMORY_DB, ("MITSUMORI_MONEY_FORWARD_ENABLED", "true")], || {
        let result = doctor::run(&LoadOptions::default(), true);
        assert_eq!(result.exit_code, 2);

        let report = parse_payload(&result.output);
        assert_eq!(check_status(&report, "config_validation"), "fail");
        assert_eq!(check_status(&report, "database_connectivity"), "skipped");
    });
}

#[test]
fn config_attributes_sources_and_redacts_secrets() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("mitsumori.toml");
    fs::write(
        &path,
        "[numbering]\nestimate_kind = \"QT\"\n\n[directory]\nbase_url = \"https://directory.example.test\"\napi_token = \"dir-secret-token\"\n",
    )
    .expect("write config");

    with_env(&[MEMORY_DB], || {
        let options =
            LoadOptions { config_path: Some(path.clone()), require_file: true, ..LoadOptions::default() };
        let result = config::run(&options, true);
        assert_eq!(result.exit_code, 0, "config output: {}", result.output);
        assert!(!result.output.contains("dir-secret-token"));

        let entries: Value = serde_json::from_str(&result.output).expect("config JSON");
        let entry = |key: &str| {
            entries
                .as_array()
                .and_then(|entries| entries.iter().find(|entry| entry["key"] == key))
                .cloned()
                .unwrap_or(Value::Null)
        };

        assert_eq!(entry("numbering.estimate_kind")["value"], "QT");
        assert!(entry("numbering.estimate_kind")["source"]
            .as_str()
            .unwrap_or_default()
            .starts_with("file ("));
        assert_eq!(entry("directory.api_token")["value"], "<redacted>");
        assert_eq!(entry("database.url")["source"], "env (MITSUMORI_DATABASE_URL)");
        assert_eq!(entry("numbering.invoice_kind")["source"], "default");
    });
}

#[test]
fn config_fails_when_required_file_is_missing() {
    with_env(&[], || {
        let options = LoadOptions {
            config_path: Some("does-not-exist/mitsumori.toml".into()),
            require_file: true,
            ..LoadOptions::default()
        };
        let result = config::run(&options, false);
        assert_eq!(result.exit_code, 2);
        assert_eq!(parse_payload(&result.output)["error_class"], "config_validation");
    });
}

fn check_status(report: &Value, name: &str) -> String {
    report["checks"]
        .as_array()
        .and_then(|checks| checks.iter().find(|check| check["name"] == name))
        .and_then(|check| check["status"].as_str())
        .unwrap_or_default()
        .to_string()
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard = ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    let keys = [
        "MITSUMORI_DATABASE_URL",
        "MITSUMORI_DATABASE_MAX_CONNECTIONS",
        "MITSUMORI_DATABASE_TIMEOUT_SECS",
        "MITSUMORI_SERVER_BIND_ADDRESS",
        "MITSUMORI_SERVER_PORT",
        "MITSUMORI_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "MITSUMORI_LLM_ENABLED",
        "MITSUMORI_LLM_API_KEY",
        "MITSUMORI_LLM_BASE_URL",
        "MITSUMORI_LLM_MODEL",
        "MITSUMORI_MONEY_FORWARD_ENABLED",
        "MITSUMORI_MONEY_FORWARD_CLIENT_ID",
        "MITSUMORI_MONEY_FORWARD_CLIENT_SECRET",
        "MITSUMORI_MONEY_FORWARD_REDIRECT_URI",
        "MITSUMORI_DIRECTORY_BASE_URL",
        "MITSUMORI_DIRECTORY_API_TOKEN",
        "MITSUMORI_NUMBERING_ESTIMATE_KIND",
        "MITSUMORI_NUMBERING_INVOICE_KIND",
        "MITSUMORI_LOGGING_LEVEL",
        "MITSUMORI_LOGGING_FORMAT",
        "MITSUMORI_LOG_LEVEL",
        "MITSUMORI_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
