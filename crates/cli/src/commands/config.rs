use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use mitsumori_core::config::{AppConfig, LoadOptions};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use toml::Value;

use crate::commands::{CommandResult, EXIT_CONFIG};

#[derive(Debug, Serialize)]
struct ConfigEntry {
    key: &'static str,
    value: String,
    source: String,
}

pub fn run(options: &LoadOptions, json_output: bool) -> CommandResult {
    let config = match AppConfig::load(options.clone()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "config",
                "config_validation",
                format!("config validation failed: {error}"),
                EXIT_CONFIG,
            );
        }
    };

    let config_file_path = detect_config_path(options.config_path.as_deref());
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let entries = effective_entries(&config)
        .into_iter()
        .map(|(key, value)| ConfigEntry {
            key,
            value,
            source: field_source(key, config_file_doc.as_ref(), config_file_path.as_deref()),
        })
        .collect::<Vec<_>>();

    if json_output {
        let output = serde_json::to_string_pretty(&entries)
            .unwrap_or_else(|error| format!("[{{\"error\":\"{error}\"}}]"));
        return CommandResult { exit_code: 0, output };
    }

    let mut lines =
        vec!["effective config (source precedence: env > file > default):".to_string()];
    lines.extend(
        entries
            .iter()
            .map(|entry| format!("- {} = {} (source: {})", entry.key, entry.value, entry.source)),
    );
    CommandResult { exit_code: 0, output: lines.join("\n") }
}

fn effective_entries(config: &AppConfig) -> Vec<(&'static str, String)> {
    vec![
        ("database.url", config.database.url.clone()),
        ("database.max_connections", config.database.max_connections.to_string()),
        ("database.timeout_secs", config.database.timeout_secs.to_string()),
        ("server.bind_address", config.server.bind_address.clone()),
        ("server.port", config.server.port.to_string()),
        ("server.graceful_shutdown_secs", config.server.graceful_shutdown_secs.to_string()),
        ("llm.enabled", config.llm.enabled.to_string()),
        ("llm.base_url", config.llm.base_url.clone()),
        ("llm.model", config.llm.model.clone()),
        ("llm.api_key", redact_secret(config.llm.api_key.as_ref())),
        ("money_forward.enabled", config.money_forward.enabled.to_string()),
        ("money_forward.client_id", unset_or(config.money_forward.client_id.as_deref())),
        ("money_forward.client_secret", redact_secret(config.money_forward.client_secret.as_ref())),
        ("money_forward.redirect_uri", unset_or(config.money_forward.redirect_uri.as_deref())),
        ("money_forward.api_base_url", config.money_forward.api_base_url.clone()),
        ("directory.base_url", unset_or(config.directory.base_url.as_deref())),
        ("directory.api_token", redact_secret(config.directory.api_token.as_ref())),
        ("numbering.estimate_kind", config.numbering.estimate_kind.clone()),
        ("numbering.invoice_kind", config.numbering.invoice_kind.clone()),
        ("logging.level", config.logging.level.clone()),
        ("logging.format", format!("{:?}", config.logging.format).to_ascii_lowercase()),
    ]
}

fn detect_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }

    [PathBuf::from("mitsumori.toml"), PathBuf::from("config/mitsumori.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

/// `database.url` is overridden by `MITSUMORI_DATABASE_URL`, and so on for every key.
fn env_key(key_path: &str) -> String {
    format!("MITSUMORI_{}", key_path.replace('.', "_").to_ascii_uppercase())
}

fn field_source(
    key_path: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    let env_key = env_key(key_path);
    if env::var_os(&env_key).is_some() {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn unset_or(value: Option<&str>) -> String {
    value.filter(|value| !value.trim().is_empty()).unwrap_or("<unset>").to_string()
}

fn redact_secret(secret: Option<&SecretString>) -> String {
    match secret.map(|secret| secret.expose_secret().trim().is_empty()) {
        None => "<unset>".to_string(),
        Some(true) => "<empty>".to_string(),
        Some(false) => "<redacted>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;
    use toml::Value;

    use super::{contains_path, env_key, redact_secret, unset_or};

    #[test]
    fn env_keys_follow_section_and_field() {
        assert_eq!(env_key("money_forward.client_secret"), "MITSUMORI_MONEY_FORWARD_CLIENT_SECRET");
        assert_eq!(env_key("logging.level"), "MITSUMORI_LOGGING_LEVEL");
    }

    #[test]
    fn secrets_never_render_their_value() {
        let secret = SecretString::from("mf-secret-value".to_string());
        assert_eq!(redact_secret(Some(&secret)), "<redacted>");
        assert_eq!(redact_secret(Some(&SecretString::from(" ".to_string()))), "<empty>");
        assert_eq!(redact_secret(None), "<unset>");
        assert_eq!(unset_or(Some("")), "<unset>");
    }

    #[test]
    fn nested_paths_are_found_in_file_documents() {
        let doc = "[money_forward]\nenabled = true\n".parse::<Value>().expect("toml");
        assert!(contains_path(&doc, "money_forward.enabled"));
        assert!(!contains_path(&doc, "money_forward.client_id"));
        assert!(!contains_path(&doc, "llm.enabled"));
    }
}
