use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub money_forward: MoneyForwardConfig,
    pub directory: DirectoryConfig,
    pub numbering: NumberingConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

/// OpenAI-compatible chat completion endpoint used by the estimate assistant.
#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub enabled: bool,
    pub base_url: String,
    pub api_key: Option<SecretString>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Clone, Debug)]
pub struct MoneyForwardConfig {
    pub enabled: bool,
    pub client_id: Option<String>,
    pub client_secret: Option<SecretString>,
    pub redirect_uri: Option<String>,
    pub authorize_url: String,
    pub token_url: String,
    pub api_base_url: String,
    pub scope: String,
}

/// Internal customer and user directory. Unset `base_url` disables the proxy routes.
#[derive(Clone, Debug, Default)]
pub struct DirectoryConfig {
    pub base_url: Option<String>,
    pub api_token: Option<SecretString>,
}

#[derive(Clone, Debug)]
pub struct NumberingConfig {
    pub estimate_kind: String,
    pub invoice_kind: String,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub server_port: Option<u16>,
    pub llm_enabled: Option<bool>,
    pub llm_model: Option<String>,
    pub money_forward_enabled: Option<bool>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://mitsumori.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            llm: LlmConfig {
                enabled: false,
                base_url: "https://api.openai.com/v1".to_string(),
                api_key: None,
                model: "gpt-4o-mini".to_string(),
                timeout_secs: 60,
                max_retries: 1,
            },
            money_forward: MoneyForwardConfig {
                enabled: false,
                client_id: None,
                client_secret: None,
                redirect_uri: None,
                authorize_url: "https://api.biz.moneyforward.com/authorize".to_string(),
                token_url: "https://api.biz.moneyforward.com/token".to_string(),
                api_base_url: "https://invoice.moneyforward.com/api/v3".to_string(),
                scope: "mfc/invoice/data.write".to_string(),
            },
            directory: DirectoryConfig::default(),
            numbering: NumberingConfig {
                estimate_kind: "EST".to_string(),
                invoice_kind: "INV".to_string(),
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("mitsumori.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(enabled) = llm.enabled {
                self.llm.enabled = enabled;
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = base_url;
            }
            if let Some(api_key) = llm.api_key {
                self.llm.api_key = Some(secret_value(api_key));
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
        }

        if let Some(money_forward) = patch.money_forward {
            if let Some(enabled) = money_forward.enabled {
                self.money_forward.enabled = enabled;
            }
            if let Some(client_id) = money_forward.client_id {
                self.money_forward.client_id = Some(client_id);
            }
            if let Some(client_secret) = money_forward.client_secret {
                self.money_forward.client_secret = Some(secret_value(client_secret));
            }
            if let Some(redirect_uri) = money_forward.redirect_uri {
                self.money_forward.redirect_uri = Some(redirect_uri);
            }
            if let Some(authorize_url) = money_forward.authorize_url {
                self.money_forward.authorize_url = authorize_url;
            }
            if let Some(token_url) = money_forward.token_url {
                self.money_forward.token_url = token_url;
            }
            if let Some(api_base_url) = money_forward.api_base_url {
                self.money_forward.api_base_url = api_base_url;
            }
            if let Some(scope) = money_forward.scope {
                self.money_forward.scope = scope;
            }
        }

        if let Some(directory) = patch.directory {
            if let Some(base_url) = directory.base_url {
                self.directory.base_url = Some(base_url);
            }
            if let Some(api_token) = directory.api_token {
                self.directory.api_token = Some(secret_value(api_token));
            }
        }

        if let Some(numbering) = patch.numbering {
            if let Some(estimate_kind) = numbering.estimate_kind {
                self.numbering.estimate_kind = estimate_kind;
            }
            if let Some(invoice_kind) = numbering.invoice_kind {
                self.numbering.invoice_kind = invoice_kind;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("MITSUMORI_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("MITSUMORI_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("MITSUMORI_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("MITSUMORI_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("MITSUMORI_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("MITSUMORI_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("MITSUMORI_SERVER_PORT") {
            self.server.port = parse_u16("MITSUMORI_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("MITSUMORI_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("MITSUMORI_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("MITSUMORI_LLM_ENABLED") {
            self.llm.enabled = parse_bool("MITSUMORI_LLM_ENABLED", &value)?;
        }
        if let Some(value) = read_env("MITSUMORI_LLM_BASE_URL") {
            self.llm.base_url = value;
        }
        let llm_api_key =
            read_env("MITSUMORI_LLM_API_KEY").or_else(|| read_env("OPENAI_API_KEY"));
        if let Some(value) = llm_api_key {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("MITSUMORI_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("MITSUMORI_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("MITSUMORI_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("MITSUMORI_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_u32("MITSUMORI_LLM_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("MITSUMORI_MONEY_FORWARD_ENABLED") {
            self.money_forward.enabled = parse_bool("MITSUMORI_MONEY_FORWARD_ENABLED", &value)?;
        }
        if let Some(value) = read_env("MITSUMORI_MONEY_FORWARD_CLIENT_ID") {
            self.money_forward.client_id = Some(value);
        }
        if let Some(value) = read_env("MITSUMORI_MONEY_FORWARD_CLIENT_SECRET") {
            self.money_forward.client_secret = Some(secret_value(value));
        }
        if let Some(value) = read_env("MITSUMORI_MONEY_FORWARD_REDIRECT_URI") {
            self.money_forward.redirect_uri = Some(value);
        }
        if let Some(value) = read_env("MITSUMORI_MONEY_FORWARD_API_BASE_URL") {
            self.money_forward.api_base_url = value;
        }

        if let Some(value) = read_env("MITSUMORI_DIRECTORY_BASE_URL") {
            self.directory.base_url = Some(value);
        }
        if let Some(value) = read_env("MITSUMORI_DIRECTORY_API_TOKEN") {
            self.directory.api_token = Some(secret_value(value));
        }

        if let Some(value) = read_env("MITSUMORI_NUMBERING_ESTIMATE_KIND") {
            self.numbering.estimate_kind = value;
        }
        if let Some(value) = read_env("MITSUMORI_NUMBERING_INVOICE_KIND") {
            self.numbering.invoice_kind = value;
        }

        let log_level =
            read_env("MITSUMORI_LOGGING_LEVEL").or_else(|| read_env("MITSUMORI_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("MITSUMORI_LOGGING_FORMAT").or_else(|| read_env("MITSUMORI_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
        if let Some(enabled) = overrides.llm_enabled {
            self.llm.enabled = enabled;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(enabled) = overrides.money_forward_enabled {
            self.money_forward.enabled = enabled;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_llm(&self.llm)?;
        validate_money_forward(&self.money_forward)?;
        validate_directory(&self.directory)?;
        validate_numbering(&self.numbering)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("mitsumori.toml"), PathBuf::from("config/mitsumori.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if !llm.enabled {
        return Ok(());
    }

    if !is_http_url(llm.base_url.trim()) {
        return Err(ConfigError::Validation(
            "llm.base_url must start with http:// or https://".to_string(),
        ));
    }
    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model is required when llm.enabled".to_string()));
    }
    let missing_key =
        llm.api_key.as_ref().map(|value| value.expose_secret().trim().is_empty()).unwrap_or(true);
    if missing_key {
        return Err(ConfigError::Validation(
            "llm.api_key is required when llm.enabled (set MITSUMORI_LLM_API_KEY)".to_string(),
        ));
    }

    Ok(())
}

fn validate_money_forward(money_forward: &MoneyForwardConfig) -> Result<(), ConfigError> {
    if money_forward.enabled {
        let has_client_id =
            money_forward.client_id.as_ref().map(|id| !id.trim().is_empty()).unwrap_or(false);
        if !has_client_id {
            return Err(ConfigError::Validation(
                "money_forward.enabled is true but money_forward.client_id is missing".to_string(),
            ));
        }

        let has_secret = money_forward
            .client_secret
            .as_ref()
            .map(|secret| !secret.expose_secret().trim().is_empty())
            .unwrap_or(false);
        if !has_secret {
            return Err(ConfigError::Validation(
                "money_forward.enabled is true but money_forward.client_secret is missing"
                    .to_string(),
            ));
        }

        if money_forward.redirect_uri.is_none() {
            return Err(ConfigError::Validation(
                "money_forward.redirect_uri is required when money_forward.enabled".to_string(),
            ));
        }
    }

    if let Some(redirect_uri) = &money_forward.redirect_uri {
        if !is_http_url(redirect_uri) {
            return Err(ConfigError::Validation(
                "money_forward.redirect_uri must start with http:// or https://".to_string(),
            ));
        }
    }

    for (field, value) in [
        ("authorize_url", &money_forward.authorize_url),
        ("token_url", &money_forward.token_url),
        ("api_base_url", &money_forward.api_base_url),
    ] {
        if !is_http_url(value) {
            return Err(ConfigError::Validation(format!(
                "money_forward.{field} must start with http:// or https://"
            )));
        }
    }

    Ok(())
}

fn validate_directory(directory: &DirectoryConfig) -> Result<(), ConfigError> {
    if let Some(base_url) = &directory.base_url {
        if !is_http_url(base_url) {
            return Err(ConfigError::Validation(
                "directory.base_url must start with http:// or https://".to_string(),
            ));
        }
    }
    Ok(())
}

fn validate_numbering(numbering: &NumberingConfig) -> Result<(), ConfigError> {
    for (field, value) in
        [("estimate_kind", &numbering.estimate_kind), ("invoice_kind", &numbering.invoice_kind)]
    {
        let value = value.trim();
        if value.is_empty() || !value.chars().all(|ch| ch.is_ascii_alphanumeric()) {
            return Err(ConfigError::Validation(format!(
                "numbering.{field} must be a non-empty alphanumeric code"
            )));
        }
    }
    if numbering.estimate_kind.trim().eq_ignore_ascii_case(numbering.invoice_kind.trim()) {
        return Err(ConfigError::Validation(
            "numbering.estimate_kind and numbering.invoice_kind must differ".to_string(),
        ));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.trim().to_ascii_lowercase().parse::<bool>().map_err(|_| {
        ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    llm: Option<LlmPatch>,
    money_forward: Option<MoneyForwardPatch>,
    directory: Option<DirectoryPatch>,
    numbering: Option<NumberingPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    enabled: Option<bool>,
    base_url: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct MoneyForwardPatch {
    enabled: Option<bool>,
    client_id: Option<String>,
    client_secret: Option<String>,
    redirect_uri: Option<String>,
    authorize_url: Option<String>,
    token_url: Option<String>,
    api_base_url: Option<String>,
    scope: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DirectoryPatch {
    base_url: Option<String>,
    api_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct NumberingPatch {
    estimate_kind: Option<String>,
    invoice_kind: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
