use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub workflow: WorkflowConfig,
    pub memory: MemoryConfig,
    pub checkpoint: CheckpointConfig,
    pub payment: PaymentConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Clone, Debug)]
pub struct WorkflowConfig {
    pub max_steps: usize,
    pub node_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct MemoryConfig {
    pub max_history: usize,
    pub summary_threshold: usize,
    pub idle_ttl_secs: u64,
}

#[derive(Clone, Debug)]
pub struct CheckpointConfig {
    pub backend: CheckpointBackend,
    pub directory: PathBuf,
}

#[derive(Clone, Debug)]
pub struct PaymentConfig {
    pub default_currency: String,
    pub supported_currencies: Vec<String>,
    pub max_amount: Decimal,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointBackend {
    Memory,
    File,
    Sqlite,
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
    pub checkpoint_backend: Option<CheckpointBackend>,
    pub default_currency: Option<String>,
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
                url: "sqlite://concierge.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            llm: LlmConfig { model: "offline".to_string(), timeout_secs: 30, max_retries: 2 },
            workflow: WorkflowConfig { max_steps: 25, node_timeout_secs: 60 },
            memory: MemoryConfig { max_history: 20, summary_threshold: 15, idle_ttl_secs: 3600 },
            checkpoint: CheckpointConfig {
                backend: CheckpointBackend::Sqlite,
                directory: PathBuf::from("data/checkpoints"),
            },
            payment: PaymentConfig {
                default_currency: "USD".to_string(),
                supported_currencies: ["USD", "EUR", "GBP", "VND"]
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
                max_amount: Decimal::from(1_000_000),
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl CheckpointBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::File => "file",
            Self::Sqlite => "sqlite",
        }
    }
}

impl FromStr for CheckpointBackend {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "file" => Ok(Self::File),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(ConfigError::Validation(format!(
                "unsupported checkpoint backend `{other}` (expected memory|file|sqlite)"
            ))),
        }
    }
}

impl FromStr for LogFormat {
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
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from("concierge.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.normalize();
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

        if let Some(llm) = patch.llm {
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

        if let Some(workflow) = patch.workflow {
            if let Some(max_steps) = workflow.max_steps {
                self.workflow.max_steps = max_steps;
            }
            if let Some(node_timeout_secs) = workflow.node_timeout_secs {
                self.workflow.node_timeout_secs = node_timeout_secs;
            }
        }

        if let Some(memory) = patch.memory {
            if let Some(max_history) = memory.max_history {
                self.memory.max_history = max_history;
            }
            if let Some(summary_threshold) = memory.summary_threshold {
                self.memory.summary_threshold = summary_threshold;
            }
            if let Some(idle_ttl_secs) = memory.idle_ttl_secs {
                self.memory.idle_ttl_secs = idle_ttl_secs;
            }
        }

        if let Some(checkpoint) = patch.checkpoint {
            if let Some(backend) = checkpoint.backend {
                self.checkpoint.backend = backend;
            }
            if let Some(directory) = checkpoint.directory {
                self.checkpoint.directory = directory;
            }
        }

        if let Some(payment) = patch.payment {
            if let Some(default_currency) = payment.default_currency {
                self.payment.default_currency = default_currency;
            }
            if let Some(supported_currencies) = payment.supported_currencies {
                self.payment.supported_currencies = supported_currencies;
            }
            if let Some(max_amount) = payment.max_amount {
                self.payment.max_amount = max_amount;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
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
        if let Some(value) = read_env("CONCIERGE_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("CONCIERGE_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_env("CONCIERGE_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_env("CONCIERGE_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("CONCIERGE_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("CONCIERGE_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_env("CONCIERGE_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_env("CONCIERGE_LLM_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("CONCIERGE_WORKFLOW_MAX_STEPS") {
            self.workflow.max_steps = parse_env("CONCIERGE_WORKFLOW_MAX_STEPS", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_WORKFLOW_NODE_TIMEOUT_SECS") {
            self.workflow.node_timeout_secs =
                parse_env("CONCIERGE_WORKFLOW_NODE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("CONCIERGE_MEMORY_MAX_HISTORY") {
            self.memory.max_history = parse_env("CONCIERGE_MEMORY_MAX_HISTORY", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_MEMORY_SUMMARY_THRESHOLD") {
            self.memory.summary_threshold =
                parse_env("CONCIERGE_MEMORY_SUMMARY_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_MEMORY_IDLE_TTL_SECS") {
            self.memory.idle_ttl_secs = parse_env("CONCIERGE_MEMORY_IDLE_TTL_SECS", &value)?;
        }

        if let Some(value) = read_env("CONCIERGE_CHECKPOINT_BACKEND") {
            self.checkpoint.backend = value.parse()?;
        }
        if let Some(value) = read_env("CONCIERGE_CHECKPOINT_DIRECTORY") {
            self.checkpoint.directory = PathBuf::from(value);
        }

        if let Some(value) = read_env("CONCIERGE_PAYMENT_DEFAULT_CURRENCY") {
            self.payment.default_currency = value;
        }
        if let Some(value) = read_env("CONCIERGE_PAYMENT_SUPPORTED_CURRENCIES") {
            self.payment.supported_currencies = value
                .split(',')
                .map(str::trim)
                .filter(|code| !code.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(value) = read_env("CONCIERGE_PAYMENT_MAX_AMOUNT") {
            self.payment.max_amount = parse_env("CONCIERGE_PAYMENT_MAX_AMOUNT", &value)?;
        }

        if let Some(value) = read_env("CONCIERGE_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("CONCIERGE_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port =
                parse_env("CONCIERGE_SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_env("CONCIERGE_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("CONCIERGE_LOGGING_LEVEL").or_else(|| read_env("CONCIERGE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("CONCIERGE_LOGGING_FORMAT").or_else(|| read_env("CONCIERGE_LOG_FORMAT"));
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
        if let Some(backend) = overrides.checkpoint_backend {
            self.checkpoint.backend = backend;
        }
        if let Some(default_currency) = overrides.default_currency {
            self.payment.default_currency = default_currency;
        }
    }

    fn normalize(&mut self) {
        self.payment.default_currency = self.payment.default_currency.trim().to_ascii_uppercase();
        for code in &mut self.payment.supported_currencies {
            *code = code.trim().to_ascii_uppercase();
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_llm(&self.llm)?;
        validate_workflow(&self.workflow)?;
        validate_memory(&self.memory)?;
        validate_checkpoint(&self.checkpoint)?;
        validate_payment(&self.payment)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("concierge.toml"), PathBuf::from("config/concierge.toml")]
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

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }
    if llm.max_retries > 10 {
        return Err(ConfigError::Validation("llm.max_retries must be at most 10".to_string()));
    }
    Ok(())
}

fn validate_workflow(workflow: &WorkflowConfig) -> Result<(), ConfigError> {
    if workflow.max_steps == 0 || workflow.max_steps > 1_000 {
        return Err(ConfigError::Validation(
            "workflow.max_steps must be in range 1..=1000".to_string(),
        ));
    }
    if workflow.node_timeout_secs == 0 || workflow.node_timeout_secs > 600 {
        return Err(ConfigError::Validation(
            "workflow.node_timeout_secs must be in range 1..=600".to_string(),
        ));
    }
    Ok(())
}

fn validate_memory(memory: &MemoryConfig) -> Result<(), ConfigError> {
    if memory.max_history == 0 {
        return Err(ConfigError::Validation(
            "memory.max_history must be greater than zero".to_string(),
        ));
    }
    if memory.summary_threshold == 0 || memory.summary_threshold >= memory.max_history {
        return Err(ConfigError::Validation(
            "memory.summary_threshold must be in range 1..memory.max_history".to_string(),
        ));
    }
    if memory.idle_ttl_secs == 0 {
        return Err(ConfigError::Validation(
            "memory.idle_ttl_secs must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_checkpoint(checkpoint: &CheckpointConfig) -> Result<(), ConfigError> {
    if checkpoint.backend == CheckpointBackend::File
        && checkpoint.directory.as_os_str().is_empty()
    {
        return Err(ConfigError::Validation(
            "checkpoint.directory is required for the file backend".to_string(),
        ));
    }
    Ok(())
}

fn validate_payment(payment: &PaymentConfig) -> Result<(), ConfigError> {
    if payment.supported_currencies.is_empty() {
        return Err(ConfigError::Validation(
            "payment.supported_currencies must list at least one currency".to_string(),
        ));
    }
    if let Some(code) = payment
        .supported_currencies
        .iter()
        .find(|code| code.len() != 3 || !code.chars().all(|ch| ch.is_ascii_uppercase()))
    {
        return Err(ConfigError::Validation(format!(
            "payment.supported_currencies contains `{code}`; expected ISO-4217 codes like USD"
        )));
    }
    if !payment.supported_currencies.contains(&payment.default_currency) {
        return Err(ConfigError::Validation(format!(
            "payment.default_currency `{}` is not in payment.supported_currencies",
            payment.default_currency
        )));
    }
    if payment.max_amount <= Decimal::ZERO {
        return Err(ConfigError::Validation(
            "payment.max_amount must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
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

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    workflow: Option<WorkflowPatch>,
    memory: Option<MemoryPatch>,
    checkpoint: Option<CheckpointPatch>,
    payment: Option<PaymentPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkflowPatch {
    max_steps: Option<usize>,
    node_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct MemoryPatch {
    max_history: Option<usize>,
    summary_threshold: Option<usize>,
    idle_ttl_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct CheckpointPatch {
    backend: Option<CheckpointBackend>,
    directory: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct PaymentPatch {
    default_currency: Option<String>,
    supported_currencies: Option<Vec<String>>,
    max_amount: Option<Decimal>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use rust_decimal::Decimal;
    use tempfile::TempDir;

    use super::{AppConfig, CheckpointBackend, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_are_valid_without_any_file_or_env() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.workflow.max_steps == 25, "default step cap should be 25")?;
        ensure(config.memory.max_history == 20, "default history should be 20")?;
        ensure(config.memory.summary_threshold == 15, "default summary threshold should be 15")?;
        ensure(
            config.payment.max_amount == Decimal::from(1_000_000),
            "default max amount should be one million",
        )?;
        ensure(
            config.payment.supported_currencies == ["USD", "EUR", "GBP", "VND"],
            "default currencies should be USD, EUR, GBP, VND",
        )?;
        Ok(())
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_CONCIERGE_DB", "sqlite://interpolated.db");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("concierge.toml");
            fs::write(
                &path,
                r#"
[database]
url = "${TEST_CONCIERGE_DB}"

[payment]
default_currency = "eur"
max_amount = "5000"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://interpolated.db",
                "database url should be loaded from environment",
            )?;
            ensure(config.payment.default_currency == "EUR", "currency should be normalized")?;
            ensure(
                config.payment.max_amount == Decimal::from(5_000),
                "max amount should come from the file",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_CONCIERGE_DB"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("CONCIERGE_LOG_LEVEL", "warn");
        env::set_var("CONCIERGE_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["CONCIERGE_LOG_LEVEL", "CONCIERGE_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("CONCIERGE_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("CONCIERGE_CHECKPOINT_BACKEND", "file");
        env::set_var("CONCIERGE_MEMORY_MAX_HISTORY", "40");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("concierge.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[memory]
max_history = 30
summary_threshold = 10

[checkpoint]
backend = "memory"

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.memory.max_history == 40, "env history should win over file")?;
            ensure(config.memory.summary_threshold == 10, "file threshold should win over default")?;
            ensure(
                config.checkpoint.backend == CheckpointBackend::File,
                "env checkpoint backend should win over file",
            )?;
            Ok(())
        })();

        clear_vars(&[
            "CONCIERGE_DATABASE_URL",
            "CONCIERGE_CHECKPOINT_BACKEND",
            "CONCIERGE_MEMORY_MAX_HISTORY",
        ]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("CONCIERGE_PAYMENT_DEFAULT_CURRENCY", "JPY");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let message = error.to_string();
            ensure(
                matches!(error, ConfigError::Validation(_)),
                "error should be a validation error",
            )?;
            ensure(message.contains("payment.default_currency"), "message should name the key")?;
            Ok(())
        })();

        clear_vars(&["CONCIERGE_PAYMENT_DEFAULT_CURRENCY"]);
        result
    }

    #[test]
    fn malformed_env_override_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("CONCIERGE_WORKFLOW_MAX_STEPS", "many");

        let result = (|| -> Result<(), String> {
            match AppConfig::load(LoadOptions::default()) {
                Err(ConfigError::InvalidEnvOverride { key, .. }) => ensure(
                    key == "CONCIERGE_WORKFLOW_MAX_STEPS",
                    "error should name the offending variable",
                ),
                Err(other) => Err(format!("unexpected error: {other}")),
                Ok(_) => Err("expected env override failure".to_string()),
            }
        })();

        clear_vars(&["CONCIERGE_WORKFLOW_MAX_STEPS"]);
        result
    }

    #[test]
    fn required_file_must_exist() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let missing = dir.path().join("absent.toml");
        match AppConfig::load(LoadOptions {
            config_path: Some(missing),
            require_file: true,
            ..LoadOptions::default()
        }) {
            Err(ConfigError::MissingConfigFile(_)) => Ok(()),
            Err(other) => Err(format!("unexpected error: {other}")),
            Ok(_) => Err("missing required file should fail".to_string()),
        }
    }
}
