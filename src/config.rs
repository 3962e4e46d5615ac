use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::db::{ConnectionConfig, SslMode};
use crate::translate::{CompletionConfig, TranslateConfig};

/// Environment variables checked, in order, for the completion API key.
const API_KEY_VARS: &[&str] = &["NLSQL_API_KEY", "DEEPSEEK_API_KEY", "OPENAI_API_KEY"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: &'static str, value: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("no completion API key configured; set NLSQL_API_KEY or completion.api_key")]
    MissingApiKey,
}

/// Everything the process needs, loaded once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// SQL dialect named in prompts, e.g. "PostgreSQL".
    pub dialect: String,
    pub database: ConnectionConfig,
    pub completion: CompletionConfig,
    pub translate: TranslateConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            dialect: String::from("PostgreSQL"),
            database: ConnectionConfig::default(),
            completion: CompletionConfig::default(),
            translate: TranslateConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("nlsql")
            .join("config.toml")
    }

    /// Load from `path`, or from the default location if it exists, then
    /// apply environment overrides and validate.
    ///
    /// An explicit path must exist; a missing default file just means
    /// defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let path = Self::default_path();
                if path.exists() {
                    Self::from_file(&path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env_from(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply overrides from `lookup`, which maps a variable name to its
    /// value. Empty values are ignored.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        if let Some(key) = API_KEY_VARS.iter().find_map(|var| get(*var)) {
            self.completion.api_key = key;
        }
        if let Some(endpoint) = get("NLSQL_ENDPOINT") {
            self.completion.endpoint = endpoint;
        }
        if let Some(model) = get("NLSQL_MODEL") {
            self.completion.model = model;
        }
        if let Some(dialect) = get("NLSQL_DIALECT") {
            self.dialect = dialect;
        }

        let db = &mut self.database;
        if let Some(host) = get("PGHOST") {
            db.host = host;
        }
        if let Some(port) = get("PGPORT") {
            db.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidEnv {
                    var: "PGPORT",
                    value: port.clone(),
                })?;
        }
        if let Some(database) = get("PGDATABASE") {
            db.database = database;
        }
        if let Some(user) = get("PGUSER") {
            db.username = user;
        }
        if let Some(password) = get("PGPASSWORD") {
            db.password = password;
        }
        if let Some(mode) = get("PGSSLMODE") {
            db.ssl_mode = SslMode::parse(&mode).ok_or(ConfigError::InvalidEnv {
                var: "PGSSLMODE",
                value: mode.clone(),
            })?;
        }
        if let Some(schema) = get("NLSQL_SCHEMA") {
            db.schema = schema;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dialect.trim().is_empty() {
            return Err(ConfigError::Invalid("dialect must not be empty".into()));
        }
        if self.completion.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid("completion.endpoint must not be empty".into()));
        }
        for (field, value) in [
            ("completion.temperature", self.completion.temperature),
            ("completion.analysis_temperature", self.completion.analysis_temperature),
        ] {
            if !(0.0..=2.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "{field} must be between 0 and 2, got {value}"
                )));
            }
        }
        if self.completion.timeout_secs == 0 {
            return Err(ConfigError::Invalid("completion.timeout_secs must be positive".into()));
        }

        let ranking = &self.translate.ranking;
        if ranking.max_candidates == 0 {
            return Err(ConfigError::Invalid(
                "translate.ranking.max_candidates must be at least 1".into(),
            ));
        }
        if !ranking.threshold.is_finite() || ranking.threshold < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "translate.ranking.threshold must be a non-negative number, got {}",
                ranking.threshold
            )));
        }

        if self.database.schema.trim().is_empty() {
            return Err(ConfigError::Invalid("database.schema must not be empty".into()));
        }
        if self.database.statement_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "database.statement_timeout_secs must be positive".into(),
            ));
        }
        Ok(())
    }

    /// The completion client cannot work without a key; commands that call
    /// it check this up front.
    pub fn require_api_key(&self) -> Result<(), ConfigError> {
        if self.completion.api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        Ok(())
    }
}
