//! `nlq.toml` configuration.
//!
//! ```toml
//! [model]
//! base_url = "https://api.openai.com/v1"
//! name = "gpt-4o-mini"
//! api_key_env = "OPENAI_API_KEY"
//! timeout_secs = 30
//! temperature = 1.0
//!
//! [sandbox]
//! wall_clock_ms = 2000
//! max_cells = 5000000
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::model::{DEFAULT_BASE_URL, DEFAULT_MODEL, DEFAULT_TIMEOUT};
use crate::sandbox::Limits;

/// Looked up in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "nlq.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{}: {source}", path.display())]
    Read { path: PathBuf, source: std::io::Error },

    #[error("{}: {source}", path.display())]
    Parse { path: PathBuf, source: toml::de::Error },

    #[error("environment variable {0} is not set; it must hold the model service API key")]
    MissingApiKey(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub model: ModelConfig,
    pub sandbox: SandboxConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub base_url: String,
    pub name: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub timeout_secs: u64,
    /// Temperature of the compile request.
    pub temperature: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig {
            base_url: DEFAULT_BASE_URL.to_string(),
            name: DEFAULT_MODEL.to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            temperature: 1.0,
        }
    }
}

impl ModelConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Read the API key from the configured environment variable.
    pub fn api_key(&self) -> Result<String, ConfigError> {
        match std::env::var(&self.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(ConfigError::MissingApiKey(self.api_key_env.clone())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub wall_clock_ms: u64,
    pub max_cells: usize,
    pub max_program_bytes: usize,
    pub max_statements: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        let limits = Limits::default();
        SandboxConfig {
            wall_clock_ms: limits.wall_clock.as_millis() as u64,
            max_cells: limits.max_cells,
            max_program_bytes: limits.max_program_bytes,
            max_statements: limits.max_statements,
        }
    }
}

impl SandboxConfig {
    pub fn limits(&self) -> Limits {
        Limits {
            wall_clock: Duration::from_millis(self.wall_clock_ms),
            max_cells: self.max_cells,
            max_program_bytes: self.max_program_bytes,
            max_statements: self.max_statements,
            ..Limits::default()
        }
    }
}

impl Config {
    pub fn from_toml(text: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
    }

    /// Load `path` if given (it must exist), else `nlq.toml` in the working
    /// directory if present, else defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };
        match fs::read_to_string(&path) {
            Ok(text) => {
                tracing::debug!(path = %path.display(), "loaded configuration");
                Self::from_toml(&text, &path)
            }
            Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => Ok(Config::default()),
            Err(source) => Err(ConfigError::Read { path, source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_files_keep_defaults() {
        let cfg = Config::from_toml("[model]\nname = \"local\"\n", Path::new("nlq.toml")).unwrap();
        assert_eq!(cfg.model.name, "local");
        assert_eq!(cfg.model.api_key_env, "OPENAI_API_KEY");
        assert_eq!(cfg.sandbox, SandboxConfig::default());
    }

    #[test]
    fn sandbox_section_sets_limits() {
        let cfg = Config::from_toml("[sandbox]\nwall_clock_ms = 500\n", Path::new("x.toml")).unwrap();
        let limits = cfg.sandbox.limits();
        assert_eq!(limits.wall_clock, Duration::from_millis(500));
        assert_eq!(limits.max_cells, 5_000_000);
    }

    #[test]
    fn parse_errors_name_the_file() {
        let err = Config::from_toml("model = 3", Path::new("bad.toml")).unwrap_err();
        assert!(err.to_string().starts_with("bad.toml: "));
    }

    #[test]
    fn explicit_path_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("none.toml");
        assert!(matches!(Config::load(Some(&missing)), Err(ConfigError::Read { .. })));

        let present = dir.path().join("nlq.toml");
        fs::write(&present, "[model]\ntimeout_secs = 5\n").unwrap();
        assert_eq!(Config::load(Some(&present)).unwrap().model.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn missing_key_is_reported_by_name() {
        let model = ModelConfig { api_key_env: "NLQ_TEST_KEY_THAT_IS_NOT_SET".into(), ..ModelConfig::default() };
        let err = model.api_key().unwrap_err();
        assert!(err.to_string().contains("NLQ_TEST_KEY_THAT_IS_NOT_SET"));
    }
}
