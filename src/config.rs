//! Configuration for Ben OS.
//!
//! Settings are read from `.benos/benos.toml` and layered:
//! file → environment (`BENOS_*`, plus `.env`) → CLI flags.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 4173
//! db_path = ".benos/benos.db"
//! cors_origins = ["http://localhost:5173"]
//!
//! [rate_limit]
//! enabled = true
//! requests_per_minute = 120
//! burst = 60
//!
//! [ai]
//! enabled = false
//! endpoint = "https://api.openai.com/v1"
//! model = "gpt-4o-mini"
//! api_key_env = "OPENAI_API_KEY"
//! timeout_secs = 30
//!
//! [client]
//! base_url = "http://127.0.0.1:4173"
//! read_retries = 2
//! write_retries = 1
//! autosave_debounce_ms = 1500
//!
//! [logging]
//! format = "pretty"
//! directory = ".benos/logs"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Directory (relative to the project) holding config, database and logs.
pub const BENOS_DIR: &str = ".benos";
pub const CONFIG_FILE: &str = "benos.toml";

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// SQLite file, relative paths resolve against the project directory
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Allowed browser origins. Empty means same-origin only, unless the
    /// server runs in dev mode.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    4173
}

fn default_db_path() -> PathBuf {
    PathBuf::from(BENOS_DIR).join("benos.db")
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            db_path: default_db_path(),
            cors_origins: Vec::new(),
        }
    }
}

/// Per-caller request limits for `/api`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    #[serde(default = "default_burst")]
    pub burst: u32,
}

fn default_true() -> bool {
    true
}

fn default_requests_per_minute() -> u32 {
    120
}

fn default_burst() -> u32 {
    60
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_minute: default_requests_per_minute(),
            burst: default_burst(),
        }
    }
}

/// AI-assisted PRD task extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    #[serde(default)]
    pub enabled: bool,
    /// OpenAI-compatible base URL (`/chat/completions` is appended)
    #[serde(default = "default_ai_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_ai_model")]
    pub model: String,
    /// Name of the environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_ai_timeout")]
    pub timeout_secs: u64,
}

fn default_ai_endpoint() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_ai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_ai_timeout() -> u64 {
    30
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_ai_endpoint(),
            model: default_ai_model(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_ai_timeout(),
        }
    }
}

/// Settings for the typed HTTP client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSection {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Extra attempts for GET requests
    #[serde(default = "default_read_retries")]
    pub read_retries: u32,
    /// Extra attempts for POST/PATCH/DELETE requests
    #[serde(default = "default_write_retries")]
    pub write_retries: u32,
    #[serde(default = "default_autosave_debounce_ms")]
    pub autosave_debounce_ms: u64,
    #[serde(default = "default_client_timeout")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    format!("http://{}:{}", default_host(), default_port())
}

fn default_read_retries() -> u32 {
    2
}

fn default_write_retries() -> u32 {
    1
}

fn default_autosave_debounce_ms() -> u64 {
    1500
}

fn default_client_timeout() -> u64 {
    30
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            read_retries: default_read_retries(),
            write_retries: default_write_retries(),
            autosave_debounce_ms: default_autosave_debounce_ms(),
            timeout_secs: default_client_timeout(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => anyhow::bail!("Invalid log format '{}'. Valid values: pretty, json", s),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default)]
    pub format: LogFormat,
    /// When set, logs are also written to daily-rotated files here
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

/// Root of `benos.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BenConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub rate_limit: RateLimitSection,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub client: ClientSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl BenConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse benos.toml")
    }

    /// Load `<project_dir>/.benos/benos.toml`, or defaults when it is absent.
    pub fn load_or_default(project_dir: &Path) -> Result<Self> {
        let path = Self::path_in(project_dir);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn path_in(project_dir: &Path) -> PathBuf {
        project_dir.join(BENOS_DIR).join(CONFIG_FILE)
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize benos.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Overlay `BENOS_*` variables. `lookup` is `std::env::var` in
    /// production and a map in tests.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(host) = lookup("BENOS_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("BENOS_PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("Invalid BENOS_PORT '{}'", port))?;
        }
        if let Some(db_path) = lookup("BENOS_DB_PATH") {
            self.server.db_path = PathBuf::from(db_path);
        }
        if let Some(enabled) = lookup("BENOS_RATE_LIMIT_ENABLED") {
            self.rate_limit.enabled = enabled != "false" && enabled != "0";
        }
        if let Some(rpm) = lookup("BENOS_RATE_LIMIT_PER_MINUTE") {
            self.rate_limit.requests_per_minute = rpm
                .parse()
                .with_context(|| format!("Invalid BENOS_RATE_LIMIT_PER_MINUTE '{}'", rpm))?;
        }
        if let Some(enabled) = lookup("BENOS_AI_ENABLED") {
            self.ai.enabled = enabled != "false" && enabled != "0";
        }
        if let Some(endpoint) = lookup("BENOS_AI_ENDPOINT") {
            self.ai.endpoint = endpoint;
        }
        if let Some(model) = lookup("BENOS_AI_MODEL") {
            self.ai.model = model;
        }
        if let Some(url) = lookup("BENOS_API_URL") {
            self.client.base_url = url;
        }
        if let Some(format) = lookup("BENOS_LOG_FORMAT") {
            self.logging.format = format.parse()?;
        }
        if let Some(dir) = lookup("BENOS_LOG_DIR") {
            self.logging.directory = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    /// Database path resolved against the project directory.
    pub fn db_path(&self, project_dir: &Path) -> PathBuf {
        resolve(project_dir, &self.server.db_path)
    }

    /// Log directory resolved against the project directory.
    pub fn log_dir(&self, project_dir: &Path) -> Option<PathBuf> {
        self.logging
            .directory
            .as_ref()
            .map(|dir| resolve(project_dir, dir))
    }
}

fn resolve(project_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        project_dir.join(path)
    }
}
