//! # Configuration
//!
//! Settings for the CLI and the HTTP server.
//!
//! Precedence, lowest to highest:
//!
//! 1. Built-in defaults
//! 2. `blendgraph.toml` (or the file passed with `--config`)
//! 3. `BLENDGRAPH_*` environment variables
//! 4. Command-line flags
//!
//! ```toml
//! [storage]
//! backend = "redb"
//! database = "blendgraph.db"
//!
//! [limits]
//! max_nodes = 100000
//! max_depth = 256
//!
//! [server]
//! host = "127.0.0.1"
//! port = 8080
//! rate_limit = 100
//! cors_origins = ["http://localhost:3000"]
//! ```

use crate::error::AppError;
use blendgraph_core::TraversalLimits;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Config file looked up in the working directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "blendgraph.toml";

/// Default requests per second for the global rate limiter.
pub const DEFAULT_RATE_LIMIT: u32 = 100;

// =============================================================================
// BACKEND
// =============================================================================

/// Which storage engine backs the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-memory graph, loaded from and saved to a JSON catalog file.
    Memory,
    /// redb database file.
    #[default]
    Redb,
}

impl FromStr for BackendKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "file" | "json" => Ok(Self::Memory),
            "redb" => Ok(Self::Redb),
            other => Err(AppError::Config(format!(
                "unknown backend '{}': expected 'memory' or 'redb'",
                other
            ))),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => f.write_str("memory"),
            Self::Redb => f.write_str("redb"),
        }
    }
}

// =============================================================================
// SECTIONS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: BackendKind,
    /// redb file, or the JSON catalog file for the memory backend.
    pub database: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Redb,
            database: PathBuf::from("blendgraph.db"),
        }
    }
}

/// Traversal ceilings. Mirrors [`TraversalLimits`] with per-field defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_nodes: usize,
    pub max_depth: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        let limits = TraversalLimits::default();
        Self {
            max_nodes: limits.max_nodes,
            max_depth: limits.max_depth,
        }
    }
}

impl From<LimitsConfig> for TraversalLimits {
    fn from(config: LimitsConfig) -> Self {
        TraversalLimits::new(config.max_nodes, config.max_depth)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Bearer key required on every route except `/health`. Empty disables.
    pub api_key: Option<String>,
    /// Requests per second across all clients. 0 disables rate limiting.
    pub rate_limit: u32,
    /// Allowed CORS origins. `["*"]` allows any; unset means localhost only.
    pub cors_origins: Option<Vec<String>>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            api_key: None,
            rate_limit: DEFAULT_RATE_LIMIT,
            cors_origins: None,
        }
    }
}

impl ServerConfig {
    /// `host:port`, ready for `TcpListener::bind`.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The configured API key, if authentication is enabled.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.is_empty())
    }
}

// =============================================================================
// APP CONFIG
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub limits: LimitsConfig,
    pub server: ServerConfig,
}

impl AppConfig {
    /// Parse a TOML document. Missing sections and keys take defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, AppError> {
        toml::from_str(text).map_err(|e| AppError::Config(format!("invalid config: {}", e)))
    }

    /// Load configuration from `path`, or from `blendgraph.toml` in the
    /// working directory if present. An explicit path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };

        if !path.exists() {
            if required {
                return Err(AppError::Config(format!(
                    "config file '{}' not found",
                    path.display()
                )));
            }
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(&path).map_err(|e| {
            AppError::Io(format!("cannot read config '{}': {}", path.display(), e))
        })?;
        tracing::debug!(path = %path.display(), "loaded configuration file");
        Self::from_toml_str(&text)
    }

    /// Apply `BLENDGRAPH_*` overrides from the process environment.
    pub fn with_env(self) -> Result<Self, AppError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `BLENDGRAPH_*` overrides from `lookup`.
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, AppError> {
        if let Some(backend) = lookup("BLENDGRAPH_BACKEND") {
            self.storage.backend = backend.parse()?;
        }
        if let Some(database) = lookup("BLENDGRAPH_DATABASE") {
            self.storage.database = PathBuf::from(database);
        }
        if let Some(value) = lookup("BLENDGRAPH_MAX_NODES") {
            self.limits.max_nodes = parse_number("BLENDGRAPH_MAX_NODES", &value)?;
        }
        if let Some(value) = lookup("BLENDGRAPH_MAX_DEPTH") {
            self.limits.max_depth = parse_number("BLENDGRAPH_MAX_DEPTH", &value)?;
        }
        if let Some(host) = lookup("BLENDGRAPH_HOST") {
            self.server.host = host;
        }
        if let Some(value) = lookup("BLENDGRAPH_PORT") {
            self.server.port = parse_number("BLENDGRAPH_PORT", &value)?;
        }
        if let Some(key) = lookup("BLENDGRAPH_API_KEY") {
            self.server.api_key = Some(key).filter(|k| !k.is_empty());
        }
        if let Some(value) = lookup("BLENDGRAPH_RATE_LIMIT") {
            self.server.rate_limit = parse_number("BLENDGRAPH_RATE_LIMIT", &value)?;
        }
        if let Some(origins) = lookup("BLENDGRAPH_CORS_ORIGINS") {
            self.server.cors_origins = Some(
                origins
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            );
        }
        Ok(self)
    }

    pub fn traversal_limits(&self) -> TraversalLimits {
        self.limits.into()
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T, AppError> {
    value
        .trim()
        .parse()
        .map_err(|_| AppError::Config(format!("{} must be a number, got '{}'", key, value)))
}

// =============================================================================
// TESTS
// =============================================================================
