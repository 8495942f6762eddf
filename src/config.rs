//! Configuration loading and management.
//!
//! Resolution order:
//! 1. Explicit file (`--config` or `TIMELY_CONFIG_PATH`)
//! 2. `./timely/config.yaml`
//! 3. `<user config dir>/timely/config.yaml`
//! 4. Built-in defaults
//!
//! Environment variables (`TIMELY_DB_PATH`, `TIMELY_HOST`, `TIMELY_PORT`,
//! `TIMELY_TREE_DEPTH`) are applied on top of whichever file was used.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "TIMELY_CONFIG_PATH";

/// Planner configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
}

/// Server-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Address to bind.
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Prefix for every route, e.g. `/timely/api`. Empty serves at the root.
    #[serde(default)]
    pub base_path: String,

    /// Origins allowed by CORS. `"*"` allows any origin.
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// Descendant levels loaded under each returned task.
    #[serde(default = "default_tree_depth")]
    pub tree_depth: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            host: default_host(),
            port: default_port(),
            base_path: String::new(),
            cors_origins: default_cors_origins(),
            tree_depth: default_tree_depth(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("planner.db")
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:5173".to_string(),
        "http://127.0.0.1:5173".to_string(),
    ]
}

fn default_tree_depth() -> usize {
    crate::db::tasks::DEFAULT_TREE_DEPTH
}

impl Config {
    /// Load configuration from file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(config)
    }

    /// Candidate config files, most specific first.
    pub fn search_paths(explicit: Option<&Path>) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(path) = explicit {
            paths.push(path.to_path_buf());
        } else if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            paths.push(PathBuf::from(path));
        }
        paths.push(PathBuf::from("timely/config.yaml"));
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("timely").join("config.yaml"));
        }
        paths
    }

    /// Load from the first existing search path, then apply environment overrides.
    ///
    /// An explicitly named file that is missing or invalid is an error; the
    /// implicit locations are skipped when absent.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        let explicit = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from));

        let mut config = match explicit {
            Some(ref path) => Self::load(path)?,
            None => Self::search_paths(None)
                .into_iter()
                .find(|p| p.is_file())
                .map(|p| {
                    debug!(path = %p.display(), "Loading config");
                    Self::load(&p)
                })
                .transpose()?
                .unwrap_or_default(),
        };

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply environment overrides using `lookup` to read variables.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(db_path) = lookup("TIMELY_DB_PATH") {
            self.server.db_path = PathBuf::from(db_path);
        }

        if let Some(host) = lookup("TIMELY_HOST") {
            self.server.host = host;
        }

        if let Some(port) = lookup("TIMELY_PORT") {
            match port.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => warn!(value = %port, "Ignoring invalid TIMELY_PORT"),
            }
        }

        if let Some(depth) = lookup("TIMELY_TREE_DEPTH") {
            match depth.parse() {
                Ok(depth) => self.server.tree_depth = depth,
                Err(_) => warn!(value = %depth, "Ignoring invalid TIMELY_TREE_DEPTH"),
            }
        }
    }

    /// Ensure the database directory exists.
    pub fn ensure_db_dir(&self) -> Result<()> {
        if let Some(parent) = self.server.db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}
