//! TOML configuration.
//!
//! Only `[db].path` is required; every other setting has a default so a
//! three-line config file is enough to load and search a catalog.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    /// Size of the read pool used by search and stats.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    8
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Rows written per transaction.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Upper bound on parallel workers; the effective pool is also capped by
    /// available parallelism and the number of files.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// File extensions (without the dot, case-insensitive) treated as input.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// Minimum delay between two row-progress events for the same file.
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_workers: default_max_workers(),
            extensions: default_extensions(),
            progress_interval_ms: default_progress_interval_ms(),
        }
    }
}

fn default_batch_size() -> usize {
    5000
}
fn default_max_workers() -> usize {
    42
}
fn default_extensions() -> Vec<String> {
    ["xlsx", "xls", "csv", "tsv"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_progress_interval_ms() -> u64 {
    2000
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_per_page")]
    pub default_per_page: i64,
    #[serde(default = "default_max_per_page")]
    pub max_per_page: i64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_per_page: default_per_page(),
            max_per_page: default_max_per_page(),
        }
    }
}

fn default_per_page() -> i64 {
    20
}
fn default_max_per_page() -> i64 {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:6301".to_string()
}

impl Config {
    /// Defaults for every section with the database at `db_path`.
    pub fn minimal(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
                max_connections: default_max_connections(),
            },
            ingest: IngestConfig::default(),
            search: SearchConfig::default(),
            server: ServerConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.db.max_connections == 0 {
            anyhow::bail!("db.max_connections must be > 0");
        }
        if self.ingest.batch_size == 0 {
            anyhow::bail!("ingest.batch_size must be > 0");
        }
        if self.ingest.max_workers == 0 {
            anyhow::bail!("ingest.max_workers must be > 0");
        }
        if self.ingest.extensions.is_empty() {
            anyhow::bail!("ingest.extensions must list at least one extension");
        }
        if self.search.max_per_page < 1 {
            anyhow::bail!("search.max_per_page must be >= 1");
        }
        if !(1..=self.search.max_per_page).contains(&self.search.default_per_page) {
            anyhow::bail!(
                "search.default_per_page must be in [1, {}]",
                self.search.max_per_page
            );
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_db_path_is_required() {
        let cfg = parse_config("[db]\npath = \"/tmp/shelf.sqlite\"\n").unwrap();
        assert_eq!(cfg.ingest.batch_size, 5000);
        assert_eq!(cfg.ingest.max_workers, 42);
        assert_eq!(cfg.ingest.extensions, vec!["xlsx", "xls", "csv", "tsv"]);
        assert_eq!(cfg.search.default_per_page, 20);
        assert_eq!(cfg.server.bind, "127.0.0.1:6301");
    }

    #[test]
    fn rejects_zero_batch_size() {
        let err = parse_config("[db]\npath = \"x.sqlite\"\n[ingest]\nbatch_size = 0\n")
            .unwrap_err()
            .to_string();
        assert!(err.contains("batch_size"), "{}", err);
    }

    #[test]
    fn rejects_default_page_above_max() {
        let toml = "[db]\npath = \"x.sqlite\"\n[search]\ndefault_per_page = 50\nmax_per_page = 10\n";
        assert!(parse_config(toml).is_err());
    }

    #[test]
    fn missing_db_section_is_an_error() {
        assert!(parse_config("[server]\nbind = \"0.0.0.0:1\"\n").is_err());
    }
}
