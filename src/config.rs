use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: PathBuf,
    pub host: String,
    pub port: u16,
    /// Root directory for lesson media and thumbnails, served under `/uploads`
    pub upload_dir: PathBuf,
    /// Certificates are written here and served under `/certificates`
    pub certificate_dir: PathBuf,
    /// Daily rolling log files go here; stdout when unset
    pub log_dir: Option<PathBuf>,
    pub session_ttl_days: i64,
    pub secure_cookies: bool,
    pub max_upload_mb: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: PathBuf::from("database/course.db"),
            host: "127.0.0.1".to_string(),
            port: 8080,
            upload_dir: PathBuf::from("uploads"),
            certificate_dir: PathBuf::from("certificates"),
            log_dir: None,
            session_ttl_days: 5,
            secure_cookies: false,
            max_upload_mb: 500,
        }
    }
}

impl Config {
    /// Reads a TOML config file; missing keys fall back to defaults.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        Ok(config)
    }

    /// `DATABASE_URL` wins over the file, as in most sqlx deployments.
    pub fn apply_env(&mut self) {
        if let Ok(url) = dotenvy::var("DATABASE_URL") {
            let path = url.strip_prefix("sqlite://").unwrap_or(&url);
            let path = path.strip_prefix("sqlite:").unwrap_or(path);
            self.database = PathBuf::from(path);
        }
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb * 1024 * 1024
    }
}
