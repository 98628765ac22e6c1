use crate::error::{ExporterError, Result};
use crate::selector::{ServerSelection, CLOSEST_SERVER_ID};
use directories::ProjectDirs;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Rough upper bound for one full latency/download/upload run against one server.
const SECS_PER_SERVER: u64 = 60;
const SCRAPE_TIMEOUT_SLACK_SECS: u64 = 10;

/// 运行配置
///
/// Resolution order:
/// 1. `--config <path>` (must exist)
/// 2. User config (~/.config/speedtest-exporter/config.toml) if present
/// 3. Built-in defaults
///
/// Command line flags override whatever the file says.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub port: u16,
    pub server_ids: Vec<i64>,
    pub server_fallback: bool,
    pub log_format: String,
    /// Overrides the deadline derived from the number of servers.
    pub scrape_timeout_secs: Option<u64>,
    pub transfer: TransferSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: 9090,
            server_ids: vec![CLOSEST_SERVER_ID],
            server_fallback: false,
            log_format: "pretty".to_string(),
            scrape_timeout_secs: None,
            transfer: TransferSettings::default(),
        }
    }
}

/// Knobs for the speedtest.net transfers
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TransferSettings {
    pub request_timeout_secs: u64,
    pub ping_samples: usize,
    /// Edge length of the random image requested, e.g. 1500 -> random1500x1500.jpg
    pub download_size: u32,
    pub download_connections: usize,
    pub upload_bytes: usize,
    pub upload_connections: usize,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            ping_samples: 10,
            download_size: 1500,
            download_connections: 4,
            upload_bytes: 2 * 1024 * 1024,
            upload_connections: 4,
        }
    }
}

impl TransferSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Settings {
    /// Load settings from `path`, or from the user config file when `path` is `None`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => {
                if !p.exists() {
                    return Err(ExporterError::InvalidConfig(format!(
                        "config file not found: {:?}",
                        p
                    )));
                }
                p.to_path_buf()
            }
            None => match default_config_path() {
                Some(p) if p.exists() => p,
                _ => return Ok(Self::default()),
            },
        };

        let content = fs::read_to_string(&path)?;
        let settings: Settings = toml::from_str(&content)?;
        settings.validate()?;
        tracing::debug!(path = ?path, "loaded settings");
        Ok(settings)
    }

    /// Apply command line overrides. `server_ids` uses the comma separated flag syntax.
    pub fn with_overrides(
        mut self,
        port: Option<u16>,
        server_ids: Option<&str>,
        server_fallback: bool,
    ) -> Result<Self> {
        if let Some(port) = port {
            self.port = port;
        }
        if let Some(ids) = server_ids {
            self.server_ids = parse_server_ids(ids)?;
        }
        // a bare flag can only switch fallback on
        self.server_fallback |= server_fallback;
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server_ids.is_empty() {
            return Err(ExporterError::InvalidConfig(
                "server_ids must not be empty".to_string(),
            ));
        }
        if !matches!(self.log_format.as_str(), "pretty" | "json") {
            return Err(ExporterError::InvalidConfig(format!(
                "unknown log_format '{}', expected pretty or json",
                self.log_format
            )));
        }
        let t = &self.transfer;
        if t.ping_samples == 0 || t.download_connections == 0 || t.upload_connections == 0 {
            return Err(ExporterError::InvalidConfig(
                "transfer sample and connection counts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn selection(&self) -> ServerSelection {
        ServerSelection::new(self.server_ids.clone(), self.server_fallback)
    }

    /// Deadline for one scrape: a minute per requested server plus some slack.
    pub fn scrape_timeout(&self) -> Duration {
        let secs = self.scrape_timeout_secs.unwrap_or_else(|| {
            self.server_ids.len() as u64 * SECS_PER_SERVER + SCRAPE_TIMEOUT_SLACK_SECS
        });
        Duration::from_secs(secs)
    }
}

/// ~/.config/speedtest-exporter/config.toml (platform dependent)
pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "speedtest-exporter")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Split a comma separated list of server ids. Empty entries are skipped.
pub fn parse_server_ids(s: &str) -> Result<Vec<i64>> {
    let s = s.trim();
    if s.is_empty() {
        return Err(ExporterError::InvalidConfig(
            "server_ids must not be empty".to_string(),
        ));
    }

    let mut ids = Vec::new();
    for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let id = part.parse::<i64>().map_err(|e| {
            ExporterError::InvalidConfig(format!("invalid server ID '{}': {}", part, e))
        })?;
        ids.push(id);
    }

    if ids.is_empty() {
        return Err(ExporterError::InvalidConfig(
            "server_ids must not be empty".to_string(),
        ));
    }
    Ok(ids)
}
