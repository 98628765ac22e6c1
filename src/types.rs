use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// 发起测速的客户端信息 (来自 speedtest-config.php)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    pub ip: String,
    pub lat: String,
    pub lon: String,
    pub isp: String,
}

/// 测速服务器定义
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Server {
    pub id: String,
    pub name: String,
    pub country: String,
    pub lat: String,
    pub lon: String,
    /// Distance from the caller in km.
    #[serde(default)]
    pub distance: f64,
    /// Upload endpoint, e.g. "http://host:8080/speedtest/upload.php"
    #[serde(default)]
    pub url: String,
    /// "host:port" of the test server.
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub sponsor: String,
}

impl Server {
    #[cfg(test)]
    pub fn new(id: &str, name: &str, country: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            country: country.to_string(),
            ..Default::default()
        }
    }

    /// Base URL the test files live under (the upload URL without "upload.php").
    pub fn base_url(&self) -> &str {
        match self.url.rfind('/') {
            Some(idx) => &self.url[..idx],
            None => &self.url,
        }
    }
}

/// 单个测速阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Latency,
    Download,
    Upload,
}

impl Stage {
    /// Execution order within one server.
    pub const ALL: [Stage; 3] = [Stage::Latency, Stage::Download, Stage::Upload];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Latency => "ping",
            Stage::Download => "download",
            Stage::Upload => "upload",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Values collected by the stages of one server. A failed stage leaves its slot empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageResults {
    pub latency: Option<Duration>,
    /// Bytes per second.
    pub download: Option<f64>,
    /// Bytes per second.
    pub upload: Option<f64>,
}

impl StageResults {
    pub fn is_complete(&self) -> bool {
        self.latency.is_some() && self.download.is_some() && self.upload.is_some()
    }
}

/// 单台服务器的测速结果
#[derive(Debug, Clone)]
pub struct ServerReport {
    pub server: Server,
    pub results: StageResults,
}

impl ServerReport {
    pub fn healthy(&self) -> bool {
        self.results.is_complete()
    }
}

/// Outcome of one scrape. Nothing of it is kept once the scrape has been answered.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub user: Option<UserInfo>,
    pub servers: Vec<ServerReport>,
    pub healthy: bool,
    pub elapsed: Duration,
}
