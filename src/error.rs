use crate::types::Stage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExporterError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO operation failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("Metrics encoding error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("could not fetch user information: {0}")]
    UserInfo(#[source] Box<ExporterError>),

    #[error("could not fetch server list: {0}")]
    ServerList(#[source] Box<ExporterError>),

    #[error("no servers available")]
    NoServers,

    #[error("server {0} not found and fallback disabled")]
    ServerNotFound(i64),

    #[error("{stage} test failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<ExporterError>,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{0}")]
    Custom(String),
}

impl ExporterError {
    pub fn stage(stage: Stage, source: ExporterError) -> Self {
        Self::Stage {
            stage,
            source: Box::new(source),
        }
    }

    /// True when the error, or the error it wraps, is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::UserInfo(inner) | Self::ServerList(inner) => inner.is_cancelled(),
            Self::Stage { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ExporterError>;
