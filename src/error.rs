use std::path::PathBuf;

use thiserror::Error;

/// Failure to obtain the feed snapshot. Never fatal: the next tick retries.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("feed responded with status {0}")]
    Status(u16),
    #[error("feed body is not valid json: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Failure to download one image. The image is skipped.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("image request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("image host responded with status {0}")]
    Status(u16),
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("telegram request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("telegram error {code}: {description}")]
    Api { code: u16, description: String },
    #[error("{0} attachments exceed the per-message limit")]
    TooManyAttachments(usize),
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("watermark file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot encode watermark: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("watermark file {path} is corrupt: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("watermark writer task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("missing required setting {0}")]
    Missing(&'static str),
}

/// Errors that stop the dispatch of the current post and the poller with it.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("watermark could not be persisted after {attempts} attempts: {source}")]
    Persist {
        attempts: u32,
        #[source]
        source: PersistError,
    },
}
