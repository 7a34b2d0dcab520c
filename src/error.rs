//! Error taxonomy shared by sources, transforms and sinks.
//!
//! Service glue (providers, coordinator) works with `anyhow::Result`; the
//! building blocks underneath return the typed [`Error`] so a loop can decide
//! whether a failure ends the process or only the current iteration.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias used by the library building blocks.
pub type Result<T> = std::result::Result<T, Error>;

/// Settings could not be located, read, parsed or validated.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("settings file not found (looked in: {})", format_paths(.searched))]
    NotFound { searched: Vec<PathBuf> },

    #[error("failed to read settings file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid settings:\n  - {}", .problems.join("\n  - "))]
    Invalid { problems: Vec<String> },
}

fn format_paths(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return "<no candidate locations>".to_string();
    }
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Main error type for camlinkd building blocks.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Source or sink unreachable.
    #[error("network error: {0}")]
    Network(String),

    /// Remote answered with a non-2xx status.
    #[error("{url} answered with HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("timed out: {0}")]
    Timeout(String),

    /// Overlay or event push failed. Never fatal.
    #[error("sink error: {0}")]
    Sink(String),

    /// A persistent source connection ended.
    #[error("source closed: {0}")]
    SourceClosed(String),

    #[error("fatal: {0}")]
    Fatal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the loop that hit this error must stop and hand control back
    /// to the supervisor.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Config(_) | Error::SourceClosed(_) | Error::DeviceNotFound(_) | Error::Fatal(_)
        )
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return Error::Timeout(e.to_string());
        }
        match e.status() {
            Some(status) => Error::HttpStatus {
                url: e.url().map(|u| u.to_string()).unwrap_or_default(),
                status: status.as_u16(),
            },
            None => Error::Network(e.to_string()),
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::Network(format!("websocket: {e}"))
    }
}

impl From<hidapi::HidError> for Error {
    fn from(e: hidapi::HidError) -> Self {
        Error::Io(std::io::Error::other(e.to_string()))
    }
}
