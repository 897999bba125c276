use std::path::PathBuf;
use thiserror::Error;

/// Failure while turning one upload into a compressed image.
///
/// Payloads are plain strings so the error can ride along inside UI messages.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompressError {
    #[error("could not decode image: {0}")]
    Decode(String),

    #[error("{format} encoding failed: {reason}")]
    Encode { format: String, reason: String },

    #[error("compression task aborted: {0}")]
    Task(String),
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("nothing to save, compress images first")]
    NothingToExport,

    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to build archive: {0}")]
    Archive(#[from] zip::result::ZipError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config value: {0}")]
    Invalid(String),
}
