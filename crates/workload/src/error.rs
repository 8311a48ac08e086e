use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkloadError {
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("payload is empty, nothing to decode")]
    EmptyRaster,

    #[error("invalid processor setting: {0}")]
    InvalidSetting(String),
}
