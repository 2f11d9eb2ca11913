use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ScanError {
    #[error("input path not found: {0}")]
    InvalidPath(PathBuf),

    #[error("unsupported dataset type: {0}")]
    UnsupportedType(PathBuf),

    #[error("invalid file pattern: {0}")]
    InvalidPattern(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to read cache file {path}: {message}")]
    CacheRead { path: PathBuf, message: String },

    #[error("failed to write cache file {path}: {message}")]
    CacheWrite { path: PathBuf, message: String },

    #[error("failed to process {dataset}: {message}")]
    Processing { dataset: String, message: String },

    #[error("integrity check failed for {path}: {message}")]
    Integrity { path: PathBuf, message: String },

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("no files matched {0}")]
    #[diagnostic(help("check the file pattern, or pass --all-extensions to accept any file"))]
    NoMatchingFiles(String),
}

impl ScanError {
    pub fn processing(dataset: impl Into<String>, message: impl ToString) -> Self {
        ScanError::Processing {
            dataset: dataset.into(),
            message: message.to_string(),
        }
    }
}
