//! Error taxonomy for the expense pipeline.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    /// File extension outside the supported set; the file is never opened.
    #[error("unsupported file format '{extension}': {}", .path.display())]
    UnsupportedFormat { path: PathBuf, extension: String },

    /// No encoding/delimiter combination produced a table with more than one column.
    #[error("could not read file: {}", .0.display())]
    UnreadableFile(PathBuf),

    /// Required columns absent after alias normalization. Recovered at batch level.
    #[error("missing required columns in {file}: {}", .missing.join(", "))]
    MissingColumns { file: String, missing: Vec<String> },

    /// Archive entry would land outside the extraction directory.
    #[error("malicious archive entry detected: {entry}")]
    MaliciousArchive { entry: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("no data files found in {}", .0.display())]
    NoSourceFiles(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("spreadsheet error: {0}")]
    Spreadsheet(#[from] calamine::Error),
}

impl EtlError {
    /// True for the one failure a batch run recovers from by skipping the file.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, EtlError::MissingColumns { .. })
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;
