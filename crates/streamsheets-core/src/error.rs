//! Error types for the streamsheets runtime.
//!
//! Only loading and I/O fail with these. Evaluation problems never leave a
//! pass; they are stored in cells as error values.

use thiserror::Error;

/// Errors that can occur while building or loading a machine
#[derive(Error, Debug)]
pub enum StreamsheetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Invalid machine file: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Cannot write machine file: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("File too large: {size} bytes (limit {limit})")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("A streamsheet named '{0}' already exists")]
    DuplicateSheet(String),

    #[error("Rhai compile error: {0}")]
    RhaiCompile(String),

    #[error("Invalid setting for '{sheet}': {message}")]
    Setting { sheet: String, message: String },
}

pub type Result<T> = std::result::Result<T, StreamsheetError>;
