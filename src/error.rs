use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("input not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("parse error in {context}: {detail}")]
    Parse { context: String, detail: String },

    #[error("remote request failed for {url}: {detail}")]
    Remote { url: String, detail: String },

    #[error("schema error: {0}")]
    Schema(String),

    #[error("type error in column '{column}': {detail}")]
    Type { column: String, detail: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("spreadsheet error: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl EtlError {
    /// Parse failure with a short context tag ("csv row 4", a path, a URL).
    pub fn parse(context: impl Into<String>, detail: impl Into<String>) -> Self {
        EtlError::Parse {
            context: context.into(),
            detail: detail.into(),
        }
    }

    pub fn remote(url: impl Into<String>, detail: impl Into<String>) -> Self {
        EtlError::Remote {
            url: url.into(),
            detail: detail.into(),
        }
    }

    pub fn type_error(column: impl Into<String>, detail: impl Into<String>) -> Self {
        EtlError::Type {
            column: column.into(),
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;
