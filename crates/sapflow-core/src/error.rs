//! Error types for the SapFlow system

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for all SapFlow operations
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Configuration file '{}' not found.", .0.display())]
    ConfigNotFound(PathBuf),

    #[error("Invalid JSON format in '{}': {message}", .path.display())]
    ConfigFormat { path: PathBuf, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("File system error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("No data: {0}")]
    NoData(String),

    #[error("Data retrieval failed: {0}")]
    DataRetrieval(String),

    #[error("Invalid data format: {0}")]
    InvalidDataFormat(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Spreadsheet error: {0}")]
    Spreadsheet(String),

    #[error("Email error: {0}")]
    Email(String),

    #[error("SAP GUI error: {0}")]
    Erp(String),

    #[error("SAP login failed: {0}")]
    LoginFailed(String),

    #[error("Timed out: {0}")]
    Timeout(String),
}

impl FlowError {
    /// Variant name, used as the `exception_type` of error records
    pub fn kind(&self) -> &'static str {
        match self {
            FlowError::ConfigNotFound(_) => "ConfigNotFound",
            FlowError::ConfigFormat { .. } => "ConfigFormat",
            FlowError::Config(_) => "Config",
            FlowError::Http(_) => "Http",
            FlowError::Json(_) => "Json",
            FlowError::Io(_) => "Io",
            FlowError::Auth(_) => "Auth",
            FlowError::ServiceUnavailable(_) => "ServiceUnavailable",
            FlowError::MalformedResponse(_) => "MalformedResponse",
            FlowError::NoData(_) => "NoData",
            FlowError::DataRetrieval(_) => "DataRetrieval",
            FlowError::InvalidDataFormat(_) => "InvalidDataFormat",
            FlowError::Validation(_) => "Validation",
            FlowError::Spreadsheet(_) => "Spreadsheet",
            FlowError::Email(_) => "Email",
            FlowError::Erp(_) => "Erp",
            FlowError::LoginFailed(_) => "LoginFailed",
            FlowError::Timeout(_) => "Timeout",
        }
    }
}

/// Result type for SapFlow operations
pub type Result<T> = std::result::Result<T, FlowError>;
