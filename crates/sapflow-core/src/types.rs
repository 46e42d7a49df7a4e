//! Common types used throughout the SapFlow system

use crate::error::{FlowError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// SAP logon credentials stored in the data service
#[derive(Clone, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub platform: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("platform", &self.platform)
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

impl CredentialRecord {
    pub const REQUIRED_KEYS: [&'static str; 3] = ["platform", "username", "password"];

    /// Extract the credential from a stored document.
    ///
    /// Fails when the document is not an object or lacks a required key.
    pub fn from_document(document: &Value) -> Result<Self> {
        let object = document.as_object().ok_or_else(|| {
            FlowError::InvalidDataFormat("SAP credential document is not an object".to_string())
        })?;

        let field = |key: &str| -> Result<String> {
            match object.get(key) {
                Some(Value::String(s)) => Ok(s.clone()),
                Some(Value::Null) | None => {
                    Err(FlowError::InvalidDataFormat(format!("Missing expected key: {}", key)))
                }
                Some(other) => Ok(other.to_string()),
            }
        };

        Ok(Self {
            platform: field("platform")?,
            username: field("username")?,
            password: field("password")?,
        })
    }
}

/// SMTP connection settings resolved from the data service
#[derive(Clone, Serialize, Deserialize)]
pub struct SmtpCredentials {
    pub username: String,
    pub password: String,
    pub url: String,
    pub port: u16,
}

impl std::fmt::Debug for SmtpCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpCredentials")
            .field("username", &self.username)
            .field("url", &self.url)
            .field("port", &self.port)
            .finish()
    }
}

/// One spreadsheet row, i.e. one transaction invocation
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRow {
    /// Zero-based data row index (header excluded)
    pub index: usize,
    pub order: f64,
    /// Every cell of the row keyed by its header, rendered as text
    pub fields: BTreeMap<String, String>,
}

impl OrderRow {
    /// Order number as it is typed into SAP (no trailing `.0`)
    pub fn order_number(&self) -> String {
        if self.order.fract() == 0.0 && self.order.abs() < 1e15 {
            format!("{}", self.order as i64)
        } else {
            self.order.to_string()
        }
    }
}

/// Structured description of a failure, persisted to the errors collection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorRecord {
    pub error_message: String,
    pub traceback: String,
    pub timestamp: String,
    pub exception_type: String,
    pub exception_args: Vec<String>,
    pub exception_module: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception_file: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception_line: Option<u32>,

    pub status: String,
}

impl ErrorRecord {
    /// Record as a JSON object, fields in declaration order
    pub fn to_document(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
