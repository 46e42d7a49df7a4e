//! Configuration management for the SapFlow system

use crate::constants::{
    DEFAULT_CONFIG_FILE, DEFAULT_ERRORS_COLLECTION, DEFAULT_INPUT_PATH, DEFAULT_ORDER_COLUMN,
    MULTI_LOGON_MARKER, OPENIAP_DEFAULT_URL, OPENIAP_JWT_ENV, OPENIAP_URL_ENV,
};
use crate::erp::steps::{default_transaction_steps, TransactionStep};
use crate::error::{FlowError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure, matching configs.json
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub notify: NotifyConfig,

    #[serde(default)]
    pub report: Option<ReportConfig>,

    pub database: DatabaseConfig,
    pub sap_app: SapAppConfig,

    #[serde(default)]
    pub input: InputConfig,

    #[serde(default)]
    pub openiap: OpenIapConfig,

    #[serde(default)]
    pub sms: Option<SmsGatewayConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    pub subject: String,
    pub recipient_email: String,

    #[serde(default)]
    pub message_body: String,

    /// Send `message_body` to `recipient_email` after a completed run
    #[serde(default)]
    pub on_completion: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    pub subject: String,

    #[serde(alias = "recipient_email")]
    pub to: String,

    #[serde(default)]
    pub sms: Option<SmsAlertConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsAlertConfig {
    pub number: String,
}

/// Collection name plus the query used to look a document up in it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionQuery {
    pub collection: String,

    #[serde(default = "empty_query")]
    pub query: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub webmail: CollectionQuery,
    pub sap: CollectionQuery,

    #[serde(default = "default_errors_collection")]
    pub errors_collection: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SapAppConfig {
    pub client: String,
    pub language: String,

    /// Path to the SAP Logon executable
    pub path: PathBuf,

    pub transaction_code: String,

    /// Element whose presence signals the transaction screen is ready
    #[serde(default = "default_ready_element")]
    pub ready_element: String,

    #[serde(default = "default_multi_logon_marker")]
    pub multi_logon_marker: String,

    #[serde(default)]
    pub timing: SapTiming,

    #[serde(default = "default_transaction_steps")]
    pub steps: Vec<TransactionStep>,
}

/// Fixed waits and polling used while driving the GUI
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SapTiming {
    #[serde(default = "default_launch_settle")]
    pub launch_settle_secs: u64,

    #[serde(default = "default_connect_settle")]
    pub connect_settle_secs: u64,

    #[serde(default = "default_login_settle")]
    pub login_settle_secs: u64,

    #[serde(default = "default_element_timeout")]
    pub element_timeout_secs: u64,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl SapTiming {
    /// No waits at all, for scripted bridges
    pub fn immediate() -> Self {
        Self {
            launch_settle_secs: 0,
            connect_settle_secs: 0,
            login_settle_secs: 0,
            element_timeout_secs: 0,
            poll_interval_ms: 0,
        }
    }

    pub fn launch_settle(&self) -> Duration {
        Duration::from_secs(self.launch_settle_secs)
    }

    pub fn connect_settle(&self) -> Duration {
        Duration::from_secs(self.connect_settle_secs)
    }

    pub fn login_settle(&self) -> Duration {
        Duration::from_secs(self.login_settle_secs)
    }

    pub fn element_timeout(&self) -> Duration {
        Duration::from_secs(self.element_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for SapTiming {
    fn default() -> Self {
        Self {
            launch_settle_secs: default_launch_settle(),
            connect_settle_secs: default_connect_settle(),
            login_settle_secs: default_login_settle(),
            element_timeout_secs: default_element_timeout(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    #[serde(default = "default_input_path")]
    pub path: PathBuf,

    #[serde(alias = "column", default = "default_order_column")]
    pub order_column: String,

    /// Worksheet to read; the first one when unset
    #[serde(default)]
    pub sheet: Option<String>,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            path: default_input_path(),
            order_column: default_order_column(),
            sheet: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OpenIapConfig {
    #[serde(alias = "apiurl", default)]
    pub url: Option<String>,

    #[serde(default)]
    pub jwt: Option<String>,
}

impl OpenIapConfig {
    /// Gateway URL from the file, the `apiurl` variable, or the public default
    pub fn resolved_url(&self) -> String {
        self.url
            .clone()
            .filter(|u| !u.is_empty())
            .or_else(|| std::env::var(OPENIAP_URL_ENV).ok().filter(|u| !u.is_empty()))
            .unwrap_or_else(|| OPENIAP_DEFAULT_URL.to_string())
            .trim_end_matches('/')
            .to_string()
    }

    /// Token from the file or the `jwt` variable
    pub fn resolved_jwt(&self) -> Option<String> {
        self.jwt
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| std::env::var(OPENIAP_JWT_ENV).ok().filter(|t| !t.is_empty()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsGatewayConfig {
    pub url: String,
    pub uid: String,
    pub pw: String,

    #[serde(alias = "o")]
    pub originator: String,
}

// Default functions
fn empty_query() -> Value {
    Value::Object(serde_json::Map::new())
}

fn default_errors_collection() -> String {
    DEFAULT_ERRORS_COLLECTION.to_string()
}

fn default_ready_element() -> String {
    "wnd[0]/tbar[1]/btn[5]".to_string()
}

fn default_multi_logon_marker() -> String {
    MULTI_LOGON_MARKER.to_string()
}

fn default_launch_settle() -> u64 {
    2
}

fn default_connect_settle() -> u64 {
    3
}

fn default_login_settle() -> u64 {
    2
}

fn default_element_timeout() -> u64 {
    60
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_input_path() -> PathBuf {
    PathBuf::from(DEFAULT_INPUT_PATH)
}

fn default_order_column() -> String {
    DEFAULT_ORDER_COLUMN.to_string()
}

/// Load the configuration from `path`, or from `configs.json` when `None`.
///
/// The file is read on every call.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    AppConfig::from_file(path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE)))
}

impl AppConfig {
    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(FlowError::ConfigNotFound(path.to_path_buf()));
            }
            Err(e) => return Err(FlowError::Io(e)),
        };

        Self::parse(&content, path)
    }

    /// Load configuration from a JSON string
    pub fn from_json_str(json: &str) -> Result<Self> {
        Self::parse(json, Path::new("<inline>"))
    }

    fn parse(json: &str, origin: &Path) -> Result<Self> {
        let config: AppConfig = serde_json::from_str(json).map_err(|e| FlowError::ConfigFormat {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Subject and recipient for error reports, falling back to `notify`
    pub fn report_target(&self) -> (&str, &str) {
        match &self.report {
            Some(report) => (report.subject.as_str(), report.to.as_str()),
            None => (self.notify.subject.as_str(), self.notify.recipient_email.as_str()),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.sap_app.transaction_code.trim().is_empty() {
            return Err(FlowError::Config("SAP transaction code is required".to_string()));
        }

        if self.sap_app.path.as_os_str().is_empty() {
            return Err(FlowError::Config("SAP Logon path is required".to_string()));
        }

        if self.database.sap.collection.is_empty() || self.database.webmail.collection.is_empty() {
            return Err(FlowError::Config(
                "Database collections for sap and webmail are required".to_string(),
            ));
        }

        if self.input.order_column.trim().is_empty() {
            return Err(FlowError::Config("Input order column is required".to_string()));
        }

        if self.sap_app.steps.is_empty() {
            return Err(FlowError::Config("At least one SAP transaction step is required".to_string()));
        }

        Ok(())
    }
}
