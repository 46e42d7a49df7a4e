//! SapFlow Core Library
//!
//! Business logic for the SAP order automation: data-service clients,
//! notifications, failure reporting, the SAP GUI session and the order runner.

pub mod clients;
pub mod config;
pub mod constants;
pub mod erp;
pub mod error;
pub mod services;
pub mod spreadsheet;
pub mod types;
pub mod utils;
pub mod workflow;

// Re-export main types for easy access
pub use config::{load_config, AppConfig};
pub use error::{FlowError, Result};
pub use types::{CredentialRecord, ErrorRecord, OrderRow, SmtpCredentials};

// Re-export all client types
pub use clients::{get_ad_user, DataService, DirectoryQuery, MemoryStore, OpenIapClient};

// Re-export automation types
pub use erp::{ErpBackend, SapGui, ScriptedBridge, TransactionStep, VbsBridge};

// Re-export service types
pub use services::{DesktopNotifier, EmailSender, ExceptionHandler, OutgoingEmail, SmsGateway, UncaughtFailure};

// Re-export workflow types
pub use workflow::{OrderRunner, PauseMode, RunOutcome, RunSummary};
