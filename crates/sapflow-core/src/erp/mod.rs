//! ERP automation behind a narrow async trait

pub mod bridge;
pub mod fake;
pub mod sapgui;
pub mod steps;

use crate::error::Result;
use crate::types::{CredentialRecord, OrderRow};
use async_trait::async_trait;

pub use bridge::{GuiCommand, ScriptingBridge, VbsBridge};
pub use fake::ScriptedBridge;
pub use sapgui::SapGui;
pub use steps::TransactionStep;

/// One interactive ERP session, exclusively owned by the order runner
#[async_trait]
pub trait ErpBackend: Send {
    /// Start the client and attach to a session on `credentials.platform`
    async fn open_session(&mut self, credentials: &CredentialRecord) -> Result<()>;

    /// Log in with the credentials passed to `open_session`
    async fn login(&mut self) -> Result<()>;

    /// Run `command` for one spreadsheet row
    async fn run_transaction(&mut self, command: &str, order: &OrderRow) -> Result<()>;

    async fn close_session(&mut self) -> Result<()>;
}
