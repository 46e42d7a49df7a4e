//! SAP GUI session driven through a [`ScriptingBridge`]

use super::bridge::{GuiCommand, ScriptingBridge};
use super::steps::TransactionStep;
use super::ErpBackend;
use crate::config::SapAppConfig;
use crate::error::{FlowError, Result};
use crate::types::{CredentialRecord, OrderRow};
use crate::utils::{generate_template, previous_month_range};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::{sleep, Instant};

// Fixed element paths of the SAP Logon screens
const MAIN_WINDOW: &str = "wnd[0]";
const POPUP_WINDOW: &str = "wnd[1]";
const COMMAND_FIELD: &str = "wnd[0]/tbar[0]/okcd";
const CLIENT_FIELD: &str = "wnd[0]/usr/txtRSYST-MANDT";
const USER_FIELD: &str = "wnd[0]/usr/txtRSYST-BNAME";
const PASSWORD_FIELD: &str = "wnd[0]/usr/pwdRSYST-BCODE";
const LANGUAGE_FIELD: &str = "wnd[0]/usr/txtRSYST-LANGU";
const MULTI_LOGON_OPTION: &str = "wnd[1]/usr/radMULTI_LOGON_OPT1";
const POPUP_CONFIRM: &str = "wnd[1]/tbar[0]/btn[0]";
const LOGGED_IN_MARKER: &str = "wnd[0]/tbar[0]/btn[15]";
const FIRST_SESSION: &str = "/app/con[0]/ses[0]";
const ENTER_VKEY: u32 = 0;

pub struct SapGui<B: ScriptingBridge> {
    bridge: B,
    config: SapAppConfig,
    credentials: Option<CredentialRecord>,
    connected: bool,
}

impl<B: ScriptingBridge> SapGui<B> {
    pub fn new(bridge: B, config: SapAppConfig) -> Self {
        Self { bridge, config, credentials: None, connected: false }
    }

    pub fn bridge(&self) -> &B {
        &self.bridge
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Poll for an element until it appears or `timeout` elapses.
    ///
    /// Bridge errors count as "not yet present".
    pub async fn wait_for_element(&mut self, id: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.element_exists(id).await {
                return true;
            }
            if Instant::now() >= deadline {
                log::warn!("Element {} not found after {}s", id, timeout.as_secs());
                return false;
            }
            sleep(self.config.timing.poll_interval()).await;
        }
    }

    /// Text of an element, `None` when it is absent or unreadable
    pub async fn element_text(&mut self, id: &str) -> Option<String> {
        if !self.element_exists(id).await {
            return None;
        }
        self.bridge.execute(&GuiCommand::ReadText { id: id.to_string() }).await.ok()
    }

    /// Leave SAP through the command field
    pub async fn logout(&mut self) -> Result<()> {
        self.require_connection()?;
        self.run(GuiCommand::SetText { id: COMMAND_FIELD.to_string(), value: "/nex".to_string() })
            .await?;
        self.run(GuiCommand::SendVKey { id: MAIN_WINDOW.to_string(), vkey: ENTER_VKEY }).await?;
        self.connected = false;
        log::info!("Logged out of SAP");
        Ok(())
    }

    async fn element_exists(&mut self, id: &str) -> bool {
        matches!(
            self.bridge.execute(&GuiCommand::ElementExists { id: id.to_string() }).await.as_deref(),
            Ok("true")
        )
    }

    async fn run(&mut self, command: GuiCommand) -> Result<String> {
        self.bridge.execute(&command).await.map_err(into_erp)
    }

    fn require_connection(&self) -> Result<()> {
        if self.connected {
            Ok(())
        } else {
            Err(FlowError::Erp("No open SAP session".to_string()))
        }
    }

    async fn execute_step(&mut self, step: &TransactionStep, variables: &BTreeMap<String, String>) -> Result<()> {
        let command = match step {
            TransactionStep::SetText { id, value } => {
                GuiCommand::SetText { id: id.clone(), value: generate_template(value, variables)? }
            }
            TransactionStep::SetKey { id, key } => {
                GuiCommand::SetKey { id: id.clone(), key: generate_template(key, variables)? }
            }
            TransactionStep::Press { id } => GuiCommand::Press { id: id.clone() },
            TransactionStep::Select { id } => GuiCommand::Select { id: id.clone() },
            TransactionStep::SendVkey { id, vkey } => GuiCommand::SendVKey { id: id.clone(), vkey: *vkey },
            TransactionStep::WaitFor { id, timeout_secs } => {
                let timeout = timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or_else(|| self.config.timing.element_timeout());
                if !self.wait_for_element(id, timeout).await {
                    return Err(FlowError::Timeout(format!("Element {} did not appear", id)));
                }
                return Ok(());
            }
        };

        self.run(command).await?;
        Ok(())
    }
}

/// Variables available to step templates
pub fn template_variables(order: &OrderRow, today: NaiveDate) -> BTreeMap<String, String> {
    let (start_date, end_date) = previous_month_range(today);
    let mut variables = order.fields.clone();
    variables.insert("order".to_string(), order.order_number());
    variables.insert("start_date".to_string(), start_date);
    variables.insert("end_date".to_string(), end_date);
    variables
}

fn into_erp(error: FlowError) -> FlowError {
    match error {
        FlowError::Erp(_) => error,
        other => FlowError::Erp(other.to_string()),
    }
}

#[async_trait]
impl<B: ScriptingBridge> ErpBackend for SapGui<B> {
    async fn open_session(&mut self, credentials: &CredentialRecord) -> Result<()> {
        let timing = self.config.timing.clone();

        self.bridge.launch(&self.config.path).await.map_err(into_erp)?;
        sleep(timing.launch_settle()).await;

        self.run(GuiCommand::OpenConnection { platform: credentials.platform.clone() }).await?;
        sleep(timing.connect_settle()).await;

        if !self.element_exists(MAIN_WINDOW).await {
            return Err(FlowError::Erp(format!("No session opened for {}", credentials.platform)));
        }

        self.run(GuiCommand::ResizeWorkingPane { width: 169, height: 30 }).await?;
        self.credentials = Some(credentials.clone());
        self.connected = true;
        log::info!("SAP session opened on {}", credentials.platform);
        Ok(())
    }

    async fn login(&mut self) -> Result<()> {
        self.require_connection()?;
        let credentials = self
            .credentials
            .clone()
            .ok_or_else(|| FlowError::Erp("No credentials for the open session".to_string()))?;

        let fields = [
            (CLIENT_FIELD, self.config.client.clone()),
            (USER_FIELD, credentials.username.clone()),
            (PASSWORD_FIELD, credentials.password.clone()),
            (LANGUAGE_FIELD, self.config.language.clone()),
        ];
        for (id, value) in fields {
            self.run(GuiCommand::SetText { id: id.to_string(), value }).await?;
        }
        self.run(GuiCommand::SendVKey { id: MAIN_WINDOW.to_string(), vkey: ENTER_VKEY }).await?;
        sleep(self.config.timing.login_settle()).await;

        let active = self.run(GuiCommand::ActiveWindow).await.unwrap_or_default();
        if active.ends_with(POPUP_WINDOW) {
            let marker = self.config.multi_logon_marker.to_lowercase();
            let popup_text = self.element_text(POPUP_WINDOW).await.unwrap_or_default();
            if popup_text.to_lowercase().contains(&marker) {
                log::info!("Multiple logon detected, continuing with this session");
                self.run(GuiCommand::Select { id: MULTI_LOGON_OPTION.to_string() }).await?;
                self.run(GuiCommand::Press { id: POPUP_CONFIRM.to_string() }).await?;
                self.run(GuiCommand::SendKeys { keys: "{ENTER}".to_string() }).await?;
            }
        }

        if self.element_exists(LOGGED_IN_MARKER).await {
            log::info!("Logged into SAP as {}", credentials.username);
            Ok(())
        } else {
            log::error!("SAP login failed for {}", credentials.username);
            self.close_session().await?;
            Err(FlowError::LoginFailed(format!("Login failed for user {}", credentials.username)))
        }
    }

    async fn run_transaction(&mut self, command: &str, order: &OrderRow) -> Result<()> {
        self.require_connection()?;

        self.run(GuiCommand::SetText { id: COMMAND_FIELD.to_string(), value: command.to_string() })
            .await?;
        self.run(GuiCommand::SendVKey { id: MAIN_WINDOW.to_string(), vkey: ENTER_VKEY }).await?;

        let ready = self.config.ready_element.clone();
        if !self.wait_for_element(&ready, self.config.timing.element_timeout()).await {
            return Err(FlowError::Timeout(format!("Transaction {} did not reach {}", command, ready)));
        }

        let variables = template_variables(order, chrono::Local::now().date_naive());
        let steps = self.config.steps.clone();
        for step in &steps {
            self.execute_step(step, &variables).await?;
        }

        log::info!("Transaction {} completed for order {}", command, order.order_number());
        Ok(())
    }

    async fn close_session(&mut self) -> Result<()> {
        if !self.connected {
            return Ok(());
        }
        self.connected = false;
        self.credentials = None;
        self.run(GuiCommand::CloseSession { id: FIRST_SESSION.to_string() }).await?;
        log::info!("SAP session closed");
        Ok(())
    }
}
