//! Command channel into the SAP GUI Scripting engine

use crate::error::{FlowError, Result};
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;

/// A single scripting call against the first connection's first session
#[derive(Debug, Clone, PartialEq)]
pub enum GuiCommand {
    OpenConnection { platform: String },
    /// Answers "true" or "false"
    ElementExists { id: String },
    SetText { id: String, value: String },
    SetKey { id: String, key: String },
    Press { id: String },
    Select { id: String },
    SendVKey { id: String, vkey: u32 },
    /// Answers the element text
    ReadText { id: String },
    /// Answers the id of the active window, e.g. `wnd[1]`
    ActiveWindow,
    ResizeWorkingPane { width: u32, height: u32 },
    CloseSession { id: String },
    /// Keystrokes sent to the focused window
    SendKeys { keys: String },
}

#[async_trait]
pub trait ScriptingBridge: Send {
    /// Start the SAP Logon executable without waiting for it
    async fn launch(&mut self, executable: &Path) -> Result<()>;

    /// Run one command and return its textual answer (empty for actions)
    async fn execute(&mut self, command: &GuiCommand) -> Result<String>;
}

/// Production bridge: every command is a short VBScript run by `cscript`
#[derive(Debug, Default)]
pub struct VbsBridge {
    client: Option<tokio::process::Child>,
}

impl VbsBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render the VBScript for a command
    pub fn script(command: &GuiCommand) -> String {
        const PRELUDE: &str = "Set SapGuiAuto = GetObject(\"SAPGUI\")\r\n\
                               Set application = SapGuiAuto.GetScriptingEngine\r\n";
        const SESSION: &str = "Set connection = application.Children(0)\r\n\
                               Set session = connection.Children(0)\r\n";

        let body = match command {
            GuiCommand::OpenConnection { platform } => {
                return format!("{}application.OpenConnection \"{}\", True\r\n", PRELUDE, vbs_quote(platform));
            }
            GuiCommand::ElementExists { id } => format!(
                "Set element = session.findById(\"{}\", False)\r\n\
                 If element Is Nothing Then\r\n  WScript.Echo \"false\"\r\nElse\r\n  WScript.Echo \"true\"\r\nEnd If\r\n",
                vbs_quote(id)
            ),
            GuiCommand::SetText { id, value } => {
                format!("session.findById(\"{}\").text = \"{}\"\r\n", vbs_quote(id), vbs_quote(value))
            }
            GuiCommand::SetKey { id, key } => {
                format!("session.findById(\"{}\").key = \"{}\"\r\n", vbs_quote(id), vbs_quote(key))
            }
            GuiCommand::Press { id } => format!("session.findById(\"{}\").press\r\n", vbs_quote(id)),
            GuiCommand::Select { id } => format!("session.findById(\"{}\").select\r\n", vbs_quote(id)),
            GuiCommand::SendVKey { id, vkey } => {
                format!("session.findById(\"{}\").sendVKey {}\r\n", vbs_quote(id), vkey)
            }
            GuiCommand::ReadText { id } => {
                format!("WScript.Echo session.findById(\"{}\").text\r\n", vbs_quote(id))
            }
            GuiCommand::ActiveWindow => "WScript.Echo session.ActiveWindow.Id\r\n".to_string(),
            GuiCommand::ResizeWorkingPane { width, height } => {
                format!("session.findById(\"wnd[0]\").resizeWorkingPane {},{},False\r\n", width, height)
            }
            GuiCommand::CloseSession { id } => format!("connection.CloseSession \"{}\"\r\n", vbs_quote(id)),
            GuiCommand::SendKeys { keys } => format!(
                "Set shell = CreateObject(\"WScript.Shell\")\r\nshell.SendKeys \"{}\"\r\n",
                vbs_quote(keys)
            ),
        };

        format!("{}{}{}", PRELUDE, SESSION, body)
    }
}

fn vbs_quote(text: &str) -> String {
    text.replace('"', "\"\"")
}

#[async_trait]
impl ScriptingBridge for VbsBridge {
    async fn launch(&mut self, executable: &Path) -> Result<()> {
        let child = Command::new(executable)
            .spawn()
            .map_err(|e| FlowError::Erp(format!("Cannot start {}: {}", executable.display(), e)))?;
        log::info!("Started SAP Logon from {}", executable.display());
        self.client = Some(child);
        Ok(())
    }

    async fn execute(&mut self, command: &GuiCommand) -> Result<String> {
        let file = tempfile::Builder::new()
            .prefix("sapflow-")
            .suffix(".vbs")
            .tempfile()
            .map_err(|e| FlowError::Erp(format!("Cannot create script file: {}", e)))?;
        tokio::fs::write(file.path(), Self::script(command)).await?;

        let output = Command::new("cscript")
            .arg("//NoLogo")
            .arg(file.path())
            .output()
            .await
            .map_err(|e| FlowError::Erp(format!("Cannot run cscript: {}", e)))?;

        if !output.status.success() {
            return Err(FlowError::Erp(format!(
                "{:?} failed: {}",
                command,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookups_do_not_raise_on_missing_elements() {
        let script = VbsBridge::script(&GuiCommand::ElementExists { id: "wnd[0]/tbar[0]/btn[15]".to_string() });
        assert!(script.contains("findById(\"wnd[0]/tbar[0]/btn[15]\", False)"));
        assert!(script.contains("Set session = connection.Children(0)"));
    }

    #[test]
    fn values_are_quoted() {
        let script = VbsBridge::script(&GuiCommand::SetText {
            id: "wnd[0]/usr/txtRSYST-BNAME".to_string(),
            value: "say \"hi\"".to_string(),
        });
        assert!(script.contains(".text = \"say \"\"hi\"\"\""));
    }

    #[test]
    fn open_connection_needs_no_session() {
        let script = VbsBridge::script(&GuiCommand::OpenConnection { platform: "PRD".to_string() });
        assert!(script.contains("application.OpenConnection \"PRD\", True"));
        assert!(!script.contains("connection.Children(0)"));
    }
}
