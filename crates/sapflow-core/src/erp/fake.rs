//! Scripted [`ScriptingBridge`] for dry runs and tests
//!
//! Clones share state, so a test can keep a handle after moving one into a session.

use super::bridge::{GuiCommand, ScriptingBridge};
use crate::error::{FlowError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct ScriptState {
    commands: Vec<GuiCommand>,
    launched: Vec<PathBuf>,
    present: HashSet<String>,
    texts: HashMap<String, String>,
    failing: HashSet<String>,
    active_window: Option<String>,
    no_session: bool,
    every_element_present: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ScriptedBridge {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bridge that finds every element it is asked about
    pub fn permissive() -> Self {
        let bridge = Self::new();
        bridge.lock().every_element_present = true;
        bridge
    }

    pub fn with_elements<I, S>(self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lock().present.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn with_text(self, id: &str, text: &str) -> Self {
        {
            let mut state = self.lock();
            state.present.insert(id.to_string());
            state.texts.insert(id.to_string(), text.to_string());
        }
        self
    }

    pub fn with_active_window(self, id: &str) -> Self {
        self.lock().active_window = Some(id.to_string());
        self
    }

    /// Every command addressing `id` fails
    pub fn failing_on(self, id: &str) -> Self {
        self.lock().failing.insert(id.to_string());
        self
    }

    /// Opening a connection yields no session window
    pub fn without_session(self) -> Self {
        self.lock().no_session = true;
        self
    }

    pub fn commands(&self) -> Vec<GuiCommand> {
        self.lock().commands.clone()
    }

    pub fn launched(&self) -> Vec<PathBuf> {
        self.lock().launched.clone()
    }

    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn target(command: &GuiCommand) -> Option<&str> {
    match command {
        GuiCommand::ElementExists { id }
        | GuiCommand::SetText { id, .. }
        | GuiCommand::SetKey { id, .. }
        | GuiCommand::Press { id }
        | GuiCommand::Select { id }
        | GuiCommand::SendVKey { id, .. }
        | GuiCommand::ReadText { id }
        | GuiCommand::CloseSession { id } => Some(id),
        _ => None,
    }
}

#[async_trait]
impl ScriptingBridge for ScriptedBridge {
    async fn launch(&mut self, executable: &Path) -> Result<()> {
        self.lock().launched.push(executable.to_path_buf());
        Ok(())
    }

    async fn execute(&mut self, command: &GuiCommand) -> Result<String> {
        let mut state = self.lock();
        state.commands.push(command.clone());

        if let Some(id) = target(command) {
            if state.failing.contains(id) {
                return Err(FlowError::Erp(format!("Scripted failure on {}", id)));
            }
        }

        let answer = match command {
            GuiCommand::OpenConnection { .. } => {
                if !state.no_session {
                    state.present.insert("wnd[0]".to_string());
                }
                String::new()
            }
            GuiCommand::ElementExists { id } => {
                (state.every_element_present || state.present.contains(id)).to_string()
            }
            GuiCommand::ReadText { id } => state
                .texts
                .get(id)
                .cloned()
                .ok_or_else(|| FlowError::Erp(format!("No text scripted for {}", id)))?,
            GuiCommand::ActiveWindow => state
                .active_window
                .clone()
                .unwrap_or_else(|| "/app/con[0]/ses[0]/wnd[0]".to_string()),
            _ => String::new(),
        };
        Ok(answer)
    }
}
