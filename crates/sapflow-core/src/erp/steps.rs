//! Declarative GUI actions executed for every order row

use serde::{Deserialize, Serialize};

/// One action of the transaction step table.
///
/// String values are templates; `{order}`, `{start_date}`, `{end_date}` and
/// every spreadsheet column header are available as variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TransactionStep {
    SetText { id: String, value: String },
    SetKey { id: String, key: String },
    Press { id: String },
    Select { id: String },
    SendVkey { id: String, vkey: u32 },
    WaitFor {
        id: String,
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
}

impl TransactionStep {
    pub fn id(&self) -> &str {
        match self {
            TransactionStep::SetText { id, .. }
            | TransactionStep::SetKey { id, .. }
            | TransactionStep::Press { id }
            | TransactionStep::Select { id }
            | TransactionStep::SendVkey { id, .. }
            | TransactionStep::WaitFor { id, .. } => id,
        }
    }
}

/// Output-type change for a sales order: open the order, go to the header
/// output screen, switch the dispatch time to "4" and save.
pub fn default_transaction_steps() -> Vec<TransactionStep> {
    vec![
        TransactionStep::SetText { id: "wnd[0]/usr/ctxtVBAK-VBELN".to_string(), value: "{order}".to_string() },
        TransactionStep::Press { id: "wnd[0]/tbar[1]/btn[5]".to_string() },
        TransactionStep::Press { id: "wnd[1]/tbar[0]/btn[0]".to_string() },
        TransactionStep::Select { id: "wnd[0]/mbar/menu[3]/menu[13]/menu[0]/menu[0]".to_string() },
        TransactionStep::Press { id: "wnd[0]/tbar[1]/btn[5]".to_string() },
        TransactionStep::SetKey { id: "wnd[0]/usr/cmbNAST-VSZTP".to_string(), key: "4".to_string() },
        TransactionStep::Press { id: "wnd[0]/tbar[0]/btn[3]".to_string() },
        TransactionStep::Press { id: "wnd[0]/tbar[0]/btn[11]".to_string() },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn steps_deserialize_from_tagged_json() {
        let steps: Vec<TransactionStep> = serde_json::from_value(json!([
            {"action": "set_text", "id": "wnd[0]/usr/ctxtVBAK-VBELN", "value": "{order}"},
            {"action": "send_vkey", "id": "wnd[0]", "vkey": 0},
            {"action": "wait_for", "id": "wnd[0]/tbar[1]/btn[5]"}
        ]))
        .unwrap();

        assert_eq!(steps[1], TransactionStep::SendVkey { id: "wnd[0]".to_string(), vkey: 0 });
        assert_eq!(steps[2], TransactionStep::WaitFor { id: "wnd[0]/tbar[1]/btn[5]".to_string(), timeout_secs: None });
    }

    #[test]
    fn default_table_types_the_row_order() {
        let steps = default_transaction_steps();
        assert_eq!(steps.len(), 8);
        assert!(matches!(&steps[0], TransactionStep::SetText { value, .. } if value == "{order}"));
        assert_eq!(steps.last().map(TransactionStep::id), Some("wnd[0]/tbar[0]/btn[11]"));
    }
}
