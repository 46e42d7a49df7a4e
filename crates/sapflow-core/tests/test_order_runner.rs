use async_trait::async_trait;
use lettre::Message;
use rust_xlsxwriter::Workbook;
use sapflow_core::config::{AppConfig, SapTiming};
use sapflow_core::erp::{ErpBackend, GuiCommand, SapGui, ScriptedBridge};
use sapflow_core::services::MailTransport;
use sapflow_core::{CredentialRecord, FlowError, MemoryStore, OrderRow, OrderRunner, RunOutcome, SmtpCredentials};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct RecordingTransport {
    subjects: Mutex<Vec<String>>,
    sent: AtomicUsize,
}

#[async_trait]
impl MailTransport for RecordingTransport {
    async fn deliver(&self, _credentials: &SmtpCredentials, message: Message) -> sapflow_core::Result<()> {
        let raw = String::from_utf8_lossy(&message.formatted()).to_string();
        if let Some(subject) = raw.lines().find_map(|l| l.strip_prefix("Subject: ")) {
            self.subjects.lock().unwrap().push(subject.to_string());
        }
        self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Backend that fails the configured order numbers
#[derive(Default)]
struct FlakyErp {
    failing_orders: Vec<String>,
    executed: Vec<String>,
    opened: bool,
    closed: usize,
}

#[async_trait]
impl ErpBackend for FlakyErp {
    async fn open_session(&mut self, _credentials: &CredentialRecord) -> sapflow_core::Result<()> {
        self.opened = true;
        Ok(())
    }

    async fn login(&mut self) -> sapflow_core::Result<()> {
        Ok(())
    }

    async fn run_transaction(&mut self, _command: &str, order: &OrderRow) -> sapflow_core::Result<()> {
        let number = order.order_number();
        self.executed.push(number.clone());
        if self.failing_orders.contains(&number) {
            return Err(FlowError::Erp(format!("Order {} is locked", number)));
        }
        Ok(())
    }

    async fn close_session(&mut self) -> sapflow_core::Result<()> {
        self.closed += 1;
        Ok(())
    }
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn write_orders(path: &Path, orders: &[f64]) {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.write_string(0, 0, "Ordem").unwrap();
    worksheet.write_string(0, 1, "Cliente").unwrap();
    for (i, order) in orders.iter().enumerate() {
        let row = (i + 1) as u32;
        worksheet.write_number(row, 0, *order).unwrap();
        worksheet.write_string(row, 1, format!("Cliente {}", i + 1)).unwrap();
    }
    workbook.save(path).unwrap();
}

fn config(input: &Path, on_completion: bool) -> AppConfig {
    let mut config = AppConfig::from_json_str(
        &json!({
            "notify": {
                "subject": "Ordens alteradas",
                "recipient_email": "ops@example.com",
                "message_body": "Processo concluído",
                "on_completion": on_completion
            },
            "report": { "subject": "Falha SapFlow", "to": "alerts@example.com" },
            "database": {
                "webmail": { "collection": "credentials", "query": { "name": "webmail" } },
                "sap": { "collection": "credentials", "query": { "name": "sap" } }
            },
            "sap_app": {
                "client": "100",
                "language": "PT",
                "path": "saplogon.exe",
                "transaction_code": "VA02"
            },
            "input": { "path": input }
        })
        .to_string(),
    )
    .expect("test config");
    config.sap_app.timing = SapTiming::immediate();
    config
}

fn store(sap: Value) -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new().with_documents(
        "credentials",
        vec![
            json!({"name": "webmail", "username": "robot@example.com", "password": "x", "url": "localhost", "port": 25}),
            sap,
        ],
    ))
}

fn sap_document() -> Value {
    json!({"name": "sap", "platform": "PRD", "username": "robot", "password": "secret"})
}

fn ready_bridge() -> ScriptedBridge {
    ScriptedBridge::new().with_elements(["wnd[0]/tbar[0]/btn[15]", "wnd[0]/tbar[1]/btn[5]"])
}

#[tokio::test]
async fn test_every_order_runs_through_the_transaction() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("VendasSAP.xlsx");
    write_orders(&input, &[5100000001.0, 5100000002.0]);

    let data = store(sap_document());
    let bridge = ready_bridge();
    let transport = Arc::new(RecordingTransport::default());
    let mut runner = OrderRunner::new(config(&input, true), data.clone(), SapGui::new(bridge.clone(), config(&input, true).sap_app))
        .with_mail_transport(transport.clone());

    let summary = match runner.run().await {
        RunOutcome::Completed(summary) => summary,
        other => panic!("expected a completed run, got {:?}", other),
    };
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.succeeded, 2);
    assert!(summary.failures.is_empty());

    let commands = bridge.commands();
    for order in ["5100000001", "5100000002"] {
        assert!(commands.contains(&GuiCommand::SetText {
            id: "wnd[0]/usr/ctxtVBAK-VBELN".to_string(),
            value: order.to_string()
        }));
    }
    assert!(matches!(commands.last(), Some(GuiCommand::CloseSession { .. })));
    assert!(data.documents("process_errors").is_empty());
    assert_eq!(*transport.subjects.lock().unwrap(), vec!["Ordens alteradas".to_string()]);
}

#[tokio::test]
async fn test_invalid_credentials_never_open_a_session() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("VendasSAP.xlsx");
    write_orders(&input, &[1.0]);

    let data = store(json!({"name": "sap", "platform": "PRD", "username": "robot"}));
    let bridge = ready_bridge();
    let transport = Arc::new(RecordingTransport::default());
    let mut runner = OrderRunner::new(config(&input, false), data.clone(), SapGui::new(bridge.clone(), config(&input, false).sap_app))
        .with_mail_transport(transport.clone());

    assert_eq!(runner.run().await, RunOutcome::InvalidCredentials);
    assert!(bridge.launched().is_empty());
    assert!(bridge.commands().is_empty());
    assert_eq!(transport.sent.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_non_positive_order_rejects_the_spreadsheet() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("VendasSAP.xlsx");
    write_orders(&input, &[5100000001.0, -3.0]);

    let erp = FlakyErp::default();
    let mut runner = OrderRunner::new(config(&input, false), store(sap_document()), erp);

    assert_eq!(runner.run().await, RunOutcome::RejectedSpreadsheet);
    assert!(runner.erp().executed.is_empty());
    assert_eq!(runner.erp().closed, 1);
}

#[tokio::test]
async fn test_failing_row_is_counted_and_the_loop_continues() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("VendasSAP.xlsx");
    write_orders(&input, &[11.0, 22.0, 33.0]);

    let erp = FlakyErp { failing_orders: vec!["22".to_string()], ..Default::default() };
    let data = store(sap_document());
    let mut runner = OrderRunner::new(config(&input, false), data.clone(), erp);

    let RunOutcome::Completed(summary) = runner.run().await else {
        panic!("expected a completed run");
    };
    assert_eq!(summary.processed, 3);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].0, "22");
    assert_eq!(runner.erp().executed, vec!["11", "22", "33"]);
}

#[tokio::test]
async fn test_login_failure_is_reported() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("VendasSAP.xlsx");
    write_orders(&input, &[1.0]);

    let data = store(sap_document());
    let bridge = ScriptedBridge::new();
    let transport = Arc::new(RecordingTransport::default());
    let mut runner = OrderRunner::new(config(&input, true), data.clone(), SapGui::new(bridge.clone(), config(&input, true).sap_app))
        .with_mail_transport(transport.clone());

    let RunOutcome::Failed(record) = runner.run().await else {
        panic!("expected a failed run");
    };
    assert_eq!(record.exception_type, "LoginFailed");
    assert_eq!(record.status, "pending");

    let stored = data.documents("process_errors");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0]["exception_type"], "LoginFailed");
    assert_eq!(*transport.subjects.lock().unwrap(), vec!["Falha SapFlow".to_string()]);
    assert!(!bridge.commands().iter().any(|c| matches!(c, GuiCommand::SetText { value, .. } if value == "VA02")));
}

#[tokio::test]
async fn test_missing_credential_document_is_reported_as_no_data() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("VendasSAP.xlsx");
    write_orders(&input, &[1.0]);

    let data = Arc::new(MemoryStore::new());
    let mut runner = OrderRunner::new(config(&input, false), data.clone(), FlakyErp::default());

    let RunOutcome::Failed(record) = runner.run().await else {
        panic!("expected a failed run");
    };
    assert_eq!(record.exception_type, "NoData");
    assert!(!runner.erp().opened);
    assert_eq!(data.documents("process_errors").len(), 1);
}
