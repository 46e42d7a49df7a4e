//! Order runner: credentials, ERP login, one transaction per spreadsheet row

use crate::clients::data_service::{fetch_first, DataService};
use crate::config::{AppConfig, NotifyConfig};
use crate::erp::ErpBackend;
use crate::error::Result;
use crate::services::exception_handler::ExceptionHandler;
use crate::services::notification::{EmailSender, MailTransport, OutgoingEmail};
use crate::spreadsheet::{all_orders_positive, load_orders};
use crate::types::{CredentialRecord, ErrorRecord};
use std::io::BufRead;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Whether to wait for Enter between rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseMode {
    Interactive,
    Disabled,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub processed: usize,
    pub succeeded: usize,
    /// Order number and error message of every failed row
    pub failures: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(RunSummary),
    /// The credential record lacked a required key; no ERP session was opened
    InvalidCredentials,
    /// The order column held a non-positive value; no transaction ran
    RejectedSpreadsheet,
    /// Routed to the exception handler
    Failed(ErrorRecord),
}

pub struct OrderRunner<D: DataService + ?Sized, E: ErpBackend> {
    config: AppConfig,
    data: Arc<D>,
    erp: E,
    handler: ExceptionHandler<D>,
    mailer: EmailSender<D>,
    pause: PauseMode,
    prompt: Option<EnterPrompt>,
}

impl<D: DataService + ?Sized, E: ErpBackend> OrderRunner<D, E> {
    pub fn new(config: AppConfig, data: Arc<D>, erp: E) -> Self {
        Self {
            handler: ExceptionHandler::new(&config, data.clone()),
            mailer: EmailSender::new(data.clone(), config.database.webmail.clone()),
            config,
            data,
            erp,
            pause: PauseMode::Disabled,
            prompt: None,
        }
    }

    pub fn with_pause_mode(mut self, pause: PauseMode) -> Self {
        self.pause = pause;
        self
    }

    /// Use `transport` for both reports and completion notices
    pub fn with_mail_transport(mut self, transport: Arc<dyn MailTransport>) -> Self {
        self.handler = ExceptionHandler::new(&self.config, self.data.clone()).with_mail_transport(transport.clone());
        self.mailer = EmailSender::with_transport(self.data.clone(), self.config.database.webmail.clone(), transport);
        self
    }

    pub fn erp(&self) -> &E {
        &self.erp
    }

    pub fn handler(&self) -> &ExceptionHandler<D> {
        &self.handler
    }

    /// Run every order. Errors end in [`RunOutcome::Failed`] after being reported.
    pub async fn run(&mut self) -> RunOutcome {
        match self.process_orders().await {
            Ok(outcome) => outcome,
            Err(e) => {
                let record = self.handler.get_exception(&e, true).await;
                if let Err(close_err) = self.erp.close_session().await {
                    log::warn!("Could not close SAP session after failure: {}", close_err);
                }
                RunOutcome::Failed(record)
            }
        }
    }

    async fn process_orders(&mut self) -> Result<RunOutcome> {
        let sap = &self.config.database.sap;
        let document = fetch_first(self.data.as_ref(), &sap.collection, &sap.query).await?;

        let credentials = match CredentialRecord::from_document(&document) {
            Ok(credentials) => credentials,
            Err(e) => {
                log::error!("Invalid data format for SAP arguments.");
                log::debug!("{}", e);
                return Ok(RunOutcome::InvalidCredentials);
            }
        };

        self.erp.open_session(&credentials).await?;
        self.erp.login().await?;

        let input = &self.config.input;
        let orders = load_orders(&input.path, &input.order_column, input.sheet.as_deref())?;
        if !all_orders_positive(&orders) {
            log::error!("Column '{}' must contain only positive values.", input.order_column);
            self.erp.close_session().await?;
            return Ok(RunOutcome::RejectedSpreadsheet);
        }

        let transaction = self.config.sap_app.transaction_code.clone();
        let mut summary = RunSummary::default();

        for order in &orders {
            let number = order.order_number();
            log::info!("Processing order: {}", number);
            summary.processed += 1;

            match self.erp.run_transaction(&transaction, order).await {
                Ok(()) => summary.succeeded += 1,
                Err(e) => {
                    log::error!("Order {} failed: {}", number, e);
                    summary.failures.push((number, e.to_string()));
                }
            }

            if self.pause == PauseMode::Interactive {
                self.prompt.get_or_insert_with(EnterPrompt::stdin).wait().await;
            }
        }

        self.erp.close_session().await?;
        log::info!(
            "Processed {} orders: {} succeeded, {} failed",
            summary.processed,
            summary.succeeded,
            summary.failures.len()
        );

        if self.config.notify.on_completion {
            send_completion_notice(&self.config.notify, &self.mailer).await;
        }

        Ok(RunOutcome::Completed(summary))
    }
}

async fn send_completion_notice<D: DataService + ?Sized>(notify: &NotifyConfig, mailer: &EmailSender<D>) {
    let email = OutgoingEmail::plain(&notify.recipient_email, &notify.subject, notify.message_body.clone());
    if let Err(e) = mailer.send_email(&email).await {
        log::error!("Failed to send completion notice: {}", e);
    }
}

/// Enter presses read from stdin on a plain thread.
///
/// Aborting a wait leaves the thread blocked on stdin without holding up
/// runtime shutdown. Lines typed ahead are queued for the following rows.
struct EnterPrompt {
    lines: mpsc::UnboundedReceiver<String>,
}

impl EnterPrompt {
    fn stdin() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        std::thread::spawn(move || {
            let stdin = std::io::stdin();
            loop {
                let mut line = String::new();
                match stdin.lock().read_line(&mut line) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                }
            }
        });
        Self { lines: rx }
    }

    async fn wait(&mut self) {
        println!("Press Enter to continue...");
        if self.lines.recv().await.is_none() {
            log::debug!("stdin closed, continuing without pause");
        }
    }
}
