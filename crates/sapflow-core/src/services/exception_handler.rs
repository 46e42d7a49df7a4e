//! Failure capture, persistence and reporting
//!
//! Every step after structuring the record is best effort: a failed store
//! does not stop the email, and a failed email does not stop the SMS.

use crate::clients::data_service::DataService;
use crate::config::{AppConfig, SmsGatewayConfig};
use crate::constants::{DEFAULT_UNIQUE_KEY, ERROR_STATUS_PENDING, SMS_MAX_LEN};
use crate::error::FlowError;
use crate::services::notification::{EmailSender, MailTransport, OutgoingEmail, SmsGateway, SmsMessage};
use crate::types::ErrorRecord;
use crate::utils::json_to_html;
use once_cell::sync::{Lazy, OnceCell};
use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error as StdError;
use std::future::Future;
use std::panic::Location;
use std::sync::{Arc, Mutex};

/// Source position of a panic, recorded by the installed hook
#[derive(Debug, Clone, PartialEq)]
pub struct PanicSite {
    pub file: String,
    pub line: u32,
}

/// A failure that escaped every handler
#[derive(Debug, Clone, PartialEq)]
pub enum UncaughtFailure {
    /// Ctrl-C; never reported
    Interrupted,
    Panic { message: String, location: Option<PanicSite> },
}

static LAST_PANIC: Lazy<Mutex<Option<PanicSite>>> = Lazy::new(|| Mutex::new(None));
static PANIC_HOOK: OnceCell<()> = OnceCell::new();

/// Chain a panic hook that remembers where the last panic happened.
///
/// The previous hook still runs, so the default panic output is kept.
pub fn install_panic_hook() {
    PANIC_HOOK.get_or_init(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if let Some(location) = info.location() {
                let site = PanicSite { file: location.file().to_string(), line: location.line() };
                *LAST_PANIC.lock().unwrap_or_else(|e| e.into_inner()) = Some(site);
            }
            previous(info);
        }));
    });
}

/// Location of the most recent panic, cleared by reading it
pub fn take_panic_site() -> Option<PanicSite> {
    LAST_PANIC.lock().unwrap_or_else(|e| e.into_inner()).take()
}

/// Text of a panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "Box<dyn Any>".to_string()
    }
}

struct SmsAlert {
    gateway: SmsGateway,
    config: SmsGatewayConfig,
    number: String,
}

pub struct ExceptionHandler<D: DataService + ?Sized> {
    data: Arc<D>,
    email: EmailSender<D>,
    errors_collection: String,
    report_subject: String,
    report_to: String,
    sms: Option<SmsAlert>,
}

impl<D: DataService + ?Sized> ExceptionHandler<D> {
    pub fn new(config: &AppConfig, data: Arc<D>) -> Self {
        let (report_subject, report_to) = config.report_target();

        let sms = match (
            config.report.as_ref().and_then(|r| r.sms.as_ref()),
            config.sms.as_ref(),
        ) {
            (Some(alert), Some(gateway_config)) => match SmsGateway::new() {
                Ok(gateway) => Some(SmsAlert {
                    gateway,
                    config: gateway_config.clone(),
                    number: alert.number.clone(),
                }),
                Err(e) => {
                    log::warn!("SMS alerts disabled: {}", e);
                    None
                }
            },
            _ => None,
        };

        Self {
            email: EmailSender::new(data.clone(), config.database.webmail.clone()),
            data,
            errors_collection: config.database.errors_collection.clone(),
            report_subject: report_subject.to_string(),
            report_to: report_to.to_string(),
            sms,
        }
    }

    /// Replace the SMTP transport used for reports
    pub fn with_mail_transport(mut self, transport: Arc<dyn MailTransport>) -> Self {
        let webmail = self.email.webmail().clone();
        self.email = EmailSender::with_transport(self.data.clone(), webmail, transport);
        self
    }

    /// Structure `error`, persist it and (if requested) email the report.
    ///
    /// The record's file and line are those of the caller.
    #[track_caller]
    pub fn get_exception<'a>(
        &'a self,
        error: &(dyn StdError + 'static),
        send_email: bool,
    ) -> impl Future<Output = ErrorRecord> + Send + 'a {
        let record = structure_error(error, Location::caller());
        async move {
            log::error!("{}: {}", record.exception_type, record.error_message);
            self.report(&record, send_email).await;
            record
        }
    }

    /// Top-level variant; interrupts pass through unreported
    pub async fn handle_uncaught(&self, failure: UncaughtFailure, send_email: bool) -> Option<ErrorRecord> {
        let (message, location) = match failure {
            UncaughtFailure::Interrupted => {
                log::info!("Interrupted by user");
                return None;
            }
            UncaughtFailure::Panic { message, location } => (message, location),
        };

        log::error!("Uncaught Exception: {}", message);

        let mut traceback = match &location {
            Some(site) => format!("panicked at {}:{}:\n{}", site.file, site.line, message),
            None => format!("panicked:\n{}", message),
        };
        append_backtrace(&mut traceback);

        let record = ErrorRecord {
            error_message: message.clone(),
            traceback,
            timestamp: timestamp(),
            exception_type: "Panic".to_string(),
            exception_args: vec![message],
            exception_module: "std::panic".to_string(),
            exception_file: location.as_ref().map(|s| s.file.clone()),
            exception_line: location.as_ref().map(|s| s.line),
            status: ERROR_STATUS_PENDING.to_string(),
        };

        self.report(&record, send_email).await;
        Some(record)
    }

    async fn report(&self, record: &ErrorRecord, send_email: bool) {
        let document = record.to_document();

        if let Err(e) = self
            .data
            .save(&self.errors_collection, std::slice::from_ref(&document), DEFAULT_UNIQUE_KEY)
            .await
        {
            log::error!("Failed to store error record in {}: {}", self.errors_collection, e);
        }

        if send_email {
            let body = json_to_html(document.as_object());
            let email = OutgoingEmail::html(&self.report_to, &self.report_subject, body);
            if let Err(e) = self.email.send_email(&email).await {
                log::error!("Failed to email error report: {}", e);
            }
        }

        if let Some(alert) = &self.sms {
            let text: String = format!("{}: {}", record.exception_type, record.error_message)
                .chars()
                .take(SMS_MAX_LEN)
                .collect();
            let message = SmsMessage::from_config(&alert.config, &alert.number, &text);
            match alert.gateway.send_sms(&alert.config.url, &message).await {
                Ok(true) => {}
                Ok(false) => log::error!("SMS alert was not accepted by the gateway"),
                Err(e) => log::error!("Failed to send SMS alert: {}", e),
            }
        }
    }
}

/// Build the record for an error reported at `location`
pub fn structure_error(error: &(dyn StdError + 'static), location: &Location<'_>) -> ErrorRecord {
    let (exception_type, exception_module) = classify(error);

    let mut exception_args = vec![error.to_string()];
    let mut source = error.source();
    while let Some(cause) = source {
        exception_args.push(cause.to_string());
        source = cause.source();
    }

    let mut traceback = format!("{}: {}", exception_type, error);
    for cause in exception_args.iter().skip(1) {
        traceback.push_str(&format!("\nCaused by: {}", cause));
    }
    traceback.push_str(&format!("\n  at {}:{}", location.file(), location.line()));
    append_backtrace(&mut traceback);

    ErrorRecord {
        error_message: error.to_string(),
        traceback,
        timestamp: timestamp(),
        exception_type,
        exception_args,
        exception_module,
        exception_file: Some(location.file().to_string()),
        exception_line: Some(location.line()),
        status: ERROR_STATUS_PENDING.to_string(),
    }
}

fn classify(error: &(dyn StdError + 'static)) -> (String, String) {
    if let Some(flow) = error.downcast_ref::<FlowError>() {
        (flow.kind().to_string(), "sapflow_core::error".to_string())
    } else if error.is::<std::io::Error>() {
        ("Io".to_string(), "std::io".to_string())
    } else if error.is::<serde_json::Error>() {
        ("Json".to_string(), "serde_json".to_string())
    } else {
        ("Error".to_string(), "unknown".to_string())
    }
}

fn append_backtrace(traceback: &mut String) {
    let backtrace = Backtrace::capture();
    if backtrace.status() == BacktraceStatus::Captured {
        traceback.push_str(&format!("\n\nStack backtrace:\n{}", backtrace));
    }
}

fn timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::MemoryStore;
    use crate::types::SmtpCredentials;
    use async_trait::async_trait;
    use lettre::Message;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingTransport {
        sent: AtomicUsize,
    }

    #[async_trait]
    impl MailTransport for CountingTransport {
        async fn deliver(&self, _credentials: &SmtpCredentials, _message: Message) -> crate::error::Result<()> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn config() -> AppConfig {
        AppConfig::from_json_str(
            &json!({
                "notify": {"subject": "Done", "recipient_email": "ops@example.com"},
                "report": {"subject": "SapFlow failure", "to": "alerts@example.com"},
                "database": {
                    "webmail": {"collection": "credentials", "query": {"type": "smtp"}},
                    "sap": {"collection": "credentials", "query": {"type": "sap"}}
                },
                "sap_app": {"client": "100", "language": "PT", "path": "saplogon.exe", "transaction_code": "VA02"}
            })
            .to_string(),
        )
        .unwrap()
    }

    fn store() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::new().with_documents(
            "credentials",
            vec![json!({"type": "smtp", "username": "robot@example.com", "password": "x", "url": "localhost", "port": 25})],
        ))
    }

    #[tokio::test]
    async fn error_is_persisted_as_pending_and_emailed() {
        let data = store();
        let transport = Arc::new(CountingTransport::default());
        let handler = ExceptionHandler::new(&config(), data.clone()).with_mail_transport(transport.clone());

        let error = FlowError::NoData("No SAP credentials found".to_string());
        let record = handler.get_exception(&error, true).await;

        assert_eq!(record.exception_type, "NoData");
        assert_eq!(record.status, "pending");
        assert_eq!(record.exception_file.as_deref(), Some(file!()));
        assert!(record.exception_line.is_some());

        let stored = data.documents("process_errors");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0]["exception_type"], "NoData");
        assert_eq!(transport.sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn store_failure_does_not_block_email() {
        let data = Arc::new(
            MemoryStore::new()
                .with_documents(
                    "credentials",
                    vec![json!({"type": "smtp", "username": "r@example.com", "password": "x", "url": "h", "port": 25})],
                )
                .failing_writes_to("process_errors"),
        );
        let transport = Arc::new(CountingTransport::default());
        let handler = ExceptionHandler::new(&config(), data.clone()).with_mail_transport(transport.clone());

        let error = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let record = handler.get_exception(&error, true).await;

        assert_eq!(record.exception_type, "Io");
        assert!(data.documents("process_errors").is_empty());
        assert_eq!(transport.sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn interrupt_is_never_reported() {
        let data = store();
        let transport = Arc::new(CountingTransport::default());
        let handler = ExceptionHandler::new(&config(), data.clone()).with_mail_transport(transport.clone());

        assert!(handler.handle_uncaught(UncaughtFailure::Interrupted, true).await.is_none());
        assert!(data.documents("process_errors").is_empty());
        assert_eq!(transport.sent.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn panic_is_persisted_without_email_by_default() {
        let data = store();
        let transport = Arc::new(CountingTransport::default());
        let handler = ExceptionHandler::new(&config(), data.clone()).with_mail_transport(transport.clone());

        let failure = UncaughtFailure::Panic {
            message: "index out of bounds".to_string(),
            location: Some(PanicSite { file: "src/workflow/orchestrator.rs".to_string(), line: 88 }),
        };
        let record = handler.handle_uncaught(failure, false).await.unwrap();

        assert_eq!(record.exception_type, "Panic");
        assert_eq!(record.exception_line, Some(88));
        assert_eq!(data.documents("process_errors").len(), 1);
        assert_eq!(transport.sent.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn source_chain_becomes_args() {
        let inner = std::io::Error::new(std::io::ErrorKind::NotFound, "configs.json");
        let outer = FlowError::Io(inner);
        let record = structure_error(&outer, Location::caller());

        assert_eq!(record.exception_args.len(), 1 + outer.source().iter().count());
        assert!(record.traceback.starts_with("Io: "));
    }

    #[test]
    fn panic_payload_text() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }
}
