//! Email, SMS and desktop notifications
//!
//! SMTP settings are looked up in the data service on every send and never cached.

use crate::clients::data_service::DataService;
use crate::config::{CollectionQuery, SmsGatewayConfig};
use crate::error::{FlowError, Result};
use crate::types::SmtpCredentials;
use crate::utils::{is_image_file, is_valid_email};
use async_trait::async_trait;
use lettre::message::header::{ContentTransferEncoding, ContentType};
use lettre::message::{Attachment, Body, Mailbox, MultiPart, SinglePart};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use reqwest::Client as HttpClient;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

/// An email waiting to be sent
#[derive(Debug, Clone, Default)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub html: bool,
    pub attachments: Vec<PathBuf>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    /// Overrides the SMTP username as sender when it is a valid address
    pub from_address: Option<String>,
}

impl OutgoingEmail {
    pub fn html(to: &str, subject: &str, body: String) -> Self {
        Self {
            to: to.to_string(),
            subject: subject.to_string(),
            body,
            html: true,
            ..Default::default()
        }
    }

    pub fn plain(to: &str, subject: &str, body: String) -> Self {
        Self { html: false, ..Self::html(to, subject, body) }
    }
}

/// Delivers a finished message through an SMTP server
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn deliver(&self, credentials: &SmtpCredentials, message: Message) -> Result<()>;
}

/// Plain SMTP delivery (no STARTTLS, no AUTH).
///
/// The transport is built for one delivery and dropped when it returns.
#[derive(Debug, Default)]
pub struct SmtpMailer;

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn deliver(&self, credentials: &SmtpCredentials, message: Message) -> Result<()> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(credentials.url.as_str())
            .port(credentials.port)
            .timeout(Some(Duration::from_secs(30)))
            .build();

        let result = transport.send(message).await;
        drop(transport);
        log::debug!("SMTP connection to {}:{} closed", credentials.url, credentials.port);

        match result {
            Ok(response) if response.is_positive() => Ok(()),
            Ok(response) => Err(FlowError::Email(format!(
                "Failed to send email to some or all recipients: {}",
                response.code()
            ))),
            Err(e) => Err(FlowError::Email(format!("Error sending email: {}", e))),
        }
    }
}

/// Sends email using SMTP settings stored in the data service
pub struct EmailSender<D: DataService + ?Sized> {
    data: Arc<D>,
    webmail: CollectionQuery,
    transport: Arc<dyn MailTransport>,
}

impl<D: DataService + ?Sized> EmailSender<D> {
    pub fn new(data: Arc<D>, webmail: CollectionQuery) -> Self {
        Self::with_transport(data, webmail, Arc::new(SmtpMailer))
    }

    pub fn with_transport(data: Arc<D>, webmail: CollectionQuery, transport: Arc<dyn MailTransport>) -> Self {
        Self { data, webmail, transport }
    }

    pub fn webmail(&self) -> &CollectionQuery {
        &self.webmail
    }

    /// Resolve, build and deliver. Succeeds only if every recipient was accepted.
    pub async fn send_email(&self, email: &OutgoingEmail) -> Result<()> {
        let credentials = get_smtp_credentials(self.data.as_ref(), &self.webmail).await.map_err(|e| {
            log::error!("Failed to get SMTP credentials: {}", e);
            e
        })?;

        let sender = match &email.from_address {
            Some(address) if is_valid_email(address) => address.clone(),
            _ => credentials.username.clone(),
        };

        let message = build_message(&sender, email)?;
        self.transport.deliver(&credentials, message).await?;

        log::info!("Email '{}' sent successfully to {}", email.subject, email.to);
        Ok(())
    }
}

/// Fetch the SMTP settings document and extract its fields
pub async fn get_smtp_credentials<D: DataService + ?Sized>(
    data: &D,
    webmail: &CollectionQuery,
) -> Result<SmtpCredentials> {
    let documents = data.query(&webmail.collection, &webmail.query).await?;
    let first = documents
        .first()
        .ok_or_else(|| FlowError::DataRetrieval("Failed to retrieve mail arguments".to_string()))?;

    let object = first
        .as_object()
        .ok_or_else(|| FlowError::InvalidDataFormat("Invalid data format retrieved".to_string()))?;

    let field = |key: &str| {
        object
            .get(key)
            .filter(|v| !v.is_null())
            .ok_or_else(|| FlowError::InvalidDataFormat(format!("Missing expected key: {}", key)))
    };
    let text = |value: &Value| match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };

    let port = match field("port")? {
        Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
        Value::String(s) => s.trim().parse::<u16>().ok(),
        _ => None,
    }
    .ok_or_else(|| FlowError::InvalidDataFormat("SMTP port is not a valid port number".to_string()))?;

    Ok(SmtpCredentials {
        username: text(field("username")?),
        password: text(field("password")?),
        url: text(field("url")?),
        port,
    })
}

/// Build the multipart message.
///
/// Images are attached inline with their file name as Content-ID; other files
/// are base64 `application/octet-stream` attachments.
pub fn build_message(sender: &str, email: &OutgoingEmail) -> Result<Message> {
    let mailbox = |address: &str| -> Result<Mailbox> {
        address
            .trim()
            .parse::<Mailbox>()
            .map_err(|e| FlowError::Email(format!("Invalid address '{}': {}", address, e)))
    };

    let mut builder = Message::builder().from(mailbox(sender)?).to(mailbox(&email.to)?).subject(&email.subject);
    for cc in &email.cc {
        builder = builder.cc(mailbox(cc)?);
    }
    for bcc in &email.bcc {
        builder = builder.bcc(mailbox(bcc)?);
    }

    let body = if email.html {
        SinglePart::html(email.body.clone())
    } else {
        SinglePart::plain(email.body.clone())
    };

    let mut multipart = MultiPart::mixed().singlepart(body);
    for path in &email.attachments {
        multipart = multipart.singlepart(attachment_part(path)?);
    }

    builder
        .multipart(multipart)
        .map_err(|e| FlowError::Email(format!("Failed to build message: {}", e)))
}

fn attachment_part(path: &Path) -> Result<SinglePart> {
    let content = std::fs::read(path)?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| FlowError::Validation(format!("Attachment path has no file name: {}", path.display())))?
        .to_string();

    let body = Body::new_with_encoding(content, ContentTransferEncoding::Base64)
        .map_err(|_| FlowError::Email(format!("Cannot base64-encode {}", file_name)))?;

    if is_image_file(path) {
        let content_type = ContentType::parse(image_mime(path))
            .map_err(|e| FlowError::Email(format!("Bad content type for {}: {}", file_name, e)))?;
        Ok(Attachment::new_inline(file_name).body(body, content_type))
    } else {
        let content_type = ContentType::parse("application/octet-stream")
            .map_err(|e| FlowError::Email(format!("Bad content type for {}: {}", file_name, e)))?;
        Ok(Attachment::new(file_name).body(body, content_type))
    }
}

fn image_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "tiff" => "image/tiff",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

/// Parameters of one gateway SMS
#[derive(Debug, Clone)]
pub struct SmsMessage {
    pub uid: String,
    pub pw: String,
    /// Originator shown to the recipient
    pub o: String,
    /// Message text
    pub m: String,
    /// Destination number
    pub n: String,
}

impl SmsMessage {
    pub fn from_config(config: &SmsGatewayConfig, number: &str, text: &str) -> Self {
        Self {
            uid: config.uid.clone(),
            pw: config.pw.clone(),
            o: config.originator.clone(),
            m: text.to_string(),
            n: number.to_string(),
        }
    }
}

/// HTTP GET SMS gateway
pub struct SmsGateway {
    http_client: HttpClient,
}

impl SmsGateway {
    pub fn new() -> Result<Self> {
        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| FlowError::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { http_client })
    }

    /// Send one SMS. `Ok(true)` only for HTTP 200.
    pub async fn send_sms(&self, url: &str, sms: &SmsMessage) -> Result<bool> {
        let required: [(&str, &str); 6] = [
            ("url", url),
            ("UID", sms.uid.as_str()),
            ("PW", sms.pw.as_str()),
            ("O", sms.o.as_str()),
            ("M", sms.m.as_str()),
            ("N", sms.n.as_str()),
        ];
        if let Some((name, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
            log::error!("One or more required parameters are missing ({}).", name);
            return Err(FlowError::Validation(format!("SMS parameter {} is missing", name)));
        }

        let response = self
            .http_client
            .get(url)
            .query(&[("UID", &sms.uid), ("PW", &sms.pw), ("O", &sms.o), ("M", &sms.m), ("N", &sms.n)])
            .send()
            .await?;

        let delivered = response.status() == reqwest::StatusCode::OK;
        if delivered {
            log::info!("SMS sent to {}", sms.n);
        } else {
            log::warn!("SMS gateway answered {} for {}", response.status(), sms.n);
        }
        Ok(delivered)
    }
}

/// Local desktop toast notifications
#[derive(Debug, Clone)]
pub struct DesktopNotifier {
    app_name: String,
}

impl DesktopNotifier {
    pub fn new(app_name: &str) -> Self {
        Self { app_name: app_name.to_string() }
    }

    /// Show a notification. Failures are logged and reported as `false`.
    pub async fn notify(&self, title: &str, message: &str, timeout: Duration) -> bool {
        let mut command = self.command(title, message, timeout);
        match command.status().await {
            Ok(status) if status.success() => {
                log::info!(
                    "Sent desktop notification: Title='{}', Message='{}', Timeout={}s, App Name='{}'",
                    title,
                    message,
                    timeout.as_secs(),
                    self.app_name
                );
                true
            }
            Ok(status) => {
                log::error!("Error sending desktop notification: exited with {}", status);
                false
            }
            Err(e) => {
                log::error!("Error sending desktop notification: {}", e);
                false
            }
        }
    }

    fn command(&self, title: &str, message: &str, timeout: Duration) -> Command {
        if cfg!(target_os = "windows") {
            let script = format!(
                "Add-Type -AssemblyName System.Windows.Forms; \
                 $n = New-Object System.Windows.Forms.NotifyIcon; \
                 $n.Icon = [System.Drawing.SystemIcons]::Information; \
                 $n.BalloonTipTitle = '{}'; $n.BalloonTipText = '{}'; $n.Text = '{}'; \
                 $n.Visible = $true; $n.ShowBalloonTip({}); Start-Sleep -Seconds {}; $n.Dispose()",
                ps_quote(title),
                ps_quote(message),
                ps_quote(&self.app_name),
                timeout.as_millis(),
                timeout.as_secs().min(10)
            );
            let mut command = Command::new("powershell");
            command.arg("-NoProfile").arg("-Command").arg(script);
            command
        } else if cfg!(target_os = "macos") {
            let script = format!(
                "display notification \"{}\" with title \"{}\" subtitle \"{}\"",
                message.replace('"', "\\\""),
                title.replace('"', "\\\""),
                self.app_name.replace('"', "\\\"")
            );
            let mut command = Command::new("osascript");
            command.arg("-e").arg(script);
            command
        } else {
            let mut command = Command::new("notify-send");
            command
                .arg("--app-name")
                .arg(&self.app_name)
                .arg("--expire-time")
                .arg(timeout.as_millis().to_string())
                .arg(title)
                .arg(message);
            command
        }
    }
}

fn ps_quote(text: &str) -> String {
    text.replace('\'', "''")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::MemoryStore;
    use base64::Engine as _;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingTransport {
        delivered: Mutex<Vec<(SmtpCredentials, Vec<u8>, Vec<String>)>>,
    }

    #[async_trait]
    impl MailTransport for RecordingTransport {
        async fn deliver(&self, credentials: &SmtpCredentials, message: Message) -> Result<()> {
            let recipients = message.envelope().to().iter().map(|a| a.to_string()).collect();
            self.delivered
                .lock()
                .unwrap()
                .push((credentials.clone(), message.formatted(), recipients));
            Ok(())
        }
    }

    fn webmail() -> CollectionQuery {
        CollectionQuery { collection: "credentials".to_string(), query: json!({"type": "smtp"}) }
    }

    fn store_with_smtp() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::new().with_documents(
            "credentials",
            vec![json!({
                "type": "smtp",
                "username": "robot@example.com",
                "password": "pw",
                "url": "smtp.example.com",
                "port": "25"
            })],
        ))
    }

    #[test]
    fn message_with_inline_image_and_base64_attachment() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("logo.png");
        let data = dir.path().join("orders.bin");
        std::fs::write(&image, [0x89, b'P', b'N', b'G', 0, 1, 2, 3]).unwrap();
        std::fs::write(&data, [0u8, 159, 146, 150, 255]).unwrap();

        let email = OutgoingEmail {
            attachments: vec![image, data],
            ..OutgoingEmail::html("ops@example.com", "Report", "<p>hi</p>".to_string())
        };
        let raw = String::from_utf8(build_message("robot@example.com", &email).unwrap().formatted()).unwrap();

        assert!(raw.contains("multipart/mixed"));
        assert!(raw.contains("Content-ID: <logo.png>"));
        assert!(raw.contains("Content-Disposition: inline"));
        assert!(raw.contains("Content-Type: image/png"));
        assert!(raw.contains("Content-Disposition: attachment; filename=\"orders.bin\""));
        assert!(raw.contains("Content-Type: application/octet-stream"));
        assert!(raw.contains("Content-Transfer-Encoding: base64"));
        let encoded = base64::engine::general_purpose::STANDARD.encode([0u8, 159, 146, 150, 255]);
        assert!(raw.contains(&encoded));
    }

    #[tokio::test]
    async fn send_email_delivers_to_union_of_recipients() {
        let transport = Arc::new(RecordingTransport::default());
        let sender = EmailSender::with_transport(store_with_smtp(), webmail(), transport.clone());

        let email = OutgoingEmail {
            cc: vec!["cc@example.com".to_string()],
            bcc: vec!["bcc@example.com".to_string()],
            from_address: Some("not-an-address".to_string()),
            ..OutgoingEmail::plain("to@example.com", "Subject", "body".to_string())
        };
        sender.send_email(&email).await.unwrap();

        let delivered = transport.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        let (credentials, raw, recipients) = &delivered[0];
        assert_eq!(credentials.port, 25);
        assert_eq!(recipients.len(), 3);
        let raw = String::from_utf8_lossy(raw);
        assert!(raw.contains("From: robot@example.com"));
        assert!(raw.contains("Cc: cc@example.com"));
        assert!(!raw.contains("bcc@example.com"));
    }

    #[tokio::test]
    async fn construction_failure_never_reaches_transport() {
        let transport = Arc::new(RecordingTransport::default());
        let sender = EmailSender::with_transport(store_with_smtp(), webmail(), transport.clone());

        let email = OutgoingEmail {
            attachments: vec![PathBuf::from("/nonexistent/attachment.pdf")],
            ..OutgoingEmail::plain("to@example.com", "Subject", "body".to_string())
        };

        assert!(sender.send_email(&email).await.is_err());
        assert!(transport.delivered.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn smtp_credentials_errors_are_typed() {
        let empty = MemoryStore::new();
        assert!(matches!(
            get_smtp_credentials(&empty, &webmail()).await,
            Err(FlowError::DataRetrieval(_))
        ));

        let partial = MemoryStore::new()
            .with_documents("credentials", vec![json!({"type": "smtp", "username": "u", "url": "h", "port": 25})]);
        let err = get_smtp_credentials(&partial, &webmail()).await.unwrap_err();
        assert!(matches!(err, FlowError::InvalidDataFormat(ref m) if m.contains("password")));
    }

    #[tokio::test]
    async fn sms_requires_every_parameter() {
        let gateway = SmsGateway::new().unwrap();
        let sms = SmsMessage {
            uid: "user".to_string(),
            pw: String::new(),
            o: "SapFlow".to_string(),
            m: "hello".to_string(),
            n: "351910000000".to_string(),
        };

        let result = gateway.send_sms("http://127.0.0.1:9/sms", &sms).await;
        assert!(matches!(result, Err(FlowError::Validation(ref m)) if m.contains("PW")));
    }
}
