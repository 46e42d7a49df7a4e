//! Notification and failure-reporting services

pub mod exception_handler;
pub mod notification;

// Re-export service types
pub use exception_handler::{install_panic_hook, panic_message, take_panic_site, ExceptionHandler, PanicSite, UncaughtFailure};
pub use notification::{
    get_smtp_credentials, DesktopNotifier, EmailSender, MailTransport, OutgoingEmail, SmsGateway, SmsMessage,
    SmtpMailer,
};
