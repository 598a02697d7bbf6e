//! Owner notifications: OTP codes, alerts, success notices and QR approvals.
//!
//! Messages are built as plain [`Notification`] values and handed to a
//! [`Notifier`]. Delivery failures are returned to the caller, which logs them;
//! an email problem never changes the outcome of an authentication attempt.

use crate::common::config::SmtpConfig;
use crate::common::{SmartLockError, Result};
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Content id referenced by `<img src="cid:...">` in approval emails.
pub const INLINE_IMAGE_CID: &str = "captureimg";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub subject: String,
    pub html: String,
    /// Sent as a regular attachment.
    pub attachment: Option<PathBuf>,
    /// Embedded in the HTML under [`INLINE_IMAGE_CID`].
    pub inline_image: Option<PathBuf>,
}

impl Notification {
    pub fn otp(code: &str, ttl_seconds: u64) -> Self {
        Self {
            subject: "Your OTP for Smart Lock".to_string(),
            html: format!(
                "<p>Your OTP is: <b>{}</b></p><p>Expires in {} minute(s).</p>",
                code,
                ttl_seconds / 60
            ),
            attachment: None,
            inline_image: None,
        }
    }

    pub fn alert(reason: &str, origin: &str, evidence: Option<PathBuf>) -> Self {
        Self {
            subject: format!("Alert: {}", reason),
            html: format!("<p>Alert reason: <b>{}</b></p><p>From IP: {}</p>", reason, origin),
            attachment: evidence,
            inline_image: None,
        }
    }

    pub fn success(method: &str, origin: &str) -> Self {
        Self {
            subject: format!("Success: {} authentication", method),
            html: format!("<p>{} authentication succeeded.</p><p>From IP: {}</p>", method, origin),
            attachment: None,
            inline_image: None,
        }
    }

    pub fn approval_request(
        name: &str,
        phone: &str,
        approve_link: &str,
        deny_link: &str,
        photo: Option<PathBuf>,
    ) -> Self {
        let mut html = format!(
            "<h3>QR Code Request</h3>\
             <p>Name: <b>{}</b></p>\
             <p>Phone: <b>{}</b></p>\
             <p>Please <a href=\"{}\">Approve</a> or <a href=\"{}\">Deny</a> this request.</p>",
            escape_html(name),
            escape_html(phone),
            approve_link,
            deny_link
        );
        if photo.is_some() {
            html.push_str(&format!(
                "<p><b>Captured image for verification:</b></p><img src=\"cid:{}\" width=\"300\">",
                INLINE_IMAGE_CID
            ));
        }
        Self {
            subject: "Smart Lock QR Code Request Approval".to_string(),
            html,
            attachment: None,
            inline_image: photo,
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<()>;
}

/// Stand-in used when no SMTP credentials are configured.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        tracing::warn!(
            subject = %notification.subject,
            "EMAIL_USER/EMAIL_PASS not set, skipping email send"
        );
        Ok(())
    }
}

/// Implicit-TLS SMTP relay.
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

impl SmtpNotifier {
    pub fn new(host: &str, port: u16, username: &str, password: &str, recipient: &str) -> Result<Self> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(host)
            .map_err(|e| SmartLockError::Email(format!("Invalid SMTP relay {}: {}", host, e)))?
            .port(port)
            .credentials(Credentials::new(username.to_string(), password.to_string()))
            .build();

        Ok(Self {
            transport,
            from: parse_mailbox(username)?,
            to: parse_mailbox(recipient)?,
        })
    }

    async fn build_message(&self, notification: &Notification) -> Result<Message> {
        let mut body = MultiPart::related().singlepart(SinglePart::html(notification.html.clone()));

        if let Some(bytes) = read_if_present(notification.inline_image.as_deref()).await {
            let content_type = ContentType::parse("image/jpeg")
                .map_err(|e| SmartLockError::Email(e.to_string()))?;
            body = body.singlepart(Attachment::new_inline(INLINE_IMAGE_CID.to_string()).body(bytes, content_type));
        }

        if let Some(path) = notification.attachment.as_deref() {
            if let Some(bytes) = read_if_present(Some(path)).await {
                let filename = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "capture.jpg".to_string());
                let content_type = ContentType::parse("application/octet-stream")
                    .map_err(|e| SmartLockError::Email(e.to_string()))?;
                body = body.singlepart(Attachment::new(filename).body(bytes, content_type));
            }
        }

        Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(notification.subject.clone())
            .multipart(body)
            .map_err(|e| SmartLockError::Email(format!("Failed to build message: {}", e)))
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        let message = self.build_message(notification).await?;
        self.transport
            .send(message)
            .await
            .map_err(|e| SmartLockError::Email(e.to_string()))?;
        tracing::info!("Email sent: {}", notification.subject);
        Ok(())
    }
}

/// SMTP when both credentials and a recipient are configured, otherwise a
/// notifier that only logs.
pub fn notifier_from_config(config: &SmtpConfig) -> Result<Arc<dyn Notifier>> {
    match (config.username.as_deref(), config.password.as_deref(), config.recipient()) {
        (Some(user), Some(pass), Some(to)) if !user.is_empty() && !pass.is_empty() => {
            tracing::info!("Sending notifications via {}:{} to {}", config.host, config.port, to);
            Ok(Arc::new(SmtpNotifier::new(&config.host, config.port, user, pass, to)?))
        }
        _ => {
            tracing::warn!("SMTP credentials not configured; notifications will only be logged");
            Ok(Arc::new(LogNotifier))
        }
    }
}

// Requester-supplied text ends up in the owner's mail client.
fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn parse_mailbox(address: &str) -> Result<Mailbox> {
    address
        .parse()
        .map_err(|e| SmartLockError::Email(format!("Invalid address {:?}: {}", address, e)))
}

async fn read_if_present(path: Option<&Path>) -> Option<Vec<u8>> {
    let path = path?;
    match tokio::fs::read(path).await {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            tracing::warn!("Skipping attachment {}: {}", path.display(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn otp_mail_states_minutes() {
        let mail = Notification::otp("123456", 180);
        assert!(mail.html.contains("<b>123456</b>"));
        assert!(mail.html.contains("Expires in 3 minute(s)"));
    }

    #[test]
    fn alert_subject_carries_reason() {
        let mail = Notification::alert("Wrong PIN (method=pin)", "10.0.0.7", Some(PathBuf::from("x.jpg")));
        assert_eq!(mail.subject, "Alert: Wrong PIN (method=pin)");
        assert!(mail.html.contains("10.0.0.7"));
        assert_eq!(mail.attachment, Some(PathBuf::from("x.jpg")));
    }

    #[test]
    fn approval_request_links_and_inline_image() {
        let mail = Notification::approval_request(
            "Bob",
            "555-1234",
            "http://lock/qr/approve?token=t",
            "http://lock/qr/deny?token=t",
            Some(PathBuf::from("qr.jpg")),
        );
        assert!(mail.html.contains("href=\"http://lock/qr/approve?token=t\""));
        assert!(mail.html.contains("cid:captureimg"));

        let without_photo = Notification::approval_request("Bob", "555-1234", "a", "d", None);
        assert!(!without_photo.html.contains("cid:"));
    }

    #[test]
    fn requester_text_is_escaped() {
        let mail = Notification::approval_request("<b>Bob</b>", "555", "a", "d", None);
        assert!(mail.html.contains("&lt;b&gt;Bob&lt;/b&gt;"));
    }

    #[test]
    fn missing_credentials_fall_back_to_logging() {
        assert!(notifier_from_config(&SmtpConfig::default()).is_ok());
    }

    #[tokio::test]
    async fn smtp_message_embeds_the_inline_image() {
        let dir = tempfile::tempdir().unwrap();
        let photo = dir.path().join("qr_request.jpg");
        std::fs::write(&photo, [0xFF, 0xD8, 0xFF, 0xD9]).unwrap();

        let notifier = SmtpNotifier::new("smtp.example.com", 465, "lock@example.com", "pw", "owner@example.com").unwrap();
        let mail = Notification::approval_request("Bob", "555", "a", "d", Some(photo));
        let message = notifier.build_message(&mail).await.unwrap();
        let raw = String::from_utf8_lossy(&message.formatted()).into_owned();

        assert!(raw.contains("multipart/related"));
        assert!(raw.contains("Content-ID: <captureimg>"));
        assert!(raw.contains("Subject: Smart Lock QR Code Request Approval"));
    }
}
