use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use ulid::Ulid;

use crate::limits::MAIL_QUEUE_CAPACITY;

/// Placeholder in an e-mail wrapper template that receives the message body.
pub const BODY_MARKER: &str = "[%body%]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailData {
    pub to: String,
    pub from: String,
    pub subject: String,
    pub content: String,
    /// File name under the mail template directory, e.g. `basic.html`.
    pub template: Option<String>,
}

/// Delivers one fully rendered message.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn deliver(&self, msg: &MailData, body: &str) -> std::io::Result<()>;
}

/// Writes each message to the log. Used when no mail directory is configured.
pub struct LogTransport;

#[async_trait]
impl MailTransport for LogTransport {
    async fn deliver(&self, msg: &MailData, body: &str) -> std::io::Result<()> {
        info!(to = %msg.to, from = %msg.from, subject = %msg.subject, "mail: {body}");
        Ok(())
    }
}

/// Drops each message as `<ulid>.eml` into a directory for a local mail
/// catcher or relay to pick up.
pub struct MailDropTransport {
    dir: PathBuf,
}

impl MailDropTransport {
    pub fn new(dir: PathBuf) -> std::io::Result<Self> {
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }
}

pub fn to_eml(msg: &MailData, body: &str) -> String {
    format!(
        "From: {}\r\nTo: {}\r\nSubject: {}\r\nDate: {}\r\nMIME-Version: 1.0\r\nContent-Type: text/html; charset=utf-8\r\n\r\n{}\r\n",
        msg.from,
        msg.to,
        msg.subject,
        Utc::now().to_rfc2822(),
        body
    )
}

#[async_trait]
impl MailTransport for MailDropTransport {
    async fn deliver(&self, msg: &MailData, body: &str) -> std::io::Result<()> {
        let path = self.dir.join(format!("{}.eml", Ulid::new()));
        tokio::fs::write(&path, to_eml(msg, body)).await
    }
}

/// Body with the wrapper template applied, if the message names one.
pub fn compose(template_dir: &Path, msg: &MailData) -> std::io::Result<String> {
    match &msg.template {
        None => Ok(msg.content.clone()),
        Some(name) => {
            // Template names come from code, but keep lookups inside the directory.
            if name.contains('/') || name.contains('\\') || name.contains("..") {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("bad mail template name: {name}"),
                ));
            }
            let wrapper = fs::read_to_string(template_dir.join(name))?;
            Ok(wrapper.replace(BODY_MARKER, &msg.content))
        }
    }
}

/// Cloneable sender side of the mail queue.
#[derive(Clone)]
pub struct Mailer {
    tx: mpsc::Sender<MailData>,
}

impl Mailer {
    pub fn channel() -> (Self, mpsc::Receiver<MailData>) {
        let (tx, rx) = mpsc::channel(MAIL_QUEUE_CAPACITY);
        (Self { tx }, rx)
    }

    /// Queue a message without waiting. A full or closed queue drops it.
    pub fn send(&self, msg: MailData) {
        if let Err(e) = self.tx.try_send(msg) {
            warn!("mail queue rejected message: {e}");
            metrics::counter!(crate::observability::MAIL_FAILED_TOTAL).increment(1);
        }
    }
}

/// Deliver queued mail until every `Mailer` is dropped.
pub async fn run_mail_listener(
    mut rx: mpsc::Receiver<MailData>,
    transport: Box<dyn MailTransport>,
    template_dir: PathBuf,
) {
    while let Some(msg) = rx.recv().await {
        let delivered = match compose(&template_dir, &msg) {
            Ok(body) => transport.deliver(&msg, &body).await,
            Err(e) => Err(e),
        };
        match delivered {
            Ok(()) => {
                metrics::counter!(crate::observability::MAIL_SENT_TOTAL).increment(1);
            }
            Err(e) => {
                error!(to = %msg.to, subject = %msg.subject, "mail delivery failed: {e}");
                metrics::counter!(crate::observability::MAIL_FAILED_TOTAL).increment(1);
            }
        }
    }
    info!("mail listener stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join("bookings_test_mail")
            .join(format!("{name}_{}", Ulid::new()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn msg(template: Option<&str>) -> MailData {
        MailData {
            to: "john@example.com".into(),
            from: "me@here.com".into(),
            subject: "Reservation Confirmation".into(),
            content: "<strong>Hi</strong>".into(),
            template: template.map(str::to_string),
        }
    }

    #[test]
    fn compose_wraps_body() {
        let dir = tmp_dir("compose");
        fs::write(dir.join("basic.html"), "<html>[%body%]</html>").unwrap();
        assert_eq!(
            compose(&dir, &msg(Some("basic.html"))).unwrap(),
            "<html><strong>Hi</strong></html>"
        );
        assert_eq!(compose(&dir, &msg(None)).unwrap(), "<strong>Hi</strong>");
        assert!(compose(&dir, &msg(Some("missing.html"))).is_err());
        assert!(compose(&dir, &msg(Some("../basic.html"))).is_err());
    }

    #[tokio::test]
    async fn listener_writes_eml_and_survives_failures() {
        let templates = tmp_dir("templates");
        fs::write(templates.join("basic.html"), "<p>[%body%]</p>").unwrap();
        let drop_dir = tmp_dir("drop");

        let (mailer, rx) = Mailer::channel();
        let transport = Box::new(MailDropTransport::new(drop_dir.clone()).unwrap());
        let listener = tokio::spawn(run_mail_listener(rx, transport, templates));

        mailer.send(msg(Some("nope.html")));
        mailer.send(msg(Some("basic.html")));
        mailer.send(msg(None));
        drop(mailer);
        listener.await.unwrap();

        let files: Vec<_> = fs::read_dir(&drop_dir).unwrap().collect();
        assert_eq!(files.len(), 2);
        let wrapped = files
            .iter()
            .map(|f| fs::read_to_string(f.as_ref().unwrap().path()).unwrap())
            .find(|s| s.contains("<p><strong>Hi</strong></p>"));
        let eml = wrapped.expect("wrapped message written");
        assert!(eml.starts_with("From: me@here.com\r\nTo: john@example.com\r\n"));
        assert!(eml.contains("Subject: Reservation Confirmation"));
    }
}
