use async_trait::async_trait;
use lettre::message::{header, Mailbox, Message};
use lettre::transport::smtp::{authentication::Credentials, AsyncSmtpTransport};
use lettre::{AsyncTransport, Tokio1Executor};
use tracing::info;

use crate::config::SmtpConfig;
use crate::types::{IngestError, Result, StoredItem};

/// Outbound notification channel. Best-effort: failures are logged by the
/// caller and never rolled back against persistence.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, recipient: &str, subject: &str, html_body: &str) -> Result<()>;
}

/// Subject and HTML body for a newly persisted item.
pub fn compose(item: &StoredItem) -> (String, String) {
    let subject = format!("{} - {}", item.category.to_uppercase(), item.title);
    let body = format!(
        "<html><body><br><i>Posted by {} in {} blog on {}</i><br><br>\
         <a href=\"{}\">view post here</a><br><br>{}<br></body></html>",
        item.author, item.category, item.datestr, item.link, item.raw_html
    );
    (subject, body)
}

pub struct EmailNotifier {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl EmailNotifier {
    pub fn new(config: &SmtpConfig) -> Result<Self> {
        let creds = Credentials::new(config.user.clone(), config.pass.clone());
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
            .map_err(|e| IngestError::Notify(format!("invalid SMTP host: {e}")))?
            .credentials(creds)
            .build();
        let from = config
            .from
            .parse()
            .map_err(|e| IngestError::Notify(format!("invalid from address: {e}")))?;

        Ok(Self { mailer, from })
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn send(&self, recipient: &str, subject: &str, html_body: &str) -> Result<()> {
        let to: Mailbox = recipient
            .parse()
            .map_err(|e| IngestError::Notify(format!("invalid recipient: {e}")))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .header(header::ContentType::TEXT_HTML)
            .body(html_body.to_string())
            .map_err(|e| IngestError::Notify(format!("build message: {e}")))?;

        self.mailer
            .send(message)
            .await
            .map_err(|e| IngestError::Notify(format!("send: {e}")))?;

        info!("sent notification '{}' to {}", subject, recipient);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compose_formats_subject_and_body() {
        let item = StoredItem {
            identity: "g1".to_string(),
            category: "security".to_string(),
            timestamp: 100,
            datestr: "04-08-2026 10:00".to_string(),
            title: "New bulletin".to_string(),
            description: "d".to_string(),
            clean_text: "c".to_string(),
            raw_html: "<p>body</p>".to_string(),
            link: "https://example.com/p/1".to_string(),
            author: "marek".to_string(),
            tags: vec!["none".to_string()],
            tags_lower: vec!["none".to_string()],
            category_terms: vec!["none".to_string()],
            visible: true,
        };

        let (subject, body) = compose(&item);
        assert_eq!(subject, "SECURITY - New bulletin");
        assert!(body.contains("Posted by marek in security blog on 04-08-2026 10:00"));
        assert!(body.contains("<a href=\"https://example.com/p/1\">view post here</a>"));
        assert!(body.contains("<p>body</p>"));
    }
}
