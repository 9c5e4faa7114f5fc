//! Outbound replies over SMTP (STARTTLS) via lettre.

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::{ExposeSecret, SecretString};
use tracing::info;

use crate::error::SendError;
use crate::mail::Mailer;
use crate::reply::ReplyDraft;

/// Sends replies from the account address. Opens a new SMTP connection per send.
pub struct SmtpMailer {
    transport: SmtpTransport,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(
        host: &str,
        port: u16,
        username: &str,
        password: &SecretString,
        from_address: &str,
    ) -> Result<Self, SendError> {
        let from = from_address
            .parse()
            .map_err(|e| SendError::InvalidAddress {
                field: "from",
                address: from_address.to_string(),
                reason: format!("{e}"),
            })?;

        let creds = Credentials::new(username.to_string(), password.expose_secret().to_string());
        let transport = SmtpTransport::starttls_relay(host)
            .map_err(|e| SendError::Transport(format!("SMTP relay error: {e}")))?
            .port(port)
            .credentials(creds)
            .build();

        Ok(Self { transport, from })
    }

    fn build_message(&self, to: &str, draft: &ReplyDraft) -> Result<Message, SendError> {
        let to: Mailbox = to.parse().map_err(|e| SendError::InvalidAddress {
            field: "to",
            address: to.to_string(),
            reason: format!("{e}"),
        })?;

        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(draft.subject.as_str())
            .header(ContentType::TEXT_PLAIN)
            .body(draft.body.clone())
            .map_err(|e| SendError::Build(e.to_string()))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, to: &str, draft: &ReplyDraft) -> Result<(), SendError> {
        let email = self.build_message(to, draft)?;
        let transport = self.transport.clone();

        tokio::task::spawn_blocking(move || transport.send(&email))
            .await
            .map_err(|e| SendError::Transport(format!("SMTP task panicked: {e}")))?
            .map_err(|e| SendError::Transport(format!("SMTP send failed: {e}")))?;

        info!("Replied to {to}");
        Ok(())
    }
}
