//! Mail I/O: IMAP for the inbox, SMTP via lettre for replies.
//!
//! The poller only talks to the traits below, so tests can swap in
//! in-memory stores and mailers.

pub mod filter;
pub mod imap;
pub mod parse;
pub mod smtp;
pub mod types;

pub use filter::{DEFAULT_ALLOWED_DOMAINS, is_allowed};
pub use imap::ImapStore;
pub use parse::{extract_body, parse_message, parse_sender};
pub use smtp::SmtpMailer;
pub use types::{InboundEmail, MessageId, SenderInfo};

use async_trait::async_trait;

use crate::error::{MailStoreError, SendError};
use crate::reply::ReplyDraft;

/// Opens a fresh mailbox session. One session is used per polling cycle.
#[async_trait]
pub trait MailStore: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn MailSession>, MailStoreError>;
}

/// An open connection to the mail store.
#[async_trait]
pub trait MailSession: Send {
    async fn login(&mut self, username: &str, password: &str) -> Result<(), MailStoreError>;

    async fn select_mailbox(&mut self, mailbox: &str) -> Result<(), MailStoreError>;

    /// Ids of unread messages, in the order the server returned them.
    async fn search_unseen(&mut self) -> Result<Vec<MessageId>, MailStoreError>;

    /// Raw RFC 822 bytes of one message.
    async fn fetch(&mut self, id: &MessageId) -> Result<Vec<u8>, MailStoreError>;

    async fn logout(&mut self) -> Result<(), MailStoreError>;
}

/// Outbound mail relay.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, draft: &ReplyDraft) -> Result<(), SendError>;
}
