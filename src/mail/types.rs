//! Email-specific types shared by the parser, the poller and the mailers.

use std::fmt;

/// IMAP sequence number of an unseen message, as returned by `SEARCH`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who sent a message, as recovered from the raw `From` header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SenderInfo {
    /// Bare address, angle brackets stripped. Empty when the header was absent.
    pub address: String,
    /// Everything before the address. May be empty.
    pub display_name: String,
}

/// The parts of an unread message the reply path needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEmail {
    pub sender: SenderInfo,
    /// Decoded subject, empty when the header was absent.
    pub subject: String,
    /// First plain-text body, empty when none could be decoded.
    pub body: String,
}
