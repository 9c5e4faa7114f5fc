//! Error types for autoreply.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Mail store error: {0}")]
    MailStore(#[from] MailStoreError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Send error: {0}")]
    Send(#[from] SendError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors from the IMAP mail store.
#[derive(Debug, thiserror::Error)]
pub enum MailStoreError {
    #[error("Failed to connect to {host}: {reason}")]
    Connection { host: String, reason: String },

    #[error("Authentication failed for {user}: {reason}")]
    Auth { user: String, reason: String },

    #[error("Failed to select mailbox {mailbox}: {reason}")]
    Select { mailbox: String, reason: String },

    #[error("Search for unseen messages failed: {0}")]
    Search(String),

    #[error("Failed to fetch message {id}: {reason}")]
    Fetch { id: String, reason: String },

    #[error("IMAP protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors turning raw message bytes into an inbound email.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Message is not valid RFC 822 ({len} bytes)")]
    Unparseable { len: usize },
}

/// Completion service errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Outbound SMTP errors.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("Invalid {field} address {address:?}: {reason}")]
    InvalidAddress {
        field: &'static str,
        address: String,
        reason: String,
    },

    #[error("Failed to build reply: {0}")]
    Build(String),

    #[error("SMTP transport error: {0}")]
    Transport(String),
}

/// Result type alias for autoreply.
pub type Result<T> = std::result::Result<T, Error>;
