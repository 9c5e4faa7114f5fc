//! Configuration, loaded once at startup from the environment.

use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::llm::{DEFAULT_BASE_URL, DEFAULT_MODEL, LlmConfig};
use crate::mail::DEFAULT_ALLOWED_DOMAINS;
use crate::poller::PollerSettings;
use crate::reply::DEFAULT_FALLBACK_REPLY;

const DEFAULT_SELF_NAME: &str = "John Doe";
const DEFAULT_IMAP_HOST: &str = "imap.gmail.com";
const DEFAULT_IMAP_PORT: u16 = 993;
const DEFAULT_SMTP_HOST: &str = "smtp.gmail.com";
const DEFAULT_SMTP_PORT: u16 = 587;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 15;

/// Everything the process needs, immutable after startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Account address; IMAP/SMTP login name and the From of every reply.
    pub account: String,
    pub password: SecretString,
    pub api_key: SecretString,
    /// Name the model signs replies as.
    pub self_name: String,
    pub allowed_domains: Vec<String>,
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub poll_interval: Duration,
    pub model: String,
    pub api_base_url: String,
    /// Reply body when the completion fails. `None` skips the message instead.
    pub fallback_reply: Option<String>,
}

impl AppConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &str| get(key).ok_or_else(|| ConfigError::MissingEnvVar(key.into()));

        let account = required("EMAIL")?;
        let password = SecretString::from(required("EMAIL_PASS")?);
        let api_key = SecretString::from(required("OPENAI_KEY")?);

        let allowed_domains = match get("AUTOREPLY_ALLOWED_DOMAINS") {
            Some(list) => list
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            None => DEFAULT_ALLOWED_DOMAINS.iter().map(|d| d.to_string()).collect(),
        };

        // An explicitly empty value disables the fallback, so check the raw lookup.
        let fallback_reply = match lookup("AUTOREPLY_FALLBACK_REPLY") {
            Some(text) if text.trim().is_empty() => None,
            Some(text) => Some(text),
            None => Some(DEFAULT_FALLBACK_REPLY.to_string()),
        };

        let poll_interval_secs: u64 = parse_or(
            get("AUTOREPLY_POLL_INTERVAL_SECS"),
            "AUTOREPLY_POLL_INTERVAL_SECS",
            DEFAULT_POLL_INTERVAL_SECS,
        )?;
        if poll_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "AUTOREPLY_POLL_INTERVAL_SECS".into(),
                message: "must be at least 1".into(),
            });
        }

        Ok(Self {
            account,
            password,
            api_key,
            self_name: get("AUTOREPLY_NAME").unwrap_or_else(|| DEFAULT_SELF_NAME.to_string()),
            allowed_domains,
            imap_host: get("IMAP_HOST").unwrap_or_else(|| DEFAULT_IMAP_HOST.to_string()),
            imap_port: parse_or(get("IMAP_PORT"), "IMAP_PORT", DEFAULT_IMAP_PORT)?,
            smtp_host: get("SMTP_HOST").unwrap_or_else(|| DEFAULT_SMTP_HOST.to_string()),
            smtp_port: parse_or(get("SMTP_PORT"), "SMTP_PORT", DEFAULT_SMTP_PORT)?,
            poll_interval: Duration::from_secs(poll_interval_secs),
            model: get("AUTOREPLY_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_base_url: get("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            fallback_reply,
        })
    }

    pub fn llm_config(&self) -> LlmConfig {
        LlmConfig {
            api_key: self.api_key.clone(),
            model: self.model.clone(),
            base_url: self.api_base_url.clone(),
        }
    }

    pub fn poller_settings(&self) -> PollerSettings {
        PollerSettings {
            username: self.account.clone(),
            password: self.password.clone(),
            mailbox: "INBOX".to_string(),
            allowed_domains: self.allowed_domains.clone(),
            self_name: self.self_name.clone(),
            fallback_reply: self.fallback_reply.clone(),
        }
    }
}

fn parse_or<T>(value: Option<String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{raw:?}: {e}"),
        }),
    }
}
