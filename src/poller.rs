//! Mailbox poller: one cycle reads unseen mail and answers allowed senders.
//!
//! A cycle is strictly sequential:
//! 1. Connect, log in, select INBOX, search UNSEEN
//! 2. For each id: fetch → parse → allowlist → prompt → completion → send
//! 3. Log out, even if an earlier step failed
//!
//! Per-message failures are logged and counted; only session-level failures
//! fail the cycle. `spawn_poller` repeats cycles on a fixed interval.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::error::{Error, MailStoreError};
use crate::llm::{ChatMessage, CompletionRequest, FinishReason, LlmProvider};
use crate::mail::{
    InboundEmail, MailSession, MailStore, Mailer, MessageId, is_allowed, parse_message,
};
use crate::reply::{ReplyDraft, compose_prompt, format_reply};

/// Per-account settings for the poller.
#[derive(Debug, Clone)]
pub struct PollerSettings {
    pub username: String,
    pub password: SecretString,
    pub mailbox: String,
    pub allowed_domains: Vec<String>,
    pub self_name: String,
    pub fallback_reply: Option<String>,
}

/// What happened during one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub unseen: usize,
    pub replied: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MessageOutcome {
    Replied,
    Skipped,
}

pub struct Poller {
    store: Box<dyn MailStore>,
    llm: Arc<dyn LlmProvider>,
    mailer: Arc<dyn Mailer>,
    settings: PollerSettings,
}

impl Poller {
    pub fn new(
        store: Box<dyn MailStore>,
        llm: Arc<dyn LlmProvider>,
        mailer: Arc<dyn Mailer>,
        settings: PollerSettings,
    ) -> Self {
        Self {
            store,
            llm,
            mailer,
            settings,
        }
    }

    /// Run a single poll cycle.
    pub async fn poll_once(&self) -> Result<CycleReport, MailStoreError> {
        let mut session = self.store.connect().await?;

        let result = self.process_mailbox(session.as_mut()).await;

        if let Err(e) = session.logout().await {
            warn!("Error while logging out from email account: {e}");
        }

        result
    }

    async fn process_mailbox(
        &self,
        session: &mut dyn MailSession,
    ) -> Result<CycleReport, MailStoreError> {
        session
            .login(&self.settings.username, self.settings.password.expose_secret())
            .await?;
        session.select_mailbox(&self.settings.mailbox).await?;

        let ids = session.search_unseen().await?;
        info!("Found {} unread emails", ids.len());

        let mut report = CycleReport {
            unseen: ids.len(),
            ..CycleReport::default()
        };

        for id in &ids {
            match self.process_message(session, id).await {
                Ok(MessageOutcome::Replied) => report.replied += 1,
                Ok(MessageOutcome::Skipped) => report.skipped += 1,
                Err(e) => {
                    error!(id = %id, "Error processing email: {e}");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    async fn process_message(
        &self,
        session: &mut dyn MailSession,
        id: &MessageId,
    ) -> Result<MessageOutcome, Error> {
        let raw = session.fetch(id).await?;
        let email = parse_message(&raw)?;

        if !is_allowed(&email.sender.address, &self.settings.allowed_domains) {
            info!(id = %id, "Email from {} is not allowed", email.sender.address);
            return Ok(MessageOutcome::Skipped);
        }

        info!(id = %id, "From: {} | Subject: {}", email.sender.address, email.subject);

        let draft = self.draft_reply(&email).await?;
        self.mailer.send(&email.sender.address, &draft).await?;

        Ok(MessageOutcome::Replied)
    }

    /// Ask the model for a reply. Falls back to the canned text on failure,
    /// or propagates the error when no fallback is configured.
    async fn draft_reply(&self, email: &InboundEmail) -> Result<ReplyDraft, Error> {
        let prompt = compose_prompt(
            &email.sender.display_name,
            &email.sender.address,
            &email.subject,
            &email.body,
            &self.settings.self_name,
        );
        let request = CompletionRequest::new(vec![ChatMessage::user(prompt)]);

        let text = match self.llm.complete(request).await {
            Ok(response) => {
                debug!(
                    model = self.llm.model_name(),
                    input_tokens = response.input_tokens,
                    output_tokens = response.output_tokens,
                    finish_reason = ?response.finish_reason,
                    "Generated reply"
                );
                if response.finish_reason == FinishReason::Length {
                    warn!("Reply hit the model's token limit and may be cut off");
                }
                response.content
            }
            Err(e) => match &self.settings.fallback_reply {
                Some(fallback) => {
                    warn!("Error generating AI reply, sending fallback: {e}");
                    fallback.clone()
                }
                None => return Err(e.into()),
            },
        };

        Ok(format_reply(&email.subject, &text))
    }
}

/// Spawn the main loop: run a cycle, sleep `interval`, repeat.
///
/// Cycle failures are logged and never stop the loop. Returns a
/// `JoinHandle` and a shutdown flag; the loop exits once the flag is set.
pub fn spawn_poller(
    poller: Arc<Poller>,
    interval: Duration,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!("Email poller started, polling every {}s", interval.as_secs());

        loop {
            if shutdown.load(Ordering::Relaxed) {
                info!("Email poller shutting down");
                return;
            }

            match poller.poll_once().await {
                Ok(report) => info!(
                    unseen = report.unseen,
                    replied = report.replied,
                    skipped = report.skipped,
                    failed = report.failed,
                    "All unread emails processed"
                ),
                Err(e) => error!("Error while reading unread emails: {e}"),
            }

            tokio::time::sleep(interval).await;
        }
    });

    (handle, shutdown_flag)
}

/// Set the shutdown flag and wait up to `grace` for the loop to exit.
///
/// A loop still sleeping or blocked in mail I/O after `grace` is aborted.
/// Returns `true` only when the loop stopped on its own.
pub async fn stop_poller(
    mut handle: JoinHandle<()>,
    shutdown: &AtomicBool,
    grace: Duration,
) -> bool {
    shutdown.store(true, Ordering::Relaxed);

    match timeout(grace, &mut handle).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            error!("Email poller task failed: {e}");
            false
        }
        Err(_) => {
            warn!("Email poller did not stop within {}s, aborting", grace.as_secs());
            handle.abort();
            false
        }
    }
}
