//! End-to-end polling cycles against in-memory mail store, LLM and mailer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use tokio::time::timeout;

use autoreply::error::{LlmError, MailStoreError, SendError};
use autoreply::llm::{CompletionRequest, CompletionResponse, FinishReason, LlmProvider};
use autoreply::mail::{DEFAULT_ALLOWED_DOMAINS, MailSession, MailStore, Mailer, MessageId};
use autoreply::poller::{CycleReport, Poller, PollerSettings, spawn_poller, stop_poller};
use autoreply::reply::{DEFAULT_FALLBACK_REPLY, ReplyDraft};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

// ── Stubs ───────────────────────────────────────────────────────────

type CallLog = Arc<Mutex<Vec<String>>>;

#[derive(Clone, Default)]
struct StubStore {
    /// Unseen ids in server order; `None` makes that fetch fail.
    messages: Vec<(String, Option<String>)>,
    fail_connect: bool,
    fail_login: bool,
    calls: CallLog,
    connects: Arc<AtomicUsize>,
}

impl StubStore {
    fn with_messages(messages: &[(&str, Option<String>)]) -> Self {
        Self {
            messages: messages
                .iter()
                .map(|(id, raw)| (id.to_string(), raw.clone()))
                .collect(),
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailStore for StubStore {
    async fn connect(&self) -> Result<Box<dyn MailSession>, MailStoreError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect {
            return Err(MailStoreError::Connection {
                host: "imap.test.com".into(),
                reason: "connection refused".into(),
            });
        }
        Ok(Box::new(StubSession {
            messages: self.messages.iter().cloned().collect(),
            order: self.messages.iter().map(|(id, _)| id.clone()).collect(),
            fail_login: self.fail_login,
            calls: Arc::clone(&self.calls),
        }))
    }
}

struct StubSession {
    messages: HashMap<String, Option<String>>,
    order: Vec<String>,
    fail_login: bool,
    calls: CallLog,
}

impl StubSession {
    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

#[async_trait]
impl MailSession for StubSession {
    async fn login(&mut self, username: &str, password: &str) -> Result<(), MailStoreError> {
        self.record(format!("login {username}"));
        assert_eq!(password, "app-password");
        if self.fail_login {
            return Err(MailStoreError::Auth {
                user: username.to_string(),
                reason: "Invalid credentials".into(),
            });
        }
        Ok(())
    }

    async fn select_mailbox(&mut self, mailbox: &str) -> Result<(), MailStoreError> {
        self.record(format!("select {mailbox}"));
        Ok(())
    }

    async fn search_unseen(&mut self) -> Result<Vec<MessageId>, MailStoreError> {
        self.record("search");
        Ok(self.order.iter().map(MessageId::new).collect())
    }

    async fn fetch(&mut self, id: &MessageId) -> Result<Vec<u8>, MailStoreError> {
        self.record(format!("fetch {id}"));
        match self.messages.get(id.as_str()) {
            Some(Some(raw)) => Ok(raw.clone().into_bytes()),
            _ => Err(MailStoreError::Fetch {
                id: id.to_string(),
                reason: "connection reset".into(),
            }),
        }
    }

    async fn logout(&mut self) -> Result<(), MailStoreError> {
        self.record("logout");
        Ok(())
    }
}

/// Returns a fixed reply (or error) and records every prompt it saw.
struct StubLlm {
    reply: Option<String>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl StubLlm {
    fn replying(text: &str) -> Self {
        Self {
            reply: Some(text.to_string()),
            prompts: Arc::default(),
        }
    }

    fn failing() -> Self {
        Self {
            reply: None,
            prompts: Arc::default(),
        }
    }
}

#[async_trait]
impl LlmProvider for StubLlm {
    fn model_name(&self) -> &str {
        "stub"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let prompt = request
            .messages
            .iter()
            .map(|m| m.content.clone())
            .collect::<Vec<_>>()
            .join("\n");
        self.prompts.lock().unwrap().push(prompt);

        match &self.reply {
            Some(text) => Ok(CompletionResponse {
                content: text.clone(),
                input_tokens: 0,
                output_tokens: 0,
                finish_reason: FinishReason::Stop,
            }),
            None => Err(LlmError::RequestFailed {
                provider: "stub".into(),
                reason: "service unavailable".into(),
            }),
        }
    }
}

/// Records sent replies; optionally rejects one recipient.
#[derive(Default)]
struct StubMailer {
    sent: Mutex<Vec<(String, ReplyDraft)>>,
    reject: Option<String>,
}

#[async_trait]
impl Mailer for StubMailer {
    async fn send(&self, to: &str, draft: &ReplyDraft) -> Result<(), SendError> {
        if self.reject.as_deref() == Some(to) {
            return Err(SendError::Transport("550 mailbox unavailable".into()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), draft.clone()));
        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn settings() -> PollerSettings {
    PollerSettings {
        username: "me@gmail.com".into(),
        password: SecretString::from("app-password"),
        mailbox: "INBOX".into(),
        allowed_domains: DEFAULT_ALLOWED_DOMAINS.iter().map(|d| d.to_string()).collect(),
        self_name: "John Doe".into(),
        fallback_reply: Some(DEFAULT_FALLBACK_REPLY.into()),
    }
}

fn plain_email(from: &str, subject: &str, body: &str) -> Option<String> {
    Some(format!(
        "From: {from}\r\n\
         To: me@gmail.com\r\n\
         Subject: {subject}\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         \r\n\
         {body}\r\n"
    ))
}

struct Harness {
    poller: Poller,
    store: StubStore,
    prompts: Arc<Mutex<Vec<String>>>,
    mailer: Arc<StubMailer>,
}

impl Harness {
    fn new(store: StubStore, llm: StubLlm, mailer: StubMailer, settings: PollerSettings) -> Self {
        let prompts = Arc::clone(&llm.prompts);
        let mailer = Arc::new(mailer);
        let poller = Poller::new(
            Box::new(store.clone()),
            Arc::new(llm),
            Arc::clone(&mailer) as Arc<dyn Mailer>,
            settings,
        );
        Self {
            poller,
            store,
            prompts,
            mailer,
        }
    }

    fn sent(&self) -> Vec<(String, ReplyDraft)> {
        self.mailer.sent.lock().unwrap().clone()
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

// ── Cycles ──────────────────────────────────────────────────────────

#[tokio::test]
async fn allowed_sender_gets_model_reply() {
    let store = StubStore::with_messages(&[(
        "1",
        plain_email("Bob Builder <bob@gmail.com>", "Question", "When are you free?"),
    )]);
    let h = Harness::new(
        store,
        StubLlm::replying("Anytime after 3pm!"),
        StubMailer::default(),
        settings(),
    );

    let report = h.poller.poll_once().await.unwrap();
    assert_eq!(
        report,
        CycleReport {
            unseen: 1,
            replied: 1,
            skipped: 0,
            failed: 0
        }
    );

    let prompts = h.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("Bob Builder"));
    assert!(prompts[0].contains("bob@gmail.com"));
    assert!(prompts[0].contains("Subject: Question"));
    assert!(prompts[0].contains("When are you free?"));
    assert!(prompts[0].contains("Your reply as John Doe"));

    let sent = h.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "bob@gmail.com");
    assert_eq!(sent[0].1.subject, "Re: Question");
    assert_eq!(sent[0].1.body, "Anytime after 3pm!");

    assert_eq!(
        h.store.calls(),
        vec!["login me@gmail.com", "select INBOX", "search", "fetch 1", "logout"]
    );
}

#[tokio::test]
async fn denied_sender_is_skipped_without_completion_or_send() {
    let store = StubStore::with_messages(&[
        ("1", plain_email("Eve <eve@proton.me>", "Hi", "Let me in")),
        ("2", plain_email("bob@gmail.com", "Question", "When are you free?")),
    ]);
    let h = Harness::new(
        store,
        StubLlm::replying("Anytime after 3pm!"),
        StubMailer::default(),
        settings(),
    );

    let report = h.poller.poll_once().await.unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(report.replied, 1);

    let prompts = h.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(!prompts[0].contains("eve@proton.me"));

    let sent = h.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "bob@gmail.com");
}

#[tokio::test]
async fn uppercase_domain_is_not_allowed() {
    let store = StubStore::with_messages(&[("1", plain_email("x@GMAIL.com", "Hi", "Hello"))]);
    let h = Harness::new(
        store,
        StubLlm::replying("unused"),
        StubMailer::default(),
        settings(),
    );

    let report = h.poller.poll_once().await.unwrap();
    assert_eq!(report.skipped, 1);
    assert!(h.prompts().is_empty());
    assert!(h.sent().is_empty());
}

#[tokio::test]
async fn one_failed_fetch_does_not_stop_the_others() {
    let store = StubStore::with_messages(&[
        ("1", plain_email("a@gmail.com", "One", "first")),
        ("2", None),
        ("3", plain_email("c@yahoo.com", "Three", "third")),
    ]);
    let h = Harness::new(
        store,
        StubLlm::replying("Thanks!"),
        StubMailer::default(),
        settings(),
    );

    let report = h.poller.poll_once().await.unwrap();
    assert_eq!(
        report,
        CycleReport {
            unseen: 3,
            replied: 2,
            skipped: 0,
            failed: 1
        }
    );

    let recipients: Vec<String> = h.sent().into_iter().map(|(to, _)| to).collect();
    assert_eq!(recipients, vec!["a@gmail.com", "c@yahoo.com"]);
    assert_eq!(h.store.calls().last().map(String::as_str), Some("logout"));
}

#[tokio::test]
async fn empty_mailbox_is_a_quiet_cycle() {
    let h = Harness::new(
        StubStore::default(),
        StubLlm::replying("unused"),
        StubMailer::default(),
        settings(),
    );

    let report = h.poller.poll_once().await.unwrap();
    assert_eq!(report, CycleReport::default());
    assert_eq!(
        h.store.calls(),
        vec!["login me@gmail.com", "select INBOX", "search", "logout"]
    );
}

#[tokio::test]
async fn login_failure_still_logs_out() {
    let store = StubStore {
        fail_login: true,
        ..StubStore::with_messages(&[("1", plain_email("a@gmail.com", "S", "B"))])
    };
    let h = Harness::new(
        store,
        StubLlm::replying("unused"),
        StubMailer::default(),
        settings(),
    );

    let err = h.poller.poll_once().await.unwrap_err();
    assert!(matches!(err, MailStoreError::Auth { .. }));
    assert_eq!(h.store.calls(), vec!["login me@gmail.com", "logout"]);
    assert!(h.sent().is_empty());
}

#[tokio::test]
async fn connect_failure_fails_the_cycle() {
    let store = StubStore {
        fail_connect: true,
        ..StubStore::default()
    };
    let h = Harness::new(
        store,
        StubLlm::replying("unused"),
        StubMailer::default(),
        settings(),
    );

    let err = h.poller.poll_once().await.unwrap_err();
    assert!(matches!(err, MailStoreError::Connection { .. }));
    assert!(h.store.calls().is_empty());
}

#[tokio::test]
async fn completion_failure_sends_fallback_text() {
    let store = StubStore::with_messages(&[("1", plain_email("a@gmail.com", "Hello", "Hi"))]);
    let h = Harness::new(store, StubLlm::failing(), StubMailer::default(), settings());

    let report = h.poller.poll_once().await.unwrap();
    assert_eq!(report.replied, 1);

    let sent = h.sent();
    assert_eq!(sent[0].1.subject, "Re: Hello");
    assert_eq!(sent[0].1.body, DEFAULT_FALLBACK_REPLY);
}

#[tokio::test]
async fn completion_failure_without_fallback_sends_nothing() {
    let store = StubStore::with_messages(&[
        ("1", plain_email("a@gmail.com", "Hello", "Hi")),
        ("2", plain_email("b@gmail.com", "Again", "Hi again")),
    ]);
    let mut settings = settings();
    settings.fallback_reply = None;
    let h = Harness::new(store, StubLlm::failing(), StubMailer::default(), settings);

    let report = h.poller.poll_once().await.unwrap();
    assert_eq!(report.failed, 2);
    assert_eq!(h.prompts().len(), 2);
    assert!(h.sent().is_empty());
}

#[tokio::test]
async fn send_failure_is_isolated_per_message() {
    let store = StubStore::with_messages(&[
        ("1", plain_email("a@gmail.com", "One", "first")),
        ("2", plain_email("b@gmail.com", "Two", "second")),
    ]);
    let mailer = StubMailer {
        reject: Some("a@gmail.com".into()),
        ..StubMailer::default()
    };
    let h = Harness::new(store, StubLlm::replying("ok"), mailer, settings());

    let report = h.poller.poll_once().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.replied, 1);
    assert_eq!(h.sent()[0].0, "b@gmail.com");
}

#[tokio::test]
async fn message_without_from_is_skipped() {
    let raw = Some(
        "Subject: Anonymous\r\nContent-Type: text/plain\r\n\r\nWho am I?\r\n".to_string(),
    );
    let store = StubStore::with_messages(&[("1", raw)]);
    let h = Harness::new(
        store,
        StubLlm::replying("unused"),
        StubMailer::default(),
        settings(),
    );

    let report = h.poller.poll_once().await.unwrap();
    assert_eq!(report.skipped, 1);
    assert!(h.sent().is_empty());
}

#[tokio::test]
async fn multipart_reply_uses_plain_text_body() {
    let raw = "From: Bob <bob@gmail.com>\r\n\
        Subject: Question\r\n\
        MIME-Version: 1.0\r\n\
        Content-Type: multipart/alternative; boundary=\"xyz\"\r\n\
        \r\n\
        --xyz\r\n\
        Content-Type: text/html; charset=utf-8\r\n\
        \r\n\
        <p>HTML version</p>\r\n\
        --xyz\r\n\
        Content-Type: text/plain; charset=utf-8\r\n\
        \r\n\
        Plain version\r\n\
        --xyz--\r\n";
    let store = StubStore::with_messages(&[("1", Some(raw.to_string()))]);
    let h = Harness::new(
        store,
        StubLlm::replying("Sure"),
        StubMailer::default(),
        settings(),
    );

    h.poller.poll_once().await.unwrap();
    let prompts = h.prompts();
    assert!(prompts[0].contains("Plain version"));
    assert!(!prompts[0].contains("HTML version"));
}

// ── Main loop ───────────────────────────────────────────────────────

#[tokio::test]
async fn unparseable_message_does_not_stop_cycle() {
    let store = StubStore::with_messages(&[
        ("1", plain_email("alice@gmail.com", "One", "First")),
        ("2", Some(String::new())),
        ("3", plain_email("carol@yahoo.com", "Three", "Third")),
    ]);
    let h = Harness::new(
        store,
        StubLlm::replying("Thanks!"),
        StubMailer::default(),
        settings(),
    );

    let report = h.poller.poll_once().await.unwrap();
    assert_eq!(
        report,
        CycleReport {
            unseen: 3,
            replied: 2,
            skipped: 0,
            failed: 1
        }
    );

    let recipients: Vec<String> = h.sent().into_iter().map(|(to, _)| to).collect();
    assert_eq!(recipients, vec!["alice@gmail.com", "carol@yahoo.com"]);
    assert_eq!(h.store.calls().last().map(String::as_str), Some("logout"));
}

#[tokio::test]
async fn loop_survives_failing_cycles_until_shutdown() {
    let store = StubStore {
        fail_connect: true,
        ..StubStore::default()
    };
    let connects = Arc::clone(&store.connects);
    let poller = Arc::new(Poller::new(
        Box::new(store),
        Arc::new(StubLlm::replying("unused")),
        Arc::new(StubMailer::default()),
        settings(),
    ));

    let (handle, shutdown) = spawn_poller(poller, Duration::from_millis(10));

    timeout(TEST_TIMEOUT, async {
        while connects.load(Ordering::SeqCst) < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("poller stopped after a failed cycle");

    shutdown.store(true, Ordering::Relaxed);
    timeout(TEST_TIMEOUT, handle)
        .await
        .expect("poller did not stop")
        .unwrap();
}

#[tokio::test]
async fn stop_poller_waits_for_loop_to_exit() {
    let store = StubStore::default();
    let connects = Arc::clone(&store.connects);
    let poller = Arc::new(Poller::new(
        Box::new(store),
        Arc::new(StubLlm::replying("unused")),
        Arc::new(StubMailer::default()),
        settings(),
    ));

    let (handle, shutdown) = spawn_poller(poller, Duration::from_millis(10));
    timeout(TEST_TIMEOUT, async {
        while connects.load(Ordering::SeqCst) < 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("poller never ran a cycle");

    assert!(stop_poller(handle, &shutdown, TEST_TIMEOUT).await);
}

#[tokio::test]
async fn stop_poller_aborts_loop_stuck_past_grace() {
    let store = StubStore::default();
    let connects = Arc::clone(&store.connects);
    let poller = Arc::new(Poller::new(
        Box::new(store),
        Arc::new(StubLlm::replying("unused")),
        Arc::new(StubMailer::default()),
        settings(),
    ));

    // First cycle runs immediately, then the loop sleeps for an hour.
    let (handle, shutdown) = spawn_poller(poller, Duration::from_secs(3600));
    timeout(TEST_TIMEOUT, async {
        while connects.load(Ordering::SeqCst) < 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("poller never ran a cycle");

    let stopped = timeout(
        TEST_TIMEOUT,
        stop_poller(handle, &shutdown, Duration::from_millis(50)),
    )
    .await
    .expect("stop_poller hung");
    assert!(!stopped);
}
