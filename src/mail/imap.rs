//! IMAP mail store over implicit TLS (rustls + webpki roots).
//!
//! Speaks the handful of IMAP4rev1 commands the poller needs: LOGIN,
//! SELECT, SEARCH UNSEEN, FETCH RFC822 and LOGOUT. The socket is blocking,
//! so every command runs inside `spawn_blocking`.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustls_pki_types::ServerName;
use tracing::debug;

use crate::error::MailStoreError;
use crate::mail::types::MessageId;
use crate::mail::{MailSession, MailStore};

/// A hung server stalls the cycle for at most this long per read.
const READ_TIMEOUT: Duration = Duration::from_secs(30);

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// IMAPS endpoint. Each `connect` opens a new TLS connection.
#[derive(Debug, Clone)]
pub struct ImapStore {
    host: String,
    port: u16,
}

impl ImapStore {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

#[async_trait]
impl MailStore for ImapStore {
    async fn connect(&self) -> Result<Box<dyn MailSession>, MailStoreError> {
        let host = self.host.clone();
        let port = self.port;
        let conn = tokio::task::spawn_blocking(move || open_tls(&host, port))
            .await
            .map_err(|e| MailStoreError::Protocol(format!("IMAP connect task panicked: {e}")))??;

        debug!(host = %self.host, port = self.port, "IMAP connected");
        Ok(Box::new(ImapSession::new(conn)))
    }
}

fn open_tls(host: &str, port: u16) -> Result<ImapConnection<TlsStream>, MailStoreError> {
    let connection_error = |reason: String| MailStoreError::Connection {
        host: host.to_string(),
        reason,
    };

    let tcp = TcpStream::connect((host, port)).map_err(|e| connection_error(e.to_string()))?;
    tcp.set_read_timeout(Some(READ_TIMEOUT))?;

    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    );
    let server_name =
        ServerName::try_from(host.to_string()).map_err(|e| connection_error(e.to_string()))?;
    let conn = rustls::ClientConnection::new(tls_config, server_name)
        .map_err(|e| connection_error(e.to_string()))?;

    let mut imap = ImapConnection::new(rustls::StreamOwned::new(conn, tcp));
    imap.read_greeting()
        .map_err(|e| connection_error(e.to_string()))?;
    Ok(imap)
}

// ── Session ─────────────────────────────────────────────────────────

/// A logged-in (or about to be) IMAP session.
///
/// The connection is moved into the blocking pool for each command and
/// handed back afterwards; after `logout` the session is closed.
pub struct ImapSession<S> {
    conn: Option<ImapConnection<S>>,
}

impl<S> ImapSession<S>
where
    S: Read + Write + Send + 'static,
{
    fn new(conn: ImapConnection<S>) -> Self {
        Self { conn: Some(conn) }
    }

    async fn run<T, F>(&mut self, op: F) -> Result<T, MailStoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut ImapConnection<S>) -> Result<T, MailStoreError> + Send + 'static,
    {
        let mut conn = self
            .conn
            .take()
            .ok_or_else(|| MailStoreError::Protocol("IMAP session already closed".into()))?;

        let (conn, result) = tokio::task::spawn_blocking(move || {
            let result = op(&mut conn);
            (conn, result)
        })
        .await
        .map_err(|e| MailStoreError::Protocol(format!("IMAP task panicked: {e}")))?;

        self.conn = Some(conn);
        result
    }
}

#[async_trait]
impl<S> MailSession for ImapSession<S>
where
    S: Read + Write + Send + 'static,
{
    async fn login(&mut self, username: &str, password: &str) -> Result<(), MailStoreError> {
        let username = username.to_string();
        let password = password.to_string();
        self.run(move |conn| conn.login(&username, &password)).await
    }

    async fn select_mailbox(&mut self, mailbox: &str) -> Result<(), MailStoreError> {
        let mailbox = mailbox.to_string();
        self.run(move |conn| conn.select(&mailbox)).await
    }

    async fn search_unseen(&mut self) -> Result<Vec<MessageId>, MailStoreError> {
        self.run(|conn| conn.search_unseen()).await
    }

    async fn fetch(&mut self, id: &MessageId) -> Result<Vec<u8>, MailStoreError> {
        let id = id.clone();
        self.run(move |conn| conn.fetch_rfc822(&id)).await
    }

    async fn logout(&mut self) -> Result<(), MailStoreError> {
        let result = self.run(|conn| conn.logout()).await;
        self.conn = None;
        result
    }
}

// ── Protocol ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Ok,
    No,
    Bad,
}

/// Everything the server sent for one tagged command.
#[derive(Debug)]
struct Response {
    status: Status,
    /// Text after the status word of the tagged line.
    text: String,
    /// Untagged lines, literal payloads removed.
    untagged: Vec<String>,
    /// Literal payloads (`{n}\r\n` + n bytes) in the order they arrived.
    literals: Vec<Vec<u8>>,
}

pub(crate) struct ImapConnection<S> {
    stream: BufReader<S>,
    next_tag: u32,
}

impl<S: Read + Write> ImapConnection<S> {
    fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
            next_tag: 1,
        }
    }

    fn read_line(&mut self) -> Result<Vec<u8>, MailStoreError> {
        let mut buf = Vec::new();
        if self.stream.read_until(b'\n', &mut buf)? == 0 {
            return Err(MailStoreError::Protocol("IMAP connection closed".into()));
        }
        Ok(buf)
    }

    fn read_greeting(&mut self) -> Result<(), MailStoreError> {
        let line = self.read_line()?;
        let greeting = String::from_utf8_lossy(&line);
        if greeting.starts_with("* OK") || greeting.starts_with("* PREAUTH") {
            Ok(())
        } else {
            Err(MailStoreError::Protocol(format!(
                "unexpected greeting: {}",
                greeting.trim_end()
            )))
        }
    }

    fn command(&mut self, command: &str) -> Result<Response, MailStoreError> {
        let tag = format!("A{:03}", self.next_tag);
        self.next_tag += 1;

        let verb = command.split(' ').next().unwrap_or(command);
        debug!(tag = %tag, "IMAP {verb}");

        let stream = self.stream.get_mut();
        stream.write_all(format!("{tag} {command}\r\n").as_bytes())?;
        stream.flush()?;

        let mut untagged = Vec::new();
        let mut literals = Vec::new();

        loop {
            let mut line = self.read_line()?;
            while let Some(len) = literal_len(&line) {
                let mut literal = vec![0u8; len];
                self.stream.read_exact(&mut literal)?;
                literals.push(literal);
                let rest = self.read_line()?;
                line.extend_from_slice(&rest);
            }

            let line = String::from_utf8_lossy(&line).trim_end().to_string();
            if let Some(rest) = line
                .strip_prefix(tag.as_str())
                .and_then(|r| r.strip_prefix(' '))
            {
                let (status, text) = parse_status(rest)?;
                return Ok(Response {
                    status,
                    text,
                    untagged,
                    literals,
                });
            }
            untagged.push(line);
        }
    }

    fn login(&mut self, username: &str, password: &str) -> Result<(), MailStoreError> {
        let resp = self.command(&format!("LOGIN {} {}", quote(username), quote(password)))?;
        match resp.status {
            Status::Ok => Ok(()),
            Status::No | Status::Bad => Err(MailStoreError::Auth {
                user: username.to_string(),
                reason: resp.text,
            }),
        }
    }

    fn select(&mut self, mailbox: &str) -> Result<(), MailStoreError> {
        let resp = self.command(&format!("SELECT {}", quote(mailbox)))?;
        match resp.status {
            Status::Ok => Ok(()),
            Status::No | Status::Bad => Err(MailStoreError::Select {
                mailbox: mailbox.to_string(),
                reason: resp.text,
            }),
        }
    }

    fn search_unseen(&mut self) -> Result<Vec<MessageId>, MailStoreError> {
        let resp = self.command("SEARCH UNSEEN")?;
        if resp.status != Status::Ok {
            return Err(MailStoreError::Search(resp.text));
        }

        Ok(resp
            .untagged
            .iter()
            .filter_map(|line| line.strip_prefix("* SEARCH"))
            .flat_map(|ids| ids.split_whitespace())
            .map(MessageId::new)
            .collect())
    }

    fn fetch_rfc822(&mut self, id: &MessageId) -> Result<Vec<u8>, MailStoreError> {
        let resp = self.command(&format!("FETCH {id} RFC822"))?;
        if resp.status != Status::Ok {
            return Err(MailStoreError::Fetch {
                id: id.to_string(),
                reason: resp.text,
            });
        }

        resp.literals
            .into_iter()
            .next()
            .ok_or_else(|| MailStoreError::Fetch {
                id: id.to_string(),
                reason: "no message data in response".into(),
            })
    }

    fn logout(&mut self) -> Result<(), MailStoreError> {
        let resp = self.command("LOGOUT")?;
        match resp.status {
            Status::Ok => Ok(()),
            Status::No | Status::Bad => Err(MailStoreError::Protocol(format!(
                "LOGOUT rejected: {}",
                resp.text
            ))),
        }
    }
}

/// Length of a literal announced at the end of a line (`... {123}\r\n`).
fn literal_len(line: &[u8]) -> Option<usize> {
    let line = line
        .strip_suffix(b"\r\n")
        .or_else(|| line.strip_suffix(b"\n"))?;
    let inner = line.strip_suffix(b"}")?;
    let open = inner.iter().rposition(|&b| b == b'{')?;
    std::str::from_utf8(&inner[open + 1..]).ok()?.parse().ok()
}

fn parse_status(rest: &str) -> Result<(Status, String), MailStoreError> {
    let (word, text) = rest.split_once(' ').unwrap_or((rest, ""));
    let status = match word.to_ascii_uppercase().as_str() {
        "OK" => Status::Ok,
        "NO" => Status::No,
        "BAD" => Status::Bad,
        other => {
            return Err(MailStoreError::Protocol(format!(
                "unknown response status {other:?}"
            )));
        }
    };
    Ok((status, text.to_string()))
}

/// IMAP quoted string.
fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}
