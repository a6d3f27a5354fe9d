//! IMAP transport and session operations
//!
//! [`MailSession`] is the command surface the mailbox engine drives, and
//! [`Connector`] opens authenticated sessions. The production implementations
//! wrap `async-imap` over TLS with every network step bounded by a timeout
//! derived from server config. Mailbox names are modified UTF-7 on the wire
//! and plain UTF-8 everywhere else.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_imap::error::Error as ImapError;
use async_imap::types::{Capabilities, Fetch, Name};
use async_imap::{Client, Session};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{Stream, TryStreamExt};
use rustls::ClientConfig;
use rustls::RootCertStore;
use rustls_pki_types::ServerName;
use secrecy::ExposeSecret;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::debug;
use utf7_imap::{decode_utf7_imap, encode_utf7_imap};

use crate::config::ServerConfig;
use crate::errors::{AppError, AppResult};
use crate::fetch::FetchSet;
use crate::query::escape_imap_quoted;

/// Header fields requested by every bulk fetch; bodies are never fetched
pub const HEADER_FETCH_QUERY: &str =
    "(UID INTERNALDATE BODY.PEEK[HEADER.FIELDS (FROM TO SUBJECT DATE)])";

/// Mailbox state reported by SELECT/EXAMINE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MailboxStatus {
    /// Number of messages in the mailbox
    pub exists: u32,
}

/// One entry of a LIST response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxEntry {
    /// Full mailbox path, decoded to UTF-8
    pub name: String,
    /// Hierarchy delimiter if the server reports one
    pub delimiter: Option<String>,
}

/// One item of a bulk header fetch, as delivered by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFetch {
    /// Sequence number of the message in the selected mailbox
    pub sequence: u32,
    /// UID attribute, if the server sent it
    pub uid: Option<u32>,
    /// Raw header section bytes, if the server sent them
    pub header: Option<Vec<u8>>,
    /// INTERNALDATE attribute, if the server sent it
    pub internal_date: Option<DateTime<Utc>>,
}

/// Commands available on an authenticated session
///
/// Commands are issued one at a time through `&mut self`; a session is
/// never shared between operations.
#[async_trait]
pub trait MailSession: Send {
    /// Open a mailbox read-only (`EXAMINE`)
    async fn examine(&mut self, mailbox: &str) -> AppResult<MailboxStatus>;
    /// Open a mailbox read-write (`SELECT`)
    async fn select(&mut self, mailbox: &str) -> AppResult<MailboxStatus>;
    /// `UID SEARCH`, returning UIDs in ascending order
    async fn uid_search(&mut self, criteria: &str) -> AppResult<Vec<u32>>;
    /// Bulk fetch of [`HEADER_FETCH_QUERY`] for a sequence range or UID list
    async fn fetch_headers(&mut self, set: &FetchSet) -> AppResult<Vec<RawFetch>>;
    /// `UID STORE` with a flag query such as `+FLAGS.SILENT (\Seen)`
    async fn uid_store(&mut self, uids: &[u32], query: &str) -> AppResult<()>;
    /// `UID COPY` into another mailbox
    async fn uid_copy(&mut self, uids: &[u32], mailbox: &str) -> AppResult<()>;
    /// Move messages into another mailbox
    async fn uid_move(&mut self, uids: &[u32], mailbox: &str) -> AppResult<()>;
    /// Leave the selected mailbox without expunging
    async fn unselect(&mut self) -> AppResult<()>;
    /// `LIST "" "<pattern>"`; the pattern may contain `*` and `%`
    async fn list_mailboxes(&mut self, pattern: &str) -> AppResult<Vec<MailboxEntry>>;
    async fn create_mailbox(&mut self, mailbox: &str) -> AppResult<()>;
    async fn delete_mailbox(&mut self, mailbox: &str) -> AppResult<()>;
    async fn rename_mailbox(&mut self, from: &str, to: &str) -> AppResult<()>;
    /// `LOGOUT`; the session must not be used afterwards
    async fn logout(&mut self) -> AppResult<()>;
}

/// Opens authenticated sessions
#[async_trait]
pub trait Connector: Send + Sync {
    type Session: MailSession;

    /// Connect and authenticate; fails before any mailbox command is issued
    async fn connect(&self) -> AppResult<Self::Session>;
}

/// Type alias for the authenticated `async-imap` session over TLS
pub type TlsSession = Session<tokio_rustls::client::TlsStream<TcpStream>>;

/// Connector for the configured IMAP account
#[derive(Debug, Clone)]
pub struct ImapConnector {
    config: Arc<ServerConfig>,
}

impl ImapConnector {
    pub fn new(config: Arc<ServerConfig>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for ImapConnector {
    type Session = ImapSession;

    async fn connect(&self) -> AppResult<ImapSession> {
        let session = connect_authenticated(&self.config).await?;
        Ok(ImapSession {
            session,
            socket_timeout: Duration::from_millis(self.config.socket_timeout_ms),
            selected: None,
            capabilities: None,
        })
    }
}

/// Connect to IMAP server and authenticate
///
/// Performs full connection sequence with timeouts:
/// 1. TCP connect
/// 2. TLS handshake with webpki root certificates
/// 3. Read IMAP greeting
/// 4. LOGIN authentication
///
/// # Errors
///
/// - `InvalidInput` if `secure` is false or hostname is invalid for TLS SNI
/// - `Timeout` if any connection phase times out
/// - `AuthFailed` if authentication fails
/// - `Connection` for TCP, TLS, or greeting failures
pub async fn connect_authenticated(server: &ServerConfig) -> AppResult<TlsSession> {
    let account = &server.imap;
    if !account.secure {
        return Err(AppError::InvalidInput(
            "insecure IMAP is not supported; set MAIL_IMAP_SECURE=true".to_owned(),
        ));
    }

    let connect_duration = Duration::from_millis(server.connect_timeout_ms);
    let greeting_duration = Duration::from_millis(server.greeting_timeout_ms);

    debug!(host = %account.host, port = account.port, "connecting to IMAP server");
    let tcp = timeout(
        connect_duration,
        TcpStream::connect((account.host.as_str(), account.port)),
    )
    .await
    .map_err(|_| AppError::Timeout("tcp connect timeout".to_owned()))
    .and_then(|r| r.map_err(|e| AppError::Connection(format!("tcp connect failed: {e}"))))?;

    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(tls_config));

    let server_name = ServerName::try_from(account.host.clone())
        .map_err(|_| AppError::InvalidInput("invalid IMAP host for TLS SNI".to_owned()))?;
    let tls_stream = timeout(greeting_duration, connector.connect(server_name, tcp))
        .await
        .map_err(|_| AppError::Timeout("TLS handshake timeout".to_owned()))
        .and_then(|r| r.map_err(|e| AppError::Connection(format!("TLS handshake failed: {e}"))))?;

    let mut client = Client::new(tls_stream);
    let greeting = timeout(greeting_duration, client.read_response())
        .await
        .map_err(|_| AppError::Timeout("IMAP greeting timeout".to_owned()))
        .and_then(|r| r.map_err(|e| AppError::Connection(format!("IMAP greeting failed: {e}"))))?;

    if greeting.is_none() {
        return Err(AppError::Connection(
            "IMAP server closed connection before greeting".to_owned(),
        ));
    }

    let pass = account.pass.expose_secret();
    let session = timeout(greeting_duration, client.login(account.user.as_str(), pass))
        .await
        .map_err(|_| AppError::Timeout("IMAP login timeout".to_owned()))
        .and_then(|r| {
            r.map_err(|(e, _)| {
                let msg = e.to_string();
                if msg.to_ascii_lowercase().contains("auth") || msg.contains("LOGIN") {
                    AppError::AuthFailed(msg)
                } else {
                    AppError::Connection(msg)
                }
            })
        })?;

    Ok(session)
}

/// Authenticated `async-imap` session
pub struct ImapSession {
    session: TlsSession,
    socket_timeout: Duration,
    /// Mailbox currently selected, needed for the EXAMINE-based unselect
    selected: Option<String>,
    /// Capabilities, queried lazily once per session
    capabilities: Option<Capabilities>,
}

impl ImapSession {
    async fn has_capability(&mut self, name: &str) -> AppResult<bool> {
        if self.capabilities.is_none() {
            let caps = timeout(self.socket_timeout, self.session.capabilities())
                .await
                .map_err(|_| AppError::Timeout("CAPABILITY timed out".to_owned()))
                .and_then(|r| r.map_err(capability_failed))?;
            self.capabilities = Some(caps);
        }
        Ok(self
            .capabilities
            .as_ref()
            .is_some_and(|caps| caps.has_str(name)))
    }
}

#[async_trait]
impl MailSession for ImapSession {
    async fn examine(&mut self, mailbox: &str) -> AppResult<MailboxStatus> {
        debug!(mailbox, "EXAMINE");
        let wire = encode_utf7_imap(mailbox.to_owned());
        let selected = timeout(self.socket_timeout, self.session.examine(wire))
            .await
            .map_err(|_| AppError::Timeout(format!("EXAMINE timed out for mailbox '{mailbox}'")))
            .and_then(|r| {
                r.map_err(|e| {
                    AppError::NotFound(format!("cannot examine mailbox '{mailbox}': {e}"))
                })
            })?;
        self.selected = Some(mailbox.to_owned());
        Ok(MailboxStatus {
            exists: selected.exists,
        })
    }

    async fn select(&mut self, mailbox: &str) -> AppResult<MailboxStatus> {
        debug!(mailbox, "SELECT");
        let wire = encode_utf7_imap(mailbox.to_owned());
        let selected = timeout(self.socket_timeout, self.session.select(wire))
            .await
            .map_err(|_| AppError::Timeout(format!("SELECT timed out for mailbox '{mailbox}'")))
            .and_then(|r| {
                r.map_err(|e| {
                    AppError::NotFound(format!("cannot select mailbox '{mailbox}': {e}"))
                })
            })?;
        self.selected = Some(mailbox.to_owned());
        Ok(MailboxStatus {
            exists: selected.exists,
        })
    }

    async fn uid_search(&mut self, criteria: &str) -> AppResult<Vec<u32>> {
        debug!(criteria, "UID SEARCH");
        let set = timeout(self.socket_timeout, self.session.uid_search(criteria))
            .await
            .map_err(|_| AppError::Timeout("UID SEARCH timed out".to_owned()))
            .and_then(|r| r.map_err(|e| AppError::Command(format!("uid search failed: {e}"))))?;
        let mut uids: Vec<u32> = set.into_iter().collect();
        uids.sort_unstable();
        Ok(uids)
    }

    async fn fetch_headers(&mut self, set: &FetchSet) -> AppResult<Vec<RawFetch>> {
        debug!(set = %set, "fetching headers");
        let limit = self.socket_timeout;
        let fetches: Vec<Fetch> = match set {
            FetchSet::Range { .. } => {
                let start = self.session.fetch(set.to_string(), HEADER_FETCH_QUERY);
                collect_bounded(limit, "FETCH", start).await?
            }
            FetchSet::Uids(_) => {
                let start = self.session.uid_fetch(set.to_string(), HEADER_FETCH_QUERY);
                collect_bounded(limit, "UID FETCH", start).await?
            }
        };
        Ok(fetches
            .iter()
            .map(|fetch| RawFetch {
                sequence: fetch.message,
                uid: fetch.uid,
                header: fetch.header().or_else(|| fetch.body()).map(<[u8]>::to_vec),
                internal_date: fetch.internal_date().map(|d| d.with_timezone(&Utc)),
            })
            .collect())
    }

    async fn uid_store(&mut self, uids: &[u32], query: &str) -> AppResult<()> {
        debug!(uids = %uid_set(uids), query, "UID STORE");
        let start = self.session.uid_store(uid_set(uids), query);
        let _: Vec<Fetch> = collect_bounded(self.socket_timeout, "UID STORE", start).await?;
        Ok(())
    }

    async fn uid_copy(&mut self, uids: &[u32], mailbox: &str) -> AppResult<()> {
        debug!(uids = %uid_set(uids), mailbox, "UID COPY");
        let fut = self
            .session
            .uid_copy(uid_set(uids), encode_utf7_imap(mailbox.to_owned()));
        bounded(self.socket_timeout, &format!("UID COPY to '{mailbox}'"), fut).await
    }

    /// Uses `UID MOVE` (RFC 6851) when advertised, otherwise
    /// `UID COPY` + `\Deleted` + `UID EXPUNGE`.
    async fn uid_move(&mut self, uids: &[u32], mailbox: &str) -> AppResult<()> {
        if self.has_capability("MOVE").await? {
            debug!(uids = %uid_set(uids), mailbox, "UID MOVE");
            let fut = self
                .session
                .uid_mv(uid_set(uids), encode_utf7_imap(mailbox.to_owned()));
            return bounded(self.socket_timeout, &format!("UID MOVE to '{mailbox}'"), fut).await;
        }

        self.uid_copy(uids, mailbox).await?;
        self.uid_store(uids, "+FLAGS.SILENT (\\Deleted)")
            .await
            .map_err(|e| partial_move(mailbox, e))?;
        let start = self.session.uid_expunge(uid_set(uids));
        let _: Vec<u32> = collect_bounded(self.socket_timeout, "UID EXPUNGE", start)
            .await
            .map_err(|e| partial_move(mailbox, e))?;
        Ok(())
    }

    async fn unselect(&mut self) -> AppResult<()> {
        if self.has_capability("UNSELECT").await? {
            let fut = self.session.run_command_and_check_ok("UNSELECT");
            bounded(self.socket_timeout, "UNSELECT", fut).await?;
        } else if let Some(mailbox) = self.selected.clone() {
            // EXAMINE deselects without the implicit expunge of CLOSE
            self.examine(&mailbox).await?;
        }
        self.selected = None;
        Ok(())
    }

    async fn list_mailboxes(&mut self, pattern: &str) -> AppResult<Vec<MailboxEntry>> {
        let wire = quoted_list_pattern(pattern)?;
        let start = self.session.list(None, Some(wire.as_str()));
        let names: Vec<Name> = collect_bounded(self.socket_timeout, "LIST", start).await?;
        Ok(names
            .iter()
            .map(|name| MailboxEntry {
                name: decode_utf7_imap(name.name().to_owned()),
                delimiter: name.delimiter().map(str::to_owned),
            })
            .collect())
    }

    async fn create_mailbox(&mut self, mailbox: &str) -> AppResult<()> {
        debug!(mailbox, "CREATE");
        let fut = self.session.create(encode_utf7_imap(mailbox.to_owned()));
        bounded(self.socket_timeout, &format!("CREATE '{mailbox}'"), fut).await
    }

    async fn delete_mailbox(&mut self, mailbox: &str) -> AppResult<()> {
        debug!(mailbox, "DELETE");
        let fut = self.session.delete(encode_utf7_imap(mailbox.to_owned()));
        bounded(self.socket_timeout, &format!("DELETE '{mailbox}'"), fut).await
    }

    async fn rename_mailbox(&mut self, from: &str, to: &str) -> AppResult<()> {
        debug!(from, to, "RENAME");
        let fut = self.session.rename(
            encode_utf7_imap(from.to_owned()),
            encode_utf7_imap(to.to_owned()),
        );
        bounded(self.socket_timeout, &format!("RENAME '{from}' to '{to}'"), fut).await
    }

    async fn logout(&mut self) -> AppResult<()> {
        let limit = self.socket_timeout;
        timeout(limit, self.session.logout())
            .await
            .map_err(|_| AppError::Timeout("LOGOUT timed out".to_owned()))
            .and_then(|r| r.map_err(|e| AppError::Connection(format!("LOGOUT failed: {e}"))))
    }
}

/// Run one command under the socket timeout
///
/// A server rejection maps to `Command`.
async fn bounded<T, F>(limit: Duration, what: &str, fut: F) -> AppResult<T>
where
    F: Future<Output = Result<T, ImapError>>,
{
    timeout(limit, fut)
        .await
        .map_err(|_| AppError::Timeout(format!("{what} timed out")))
        .and_then(|r| r.map_err(|e| AppError::Command(format!("{what} failed: {e}"))))
}

/// Start a streaming command and drain its responses, each phase bounded
async fn collect_bounded<T, S, F>(limit: Duration, what: &str, start: F) -> AppResult<Vec<T>>
where
    F: Future<Output = Result<S, ImapError>>,
    S: Stream<Item = Result<T, ImapError>>,
{
    let stream = bounded(limit, what, start).await?;
    timeout(limit, stream.try_collect::<Vec<T>>())
        .await
        .map_err(|_| AppError::Timeout(format!("{what} stream timed out")))
        .and_then(|r| r.map_err(|e| AppError::Command(format!("{what} stream failed: {e}"))))
}

/// A CAPABILITY failure means the session is unusable, not that a mailbox
/// was rejected
fn capability_failed(err: ImapError) -> AppError {
    AppError::Connection(format!("CAPABILITY failed: {err}"))
}

/// Failure after the COPY step of a COPY-based move
///
/// The messages already exist in `mailbox`, so the error must not send the
/// caller on to another folder name.
pub fn partial_move(mailbox: &str, err: AppError) -> AppError {
    AppError::Internal(format!(
        "messages copied to '{mailbox}' but not removed from the source: {err}"
    ))
}

/// Encode a LIST pattern as an IMAP quoted string
///
/// `async-imap` sends the pattern verbatim, so names with spaces or quotes
/// must be quoted here.
///
/// # Errors
///
/// Returns `InvalidInput` if the pattern contains control characters.
pub fn quoted_list_pattern(pattern: &str) -> AppResult<String> {
    let escaped = escape_imap_quoted(pattern)?;
    Ok(format!("\"{}\"", encode_utf7_imap(escaped)))
}

/// Render UIDs as an IMAP sequence set (`1,5,9`)
pub fn uid_set(uids: &[u32]) -> String {
    uids.iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",")
}
