//! Scripted in-memory mail store for tests
//!
//! [`ScriptedServer`] holds mailbox fixtures and failure switches; sessions
//! opened through its [`ScriptedConnector`] record every command so tests can
//! assert on the exact protocol sequence and on how often sessions were
//! logged out.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use crate::errors::{AppError, AppResult};
use crate::fetch::FetchSet;
use crate::imap::{
    Connector, MailSession, MailboxEntry, MailboxStatus, RawFetch, partial_move,
    quoted_list_pattern,
};
use crate::submit::{Envelope, MailSubmitter};

#[derive(Debug, Default)]
struct ServerState {
    mailboxes: BTreeMap<String, Vec<RawFetch>>,
    searches: BTreeMap<String, Vec<u32>>,
    list: Vec<MailboxEntry>,
    rejected_moves: BTreeSet<String>,
    partial_moves: BTreeSet<String>,
    rejected_copies: BTreeSet<String>,
    rejected_renames: BTreeSet<String>,
    connect_failure: Option<String>,
    commands: Vec<String>,
    connects: usize,
    logouts: usize,
}

/// Shared handle to a scripted mail store
#[derive(Debug, Clone, Default)]
pub struct ScriptedServer {
    state: Arc<Mutex<ServerState>>,
}

impl ScriptedServer {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().expect("scripted server lock")
    }

    /// Add a mailbox whose messages are given in sequence order
    pub fn with_mailbox(self, name: &str, messages: Vec<RawFetch>) -> Self {
        self.state().mailboxes.insert(name.to_owned(), messages);
        self
    }

    /// Script the UIDs returned for a search criteria string
    pub fn with_search(self, criteria: &str, uids: Vec<u32>) -> Self {
        self.state().searches.insert(criteria.to_owned(), uids);
        self
    }

    /// Script the LIST response
    pub fn with_list(self, entries: &[(&str, Option<&str>)]) -> Self {
        self.state().list = entries
            .iter()
            .map(|(name, delim)| MailboxEntry {
                name: (*name).to_owned(),
                delimiter: delim.map(str::to_owned),
            })
            .collect();
        self
    }

    pub fn rejecting_move_to(self, mailbox: &str) -> Self {
        self.state().rejected_moves.insert(mailbox.to_owned());
        self
    }

    /// Copy into `mailbox` succeeds but removing the source fails
    pub fn partially_moving_to(self, mailbox: &str) -> Self {
        self.state().partial_moves.insert(mailbox.to_owned());
        self
    }

    pub fn rejecting_copy_to(self, mailbox: &str) -> Self {
        self.state().rejected_copies.insert(mailbox.to_owned());
        self
    }

    pub fn rejecting_rename_of(self, mailbox: &str) -> Self {
        self.state().rejected_renames.insert(mailbox.to_owned());
        self
    }

    /// Make every connection attempt fail before login completes
    pub fn failing_connect(self, reason: &str) -> Self {
        self.state().connect_failure = Some(reason.to_owned());
        self
    }

    pub fn connector(&self) -> ScriptedConnector {
        ScriptedConnector {
            server: self.clone(),
        }
    }

    /// Commands issued so far, in order
    pub fn commands(&self) -> Vec<String> {
        self.state().commands.clone()
    }

    pub fn connects(&self) -> usize {
        self.state().connects
    }

    pub fn logouts(&self) -> usize {
        self.state().logouts
    }

    fn record(&self, command: String) {
        self.state().commands.push(command);
    }
}

/// Header fetch item with all attributes present
pub fn raw_message(sequence: u32, uid: u32, subject: &str, epoch: i64) -> RawFetch {
    RawFetch {
        sequence,
        uid: Some(uid),
        header: Some(
            format!("From: sender{uid}@example.com\r\nSubject: {subject}\r\n").into_bytes(),
        ),
        internal_date: Utc.timestamp_opt(epoch, 0).single(),
    }
}

/// A mailbox of `count` messages with UIDs `100 + seq` and ascending dates
pub fn numbered_messages(count: u32) -> Vec<RawFetch> {
    (1..=count)
        .map(|seq| {
            raw_message(
                seq,
                100 + seq,
                &format!("message {seq}"),
                1_700_000_000 + i64::from(seq) * 60,
            )
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct ScriptedConnector {
    server: ScriptedServer,
}

#[async_trait]
impl Connector for ScriptedConnector {
    type Session = ScriptedSession;

    async fn connect(&self) -> AppResult<ScriptedSession> {
        let failure = {
            let mut state = self.server.state();
            state.connects += 1;
            state.connect_failure.clone()
        };
        if let Some(reason) = failure {
            return Err(AppError::AuthFailed(reason));
        }
        Ok(ScriptedSession {
            server: self.server.clone(),
            selected: None,
        })
    }
}

#[derive(Debug)]
pub struct ScriptedSession {
    server: ScriptedServer,
    selected: Option<String>,
}

impl ScriptedSession {
    fn open(&mut self, verb: &str, mailbox: &str) -> AppResult<MailboxStatus> {
        self.server.record(format!("{verb} {mailbox}"));
        let exists = self
            .server
            .state()
            .mailboxes
            .get(mailbox)
            .map(|m| m.len() as u32);
        match exists {
            Some(exists) => {
                self.selected = Some(mailbox.to_owned());
                Ok(MailboxStatus { exists })
            }
            None => Err(AppError::NotFound(format!(
                "cannot {} mailbox '{mailbox}': no such mailbox",
                verb.to_ascii_lowercase()
            ))),
        }
    }

    fn selected_messages(&self) -> Vec<RawFetch> {
        let state = self.server.state();
        self.selected
            .as_ref()
            .and_then(|name| state.mailboxes.get(name))
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl MailSession for ScriptedSession {
    async fn examine(&mut self, mailbox: &str) -> AppResult<MailboxStatus> {
        self.open("EXAMINE", mailbox)
    }

    async fn select(&mut self, mailbox: &str) -> AppResult<MailboxStatus> {
        self.open("SELECT", mailbox)
    }

    async fn uid_search(&mut self, criteria: &str) -> AppResult<Vec<u32>> {
        self.server.record(format!("UID SEARCH {criteria}"));
        let scripted = self.server.state().searches.get(criteria).cloned();
        Ok(match scripted {
            Some(uids) => uids,
            None if criteria == "ALL" => self
                .selected_messages()
                .iter()
                .filter_map(|m| m.uid)
                .collect(),
            None => Vec::new(),
        })
    }

    async fn fetch_headers(&mut self, set: &FetchSet) -> AppResult<Vec<RawFetch>> {
        let messages = self.selected_messages();
        let items = match set {
            FetchSet::Range { start, end } => {
                self.server.record(format!("FETCH {set}"));
                messages
                    .into_iter()
                    .filter(|m| (*start..=*end).contains(&m.sequence))
                    .collect()
            }
            FetchSet::Uids(uids) => {
                self.server.record(format!("UID FETCH {set}"));
                messages
                    .into_iter()
                    .filter(|m| m.uid.is_some_and(|uid| uids.contains(&uid)))
                    .collect()
            }
        };
        Ok(items)
    }

    async fn uid_store(&mut self, uids: &[u32], query: &str) -> AppResult<()> {
        self.server
            .record(format!("UID STORE {} {query}", FetchSet::Uids(uids.to_vec())));
        Ok(())
    }

    async fn uid_copy(&mut self, uids: &[u32], mailbox: &str) -> AppResult<()> {
        self.server
            .record(format!("UID COPY {} {mailbox}", FetchSet::Uids(uids.to_vec())));
        if self.server.state().rejected_copies.contains(mailbox) {
            return Err(AppError::Command(format!(
                "UID COPY to '{mailbox}' failed: [TRYCREATE] no such mailbox"
            )));
        }
        Ok(())
    }

    async fn uid_move(&mut self, uids: &[u32], mailbox: &str) -> AppResult<()> {
        self.server
            .record(format!("UID MOVE {} {mailbox}", FetchSet::Uids(uids.to_vec())));
        if self.server.state().rejected_moves.contains(mailbox) {
            return Err(AppError::Command(format!(
                "UID MOVE to '{mailbox}' failed: [TRYCREATE] no such mailbox"
            )));
        }
        if self.server.state().partial_moves.contains(mailbox) {
            return Err(partial_move(
                mailbox,
                AppError::Command("UID EXPUNGE failed: NO expunge refused".to_owned()),
            ));
        }
        Ok(())
    }

    async fn unselect(&mut self) -> AppResult<()> {
        self.server.record("UNSELECT".to_owned());
        self.selected = None;
        Ok(())
    }

    async fn list_mailboxes(&mut self, pattern: &str) -> AppResult<Vec<MailboxEntry>> {
        self.server
            .record(format!("LIST \"\" {}", quoted_list_pattern(pattern)?));
        let list = self.server.state().list.clone();
        Ok(list
            .into_iter()
            .filter(|entry| pattern == "*" || entry.name == pattern)
            .collect())
    }

    async fn create_mailbox(&mut self, mailbox: &str) -> AppResult<()> {
        self.server.record(format!("CREATE {mailbox}"));
        Ok(())
    }

    async fn delete_mailbox(&mut self, mailbox: &str) -> AppResult<()> {
        self.server.record(format!("DELETE {mailbox}"));
        Ok(())
    }

    async fn rename_mailbox(&mut self, from: &str, to: &str) -> AppResult<()> {
        self.server.record(format!("RENAME {from} {to}"));
        if self.server.state().rejected_renames.contains(from) {
            return Err(AppError::Command(format!(
                "RENAME '{from}' to '{to}' failed: no such mailbox"
            )));
        }
        Ok(())
    }

    async fn logout(&mut self) -> AppResult<()> {
        let mut state = self.server.state();
        state.logouts += 1;
        state.commands.push("LOGOUT".to_owned());
        Ok(())
    }
}

/// Submitter that records envelopes instead of delivering them
#[derive(Debug, Clone, Default)]
pub struct RecordingSubmitter {
    sent: Arc<Mutex<Vec<Envelope>>>,
    failure: Option<String>,
}

impl RecordingSubmitter {
    pub fn failing(reason: &str) -> Self {
        Self {
            sent: Arc::default(),
            failure: Some(reason.to_owned()),
        }
    }

    pub fn sent(&self) -> Vec<Envelope> {
        self.sent.lock().expect("recording submitter lock").clone()
    }
}

#[async_trait]
impl MailSubmitter for RecordingSubmitter {
    async fn submit(&self, envelope: &Envelope) -> AppResult<String> {
        if let Some(reason) = &self.failure {
            return Err(AppError::Submission(reason.clone()));
        }
        let mut sent = self.sent.lock().expect("recording submitter lock");
        sent.push(envelope.clone());
        Ok(format!("<test-{}@example.com>", sent.len()))
    }
}
