//! Mailbox operations engine
//!
//! Each public operation validates its arguments, then runs one procedure on
//! a private session through the [`ConnectionManager`]. Procedures are plain
//! async functions over [`MailSession`] so the exact command sequence can be
//! exercised against the scripted session in tests.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::connection::ConnectionManager;
use crate::errors::{AppError, AppResult};
use crate::fetch::{FetchSet, fetch_messages};
use crate::folders::{
    DEFAULT_DELIMITER, FolderPolicy, LogicalFolder, build_tree, flatten, moved_label_path,
};
use crate::imap::{Connector, MailSession};
use crate::models::{
    LabelList, LabelOutcome, MessageBatch, Recipients, SearchResult, SendOutcome, UpdateOutcome,
};
use crate::query;
use crate::submit::{Envelope, MailSubmitter};

/// Maximum messages fetched for one search
pub const MAX_SEARCH_RESULTS: usize = 50;

const SEEN_FLAG_QUERY: &str = "+FLAGS.SILENT (\\Seen)";

/// Outgoing message as requested by a caller
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub to: Recipients,
    pub subject: String,
    pub body: String,
    pub html_body: Option<String>,
    pub cc: Option<Recipients>,
    pub bcc: Option<Recipients>,
}

/// Mailbox operations over per-call sessions
pub struct MailboxEngine<C> {
    connections: ConnectionManager<C>,
    folders: Arc<FolderPolicy>,
    submitter: Arc<dyn MailSubmitter>,
    /// Identity placed in `From` for submitted mail
    from: String,
}

impl<C: Connector> MailboxEngine<C> {
    pub fn new(
        connector: C,
        folders: FolderPolicy,
        submitter: Arc<dyn MailSubmitter>,
        from: String,
    ) -> Self {
        Self {
            connections: ConnectionManager::new(connector),
            folders: Arc::new(folders),
            submitter,
            from,
        }
    }

    /// Most recent `count` inbox messages, newest first
    pub async fn list_messages(&self, count: usize) -> AppResult<MessageBatch> {
        if count == 0 {
            return Ok(MessageBatch::default());
        }
        let inbox = self.folders.inbox().to_owned();
        let count = u32::try_from(count).unwrap_or(u32::MAX);
        self.connections
            .run("list_messages", move |session| {
                Box::pin(list_recent(session, inbox, count))
            })
            .await
    }

    /// Up to `count` unread inbox messages, taken from the end of the
    /// ascending `UNSEEN` search
    pub async fn list_unread_messages(&self, count: usize) -> AppResult<MessageBatch> {
        if count == 0 {
            return Ok(MessageBatch::default());
        }
        let inbox = self.folders.inbox().to_owned();
        self.connections
            .run("list_unread_messages", move |session| {
                Box::pin(list_unread(session, inbox, count))
            })
            .await
    }

    /// Gmail-style search; at most [`MAX_SEARCH_RESULTS`] messages are fetched
    pub async fn search_messages(&self, query: &str) -> AppResult<SearchResult> {
        let translated = query::translate(query, &self.folders)?;
        let criteria = translated.search_criteria()?;
        let candidates = self.folders.candidates(translated.folder).to_vec();
        debug!(
            folder = translated.folder.as_str(),
            mailbox = %translated.mailbox,
            %criteria,
            "translated search query"
        );

        let query = query.to_owned();
        self.connections
            .run("search_messages", move |session| {
                Box::pin(search(session, candidates, criteria, query))
            })
            .await
    }

    pub async fn mark_messages_as_read(
        &self,
        message_ids: &[String],
    ) -> AppResult<UpdateOutcome> {
        let uids = parse_uids(message_ids)?;
        let inbox = self.folders.inbox().to_owned();
        self.connections
            .run("mark_messages_as_read", move |session| {
                Box::pin(mark_read(session, inbox, uids))
            })
            .await
    }

    /// Move inbox messages to the trash, trying each trash candidate in turn
    pub async fn delete_messages(&self, message_ids: &[String]) -> AppResult<UpdateOutcome> {
        let uids = parse_uids(message_ids)?;
        let inbox = self.folders.inbox().to_owned();
        let trash = self.folders.candidates(LogicalFolder::Trash).to_vec();
        let outcome = self
            .connections
            .run("delete_messages", move |session| {
                Box::pin(move_to_trash(session, inbox, uids, trash))
            })
            .await?;
        info!(
            count = outcome.count,
            destination = ?outcome.destination,
            "messages moved to trash"
        );
        Ok(outcome)
    }

    pub async fn list_labels(&self) -> AppResult<LabelList> {
        self.connections
            .run("list_labels", |session| Box::pin(list_labels(session)))
            .await
    }

    pub async fn create_label(&self, label: &str) -> AppResult<LabelOutcome> {
        let label = label.to_owned();
        self.connections
            .run("create_label", move |session| {
                Box::pin(async move {
                    session.create_mailbox(&label).await?;
                    Ok(LabelOutcome {
                        success: true,
                        label,
                    })
                })
            })
            .await
    }

    pub async fn delete_label(&self, label: &str) -> AppResult<LabelOutcome> {
        let label = label.to_owned();
        self.connections
            .run("delete_label", move |session| {
                Box::pin(async move {
                    session.delete_mailbox(&label).await?;
                    Ok(LabelOutcome {
                        success: true,
                        label,
                    })
                })
            })
            .await
    }

    pub async fn rename_label(&self, label: &str, new_name: &str) -> AppResult<LabelOutcome> {
        let (label, new_name) = (label.to_owned(), new_name.to_owned());
        self.connections
            .run("rename_label", move |session| {
                Box::pin(async move {
                    session.rename_mailbox(&label, &new_name).await?;
                    Ok(LabelOutcome {
                        success: true,
                        label: new_name,
                    })
                })
            })
            .await
    }

    /// Re-parent a label, keeping only its leaf segment
    pub async fn move_label(&self, label: &str, new_parent: &str) -> AppResult<LabelOutcome> {
        let (label, new_parent) = (label.to_owned(), new_parent.to_owned());
        self.connections
            .run("move_label", move |session| {
                Box::pin(move_label(session, label, new_parent))
            })
            .await
    }

    /// Copy an inbox message into every label; the first failed copy fails
    /// the operation
    pub async fn label_message(
        &self,
        message_id: &str,
        labels: &[String],
    ) -> AppResult<UpdateOutcome> {
        let uid = parse_uid(message_id)?;
        if labels.is_empty() {
            return Err(AppError::invalid("labels must not be empty"));
        }
        let inbox = self.folders.inbox().to_owned();
        let labels = labels.to_vec();
        self.connections
            .run("label_message", move |session| {
                Box::pin(apply_labels(session, inbox, uid, labels))
            })
            .await
    }

    /// Move one message; `source` defaults to the inbox. No folder fallback.
    pub async fn move_message(
        &self,
        message_id: &str,
        destination: &str,
        source: Option<&str>,
    ) -> AppResult<UpdateOutcome> {
        let uid = parse_uid(message_id)?;
        let source = source.unwrap_or(self.folders.inbox()).to_owned();
        let destination = destination.to_owned();
        self.connections
            .run("move_message", move |session| {
                Box::pin(async move {
                    session.select(&source).await?;
                    session.uid_move(&[uid], &destination).await?;
                    Ok(UpdateOutcome {
                        success: true,
                        count: 1,
                        destination: Some(destination),
                    })
                })
            })
            .await
    }

    /// Submit a message from the configured identity
    pub async fn send_message(&self, message: OutgoingMessage) -> AppResult<SendOutcome> {
        let to = message.to.into_list();
        if to.is_empty() {
            return Err(AppError::invalid("at least one recipient is required"));
        }
        let envelope = Envelope {
            from: self.from.clone(),
            to,
            subject: message.subject,
            text: message.body,
            html: message.html_body,
            cc: join_recipients(message.cc),
            bcc: join_recipients(message.bcc),
        };
        let message_id = self.submitter.submit(&envelope).await?;
        Ok(SendOutcome {
            success: true,
            message_id,
        })
    }
}

async fn list_recent<S: MailSession>(
    session: &mut S,
    inbox: String,
    count: u32,
) -> AppResult<MessageBatch> {
    let status = session.examine(&inbox).await?;
    match FetchSet::last(status.exists, count) {
        Some(set) => fetch_messages(session, set, &inbox).await,
        None => Ok(MessageBatch::default()),
    }
}

async fn list_unread<S: MailSession>(
    session: &mut S,
    inbox: String,
    count: usize,
) -> AppResult<MessageBatch> {
    session.examine(&inbox).await?;
    let unseen = session.uid_search("UNSEEN").await?;
    let recent = last_n(&unseen, count);
    fetch_messages(session, FetchSet::Uids(recent), &inbox).await
}

async fn search<S: MailSession>(
    session: &mut S,
    candidates: Vec<String>,
    criteria: String,
    query: String,
) -> AppResult<SearchResult> {
    let mailbox = examine_first(session, &candidates).await?;
    let matched = session.uid_search(&criteria).await?;
    let total_count = matched.len();
    let recent = last_n(&matched, MAX_SEARCH_RESULTS);
    let batch = fetch_messages(session, FetchSet::Uids(recent), &mailbox).await?;
    Ok(SearchResult {
        messages: batch.messages,
        total_count,
        query,
        skipped: batch.skipped,
    })
}

async fn mark_read<S: MailSession>(
    session: &mut S,
    inbox: String,
    uids: Vec<u32>,
) -> AppResult<UpdateOutcome> {
    session.select(&inbox).await?;
    session.uid_store(&uids, SEEN_FLAG_QUERY).await?;
    session.unselect().await?;
    Ok(UpdateOutcome {
        success: true,
        count: uids.len(),
        destination: None,
    })
}

async fn move_to_trash<S: MailSession>(
    session: &mut S,
    inbox: String,
    uids: Vec<u32>,
    trash: Vec<String>,
) -> AppResult<UpdateOutcome> {
    session.select(&inbox).await?;
    for (idx, candidate) in trash.iter().enumerate() {
        match session.uid_move(&uids, candidate).await {
            Ok(()) => {
                return Ok(UpdateOutcome {
                    success: true,
                    count: uids.len(),
                    destination: Some(candidate.clone()),
                });
            }
            Err(err) if err.allows_folder_fallback() && idx + 1 < trash.len() => {
                warn!(
                    mailbox = %candidate,
                    error = %err,
                    "trash move rejected, trying next candidate"
                );
            }
            Err(err) => return Err(err),
        }
    }
    Err(AppError::Internal("no trash folder names configured".to_owned()))
}

async fn list_labels<S: MailSession>(session: &mut S) -> AppResult<LabelList> {
    let entries = session.list_mailboxes("*").await?;
    let pairs: Vec<(String, Option<String>)> = entries
        .into_iter()
        .map(|entry| (entry.name, entry.delimiter))
        .collect();
    Ok(LabelList {
        labels: flatten(&build_tree(&pairs)),
    })
}

async fn move_label<S: MailSession>(
    session: &mut S,
    label: String,
    new_parent: String,
) -> AppResult<LabelOutcome> {
    let listed = session.list_mailboxes(&label).await?;
    let delimiter = listed
        .into_iter()
        .find(|entry| entry.name == label)
        .and_then(|entry| entry.delimiter)
        .unwrap_or_else(|| DEFAULT_DELIMITER.to_owned());
    let destination = moved_label_path(&label, &new_parent, &delimiter);
    if destination == label {
        debug!(%label, "label already at destination");
        return Ok(LabelOutcome {
            success: true,
            label,
        });
    }
    debug!(%label, %destination, "moving label");
    session.rename_mailbox(&label, &destination).await?;
    Ok(LabelOutcome {
        success: true,
        label: destination,
    })
}

async fn apply_labels<S: MailSession>(
    session: &mut S,
    inbox: String,
    uid: u32,
    labels: Vec<String>,
) -> AppResult<UpdateOutcome> {
    session.select(&inbox).await?;
    for label in &labels {
        session.uid_copy(&[uid], label).await?;
    }
    Ok(UpdateOutcome {
        success: true,
        count: 1,
        destination: None,
    })
}

/// EXAMINE the first candidate the server accepts
///
/// Only selection failures and command rejections move on to the next name.
async fn examine_first<S: MailSession>(
    session: &mut S,
    candidates: &[String],
) -> AppResult<String> {
    for (idx, mailbox) in candidates.iter().enumerate() {
        match session.examine(mailbox).await {
            Ok(_) => return Ok(mailbox.clone()),
            Err(err) if err.allows_folder_fallback() && idx + 1 < candidates.len() => {
                warn!(%mailbox, error = %err, "folder unavailable, trying next candidate");
            }
            Err(err) => return Err(err),
        }
    }
    Err(AppError::Internal("no folder names configured".to_owned()))
}

/// Last `n` entries of an ascending UID list
fn last_n(uids: &[u32], n: usize) -> Vec<u32> {
    uids[uids.len().saturating_sub(n)..].to_vec()
}

/// Parse message identifiers into UIDs
///
/// # Errors
///
/// Returns `InvalidInput` for an empty list or any identifier that is not a
/// non-zero 32-bit integer.
pub fn parse_uids(message_ids: &[String]) -> AppResult<Vec<u32>> {
    if message_ids.is_empty() {
        return Err(AppError::invalid("message_ids must not be empty"));
    }
    message_ids.iter().map(|id| parse_uid(id)).collect()
}

fn parse_uid(message_id: &str) -> AppResult<u32> {
    match message_id.trim().parse::<u32>() {
        Ok(uid) if uid > 0 => Ok(uid),
        _ => Err(AppError::InvalidInput(format!(
            "message id '{message_id}' is not a valid UID"
        ))),
    }
}

fn join_recipients(recipients: Option<Recipients>) -> Option<String> {
    recipients
        .map(Recipients::into_list)
        .filter(|list| !list.is_empty())
        .map(|list| list.join(", "))
}
