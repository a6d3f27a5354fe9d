//! Best-effort bulk header fetch
//!
//! One FETCH round-trip per batch. Items the server returns without a UID or
//! without header data are dropped and reported by sequence number; everything
//! else is parsed and returned newest first.

use std::fmt;

use tracing::warn;

use crate::errors::AppResult;
use crate::headers::{MessageAttributes, parse_message};
use crate::imap::{MailSession, uid_set};
use crate::models::{Message, MessageBatch};

/// Messages addressed by a bulk fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchSet {
    /// Inclusive sequence-number range (`start:end`)
    Range { start: u32, end: u32 },
    /// Explicit UID list, issued as `UID FETCH`
    Uids(Vec<u32>),
}

impl FetchSet {
    /// Sequence range covering the last `count` of `exists` messages
    ///
    /// `None` when the mailbox is empty or nothing was requested.
    pub fn last(exists: u32, count: u32) -> Option<Self> {
        if exists == 0 || count == 0 {
            return None;
        }
        let start = exists.saturating_sub(count).saturating_add(1).max(1);
        Some(Self::Range { start, end: exists })
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Uids(uids) if uids.is_empty())
    }
}

impl fmt::Display for FetchSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Range { start, end } => write!(f, "{start}:{end}"),
            Self::Uids(uids) => f.write_str(&uid_set(uids)),
        }
    }
}

/// Fetch and parse headers for `set` in the currently selected mailbox
///
/// `mailbox` is recorded as the label of every returned message. An empty UID
/// list issues no command.
///
/// # Errors
///
/// Fails only when the FETCH command itself fails; malformed items are
/// skipped.
pub async fn fetch_messages<S>(
    session: &mut S,
    set: FetchSet,
    mailbox: &str,
) -> AppResult<MessageBatch>
where
    S: MailSession + ?Sized,
{
    if set.is_empty() {
        return Ok(MessageBatch::default());
    }

    let items = session.fetch_headers(&set).await?;
    let mut batch = MessageBatch::default();
    for item in items {
        match (item.uid, item.header.as_deref()) {
            (Some(uid), Some(header)) => {
                let attrs = MessageAttributes {
                    uid,
                    internal_date: item.internal_date,
                };
                batch.messages.push(parse_message(header, attrs, mailbox));
            }
            _ => {
                warn!(
                    sequence = item.sequence,
                    mailbox,
                    has_uid = item.uid.is_some(),
                    "dropping fetch item without UID or header data"
                );
                batch.skipped.push(item.sequence);
            }
        }
    }
    sort_newest_first(&mut batch.messages);
    Ok(batch)
}

/// Stable sort by date, newest first; ties keep server order
pub fn sort_newest_first(messages: &mut [Message]) {
    messages.sort_by(|a, b| b.date.cmp(&a.date));
}
