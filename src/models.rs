//! Input/output DTOs and schema-bearing types
//!
//! Defines the normalized message model, operation results, and MCP tool
//! inputs. Each type is annotated with `JsonSchema` for automatic schema
//! generation.

use chrono::{DateTime, SecondsFormat, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Metadata included in all tool responses
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Meta {
    /// Current UTC timestamp in RFC 3339 format with milliseconds
    pub now_utc: String,
    /// Tool execution duration in milliseconds
    pub duration_ms: u64,
}

impl Meta {
    /// Create metadata populated with current time and elapsed duration
    pub fn now(duration_ms: u64) -> Self {
        Self {
            now_utc: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            duration_ms,
        }
    }
}

/// Standard response envelope for all tools
///
/// Wraps tool-specific data with human-readable summary and execution metadata.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ToolEnvelope<T>
where
    T: JsonSchema,
{
    /// Human-readable summary of the operation outcome
    pub summary: String,
    /// Tool-specific data payload
    pub data: T,
    /// Execution metadata (timestamp, duration)
    pub meta: Meta,
}

/// Normalized message built from header fields
///
/// Constructed only by the header parser; never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Message {
    /// IMAP UID within the mailbox it was fetched from
    pub id: String,
    /// Same value as `id`; conversations are not threaded
    pub thread_id: String,
    /// Subject, or `(no subject)` when absent
    pub subject: String,
    /// Raw `From` header value, empty when absent
    pub from: String,
    /// Recipients from the `To` header
    pub to: Vec<String>,
    /// Server receipt time (falls back to the `Date` header, then parse time)
    #[schemars(with = "String")]
    pub date: DateTime<Utc>,
    /// Short preview composed from sender and subject
    pub snippet: String,
    /// Mailboxes this message is known to live in
    pub labels: Vec<String>,
}

/// Messages from a best-effort batch fetch
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct MessageBatch {
    /// Parsed messages, newest first
    pub messages: Vec<Message>,
    /// Sequence numbers of fetch items dropped for missing UID or headers
    pub skipped: Vec<u32>,
}

/// Search output
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SearchResult {
    /// Fetched subset of the matches, newest first (at most 50)
    pub messages: Vec<Message>,
    /// Number of server-side matches, possibly larger than `messages`
    pub total_count: usize,
    /// Query string as received
    pub query: String,
    /// Sequence numbers of fetch items dropped for missing UID or headers
    pub skipped: Vec<u32>,
}

/// Flattened label tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct LabelList {
    /// Full label paths, parents before children
    pub labels: Vec<String>,
}

/// Outcome of a flag update or message relocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct UpdateOutcome {
    pub success: bool,
    /// Number of messages addressed by the request
    pub count: usize,
    /// Mailbox that received the messages, when they were moved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
}

/// Outcome of a label (folder) mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct LabelOutcome {
    pub success: bool,
    /// Label path after the operation
    pub label: String,
}

/// Outcome of a mail submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SendOutcome {
    pub success: bool,
    /// Delivery identifier (the `Message-ID` assigned to the message)
    pub message_id: String,
}

/// A single address or a list of addresses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum Recipients {
    One(String),
    Many(Vec<String>),
}

impl Recipients {
    /// Flatten into trimmed, non-empty addresses
    pub fn into_list(self) -> Vec<String> {
        let list = match self {
            Self::One(addr) => vec![addr],
            Self::Many(list) => list,
        };
        list.into_iter()
            .map(|a| a.trim().to_owned())
            .filter(|a| !a.is_empty())
            .collect()
    }
}

/// Input: list recent or unread messages
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ListMessagesInput {
    /// Maximum messages to return (1..100, default 10)
    #[serde(default = "default_count")]
    pub count: usize,
}

/// Input: Gmail-style search
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SearchMessagesInput {
    /// Free-text query; `in:<folder>` selects inbox, sent, trash, bin, spam,
    /// drafts, starred, important or all
    pub query: String,
}

/// Input: operate on several messages in the inbox
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct MessageIdsInput {
    /// Message identifiers as returned by the list/search tools
    pub message_ids: Vec<String>,
}

/// Input: a single label path
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct LabelInput {
    /// Full label path (e.g. `Work/Project`)
    pub label: String,
}

/// Input: rename a label
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct RenameLabelInput {
    /// Current full label path
    pub label: String,
    /// New full label path
    pub new_name: String,
}

/// Input: nest a label under a different parent
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct MoveLabelInput {
    /// Current full label path
    pub label: String,
    /// New parent path; empty moves the label to the top level
    pub new_parent: String,
}

/// Input: apply labels to an inbox message
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct LabelMessageInput {
    /// Message identifier
    pub message_id: String,
    /// Labels to apply
    pub labels: Vec<String>,
}

/// Input: move a message between mailboxes
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct MoveMessageInput {
    /// Message identifier within `source`
    pub message_id: String,
    /// Destination mailbox path
    pub destination: String,
    /// Source mailbox path (defaults to the inbox)
    pub source: Option<String>,
}

/// Input: send a message
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SendMessageInput {
    /// Recipient address or addresses
    pub to: Recipients,
    /// Subject line
    pub subject: String,
    /// Plain-text body
    pub body: String,
    /// Optional HTML alternative
    pub html_body: Option<String>,
    /// Carbon-copy address or addresses
    pub cc: Option<Recipients>,
    /// Blind carbon-copy address or addresses
    pub bcc: Option<Recipients>,
}

/// Default value for `count` in list tools
fn default_count() -> usize {
    10
}

#[cfg(test)]
mod tests {
    use super::{ListMessagesInput, Recipients, SendMessageInput};

    #[test]
    fn recipients_accept_single_address_or_list() {
        let input: SendMessageInput = serde_json::from_value(serde_json::json!({
            "to": "a@example.com",
            "subject": "Hi",
            "body": "text",
            "cc": ["b@example.com", " ", "c@example.com"]
        }))
        .expect("valid input");

        assert_eq!(input.to, Recipients::One("a@example.com".to_owned()));
        assert_eq!(
            input.cc.expect("cc present").into_list(),
            vec!["b@example.com", "c@example.com"]
        );
        assert!(input.bcc.is_none());
    }

    #[test]
    fn list_input_defaults_count_to_ten() {
        let input: ListMessagesInput =
            serde_json::from_value(serde_json::json!({})).expect("valid input");
        assert_eq!(input.count, 10);
    }
}
