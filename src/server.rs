//! MCP server implementation with tool handlers
//!
//! Implements the `ServerHandler` trait and registers 13 MCP tools. Handles
//! input validation and response formatting; mailbox semantics live in
//! [`MailboxEngine`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{ErrorData, ServerCapabilities, ServerInfo};
use rmcp::{Json, ServerHandler, tool, tool_handler, tool_router};

use crate::config::ServerConfig;
use crate::errors::{AppError, AppResult};
use crate::imap::ImapConnector;
use crate::mailbox::{MailboxEngine, OutgoingMessage};
use crate::models::{
    LabelInput, LabelList, LabelMessageInput, LabelOutcome, ListMessagesInput, MessageBatch,
    MessageIdsInput, Meta, MoveLabelInput, MoveMessageInput, RenameLabelInput, SearchMessagesInput,
    SearchResult, SendMessageInput, SendOutcome, ToolEnvelope, UpdateOutcome,
};
use crate::submit::SmtpSubmitter;

/// Maximum messages per list call
const MAX_LIST_COUNT: usize = 100;
/// Maximum identifiers per bulk update
const MAX_MESSAGE_IDS: usize = 500;
/// Maximum labels applied in one call
const MAX_LABELS: usize = 50;
/// Maximum length of a search query
const MAX_QUERY_CHARS: usize = 1024;

/// Gmail IMAP MCP server
///
/// Holds the mailbox engine. Implements MCP tool handlers via `#[tool]`
/// attribute macro and `ServerHandler` trait.
#[derive(Clone)]
pub struct GmailImapServer {
    /// Mailbox operations over per-call IMAP sessions
    engine: Arc<MailboxEngine<ImapConnector>>,
    /// Tool router for dispatching MCP tool calls
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl GmailImapServer {
    /// Create a new MCP server instance
    ///
    /// Wires the IMAP connector and the SMTP submitter from config.
    pub fn new(config: ServerConfig) -> Self {
        let config = Arc::new(config);
        let submitter = SmtpSubmitter::new(
            config.smtp.clone(),
            Duration::from_millis(config.socket_timeout_ms),
        );
        let engine = MailboxEngine::new(
            ImapConnector::new(Arc::clone(&config)),
            config.folders.clone(),
            Arc::new(submitter),
            config.smtp.from.clone(),
        );
        Self {
            engine: Arc::new(engine),
            tool_router: Self::tool_router(),
        }
    }

    /// Tool: List the most recent inbox messages
    #[tool(
        name = "list_messages",
        description = "List the most recent inbox messages, newest first"
    )]
    async fn list_messages(
        &self,
        Parameters(input): Parameters<ListMessagesInput>,
    ) -> Result<Json<ToolEnvelope<MessageBatch>>, ErrorData> {
        let started = Instant::now();
        let result = self
            .list_messages_impl(input)
            .await
            .map(|batch| (batch_summary(&batch), batch));
        finalize_tool(started, result)
    }

    /// Tool: List unread inbox messages
    #[tool(
        name = "list_unread_messages",
        description = "List unread inbox messages, newest first"
    )]
    async fn list_unread_messages(
        &self,
        Parameters(input): Parameters<ListMessagesInput>,
    ) -> Result<Json<ToolEnvelope<MessageBatch>>, ErrorData> {
        let started = Instant::now();
        let result = self
            .list_unread_impl(input)
            .await
            .map(|batch| (batch_summary(&batch), batch));
        finalize_tool(started, result)
    }

    /// Tool: Gmail-style search
    ///
    /// `in:<folder>` picks the folder; remaining words become a text search.
    #[tool(
        name = "search_messages",
        description = "Search messages with a Gmail-style query such as 'in:sent invoice'"
    )]
    async fn search_messages(
        &self,
        Parameters(input): Parameters<SearchMessagesInput>,
    ) -> Result<Json<ToolEnvelope<SearchResult>>, ErrorData> {
        let started = Instant::now();
        let result = self.search_messages_impl(input).await.map(|data| {
            let summary = format!(
                "{} of {} match(es) returned",
                data.messages.len(),
                data.total_count
            );
            (summary, data)
        });
        finalize_tool(started, result)
    }

    #[tool(
        name = "mark_messages_as_read",
        description = "Mark inbox messages as read"
    )]
    async fn mark_messages_as_read(
        &self,
        Parameters(input): Parameters<MessageIdsInput>,
    ) -> Result<Json<ToolEnvelope<UpdateOutcome>>, ErrorData> {
        let started = Instant::now();
        let result = self.mark_read_impl(input).await.map(|data| {
            (format!("{} message(s) marked as read", data.count), data)
        });
        finalize_tool(started, result)
    }

    /// Tool: Move inbox messages to the trash
    ///
    /// This is a move, not a permanent delete.
    #[tool(
        name = "delete_messages",
        description = "Move inbox messages to the trash"
    )]
    async fn delete_messages(
        &self,
        Parameters(input): Parameters<MessageIdsInput>,
    ) -> Result<Json<ToolEnvelope<UpdateOutcome>>, ErrorData> {
        let started = Instant::now();
        let result = self.delete_messages_impl(input).await.map(|data| {
            let summary = format!(
                "{} message(s) moved to {}",
                data.count,
                data.destination.as_deref().unwrap_or("trash")
            );
            (summary, data)
        });
        finalize_tool(started, result)
    }

    #[tool(name = "list_labels", description = "List all labels (folders)")]
    async fn list_labels(&self) -> Result<Json<ToolEnvelope<LabelList>>, ErrorData> {
        let started = Instant::now();
        let result = self
            .engine
            .list_labels()
            .await
            .map(|data| (format!("{} label(s)", data.labels.len()), data));
        finalize_tool(started, result)
    }

    #[tool(name = "create_label", description = "Create a label")]
    async fn create_label(
        &self,
        Parameters(input): Parameters<LabelInput>,
    ) -> Result<Json<ToolEnvelope<LabelOutcome>>, ErrorData> {
        let started = Instant::now();
        let result = async {
            validate_mailbox(&input.label, "label")?;
            self.engine.create_label(&input.label).await
        }
        .await
        .map(|data| (format!("label '{}' created", data.label), data));
        finalize_tool(started, result)
    }

    #[tool(name = "delete_label", description = "Delete a label")]
    async fn delete_label(
        &self,
        Parameters(input): Parameters<LabelInput>,
    ) -> Result<Json<ToolEnvelope<LabelOutcome>>, ErrorData> {
        let started = Instant::now();
        let result = async {
            validate_mailbox(&input.label, "label")?;
            self.engine.delete_label(&input.label).await
        }
        .await
        .map(|data| (format!("label '{}' deleted", data.label), data));
        finalize_tool(started, result)
    }

    #[tool(name = "rename_label", description = "Rename a label")]
    async fn rename_label(
        &self,
        Parameters(input): Parameters<RenameLabelInput>,
    ) -> Result<Json<ToolEnvelope<LabelOutcome>>, ErrorData> {
        let started = Instant::now();
        let result = async {
            validate_mailbox(&input.label, "label")?;
            validate_mailbox(&input.new_name, "new_name")?;
            self.engine.rename_label(&input.label, &input.new_name).await
        }
        .await
        .map(|data| (format!("label renamed to '{}'", data.label), data));
        finalize_tool(started, result)
    }

    /// Tool: Nest a label under a new parent
    ///
    /// Only the leaf segment of the label survives the move.
    #[tool(
        name = "move_label",
        description = "Move a label under a new parent label (empty parent moves it to the top level)"
    )]
    async fn move_label(
        &self,
        Parameters(input): Parameters<MoveLabelInput>,
    ) -> Result<Json<ToolEnvelope<LabelOutcome>>, ErrorData> {
        let started = Instant::now();
        let result = async {
            validate_mailbox(&input.label, "label")?;
            validate_no_controls(&input.new_parent, "new_parent")?;
            self.engine.move_label(&input.label, &input.new_parent).await
        }
        .await
        .map(|data| (format!("label moved to '{}'", data.label), data));
        finalize_tool(started, result)
    }

    #[tool(
        name = "label_message",
        description = "Apply labels to an inbox message by copying it into each label"
    )]
    async fn label_message(
        &self,
        Parameters(input): Parameters<LabelMessageInput>,
    ) -> Result<Json<ToolEnvelope<UpdateOutcome>>, ErrorData> {
        let started = Instant::now();
        let count = input.labels.len();
        let result = self
            .label_message_impl(input)
            .await
            .map(|data| (format!("{count} label(s) applied"), data));
        finalize_tool(started, result)
    }

    #[tool(
        name = "move_message",
        description = "Move a message to another mailbox (source defaults to the inbox)"
    )]
    async fn move_message(
        &self,
        Parameters(input): Parameters<MoveMessageInput>,
    ) -> Result<Json<ToolEnvelope<UpdateOutcome>>, ErrorData> {
        let started = Instant::now();
        let result = self.move_message_impl(input).await.map(|data| {
            let summary = format!(
                "message moved to '{}'",
                data.destination.as_deref().unwrap_or_default()
            );
            (summary, data)
        });
        finalize_tool(started, result)
    }

    #[tool(
        name = "send_message",
        description = "Send a message with optional HTML body, cc and bcc"
    )]
    async fn send_message(
        &self,
        Parameters(input): Parameters<SendMessageInput>,
    ) -> Result<Json<ToolEnvelope<SendOutcome>>, ErrorData> {
        let started = Instant::now();
        let result = self
            .send_message_impl(input)
            .await
            .map(|data| (format!("message sent as {}", data.message_id), data));
        finalize_tool(started, result)
    }
}

/// MCP server handler implementation
///
/// Provides server info and capabilities to MCP client.
#[tool_handler(router = self.tool_router)]
impl ServerHandler for GmailImapServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo::new(ServerCapabilities::builder().enable_tools().build()).with_instructions(
            "Gmail IMAP MCP server. Labels are folders; message ids are IMAP UIDs valid within the mailbox they were listed from.",
        )
    }
}

/// Tool implementation methods
///
/// Validation runs here, before any connection is opened.
impl GmailImapServer {
    async fn list_messages_impl(&self, input: ListMessagesInput) -> AppResult<MessageBatch> {
        validate_range(input.count, 1, MAX_LIST_COUNT, "count")?;
        self.engine.list_messages(input.count).await
    }

    async fn list_unread_impl(&self, input: ListMessagesInput) -> AppResult<MessageBatch> {
        validate_range(input.count, 1, MAX_LIST_COUNT, "count")?;
        self.engine.list_unread_messages(input.count).await
    }

    async fn search_messages_impl(&self, input: SearchMessagesInput) -> AppResult<SearchResult> {
        validate_query(&input.query)?;
        self.engine.search_messages(&input.query).await
    }

    async fn mark_read_impl(&self, input: MessageIdsInput) -> AppResult<UpdateOutcome> {
        validate_range(input.message_ids.len(), 1, MAX_MESSAGE_IDS, "message_ids")?;
        self.engine.mark_messages_as_read(&input.message_ids).await
    }

    async fn delete_messages_impl(&self, input: MessageIdsInput) -> AppResult<UpdateOutcome> {
        validate_range(input.message_ids.len(), 1, MAX_MESSAGE_IDS, "message_ids")?;
        self.engine.delete_messages(&input.message_ids).await
    }

    async fn label_message_impl(&self, input: LabelMessageInput) -> AppResult<UpdateOutcome> {
        validate_range(input.labels.len(), 1, MAX_LABELS, "labels")?;
        for label in &input.labels {
            validate_mailbox(label, "labels")?;
        }
        self.engine
            .label_message(&input.message_id, &input.labels)
            .await
    }

    async fn move_message_impl(&self, input: MoveMessageInput) -> AppResult<UpdateOutcome> {
        validate_mailbox(&input.destination, "destination")?;
        if let Some(source) = &input.source {
            validate_mailbox(source, "source")?;
        }
        self.engine
            .move_message(&input.message_id, &input.destination, input.source.as_deref())
            .await
    }

    async fn send_message_impl(&self, input: SendMessageInput) -> AppResult<SendOutcome> {
        validate_no_controls(&input.subject, "subject")?;
        self.engine
            .send_message(OutgoingMessage {
                to: input.to,
                subject: input.subject,
                body: input.body,
                html_body: input.html_body,
                cc: input.cc,
                bcc: input.bcc,
            })
            .await
    }
}

/// Calculate elapsed milliseconds
fn duration_ms(started: Instant) -> u64 {
    started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64
}

/// Build a standardized MCP tool response envelope from business logic output
fn finalize_tool<T>(
    started: Instant,
    result: AppResult<(String, T)>,
) -> Result<Json<ToolEnvelope<T>>, ErrorData>
where
    T: schemars::JsonSchema,
{
    match result {
        Ok((summary, data)) => Ok(Json(ToolEnvelope {
            summary,
            data,
            meta: Meta::now(duration_ms(started)),
        })),
        Err(e) => Err(e.to_error_data()),
    }
}

fn batch_summary(batch: &MessageBatch) -> String {
    if batch.skipped.is_empty() {
        format!("{} message(s) returned", batch.messages.len())
    } else {
        format!(
            "{} message(s) returned, {} skipped",
            batch.messages.len(),
            batch.skipped.len()
        )
    }
}

/// Validate mailbox/label path format
fn validate_mailbox(mailbox: &str, field: &str) -> AppResult<()> {
    if mailbox.is_empty() || mailbox.len() > 256 {
        return Err(AppError::InvalidInput(format!(
            "{field} must be 1..256 characters"
        )));
    }
    validate_no_controls(mailbox, field)?;
    Ok(())
}

/// Reject IMAP control characters in user-provided values
fn validate_no_controls(value: &str, field: &str) -> AppResult<()> {
    if value.chars().any(|ch| ch.is_ascii_control()) {
        return Err(AppError::InvalidInput(format!(
            "{field} must not contain control characters"
        )));
    }
    Ok(())
}

/// Validate numeric value in range
fn validate_range(value: usize, min: usize, max: usize, field: &str) -> AppResult<()> {
    if value < min || value > max {
        return Err(AppError::InvalidInput(format!(
            "{field} must be in range {min}..{max}"
        )));
    }
    Ok(())
}

fn validate_query(query: &str) -> AppResult<()> {
    if query.chars().count() > MAX_QUERY_CHARS {
        return Err(AppError::InvalidInput(format!(
            "query must be at most {MAX_QUERY_CHARS} characters"
        )));
    }
    validate_no_controls(query, "query")
}

#[cfg(test)]
mod tests {
    use super::{
        MAX_LIST_COUNT, batch_summary, validate_mailbox, validate_no_controls, validate_query,
        validate_range,
    };
    use crate::models::MessageBatch;

    #[test]
    fn rejects_control_chars_in_mailbox() {
        let err = validate_mailbox("INBOX\r", "label").expect_err("must fail");
        assert!(err.to_string().contains("control characters"));
    }

    #[test]
    fn rejects_empty_label() {
        let err = validate_mailbox("", "label").expect_err("must fail");
        assert!(err.to_string().contains("label must be 1..256 characters"));
    }

    #[test]
    fn count_bounds_are_inclusive() {
        validate_range(1, 1, MAX_LIST_COUNT, "count").expect("lower bound");
        validate_range(100, 1, MAX_LIST_COUNT, "count").expect("upper bound");
        assert!(validate_range(0, 1, MAX_LIST_COUNT, "count").is_err());
        assert!(validate_range(101, 1, MAX_LIST_COUNT, "count").is_err());
    }

    #[test]
    fn empty_parent_is_allowed_but_controls_are_not() {
        validate_no_controls("", "new_parent").expect("empty parent");
        assert!(validate_no_controls("Archive\n", "new_parent").is_err());
    }

    #[test]
    fn query_rejects_linebreaks() {
        validate_query("in:sent invoice").expect("plain query");
        let err = validate_query("a\r\nb").expect_err("must fail");
        assert!(err.to_string().contains("control characters"));
    }

    #[test]
    fn batch_summary_mentions_skipped_items() {
        let batch = MessageBatch {
            messages: Vec::new(),
            skipped: vec![4],
        };
        assert_eq!(batch_summary(&batch), "0 message(s) returned, 1 skipped");
        assert_eq!(
            batch_summary(&MessageBatch::default()),
            "0 message(s) returned"
        );
    }
}
