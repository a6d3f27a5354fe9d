//! Gmail-style query translation
//!
//! Turns a free-text query such as `in:sent quarterly report` into the folder
//! to open and the terms left for the IMAP `SEARCH`.

use regex::Regex;

use crate::errors::{AppError, AppResult};
use crate::folders::{FolderPolicy, LogicalFolder};

/// Case-insensitive folder directive with its trailing whitespace
const IN_DIRECTIVE: &str = r"(?i)\bin:(\w+)\s*";

/// Result of translating a free-text query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslatedQuery {
    /// Logical folder the search targets (inbox when no directive matched)
    pub folder: LogicalFolder,
    /// Primary provider path of `folder`
    pub mailbox: String,
    /// Remaining search terms; `None` means match everything
    pub terms: Option<String>,
}

impl TranslatedQuery {
    /// IMAP `SEARCH` criteria for the remaining terms
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the terms contain control characters.
    pub fn search_criteria(&self) -> AppResult<String> {
        match &self.terms {
            Some(terms) => Ok(format!("TEXT \"{}\"", escape_imap_quoted(terms)?)),
            None => Ok("ALL".to_owned()),
        }
    }
}

/// Split a query into target folder and remaining terms
///
/// The first `in:<word>` token selects the folder; unknown names fall back
/// to the inbox. The token and its trailing whitespace are removed.
pub fn translate(query: &str, policy: &FolderPolicy) -> AppResult<TranslatedQuery> {
    let directive = Regex::new(IN_DIRECTIVE)
        .map_err(|e| AppError::Internal(format!("invalid folder directive regex: {e}")))?;
    let (folder, remainder) = match directive.captures(query) {
        Some(caps) => {
            let folder = caps
                .get(1)
                .and_then(|m| LogicalFolder::from_name(m.as_str()))
                .unwrap_or(LogicalFolder::Inbox);
            (folder, directive.replace(query, "").into_owned())
        }
        None => (LogicalFolder::Inbox, query.to_owned()),
    };

    let remainder = remainder.trim();
    Ok(TranslatedQuery {
        folder,
        mailbox: policy.primary(folder).to_owned(),
        terms: (!remainder.is_empty()).then(|| remainder.to_owned()),
    })
}

/// Escape backslashes and quotes for IMAP quoted strings
pub fn escape_imap_quoted(input: &str) -> AppResult<String> {
    if input.chars().any(|ch| ch.is_ascii_control()) {
        return Err(AppError::InvalidInput(
            "quoted string must not contain control characters".to_owned(),
        ));
    }
    Ok(input.replace('\\', "\\\\").replace('"', "\\\""))
}
