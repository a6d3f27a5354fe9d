//! Folder naming policy and mailbox tree modeling
//!
//! Labels are folders: the mailbox tree reported by `LIST` is the label tree.
//! This module holds the logical-folder naming table (with ordered fallback
//! candidates per provider variant), the nested mailbox description and its
//! flattening, and the path arithmetic used when a label is moved.

use std::collections::BTreeMap;

/// Delimiter assumed when the server does not report one
pub const DEFAULT_DELIMITER: &str = "/";

/// Well-known folders addressable with `in:<name>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogicalFolder {
    Inbox,
    Sent,
    Trash,
    Bin,
    Spam,
    Drafts,
    Starred,
    Important,
    All,
}

impl LogicalFolder {
    pub const ALL: [LogicalFolder; 9] = [
        Self::Inbox,
        Self::Sent,
        Self::Trash,
        Self::Bin,
        Self::Spam,
        Self::Drafts,
        Self::Starred,
        Self::Important,
        Self::All,
    ];

    /// Lower-case name used in queries and configuration keys
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inbox => "inbox",
            Self::Sent => "sent",
            Self::Trash => "trash",
            Self::Bin => "bin",
            Self::Spam => "spam",
            Self::Drafts => "drafts",
            Self::Starred => "starred",
            Self::Important => "important",
            Self::All => "all",
        }
    }

    /// Case-insensitive lookup; `None` for unknown names
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        Self::ALL.into_iter().find(|f| f.as_str() == lower)
    }
}

/// Provider folder paths for each logical folder
///
/// Every logical folder maps to an ordered, non-empty list of candidate
/// paths. The first candidate is the primary name; later ones are tried only
/// when the server rejects the earlier ones.
#[derive(Debug, Clone)]
pub struct FolderPolicy {
    candidates: BTreeMap<LogicalFolder, Vec<String>>,
}

impl FolderPolicy {
    /// Gmail naming. Trash is exposed as `[Gmail]/Bin` in some locales.
    pub fn gmail() -> Self {
        let table: [(LogicalFolder, &[&str]); 9] = [
            (LogicalFolder::Inbox, &["INBOX"]),
            (LogicalFolder::Sent, &["[Gmail]/Sent Mail"]),
            (LogicalFolder::Trash, &["[Gmail]/Trash", "[Gmail]/Bin"]),
            (LogicalFolder::Bin, &["[Gmail]/Bin", "[Gmail]/Trash"]),
            (LogicalFolder::Spam, &["[Gmail]/Spam"]),
            (LogicalFolder::Drafts, &["[Gmail]/Drafts"]),
            (LogicalFolder::Starred, &["[Gmail]/Starred"]),
            (LogicalFolder::Important, &["[Gmail]/Important"]),
            (LogicalFolder::All, &["[Gmail]/All Mail"]),
        ];
        let candidates = table
            .into_iter()
            .map(|(folder, names)| {
                (
                    folder,
                    names.iter().map(|n| (*n).to_owned()).collect::<Vec<_>>(),
                )
            })
            .collect();
        Self { candidates }
    }

    /// Replace the candidate list for a logical folder
    ///
    /// Empty lists are ignored so every folder keeps at least one name.
    pub fn set_candidates(&mut self, folder: LogicalFolder, names: Vec<String>) {
        if !names.is_empty() {
            self.candidates.insert(folder, names);
        }
    }

    /// Ordered candidate paths for a logical folder
    pub fn candidates(&self, folder: LogicalFolder) -> &[String] {
        self.candidates
            .get(&folder)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Primary path for a logical folder
    pub fn primary(&self, folder: LogicalFolder) -> &str {
        self.candidates(folder)
            .first()
            .map(String::as_str)
            .unwrap_or("INBOX")
    }

    pub fn inbox(&self) -> &str {
        self.primary(LogicalFolder::Inbox)
    }
}

impl Default for FolderPolicy {
    fn default() -> Self {
        Self::gmail()
    }
}

/// One node of a nested mailbox description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxNode {
    /// Segment name (not the full path)
    pub name: String,
    /// Hierarchy delimiter reported for this node; `/` when absent
    pub delimiter: Option<String>,
    /// Children in server order
    pub children: Vec<MailboxNode>,
}

impl MailboxNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            delimiter: None,
            children: Vec::new(),
        }
    }

    #[cfg(test)]
    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = Some(delimiter.into());
        self
    }

    #[cfg(test)]
    pub fn with_child(mut self, child: MailboxNode) -> Self {
        self.children.push(child);
        self
    }

    fn delimiter(&self) -> &str {
        self.delimiter.as_deref().unwrap_or(DEFAULT_DELIMITER)
    }
}

/// Flatten a mailbox tree into full paths
///
/// Depth-first, parent before children. A child's path is its parent's path,
/// the parent's own delimiter, then the child's name.
pub fn flatten(nodes: &[MailboxNode]) -> Vec<String> {
    let mut out = Vec::new();
    for node in nodes {
        flatten_into(node, None, &mut out);
    }
    out
}

fn flatten_into(node: &MailboxNode, prefix: Option<&str>, out: &mut Vec<String>) {
    let path = match prefix {
        Some(prefix) => format!("{prefix}{}", node.name),
        None => node.name.clone(),
    };
    let child_prefix = format!("{path}{}", node.delimiter());
    out.push(path);
    for child in &node.children {
        flatten_into(child, Some(&child_prefix), out);
    }
}

/// Fold a flat `LIST` response into a nested mailbox description
///
/// Entries are `(full path, delimiter)`. Intermediate parents that the
/// server did not list are created. First-seen order is preserved at every
/// level.
pub fn build_tree(entries: &[(String, Option<String>)]) -> Vec<MailboxNode> {
    let mut roots: Vec<MailboxNode> = Vec::new();
    for (path, delimiter) in entries {
        let segments: Vec<&str> = match delimiter.as_deref() {
            Some(d) if !d.is_empty() => path.split(d).collect(),
            _ => vec![path.as_str()],
        };
        let mut level = &mut roots;
        for segment in segments {
            let idx = match level.iter().position(|n| n.name == segment) {
                Some(idx) => idx,
                None => {
                    level.push(MailboxNode::new(segment));
                    level.len() - 1
                }
            };
            let node = &mut level[idx];
            if node.delimiter.is_none() {
                node.delimiter = delimiter.clone();
            }
            level = &mut node.children;
        }
    }
    roots
}

/// Final segment of a hierarchical path
pub fn leaf_name<'a>(path: &'a str, delimiter: &str) -> &'a str {
    if delimiter.is_empty() {
        return path;
    }
    path.rsplit(delimiter).next().unwrap_or(path)
}

/// Destination of a label moved under a new parent
///
/// Only the leaf segment survives; ancestors of the old path are discarded.
/// An empty parent moves the label to the top level.
pub fn moved_label_path(label: &str, new_parent: &str, delimiter: &str) -> String {
    let leaf = leaf_name(label, delimiter);
    if new_parent.is_empty() {
        leaf.to_owned()
    } else {
        format!("{new_parent}{delimiter}{leaf}")
    }
}
