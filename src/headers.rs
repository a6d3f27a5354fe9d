//! Header block parsing into normalized messages
//!
//! Parsing is total: garbled or missing header lines degrade to defaults so a
//! single bad message never aborts a batch fetch.

use chrono::{DateTime, TimeZone, Utc};

use crate::models::Message;

/// Subject used when the header is absent or blank
pub const NO_SUBJECT: &str = "(no subject)";
/// Maximum characters in a derived snippet
const SNIPPET_MAX_CHARS: usize = 100;

/// Server-supplied attributes accompanying a header block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageAttributes {
    /// IMAP UID
    pub uid: u32,
    /// INTERNALDATE, when the server sent one
    pub internal_date: Option<DateTime<Utc>>,
}

/// Build a message from raw header bytes and server attributes
///
/// `mailbox` seeds the label list.
pub fn parse_message(raw: &[u8], attrs: MessageAttributes, mailbox: &str) -> Message {
    let fields = parse_fields(&String::from_utf8_lossy(raw));
    let field = |name: &str| {
        fields
            .iter()
            .find_map(|(k, v)| (k == name).then_some(v.as_str()))
    };

    let subject = field("subject")
        .filter(|s| !s.is_empty())
        .unwrap_or(NO_SUBJECT)
        .to_owned();
    let from = field("from").unwrap_or_default().to_owned();
    let to = field("to").map(split_recipients).unwrap_or_default();
    let date = attrs
        .internal_date
        .or_else(|| field("date").and_then(parse_date_header))
        .unwrap_or_else(Utc::now);
    let snippet = build_snippet(&from, &subject);
    let id = attrs.uid.to_string();

    Message {
        thread_id: id.clone(),
        id,
        subject,
        from,
        to,
        date,
        snippet,
        labels: vec![mailbox.to_owned()],
    }
}

/// Split a header block into `(lowercase name, value)` pairs
///
/// Continuation lines are unfolded into the previous field. Lines without a
/// colon or with an empty name are ignored.
fn parse_fields(block: &str) -> Vec<(String, String)> {
    let mut unfolded: Vec<String> = Vec::new();
    for line in block.split("\r\n").flat_map(|l| l.split('\n')) {
        if line.starts_with([' ', '\t']) {
            if let Some(prev) = unfolded.last_mut() {
                prev.push(' ');
                prev.push_str(line.trim());
            }
            continue;
        }
        unfolded.push(line.to_owned());
    }

    unfolded
        .iter()
        .filter_map(|line| {
            let (name, value) = line.split_once(':')?;
            let name = name.trim().to_ascii_lowercase();
            if name.is_empty() {
                return None;
            }
            Some((name, decode_value(value.trim())))
        })
        .collect()
}

/// Decode RFC 2047 encoded words, keeping the raw value on failure
fn decode_value(value: &str) -> String {
    if !value.contains("=?") {
        return value.to_owned();
    }
    let line = format!("X: {value}");
    match mailparse::parse_header(line.as_bytes()) {
        Ok((header, _)) => header.get_value().trim().to_owned(),
        Err(_) => value.to_owned(),
    }
}

/// Comma-split recipients, falling back to the raw value
fn split_recipients(raw: &str) -> Vec<String> {
    let parsed: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect();
    if parsed.is_empty() && !raw.trim().is_empty() {
        return vec![raw.trim().to_owned()];
    }
    parsed
}

fn parse_date_header(value: &str) -> Option<DateTime<Utc>> {
    let epoch = mailparse::dateparse(value).ok()?;
    Utc.timestamp_opt(epoch, 0).single()
}

fn build_snippet(from: &str, subject: &str) -> String {
    let sender = if from.is_empty() { "unknown sender" } else { from };
    format!("{subject} (from {sender})")
        .chars()
        .take(SNIPPET_MAX_CHARS)
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{MessageAttributes, NO_SUBJECT, parse_fields, parse_message};

    fn attrs(uid: u32) -> MessageAttributes {
        MessageAttributes {
            uid,
            internal_date: Some(Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()),
        }
    }

    #[test]
    fn parses_standard_header_block() {
        let raw = b"From: Alice <alice@example.com>\r\nTo: bob@example.com, carol@example.com\r\nSubject: Quarterly report\r\nDate: Wed, 1 Jan 2025 00:00:00 +0000\r\n\r\n";
        let msg = parse_message(raw, attrs(42), "INBOX");

        assert_eq!(msg.id, "42");
        assert_eq!(msg.thread_id, "42");
        assert_eq!(msg.subject, "Quarterly report");
        assert_eq!(msg.from, "Alice <alice@example.com>");
        assert_eq!(msg.to, vec!["bob@example.com", "carol@example.com"]);
        assert_eq!(msg.date, Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap());
        assert_eq!(msg.labels, vec!["INBOX"]);
        assert!(msg.snippet.contains("Quarterly report"));
        assert!(msg.snippet.contains("alice@example.com"));
    }

    #[test]
    fn absent_fields_degrade_to_defaults() {
        let msg = parse_message(b"", attrs(7), "INBOX");
        assert_eq!(msg.subject, NO_SUBJECT);
        assert_eq!(msg.from, "");
        assert!(msg.to.is_empty());
        assert_eq!(msg.labels, vec!["INBOX"]);
    }

    #[test]
    fn garbage_lines_are_ignored() {
        let raw = b"this is not a header\r\n: empty name\r\nSUBJECT :  Shouting  \r\n\xff\xfe\r\n";
        let msg = parse_message(raw, attrs(1), "INBOX");
        assert_eq!(msg.subject, "Shouting");
        assert_eq!(msg.from, "");
    }

    #[test]
    fn to_drops_empty_entries_and_falls_back_to_raw() {
        let msg = parse_message(b"To: a@example.com, , b@example.com,\r\n", attrs(1), "X");
        assert_eq!(msg.to, vec!["a@example.com", "b@example.com"]);

        let msg = parse_message(b"To:  ,  \r\n", attrs(1), "X");
        assert_eq!(msg.to, vec![",".to_owned()]);
    }

    #[test]
    fn folded_lines_are_unfolded() {
        let fields = parse_fields("Subject: part one\r\n part two\r\nFrom: x@example.com");
        assert_eq!(fields[0], ("subject".to_owned(), "part one part two".to_owned()));
        assert_eq!(fields[1], ("from".to_owned(), "x@example.com".to_owned()));
    }

    #[test]
    fn date_header_used_when_internal_date_missing() {
        let raw = b"Date: Wed, 1 Jan 2025 00:00:00 +0000\r\n";
        let msg = parse_message(
            raw,
            MessageAttributes {
                uid: 3,
                internal_date: None,
            },
            "INBOX",
        );
        assert_eq!(msg.date, Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn missing_dates_default_to_parse_time() {
        let before = Utc::now();
        let msg = parse_message(
            b"Subject: undated\r\n",
            MessageAttributes {
                uid: 3,
                internal_date: None,
            },
            "INBOX",
        );
        assert!(msg.date >= before);
    }

    #[test]
    fn encoded_subject_is_decoded() {
        let msg = parse_message(b"Subject: =?UTF-8?Q?Caf=C3=A9?=\r\n", attrs(1), "INBOX");
        assert_eq!(msg.subject, "Caf\u{e9}");
    }
}
