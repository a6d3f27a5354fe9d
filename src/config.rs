//! Configuration for the mailbox connection, mail submission, and folder naming
//!
//! All configuration is loaded from environment variables. IMAP settings use
//! the `MAIL_IMAP_` prefix, submission settings `MAIL_SMTP_`, and provider
//! folder naming can be overridden per logical folder with `MAIL_FOLDER_<NAME>`.

use std::env;
use std::env::VarError;

use secrecy::SecretString;

use crate::errors::{AppError, AppResult};
use crate::folders::{FolderPolicy, LogicalFolder};

/// IMAP account configuration
///
/// Passwords are stored using `SecretString` to prevent accidental logging.
#[derive(Debug, Clone)]
pub struct ImapConfig {
    /// IMAP server hostname
    pub host: String,
    /// IMAP server port (typically 993 for TLS)
    pub port: u16,
    /// Whether to use TLS (currently enforced to `true`)
    pub secure: bool,
    /// Username for authentication
    pub user: String,
    /// Password stored in a type that prevents accidental logging
    pub pass: SecretString,
}

/// Outgoing mail configuration
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    /// SMTP relay hostname (implicit TLS)
    pub host: String,
    /// SMTP relay port
    pub port: u16,
    /// Username for relay authentication
    pub user: String,
    /// Password for relay authentication
    pub pass: SecretString,
    /// Identity placed in the `From` header of every submitted message
    pub from: String,
}

/// Server-wide configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub imap: ImapConfig,
    pub smtp: SmtpConfig,
    /// Provider folder naming, with ordered fallback candidates
    pub folders: FolderPolicy,
    /// TCP connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// IMAP greeting/TLS handshake timeout in milliseconds
    pub greeting_timeout_ms: u64,
    /// Socket I/O timeout in milliseconds
    pub socket_timeout_ms: u64,
}

impl ServerConfig {
    /// Load all configuration from environment variables
    ///
    /// `MAIL_IMAP_USER` and `MAIL_IMAP_PASS` are required. Hosts default to
    /// Gmail, SMTP credentials default to the IMAP ones, and the `From`
    /// identity defaults to the IMAP user.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if required environment variables are missing
    /// or malformed.
    ///
    /// # Example Environment
    ///
    /// ```text
    /// MAIL_IMAP_USER=user@gmail.com
    /// MAIL_IMAP_PASS=app-password
    /// MAIL_FOLDER_TRASH=[Gmail]/Trash,[Gmail]/Bin
    /// ```
    pub fn load_from_env() -> AppResult<Self> {
        let user = required_env("MAIL_IMAP_USER")?;
        let pass = required_env("MAIL_IMAP_PASS")?;

        let imap = ImapConfig {
            host: optional_env("MAIL_IMAP_HOST")?.unwrap_or_else(|| "imap.gmail.com".to_owned()),
            port: parse_u16_env("MAIL_IMAP_PORT", 993)?,
            secure: parse_bool_env("MAIL_IMAP_SECURE", true)?,
            user: user.clone(),
            pass: SecretString::new(pass.clone().into()),
        };

        let smtp = SmtpConfig {
            host: optional_env("MAIL_SMTP_HOST")?.unwrap_or_else(|| "smtp.gmail.com".to_owned()),
            port: parse_u16_env("MAIL_SMTP_PORT", 465)?,
            user: optional_env("MAIL_SMTP_USER")?.unwrap_or_else(|| user.clone()),
            pass: SecretString::new(optional_env("MAIL_SMTP_PASS")?.unwrap_or(pass).into()),
            from: optional_env("MAIL_FROM")?.unwrap_or(user),
        };

        Ok(Self {
            imap,
            smtp,
            folders: load_folder_policy()?,
            connect_timeout_ms: parse_u64_env("MAIL_IMAP_CONNECT_TIMEOUT_MS", 30_000)?,
            greeting_timeout_ms: parse_u64_env("MAIL_IMAP_GREETING_TIMEOUT_MS", 15_000)?,
            socket_timeout_ms: parse_u64_env("MAIL_IMAP_SOCKET_TIMEOUT_MS", 300_000)?,
        })
    }
}

/// Build the folder policy, applying `MAIL_FOLDER_<NAME>` overrides
fn load_folder_policy() -> AppResult<FolderPolicy> {
    let mut policy = FolderPolicy::gmail();
    for folder in LogicalFolder::ALL {
        let key = format!("MAIL_FOLDER_{}", folder.as_str().to_ascii_uppercase());
        if let Some(raw) = optional_env(&key)? {
            let candidates = parse_candidate_list(&raw);
            if candidates.is_empty() {
                return Err(AppError::InvalidInput(format!(
                    "{key} must name at least one folder"
                )));
            }
            policy.set_candidates(folder, candidates);
        }
    }
    Ok(policy)
}

/// Split a comma-separated folder list, dropping blank entries
fn parse_candidate_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Read a required environment variable, returning error if missing or empty
fn required_env(key: &str) -> AppResult<String> {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(AppError::InvalidInput(format!(
            "missing required environment variable {key}"
        ))),
    }
}

/// Read an optional environment variable; blank values count as unset
fn optional_env(key: &str) -> AppResult<Option<String>> {
    match env::var(key) {
        Ok(v) if v.trim().is_empty() => Ok(None),
        Ok(v) => Ok(Some(v.trim().to_owned())),
        Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(_)) => Err(AppError::InvalidInput(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}

/// Parse a boolean environment variable with flexible values
///
/// Accepts: `1`, `true`, `yes`, `y`, `on` (truthy) or `0`, `false`, `no`,
/// `n`, `off` (falsy). Case-insensitive. Returns `default` if unset.
fn parse_bool_env(key: &str, default: bool) -> AppResult<bool> {
    match env::var(key) {
        Ok(v) => parse_bool_value(&v).ok_or_else(|| {
            AppError::InvalidInput(format!("invalid boolean environment variable {key}: '{v}'"))
        }),
        Err(VarError::NotPresent) => Ok(default),
        Err(VarError::NotUnicode(_)) => Err(AppError::InvalidInput(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}

fn parse_bool_value(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

fn parse_u16_env(key: &str, default: u16) -> AppResult<u16> {
    match env::var(key) {
        Ok(v) => v.trim().parse::<u16>().map_err(|_| {
            AppError::InvalidInput(format!("invalid u16 environment variable {key}: '{v}'"))
        }),
        Err(VarError::NotPresent) => Ok(default),
        Err(VarError::NotUnicode(_)) => Err(AppError::InvalidInput(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}

fn parse_u64_env(key: &str, default: u64) -> AppResult<u64> {
    match env::var(key) {
        Ok(v) => v.trim().parse::<u64>().map_err(|_| {
            AppError::InvalidInput(format!("invalid u64 environment variable {key}: '{v}'"))
        }),
        Err(VarError::NotPresent) => Ok(default),
        Err(VarError::NotUnicode(_)) => Err(AppError::InvalidInput(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}
