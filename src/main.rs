//! gmail-imap-mcp-rs: Gmail-style IMAP MCP server over stdio
//!
//! This server exposes inbox listing, Gmail-style search, flag and trash
//! updates, label (folder) management, and sending via the Model Context
//! Protocol (MCP) over stdio. Every operation runs on its own short-lived,
//! TLS-only IMAP session.
//!
//! # Architecture
//!
//! - [`main`]: Process entry point with env loading and stdio serving
//! - [`config`]: Environment-driven configuration for IMAP, SMTP, and folders
//! - [`errors`]: Application error model with MCP error mapping
//! - [`server`]: MCP tool handlers with validation and response formatting
//! - [`mailbox`]: Mailbox operations engine composing the pieces below
//! - [`connection`]: Per-operation session lifecycle with guaranteed logout
//! - [`imap`]: IMAP transport/session operations with timeout wrappers
//! - [`fetch`]: Best-effort bulk header fetch
//! - [`headers`]: Header block parsing into normalized messages
//! - [`folders`]: Folder naming policy and mailbox tree flattening
//! - [`query`]: Gmail-style query translation
//! - [`submit`]: Outgoing mail submission over SMTP
//! - [`models`]: Input/output DTOs and schema-bearing types

mod config;
mod connection;
mod errors;
mod fetch;
mod folders;
mod headers;
mod imap;
mod mailbox;
mod models;
mod query;
mod server;
mod submit;
#[cfg(test)]
mod testing;

use std::path::PathBuf;

use clap::Parser;
use config::ServerConfig;
use rmcp::ServiceExt;
use rmcp::transport::stdio;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Command-line options
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Load environment variables from this file instead of `./.env`
    #[arg(long, env = "MAIL_ENV_FILE")]
    env_file: Option<PathBuf>,
}

/// Application entry point
///
/// Initializes tracing from environment, loads config, and serves the MCP
/// server over stdio. This process expects to be spawned by an MCP client
/// via `stdio` transport.
///
/// # Environment Variables
///
/// See [`ServerConfig::load_from_env`] for full configuration options.
///
/// # Example
///
/// ```no_run
/// MAIL_IMAP_USER=user@gmail.com \
/// MAIL_IMAP_PASS=app-password \
/// cargo run
/// ```
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    match &cli.env_file {
        Some(path) => {
            dotenvy::from_path(path)?;
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    // lettre enables ring while rustls defaults to aws-lc-rs
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| "failed to install rustls crypto provider")?;

    let config = ServerConfig::load_from_env()?;
    info!(host = %config.imap.host, user = %config.imap.user, "starting MCP server on stdio");
    let service = server::GmailImapServer::new(config).serve(stdio()).await?;
    service.waiting().await?;
    Ok(())
}
