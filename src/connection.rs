//! Per-operation connection lifecycle
//!
//! Every public mailbox operation runs inside [`ConnectionManager::run`],
//! which owns one authenticated session from connect to logout. The session
//! is logged out exactly once whether the operation returns `Ok`, returns
//! `Err`, or panics, and always before the caller sees the result.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::{debug, warn};

use crate::errors::{AppError, AppResult};
use crate::imap::{Connector, MailSession};

/// Lifecycle of one managed session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Ready,
    Executing,
    Closing,
    Done,
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Executing => "executing",
            Self::Closing => "closing",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Opens a fresh session per operation and guarantees its teardown
pub struct ConnectionManager<C> {
    connector: Arc<C>,
}

impl<C> Clone for ConnectionManager<C> {
    fn clone(&self) -> Self {
        Self {
            connector: Arc::clone(&self.connector),
        }
    }
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector: Arc::new(connector),
        }
    }

    /// Run `action` against a freshly authenticated session
    ///
    /// If connecting fails the action is never invoked and no logout is
    /// attempted. Otherwise the session is logged out once after the action
    /// settles; a logout failure is logged and does not replace the action's
    /// result. A panic inside the action surfaces as `Internal`.
    ///
    /// # Errors
    ///
    /// Returns the connector's error, the action's error, or `Internal` for a
    /// panicked action.
    pub async fn run<T, F>(&self, operation: &str, action: F) -> AppResult<T>
    where
        T: Send,
        F: for<'s> FnOnce(&'s mut C::Session) -> BoxFuture<'s, AppResult<T>> + Send,
    {
        let mut state = ConnectionState::Connecting;
        debug!(operation, %state, "opening session");

        let mut session = match self.connector.connect().await {
            Ok(session) => session,
            Err(err) => {
                transition(operation, &mut state, ConnectionState::Failed);
                debug!(operation, error = %err, "connect failed");
                return Err(err);
            }
        };
        transition(operation, &mut state, ConnectionState::Ready);

        transition(operation, &mut state, ConnectionState::Executing);
        let outcome = AssertUnwindSafe(async { action(&mut session).await })
            .catch_unwind()
            .await;
        let result = match outcome {
            Ok(result) => result,
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                warn!(operation, reason, "operation panicked");
                Err(AppError::Internal(format!(
                    "operation '{operation}' panicked: {reason}"
                )))
            }
        };

        transition(operation, &mut state, ConnectionState::Closing);
        if let Err(err) = session.logout().await {
            warn!(operation, error = %err, "logout failed");
        }

        let terminal = if result.is_ok() {
            ConnectionState::Done
        } else {
            ConnectionState::Failed
        };
        transition(operation, &mut state, terminal);
        result
    }
}

fn transition(operation: &str, state: &mut ConnectionState, next: ConnectionState) {
    debug!(operation, from = %state, to = %next, "session state");
    *state = next;
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::ConnectionManager;
    use crate::errors::{AppError, AppResult};
    use crate::imap::MailSession;
    use crate::testing::{ScriptedServer, numbered_messages};

    fn explode() -> AppResult<u32> {
        panic!("scripted failure")
    }

    #[tokio::test]
    async fn logs_out_once_after_success() {
        let server = ScriptedServer::new().with_mailbox("INBOX", numbered_messages(2));
        let manager = ConnectionManager::new(server.connector());

        let exists = manager
            .run("examine", |session| {
                Box::pin(async move { session.examine("INBOX").await.map(|s| s.exists) })
            })
            .await
            .expect("run");

        assert_eq!(exists, 2);
        assert_eq!(server.logouts(), 1);
        assert_eq!(server.commands(), vec!["EXAMINE INBOX", "LOGOUT"]);
    }

    #[tokio::test]
    async fn logs_out_once_after_failure() {
        let server = ScriptedServer::new();
        let manager = ConnectionManager::new(server.connector());

        let err = manager
            .run("examine", |session| {
                Box::pin(async move { session.examine("Missing").await.map(|s| s.exists) })
            })
            .await
            .expect_err("missing mailbox");

        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(server.logouts(), 1);
    }

    #[tokio::test]
    async fn logs_out_once_after_panic() {
        let server = ScriptedServer::new();
        let manager = ConnectionManager::new(server.connector());

        let err = manager
            .run("explode", |_session| Box::pin(async move { explode() }))
            .await
            .expect_err("panic becomes failure");

        assert!(matches!(err, AppError::Internal(_)));
        assert!(err.to_string().contains("scripted failure"));
        assert_eq!(server.logouts(), 1);
    }

    #[tokio::test]
    async fn connect_failure_skips_action_and_logout() {
        let server = ScriptedServer::new().failing_connect("bad credentials");
        let manager = ConnectionManager::new(server.connector());

        let err = manager
            .run("never", |_session| {
                Box::pin(async move { Err::<u32, _>(AppError::Internal("invoked".to_owned())) })
            })
            .await
            .expect_err("connect fails");

        assert!(matches!(err, AppError::AuthFailed(_)));
        assert_eq!(server.connects(), 1);
        assert_eq!(server.logouts(), 0);
        assert!(server.commands().is_empty());
    }

    #[tokio::test]
    async fn each_run_uses_a_fresh_session() {
        let server = ScriptedServer::new().with_mailbox("INBOX", Vec::new());
        let manager = ConnectionManager::new(server.connector());

        for _ in 0..3 {
            manager
                .run("examine", |session| {
                    Box::pin(async move { session.examine("INBOX").await.map(|_| ()) })
                })
                .await
                .expect("run");
        }

        assert_eq!(server.connects(), 3);
        assert_eq!(server.logouts(), 3);
    }
}
