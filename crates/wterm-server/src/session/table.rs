//! Per-connection session table.
//!
//! Maps session ids to open shell or filesystem sessions. The lock is only
//! held for map updates, never across backend calls.

use crate::backend::{FilesystemSession, ShellSession};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// An open session.
pub enum Session {
    Shell {
        shell: Arc<dyn ShellSession>,
        /// Task copying shell output to the socket.
        relay: JoinHandle<()>,
    },
    Filesystem(Arc<dyn FilesystemSession>),
}

impl Session {
    pub fn kind(&self) -> &'static str {
        match self {
            Session::Shell { .. } => "shell",
            Session::Filesystem(_) => "filesystem",
        }
    }

    /// Close the backend session and stop its relay.
    pub async fn close(self, session_id: u16) {
        let kind = self.kind();
        let result = match self {
            Session::Shell { shell, relay } => {
                relay.abort();
                shell.close().await
            }
            Session::Filesystem(fs) => fs.close().await,
        };
        match result {
            Ok(()) => debug!(session_id, kind, "session closed"),
            Err(e) => warn!(session_id, kind, error = %e, "session close failed"),
        }
    }
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<u16, Session>,
    sealed: bool,
}

/// Shared session table for one connection.
#[derive(Clone, Default)]
pub struct SessionTable {
    inner: Arc<RwLock<Inner>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, session_id: u16) -> bool {
        self.inner.read().await.sessions.contains_key(&session_id)
    }

    /// Register a session. Hands the session back if the id is taken or the
    /// table has been sealed.
    pub async fn insert(&self, session_id: u16, session: Session) -> Result<(), Session> {
        let mut inner = self.inner.write().await;
        if inner.sealed || inner.sessions.contains_key(&session_id) {
            return Err(session);
        }
        inner.sessions.insert(session_id, session);
        Ok(())
    }

    pub async fn remove(&self, session_id: u16) -> Option<Session> {
        self.inner.write().await.sessions.remove(&session_id)
    }

    pub async fn shell(&self, session_id: u16) -> Option<Arc<dyn ShellSession>> {
        match self.inner.read().await.sessions.get(&session_id) {
            Some(Session::Shell { shell, .. }) => Some(shell.clone()),
            _ => None,
        }
    }

    pub async fn filesystem(&self, session_id: u16) -> Option<Arc<dyn FilesystemSession>> {
        match self.inner.read().await.sessions.get(&session_id) {
            Some(Session::Filesystem(fs)) => Some(fs.clone()),
            _ => None,
        }
    }

    /// Refuse further inserts and return everything still open.
    pub async fn seal(&self) -> Vec<(u16, Session)> {
        let mut inner = self.inner.write().await;
        inner.sealed = true;
        inner.sessions.drain().collect()
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.inner.read().await.sessions.len()
    }
}
