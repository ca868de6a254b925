//! Backend capability contract.
//!
//! A backend authenticates one connection and then opens shell and
//! filesystem sessions on demand. The dispatcher only talks to these traits.

pub mod local;
pub mod pty;

use crate::config::{expand_tilde, Profile};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use wterm_core::{AuthDesc, WtermResult};

pub use local::LocalBackend;

/// Events a backend raises while authenticating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    /// Ask the client something (sent as an `AUTH` frame on session 0).
    Question(String),
    /// Final verdict. Only `Resolved(true)` authenticates.
    Resolved(bool),
}

/// Sending half of the per-connection auth channel, handed to the backend.
///
/// Dropping every clone without resolving counts as a rejection.
#[derive(Debug, Clone)]
pub struct AuthChannel {
    tx: mpsc::UnboundedSender<AuthEvent>,
}

impl AuthChannel {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AuthEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn ask(&self, question: impl Into<String>) {
        let _ = self.tx.send(AuthEvent::Question(question.into()));
    }

    pub fn accept(&self) {
        let _ = self.tx.send(AuthEvent::Resolved(true));
    }

    pub fn reject(&self) {
        let _ = self.tx.send(AuthEvent::Resolved(false));
    }
}

/// An interactive terminal.
#[async_trait]
pub trait ShellSession: Send + Sync {
    /// Read output into `buf`. `Ok(0)` means the shell ended.
    async fn read(&self, buf: &mut [u8]) -> WtermResult<usize>;
    async fn write(&self, data: &[u8]) -> WtermResult<()>;
    async fn resize(&self, rows: u16, cols: u16) -> WtermResult<()>;
    /// Idempotent.
    async fn close(&self) -> WtermResult<()>;
}

/// One directory listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEntry {
    pub name: String,
    pub is_dir: bool,
    pub modified: Option<SystemTime>,
    /// Permission bits.
    pub mode: u32,
}

pub type FileReader = Box<dyn AsyncRead + Send + Unpin>;
pub type FileWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A file opened for download.
pub struct OpenedFile {
    /// Display name (the file's base name).
    pub name: String,
    pub reader: FileReader,
}

/// Filesystem primitives shared by a session and its volume sub-roots.
#[async_trait]
pub trait FsBase: Send + Sync {
    async fn read_dir(&self, path: &str) -> WtermResult<Vec<FsEntry>>;
    async fn mkdir(&self, path: &str, mode: u32) -> WtermResult<()>;
    async fn remove(&self, path: &str) -> WtermResult<()>;
    async fn rename(&self, from: &str, to: &str) -> WtermResult<()>;
    async fn open_read(&self, path: &str) -> WtermResult<OpenedFile>;
    /// Open for writing, creating or truncating the file.
    async fn open_write(&self, path: &str, mode: u32) -> WtermResult<FileWriter>;
}

/// A filesystem session.
#[async_trait]
pub trait FilesystemSession: FsBase {
    fn as_base(&self) -> &dyn FsBase;
    /// Root the filesystem at `volume` (`C:`, `\\host\share`).
    async fn sub_volume(&self, volume: &str) -> WtermResult<Arc<dyn FsBase>>;
    async fn getwd(&self) -> WtermResult<String>;
    async fn close(&self) -> WtermResult<()>;
}

/// A per-connection backend adapter.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Begin authentication. The verdict arrives on `auth`, possibly after
    /// questions answered through [`Backend::answer`].
    async fn connect(&self, auth: AuthChannel) -> WtermResult<()>;
    async fn answer(&self, desc: AuthDesc) -> WtermResult<()>;
    async fn new_shell(&self, session_id: u16) -> WtermResult<Arc<dyn ShellSession>>;
    async fn new_filesystem(&self, session_id: u16) -> WtermResult<Arc<dyn FilesystemSession>>;
    /// Whether paths reported by this backend are Windows style.
    fn is_windows_path(&self) -> bool;
}

/// Build a fresh backend for one connection from a configured profile.
pub fn from_profile(profile: &Profile) -> Arc<dyn Backend> {
    match profile {
        Profile::Pty {
            cmd, cwd, password, ..
        } => Arc::new(LocalBackend::new(
            cmd.clone(),
            cwd.as_deref().map(expand_tilde),
            password.clone(),
        )),
    }
}
