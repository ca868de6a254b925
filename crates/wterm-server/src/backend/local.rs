//! Local process backend: PTY shells and the host filesystem.

use super::pty::PtyShell;
use super::{
    AuthChannel, Backend, FileWriter, FilesystemSession, FsBase, FsEntry, OpenedFile, ShellSession,
};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use wterm_core::{AuthDesc, WtermError, WtermResult};

const PASSWORD_QUESTION: &str = "password";

/// Backend that runs everything on this host.
pub struct LocalBackend {
    command: Vec<String>,
    cwd: Option<PathBuf>,
    password: Option<String>,
    // Held only while a password question is outstanding.
    pending_auth: Mutex<Option<AuthChannel>>,
}

impl LocalBackend {
    pub fn new(command: Vec<String>, cwd: Option<PathBuf>, password: Option<String>) -> Self {
        Self {
            command,
            cwd,
            password,
            pending_auth: Mutex::new(None),
        }
    }

    fn take_pending(&self) -> Option<AuthChannel> {
        match self.pending_auth.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

#[async_trait]
impl Backend for LocalBackend {
    async fn connect(&self, auth: AuthChannel) -> WtermResult<()> {
        if self.password.is_none() {
            auth.accept();
            return Ok(());
        }
        auth.ask(PASSWORD_QUESTION);
        let mut guard = self
            .pending_auth
            .lock()
            .map_err(|_| WtermError::Backend("auth lock poisoned".into()))?;
        *guard = Some(auth);
        Ok(())
    }

    async fn answer(&self, desc: AuthDesc) -> WtermResult<()> {
        if desc.question != PASSWORD_QUESTION {
            debug!(question = %desc.question, "ignoring answer to unknown question");
            return Ok(());
        }
        let Some(auth) = self.take_pending() else {
            return Ok(());
        };
        if self.password.as_deref() == Some(desc.password.as_str()) {
            info!("password accepted");
            auth.accept();
        } else {
            warn!("password rejected");
            auth.reject();
        }
        Ok(())
    }

    async fn new_shell(&self, session_id: u16) -> WtermResult<Arc<dyn ShellSession>> {
        let shell = PtyShell::spawn(&self.command, self.cwd.as_deref())?;
        debug!(session_id, "local shell created");
        Ok(Arc::new(shell))
    }

    async fn new_filesystem(&self, session_id: u16) -> WtermResult<Arc<dyn FilesystemSession>> {
        debug!(session_id, "local filesystem created");
        Ok(Arc::new(LocalFs::new(PathBuf::new())))
    }

    fn is_windows_path(&self) -> bool {
        cfg!(windows)
    }
}

/// Host filesystem rooted at `root`. An empty root resolves paths as given.
pub struct LocalFs {
    root: PathBuf,
}

impl LocalFs {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        if self.root.as_os_str().is_empty() {
            PathBuf::from(path)
        } else {
            self.root.join(path.trim_start_matches(['/', '\\']))
        }
    }
}

#[cfg(unix)]
fn permission_bits(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o777
}

#[cfg(not(unix))]
fn permission_bits(meta: &std::fs::Metadata) -> u32 {
    if meta.permissions().readonly() {
        0o444
    } else {
        0o666
    }
}

fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[async_trait]
impl FsBase for LocalFs {
    async fn read_dir(&self, path: &str) -> WtermResult<Vec<FsEntry>> {
        let mut dir = tokio::fs::read_dir(self.resolve(path)).await?;
        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let meta = match entry.metadata().await {
                Ok(meta) => meta,
                Err(e) => {
                    debug!(name = ?entry.file_name(), error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            entries.push(FsEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: meta.is_dir(),
                modified: meta.modified().ok(),
                mode: permission_bits(&meta),
            });
        }
        Ok(entries)
    }

    async fn mkdir(&self, path: &str, mode: u32) -> WtermResult<()> {
        let mut builder = tokio::fs::DirBuilder::new();
        #[cfg(unix)]
        builder.mode(mode);
        #[cfg(not(unix))]
        let _ = mode;
        builder.create(self.resolve(path)).await?;
        Ok(())
    }

    async fn remove(&self, path: &str) -> WtermResult<()> {
        let target = self.resolve(path);
        let meta = tokio::fs::symlink_metadata(&target).await?;
        if meta.is_dir() {
            tokio::fs::remove_dir(&target).await?;
        } else {
            tokio::fs::remove_file(&target).await?;
        }
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> WtermResult<()> {
        tokio::fs::rename(self.resolve(from), self.resolve(to)).await?;
        Ok(())
    }

    async fn open_read(&self, path: &str) -> WtermResult<OpenedFile> {
        let target = self.resolve(path);
        let file = tokio::fs::File::open(&target).await?;
        if file.metadata().await?.is_dir() {
            return Err(WtermError::Backend(format!("{path} is a directory")));
        }
        Ok(OpenedFile {
            name: base_name(&target),
            reader: Box::new(file),
        })
    }

    async fn open_write(&self, path: &str, mode: u32) -> WtermResult<FileWriter> {
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(mode);
        #[cfg(not(unix))]
        let _ = mode;
        let file = options.open(self.resolve(path)).await?;
        Ok(Box::new(file))
    }
}

#[async_trait]
impl FilesystemSession for LocalFs {
    fn as_base(&self) -> &dyn FsBase {
        self
    }

    async fn sub_volume(&self, volume: &str) -> WtermResult<Arc<dyn FsBase>> {
        if cfg!(windows) {
            Ok(Arc::new(LocalFs::new(PathBuf::from(format!("{volume}\\")))))
        } else {
            Err(WtermError::Volume(format!("no volume {volume} on this host")))
        }
    }

    async fn getwd(&self) -> WtermResult<String> {
        dirs::home_dir()
            .map(|p| p.to_string_lossy().into_owned())
            .ok_or_else(|| WtermError::Backend("no home directory".into()))
    }

    async fn close(&self) -> WtermResult<()> {
        Ok(())
    }
}
