//! Shell sessions on a local pseudo-terminal (portable-pty).
//!
//! portable-pty exposes blocking readers and writers, so every I/O call
//! hops onto the blocking pool.

use super::ShellSession;
use async_trait::async_trait;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use wterm_core::{WtermError, WtermResult};

const DEFAULT_ROWS: u16 = 24;
const DEFAULT_COLS: u16 = 80;

/// A running PTY child process.
pub struct PtyShell {
    reader: Arc<Mutex<Box<dyn Read + Send>>>,
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    // MasterPty is not Sync.
    master: Mutex<Box<dyn MasterPty + Send>>,
    child: Mutex<Box<dyn Child + Send + Sync>>,
    closed: AtomicBool,
}

impl PtyShell {
    /// Spawn `command` (or `$SHELL` when empty) in a new PTY.
    pub fn spawn(command: &[String], cwd: Option<&Path>) -> WtermResult<Self> {
        let pair = native_pty_system()
            .openpty(PtySize {
                rows: DEFAULT_ROWS,
                cols: DEFAULT_COLS,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| WtermError::Backend(format!("failed to open PTY: {e}")))?;

        let mut cmd = match command.split_first() {
            Some((program, args)) => {
                let mut builder = CommandBuilder::new(program);
                builder.args(args);
                builder
            }
            None => {
                let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());
                CommandBuilder::new(shell)
            }
        };
        cmd.env("TERM", "xterm-256color");
        if let Some(dir) = cwd.map(Path::to_path_buf).or_else(dirs::home_dir) {
            cmd.cwd(dir);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| WtermError::Backend(format!("failed to spawn command: {e}")))?;
        // Keep only the master side open so EOF is seen when the child exits.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| WtermError::Backend(format!("failed to clone PTY reader: {e}")))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| WtermError::Backend(format!("failed to take PTY writer: {e}")))?;

        info!(pid = ?child.process_id(), "PTY spawned");

        Ok(Self {
            reader: Arc::new(Mutex::new(reader)),
            writer: Arc::new(Mutex::new(writer)),
            master: Mutex::new(pair.master),
            child: Mutex::new(child),
            closed: AtomicBool::new(false),
        })
    }
}

fn poisoned(what: &str) -> WtermError {
    WtermError::Backend(format!("PTY {what} lock poisoned"))
}

fn join_error(e: tokio::task::JoinError) -> WtermError {
    WtermError::Backend(format!("join error: {e}"))
}

#[async_trait]
impl ShellSession for PtyShell {
    async fn read(&self, buf: &mut [u8]) -> WtermResult<usize> {
        let reader = self.reader.clone();
        let len = buf.len();
        let chunk = tokio::task::spawn_blocking(move || -> WtermResult<Vec<u8>> {
            let mut reader = reader.lock().map_err(|_| poisoned("reader"))?;
            let mut tmp = vec![0u8; len];
            match reader.read(&mut tmp) {
                Ok(n) => {
                    tmp.truncate(n);
                    Ok(tmp)
                }
                // Linux reports EIO on the master once the child side is gone.
                Err(e) if e.raw_os_error() == Some(5) => Ok(Vec::new()),
                Err(e) => Err(e.into()),
            }
        })
        .await
        .map_err(join_error)??;
        buf[..chunk.len()].copy_from_slice(&chunk);
        Ok(chunk.len())
    }

    async fn write(&self, data: &[u8]) -> WtermResult<()> {
        let writer = self.writer.clone();
        let data = data.to_vec();
        tokio::task::spawn_blocking(move || -> WtermResult<()> {
            let mut writer = writer.lock().map_err(|_| poisoned("writer"))?;
            writer.write_all(&data)?;
            writer.flush()?;
            Ok(())
        })
        .await
        .map_err(join_error)?
    }

    async fn resize(&self, rows: u16, cols: u16) -> WtermResult<()> {
        let master = self.master.lock().map_err(|_| poisoned("master"))?;
        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| WtermError::Backend(format!("PTY resize failed: {e}")))?;
        debug!(rows, cols, "PTY resized");
        Ok(())
    }

    async fn close(&self) -> WtermResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut child = self.child.lock().map_err(|_| poisoned("child"))?;
        // The child may already have exited on its own.
        if let Ok(None) = child.try_wait() {
            child
                .kill()
                .map_err(|e| WtermError::Backend(format!("kill failed: {e}")))?;
        }
        info!("PTY closed");
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn read_until(shell: &PtyShell, needle: &str) -> String {
        let mut out = String::new();
        let mut buf = [0u8; 1024];
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while !out.contains(needle) {
            let n = tokio::time::timeout_at(deadline, shell.read(&mut buf))
                .await
                .expect("timed out reading PTY")
                .unwrap();
            if n == 0 {
                break;
            }
            out.push_str(&String::from_utf8_lossy(&buf[..n]));
        }
        out
    }

    #[tokio::test]
    async fn runs_command_and_reaches_eof() {
        let cmd = vec!["/bin/sh".to_string(), "-c".to_string(), "echo pty-ok".to_string()];
        let shell = PtyShell::spawn(&cmd, None).unwrap();
        let out = read_until(&shell, "pty-ok").await;
        assert!(out.contains("pty-ok"));
        shell.close().await.unwrap();
    }

    #[tokio::test]
    async fn echoes_input_and_resizes() {
        let cmd = vec!["/bin/sh".to_string()];
        let shell = PtyShell::spawn(&cmd, None).unwrap();
        shell.resize(40, 120).await.unwrap();
        shell.write(b"echo hello-$((1+2))\n").await.unwrap();
        let out = read_until(&shell, "hello-3").await;
        assert!(out.contains("hello-3"));
        shell.close().await.unwrap();
        // Second close is a no-op.
        shell.close().await.unwrap();
    }
}
