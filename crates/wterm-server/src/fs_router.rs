//! Filesystem request handling for filesystem sessions.
//!
//! Each `FS_OPERATION` request is resolved against the session (or one of
//! its volume sub-roots on Windows-style backends) and answered with an
//! `FS_OPERATION` reply or an `INFO` error frame.

use crate::backend::{FilesystemSession, FsBase, FsEntry};
use crate::transfer::TransferRegistry;
use crate::transport::FrameSender;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::fmt::Display;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use wterm_core::{
    split_volume, DirEntryInfo, FsOp, FsRequest, InfoDesc, ServerMessage, WtermError, WtermResult,
    CONTROL_SESSION_ID,
};

const DIR_MODE: u32 = 0o755;
const FILE_MODE: u32 = 0o644;
/// Upload mode where the browser pushes the file over HTTP.
const UPLOAD_SELECTED: &str = "selected";

/// Chooses host files for a local-picker upload.
#[async_trait]
pub trait FilePicker: Send + Sync {
    async fn pick(&self) -> WtermResult<Vec<PathBuf>>;
}

/// Where a path resolved to: the session itself or a volume sub-root.
#[derive(Clone)]
enum Target {
    Session(Arc<dyn FilesystemSession>),
    Volume(Arc<dyn FsBase>),
}

impl Target {
    fn fs(&self) -> &dyn FsBase {
        match self {
            Target::Session(session) => session.as_base(),
            Target::Volume(volume) => volume.as_ref(),
        }
    }
}

/// Answers FS requests for every filesystem session of one connection.
#[derive(Clone)]
pub struct FsRouter {
    sender: FrameSender,
    transfers: Arc<TransferRegistry>,
    picker: Option<Arc<dyn FilePicker>>,
    windows_paths: bool,
}

impl FsRouter {
    pub fn new(
        sender: FrameSender,
        transfers: Arc<TransferRegistry>,
        picker: Option<Arc<dyn FilePicker>>,
        windows_paths: bool,
    ) -> Self {
        Self {
            sender,
            transfers,
            picker,
            windows_paths,
        }
    }

    /// Handle one request. Only errors from sending the reply are returned.
    pub async fn route(
        &self,
        session_id: u16,
        session: Arc<dyn FilesystemSession>,
        req: FsRequest,
    ) -> WtermResult<()> {
        let op = match FsOp::try_from(req.op) {
            Ok(op) => op,
            Err(e) => {
                warn!(session_id, error = %e, "ignoring FS request");
                return Ok(());
            }
        };
        debug!(session_id, op = op.label(), args = ?req.args, "FS request");

        let required = match op {
            FsOp::Getwd => 0,
            FsOp::Rename => 2,
            _ => 1,
        };
        if req.args.len() < required {
            return self.report(session_id, op, "missing argument").await;
        }

        match op {
            FsOp::Getwd => self.getwd(session_id, &session).await,
            FsOp::ReadDir => self.read_dir(session_id, &session, &req.args[0]).await,
            FsOp::Mkdir | FsOp::Remove => {
                self.mkdir_or_remove(session_id, &session, op, &req.args[0])
                    .await
            }
            FsOp::Rename => {
                self.rename(session_id, &session, &req.args[0], &req.args[1])
                    .await
            }
            FsOp::DownloadFile => self.download(session_id, &session, &req.args[0]).await,
            FsOp::UploadFile => {
                let mode = req.args.get(1).map(String::as_str).unwrap_or_default();
                self.upload(session_id, &session, &req.args[0], mode).await
            }
        }
    }

    async fn reply(&self, session_id: u16, op: FsOp, value: Value) -> WtermResult<()> {
        self.sender
            .send(session_id, &ServerMessage::FsResult { op, value })
            .await
    }

    /// Errors go out on the control session; `session_id` is only logged.
    async fn report(&self, session_id: u16, op: FsOp, msg: impl Display) -> WtermResult<()> {
        let text = format!("[FS {}] {msg}", op.label());
        debug!(session_id, "{text}");
        self.sender
            .send(CONTROL_SESSION_ID, &ServerMessage::Info(InfoDesc::error(text)))
            .await
    }

    /// Split off the volume and pick the filesystem it lives on.
    async fn resolve(
        &self,
        session: &Arc<dyn FilesystemSession>,
        path: &str,
    ) -> WtermResult<(Target, String)> {
        let (volume, rel) = split_volume(path, self.windows_paths);
        if volume.is_empty() {
            return Ok((Target::Session(session.clone()), rel));
        }
        let sub = session.sub_volume(&volume).await?;
        Ok((Target::Volume(sub), rel))
    }

    async fn getwd(&self, session_id: u16, session: &Arc<dyn FilesystemSession>) -> WtermResult<()> {
        let cwd = match session.getwd().await {
            Ok(cwd) => cwd,
            Err(e) => {
                warn!(session_id, error = %e, "getwd failed");
                String::new()
            }
        };
        self.reply(session_id, FsOp::Getwd, json!(cwd)).await
    }

    async fn read_dir(
        &self,
        session_id: u16,
        session: &Arc<dyn FilesystemSession>,
        path: &str,
    ) -> WtermResult<()> {
        let op = FsOp::ReadDir;
        let (target, rel) = match self.resolve(session, path).await {
            Ok(resolved) => resolved,
            Err(e) => return self.report(session_id, op, e).await,
        };
        let entries = match target.fs().read_dir(&rel).await {
            Ok(entries) => entries,
            Err(e) => return self.report(session_id, op, e).await,
        };
        let infos: Vec<DirEntryInfo> = entries.into_iter().map(dir_entry_info).collect();
        self.reply(session_id, op, serde_json::to_value(infos)?)
            .await
    }

    async fn mkdir_or_remove(
        &self,
        session_id: u16,
        session: &Arc<dyn FilesystemSession>,
        op: FsOp,
        path: &str,
    ) -> WtermResult<()> {
        let (target, rel) = match self.resolve(session, path).await {
            Ok(resolved) => resolved,
            Err(e) => return self.report(session_id, op, e).await,
        };
        let result = if op == FsOp::Mkdir {
            target.fs().mkdir(&rel, DIR_MODE).await
        } else {
            target.fs().remove(&rel).await
        };
        match result {
            Ok(()) => self.reply(session_id, op, json!("")).await,
            Err(e) => self.report(session_id, op, e).await,
        }
    }

    async fn rename(
        &self,
        session_id: u16,
        session: &Arc<dyn FilesystemSession>,
        from: &str,
        to: &str,
    ) -> WtermResult<()> {
        let op = FsOp::Rename;
        let (from_volume, _) = split_volume(from, self.windows_paths);
        let (to_volume, to_rel) = split_volume(to, self.windows_paths);
        if from_volume != to_volume {
            return self
                .report(session_id, op, "file not in same volume")
                .await;
        }
        let (target, from_rel) = match self.resolve(session, from).await {
            Ok(resolved) => resolved,
            Err(e) => return self.report(session_id, op, e).await,
        };
        match target.fs().rename(&from_rel, &to_rel).await {
            Ok(()) => self.reply(session_id, op, json!("")).await,
            Err(e) => self.report(session_id, op, e).await,
        }
    }

    async fn download(
        &self,
        session_id: u16,
        session: &Arc<dyn FilesystemSession>,
        path: &str,
    ) -> WtermResult<()> {
        let op = FsOp::DownloadFile;
        let (target, rel) = match self.resolve(session, path).await {
            Ok(resolved) => resolved,
            Err(e) => return self.report(session_id, op, e).await,
        };
        let value = match target.fs().open_read(&rel).await {
            Ok(opened) => {
                let name = opened.name.clone();
                let id = self
                    .transfers
                    .register_download(opened.name, opened.reader)
                    .await;
                json!([name, format!("/api/download?id={id}")])
            }
            Err(e) => {
                warn!(session_id, path, error = %e, "download open failed");
                json!(["", ""])
            }
        };
        self.reply(session_id, op, value).await
    }

    async fn upload(
        &self,
        session_id: u16,
        session: &Arc<dyn FilesystemSession>,
        path: &str,
        mode: &str,
    ) -> WtermResult<()> {
        let op = FsOp::UploadFile;
        if mode != UPLOAD_SELECTED {
            let Some(picker) = self.picker.clone() else {
                return self
                    .report(session_id, op, "no file picker available")
                    .await;
            };
            let (target, rel) = match self.resolve(session, path).await {
                Ok(resolved) => resolved,
                Err(e) => return self.report(session_id, op, e).await,
            };
            let router = self.clone();
            tokio::spawn(async move {
                router.copy_picked(session_id, picker, target, rel).await;
            });
            return Ok(());
        }

        let (target, rel) = match self.resolve(session, path).await {
            Ok(resolved) => resolved,
            Err(e) => return self.report(session_id, op, e).await,
        };
        let value = match target.fs().open_write(&rel, FILE_MODE).await {
            Ok(writer) => {
                let id = self.transfers.register_upload(writer).await;
                json!([format!("/api/upload?id={id}")])
            }
            Err(e) => {
                warn!(session_id, path, error = %e, "upload open failed");
                json!([""])
            }
        };
        self.reply(session_id, op, value).await
    }

    /// Copy each picked host file into `dir`, then reply with `[]`.
    async fn copy_picked(
        &self,
        session_id: u16,
        picker: Arc<dyn FilePicker>,
        target: Target,
        dir: String,
    ) {
        let files = match picker.pick().await {
            Ok(files) => files,
            Err(e) => {
                warn!(session_id, error = %e, "file picker failed");
                Vec::new()
            }
        };
        for file in files {
            if let Err(e) = self.copy_one(&target, &dir, &file).await {
                warn!(session_id, file = %file.display(), error = %e, "upload copy failed");
            }
        }
        if let Err(e) = self.reply(session_id, FsOp::UploadFile, json!([])).await {
            debug!(session_id, error = %e, "upload reply not sent");
        }
    }

    async fn copy_one(&self, target: &Target, dir: &str, file: &std::path::Path) -> WtermResult<()> {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| WtermError::Other(format!("{} has no file name", file.display())))?;
        let sep = if self.windows_paths { '\\' } else { '/' };
        let dest = format!("{}{sep}{name}", dir.trim_end_matches(['/', '\\']));

        let mut source = tokio::fs::File::open(file).await?;
        let mut writer = target.fs().open_write(&dest, FILE_MODE).await?;
        tokio::io::copy(&mut source, &mut writer).await?;
        writer.shutdown().await?;
        Ok(())
    }
}

fn dir_entry_info(entry: FsEntry) -> DirEntryInfo {
    let mod_time = entry
        .modified
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    DirEntryInfo {
        name: entry.name,
        dir: entry.is_dir,
        mod_time,
        perm: entry.mode,
    }
}
