//! One-shot file transfer handles shared between FS sessions and HTTP.
//!
//! The filesystem router registers an opened file and hands the client a
//! URL carrying the handle id; the HTTP layer consumes the handle exactly
//! once. Handles that are never fetched stay registered until the process
//! exits.

use crate::backend::{FileReader, FileWriter};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

/// A file waiting to be downloaded.
pub struct DownloadHandle {
    pub name: String,
    pub reader: FileReader,
}

/// Registry of pending downloads and uploads.
///
/// Boxed readers and writers are `Send` but not `Sync`, hence plain mutexes.
pub struct TransferRegistry {
    downloads: Mutex<HashMap<u64, DownloadHandle>>,
    uploads: Mutex<HashMap<u64, FileWriter>>,
    next_download: AtomicU64,
    next_upload: AtomicU64,
}

impl TransferRegistry {
    pub fn new() -> Self {
        Self {
            downloads: Mutex::new(HashMap::new()),
            uploads: Mutex::new(HashMap::new()),
            next_download: AtomicU64::new(1),
            next_upload: AtomicU64::new(1),
        }
    }

    pub async fn register_download(&self, name: String, reader: FileReader) -> u64 {
        let id = self.next_download.fetch_add(1, Ordering::Relaxed);
        self.downloads
            .lock()
            .await
            .insert(id, DownloadHandle { name, reader });
        debug!(id, "download registered");
        id
    }

    /// Remove a download. Only the first caller for an id gets it.
    pub async fn take_download(&self, id: u64) -> Option<DownloadHandle> {
        self.downloads.lock().await.remove(&id)
    }

    pub async fn register_upload(&self, writer: FileWriter) -> u64 {
        let id = self.next_upload.fetch_add(1, Ordering::Relaxed);
        self.uploads.lock().await.insert(id, writer);
        debug!(id, "upload registered");
        id
    }

    /// Remove an upload. Only the first caller for an id gets it.
    pub async fn take_upload(&self, id: u64) -> Option<FileWriter> {
        self.uploads.lock().await.remove(&id)
    }

    /// Outstanding `(downloads, uploads)`.
    pub async fn pending(&self) -> (usize, usize) {
        let downloads = self.downloads.lock().await.len();
        let uploads = self.uploads.lock().await.len();
        (downloads, uploads)
    }
}

impl Default for TransferRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn reader(bytes: &'static [u8]) -> FileReader {
        Box::new(bytes)
    }

    #[tokio::test]
    async fn ids_start_at_one_and_are_independent() {
        let registry = TransferRegistry::new();
        assert_eq!(registry.register_download("a".into(), reader(b"a")).await, 1);
        assert_eq!(registry.register_download("b".into(), reader(b"b")).await, 2);
        assert_eq!(registry.register_upload(Box::new(tokio::io::sink())).await, 1);
        assert_eq!(registry.pending().await, (2, 1));
    }

    #[tokio::test]
    async fn handles_are_consumed_once() {
        let registry = TransferRegistry::new();
        let id = registry.register_download("notes.txt".into(), reader(b"x")).await;
        let handle = registry.take_download(id).await.unwrap();
        assert_eq!(handle.name, "notes.txt");
        assert!(registry.take_download(id).await.is_none());
        assert!(registry.take_upload(id).await.is_none());
    }

    #[tokio::test]
    async fn concurrent_takes_have_one_winner() {
        let registry = Arc::new(TransferRegistry::new());
        let id = registry.register_upload(Box::new(tokio::io::sink())).await;

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move { registry.take_upload(id).await.is_some() }));
        }
        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(registry.pending().await, (0, 0));
    }
}
