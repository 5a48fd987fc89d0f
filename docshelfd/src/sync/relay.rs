use std::path::Path;
use std::sync::Arc;

use docshelf_core::{DocshelfClient, DocshelfError, FileRecord};
use thiserror::Error;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use super::context::{SyncContext, SyncedFile, parse_modified};
use super::layout::{SYNC_ROOT_FOLDER_ID, WorkspaceLayout};
use super::local_watcher::WatchEvent;
use super::mappings::{MappingError, MappingStore};
use super::paths::normalize_path;
use super::queue::SerialQueue;
use super::resolver::{FolderResolver, ResolveError};

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("resolver error: {0}")]
    Resolve(#[from] ResolveError),
    #[error("api error: {0}")]
    Api(#[from] DocshelfError),
    #[error("mapping store error: {0}")]
    Mapping(#[from] MappingError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("time parse error: {0}")]
    Time(#[from] time::error::Parse),
    #[error("event path has no parent directory: {0}")]
    MissingParent(String),
}

impl RelayError {
    /// True for server-side hiccups (5xx, 429); the next event or pull
    /// pass retries those naturally.
    pub fn is_transient(&self) -> bool {
        self.api_error().is_some_and(DocshelfError::is_retryable)
    }

    fn api_error(&self) -> Option<&DocshelfError> {
        match self {
            RelayError::Api(err) => Some(err),
            RelayError::Resolve(ResolveError::Api(err)) => Some(err),
            _ => None,
        }
    }
}

/// Turns watcher events into remote mutations, funneled through the serial
/// queue so an upload can never race ahead of the folder creation it
/// depends on.
#[derive(Clone)]
pub struct MutationRelay {
    queue: SerialQueue,
    resolver: Arc<FolderResolver>,
    client: DocshelfClient,
    store: MappingStore,
    ctx: Arc<SyncContext>,
    layout: WorkspaceLayout,
}

impl MutationRelay {
    pub fn new(
        queue: SerialQueue,
        resolver: Arc<FolderResolver>,
        client: DocshelfClient,
        store: MappingStore,
        ctx: Arc<SyncContext>,
        layout: WorkspaceLayout,
    ) -> Self {
        Self {
            queue,
            resolver,
            client,
            store,
            ctx,
            layout,
        }
    }

    /// Queues the event. A failing event is logged and dropped; it never
    /// blocks events queued after it.
    pub fn dispatch(&self, event: WatchEvent) {
        let relay = self.clone();
        let _ = self.queue.enqueue(async move {
            if let Err(err) = relay.handle(event.clone()).await {
                if err.is_transient() {
                    warn!(?event, error = %err, "sync event failed, server unavailable");
                } else {
                    warn!(?event, error = %err, "sync event failed");
                }
            }
        });
    }

    pub async fn handle(&self, event: WatchEvent) -> Result<(), RelayError> {
        match event {
            // Sections outside the synchronized subtree are pull-only;
            // creations there are routine local activity, not sync work.
            WatchEvent::FolderCreated(path) => {
                if !self.in_sync_subtree(&path) {
                    debug!(path = %path.display(), "ignoring folder created outside the synchronized subtree");
                    return Ok(());
                }
                self.resolver.ensure_remote_folder(&path).await?;
                Ok(())
            }
            WatchEvent::FileCreated(path) => {
                if !self.in_sync_subtree(&path) {
                    debug!(path = %path.display(), "ignoring file created outside the synchronized subtree");
                    return Ok(());
                }
                self.upload_file(&path).await
            }
            WatchEvent::FileRemoved(path) => self.remove_remote_file(&path).await,
            WatchEvent::FolderRemoved(path) => self.remove_remote_folder(&path).await,
            WatchEvent::Removed(path) => {
                // Kind-unknown removal: a cached file entry means file flow.
                if self.ctx.file(&normalize_path(&path)).await.is_some() {
                    self.remove_remote_file(&path).await
                } else {
                    self.remove_remote_folder(&path).await
                }
            }
        }
    }

    async fn upload_file(&self, path: &Path) -> Result<(), RelayError> {
        let parent = path
            .parent()
            .ok_or_else(|| RelayError::MissingParent(path.display().to_string()))?;
        let folder_id = self.resolver.ensure_remote_folder(parent).await?;
        let name = file_basename(path)?;

        let file = tokio::fs::File::open(path).await?;
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let record = self.client.upload_file(&folder_id, &name, body).await?;
        debug!(path = %path.display(), file_id = %record.id, "uploaded local file");

        let entry = self.synced_entry(&record, path)?;
        self.ctx.insert_file(normalize_path(path), entry).await;
        Ok(())
    }

    async fn remove_remote_file(&self, path: &Path) -> Result<(), RelayError> {
        let key = normalize_path(path);
        let parent = path
            .parent()
            .ok_or_else(|| RelayError::MissingParent(path.display().to_string()))?;

        // A folder that never materialized remotely, or the reserved root,
        // means there is nothing to delete yet.
        let folder_id = self.resolver.resolve_folder_id(parent).await?;
        let deletable = folder_id
            .as_deref()
            .filter(|id| *id != SYNC_ROOT_FOLDER_ID);
        if let Some(folder_id) = deletable {
            let name = file_basename(path)?;
            let files = self.client.list_files(folder_id).await?;
            if let Some(record) = files.into_iter().find(|file| file.name == name) {
                match self.client.delete_file(&record.id).await {
                    Err(err) if err.is_not_found() => {
                        debug!(file_id = %record.id, "remote file already gone");
                    }
                    other => other?,
                }
            }
        }
        self.ctx.remove_file(&key).await;
        Ok(())
    }

    async fn remove_remote_folder(&self, path: &Path) -> Result<(), RelayError> {
        let key = normalize_path(path);
        if key == self.layout.sync_root_key() {
            // The root is not a real remote object; only local state goes.
            self.store.delete_by_prefix(&key).await?;
            self.ctx.remove_files_under(&key).await;
            return Ok(());
        }

        let result = self.resolver.delete_remote_folder(path).await;
        // Subtree state is cleared even when the remote call failed, so
        // stale mappings cannot accumulate.
        let cleanup = self.store.delete_by_prefix(&key).await;
        self.ctx.remove_files_under(&key).await;
        result?;
        cleanup?;
        Ok(())
    }

    fn in_sync_subtree(&self, path: &Path) -> bool {
        super::paths::is_sub_path(&self.layout.sync_root_key(), &normalize_path(path))
    }

    fn synced_entry(&self, record: &FileRecord, path: &Path) -> Result<SyncedFile, RelayError> {
        Ok(SyncedFile {
            id: record.id.clone(),
            name: record.name.clone(),
            size: record.size,
            modified: parse_modified(record.modified.as_deref())?,
            section: self.layout.section_for(path),
            relative_path: self.layout.relative_path(path).unwrap_or_default(),
            local_path: path.to_path_buf(),
        })
    }
}

fn file_basename(path: &Path) -> Result<String, RelayError> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| RelayError::MissingParent(path.display().to_string()))
}
