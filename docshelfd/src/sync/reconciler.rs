use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use docshelf_core::{DocshelfClient, DocshelfError, FileRecord, FolderNode};
use futures_util::future::{BoxFuture, join_all};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, warn};

use super::context::{SyncContext, SyncedFile, parse_modified};
use super::layout::{SYNC_ROOT_FOLDER_ID, SYSTEM_FOLDERS, WorkspaceLayout};
use super::mappings::{MappingError, MappingStore};
use super::paths::{is_hidden, normalize_path};
use super::transfer::{TransferError, download_to_path};

/// Clock skew allowed before a local file counts as stale. Kept as one
/// named constant; the exact width is a tunable heuristic.
pub const MODIFIED_TOLERANCE: time::Duration = time::Duration::seconds(3);

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("api error: {0}")]
    Api(#[from] DocshelfError),
    #[error("mapping store error: {0}")]
    Mapping(#[from] MappingError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),
    #[error("time parse error: {0}")]
    Time(#[from] time::error::Parse),
}

/// One-shot, idempotent pull pass: mirrors the remote folder tree onto
/// local disk, downloads out-of-date files, and prunes local entries the
/// remote no longer has. Mutual exclusion between passes is the resync
/// coordinator's job, suppression of watcher feedback included.
pub struct Reconciler {
    client: DocshelfClient,
    store: MappingStore,
    layout: WorkspaceLayout,
    ctx: Arc<SyncContext>,
}

#[derive(Default)]
struct SubtreeOutcome {
    expected: HashSet<PathBuf>,
    files: Vec<SyncedFile>,
}

impl Reconciler {
    pub fn new(
        client: DocshelfClient,
        store: MappingStore,
        layout: WorkspaceLayout,
        ctx: Arc<SyncContext>,
    ) -> Self {
        Self {
            client,
            store,
            layout,
            ctx,
        }
    }

    pub async fn run(&self) -> Result<(), ReconcileError> {
        for name in SYSTEM_FOLDERS {
            tokio::fs::create_dir_all(self.layout.root().join(name)).await?;
        }

        // Mappings are rebuilt from the authoritative remote tree; clearing
        // them first keeps manual local reorganizations from leaving stale
        // entries behind.
        self.store.delete_by_prefix(&self.layout.root_key()).await?;

        let tree = self.client.folder_tree().await?;
        self.store
            .set(&self.layout.sync_root_key(), SYNC_ROOT_FOLDER_ID)
            .await?;

        let mut expected: HashSet<PathBuf> = HashSet::new();
        expected.insert(self.layout.root().to_path_buf());
        for name in SYSTEM_FOLDERS {
            expected.insert(self.layout.root().join(name));
        }

        // Top-level nodes are independent subtrees; no ordering between
        // siblings is guaranteed. Each subtree reports its own expected
        // paths and file entries, merged here fan-in style.
        let outcomes = join_all(
            tree.iter()
                .map(|node| self.sync_node(node, self.layout.root().join(&node.name))),
        )
        .await;

        let mut files = HashMap::new();
        for outcome in outcomes {
            expected.extend(outcome.expected);
            for entry in outcome.files {
                files.insert(normalize_path(&entry.local_path), entry);
            }
        }
        self.ctx.replace_files(files).await;

        self.prune(self.layout.root(), &expected).await;
        self.ctx.set_last_synced(OffsetDateTime::now_utc()).await;
        Ok(())
    }

    fn sync_node<'a>(&'a self, node: &'a FolderNode, dir: PathBuf) -> BoxFuture<'a, SubtreeOutcome> {
        Box::pin(async move {
            let mut out = SubtreeOutcome::default();
            out.expected.insert(dir.clone());

            if let Some(id) = node.id.as_deref() {
                match self.materialize_folder(id, &dir).await {
                    Ok(entries) => {
                        for entry in entries {
                            out.expected.insert(entry.local_path.clone());
                            out.files.push(entry);
                        }
                    }
                    Err(err) => {
                        if matches!(&err, ReconcileError::Api(api) if api.is_retryable()) {
                            warn!(folder = %dir.display(), error = %err, "folder sync failed, server unavailable");
                        } else {
                            warn!(folder = %dir.display(), error = %err, "folder sync failed");
                        }
                        // A failed listing must not get this folder's
                        // current files pruned; whatever is on disk stays
                        // expected until a pass succeeds here.
                        out.expected.extend(existing_entries(&dir).await);
                    }
                }
            }

            // Virtual grouping nodes carry no identifier; their children
            // are synchronized all the same.
            let children = join_all(
                node.children
                    .iter()
                    .map(|child| self.sync_node(child, dir.join(&child.name))),
            )
            .await;
            for child in children {
                out.expected.extend(child.expected);
                out.files.extend(child.files);
            }
            out
        })
    }

    async fn materialize_folder(
        &self,
        folder_id: &str,
        dir: &Path,
    ) -> Result<Vec<SyncedFile>, ReconcileError> {
        tokio::fs::create_dir_all(dir).await?;
        self.store.set(&normalize_path(dir), folder_id).await?;
        self.sync_folder_files(folder_id, dir).await
    }

    async fn sync_folder_files(
        &self,
        folder_id: &str,
        dir: &Path,
    ) -> Result<Vec<SyncedFile>, ReconcileError> {
        let records = self.client.list_files(folder_id).await?;
        let mut out = Vec::with_capacity(records.len());
        for record in records {
            let target = dir.join(&record.name);
            let modified = parse_modified(record.modified.as_deref())?;
            if needs_download(&target, record.size, modified).await {
                download_to_path(&self.client, &record.id, &target).await?;
                // Pin the local mtime to the remote value so the next
                // comparison is stable.
                if let Some(modified) = modified {
                    set_local_mtime(&target, modified)?;
                }
                debug!(path = %target.display(), "downloaded remote file");
            }
            out.push(self.synced_entry(&record, modified, target));
        }
        Ok(out)
    }

    fn synced_entry(
        &self,
        record: &FileRecord,
        modified: Option<OffsetDateTime>,
        target: PathBuf,
    ) -> SyncedFile {
        SyncedFile {
            id: record.id.clone(),
            name: record.name.clone(),
            size: record.size,
            modified,
            section: self.layout.section_for(&target),
            relative_path: self.layout.relative_path(&target).unwrap_or_default(),
            local_path: target,
        }
    }

    /// Best-effort removal of everything the pass did not mark expected.
    /// Dotfiles are always left alone; individual failures are logged, not
    /// escalated.
    fn prune<'a>(&'a self, dir: &'a Path, expected: &'a HashSet<PathBuf>) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
                return;
            };
            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                if is_hidden(&path) {
                    continue;
                }
                let is_dir = entry
                    .file_type()
                    .await
                    .map(|file_type| file_type.is_dir())
                    .unwrap_or(false);
                if expected.contains(&path) {
                    if is_dir {
                        self.prune(&path, expected).await;
                    }
                    continue;
                }
                let removal = if is_dir {
                    tokio::fs::remove_dir_all(&path).await
                } else {
                    tokio::fs::remove_file(&path).await
                };
                match removal {
                    Ok(()) => debug!(path = %path.display(), "pruned stale entry"),
                    Err(err) => {
                        warn!(path = %path.display(), error = %err, "failed to prune stale entry");
                    }
                }
            }
        })
    }
}

async fn existing_entries(dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    if let Ok(mut entries) = tokio::fs::read_dir(dir).await {
        while let Ok(Some(entry)) = entries.next_entry().await {
            found.push(entry.path());
        }
    }
    found
}

async fn needs_download(target: &Path, size: u64, modified: Option<OffsetDateTime>) -> bool {
    let Ok(meta) = tokio::fs::metadata(target).await else {
        return true;
    };
    if !meta.is_file() || meta.len() != size {
        return true;
    }
    let Some(remote) = modified else {
        return true;
    };
    let Ok(local) = meta.modified() else {
        return true;
    };
    (OffsetDateTime::from(local) - remote).abs() > MODIFIED_TOLERANCE
}

fn set_local_mtime(target: &Path, modified: OffsetDateTime) -> std::io::Result<()> {
    let file = std::fs::OpenOptions::new().write(true).open(target)?;
    file.set_modified(SystemTime::from(modified))
}
