use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::RwLock;

use super::layout::SystemSection;
use super::paths::is_sub_path;

/// What is currently believed to exist remotely, projected onto local disk.
/// Rebuilt wholesale by each reconciliation pass, patched one entry at a
/// time by the relay in between.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncedFile {
    pub id: String,
    pub name: String,
    pub size: u64,
    pub modified: Option<OffsetDateTime>,
    pub section: Option<SystemSection>,
    pub relative_path: String,
    pub local_path: PathBuf,
}

/// Shared per-session state: the suppression flag, the synchronized-file
/// cache, and the last completed sync time. One context per workspace
/// session, so sessions cannot cross-talk through globals.
pub struct SyncContext {
    suppressed: AtomicBool,
    files: RwLock<HashMap<String, SyncedFile>>,
    last_synced_at: RwLock<Option<OffsetDateTime>>,
}

impl SyncContext {
    pub fn new() -> Self {
        Self {
            suppressed: AtomicBool::new(false),
            files: RwLock::new(HashMap::new()),
            last_synced_at: RwLock::new(None),
        }
    }

    /// True while a reconciliation pass is writing to the local mirror.
    /// Watcher-driven handlers must read this before acting.
    pub fn is_suppressed(&self) -> bool {
        self.suppressed.load(Ordering::SeqCst)
    }

    /// Raises the suppression flag until the guard drops. Dropping clears
    /// the flag even when the pass errors or the driving task unwinds.
    pub fn suppress(self: &Arc<Self>) -> SuppressionGuard {
        self.suppressed.store(true, Ordering::SeqCst);
        SuppressionGuard {
            ctx: Arc::clone(self),
        }
    }

    pub async fn file(&self, key: &str) -> Option<SyncedFile> {
        self.files.read().await.get(key).cloned()
    }

    pub async fn files(&self) -> Vec<SyncedFile> {
        self.files.read().await.values().cloned().collect()
    }

    pub async fn insert_file(&self, key: String, entry: SyncedFile) {
        self.files.write().await.insert(key, entry);
    }

    pub async fn remove_file(&self, key: &str) {
        self.files.write().await.remove(key);
    }

    pub async fn remove_files_under(&self, prefix: &str) {
        self.files
            .write()
            .await
            .retain(|key, _| !is_sub_path(prefix, key));
    }

    /// Swaps in the map a reconciliation pass rebuilt from the remote tree.
    pub async fn replace_files(&self, files: HashMap<String, SyncedFile>) {
        *self.files.write().await = files;
    }

    pub async fn last_synced_at(&self) -> Option<OffsetDateTime> {
        *self.last_synced_at.read().await
    }

    pub async fn set_last_synced(&self, at: OffsetDateTime) {
        *self.last_synced_at.write().await = Some(at);
    }
}

impl Default for SyncContext {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SuppressionGuard {
    ctx: Arc<SyncContext>,
}

impl Drop for SuppressionGuard {
    fn drop(&mut self) {
        self.ctx.suppressed.store(false, Ordering::SeqCst);
    }
}

pub(crate) fn parse_modified(
    value: Option<&str>,
) -> Result<Option<OffsetDateTime>, time::error::Parse> {
    let Some(value) = value else {
        return Ok(None);
    };
    Ok(Some(OffsetDateTime::parse(value, &Rfc3339)?))
}
