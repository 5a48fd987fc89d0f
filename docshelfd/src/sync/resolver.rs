use std::path::Path;

use docshelf_core::{DocshelfClient, DocshelfError};
use futures_util::future::BoxFuture;
use thiserror::Error;
use tracing::debug;

use super::layout::{SYNC_ROOT_FOLDER_ID, WorkspaceLayout};
use super::mappings::{MappingError, MappingStore};
use super::paths::normalize_path;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("api error: {0}")]
    Api(#[from] DocshelfError),
    #[error("mapping store error: {0}")]
    Mapping(#[from] MappingError),
    #[error("path is outside the synchronized root: {0}")]
    OutsideRoot(String),
    #[error("folder {0} conflicted remotely but no sibling with that name was found")]
    ConflictUnresolved(String),
}

/// Maps local directories to remote folder identifiers, creating the
/// remote hierarchy on demand. The synchronized root is a fixed anchor:
/// it resolves to the reserved identifier and never touches the network.
pub struct FolderResolver {
    client: DocshelfClient,
    store: MappingStore,
    layout: WorkspaceLayout,
}

impl FolderResolver {
    pub fn new(client: DocshelfClient, store: MappingStore, layout: WorkspaceLayout) -> Self {
        Self {
            client,
            store,
            layout,
        }
    }

    /// Returns the remote folder id for `local`, creating missing ancestors
    /// root-to-leaf. Safe to call repeatedly and from concurrent tasks: a
    /// remote "already exists" answer falls back to lookup-by-name, so both
    /// callers settle on the same identifier.
    pub async fn ensure_remote_folder(&self, local: &Path) -> Result<String, ResolveError> {
        let key = normalize_path(local);
        self.ensure_by_key(key).await
    }

    fn ensure_by_key(&self, key: String) -> BoxFuture<'_, Result<String, ResolveError>> {
        Box::pin(async move {
            if let Some(id) = self.store.get(&key).await? {
                return Ok(id);
            }
            if key == self.layout.sync_root_key() {
                return Ok(SYNC_ROOT_FOLDER_ID.to_string());
            }
            let (parent, name) = split_parent(&key).ok_or_else(|| {
                ResolveError::OutsideRoot(key.clone())
            })?;
            if !super::paths::is_sub_path(&self.layout.sync_root_key(), &key) {
                return Err(ResolveError::OutsideRoot(key.clone()));
            }

            let parent_id = self.ensure_by_key(parent.to_string()).await?;
            let id = match self.client.create_folder(name, &parent_id).await {
                Ok(folder) => folder.id,
                Err(err) if err.is_conflict() => {
                    debug!(name, parent_id, "folder exists remotely, reusing");
                    self.client
                        .find_folder(&parent_id, name)
                        .await?
                        .map(|folder| folder.id)
                        .ok_or_else(|| ResolveError::ConflictUnresolved(name.to_string()))?
                }
                Err(err) => return Err(err.into()),
            };
            self.store.set(&key, &id).await?;
            Ok(id)
        })
    }

    /// Read-only variant used by deletion flows. Walks the path segment by
    /// segment from the reserved root and gives up as soon as any segment
    /// is missing remotely. Never creates anything.
    pub async fn resolve_folder_id(&self, local: &Path) -> Result<Option<String>, ResolveError> {
        let key = normalize_path(local);
        let sync_root = self.layout.sync_root_key();
        if key == sync_root {
            return Ok(Some(SYNC_ROOT_FOLDER_ID.to_string()));
        }
        if let Some(id) = self.store.get(&key).await? {
            return Ok(Some(id));
        }
        let Some(relative) = key.strip_prefix(&format!("{sync_root}/")) else {
            return Ok(None);
        };

        let mut current = SYNC_ROOT_FOLDER_ID.to_string();
        let mut walked = sync_root;
        for segment in relative.split('/') {
            walked = format!("{walked}/{segment}");
            match self.client.find_folder(&current, segment).await? {
                Some(folder) => {
                    self.store.set(&walked, &folder.id).await?;
                    current = folder.id;
                }
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Deletes the remote counterpart of `local`. "Not found" counts as
    /// already satisfied, and the mapping entry is dropped regardless of
    /// what the remote call did. The reserved root is never deleted.
    pub async fn delete_remote_folder(&self, local: &Path) -> Result<(), ResolveError> {
        let key = normalize_path(local);
        let outcome = match self.resolve_folder_id(local).await {
            Ok(Some(id)) if id != SYNC_ROOT_FOLDER_ID => {
                match self.client.delete_folder(&id).await {
                    Err(err) if err.is_not_found() => {
                        debug!(folder_id = %id, "remote folder already gone");
                        Ok(())
                    }
                    other => other.map_err(ResolveError::from),
                }
            }
            Ok(_) => Ok(()),
            Err(err) => Err(err),
        };
        self.store.delete(&key).await?;
        outcome
    }
}

fn split_parent(key: &str) -> Option<(&str, &str)> {
    let idx = key.rfind('/')?;
    let (parent, name) = key.split_at(idx);
    let name = &name[1..];
    if parent.is_empty() || name.is_empty() {
        return None;
    }
    Some((parent, name))
}
