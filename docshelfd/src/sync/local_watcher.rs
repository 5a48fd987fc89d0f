use std::path::{Path, PathBuf};

use notify::event::{CreateKind, RemoveKind};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

/// Discrete filesystem changes under the synchronized root. Removal events
/// whose kind the backend could not tell apart arrive as `Removed`; the
/// relay classifies those against the file cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    FileCreated(PathBuf),
    FolderCreated(PathBuf),
    FileRemoved(PathBuf),
    FolderRemoved(PathBuf),
    Removed(PathBuf),
}

/// Watches the synchronized root recursively. Only genuine post-startup
/// changes are reported; dotfiles are ignored. Keep the returned watcher
/// alive for as long as events are wanted.
pub fn start_watcher(
    root: &Path,
) -> notify::Result<(RecommendedWatcher, mpsc::UnboundedReceiver<WatchEvent>)> {
    let (tx, rx) = mpsc::unbounded_channel();
    let root = root.to_path_buf();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        if let Ok(event) = res {
            for mapped in map_event(event) {
                let _ = tx.send(mapped);
            }
        }
    })?;
    watcher.watch(root.as_path(), RecursiveMode::Recursive)?;
    Ok((watcher, rx))
}

fn map_event(event: Event) -> Vec<WatchEvent> {
    match event.kind {
        EventKind::Create(kind) => event
            .paths
            .into_iter()
            .filter(|path| !super::paths::is_hidden(path))
            .map(|path| match kind {
                CreateKind::Folder => WatchEvent::FolderCreated(path),
                CreateKind::File => WatchEvent::FileCreated(path),
                _ => {
                    if path.is_dir() {
                        WatchEvent::FolderCreated(path)
                    } else {
                        WatchEvent::FileCreated(path)
                    }
                }
            })
            .collect(),
        EventKind::Remove(kind) => event
            .paths
            .into_iter()
            .filter(|path| !super::paths::is_hidden(path))
            .map(|path| match kind {
                RemoveKind::Folder => WatchEvent::FolderRemoved(path),
                RemoveKind::File => WatchEvent::FileRemoved(path),
                _ => WatchEvent::Removed(path),
            })
            .collect(),
        _ => Vec::new(),
    }
}
