use std::path::{Path, PathBuf};

use super::paths::{is_sub_path, normalize_path};

/// Top-level folders every workspace root contains.
pub const SYSTEM_FOLDERS: [&str; 3] = ["General", "My Folders", "Shared With Me"];

/// The subtree mirrored bidirectionally. Everything else is pull-only.
pub const SYNC_ROOT_NAME: &str = "My Folders";

/// Well-known remote identifier anchoring the synchronized root. Never
/// created or deleted through the folder API.
pub const SYNC_ROOT_FOLDER_ID: &str = "root";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemSection {
    General,
    MyFolders,
    SharedWithMe,
}

impl SystemSection {
    pub fn from_folder_name(name: &str) -> Option<Self> {
        match name {
            "General" => Some(SystemSection::General),
            "My Folders" => Some(SystemSection::MyFolders),
            "Shared With Me" => Some(SystemSection::SharedWithMe),
            _ => None,
        }
    }
}

/// Local geometry of one workspace session.
#[derive(Debug, Clone)]
pub struct WorkspaceLayout {
    root: PathBuf,
}

impl WorkspaceLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn root_key(&self) -> String {
        normalize_path(&self.root)
    }

    pub fn sync_root(&self) -> PathBuf {
        self.root.join(SYNC_ROOT_NAME)
    }

    pub fn sync_root_key(&self) -> String {
        normalize_path(&self.sync_root())
    }

    pub fn contains(&self, path: &Path) -> bool {
        is_sub_path(&self.root_key(), &normalize_path(path))
    }

    /// Forward-slash path relative to the workspace root, or `None` for
    /// paths outside it.
    pub fn relative_path(&self, path: &Path) -> Option<String> {
        let key = normalize_path(path);
        let root_key = self.root_key();
        if key == root_key {
            return Some(String::new());
        }
        key.strip_prefix(&format!("{root_key}/"))
            .map(str::to_string)
    }

    pub fn section_for(&self, path: &Path) -> Option<SystemSection> {
        let relative = self.relative_path(path)?;
        let first = relative.split('/').next()?;
        SystemSection::from_folder_name(first)
    }
}
