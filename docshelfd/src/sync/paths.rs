use std::path::Path;

/// Canonical forward-slash form with no trailing separator. Applied before
/// every mapping lookup or insert so platform separator differences never
/// produce duplicate cache keys.
pub fn normalize(path: &str) -> String {
    let mut out = path.replace('\\', "/");
    while out.len() > 1 && out.ends_with('/') {
        out.pop();
    }
    out
}

pub fn normalize_path(path: &Path) -> String {
    normalize(&path.to_string_lossy())
}

/// True iff `child` equals `parent` or sits below it.
pub fn is_sub_path(parent: &str, child: &str) -> bool {
    let parent = normalize(parent);
    let child = normalize(child);
    if child == parent {
        return true;
    }
    if parent == "/" {
        return child.starts_with('/');
    }
    child
        .strip_prefix(&parent)
        .is_some_and(|rest| rest.starts_with('/'))
}

pub fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().starts_with('.'))
        .unwrap_or(false)
}
