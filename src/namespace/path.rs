//! Namespace path helpers
//!
//! Paths are absolute, slash-separated, with no trailing slash: `/hank/domains/d0`.

/// Join a parent path and a child name
pub fn join(parent: &str, child: &str) -> String {
    if parent == "/" {
        format!("/{child}")
    } else {
        format!("{parent}/{child}")
    }
}

/// Last component of a path
pub fn name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Parent of a path; `/` is its own parent
pub fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

/// Is `path` well-formed: absolute, non-empty components, no trailing slash
pub fn is_valid(path: &str) -> bool {
    if path == "/" {
        return true;
    }
    path.starts_with('/')
        && !path.ends_with('/')
        && path[1..].split('/').all(|component| !component.is_empty())
}
