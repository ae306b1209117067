//! Lexical path normalization
//!
//! Resolved values that name files are cleaned up without touching the
//! filesystem: repeated separators collapse, `.` segments disappear and
//! `name/..` pairs fold away.

use std::path::{Component, Path, PathBuf};

/// Normalize a path lexically
///
/// `..` directly under the root is dropped; leading `..` of a relative path
/// is kept. An empty result becomes `.`.
pub fn normalize(path: impl AsRef<Path>) -> PathBuf {
    let path = dunce::simplified(path.as_ref());
    let mut parts: Vec<Component<'_>> = Vec::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => parts.push(component),
            },
            other => parts.push(other),
        }
    }

    if parts.is_empty() {
        return PathBuf::from(".");
    }
    parts.into_iter().collect()
}
