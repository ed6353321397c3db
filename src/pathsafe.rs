//! Path safety gate (spec.md §6.4): every caller-supplied path is resolved
//! to absolute form, rejected outright if it contains a null byte, and
//! checked against a configurable allow-list of base directories before any
//! file I/O touches it. Grounded in the teacher's `storage::Storage`, which
//! confines writes to a `base_path` but never validated caller input against
//! it; this generalizes that containment into a standalone, reusable check.

use std::path::{Path, PathBuf};

use crate::error::{EngineError, EngineResult};

/// Resolves `path` to an absolute form and verifies it falls under one of
/// `allowed_roots`. Does not require `path` to exist: non-existent
/// components are resolved lexically rather than via `canonicalize`, so a
/// not-yet-created output file can still be validated.
pub fn resolve_within(path: &str, allowed_roots: &[PathBuf]) -> EngineResult<PathBuf> {
    if path.as_bytes().contains(&0) {
        return Err(EngineError::Validation("path contains a null byte".into()));
    }
    if allowed_roots.is_empty() {
        return Err(EngineError::Validation("no allowed roots configured".into()));
    }

    let absolute = to_absolute(Path::new(path))?;
    let normalized = lexically_normalize(&absolute);
    let real = resolve_symlinks_for_existing_prefix(&normalized)?;

    for root in allowed_roots {
        let root_absolute = lexically_normalize(&to_absolute(root)?);
        let real_root = resolve_symlinks_for_existing_prefix(&root_absolute)?;
        if real.starts_with(&real_root) {
            return Ok(real);
        }
    }

    Err(EngineError::Validation(format!(
        "path {} is not contained in any allowed root",
        normalized.display()
    )))
}

/// Resolves symlinks along the longest existing ancestor of `path` and
/// reattaches any not-yet-existing suffix components unchanged, so a
/// symlink anywhere in an allowed root (or in the caller-supplied path)
/// cannot be used to escape the sandbox while still allowing validation of
/// paths whose final components don't exist yet.
fn resolve_symlinks_for_existing_prefix(path: &Path) -> EngineResult<PathBuf> {
    let mut existing = path;
    let mut suffix: Vec<&std::ffi::OsStr> = Vec::new();

    while !existing.exists() {
        match (existing.file_name(), existing.parent()) {
            (Some(name), Some(parent)) => {
                suffix.push(name);
                existing = parent;
            }
            _ => break,
        }
    }

    let mut resolved = existing.canonicalize()?;
    for component in suffix.into_iter().rev() {
        resolved.push(component);
    }
    Ok(resolved)
}

/// Same as [`resolve_within`], but additionally requires the path to exist
/// and be a directory. Used for operations that scan a directory tree.
pub fn resolve_directory_within(path: &str, allowed_roots: &[PathBuf]) -> EngineResult<PathBuf> {
    let resolved = resolve_within(path, allowed_roots)?;
    if !resolved.exists() {
        return Err(EngineError::PathNotFound(resolved.display().to_string()));
    }
    if !resolved.is_dir() {
        return Err(EngineError::PathNotDirectory(resolved.display().to_string()));
    }
    Ok(resolved)
}

fn to_absolute(path: &Path) -> EngineResult<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        let cwd = std::env::current_dir()?;
        Ok(cwd.join(path))
    }
}

/// Collapses `.` and `..` components without touching the filesystem, so
/// this works for paths that do not yet exist.
fn lexically_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::CurDir => {}
            std::path::Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_null_bytes() {
        let roots = vec![PathBuf::from("/tmp")];
        let result = resolve_within("/tmp/a\0b", &roots);
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }

    #[test]
    fn accepts_path_under_allowed_root() {
        let roots = vec![PathBuf::from("/tmp")];
        let resolved = resolve_within("/tmp/docs/a.pdf", &roots).unwrap();
        assert_eq!(resolved, PathBuf::from("/tmp/docs/a.pdf"));
    }

    #[test]
    fn rejects_path_outside_allowed_roots() {
        let roots = vec![PathBuf::from("/tmp/sandbox")];
        let result = resolve_within("/etc/passwd", &roots);
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }

    #[test]
    fn rejects_traversal_back_out_of_root() {
        let roots = vec![PathBuf::from("/tmp/sandbox")];
        let result = resolve_within("/tmp/sandbox/../../etc/passwd", &roots);
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }

    #[test]
    fn resolve_directory_requires_existing_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let roots = vec![tmp.path().to_path_buf()];

        let file_path = tmp.path().join("a.txt");
        std::fs::write(&file_path, b"x").unwrap();

        let not_a_dir = resolve_directory_within(file_path.to_str().unwrap(), &roots);
        assert!(matches!(not_a_dir, Err(EngineError::PathNotDirectory(_))));

        let missing = tmp.path().join("missing");
        let not_found = resolve_directory_within(missing.to_str().unwrap(), &roots);
        assert!(matches!(not_found, Err(EngineError::PathNotFound(_))));

        let ok = resolve_directory_within(tmp.path().to_str().unwrap(), &roots).unwrap();
        assert_eq!(ok, tmp.path().canonicalize().unwrap());
    }

    #[test]
    fn rejects_symlink_that_escapes_the_allowed_root() {
        let root = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret.txt"), b"top secret").unwrap();

        let link = root.path().join("escape");
        #[cfg(unix)]
        std::os::unix::fs::symlink(outside.path(), &link).unwrap();

        let roots = vec![root.path().to_path_buf()];
        let result = resolve_within(link.join("secret.txt").to_str().unwrap(), &roots);
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }
}
