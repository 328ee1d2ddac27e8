use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum PathError {
    #[error("empty path")]
    Empty,
    #[error("path '{0}' must be relative to the working directory")]
    Absolute(String),
    #[error("path '{0}' leaves the working directory")]
    Escapes(String),
}

/// Resolve `path` under `workdir`. Only plain relative paths are accepted:
/// no root, no drive prefix, no `..` segments.
pub fn resolve_in(workdir: &Path, path: &str) -> Result<PathBuf, PathError> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(PathError::Empty);
    }
    let rel = Path::new(trimmed);
    let mut out = workdir.to_path_buf();
    for component in rel.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir => return Err(PathError::Escapes(trimmed.to_string())),
            Component::RootDir | Component::Prefix(_) => {
                return Err(PathError::Absolute(trimmed.to_string()));
            }
        }
    }
    if out == workdir {
        return Err(PathError::Empty);
    }
    Ok(out)
}

/// Write `content`, creating parent directories as needed.
pub fn write_file(path: &Path, content: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_paths_land_under_workdir() {
        let wd = Path::new("/tmp/work");
        assert_eq!(resolve_in(wd, "out.csv").unwrap(), wd.join("out.csv"));
        assert_eq!(
            resolve_in(wd, "./reports/summary.json").unwrap(),
            wd.join("reports").join("summary.json")
        );
    }

    #[test]
    fn absolute_and_parent_paths_are_refused() {
        let wd = Path::new("/tmp/work");
        assert_eq!(
            resolve_in(wd, "/etc/passwd"),
            Err(PathError::Absolute("/etc/passwd".into()))
        );
        assert_eq!(
            resolve_in(wd, "reports/../../x.csv"),
            Err(PathError::Escapes("reports/../../x.csv".into()))
        );
        assert_eq!(resolve_in(wd, "  "), Err(PathError::Empty));
        assert_eq!(resolve_in(wd, "."), Err(PathError::Empty));
    }

    #[test]
    fn write_then_read_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = resolve_in(dir.path(), "nested/out.txt").unwrap();
        write_file(&path, b"hello").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello");
    }
}
