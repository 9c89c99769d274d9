//! Filesystem operations
//!
//! Handles file and directory operations.

use std::path::Path;

use crate::error::FilesystemError;

/// Create a directory and all parent directories
pub fn create_dir_all(path: &Path) -> Result<(), FilesystemError> {
    std::fs::create_dir_all(path).map_err(|e| FilesystemError::CreateDir {
        path: path.to_path_buf(),
        error: e.to_string(),
    })
}

/// Remove a directory and all its contents
pub fn remove_dir_all(path: &Path) -> Result<(), FilesystemError> {
    if path.exists() {
        std::fs::remove_dir_all(path).map_err(|e| FilesystemError::RemoveDir {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
    }
    Ok(())
}

/// Remove a file if it exists
pub fn remove_file(path: &Path) -> Result<(), FilesystemError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(FilesystemError::RemoveFile {
            path: path.to_path_buf(),
            error: e.to_string(),
        }),
    }
}

/// Write content to a file
pub fn write_file(path: &Path, content: &str) -> Result<(), FilesystemError> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)?;
    }
    std::fs::write(path, content).map_err(|e| FilesystemError::WriteFile {
        path: path.to_path_buf(),
        error: e.to_string(),
    })
}

/// Read a file if it exists
///
/// Invalid UTF-8 sequences are replaced, build tools do not always emit
/// clean text.
pub fn read_optional(path: &Path) -> Result<Option<String>, FilesystemError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(FilesystemError::ReadFile {
            path: path.to_path_buf(),
            error: e.to_string(),
        }),
    }
}

/// Move a file, falling back to copy and delete across filesystems
pub fn move_file(from: &Path, to: &Path) -> Result<(), FilesystemError> {
    let error = |e: std::io::Error| FilesystemError::MoveFile {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        error: e.to_string(),
    };

    if std::fs::rename(from, to).is_ok() {
        return Ok(());
    }
    std::fs::copy(from, to).map_err(error)?;
    std::fs::remove_file(from).map_err(error)
}

/// Create `link` pointing at `target`
pub fn symlink(target: &Path, link: &Path) -> Result<(), FilesystemError> {
    std::os::unix::fs::symlink(target, link).map_err(|e| FilesystemError::Symlink {
        link: link.to_path_buf(),
        target: target.to_path_buf(),
        error: e.to_string(),
    })
}

/// Whether the path itself is a symlink (not followed)
pub fn is_symlink(path: &Path) -> bool {
    std::fs::symlink_metadata(path)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_read_optional_missing_file() {
        let temp = TempDir::new().unwrap();
        assert_eq!(read_optional(&temp.path().join("missing")).unwrap(), None);
    }

    #[test]
    fn test_read_optional_replaces_invalid_utf8() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("log");
        std::fs::write(&path, b"ok \xff end").unwrap();

        let content = read_optional(&path).unwrap().unwrap();
        assert!(content.starts_with("ok "));
        assert!(content.ends_with(" end"));
    }

    #[test]
    fn test_move_then_symlink_back() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("a.rpm");
        let store = temp.path().join("store");
        create_dir_all(&store).unwrap();
        std::fs::write(&file, "rpm").unwrap();

        let moved = store.join("a.rpm");
        move_file(&file, &moved).unwrap();
        symlink(&moved, &file).unwrap();

        assert!(is_symlink(&file));
        assert!(!is_symlink(&moved));
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "rpm");
    }
}
