// SPDX-License-Identifier: GPL-3.0-only

//! Small helpers for sysfs attribute files

use crate::errors::{BackendError, BackendResult};
use std::fs;
use std::path::Path;

/// Read an attribute and trim surrounding whitespace
pub fn read_trimmed(path: &Path) -> BackendResult<String> {
    fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|e| BackendError::sysfs(path, e))
}

/// Read an attribute, returning `None` when it is missing or unreadable
pub fn read_optional(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

/// Write a decimal integer attribute
pub fn write_int(path: &Path, value: i64) -> BackendResult<()> {
    fs::write(path, value.to_string()).map_err(|e| BackendError::sysfs(path, e))
}

/// Sorted entry names of a directory; empty when the directory is missing
pub fn sorted_entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = match fs::read_dir(dir) {
        Ok(entries) => entries
            .flatten()
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_attribute_is_sysfs_error() {
        let err = read_trimmed(Path::new("/nonexistent/depthcam/attr")).unwrap_err();
        assert!(matches!(err, BackendError::Sysfs { .. }));
        assert!(read_optional(Path::new("/nonexistent/depthcam/attr")).is_none());
    }

    #[test]
    fn test_missing_directory_has_no_entries() {
        assert!(sorted_entries(Path::new("/nonexistent/depthcam")).is_empty());
    }
}
