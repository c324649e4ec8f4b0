//! File helpers shared by the store, the interface config file and snapshots

use crate::{Error, Result};
use std::io::Write;
use std::path::Path;

/// Permissions for files that contain key material
pub const SECRET_FILE_MODE: u32 = 0o600;

/// Atomically replace `path` with `contents`.
///
/// Writes a temp file in the same directory, fsyncs it, applies `mode`
/// (Unix only) and renames it over the target.
pub fn write_atomic(path: &Path, contents: &[u8], mode: Option<u32>) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)
        .map_err(|e| Error::Storage(format!("Failed to create {}: {}", parent.display(), e)))?;

    let mut file = tempfile::NamedTempFile::new_in(parent).map_err(|e| {
        Error::Storage(format!("Failed to create temp file in {}: {}", parent.display(), e))
    })?;
    file.write_all(contents)
        .and_then(|_| file.as_file().sync_all())
        .map_err(|e| Error::Storage(format!("Failed to write {}: {}", path.display(), e)))?;

    if let Some(mode) = mode {
        set_mode(file.path(), mode)?;
    }

    file.persist(path)
        .map_err(|e| Error::Storage(format!("Failed to replace {}: {}", path.display(), e)))?;
    Ok(())
}

/// Set Unix permission bits; no-op elsewhere
pub fn set_mode(path: &Path, mode: u32) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).map_err(|e| {
            Error::Storage(format!(
                "Failed to set permissions on {}: {}",
                path.display(),
                e
            ))
        })?;
    }
    #[cfg(not(unix))]
    {
        let _ = (path, mode);
    }
    Ok(())
}
