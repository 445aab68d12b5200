//! Executable bit handling.
//!
//! The resolver only requires a candidate to exist, but a candidate without
//! any execute bit is almost always a broken install, so it is worth a warning.

use crate::error::{Result, SupervisorError};
use std::path::Path;
use tracing::debug;

/// Mark a file as executable (mode 0o755 on Unix, no-op elsewhere).
pub fn set_executable(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut permissions = std::fs::metadata(path)
            .map_err(|e| SupervisorError::io_with_path(e, path))?
            .permissions();
        permissions.set_mode(0o755);
        std::fs::set_permissions(path, permissions)
            .map_err(|e| SupervisorError::io_with_path(e, path))?;
        debug!("Set executable permissions on: {}", path.display());
    }

    #[cfg(not(unix))]
    {
        debug!("No executable bit to set for: {}", path.display());
    }

    Ok(())
}

/// Check whether a file can be executed directly.
///
/// # Platform Behavior
/// - **Linux/macOS**: any execute bit is set
/// - **Windows**: the extension is one the shell runs (.exe, .bat, .cmd, .com)
pub fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::metadata(path)
            .map(|metadata| metadata.is_file() && metadata.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }

    #[cfg(not(unix))]
    {
        path.extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .map(|ext| matches!(ext.as_str(), "exe" | "bat" | "cmd" | "com"))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;

    #[test]
    fn test_set_executable() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("litellm");
        File::create(&file_path).unwrap();

        #[cfg(unix)]
        assert!(!is_executable(&file_path));

        set_executable(&file_path).unwrap();

        #[cfg(unix)]
        assert!(is_executable(&file_path));
    }

    #[test]
    fn test_set_executable_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let result = set_executable(&temp_dir.path().join("missing"));

        #[cfg(unix)]
        assert!(matches!(result, Err(SupervisorError::Io { path: Some(_), .. })));
        #[cfg(not(unix))]
        assert!(result.is_ok());
    }

    #[test]
    fn test_directory_is_not_executable() {
        let temp_dir = TempDir::new().unwrap();
        assert!(!is_executable(temp_dir.path()));
    }
}
