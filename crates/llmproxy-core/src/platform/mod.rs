//! Platform abstraction layer.
//!
//! All `#[cfg]` blocks for OS-specific behavior live here rather than in the
//! supervisor itself:
//! - `paths` - search-path composition for direct launches
//! - `permissions` - executable bit handling
//! - `process` - child sessions and termination signals

pub mod paths;
pub mod permissions;
pub mod process;

pub use paths::extend_search_path;
pub use permissions::{is_executable, set_executable};
pub use process::{detach_session, force_termination, request_termination};

/// Name of the search-path environment variable.
pub const SEARCH_PATH_VAR: &str = "PATH";

/// Returns the current platform name.
pub fn current_platform() -> &'static str {
    #[cfg(target_os = "linux")]
    {
        "linux"
    }
    #[cfg(target_os = "windows")]
    {
        "windows"
    }
    #[cfg(target_os = "macos")]
    {
        "macos"
    }
    #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
    {
        "unknown"
    }
}
