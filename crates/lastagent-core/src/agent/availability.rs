//! Executable existence probing

use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::Path;

/// Whether availability results are cached until invalidated or probed every time
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AvailabilityMode {
    #[default]
    Cached,
    Live,
}

/// Lightweight check that an agent's executable can be launched.
///
/// Implementations must not fail: anything that goes wrong means "not installed".
#[cfg_attr(test, mockall::automock)]
pub trait AvailabilityProbe: Send + Sync {
    fn is_installed(&self, program: &str) -> bool;
}

/// Resolves bare program names against `PATH`, paths against the filesystem
#[derive(Debug, Clone, Default)]
pub struct PathProbe {
    search_path: Option<OsString>,
}

impl PathProbe {
    /// Probe using the process `PATH`
    pub fn from_env() -> Self {
        Self {
            search_path: std::env::var_os("PATH"),
        }
    }

    pub fn with_search_path(search_path: impl Into<OsString>) -> Self {
        Self {
            search_path: Some(search_path.into()),
        }
    }
}

impl AvailabilityProbe for PathProbe {
    fn is_installed(&self, program: &str) -> bool {
        if program.trim().is_empty() {
            return false;
        }

        let path = Path::new(program);
        if path.is_absolute() || path.components().count() > 1 {
            return is_executable(path);
        }

        let Some(search_path) = &self.search_path else {
            return false;
        };

        std::env::split_paths(search_path).any(|dir| {
            let candidate = dir.join(program);
            if is_executable(&candidate) {
                return true;
            }
            cfg!(windows) && is_executable(&candidate.with_extension("exe"))
        })
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
}
