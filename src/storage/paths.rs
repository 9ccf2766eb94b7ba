//! Application paths for config, data, and the probe scratch directory.

use directories::ProjectDirs;
use std::path::{Path, PathBuf};

/// Name of the scratch directory interactive CLIs are launched in.
const PROBE_DIR_NAME: &str = "Probe";

/// Application paths.
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Configuration directory.
    pub config: PathBuf,
    /// Data directory.
    pub data: PathBuf,
}

impl AppPaths {
    /// Create paths for the quotaprobe application.
    #[must_use]
    pub fn new() -> Self {
        if let Some(proj_dirs) = ProjectDirs::from("dev", "quotaprobe", "quotaprobe") {
            Self {
                config: proj_dirs.config_dir().to_path_buf(),
                data: proj_dirs.data_dir().to_path_buf(),
            }
        } else {
            // Fallback to home directory
            let home = home_dir().unwrap_or_else(|| PathBuf::from("."));
            Self {
                config: home.join(".config/quotaprobe"),
                data: home.join(".local/share/quotaprobe"),
            }
        }
    }

    /// Paths rooted under a single directory (tests, portable installs).
    #[must_use]
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            config: root.join("config"),
            data: root.join("data"),
        }
    }

    /// Path to the config file.
    #[must_use]
    pub fn config_file(&self) -> PathBuf {
        self.config.join("config.toml")
    }

    /// Scratch directory that interactive CLIs run in.
    ///
    /// Shared by every PTY run so the tools never inherit the caller's
    /// per-folder trust decisions.
    #[must_use]
    pub fn probe_dir(&self) -> PathBuf {
        self.data.join(PROBE_DIR_NAME)
    }

    /// Create `dir` (and parents) if missing. Safe to call concurrently.
    pub fn ensure_dir(dir: &Path) -> std::io::Result<()> {
        std::fs::create_dir_all(dir)
    }

    /// Ensure the probe scratch directory exists and return it.
    pub fn ensure_probe_dir(&self) -> std::io::Result<PathBuf> {
        let dir = self.probe_dir();
        Self::ensure_dir(&dir)?;
        Ok(dir)
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}

/// User home directory.
#[must_use]
pub fn home_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf())
}
