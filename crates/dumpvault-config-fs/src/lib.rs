// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Filesystem-backed `ConfigStore` for dumpvault (uses platform config dir).

use directories::ProjectDirs;
use dumpvault_core::config::{ConfigError, ConfigStore};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
enum Layout {
    /// `<base>/<key>.json`
    Dir(PathBuf),
    /// Every key maps to one file.
    File(PathBuf),
}

/// Store configs as JSON files.
#[derive(Debug, Clone)]
pub struct FsConfigStore {
    layout: Layout,
}

impl FsConfigStore {
    /// Create a store rooted at the user config directory (e.g., `~/.config/dumpvault`).
    pub fn new() -> Result<Self, ConfigError> {
        let proj = ProjectDirs::from("dev", "flyingrobots", "dumpvault")
            .ok_or_else(|| ConfigError::Other("could not resolve config dir".into()))?;
        Ok(Self::in_dir(proj.config_dir()))
    }

    /// Create a store keeping `<key>.json` files under `base`.
    pub fn in_dir(base: impl Into<PathBuf>) -> Self {
        Self {
            layout: Layout::Dir(base.into()),
        }
    }

    /// Create a store that reads and writes exactly `path`, whatever the key.
    pub fn at_file(path: impl Into<PathBuf>) -> Self {
        Self {
            layout: Layout::File(path.into()),
        }
    }

    /// File backing `key`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        match &self.layout {
            Layout::Dir(base) => base.join(format!("{key}.json")),
            Layout::File(path) => path.clone(),
        }
    }
}

fn read(path: &Path) -> Result<Vec<u8>, ConfigError> {
    match fs::read(path) {
        Ok(bytes) => Ok(bytes),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(ConfigError::NotFound),
        Err(err) => Err(ConfigError::Io(err)),
    }
}

impl ConfigStore for FsConfigStore {
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError> {
        read(&self.path_for(key))
    }

    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, data)?;
        Ok(())
    }
}
