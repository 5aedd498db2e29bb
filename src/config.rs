use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WalldexError};
use crate::paths::WalldexPaths;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub browse: BrowseConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            browse: BrowseConfig::default(),
        }
    }
}

impl Config {
    pub fn load(paths: &WalldexPaths) -> Result<Self> {
        let path = paths.config_file();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| WalldexError::Config(format!("failed to read {}: {e}", path.display())))?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn load_or_default(paths: &WalldexPaths) -> Self {
        Self::load(paths).unwrap_or_default()
    }

    pub fn save(&self, paths: &WalldexPaths) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| WalldexError::Config(format!("failed to serialize config: {e}")))?;
        let path = paths.config_file();
        std::fs::write(&path, content)
            .map_err(|e| WalldexError::Config(format!("failed to write {}: {e}", path.display())))
    }

    /// Effective database location: the `[storage]` override when set,
    /// otherwise the XDG data-dir default.
    pub fn database_path(&self, paths: &WalldexPaths) -> PathBuf {
        self.storage
            .database
            .clone()
            .unwrap_or_else(|| paths.db_path())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Base directory holding the wallpaper image files. The catalog stores
    /// only file names; absolute paths are joined against this at read time.
    pub wallpaper_dir: PathBuf,
    pub database: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            wallpaper_dir: dirs::picture_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("Wallpapers"),
            database: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowseConfig {
    pub page_size: u32,
}

impl Default for BrowseConfig {
    fn default() -> Self {
        Self {
            page_size: crate::browse::DEFAULT_PAGE_SIZE,
        }
    }
}
