use std::path::{Path, PathBuf};

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub storage: StorageConfig,
    pub archive: ArchiveConfig,
    pub snapshot: SnapshotConfig,
}

/// Where the event journal and snapshots live.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    Memory,
    Sqlite { path: PathBuf },
}

/// Connection settings for the long-term archival store.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ArchiveConfig {
    Memory,
    Sqlite { path: PathBuf },
}

#[derive(Debug, Deserialize)]
pub struct SnapshotConfig {
    /// Seconds between snapshot ticks per device. The first tick lands at a
    /// random offset within this period.
    pub period_secs: u64,
}

impl Config {
    pub fn load(path: &Path) -> color_eyre::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig::Sqlite {
                path: PathBuf::from("meterkeep-journal.db"),
            },
            archive: ArchiveConfig::Sqlite {
                path: PathBuf::from("meterkeep-archive.db"),
            },
            snapshot: SnapshotConfig { period_secs: 3600 },
        }
    }
}
