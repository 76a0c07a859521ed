use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::ModelDescriptor;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

/// An MMAR that has been fetched into the MMAR directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub id: String,
    pub name: String,
    pub url: String,
    pub model_dir: PathBuf,
    pub downloaded_at: String,
}

/// Ledger of fetched archives, stored as TOML next to them.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct InstalledArchives {
    archives: BTreeMap<String, ArchiveRecord>,
}

impl InstalledArchives {
    pub fn load(config: &Config) -> Result<Self> {
        if !config.registry_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config.registry_path)?;
        let registry: InstalledArchives = toml::from_str(&content)?;
        Ok(registry)
    }

    pub fn save(&self, config: &Config) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(&config.registry_path, content)?;
        Ok(())
    }

    /// Keeps the first download time when an archive is recorded again.
    pub fn record(&mut self, item: &ModelDescriptor, model_dir: PathBuf) {
        let downloaded_at = self
            .archives
            .get(item.id.as_ref())
            .map(|existing| existing.downloaded_at.clone())
            .unwrap_or_else(|| chrono::Utc::now().to_rfc3339());

        self.archives.insert(
            item.id.to_string(),
            ArchiveRecord {
                id: item.id.to_string(),
                name: item.name.to_string(),
                url: item.url.to_string(),
                model_dir,
                downloaded_at,
            },
        );
    }

    pub fn get(&self, id: &str) -> Result<&ArchiveRecord> {
        self.archives
            .get(id)
            .ok_or_else(|| Error::DescriptorNotFound(id.to_string()))
    }

    pub fn list(&self) -> Vec<&ArchiveRecord> {
        self.archives.values().collect()
    }
}
