use crate::common::{SmartLockError, Result};
use crate::core::recognizer::Embedding;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

pub type Profiles = BTreeMap<String, Embedding>;

/// Face profiles persisted as one JSON object of `user_id -> [f32, ...]`.
pub struct ProfileStore {
    path: PathBuf,
}

impl ProfileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// A missing or unreadable document yields no profiles; the latter is logged.
    pub fn load(&self) -> Profiles {
        if !self.path.exists() {
            return Profiles::new();
        }

        match self.try_load() {
            Ok(profiles) => {
                tracing::info!("Loaded {} face profile(s) from {}", profiles.len(), self.path.display());
                profiles
            }
            Err(e) => {
                tracing::error!("Failed to load embeddings from {}: {}", self.path.display(), e);
                Profiles::new()
            }
        }
    }

    fn try_load(&self) -> Result<Profiles> {
        let data = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&data)?)
    }

    pub fn save(&self, profiles: &Profiles) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let encoded = serde_json::to_string_pretty(profiles)
            .map_err(|e| SmartLockError::Storage(format!("Failed to serialize: {}", e)))?;
        fs::write(&self.path, encoded)?;
        Ok(())
    }
}
