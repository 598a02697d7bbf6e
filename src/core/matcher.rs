use crate::common::{SmartLockError, Result};
use crate::core::embedder::Embedder;
use crate::core::recognizer::{Embedding, cosine_distance, mean_embedding};
use crate::storage::{ImageArchive, ProfileStore, Profiles};
use parking_lot::RwLock;

#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    /// `None` only when no stored profile shares the probe's dimension.
    pub user_id: Option<String>,
    pub distance: f32,
    pub accepted: bool,
}

/// Reference embeddings per user, matched by linear scan.
pub struct FaceMatcher {
    profiles: RwLock<Profiles>,
    threshold: f32,
    store: ProfileStore,
}

impl FaceMatcher {
    /// Loads whatever the profile store currently holds.
    pub fn open(store: ProfileStore, threshold: f32) -> Self {
        let profiles = store.load();
        Self {
            profiles: RwLock::new(profiles),
            threshold,
            store,
        }
    }

    pub fn len(&self) -> usize {
        self.profiles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.read().is_empty()
    }

    pub fn profile(&self, user_id: &str) -> Option<Embedding> {
        self.profiles.read().get(user_id).cloned()
    }

    pub fn accepts(&self, distance: f32) -> bool {
        distance <= self.threshold
    }

    /// Nearest profile to `probe`. Ties keep the first profile in key order.
    pub fn best_match(&self, probe: &[f32]) -> Result<MatchOutcome> {
        let profiles = self.profiles.read();
        if profiles.is_empty() {
            return Err(SmartLockError::NoRegisteredUsers);
        }

        let mut best_user: Option<&String> = None;
        let mut best_distance = f32::INFINITY;
        for (user_id, stored) in profiles.iter() {
            if stored.len() != probe.len() {
                tracing::warn!(
                    "Skipping profile {}: dimension {} != probe {}",
                    user_id,
                    stored.len(),
                    probe.len()
                );
                continue;
            }
            let distance = cosine_distance(probe, stored);
            tracing::debug!("compare to {}: distance={:.4}", user_id, distance);
            if distance < best_distance {
                best_distance = distance;
                best_user = Some(user_id);
            }
        }

        let accepted = self.accepts(best_distance);
        tracing::info!(
            "Best match: {:?} distance={:.4} (threshold={})",
            best_user,
            best_distance,
            self.threshold
        );

        Ok(MatchOutcome {
            user_id: best_user.cloned(),
            distance: best_distance,
            accepted,
        })
    }

    /// Replace `user_id`'s profile with the mean of `embeddings` and persist.
    pub fn enroll(&self, user_id: &str, embeddings: &[Embedding]) -> Result<Embedding> {
        let mean = mean_embedding(embeddings)?;
        let snapshot = {
            let mut profiles = self.profiles.write();
            profiles.insert(user_id.to_string(), mean.clone());
            profiles.clone()
        };
        self.store.save(&snapshot)?;
        tracing::info!("Stored profile for {} from {} embedding(s)", user_id, embeddings.len());
        Ok(mean)
    }

    /// Build one profile per user directory of `archive`. Images that fail to
    /// load or embed are skipped; users with nothing usable are left out.
    pub fn bootstrap(&self, archive: &ImageArchive, embedder: &dyn Embedder) -> Result<usize> {
        tracing::info!(
            "Building embeddings from {}",
            archive.registered_faces_dir().display()
        );

        let mut built = Profiles::new();
        for (user_id, files) in archive.registered_users()? {
            let mut embeddings = Vec::new();
            for file in &files {
                let embedded = image::open(file)
                    .map_err(SmartLockError::from)
                    .and_then(|img| embedder.embed(&img));
                match embedded {
                    Ok(embedding) => embeddings.push(embedding),
                    Err(e) => tracing::warn!("could not compute embedding for {}: {}", file.display(), e),
                }
            }

            match mean_embedding(&embeddings) {
                Ok(mean) => {
                    built.insert(user_id, mean);
                }
                Err(e) => tracing::warn!("no usable embeddings for user {}: {}", user_id, e),
            }
        }

        let count = built.len();
        let snapshot = {
            let mut profiles = self.profiles.write();
            profiles.extend(built);
            profiles.clone()
        };
        self.store.save(&snapshot)?;
        tracing::info!("Bootstrapped {} face profile(s)", count);
        Ok(count)
    }
}
