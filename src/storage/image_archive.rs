use crate::common::{CaptureKind, Result, capture_path, registration_image_path};
use chrono::Local;
use image::DynamicImage;
use std::fs;
use std::path::{Path, PathBuf};

/// Image files on disk: per-user registration sources and alert captures.
#[derive(Debug, Clone)]
pub struct ImageArchive {
    registered_faces_dir: PathBuf,
    captures_dir: PathBuf,
}

impl ImageArchive {
    pub fn new(registered_faces_dir: PathBuf, captures_dir: PathBuf) -> Self {
        Self { registered_faces_dir, captures_dir }
    }

    pub fn registered_faces_dir(&self) -> &Path {
        &self.registered_faces_dir
    }

    pub fn save_registration(&self, user_id: &str, index: usize, image: &DynamicImage) -> Result<PathBuf> {
        let user_dir = self.registered_faces_dir.join(user_id);
        fs::create_dir_all(&user_dir)?;
        let path = registration_image_path(&user_dir, user_id, index, Local::now());
        save_jpeg(image, &path)?;
        Ok(path)
    }

    pub fn save_capture(&self, kind: CaptureKind, image: &DynamicImage) -> Result<PathBuf> {
        fs::create_dir_all(&self.captures_dir)?;
        let path = capture_path(&self.captures_dir, kind, Local::now());
        save_jpeg(image, &path)?;
        tracing::info!("Saved {} image: {}", kind.prefix(), path.display());
        Ok(path)
    }

    /// One entry per user subdirectory, with that user's image files sorted by name.
    pub fn registered_users(&self) -> Result<Vec<(String, Vec<PathBuf>)>> {
        if !self.registered_faces_dir.is_dir() {
            tracing::warn!(
                "Registered faces directory does not exist: {}",
                self.registered_faces_dir.display()
            );
            return Ok(Vec::new());
        }

        let mut users = Vec::new();
        for entry in fs::read_dir(&self.registered_faces_dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(user_id) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };

            let mut files = Vec::new();
            for file in fs::read_dir(&path)? {
                let file = file?.path();
                if file.is_file() {
                    files.push(file);
                }
            }
            files.sort();
            users.push((user_id, files));
        }

        users.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(users)
    }
}

fn save_jpeg(image: &DynamicImage, path: &Path) -> Result<()> {
    // JPEG has no alpha channel
    DynamicImage::ImageRgb8(image.to_rgb8()).save(path)?;
    Ok(())
}
