use crate::common::{Config, SmartLockError, Result};
use crate::core::detector::FaceDetector;
use crate::core::recognizer::{Embedding, FaceRecognizer};
use base64::{Engine, engine::general_purpose::STANDARD};
use image::DynamicImage;

/// Maps a face image to a fixed-length embedding.
///
/// Implementations block; async callers run them on the blocking pool.
/// Failures to find a face must surface as [`SmartLockError::NoFaceDetected`].
pub trait Embedder: Send + Sync {
    fn embed(&self, image: &DynamicImage) -> Result<Embedding>;
}

/// Detector + recognizer ONNX pipeline. The most confident face is embedded.
pub struct OnnxEmbedder {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxEmbedder {
    pub fn new(config: &Config) -> Result<Self> {
        tracing::info!(
            "Loading face models: detector={:?} recognizer={:?}",
            config.models.detector_path,
            config.models.recognizer_path
        );
        Ok(Self {
            detector: FaceDetector::new(config)?,
            recognizer: FaceRecognizer::new(config)?,
        })
    }
}

impl Embedder for OnnxEmbedder {
    fn embed(&self, image: &DynamicImage) -> Result<Embedding> {
        let faces = self.detector.detect(image)?;
        let face = faces.first().ok_or(SmartLockError::NoFaceDetected)?;
        tracing::debug!("Embedding face with confidence {:.3}", face.confidence);
        self.recognizer.get_embedding(image, face)
    }
}

/// Decode a browser upload: either a `data:image/...;base64,` URI or bare base64.
pub fn decode_image(payload: &str) -> Result<DynamicImage> {
    let encoded = match payload.split_once(',') {
        Some((_header, body)) => body,
        None => payload,
    };
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| SmartLockError::Validation(format!("Invalid image data: {}", e)))?;
    Ok(image::load_from_memory(&bytes)?)
}
