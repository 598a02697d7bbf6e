use crate::common::{Config, SmartLockError, Result};
use crate::core::detector::FaceBox;
use ort::{Environment, Session, SessionBuilder, Value, GraphOptimizationLevel};
use std::sync::Arc;
use image::{DynamicImage, imageops::FilterType};
use ndarray::{Array4, CowArray};

pub type Embedding = Vec<f32>;

/// Guards the cosine denominator against near-zero norms.
pub const DISTANCE_EPSILON: f32 = 1e-10;

pub struct FaceRecognizer {
    session: Session,
    _environment: Arc<Environment>,
    input_size: u32,
    normalization_value: f32,
}

impl FaceRecognizer {
    pub fn new(config: &Config) -> Result<Self> {
        let environment = Arc::new(
            Environment::builder()
                .with_name("face_recognizer")
                .build()
                .map_err(|e| SmartLockError::Model(format!("Failed to create environment: {}", e)))?
        );

        let model_path = &config.models.recognizer_path;
        if !model_path.exists() {
            return Err(SmartLockError::Model(
                format!("Recognition model not found at: {:?}", model_path)
            ));
        }

        let session = SessionBuilder::new(&environment)?
            .with_optimization_level(optimization_level(config.models.optimization_level))?
            .with_model_from_file(model_path)?;

        Ok(Self {
            session,
            _environment: environment,
            input_size: config.recognizer.input_size,
            normalization_value: config.recognizer.normalization_value,
        })
    }

    pub fn get_embedding(&self, image: &DynamicImage, face: &FaceBox) -> Result<Embedding> {
        let face_img = crop_face(image, face);

        let resized = face_img.resize_exact(self.input_size, self.input_size, FilterType::Triangle);

        let input_array = self.preprocess_face(&resized);
        let cow_array = CowArray::from(input_array.into_dyn());
        let input_tensor = Value::from_array(self.session.allocator(), &cow_array)?;

        let outputs = self.session.run(vec![input_tensor])?;

        let embedding = outputs[0].try_extract::<f32>()?.view().to_owned().into_raw_vec();
        Ok(embedding)
    }

    fn preprocess_face(&self, img: &DynamicImage) -> Array4<f32> {
        // Single-channel model input
        let gray = img.to_luma8();
        let size = self.input_size as usize;
        let norm = self.normalization_value;
        let mut array = Array4::<f32>::zeros((1, 1, size, size));

        for y in 0..size {
            for x in 0..size {
                let pixel = gray.get_pixel(x as u32, y as u32);
                array[[0, 0, y, x]] = (pixel[0] as f32 - norm) / norm;
            }
        }

        array
    }
}

pub(crate) fn optimization_level(level: u32) -> GraphOptimizationLevel {
    match level {
        0 => GraphOptimizationLevel::Disable,
        1 => GraphOptimizationLevel::Level1,
        2 => GraphOptimizationLevel::Level2,
        _ => GraphOptimizationLevel::Level3,
    }
}

fn crop_face(image: &DynamicImage, face: &FaceBox) -> DynamicImage {
    let x = face.x1.max(0.0) as u32;
    let y = face.y1.max(0.0) as u32;
    let width = (face.x2 - face.x1).max(1.0) as u32;
    let height = (face.y2 - face.y1).max(1.0) as u32;

    image.crop_imm(x, y, width, height)
}

/// `1 - cos(a, b)`, in roughly `[0, 2]`. Symmetric in its arguments.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    1.0 - dot / (norm_a * norm_b + DISTANCE_EPSILON)
}

/// Element-wise arithmetic mean. All embeddings must share one dimension.
pub fn mean_embedding(embeddings: &[Embedding]) -> Result<Embedding> {
    let first = embeddings.first().ok_or(SmartLockError::NoFacesDetected)?;
    let embedding_size = first.len();
    let mut averaged = vec![0.0f32; embedding_size];

    for embedding in embeddings {
        if embedding.len() != embedding_size {
            return Err(SmartLockError::Model(format!(
                "embedding dimension mismatch: expected {}, got {}",
                embedding_size,
                embedding.len()
            )));
        }
        for (slot, &value) in averaged.iter_mut().zip(embedding) {
            *slot += value;
        }
    }

    let count = embeddings.len() as f32;
    for value in &mut averaged {
        *value /= count;
    }

    Ok(averaged)
}
