use crate::common::{Config, SmartLockError, Result};
use crate::core::recognizer::optimization_level;
use ort::{Environment, Session, SessionBuilder, Value};
use std::sync::Arc;
use image::{DynamicImage, imageops::FilterType};
use ndarray::{Array4, CowArray};

const NMS_IOU_THRESHOLD: f32 = 0.45;
const MIN_BOX_SIDE: f32 = 10.0;
const MAX_FACES: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct FaceBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
}

/// YOLO-style single-class face detector.
pub struct FaceDetector {
    session: Session,
    _environment: Arc<Environment>,
    input_width: u32,
    input_height: u32,
    confidence: f32,
}

impl FaceDetector {
    pub fn new(config: &Config) -> Result<Self> {
        let environment = Arc::new(
            Environment::builder()
                .with_name("face_detector")
                .build()
                .map_err(|e| SmartLockError::Model(format!("Failed to create environment: {}", e)))?
        );

        let model_path = &config.models.detector_path;
        if !model_path.exists() {
            return Err(SmartLockError::Model(
                format!("Detector model not found at: {:?}", model_path)
            ));
        }

        let session = SessionBuilder::new(&environment)?
            .with_optimization_level(optimization_level(config.models.optimization_level))?
            .with_model_from_file(model_path)?;

        Ok(Self {
            session,
            _environment: environment,
            input_width: config.detector.input_width,
            input_height: config.detector.input_height,
            confidence: config.detector.confidence,
        })
    }

    /// Detected faces in original image coordinates, best first.
    pub fn detect(&self, image: &DynamicImage) -> Result<Vec<FaceBox>> {
        let orig_width = image.width() as f32;
        let orig_height = image.height() as f32;

        let img_array = if image.width() == self.input_width && image.height() == self.input_height {
            image_to_array(image)
        } else {
            let resized = image.resize_exact(self.input_width, self.input_height, FilterType::Nearest);
            image_to_array(&resized)
        };

        let cow_array = CowArray::from(img_array.into_dyn());
        let input_tensor = Value::from_array(self.session.allocator(), &cow_array)?;
        let outputs = self.session.run(vec![input_tensor])?;

        let Some(first) = outputs.first() else {
            return Ok(Vec::new());
        };
        let output = first.try_extract::<f32>()?.view().to_owned();
        let shape = output.shape().to_vec();
        let flat: Vec<f32> = output.iter().copied().collect();

        let mut faces = decode_predictions(&flat, &shape, self.input_width as f32, self.input_height as f32);

        // Suppress duplicates before thresholding so low-confidence twins don't survive
        faces = apply_nms(faces, NMS_IOU_THRESHOLD);
        faces.retain(|face| face.confidence >= self.confidence);
        faces.truncate(MAX_FACES);

        let scale_x = orig_width / self.input_width as f32;
        let scale_y = orig_height / self.input_height as f32;
        for face in &mut faces {
            face.x1 *= scale_x;
            face.x2 *= scale_x;
            face.y1 *= scale_y;
            face.y2 *= scale_y;
        }

        Ok(faces)
    }
}

fn image_to_array(img: &DynamicImage) -> Array4<f32> {
    // Grey replicated across the three input channels
    let gray = img.to_luma8();
    let width = gray.width() as usize;
    let height = gray.height() as usize;
    let raw = gray.as_raw();
    let mut array = Array4::<f32>::zeros((1, 3, height, width));

    let norm_factor = 1.0 / 255.0;
    for y in 0..height {
        let row_offset = y * width;
        for x in 0..width {
            let pixel_value = raw[row_offset + x] as f32 * norm_factor;
            array[[0, 0, y, x]] = pixel_value;
            array[[0, 1, y, x]] = pixel_value;
            array[[0, 2, y, x]] = pixel_value;
        }
    }

    array
}

/// Decode a `[1, N, 5]` or transposed `[1, 5, N]` prediction tensor into corner boxes.
pub(crate) fn decode_predictions(output: &[f32], shape: &[usize], input_width: f32, input_height: f32) -> Vec<FaceBox> {
    let (num_predictions, prediction_length, is_transposed) = match shape.len() {
        n if n >= 3 => {
            if shape[2] > shape[1] && shape[1] <= 10 {
                (shape[2], shape[1], true)
            } else {
                (shape[1], shape[2], false)
            }
        }
        2 => (shape[0], shape[1], false),
        _ => {
            tracing::warn!("Unexpected detector output shape: {:?}", shape);
            return Vec::new();
        }
    };

    if prediction_length < 4 || output.len() < num_predictions * prediction_length {
        tracing::warn!("Detector output too short for shape {:?}", shape);
        return Vec::new();
    }

    let at = |i: usize, field: usize| {
        if is_transposed {
            output[field * num_predictions + i]
        } else {
            output[i * prediction_length + field]
        }
    };

    let mut faces = Vec::new();
    for i in 0..num_predictions {
        let (cx, cy, w, h) = (at(i, 0), at(i, 1), at(i, 2), at(i, 3));
        let confidence = if prediction_length > 4 { at(i, 4) } else { 0.0 };
        if confidence <= 0.001 {
            continue;
        }

        // Normalized coordinates are scaled up to input pixels
        let normalized = cx <= 1.0 && cy <= 1.0 && w <= 1.0 && h <= 1.0;
        let (sx, sy) = if normalized { (input_width, input_height) } else { (1.0, 1.0) };
        let (cx, cy, w, h) = (cx * sx, cy * sy, w * sx, h * sy);

        let x1 = (cx - w / 2.0).max(0.0);
        let y1 = (cy - h / 2.0).max(0.0);
        let x2 = (cx + w / 2.0).min(input_width);
        let y2 = (cy + h / 2.0).min(input_height);

        if x2 - x1 > MIN_BOX_SIDE && y2 - y1 > MIN_BOX_SIDE {
            faces.push(FaceBox { x1, y1, x2, y2, confidence });
        }
    }

    faces
}

pub(crate) fn apply_nms(mut boxes: Vec<FaceBox>, iou_threshold: f32) -> Vec<FaceBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<FaceBox> = Vec::new();
    for candidate in boxes {
        if keep.iter().all(|kept| calculate_iou(kept, &candidate) < iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

fn calculate_iou(box1: &FaceBox, box2: &FaceBox) -> f32 {
    let x1 = box1.x1.max(box2.x1);
    let y1 = box1.y1.max(box2.y1);
    let x2 = box1.x2.min(box2.x2);
    let y2 = box1.y2.min(box2.y2);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let area1 = (box1.x2 - box1.x1) * (box1.y2 - box1.y1);
    let area2 = (box2.x2 - box2.x1) * (box2.y2 - box2.y1);
    let union = area1 + area2 - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> FaceBox {
        FaceBox { x1, y1, x2, y2, confidence }
    }

    #[test]
    fn decodes_row_major_predictions() {
        // one face at (100,100) 40x40, the rest below the confidence floor
        let mut output = vec![0.0f32; 25];
        output[..5].copy_from_slice(&[100.0, 100.0, 40.0, 40.0, 0.9]);
        output[5..10].copy_from_slice(&[50.0, 50.0, 30.0, 30.0, 0.0]);
        let faces = decode_predictions(&output, &[1, 5, 5], 640.0, 640.0);
        assert_eq!(faces, vec![face(80.0, 80.0, 120.0, 120.0, 0.9)]);
    }

    #[test]
    fn decodes_transposed_predictions() {
        // [1, 5, 6]: one row per field, only the first two anchors fire
        let output = [
            100.0, 300.0, 0.0, 0.0, 0.0, 0.0,
            100.0, 300.0, 0.0, 0.0, 0.0, 0.0,
            40.0, 20.0, 0.0, 0.0, 0.0, 0.0,
            40.0, 20.0, 0.0, 0.0, 0.0, 0.0,
            0.8, 0.7, 0.0, 0.0, 0.0, 0.0,
        ];
        let faces = decode_predictions(&output, &[1, 5, 6], 640.0, 640.0);
        assert_eq!(faces.len(), 2);
        assert_eq!(faces[1], face(290.0, 290.0, 310.0, 310.0, 0.7));
    }

    #[test]
    fn normalized_boxes_scale_per_axis() {
        let output = [0.5, 0.5, 0.25, 0.25, 0.9];
        let faces = decode_predictions(&output, &[1, 5], 640.0, 480.0);
        assert_eq!(faces, vec![face(240.0, 180.0, 400.0, 300.0, 0.9)]);
    }

    #[test]
    fn tiny_boxes_are_dropped() {
        let output = [100.0, 100.0, 5.0, 5.0, 0.99];
        assert!(decode_predictions(&output, &[1, 5], 640.0, 640.0).is_empty());
    }

    #[test]
    fn nms_keeps_the_most_confident_of_overlapping_boxes() {
        let kept = apply_nms(
            vec![
                face(0.0, 0.0, 100.0, 100.0, 0.6),
                face(5.0, 5.0, 105.0, 105.0, 0.9),
                face(300.0, 300.0, 400.0, 400.0, 0.7),
            ],
            0.45,
        );
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].confidence, 0.7);
    }
}
